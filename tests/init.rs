use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gilfoyle"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "gilfoyle init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join("gilfoyle.toml");
    assert!(config_path.exists(), "gilfoyle.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[gitlab]"));
    assert!(content.contains("[review.retry]"));

    let config = gilfoyle_core::GilfoyleConfig::from_toml(&content).unwrap();
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.gitlab.bot_username, "gilfoyle");
    assert_eq!(config.review.max_concurrent_reviews, 5);
    assert_eq!(config.review.retry.max_attempts, 3);
    assert!(config.gitlab.token.is_none());

    // Raw toml must agree with the typed loader.
    let raw: toml::Value = toml::from_str(&content).unwrap();
    assert_eq!(raw["llm"]["max_tool_rounds"].as_integer(), Some(8));
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gilfoyle.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gilfoyle"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join("gilfoyle.toml")).unwrap();
    assert_eq!(content, "# existing");
}
