use gilfoyle_core::Side;
use gilfoyle_difflens::{changed_paths, find_position, parse_unified_diff, resolve, LineKind};

#[test]
fn added_lines_resolve_in_increasing_order_from_hunk_start() {
    let diff = "\
--- a/src/lib.py
+++ b/src/lib.py
@@ -10,3 +10,5 @@
 first
-gone
+one
+two
+three
 last
";
    let hunks = resolve(diff).unwrap();
    let added: Vec<u32> = hunks[0]
        .lines
        .iter()
        .filter(|l| l.kind == LineKind::Added)
        .filter_map(|l| l.new_line)
        .collect();
    assert_eq!(added, vec![11, 12, 13]);

    let mut previous = 9;
    for line in added {
        let pos = find_position(&hunks, "src/lib.py", line, Side::New).unwrap();
        assert!(pos.line > previous);
        assert_eq!(pos.file_path, "src/lib.py");
        previous = pos.line;
    }

    for line in 10..=14 {
        assert!(find_position(&hunks, "src/lib.py", line, Side::New).is_some());
    }
    assert!(find_position(&hunks, "src/lib.py", 9, Side::New).is_none());
    assert!(find_position(&hunks, "src/lib.py", 15, Side::New).is_none());
}

#[test]
fn merge_request_fixture() {
    let diff = include_str!("fixtures/merge_request.diff");
    let files = parse_unified_diff(diff).unwrap();
    // the binary file is dropped
    assert_eq!(files.len(), 3);

    let hunks = resolve(diff).unwrap();
    assert_eq!(
        changed_paths(&hunks),
        vec!["src/a.py", "src/util_io.py", "CHANGELOG.md"]
    );

    let added = find_position(&hunks, "src/a.py", 12, Side::New).unwrap();
    assert_eq!(added.paired_line, None);
    assert_eq!(added.old_path, None);

    // the blank context line keeps both counters in step
    let blank = find_position(&hunks, "src/a.py", 11, Side::New).unwrap();
    assert_eq!(blank.paired_line, Some(11));
    let after = find_position(&hunks, "src/a.py", 13, Side::New).unwrap();
    assert_eq!(after.paired_line, Some(12));

    let renamed = find_position(&hunks, "src/util.py", 1, Side::Old).unwrap();
    assert_eq!(renamed.file_path, "src/util_io.py");
    assert_eq!(renamed.old_path.as_deref(), Some("src/util.py"));

    let created = find_position(&hunks, "CHANGELOG.md", 2, Side::New).unwrap();
    assert_eq!(created.old_path, None);
    assert!(find_position(&hunks, "CHANGELOG.md", 1, Side::Old).is_none());
}

#[test]
fn hunks_serialize_with_line_numbers() {
    let hunks = resolve("--- a/x\n+++ b/x\n@@ -1 +1,2 @@\n a\n+b\n").unwrap();
    let json = serde_json::to_value(&hunks).unwrap();
    assert_eq!(json[0]["filePath"], "x");
    assert_eq!(json[0]["lines"][1]["kind"], "added");
    assert_eq!(json[0]["lines"][1]["newLine"], 2);
    assert!(json[0]["lines"][1]["oldLine"].is_null());
}
