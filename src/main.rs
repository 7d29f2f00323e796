use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use gilfoyle_core::{GilfoyleConfig, GilfoyleError, OutputFormat, ReviewRunKey};
use gilfoyle_review::coordinator::{Admission, RunCoordinator};
use gilfoyle_review::gitlab::{DryRunGitLab, GitLabClient, HeldWrite};
use gilfoyle_review::llm::LlmReasoner;
use gilfoyle_review::pipeline::{ReviewOrchestrator, RunOutcome};
use gilfoyle_review::ports::GitLabApi;
use gilfoyle_review::teamwork::TeamworkClient;
use gilfoyle_webhook::AppState;

const DEFAULT_CONFIG_PATH: &str = "gilfoyle.toml";

#[derive(Parser)]
#[command(
    name = "gilfoyle",
    version,
    about = "GitLab merge request reviewer",
    long_about = "Gilfoyle reviews GitLab merge requests when it is mentioned in a comment\n\
                  or added as a reviewer, and posts a summary plus inline comments.\n\n\
                  Examples:\n  \
                    gilfoyle init                            Create a gilfoyle.toml config file\n  \
                    gilfoyle serve --port 8000               Listen for GitLab webhooks\n  \
                    gilfoyle review --project 3 --mr 7       Review one merge request now\n  \
                    git diff | gilfoyle diff                 Show diff lines with their numbers"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: gilfoyle.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook service
    #[command(long_about = "Run the webhook service.\n\n\
        Accepts GitLab note and merge request events on POST /webhook/gitlab,\n\
        authenticated with the X-Gitlab-Token header.\n\n\
        Examples:\n  gilfoyle serve\n  gilfoyle serve --host 127.0.0.1 --port 9000")]
    Serve {
        /// Listen address (default: server.host from config)
        #[arg(long)]
        host: Option<String>,
        /// Listen port (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Review one merge request immediately
    #[command(long_about = "Review one merge request immediately.\n\n\
        Runs the same pipeline as a webhook trigger. With --dry-run nothing is\n\
        posted; the summary and inline comments are printed instead.\n\n\
        Examples:\n  gilfoyle review --project 3 --mr 7\n  gilfoyle review --project 3 --mr 7 --dry-run")]
    Review {
        /// GitLab project id
        #[arg(long)]
        project: u64,
        /// Merge request iid
        #[arg(long)]
        mr: u64,
        /// Print the comments instead of posting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse a unified diff and print its lines with old/new numbers
    #[command(long_about = "Parse a unified diff and print its lines with old/new numbers.\n\n\
        Reads from stdin or a file. Useful to check which lines an inline\n\
        comment can be attached to.\n\n\
        Examples:\n  git diff | gilfoyle diff\n  gilfoyle diff --file changes.patch --format json")]
    Diff {
        /// Read diff from file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Create a default gilfoyle.toml configuration file
    #[command(long_about = "Create a default gilfoyle.toml configuration file.\n\n\
        Generates a commented template with all available options.\n\
        Fails if gilfoyle.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Gilfoyle configuration
# Secrets can be left out and supplied through GITLAB_TOKEN,
# GITLAB_WEBHOOK_SECRET, TEAMWORK_API_KEY and LLM_API_KEY.

[server]
host = "0.0.0.0"
port = 8000
log_level = "info"

[gitlab]
url = "https://gitlab.com"
bot_username = "gilfoyle"
# token = "glpat-..."
# webhook_secret = "..."

[teamwork]
# url = "https://yourcompany.teamwork.com"
# api_key = "..."

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
max_tokens = 4096
temperature = 0.3
max_tool_rounds = 8
# base_url = "https://api.anthropic.com"

[review]
run_timeout_secs = 300
retention_secs = 3600
max_concurrent_reviews = 5
max_diff_lines = 1000

[review.retry]
max_attempts = 3
base_delay_ms = 2000
multiplier = 2
max_delay_ms = 10000
"#;

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!("gilfoyle v{version}: merge request reviews on mention\n");
    println!("Commands:");
    println!("  serve     Run the webhook service");
    println!("  review    Review one merge request now");
    println!("  diff      Show diff lines with their old/new numbers");
    println!("  init      Create default configuration\n");
    println!("Run 'gilfoyle <command> --help' for details.");
}

fn load_config(path: Option<&Path>) -> Result<GilfoyleConfig> {
    let config = match path {
        Some(path) => GilfoyleConfig::from_file(path)
            .wrap_err(format!("loading {}", path.display()))?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                GilfoyleConfig::from_file(default_path)?
            } else {
                GilfoyleConfig::default()
            }
        }
    };
    Ok(config.with_env_overrides())
}

fn init_tracing(config: &GilfoyleConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_diff_input(file: &Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err(format!("reading {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()
                .wrap_err("reading stdin")?;
            Ok(input)
        }
    }
}

fn gitlab_client(config: &GilfoyleConfig) -> Result<GitLabClient, GilfoyleError> {
    GitLabClient::new(
        &config.gitlab.url,
        config.gitlab.token.as_deref().unwrap_or_default(),
    )
}

fn build_orchestrator(
    config: &GilfoyleConfig,
    gitlab: Arc<dyn GitLabApi>,
) -> Result<ReviewOrchestrator, GilfoyleError> {
    let coordinator = Arc::new(RunCoordinator::new(config.review.retention()));
    let reasoner = Arc::new(LlmReasoner::new(&config.llm)?);
    let mut orchestrator = ReviewOrchestrator::new(gitlab, reasoner, coordinator, &config.review);
    if config.teamwork.is_configured() {
        let tracker = TeamworkClient::new(
            &config.teamwork.url,
            config.teamwork.api_key.as_deref().unwrap_or_default(),
        )?;
        orchestrator = orchestrator.with_task_tracker(Arc::new(tracker));
    } else {
        tracing::info!("teamwork not configured; task context disabled");
    }
    Ok(orchestrator)
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .into_diagnostic()
        .wrap_err(format!("resolving {host}:{port}"))?
        .next()
        .ok_or_else(|| miette::miette!("{host}:{port} did not resolve to an address"))
}

async fn run_serve(config: &GilfoyleConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    config.validate_for_serve()?;
    let gitlab = Arc::new(gitlab_client(config)?);
    let orchestrator = Arc::new(build_orchestrator(config, gitlab)?);
    let state = AppState::new(
        orchestrator,
        config.gitlab.webhook_secret.as_deref().unwrap_or_default(),
        &config.gitlab.bot_username,
    );

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let addr = resolve_addr(&host, port.unwrap_or(config.server.port)).await?;
    gilfoyle_webhook::serve(state, addr).await?;
    Ok(())
}

async fn run_review(config: &GilfoyleConfig, project: u64, mr: u64, dry_run: bool) -> Result<()> {
    config.validate_for_review()?;
    let client = gitlab_client(config)?;
    let mut dry = None;
    let gitlab: Arc<dyn GitLabApi> = if dry_run {
        let held = Arc::new(DryRunGitLab::new(client));
        dry = Some(Arc::clone(&held));
        held
    } else {
        Arc::new(client)
    };
    let orchestrator = build_orchestrator(config, gitlab)?;

    let head_sha = orchestrator.head_sha(project, mr).await?;
    let key = ReviewRunKey::new(project, mr, head_sha);
    if let Admission::Rejected(reason) = orchestrator.coordinator().admit(&key) {
        miette::bail!("review {key} not started: {reason}");
    }
    eprintln!("Reviewing {key} ...");

    let outcome = orchestrator.run(&key).await;

    if let Some(dry) = &dry {
        for write in dry.take_writes() {
            match write {
                HeldWrite::Summary { body } => println!("=== summary ===\n{body}\n"),
                HeldWrite::Inline { body, position } => println!(
                    "=== {}:{} ({} side) ===\n{body}\n",
                    position.file_path, position.line, position.side
                ),
            }
        }
    }

    match outcome {
        RunOutcome::Completed(report) => {
            eprintln!(
                "Verdict: {}. {} inline comments posted, {} failed, {} moved to the summary.",
                report.verdict.assessment.label(),
                report.inline_posted,
                report.inline_failed,
                report.downgraded,
            );
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
        RunOutcome::Failed(failure) => {
            miette::bail!("review failed ({}): {}", failure.reason, failure.message)
        }
    }
}

fn run_diff(file: &Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let input = read_diff_input(file)?;
    let files = gilfoyle_difflens::parse_unified_diff(&input)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&files).into_diagnostic()?);
        }
        OutputFormat::Text => {
            for file in &files {
                println!("{file}");
                for hunk in &file.hunks {
                    println!(
                        "@@ -{},{} +{},{} @@",
                        hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
                    );
                    for line in &hunk.lines {
                        println!("{line}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    match cli.command {
        None => print_welcome(),
        Some(Command::Serve { host, port }) => {
            let config = load_config(cli.config.as_deref())?;
            init_tracing(&config);
            run_serve(&config, host, port).await?;
        }
        Some(Command::Review {
            project,
            mr,
            dry_run,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            init_tracing(&config);
            run_review(&config, project, mr, dry_run).await?;
        }
        Some(Command::Diff { ref file, format }) => {
            run_diff(file, format)?;
        }
        Some(Command::Init) => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                miette::bail!("{DEFAULT_CONFIG_PATH} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {DEFAULT_CONFIG_PATH} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gilfoyle", &mut std::io::stdout());
        }
    }

    Ok(())
}
