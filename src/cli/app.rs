//! CLI entry point: argument parsing, wiring, and exit codes.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::agent::{TaskAgent, TaskStatus};
use crate::analyzer::PageAnalyzer;
use crate::browser::cdp::CdpBrowser;
use crate::cache::UiCache;
use crate::cli::console;
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::executor::ActionExecutor;
use crate::llm::{LlmPlanner, OllamaBackend, OpenAiBackend, Planner};

const APP_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Parser)]
#[command(
    name = "taskpilot",
    version,
    about = "Natural-language browser automation with adaptive recovery",
    after_help = "Examples:\n  \
        taskpilot \"Search DuckDuckGo for rust tutorials\"\n  \
        taskpilot \"Buy the cheapest wireless mouse\" --no-approval --headless\n  \
        taskpilot \"Book a flight\" --config configs/flights.json"
)]
struct Cli {
    /// Your task in plain English; prompted for when omitted.
    request: Option<String>,

    /// Path to a site-hints JSON file passed to the planner.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the approval step (auto-approve risky actions).
    #[arg(long)]
    no_approval: bool,

    /// Run the browser without a window.
    #[arg(long)]
    headless: bool,

    /// Planner model; prefix with "ollama/" for a local model.
    #[arg(long)]
    model: Option<String>,

    /// Per-action timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    console::print_banner();

    let request = match cli.request.clone() {
        Some(request) if !request.trim().is_empty() => request,
        _ => prompt_for_request()?,
    };

    let mut config = AppConfig::load(&PathBuf::from(APP_CONFIG_FILE))
        .context("failed to load config.json")?;
    if cli.headless {
        config.browser.headless = true;
    }
    if let Some(seconds) = cli.timeout {
        config.browser.timeout_ms = seconds * 1000;
    }
    if cli.no_approval {
        config.security.require_approval = false;
    }

    let site_hints = match &cli.config {
        Some(path) => Some(load_site_hints(path)?),
        None => None,
    };

    let model = cli
        .model
        .clone()
        .unwrap_or_else(|| format!("ollama/{}", config.ollama.model));
    let planner = build_planner(&model, &config, site_hints)?;
    println!("Request: {request}");
    println!("Model: {model}");

    let action_timeout = Duration::from_millis(config.browser.timeout_ms);
    let browser = CdpBrowser::launch(
        config.browser.headless,
        action_timeout,
        (config.browser.viewport_width, config.browser.viewport_height),
    )
    .await
    .context("failed to launch browser")?;
    let driver = browser
        .new_page()
        .await
        .context("failed to open browser page")?;

    let cache_path = config
        .cache
        .enabled
        .then(|| PathBuf::from(&config.cache.cache_file));
    let cache = UiCache::open(cache_path, config.cache.max_entries, config.cache.max_age_hours);
    let credentials =
        CredentialStore::open(Some(PathBuf::from(&config.security.credentials_file)));

    let executor = ActionExecutor::new(
        Arc::new(driver),
        PageAnalyzer::default(),
        cache,
        credentials,
        action_timeout,
    );
    let mut agent = TaskAgent::new(
        executor,
        planner,
        config.security.require_approval,
        config.recovery.max_recovery_attempts,
    );
    if config.security.require_approval {
        agent.set_approval_callback(Box::new(console::prompt_approval));
    }

    let report = tokio::select! {
        report = agent.run(&request) => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    browser.close().await;

    match report {
        Some(report) => {
            console::print_report(&report);
            match report.status {
                TaskStatus::Success | TaskStatus::Cancelled => Ok(()),
                TaskStatus::Error => std::process::exit(1),
            }
        }
        None => {
            eprintln!("\nInterrupted by user");
            std::process::exit(130);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("taskpilot={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn prompt_for_request() -> anyhow::Result<String> {
    print!("What would you like me to do?\n> ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let request = line.trim().to_string();
    if request.is_empty() {
        bail!("no request provided");
    }
    Ok(request)
}

/// Render a site-hints file into the prose block appended to planner
/// prompts.
fn load_site_hints(path: &PathBuf) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("config file not found: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;

    let field = |key: &str| {
        value
            .get(key)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    Ok(format!(
        "Site: {}\nBase URL: {}\nSelectors: {}\nInstructions: {}",
        field("site_name"),
        field("base_url"),
        field("selectors"),
        field("instructions"),
    ))
}

fn build_planner(
    model: &str,
    config: &AppConfig,
    site_hints: Option<String>,
) -> anyhow::Result<Arc<dyn Planner>> {
    if let Some(local_model) = model.strip_prefix("ollama/") {
        let backend = OllamaBackend::new(
            config.ollama.base_url.clone(),
            local_model,
            config.ollama.temperature,
        );
        return Ok(Arc::new(LlmPlanner::new(backend).with_site_hints(site_hints)));
    }

    let api_key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY must be set for hosted models (or use --model ollama/<name>)")?;
    let backend = OpenAiBackend::new(
        crate::llm::openai::DEFAULT_BASE_URL,
        api_key,
        model,
        config.ollama.temperature,
    );
    Ok(Arc::new(LlmPlanner::new(backend).with_site_hints(site_hints)))
}
