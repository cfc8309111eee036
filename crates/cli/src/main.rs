mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use grantscribe_engine::{
    AssemblerOptions, EngineSettings, Exchange, ExtractionResult, InMemoryJobStore, JobPoller,
    JobStatus, JobStore, SettingsStore, extract, extract_or_placeholder,
};
use grantscribe_llm::{
    ChatSession, GenerationRequest, LlmProvider, ProviderConfig, create_provider,
    dispatch_generation_job, draft_preamble,
};
use serde_json::Value;
use snafu::{ResultExt, Whatever, whatever};
use tracing_subscriber::EnvFilter;

use crate::cli::{ChatArgs, Cli, Command, ConfigAction, DraftArgs, ExtractArgs};

const REDACTED: &str = "<redacted>";

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    tracing::debug!(config_path = %store.config_path().display(), "settings loaded");

    match cli.command {
        Command::Extract(args) => run_extract(args, &store.settings()),
        Command::Chat(args) => run_chat(args, &store.settings()).await,
        Command::Draft(args) => run_draft(args, &store.settings()).await,
        Command::Config { action } => run_config(action, &store),
    }
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // Logs go to stderr so stdout stays machine-readable.
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .is_err()
    {
        tracing::warn!("tracing subscriber already set; skipping re-initialization");
    }
}

fn run_extract(args: ExtractArgs, settings: &EngineSettings) -> Result<(), Whatever> {
    let text = if args.input.as_os_str() == "-" {
        io::read_to_string(io::stdin()).whatever_context("failed to read stdin")?
    } else {
        std::fs::read_to_string(&args.input).with_whatever_context(|_| {
            format!("failed to read {}", args.input.display())
        })?
    };

    let document = if args.fields.is_empty() {
        match extract(&text) {
            ExtractionResult::Found { value, strategy } => {
                tracing::info!(?strategy, "recovered document");
                value
            }
            ExtractionResult::NotFound => whatever!("no JSON object found in input"),
        }
    } else {
        let excerpt_chars = args
            .excerpt_chars
            .unwrap_or(settings.extraction.placeholder_excerpt_chars);
        extract_or_placeholder(&text, &args.fields, excerpt_chars)
    };

    print_json(&document)
}

fn build_provider(settings: &EngineSettings) -> Result<Arc<dyn LlmProvider>, Whatever> {
    if !settings.provider.is_configured() {
        whatever!(
            "no API key configured; set provider.api_key in the settings file or export {}",
            grantscribe_engine::settings::OPENAI_API_KEY_ENV
        );
    }
    create_provider(
        ProviderConfig::from_settings(&settings.provider),
        settings.sentinels.clone(),
    )
    .whatever_context("failed to create provider")
}

async fn run_chat(args: ChatArgs, settings: &EngineSettings) -> Result<(), Whatever> {
    let provider = build_provider(settings)?;
    let model = args.model.unwrap_or_else(|| settings.provider.model.clone());

    let printed = AtomicUsize::new(0);
    let mut session = ChatSession::new(provider, AssemblerOptions::from(settings))
        .with_model(model)
        .with_sampling(&settings.provider)
        .on_update(move |exchange| {
            // Text only grows, so the previous length is a char boundary.
            let text = exchange.assistant_text.as_str();
            let start = printed.swap(text.len(), Ordering::Relaxed);
            if start < text.len() {
                let mut stdout = io::stdout().lock();
                let _ = stdout.write_all(text[start..].as_bytes());
                let _ = stdout.flush();
            }
            if exchange.is_terminal() {
                printed.store(0, Ordering::Relaxed);
            }
        });
    if let Some(preamble) = args.preamble {
        session = session.with_preamble(preamble);
    }

    if let Some(prompt) = args.prompt {
        let exchange = session
            .ask(&prompt, args.sources.clone())
            .await
            .whatever_context("chat exchange was rejected")?;
        print_exchange_footer(exchange);
        if let Some(kind) = exchange.failure_kind() {
            whatever!("exchange failed ({kind:?})");
        }
        return Ok(());
    }

    for line in io::stdin().lock().lines() {
        let line = line.whatever_context("failed to read prompt from stdin")?;
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        let exchange = session
            .ask(prompt, args.sources.clone())
            .await
            .whatever_context("chat exchange was rejected")?;
        print_exchange_footer(exchange);
    }
    Ok(())
}

fn print_exchange_footer(exchange: &Exchange) {
    if exchange.assistant_text.is_empty() {
        print!("{}", exchange.display_text());
    }
    println!();

    if let Some(failure) = &exchange.failure {
        eprintln!("error: {}", failure.detail);
    }
    if !exchange.citations.is_empty() {
        println!("\nSources:");
        for (index, citation) in exchange.citations.iter().enumerate() {
            println!("  [{}] {} <{}>", index + 1, citation.title, citation.uri);
        }
    }
}

async fn run_draft(args: DraftArgs, settings: &EngineSettings) -> Result<(), Whatever> {
    let provider = build_provider(settings)?;
    let model = args.model.unwrap_or_else(|| settings.provider.model.clone());
    let request = GenerationRequest::for_turn(model, std::iter::empty(), &args.prompt)
        .with_preamble(draft_preamble(&args.fields))
        .with_settings(&settings.provider);

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let dispatched = dispatch_generation_job(
        provider,
        Arc::clone(&store),
        request,
        args.fields,
        settings.extraction.placeholder_excerpt_chars,
    )
    .await
    .whatever_context("failed to dispatch draft job")?;

    let poller = JobPoller::new(store, settings.jobs.poll_options());
    let job = poller
        .await_job(dispatched.job_id, |progress| {
            eprintln!(
                "[{}/{}] {}",
                progress.attempt, progress.max_attempts, progress.message
            );
        })
        .await;

    match job.status {
        JobStatus::Completed => print_json(&job.result.unwrap_or(Value::Null)),
        JobStatus::Error => {
            let message = job
                .error
                .map(|failure| failure.message)
                .unwrap_or_default();
            whatever!("draft generation failed: {message}")
        }
        JobStatus::Pending => {
            dispatched.worker.abort();
            let message = job
                .error
                .map(|failure| failure.message)
                .unwrap_or_default();
            whatever!("draft generation timed out: {message}")
        }
    }
}

fn run_config(action: ConfigAction, store: &SettingsStore) -> Result<(), Whatever> {
    match action {
        ConfigAction::Path => {
            println!("{}", store.config_path().display());
            Ok(())
        }
        ConfigAction::Show => {
            let mut settings = EngineSettings::clone(&store.settings());
            if !settings.provider.api_key.is_empty() {
                settings.provider.api_key = REDACTED.to_string();
            }
            let value = serde_json::to_value(&settings)
                .whatever_context("failed to serialize settings")?;
            print_json(&value)
        }
        ConfigAction::Init { force } => {
            let path = store.config_path();
            if path.exists() && !force {
                whatever!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            store
                .update(EngineSettings::default())
                .whatever_context("failed to write settings")?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<(), Whatever> {
    let rendered = serde_json::to_string_pretty(value).whatever_context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
