use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use grantscribe_engine::RawCitation;

#[derive(Parser, Debug)]
#[command(
    name = "grantscribe",
    version,
    about = "Draft grant sections with a language model and recover structured output"
)]
pub struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, global = true, env = "GRANTSCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recover a JSON object from model output in a file or stdin
    Extract(ExtractArgs),
    /// Ask the model and stream the answer with its sources
    Chat(ChatArgs),
    /// Generate a structured draft as a background job and wait for it
    Draft(DraftArgs),
    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Input file, or `-` for stdin
    pub input: PathBuf,

    /// Expected fields; when set, unrecoverable input yields a placeholder document
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Characters of raw text kept in each placeholder field
    #[arg(long)]
    pub excerpt_chars: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// First question; omit to read one question per line from stdin
    pub prompt: Option<String>,

    /// Model identifier overriding the configured one
    #[arg(long)]
    pub model: Option<String>,

    /// System instruction sent ahead of the conversation
    #[arg(long)]
    pub preamble: Option<String>,

    /// Source attached to every answer, as `URI` or `TITLE|URI`
    #[arg(long = "source", value_parser = parse_source)]
    pub sources: Vec<RawCitation>,
}

#[derive(Args, Debug)]
pub struct DraftArgs {
    /// Description of the proposal to draft
    pub prompt: String,

    /// Section names the draft must contain
    #[arg(long, value_delimiter = ',', required = true)]
    pub fields: Vec<String>,

    /// Model identifier overriding the configured one
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the settings file location
    Path,
    /// Print the effective settings with the API key redacted
    Show,
    /// Write a settings file populated with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn parse_source(raw: &str) -> Result<RawCitation, String> {
    let (title, uri) = match raw.split_once('|') {
        Some((title, uri)) => (Some(title.trim().to_string()), uri.trim()),
        None => (None, raw.trim()),
    };
    if uri.is_empty() {
        return Err("source uri must not be empty".to_string());
    }
    Ok(RawCitation::new(title.filter(|title| !title.is_empty()), uri))
}
