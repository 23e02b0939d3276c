use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;

use crate::config::Config;
use crate::error::ChatError;

#[derive(Parser, Debug)]
#[command(name = "chat-artifacts")]
#[command(version)]
#[command(about = "Stream an LLM reply and lift HTML / markdown artifacts into a live preview")]
pub struct Args {
    /// Prompt to send as soon as the session starts
    pub prompt: Option<String>,

    /// Proxy endpoint that relays the model's event stream
    #[arg(long)]
    pub endpoint: Option<String>,

    /// System prompt sent with every request
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Directory for preview.html / preview.md
    #[arg(long)]
    pub preview_dir: Option<PathBuf>,

    /// Do not write preview files
    #[arg(long)]
    pub no_preview: bool,

    /// TCP connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Keep reading prompts from stdin after the initial prompt
    #[arg(long, short)]
    pub interactive: bool,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

impl Args {
    /// The stdin loop runs when asked for, or when there is no prompt to send.
    pub fn wants_repl(&self) -> bool {
        self.interactive || self.prompt.is_none()
    }
}

/// Defaults, then the `--config` file, then environment, then flags.
pub fn resolve_config(args: &Args) -> Result<Config, ChatError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env();
    apply_args(&mut config, args);
    Ok(config)
}

pub fn apply_args(config: &mut Config, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(prompt) = &args.system_prompt {
        config.system_prompt = prompt.clone();
    }
    if let Some(dir) = &args.preview_dir {
        config.preview_dir = dir.clone();
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout_secs = secs;
    }
}

// ---------------------------------------------------------------------------
// Interactive commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    /// Start a new conversation.
    Reset,
    /// Hide the preview pane until the next matching delta.
    Close,
    /// Show or hide the preview pane.
    Toggle,
    /// Print the current artifact.
    Show,
    Help,
    Unknown(String),
    Send(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    match trimmed {
        "/quit" | "/exit" => Command::Quit,
        "/reset" => Command::Reset,
        "/close" => Command::Close,
        "/toggle" => Command::Toggle,
        "/preview" => Command::Show,
        "/help" => Command::Help,
        other if other.starts_with('/') => Command::Unknown(other.to_string()),
        _ => Command::Send(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

pub const HELP: &str = "commands: /preview  /toggle  /close  /reset  /quit";
