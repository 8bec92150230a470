//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod auth;
pub mod chat;
pub mod models;
pub mod say;
pub mod settings;

use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::auth::{run_auth, run_deauth};
use crate::cli::chat::run_chat;
use crate::cli::models::list_models;
use crate::cli::say::run_say;
use crate::cli::settings::{run_get, run_set};
use crate::core::catalog::{builtin_cost_table, ModelCatalog};
use crate::core::chat_stream::HttpCompletionProvider;
use crate::core::config::Settings;
use crate::core::controller::ChatServices;
use crate::core::keyring::ApiKeys;
use crate::utils::logging::TranscriptLog;

#[derive(Parser)]
#[command(name = "chatdesk")]
#[command(about = "A multi-tab chat client for hosted LLM providers")]
#[command(
    long_about = "chatdesk streams conversations with OpenAI, Anthropic, Google, OpenRouter and \
any OpenAI-compatible endpoint. Several chats can be open at once; each is named after its \
first message.\n\n\
Authentication:\n\
  Use 'chatdesk auth <provider>' to store an API key in your system keyring.\n\
  Provider environment variables (e.g. OPENAI_API_KEY) are used as a fallback.\n\n\
Chat commands:\n\
  /new /tabs /switch N /rename N TITLE /delete N\n\
  /edit N TEXT /resend N /stop /clear /cost /model NAME\n\
  /export FILE /import FILE /quit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for chat, or list available models if no model specified
    #[arg(short = 'm', long, global = true, value_name = "MODEL", num_args = 0..=1, default_missing_value = "")]
    pub model: Option<String>,

    /// Append the conversation to the specified file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Read API keys from environment variables only, skipping the keyring
    #[arg(long, global = true)]
    pub env_only: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send a single prompt and stream the reply to stdout
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List built-in and custom models with their prices
    Models,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Show one configuration value, or all of them
    Get {
        key: Option<String>,
    },
    /// Store an API key for a provider in the system keyring
    Auth {
        provider: String,
    },
    /// Remove a stored API key
    Deauth {
        provider: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if args.model.as_deref() == Some("") {
        return list_models();
    }

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(args.model, args.log, args.env_only).await,
        Commands::Say { prompt } => run_say(prompt, args.model, args.log, args.env_only).await,
        Commands::Models => list_models(),
        Commands::Set { key, value } => run_set(&key, &value.join(" ")),
        Commands::Get { key } => run_get(key.as_deref()),
        Commands::Auth { provider } => run_auth(&provider),
        Commands::Deauth { provider } => run_deauth(&provider),
    }
}

/// The model named on the command line, else the configured default.
pub(crate) fn resolve_model(cli_model: Option<String>, settings: &Settings) -> String {
    cli_model
        .filter(|model| !model.trim().is_empty())
        .or_else(|| settings.default_model.clone())
        .unwrap_or_default()
}

/// Wire the HTTP provider, price table and optional transcript log.
pub(crate) fn build_services(
    settings: Settings,
    log: Option<&str>,
    env_only: bool,
) -> Result<ChatServices, Box<dyn Error>> {
    let catalog = ModelCatalog::new(settings.custom_model_list());
    let keys = if env_only {
        ApiKeys::env_only()
    } else {
        ApiKeys::new()
    };
    let provider = HttpCompletionProvider::new(catalog, keys, settings.api_base_url.clone());
    let costs = builtin_cost_table(&settings.pricing);

    let mut services = ChatServices::new(Arc::new(provider), Arc::new(costs), settings);
    if let Some(path) = log {
        let transcript = TranscriptLog::new(path)
            .map_err(|err| format!("Failed to open log file '{path}': {err}"))?;
        services = services.with_transcript_log(Arc::new(transcript));
    }
    Ok(services)
}
