//! chatdesk is a multi-tab chat client for hosted LLM providers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming session lifecycle, the per-tab chat
//!   controller, the multi-tab workspace, the model catalog, cost accounting
//!   and persisted settings.
//! - [`api`] defines the chat payloads exchanged with OpenAI-compatible
//!   endpoints.
//! - [`utils`] holds URL and auth-header helpers and the transcript log.
//! - [`cli`] parses arguments and runs the line-based chat, `say`, and
//!   settings commands.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
