pub mod catalog;
pub mod chat_stream;
pub mod config;
pub mod controller;
pub mod cost;
pub mod envelope;
pub mod history;
pub mod keyring;
pub mod message;
pub mod session;
pub mod stream_errors;
pub mod workspace;
