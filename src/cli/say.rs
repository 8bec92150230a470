//! One-shot "say" command

use std::error::Error;
use std::io::{self, Write};

use crate::cli::{build_services, resolve_model};
use crate::core::config::Settings;
use crate::core::controller::{ChatSessionController, ControllerUpdate, LENGTH_WARNING};
use crate::core::session::FinishReason;

pub async fn run_say(
    prompt: Vec<String>,
    model: Option<String>,
    log: Option<String>,
    env_only: bool,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: chatdesk say <prompt>");
        std::process::exit(1);
    }

    let settings = Settings::load()?;
    let model = resolve_model(model, &settings);
    let services = build_services(settings, log.as_deref(), env_only)?;
    let mut controller = ChatSessionController::new(services, model);

    if let Err(err) = controller.send(&prompt).await {
        eprintln!("❌ {err}");
        eprintln!("Pass a model with -m, or run 'chatdesk set default-model <model>'.");
        std::process::exit(1);
    }

    let mut stdout = io::stdout();
    loop {
        match controller.next_update().await {
            ControllerUpdate::Chunk { delta, .. } => {
                print!("{delta}");
                stdout.flush()?;
            }
            ControllerUpdate::Completed { finish_reason } => {
                println!();
                if finish_reason == FinishReason::Length {
                    eprintln!("⚠️  {LENGTH_WARNING}");
                }
                break;
            }
            ControllerUpdate::Cancelled => {
                println!();
                break;
            }
            ControllerUpdate::Failed(err) => {
                eprintln!("\n❌ {}", err.user_message());
                controller.shutdown().await;
                std::process::exit(1);
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
