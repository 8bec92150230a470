//! Line-based interactive chat
//!
//! Reads commands and messages from stdin while streaming replies from every
//! open tab. Only the active tab's reply text is printed as it arrives; other
//! tabs report when they finish.

use std::error::Error;
use std::io::{self, Write};
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{build_services, resolve_model};
use crate::core::config::Settings;
use crate::core::controller::{ControllerUpdate, LENGTH_WARNING};
use crate::core::message::{Role, TranscriptEntry};
use crate::core::session::FinishReason;
use crate::core::workspace::{WorkspaceController, WorkspaceUpdate, DEFAULT_TAB_TITLE};

const HELP: &str = "\
Commands (tab and message numbers start at 1):
  /new                 open a new chat tab
  /tabs                list tabs
  /switch N            make tab N active
  /rename N TITLE      rename tab N
  /delete N            close tab N
  /history             show the active tab's messages
  /edit N TEXT         replace message N and everything after it, then resend
  /resend N            resend message N
  /stop                stop the reply being streamed
  /clear               clear the active tab
  /cost                show the active tab's estimated cost
  /model [NAME]        show or change the model
  /export FILE         save the active tab as JSON
  /import FILE         open a saved conversation in a new tab
  /quit                exit
Anything else is sent as a message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Send(String),
    New,
    Tabs,
    Switch(usize),
    Rename(usize, String),
    Delete(usize),
    History,
    Edit(usize, String),
    Resend(usize),
    Stop,
    Clear,
    Cost,
    Model(Option<String>),
    Export(String),
    Import(String),
    Help,
    Quit,
}

/// Parse a 1-based position into an index.
fn position(arg: &str, usage: &str) -> Result<usize, String> {
    arg.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .map(|n| n - 1)
        .ok_or_else(|| format!("Usage: {usage}"))
}

fn position_and_text(args: &str, usage: &str) -> Result<(usize, String), String> {
    let (n, text) = args
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("Usage: {usage}"))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(format!("Usage: {usage}"));
    }
    Ok((position(n, usage)?, text.to_string()))
}

fn required(args: &str, usage: &str) -> Result<String, String> {
    if args.is_empty() {
        Err(format!("Usage: {usage}"))
    } else {
        Ok(args.to_string())
    }
}

pub(crate) fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(ReplCommand::Send(trimmed.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map(|(name, args)| (name, args.trim()))
        .unwrap_or((rest, ""));

    match name {
        "new" => Ok(ReplCommand::New),
        "tabs" => Ok(ReplCommand::Tabs),
        "switch" => position(args, "/switch N").map(ReplCommand::Switch),
        "rename" => position_and_text(args, "/rename N TITLE")
            .map(|(index, title)| ReplCommand::Rename(index, title)),
        "delete" => position(args, "/delete N").map(ReplCommand::Delete),
        "history" => Ok(ReplCommand::History),
        "edit" => position_and_text(args, "/edit N TEXT")
            .map(|(index, text)| ReplCommand::Edit(index, text)),
        "resend" => position(args, "/resend N").map(ReplCommand::Resend),
        "stop" => Ok(ReplCommand::Stop),
        "clear" => Ok(ReplCommand::Clear),
        "cost" => Ok(ReplCommand::Cost),
        "model" => Ok(ReplCommand::Model(
            (!args.is_empty()).then(|| args.to_string()),
        )),
        "export" => required(args, "/export FILE").map(ReplCommand::Export),
        "import" => required(args, "/import FILE").map(ReplCommand::Import),
        "help" => Ok(ReplCommand::Help),
        "quit" | "exit" => Ok(ReplCommand::Quit),
        _ => Err(format!("Unknown command '/{name}'. Type /help for the list.")),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "##",
    }
}

fn print_tabs(workspace: &WorkspaceController) {
    for (index, tab) in workspace.tabs().iter().enumerate() {
        let marker = if index == workspace.active_index() { "*" } else { " " };
        let streaming = if tab.controller().is_streaming() {
            " (receiving)"
        } else {
            ""
        };
        println!("{marker} {}. {}{streaming}", index + 1, tab.title());
    }
}

fn print_history(workspace: &WorkspaceController) {
    let controller = workspace.active_tab().controller();
    if controller.history().is_empty() {
        println!("(no messages)");
        return;
    }
    for (index, message) in controller.history().iter().enumerate() {
        let stamp = message
            .timestamp
            .as_deref()
            .map(|ts| format!(" [{ts}]"))
            .unwrap_or_default();
        println!("{}. {}{stamp}: {}", index + 1, role_label(message.role), message.content);
    }
}

async fn execute(
    workspace: &mut WorkspaceController,
    command: ReplCommand,
) -> Result<(), Box<dyn Error>> {
    match command {
        ReplCommand::Send(text) => {
            workspace.send(workspace.active_index(), &text).await?;
        }
        ReplCommand::New => {
            let index = workspace.create_session(DEFAULT_TAB_TITLE);
            println!("🆕 Opened tab {}", index + 1);
        }
        ReplCommand::Tabs => print_tabs(workspace),
        ReplCommand::Switch(index) => {
            workspace.switch_session(index)?;
            let tab = workspace.active_tab();
            println!("➡️  Tab {}: {}", index + 1, tab.title());
            if let Some(prompt) = tab.controller().unsent_prompt() {
                println!("   Unsent message: {prompt}");
            }
        }
        ReplCommand::Rename(index, title) => workspace.rename_session(index, &title)?,
        ReplCommand::Delete(index) => {
            workspace.delete_session(index).await?;
            println!("🗑️  Closed tab {}", index + 1);
        }
        ReplCommand::History => print_history(workspace),
        ReplCommand::Edit(index, text) => {
            let model = workspace.model().to_string();
            let controller = workspace.active_tab_mut().controller_mut();
            if !model.is_empty() {
                controller.set_model(model);
            }
            controller.edit_message(index, &text).await?;
        }
        ReplCommand::Resend(index) => {
            let model = workspace.model().to_string();
            let controller = workspace.active_tab_mut().controller_mut();
            if !model.is_empty() {
                controller.set_model(model);
            }
            controller.resend_message(index).await?;
        }
        ReplCommand::Stop => {
            workspace
                .active_tab_mut()
                .controller_mut()
                .stop_streaming()
                .await;
        }
        ReplCommand::Clear => {
            let controller = workspace.active_tab_mut().controller_mut();
            controller.clear();
            println!("🧹 {}", controller.status());
        }
        ReplCommand::Cost => {
            let costs = workspace.active_tab().controller().costs();
            println!(
                "💰 Estimated cost: ${:.6} (last message: ${:.6})",
                costs.total(),
                costs.last_message_cost()
            );
        }
        ReplCommand::Model(None) => {
            let model = workspace.model();
            if model.is_empty() {
                println!("No model selected. Use /model NAME.");
            } else {
                println!("Model: {model}");
            }
        }
        ReplCommand::Model(Some(model)) => {
            workspace.set_model(model.as_str());
            println!("✅ Model set to {model}");
        }
        ReplCommand::Export(path) => {
            let entries = workspace.active_tab().controller().export_transcript();
            let json = serde_json::to_string_pretty(&entries)?;
            std::fs::write(&path, json)?;
            println!("💾 Saved {} messages to {path}", entries.len());
        }
        ReplCommand::Import(path) => {
            let content = std::fs::read_to_string(&path)?;
            let entries: Vec<TranscriptEntry> = serde_json::from_str(&content)?;
            let fallback = Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            let index = workspace.import_session(entries, &fallback)?;
            let tab = workspace.active_tab();
            println!("📂 Tab {}: {}", index + 1, tab.title());
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Quit => {}
    }
    Ok(())
}

fn render_update(workspace: &WorkspaceController, update: WorkspaceUpdate) -> io::Result<()> {
    let active_id = workspace.active_tab().id();
    match update {
        WorkspaceUpdate::Session { tab_id, update } if tab_id == active_id => match update {
            ControllerUpdate::Chunk { delta, .. } => {
                print!("{delta}");
                io::stdout().flush()?;
            }
            ControllerUpdate::Completed { finish_reason } => {
                println!();
                if finish_reason == FinishReason::Length {
                    println!("## {LENGTH_WARNING}");
                }
            }
            ControllerUpdate::Cancelled => println!("\n⏹️  Stopped"),
            ControllerUpdate::Failed(err) => {
                println!();
                eprintln!("❌ {}", err.user_message());
                if let Some(prompt) = workspace.active_tab().controller().unsent_prompt() {
                    eprintln!("   Not sent: {prompt}");
                }
            }
        },
        WorkspaceUpdate::Session { tab_id, update } => {
            if update.is_terminal() {
                if let Some(index) = workspace.index_of(tab_id) {
                    let status = workspace.tabs()[index].controller().status().to_string();
                    println!("📨 Tab {} ({}): {status}", index + 1, workspace.tabs()[index].title());
                }
            }
        }
        WorkspaceUpdate::TitleAssigned { tab_id, title } => {
            if let Some(index) = workspace.index_of(tab_id) {
                println!("🏷️  Tab {} is now \"{title}\"", index + 1);
            }
        }
    }
    Ok(())
}

pub async fn run_chat(
    model: Option<String>,
    log: Option<String>,
    env_only: bool,
) -> Result<(), Box<dyn Error>> {
    let settings = Settings::load()?;
    let model = resolve_model(model, &settings);
    let services = build_services(settings, log.as_deref(), env_only)?;
    let mut workspace = WorkspaceController::new(services, model);

    println!("🚀 chatdesk");
    if workspace.model().is_empty() {
        println!("No model selected. Use /model NAME or 'chatdesk set default-model NAME'.");
    } else {
        println!("📡 Using model: {}", workspace.model());
    }
    println!("💡 Type /help for commands, /quit to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ReplCommand::Quit) => break,
                    Ok(command) => {
                        if let Err(err) = execute(&mut workspace, command).await {
                            eprintln!("❌ {err}");
                        }
                    }
                    Err(usage) => eprintln!("⚠️  {usage}"),
                }
            }
            update = workspace.next_update() => render_update(&workspace, update)?,
        }
    }

    workspace.shutdown_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(
            parse_command("  hello there "),
            Ok(ReplCommand::Send("hello there".into()))
        );
    }

    #[test]
    fn positions_are_one_based() {
        assert_eq!(parse_command("/switch 2"), Ok(ReplCommand::Switch(1)));
        assert_eq!(
            parse_command("/edit 3 try again please"),
            Ok(ReplCommand::Edit(2, "try again please".into()))
        );
        assert_eq!(
            parse_command("/rename 1  Trip plans "),
            Ok(ReplCommand::Rename(0, "Trip plans".into()))
        );
        assert_eq!(parse_command("/resend 1"), Ok(ReplCommand::Resend(0)));
        assert!(parse_command("/switch 0").is_err());
        assert!(parse_command("/delete x").is_err());
        assert!(parse_command("/edit 2").is_err());
    }

    #[test]
    fn argument_commands() {
        assert_eq!(parse_command("/model"), Ok(ReplCommand::Model(None)));
        assert_eq!(
            parse_command("/model gpt-4o"),
            Ok(ReplCommand::Model(Some("gpt-4o".into())))
        );
        assert_eq!(
            parse_command("/export chat.json"),
            Ok(ReplCommand::Export("chat.json".into()))
        );
        assert!(parse_command("/import").is_err());
        assert_eq!(parse_command("/exit"), Ok(ReplCommand::Quit));
        assert!(parse_command("/frobnicate").unwrap_err().contains("/frobnicate"));
    }
}
