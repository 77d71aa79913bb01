//! Line-oriented terminal client for the residence portal.
//!
//! Identity and addresses come from `PORTAL_*` environment variables (a
//! `.env` file is honoured), optionally layered over a TOML file given with
//! `--config`. Each input line is a message for the selected resident
//! unless it starts with one of the commands printed by `/help`.

use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use residence_portal::client::config::Session;
use residence_portal::client::store::{ActiveView, ConversationContent, StoreChange};
use residence_portal::client::{ClientCommand, PortalClient};
use residence_portal::shared::messaging::{Alert, AlertUpdate, DeliveryState, PeerId, Priority, RemoteId};
use residence_portal::shared::AppConfig;

const HELP: &str = "\
/users                     reload the resident directory
/select <id>               open the conversation with a resident
/alert <priority> <text>   broadcast an alert (info, important, urgent)
/alerts                    reload the alert feed
/archive <alert id>        archive an alert
/delete <alert id>         delete an alert
/retry                     re-send the oldest failed item
/invite <username> <email> invite a new resident
/enable <id>               re-enable a resident account
/disable <id>              disable a resident account
/quit                      disconnect and exit
anything else              send it to the selected resident";

#[derive(Debug, Parser)]
#[command(name = "portal-client", about = "Terminal client for the residence portal")]
struct Cli {
    /// TOML configuration file; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display name attached to alerts you send
    #[arg(short, long)]
    name: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(ClientCommand),
    RetryOldest,
    Help,
    Quit,
    Invalid(String),
}

fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Input::Command(ClientCommand::SendMessage(line.to_string())));
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let input = match command {
        "/users" => Input::Command(ClientCommand::RefreshDirectory),
        "/alerts" => Input::Command(ClientCommand::RefreshAlerts),
        "/select" if !rest.is_empty() => Input::Command(ClientCommand::SelectPeer(PeerId::from(rest))),
        "/alert" => {
            let (priority, content) = rest.split_once(' ').unwrap_or((rest, ""));
            match priority.parse::<Priority>() {
                Ok(priority) => Input::Command(ClientCommand::SendAlert {
                    content: content.to_string(),
                    priority,
                }),
                Err(e) => Input::Invalid(e.to_string()),
            }
        }
        "/archive" if !rest.is_empty() => Input::Command(ClientCommand::UpdateAlert {
            alert_id: RemoteId::from(rest),
            update: AlertUpdate::archive(),
        }),
        "/delete" if !rest.is_empty() => Input::Command(ClientCommand::DeleteAlert(RemoteId::from(rest))),
        "/invite" => match rest.split_once(' ') {
            Some((username, email)) => Input::Command(ClientCommand::InviteUser {
                username: username.to_string(),
                email: email.to_string(),
            }),
            None => Input::Invalid("usage: /invite <username> <email>".to_string()),
        },
        "/enable" | "/disable" if !rest.is_empty() => Input::Command(ClientCommand::SetResidentActive {
            peer_id: PeerId::from(rest),
            active: command == "/enable",
        }),
        "/retry" => Input::RetryOldest,
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command {}; try /help", other)),
    };
    Some(input)
}

fn render(client: &PortalClient, change: StoreChange) {
    let store = client.store();
    match change {
        StoreChange::Notification(notification) => {
            println!("[{:?}] {}", notification.kind, notification.message);
        }
        StoreChange::DirectoryChanged => {
            for peer in store.view().peers() {
                println!("  {:>4}  {:<24} {:<8} unread: {}", peer.id, peer.name, peer.presence, peer.unread_count);
            }
        }
        StoreChange::MessagesChanged(key) | StoreChange::ActiveConversationChanged(key) if store.is_active(&key) => {
            if let Some(active) = store.view().active() {
                for line in conversation_lines(&active) {
                    println!("{}", line);
                }
            }
        }
        StoreChange::AlertsChanged => {
            for line in alert_lines(store.alerts()) {
                println!("{}", line);
            }
        }
        _ => {}
    }
}

/// The active conversation as it should appear on screen
fn conversation_lines(active: &ActiveView<'_>) -> Vec<String> {
    let title = active.peer.map_or_else(|| active.key.to_string(), |p| p.name.clone());
    let mut lines = vec![format!("--- {} ---", title)];
    match active.content {
        ConversationContent::Empty if active.loading => lines.push("  (loading...)".to_string()),
        ConversationContent::Empty => lines.push("  (no messages yet)".to_string()),
        ConversationContent::Messages(messages) => {
            lines.extend(messages.iter().map(|message| {
                let marker = match message.delivery {
                    DeliveryState::Sent => "",
                    DeliveryState::Pending => " (sending)",
                    DeliveryState::Failed => " (failed, /retry)",
                };
                format!(
                    "  {} {}: {}{}",
                    message.created_at.format("%H:%M"),
                    message.sender_label(),
                    message.content,
                    marker
                )
            }));
        }
    }
    lines
}

fn alert_lines(alerts: &[Alert]) -> Vec<String> {
    if alerts.is_empty() {
        return vec!["--- alerts --- (none)".to_string()];
    }
    let mut lines = vec!["--- alerts ---".to_string()];
    lines.extend(alerts.iter().map(|alert| {
        let id = alert.id.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
        format!(
            "  {:>4} [{}] {} ({:?}, {:?})",
            id, alert.priority, alert.content, alert.status, alert.delivery
        )
    }));
    lines
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = match &cli.config {
        Some(path) => AppConfig::from_toml_file(path)?,
        None => AppConfig::default(),
    };
    let mut session = Session::from_env(base)?;
    if let Some(name) = cli.name {
        session = session.with_display_name(name);
    }

    let mut client = PortalClient::from_session(session)?;
    let mut changes = client.subscribe();
    client.start();
    println!("Connected as {}. Type /help for commands.", client.session().user_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let command = match parse_line(&line) {
                    None => continue,
                    Some(Input::Quit) => break,
                    Some(Input::Help) => {
                        println!("{}", HELP);
                        continue;
                    }
                    Some(Input::Invalid(reason)) => {
                        println!("{}", reason);
                        continue;
                    }
                    Some(Input::RetryOldest) => {
                        match client.queue().outbound().failed().first() {
                            Some(item) => ClientCommand::Retry(item.correlation_id),
                            None => {
                                println!("nothing to retry");
                                continue;
                            }
                        }
                    }
                    Some(Input::Command(command)) => command,
                };
                if let Err(e) = client.handle_command(command).await {
                    println!("{}", e);
                }
            }
            change = changes.recv() => match change {
                Ok(change) => render(&client, change),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "view fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = client.process_next() => {}
        }
    }

    client.shutdown().await;
    Ok(())
}
