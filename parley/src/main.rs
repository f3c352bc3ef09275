//! `parley`: line-oriented console client.
//!
//! Reads commands from stdin and prints conversation changes as they
//! happen. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/parley/config.toml`).
//!
//! ```bash
//! cargo run --bin parley -- --host 127.0.0.1 --port 8080 --user alice --token <jwt>
//!
//! # Or via environment variables
//! PARLEY_USER=alice PARLEY_TOKEN=<jwt> cargo run --bin parley
//! ```
//!
//! Commands: `/login <user> <token>`, `/logout`, `/select <peer>`,
//! `/read <message-id>`, `/broadcast <text>`, `/who`, `/quit`. Any other
//! line is sent to the selected peer.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use parley::api::http::HttpChatApi;
use parley::config::{CliArgs, ClientConfig};
use parley::connection::ws::WsDialer;
use parley::net::{self, ClientCommand, ClientHandle};
use parley::state::{ChatSnapshot, ClientNotice};
use parley_proto::message::{Message, MessageId};

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they never interleave with the console.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("parley starting");

    let api = match HttpChatApi::new(&config.api_base_url(), None, config.request_timeout) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("Error: {e}");
            return Err(io::Error::other(e));
        }
    };
    let dialer = WsDialer::new(config.connect_timeout);
    let mut handle = net::spawn_client(config.to_net_config(), Arc::clone(&api), dialer);

    if let Some(session) = config.session() {
        api.set_token(Some(session.token.clone()));
        handle
            .send(ClientCommand::Authenticate {
                user_id: session.user_id,
                token: session.token,
            })
            .await;
    } else {
        println!("Not signed in. Use /login <user> <token>.");
    }

    let result = run_console(&mut handle, &api).await;

    handle.send(ClientCommand::Shutdown).await;
    let _ = handle.task.await;

    tracing::info!("parley exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("parley.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// A parsed console line.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Command(ClientCommand),
    Login { user_id: String, token: String },
    Who,
    Usage(&'static str),
    Empty,
}

fn parse_line(line: &str, snapshot: &ChatSnapshot) -> Line {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "/quit" => Line::Command(ClientCommand::Shutdown),
        "/logout" => Line::Command(ClientCommand::Logout),
        "/who" => Line::Who,
        "/login" => match rest.split_once(' ') {
            Some((user, token)) if !token.trim().is_empty() => Line::Login {
                user_id: user.to_string(),
                token: token.trim().to_string(),
            },
            _ => Line::Usage("/login <user> <token>"),
        },
        "/select" if !rest.is_empty() => Line::Command(ClientCommand::SelectPeer {
            peer_id: rest.to_string(),
        }),
        "/select" => Line::Usage("/select <peer>"),
        "/read" if !rest.is_empty() => Line::Command(ClientCommand::MarkRead {
            message_id: MessageId::new(rest),
        }),
        "/read" => Line::Usage("/read <message-id>"),
        "/broadcast" if !rest.is_empty() => Line::Command(ClientCommand::SendMessage {
            recipient_id: snapshot.selected_peer.clone().unwrap_or_default(),
            content: rest.to_string(),
            media_url: None,
            is_broadcast: true,
        }),
        "/broadcast" => Line::Usage("/broadcast <text>"),
        _ if head.starts_with('/') => Line::Usage(
            "/login, /logout, /select, /read, /broadcast, /who, /quit",
        ),
        _ => match &snapshot.selected_peer {
            Some(peer) => Line::Command(ClientCommand::SendMessage {
                recipient_id: peer.clone(),
                content: line.to_string(),
                media_url: None,
                is_broadcast: false,
            }),
            None => Line::Usage("/select <peer> before sending"),
        },
    }
}

/// Reads stdin and renders snapshots until `/quit`, EOF, or the client stops.
async fn run_console(handle: &mut ClientHandle, api: &HttpChatApi) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = ConsoleView::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let snapshot = handle.snapshot();
                match parse_line(&line, &snapshot) {
                    Line::Command(ClientCommand::Shutdown) => return Ok(()),
                    Line::Command(command) => {
                        if !handle.send(command).await {
                            return Ok(());
                        }
                    }
                    Line::Login { user_id, token } => {
                        api.set_token(Some(token.clone()));
                        handle.send(ClientCommand::Authenticate { user_id, token }).await;
                    }
                    Line::Who => print_roster(&snapshot),
                    Line::Usage(usage) => println!("usage: {usage}"),
                    Line::Empty => {}
                }
            }
            changed = handle.snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = handle.snapshots.borrow_and_update().clone();
                view.render(&snapshot);
            }
            Some(notice) = handle.notices.recv() => match notice {
                ClientNotice::AuthenticationInvalid => {
                    api.set_token(None);
                    handle.send(ClientCommand::Logout).await;
                    println!("! session expired; use /login <user> <token>");
                }
                ClientNotice::SendFailed { optimistic_id, error } => {
                    println!("! message {optimistic_id} not saved: {error}");
                }
                ClientNotice::ServiceError(error) => println!("! service error: {error}"),
            },
        }
    }
}

fn print_roster(snapshot: &ChatSnapshot) {
    if snapshot.roster.is_empty() {
        println!("(no users)");
    }
    for user in &snapshot.roster {
        let marker = if snapshot.is_online(&user.id) { "●" } else { "○" };
        println!("{marker} {} ({})", user.username, user.id);
    }
}

/// Prints only what changed between snapshots.
#[derive(Default)]
struct ConsoleView {
    last: ChatSnapshot,
    shown: HashSet<MessageId>,
}

impl ConsoleView {
    fn render(&mut self, snapshot: &ChatSnapshot) {
        if snapshot.connection != self.last.connection {
            println!("* {}", snapshot.connection);
        }
        if snapshot.selected_peer != self.last.selected_peer {
            self.shown.clear();
            if let Some(peer) = &snapshot.selected_peer {
                println!("* conversation with {peer}");
            }
        }
        if snapshot.is_loading_messages && !self.last.is_loading_messages {
            println!("* loading history...");
        }
        if !snapshot.is_loading_messages && self.last.is_loading_messages {
            // History replaced the sequence; print it afresh.
            self.shown.clear();
        }
        for message in &snapshot.messages {
            if self.shown.insert(message.id.clone()) {
                println!("{}", format_message(message));
            }
        }
        self.last = snapshot.clone();
    }
}

fn format_message(message: &Message) -> String {
    let time = chrono::DateTime::parse_from_rfc3339(&message.created_at).map_or_else(
        |_| "--:--".to_string(),
        |t| t.with_timezone(&chrono::Local).format("%H:%M").to_string(),
    );
    let status = match (message.delivered, message.read) {
        (_, true) => " ✓✓",
        (true, false) => " ✓",
        _ if message.id.is_optimistic() => " …",
        _ => "",
    };
    let scope = if message.is_broadcast { " [all]" } else { "" };
    format!(
        "[{time}]{scope} {}: {}{status}  ({})",
        message.sender_id, message.content, message.id
    )
}
