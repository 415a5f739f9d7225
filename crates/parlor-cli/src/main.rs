use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parlor_client::api::HttpMessageApi;
use parlor_client::reconciler::TranscriptView;
use parlor_client::session::Delivery;
use parlor_client::{ChatSession, ClientConfig, SessionEvent};
use parlor_types::{Channel, Message};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Join(Channel),
    Leave,
    Retry,
    State,
    Quit,
    Say(String),
}

fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let command = match parts.next().unwrap_or_default() {
        "join" => {
            let id = parts.next().context("usage: /join <channel id> [name]")?;
            let id = id.parse().with_context(|| format!("not a channel id: {id}"))?;
            let name = parts.collect::<Vec<_>>().join(" ");
            let name = if name.is_empty() { format!("#{id}") } else { name };
            Command::Join(Channel::new(id, name))
        }
        "leave" => Command::Leave,
        "retry" => Command::Retry,
        "state" => Command::State,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command /{other}"),
    };
    Ok(Some(command))
}

fn print_message(message: &Message) {
    let name = if message.user_name.is_empty() {
        format!("user {}", message.user_id)
    } else {
        message.user_name.clone()
    };
    println!("[{}] {}: {}", message.id, name, message.text);
}

fn print_view(view: TranscriptView<'_>) {
    match view {
        TranscriptView::NoChannel => println!("-- no channel selected, /join <id> to pick one"),
        TranscriptView::Loading { channel } => println!("-- loading {}", channel.name),
        TranscriptView::Failed { channel, reason } => {
            println!("-- could not load {}: {} (/retry)", channel.name, reason)
        }
        TranscriptView::Empty { channel } => println!("-- {} has no messages yet", channel.name),
        TranscriptView::Messages { channel, messages } => {
            println!("-- {}", channel.name);
            messages.iter().for_each(print_message);
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn run_command(session: &mut ChatSession<HttpMessageApi>, command: Command) -> bool {
    match command {
        Command::Join(channel) => session.select_channel(Some(channel)),
        Command::Leave => {
            session.select_channel(None);
            print_view(session.view());
        }
        Command::Retry => {
            if !session.retry_history() {
                println!("-- nothing to retry");
            }
        }
        Command::State => {
            println!("-- connection {}", session.connection_state());
            if let Some(latest) = session.latest_inbound() {
                println!("-- last live message on {}:", latest.scope);
                print_message(&latest.message);
            }
        }
        Command::Quit => return false,
        Command::Say(text) => {
            session.set_draft(text);
            match session.compose().await {
                Ok(report) => {
                    if let Delivery::Deferred(e) = report.delivery {
                        warn!("Message {} saved, live delivery pending: {}", report.message.id, e);
                    }
                }
                Err(e) if e.is_validation() => println!("-- {e}"),
                Err(e) => println!("-- send failed, draft kept: {e}"),
            }
        }
    }
    true
}

fn print_event(session: &ChatSession<HttpMessageApi>, event: SessionEvent) {
    match event {
        SessionEvent::HistoryLoaded { .. } | SessionEvent::HistoryFailed { .. } => print_view(session.view()),
        SessionEvent::MessageAppended(message) => print_message(&message),
        SessionEvent::CaughtUp { appended, .. } if appended > 0 => {
            println!("-- {appended} missed while disconnected");
            print_view(session.view());
        }
        SessionEvent::CaughtUp { .. } => {}
        SessionEvent::ConnectionChanged(state) => info!("Connection on {} is {}", state.scope, state.state),
        SessionEvent::Reconnecting(scope) => info!("Reconnecting on {}", scope),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; the transcript owns stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "parlor=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!("Parlor client for {} ({})", config.http_url, config.ws_url);

    let mut session = ChatSession::connect(&config)?;
    print_view(session.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !run_command(&mut session, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("-- {e}"),
                }
            }
            event = session.next_event() => match event {
                Some(event) => print_event(&session, event),
                None => break,
            },
        }
    }

    session.close();
    Ok(())
}
