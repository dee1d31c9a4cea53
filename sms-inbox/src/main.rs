//! Command-line front end for the SMS inbox.

mod notifications;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use sms_inbox::{
    activity_subscription, watch_thread, ActivityEvent, Config, Conversation, Filters, Inbox,
    InboxClient, IntervalClock, SessionKey,
};
use sms_provider::{conversation_id, Message};

/// Browse SMS/WhatsApp conversations from the terminal
#[derive(Parser, Debug)]
#[command(name = "sms-inbox")]
#[command(about = "Conversation inbox for SMS/WhatsApp provider accounts", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List owned addresses
    Addresses,

    /// List conversations, newest first
    List {
        /// Owned address to list (defaults to the first one)
        #[arg(short, long)]
        address: Option<String>,

        /// Number of pages to load
        #[arg(short, long, default_value = "1")]
        pages: usize,

        /// Only conversations with unread messages
        #[arg(long)]
        unread: bool,

        /// Look up a single counterparty
        #[arg(long, value_name = "NUMBER")]
        search: Option<String>,
    },

    /// Show the messages of one conversation and mark it read
    Thread {
        /// Counterparty address
        counterparty: String,

        #[arg(short, long)]
        address: Option<String>,

        /// Keep printing new messages and keep the thread read
        #[arg(short, long)]
        follow: bool,
    },

    /// Send a message
    Send {
        /// Owned address to send from
        #[arg(short, long)]
        from: Option<String>,

        /// Recipient address
        #[arg(short, long)]
        to: String,

        body: String,
    },

    /// Print new activity as it arrives
    Watch {
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sms_inbox=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load(),
    };

    let client = InboxClient::connect(&config)
        .await
        .context("failed to connect to provider")?;

    match cli.command {
        Command::Addresses => {
            for address in client.addresses().await? {
                println!("{address}");
            }
        }
        Command::List {
            address,
            pages,
            unread,
            search,
        } => {
            let address = resolve_address(&client, address).await?;
            let key = SessionKey::new(address).with_filters(Filters {
                search,
                only_unread: unread,
            });

            let mut inbox = Inbox::new();
            let mut state = inbox.begin_session(key);
            for _ in 0..pages.max(1) {
                client.load_into(&mut inbox, &mut state).await?;
                if !inbox.has_more() {
                    break;
                }
            }

            for conversation in inbox.conversations() {
                println!("{}", format_conversation(conversation));
            }
            if inbox.has_more() {
                println!("(more conversations available)");
            }
        }
        Command::Thread {
            counterparty,
            address,
            follow,
        } => {
            let address = resolve_address(&client, address).await?;
            let mut watcher = client.watch_conversation(&address, &counterparty);
            for msg in watcher.refresh().await? {
                println!("{}", format_thread_message(&msg));
            }

            if follow {
                let clock = IntervalClock::new(Duration::from_millis(config.poll_interval_ms));
                let mut messages = Box::pin(watch_thread(watcher, clock));
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        msg = messages.next() => match msg {
                            Some(msg) => println!("{}", format_thread_message(&msg)),
                            None => break,
                        },
                    }
                }
            }
        }
        Command::Send { from, to, body } => {
            let from = resolve_address(&client, from).await?;
            let id = client.send_message(&from, &to, &body).await?;
            println!("sent {id}");
        }
        Command::Watch { address } => {
            let address = resolve_address(&client, address).await?;
            let mut poller = client.poller(&address);
            poller.prime().await?;

            let mut inbox = Inbox::new();
            inbox.begin_session(SessionKey::new(address.clone()));

            let clock = IntervalClock::new(Duration::from_millis(config.poll_interval_ms));
            let mut events = Box::pin(activity_subscription(poller, clock));
            tracing::info!("Watching {} for new activity", address);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.next() => match event {
                        Some(ActivityEvent::Resynced(latest)) => {
                            println!("(missed activity, newest is now {})", latest.id);
                            inbox.begin_session(SessionKey::new(address.clone()));
                        }
                        Some(event) => {
                            client.apply_activity(&mut inbox, &event).await;
                            if let ActivityEvent::Message(msg) = &event {
                                println!("{}", format_activity(&inbox, msg));
                                if msg.is_incoming() && config.notifications {
                                    notifications::notify_incoming(msg, config.notification_show_content).await;
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
        }
    }

    Ok(())
}

async fn resolve_address(client: &InboxClient, address: Option<String>) -> Result<String> {
    if let Some(address) = address {
        return Ok(address);
    }
    client
        .addresses()
        .await?
        .into_iter()
        .next()
        .context("account has no owned addresses")
}

fn format_thread_message(msg: &Message) -> String {
    let arrow = if msg.is_incoming() { "<" } else { ">" };
    format!("{} {} {}", msg.sent_at.format("%Y-%m-%d %H:%M"), arrow, msg.body)
}

fn format_activity(inbox: &Inbox, msg: &Message) -> String {
    let arrow = if msg.is_incoming() { "<" } else { ">" };
    let flagged = inbox
        .get(&conversation_id(msg.owned_address(), msg.counterparty()))
        .is_some_and(Conversation::is_flagged);
    format!(
        "{} {} {}{}: {}",
        msg.sent_at.format("%H:%M:%S"),
        arrow,
        msg.counterparty(),
        if flagged { " (flagged)" } else { "" },
        msg.body
    )
}

fn format_conversation(conversation: &Conversation) -> String {
    let marker = match (conversation.is_flagged(), conversation.has_unread) {
        (true, _) => "!",
        (false, true) => "*",
        (false, false) => " ",
    };
    format!(
        "{} {:<24} {}  {}",
        marker,
        conversation.counterparty,
        conversation.recent.sent_at.format("%Y-%m-%d %H:%M"),
        conversation.recent.body
    )
}
