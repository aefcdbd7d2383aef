//! mixer-chat CLI - watch a channel's chat from the terminal.
//!
//! This is the binary entry point. See the `mixer_chat` library for the
//! protocol client.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mixer_chat::chat::{AuthenticationReply, ChatMessageReply, WsConnector};
use mixer_chat::constants::USER_AGENT;
use mixer_chat::{
    ChatEvent, ChatInfo, ChatMethod, ChatSession, Config, EventKind, ReplyHandler, RestClient,
};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "mixer-chat")]
#[command(version)]
#[command(about = "Real-time chat protocol client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a channel's chat and print its events until Ctrl-C.
    Watch {
        /// Channel id.
        #[arg(long)]
        channel: u64,
        /// Connect to this endpoint instead of looking one up.
        #[arg(long)]
        endpoint: Option<String>,
        /// User id to authenticate as (requires an auth key).
        #[arg(long, requires = "authkey")]
        user: Option<u64>,
        /// Auth key from a previous chat lookup.
        #[arg(long)]
        authkey: Option<String>,
        /// Post this message once authenticated.
        #[arg(long)]
        say: Option<String>,
    },
    /// Look up a channel's chat endpoints.
    Lookup {
        /// Channel id.
        #[arg(long)]
        channel: u64,
    },
    /// Print the effective configuration.
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match cli.command {
        Commands::Watch {
            channel,
            endpoint,
            user,
            authkey,
            say,
        } => runtime.block_on(watch(&config, channel, endpoint, user, authkey, say)),
        Commands::Lookup { channel } => runtime.block_on(async {
            let rest = RestClient::new(&config.base_path, config.token.clone())?;
            let info = rest.chat(channel).await?;
            for endpoint in &info.endpoints {
                println!("{endpoint}");
            }
            Ok::<(), anyhow::Error>(())
        }),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
            Ok(())
        }
    }
}

fn redacted(config: &Config) -> Config {
    Config {
        token: config.token.as_ref().map(|_| "<redacted>".to_string()),
        ..config.clone()
    }
}

async fn watch(
    config: &Config,
    channel: u64,
    endpoint: Option<String>,
    user: Option<u64>,
    authkey: Option<String>,
    say: Option<String>,
) -> Result<()> {
    let rest = Arc::new(RestClient::new(&config.base_path, config.token.clone())?);

    let mut chat = match endpoint {
        Some(endpoint) => ChatInfo::with_endpoint(channel, endpoint),
        None => rest
            .chat(channel)
            .await
            .with_context(|| format!("Chat lookup for channel {channel} failed"))?,
    };
    if authkey.is_some() {
        chat.authkey = authkey;
    }

    let credentials = user.zip(chat.authkey.clone());
    let say = Arc::new(Mutex::new(say));

    let connector = WsConnector::new().header("User-Agent", USER_AGENT);
    let printer: mixer_chat::chat::EventHandler = Arc::new(print_event);
    let mut builder = ChatSession::builder(Arc::new(connector), chat)
        .policy(config.reconnect_policy())
        .http(rest);
    for kind in EventKind::ALL {
        builder = builder.on(kind, Arc::clone(&printer));
    }
    // Every socket starts unauthenticated, so auth runs on each connect.
    let session = builder
        .on_connect(move |session| authenticate(session, channel, credentials.as_ref(), &say))
        .build();

    session.connect().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Shutting down...");
    session.disconnect().await;
    Ok(())
}

fn authenticate(
    session: &Arc<ChatSession>,
    channel: u64,
    credentials: Option<&(u64, String)>,
    say: &Arc<Mutex<Option<String>>>,
) {
    let on_authenticated = {
        let session = Arc::downgrade(session);
        let say = Arc::clone(say);
        move |reply: AuthenticationReply| {
            if reply.is_error() {
                log::error!("Authentication failed: {:?}", reply.error);
                return;
            }
            let authenticated = reply.data.is_some_and(|data| data.authenticated);
            log::info!("Joined channel {} (authenticated: {})", channel, authenticated);

            // Posted once, not again after a reconnect.
            let text = say.lock().unwrap_or_else(PoisonError::into_inner).take();
            let (Some(text), Some(session)) = (text, session.upgrade()) else {
                return;
            };
            let sent = session.call_with_reply(
                |id| ChatMethod::msg(id, &text),
                ReplyHandler::<ChatMessageReply>::on_success(|reply| {
                    if reply.is_error() {
                        log::warn!("Message rejected: {:?}", reply.error);
                    }
                }),
            );
            if let Err(e) = sent {
                log::warn!("Failed to send message: {}", e);
            }
        }
    };
    let handler = ReplyHandler::new(on_authenticated, |e| log::error!("Authentication failed: {}", e));

    let sent = match credentials {
        Some((user, key)) => {
            session.call_with_reply(|id| ChatMethod::auth(id, channel, *user, key), handler)
        }
        None => session.call_with_reply(|id| ChatMethod::anonymous_auth(id, channel), handler),
    };
    if let Err(e) = sent {
        log::error!("Failed to send auth: {}", e);
    }
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Welcome(data) => {
            println!("* connected to {}", data.server.as_deref().unwrap_or("chat"));
        }
        ChatEvent::ChatMessage(message) => {
            println!("<{}> {}", message.user_name, message.text());
        }
        ChatEvent::WidgetMessage(message) => println!("[widget] {}", message.text()),
        ChatEvent::UserJoin(user) => {
            println!("* {} joined", user.username.as_deref().unwrap_or("someone"));
        }
        ChatEvent::UserLeave(user) => {
            println!("* {} left", user.username.as_deref().unwrap_or("someone"));
        }
        ChatEvent::UserTimeout(timeout) => {
            println!("* {} timed out for {}s", timeout.user.user_name, timeout.duration);
        }
        ChatEvent::PollStart(poll) => println!("* poll: {} {:?}", poll.q, poll.answers),
        ChatEvent::PollEnd(poll) => println!("* poll ended: {} {:?}", poll.q, poll.responses),
        ChatEvent::ClearMessages(_) => println!("* chat cleared"),
        other => log::debug!("{:?}", other),
    }
}
