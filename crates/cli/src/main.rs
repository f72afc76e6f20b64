use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use murmur_protocol::{Conversation, Message};

#[derive(Parser)]
#[command(name = "murmur", about = "Murmur — realtime direct-messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Read config from this directory instead of the default locations.
    #[arg(long, global = true, env = "MURMUR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Keep conversations in memory only.
        #[arg(long, default_value_t = false)]
        in_memory: bool,
    },
    /// List a user's conversations, most recent first.
    Conversations {
        #[arg(long)]
        user: String,
    },
    /// Print the message history between two users.
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        with: String,
        /// Print raw JSON instead of one line per message.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted).
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        murmur_config::set_config_dir(dir.clone());
    }
    let mut config = murmur_config::discover_and_load();

    match cli.command {
        Commands::Serve {
            bind,
            port,
            in_memory,
        } => {
            info!(version = env!("CARGO_PKG_VERSION"), "murmur starting");
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            murmur_gateway::start_gateway(config, in_memory).await
        },
        Commands::Conversations { user } => {
            let store = murmur_gateway::open_store(&config, false).await?;
            for conversation in store.list_conversations(&user).await? {
                println!("{}", conversation_line(&conversation, &user));
            }
            Ok(())
        },
        Commands::History { user, with, json } => {
            let store = murmur_gateway::open_store(&config, false).await?;
            let messages = match store.find_conversation_between(&user, &with).await? {
                Some(conversation) => store.list_messages(&conversation.id).await?,
                None => Vec::new(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                for message in &messages {
                    println!("{}", message_line(message));
                }
            }
            Ok(())
        },
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            if config.auth.jwt_secret.is_some() {
                config.auth.jwt_secret = Some("********".into());
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn preview(text: &str, image: Option<&str>) -> String {
    match (text.is_empty(), image) {
        (true, Some(_)) => "[image]".to_string(),
        (false, Some(_)) => format!("[image] {text}"),
        _ => text.to_string(),
    }
}

fn conversation_line(conversation: &Conversation, user: &str) -> String {
    let other = conversation.other_participant(user).unwrap_or("?");
    let last = &conversation.last_message;
    let from = if last.sender_id == user {
        "you: "
    } else {
        ""
    };
    let seen = if last.seen {
        "seen"
    } else {
        "unseen"
    };
    format!(
        "{}  {other:<20}  {from}{}  ({seen})",
        conversation.id, last.text
    )
}

fn message_line(message: &Message) -> String {
    let seen = if message.seen {
        " ✓✓"
    } else {
        ""
    };
    format!(
        "[{}] {}: {}{seen}",
        message.created_at,
        message.sender_id,
        preview(&message.text, message.image_path.as_deref())
    )
}
