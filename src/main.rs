//! PongU command line client

use clap::{Parser, Subcommand};
use pongu::client::MessageClient;
use pongu::config::PonguConfig;
use pongu::observability::{init_default_logging, level_for_verbosity};
use pongu::protocol::{CodecError, BROADCAST_TOPIC, RESPONSE_TOPIC};
use pongu::PonguResult;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use tokio::{
    signal,
    time::{interval, Duration},
};
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "pongu.toml";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Presence and chat client for a PongU MQTT broker
#[derive(Parser)]
#[command(name = "pongu")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./pongu.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    nick: Option<String>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    username: Option<String>,

    #[arg(long, env = "PONGU_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log connection and collection details
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and announce presence on user_logs
    Announce,
    /// Publish a retained message and wait for the broker to confirm it
    Publish {
        message: String,
        #[arg(short, long, default_value = RESPONSE_TOPIC)]
        topic: String,
        /// Parse MESSAGE as JSON instead of sending it as a string
        #[arg(long)]
        json: bool,
    },
    /// Collect messages once and print them as JSON
    Collect {
        #[arg(short, long, default_value = BROADCAST_TOPIC)]
        topic: String,
    },
    /// Collect repeatedly, printing entries as they change, until Ctrl-C
    Listen {
        #[arg(short, long, default_value = BROADCAST_TOPIC)]
        topic: String,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    init_default_logging(level_for_verbosity(config.session.verbose));

    if let Err(e) = run(config, cli.command).await {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> Result<PonguConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => PonguConfig::load_from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            PonguConfig::load_from_file(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => PonguConfig::default(),
    };

    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

/// Command line values win over the file and its environment variables
fn apply_overrides(config: &mut PonguConfig, cli: &Cli) {
    if let Some(nick) = &cli.nick {
        config.session.nick = nick.clone();
    }
    if cli.verbose {
        config.session.verbose = true;
    }
    if let Some(host) = &cli.host {
        config.broker.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.broker.port = port;
    }
    if let Some(username) = &cli.username {
        config.broker.username = Some(username.clone());
        config.broker.username_env = None;
    }
    if let Some(password) = &cli.password {
        config.broker.password = Some(password.clone());
        config.broker.password_env = None;
    }
}

async fn run(config: PonguConfig, command: Commands) -> PonguResult<()> {
    let client = MessageClient::from_config(&config).await?;
    info!("Starting as {}", client.client_id());

    client
        .scoped(|client| async move {
            client.wait_until_connected(CONNECT_TIMEOUT).await?;

            match command {
                Commands::Announce => client.announce_presence().await,
                Commands::Publish {
                    message,
                    topic,
                    json,
                } => {
                    let message = parse_message(message, json)?;
                    client.publish_messages_to(&topic, message).await
                }
                Commands::Collect { topic } => {
                    let messages = client.collect_messages_from(&topic).await?;
                    print_messages(&messages);
                    Ok(())
                }
                Commands::Listen {
                    topic,
                    interval_secs,
                } => listen(&client, &topic, Duration::from_secs(interval_secs.max(1))).await,
            }
        })
        .await
}

async fn listen(client: &MessageClient, topic: &str, period: Duration) -> PonguResult<()> {
    let mut seen: HashMap<String, Value> = HashMap::new();
    let mut ticker = interval(period);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                let messages = client.collect_messages_from(topic).await?;
                let changed: HashMap<String, Value> = messages
                    .into_iter()
                    .filter(|(key, value)| seen.get(key) != Some(value))
                    .collect();
                if !changed.is_empty() {
                    print_messages(&changed);
                    seen.extend(changed);
                }
            }
        }
    }
}

/// With `--json` the message must be valid JSON; otherwise it is sent as a string
fn parse_message(message: String, json: bool) -> PonguResult<Value> {
    if !json {
        return Ok(Value::String(message));
    }
    let value = serde_json::from_str(&message).map_err(CodecError::from)?;
    Ok(value)
}

fn print_messages(messages: &HashMap<String, Value>) {
    let mut topics: Vec<_> = messages.keys().collect();
    topics.sort();
    for topic in topics {
        println!("{topic}: {}", messages[topic]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pongu::PonguError;
    use serde_json::json;

    #[test]
    fn test_json_message_is_parsed() {
        let value = parse_message(r#"{"answer": 42}"#.to_string(), true).unwrap();
        assert_eq!(value, json!({"answer": 42}));
    }

    #[test]
    fn test_invalid_json_message_is_rejected() {
        let result = parse_message("{not json".to_string(), true);
        assert!(matches!(
            result,
            Err(PonguError::CodecError(CodecError::Json(_)))
        ));
    }

    #[test]
    fn test_plain_message_stays_a_string() {
        let value = parse_message(r#"{"answer": 42}"#.to_string(), false).unwrap();
        assert_eq!(value, json!(r#"{"answer": 42}"#));
    }
}
