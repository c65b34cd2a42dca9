use clap::Parser;
use client::network::{Client, ClientConfig, Intent};
use log::{error, info, warn};
use server::network::{BoxError, Server, ServerConfig, ServerHandle};
use shared::{prepare_username, Direction, Team, DEFAULT_PORT, PROTOCOL_VERSION};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to (ignored with --host)
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Player name, at most 10 characters
    #[arg(short, long)]
    username: String,

    /// GREEN or RED; the smaller team when omitted
    #[arg(short, long)]
    team: Option<Team>,

    /// Run a server in this process and play on it
    #[arg(long)]
    host: bool,

    /// Level the hosted server starts with, relative to --levels-dir
    #[arg(short, long)]
    level: Option<String>,

    /// Directory levels are read from when hosting
    #[arg(long, default_value = "levels")]
    levels_dir: PathBuf,
}

/// Starts the embedded server and leaves it running in the background
async fn host_server(args: &Args, username: &str) -> Result<ServerHandle, BoxError> {
    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", args.port),
        level: args.level.clone(),
        levels_dir: args.levels_dir.clone(),
        host_username: Some(username.to_string()),
        ..ServerConfig::default()
    };
    let mut server = Server::bind(config).await?;
    let handle = server.handle()?;

    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Hosted server stopped: {}", e);
        }
    });
    Ok(handle)
}

/// Turns console lines into intents; lines starting with ':' are commands
async fn read_console(intents: mpsc::UnboundedSender<Intent>, host: Option<ServerHandle>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        let intent = match words.as_slice() {
            [":quit"] => Intent::Quit,
            [":up"] => Intent::Steer(Direction::Up),
            [":down"] => Intent::Steer(Direction::Down),
            [":left"] => Intent::Steer(Direction::Left),
            [":right"] => Intent::Steer(Direction::Right),
            [":stop"] => Intent::Stop,
            [":fire"] => Intent::Fire,
            [":mine"] => Intent::PlaceMine,
            [":start", mode, map, path] => {
                match &host {
                    Some(handle) => {
                        handle.start_game(mode, map, path);
                    }
                    None => warn!("Only the host can start a round"),
                }
                continue;
            }
            [] => continue,
            _ => Intent::Chat(line.trim().to_string()),
        };
        let quit = intent == Intent::Quit;
        if intents.send(intent).is_err() || quit {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let username = prepare_username(&args.username)?;

    let host = if args.host {
        info!("Hosting on port {}", args.port);
        Some(host_server(&args, &username).await?)
    } else {
        None
    };
    let server_host = if args.host { "127.0.0.1" } else { args.server.as_str() };

    let client = Client::connect(ClientConfig {
        server_addr: format!("{}:{}", server_host, args.port),
        username,
        team: args.team,
        version: PROTOCOL_VERSION.to_string(),
        is_host: args.host,
        levels_dir: args.levels_dir.clone(),
        host_level: args.level.clone(),
        ..ClientConfig::default()
    })
    .await?;
    client.login().await?;

    info!("Commands: :up :down :left :right :stop :fire :mine :quit, anything else is chat");
    if host.is_some() {
        info!("Type `:start <mode> <map> <path>` to begin a round");
    }

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_console(intent_tx, host.clone()));
    client.run(intent_rx).await?;

    if let Some(handle) = host {
        handle.shutdown();
    }
    Ok(())
}
