use clap::Parser;
use log::{info, warn};
use server::network::{BoxError, Server, ServerConfig, ServerHandle};
use shared::{DEFAULT_PORT, PROTOCOL_VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port; level transfers use the same TCP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Level served at startup, relative to --levels-dir (generated if absent)
    #[arg(short, long)]
    level: Option<String>,

    /// Directory that STARTGAME system paths are resolved against
    #[arg(long, default_value = "levels")]
    levels_dir: PathBuf,

    /// Protocol version clients must match
    #[arg(long, default_value = PROTOCOL_VERSION)]
    version_string: String,

    /// Seconds to wait for a client to fetch an announced level
    #[arg(long, default_value_t = 10)]
    transfer_timeout_secs: u64,
}

/// Reads operator commands from stdin: `start <mode> <map> <path>` and `quit`
async fn run_console(handle: ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["start", mode, map, path] => {
                if !handle.start_game(mode, map, path) {
                    break;
                }
            }
            ["quit"] | ["exit"] => {
                handle.shutdown();
                break;
            }
            [] => {}
            _ => warn!("Commands: start <mode> <map> <path> | quit"),
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

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        level: args.level,
        levels_dir: args.levels_dir,
        version: args.version_string,
        host_username: None,
        transfer_timeout: Duration::from_secs(args.transfer_timeout_secs),
    };

    let mut server = Server::bind(config).await?;
    tokio::spawn(run_console(server.handle()?));

    info!("Type `start <mode> <map> <path>` to begin a round, `quit` to stop");
    server.run().await?;

    Ok(())
}
