use clap::Parser;
use client::network::{Client, ClientConfig, Intent};
use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Direction, DEFAULT_PORT};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about = "Logs in bots that wander around", long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bot names are this prefix plus a number
    #[arg(short, long, default_value = "bot")]
    name_prefix: String,

    /// Number of bots
    #[arg(short, long, default_value_t = 4)]
    count: usize,

    /// Seed for reproducible walks
    #[arg(long)]
    seed: Option<u64>,
}

const DIRECTIONS: [Direction; 4] = [
    Direction::Up,
    Direction::Down,
    Direction::Left,
    Direction::Right,
];

/// Picks a new heading every half second and fires now and then
async fn wander(mut rng: StdRng, intents: mpsc::UnboundedSender<Intent>) {
    loop {
        let intent = match rng.gen_range(0..10) {
            0 => Intent::Stop,
            1 => Intent::Fire,
            _ => Intent::Steer(DIRECTIONS[rng.gen_range(0..DIRECTIONS.len())]),
        };
        if intents.send(intent).is_err() {
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }
}

async fn run_bot(name: String, server_addr: String, rng: StdRng) {
    let config = ClientConfig {
        server_addr,
        username: name.clone(),
        ..ClientConfig::default()
    };

    let client = match Client::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("{}: could not connect: {}", name, e);
            return;
        }
    };
    if let Err(e) = client.login().await {
        error!("{}: login failed: {}", name, e);
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(wander(rng, tx));
    if let Err(e) = client.run(rx).await {
        error!("{}: stopped: {}", name, e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let server_addr = format!("{}:{}", args.server, args.port);
    let mut seeds = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("Starting {} bots against {}", args.count, server_addr);
    let bots: Vec<_> = (0..args.count)
        .map(|i| {
            let rng = StdRng::seed_from_u64(seeds.gen());
            tokio::spawn(run_bot(
                format!("{}{}", args.name_prefix, i),
                server_addr.clone(),
                rng,
            ))
        })
        .collect();

    for bot in bots {
        bot.await?;
    }
    Ok(())
}
