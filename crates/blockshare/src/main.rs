mod args;
mod command;

use std::time::Duration;

use anyhow::Context;
use args::Arguments;
use blockshare_lib::{FetchPolicy, Peer, PeerAddress, PeerConfig};
use clap::Parser;
use command::{Command, USAGE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

const TRACING_ENV: &str = "BLOCKSHARE_LOG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logger();

    let args = Arguments::parse();

    let mut peer = Peer::start(build_config(args))
        .await
        .context("failed to start the peer")?;
    println!("Peer listening on {}", peer.local_addr());
    println!("\n{}", USAGE);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading a command")? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(_) => {
                println!("Invalid command\n{}", USAGE);
                continue;
            }
        };

        if !execute(&peer, command).await {
            break;
        }
    }

    peer.stop().await?;
    println!("Peer stopped");

    Ok(())
}

/// Returns `false` when the shell should exit
async fn execute(peer: &Peer, command: Command) -> bool {
    match command {
        Command::Load(path) => match peer.load(&path).await {
            Ok(loaded) => println!(
                "Loaded {}: {} blocks, hash: {}",
                loaded.filename, loaded.total_blocks, loaded.content_hash
            ),
            Err(e) => println!("Failed to load {}: {}", path.display(), e),
        },
        Command::Download { filename, output } => match peer.download(&filename, output.as_deref()).await {
            Ok(report) => {
                println!(
                    "Downloaded {} ({} blocks, {} fetched) to {} (hash verified)",
                    report.filename,
                    report.total_blocks,
                    report.fetched_blocks,
                    report.output.display()
                );
                for (neighbor, blocks) in report.sources.iter().filter(|(_, blocks)| *blocks > 0) {
                    println!("  {} blocks from {}", blocks, neighbor);
                }
            }
            Err(e) => println!("Download failed: {}", e),
        },
        Command::Status => {
            let status = peer.status().await;
            if status.is_empty() {
                println!("No files");
            }
            for (filename, status) in status.iter() {
                println!("{}: {}/{} blocks", filename, status.held_blocks, status.total_blocks);
            }
        }
        Command::Quit => return false,
    }

    true
}

fn build_config(args: Arguments) -> PeerConfig {
    let mut config = PeerConfig::new(PeerAddress::new(args.ip, args.port), args.neighbors);
    config.block_size = args.block_size;
    config.request_timeout = Duration::from_secs(args.timeout_secs);
    config.max_connections = args.max_connections;
    config.max_total_blocks = args.max_total_blocks;
    if args.retry_alternates {
        config.fetch_policy = FetchPolicy::RetryAlternateHolders;
    }

    config
}

fn setup_logger() {
    let env_filter = EnvFilter::builder()
        .with_env_var(TRACING_ENV)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Error setting a global tracing::subscriber");
}
