use clap::{Parser, Subcommand};
use client::network::{LoginClient, LoginOutcome};
use client::retry::RetryPolicy;
use log::info;
use shared::Tier;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gate address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and wait until the gate lets the user through
    Login {
        user_id: String,
        /// Seconds to wait per attempt
        #[arg(short = 'w', long, default_value = "30")]
        wait: u64,
        /// Attempts before giving up
        #[arg(short = 'r', long, default_value = "5")]
        retries: u32,
    },
    /// Report the lobby's connected-client count
    Report { total: i64 },
    /// Withdraw a queued login
    Cancel { user_id: String },
    /// Print the gate's current queues
    Snapshot {
        #[arg(short = 'w', long, default_value = "2")]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut gate = LoginClient::connect(&args.server).await?;
    info!("Talking to gate at {}", gate.server_addr());

    match args.command {
        Command::Login {
            user_id,
            wait,
            retries,
        } => {
            let policy = RetryPolicy {
                max_attempts: retries,
                ..RetryPolicy::default()
            };
            match gate
                .login_with_retry(&user_id, Duration::from_secs(wait), &policy)
                .await?
            {
                LoginOutcome::Accepted => println!("{} accepted", user_id),
                LoginOutcome::AcceptedAfterQueue { tier, waited } => {
                    println!("{} accepted after {:?} in {} queue", user_id, waited, tier)
                }
            }
        }
        Command::Report { total } => {
            gate.report_telemetry(total).await?;
            println!("Reported total={}", total);
        }
        Command::Cancel { user_id } => {
            gate.cancel(&user_id).await?;
            println!("Cancel sent for {}", user_id);
        }
        Command::Snapshot { wait } => {
            let snapshot = gate.snapshot(Duration::from_secs(wait)).await?;
            println!("remaining capacity: {}", snapshot.remaining_capacity);
            for tier in Tier::QUEUE_PRIORITY {
                println!("{:>12}: {:?}", tier.as_str(), snapshot.queued(tier));
            }
            if !snapshot.awaiting_release.is_empty() {
                println!("awaiting release: {:?}", snapshot.awaiting_release);
            }
            if snapshot.truncated {
                println!("(lists truncated to fit one datagram)");
            }
        }
    }

    Ok(())
}
