//! kemlink simulation binary.
//!
//! Starts an in-memory relay, joins a handful of parties and runs the full
//! protocol: pairwise handshakes and messages from the first party to every
//! other, then a group with a distributed key and one group message.
//!
//! # Usage
//!
//! ```bash
//! # Four parties, OS randomness
//! kemlink-sim --parties 4
//!
//! # Reproducible run
//! kemlink-sim --seed 42 --log-level debug
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use kemlink_client::{ClientAction, ClientConfig};
use kemlink_core::Environment;
use kemlink_crypto::{Kem, MlKem512};
use kemlink_harness::{HarnessError, MemoryRelay, Party, RelayConfig, SimEnv, SystemEnv};
use kemlink_proto::{MessageContent, PeerName};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const NAMES: [&str; 8] = ["alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi"];

/// kemlink protocol simulation
#[derive(Parser, Debug)]
#[command(name = "kemlink-sim")]
#[command(about = "Run kemlink parties against an in-memory relay")]
#[command(version)]
struct Args {
    /// Number of parties (at least 2)
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u16).range(2..))]
    parties: u16,

    /// Seed for a reproducible run; OS randomness if absent
    #[arg(short, long)]
    seed: Option<u64>,

    /// Text each pairwise message carries
    #[arg(short, long, default_value = "Hello!")]
    message: String,

    /// Name of the group created by the first party
    #[arg(long, default_value = "team")]
    group_name: String,

    /// Seconds to wait for a requested public key
    #[arg(long, default_value = "10")]
    key_request_timeout: u64,

    /// Seconds a handshake may take
    #[arg(long, default_value = "10")]
    handshake_timeout: u64,

    /// Handshake with every peer as soon as the relay sends its directory
    #[arg(long)]
    auto_establish: bool,

    /// Hours before the relay expires a group
    #[arg(long, default_value = "24")]
    group_expiration_hours: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn party_name(index: usize) -> Result<PeerName, HarnessError> {
    let name = NAMES.get(index).map_or_else(|| format!("peer-{index}"), |n| (*n).to_string());
    Ok(PeerName::new(name)?)
}

async fn run<E: Environment>(env: E, args: &Args) -> Result<(), HarnessError> {
    let wait = Duration::from_secs(args.handshake_timeout.max(args.key_request_timeout) + 5);
    let config = ClientConfig {
        key_request_timeout: Duration::from_secs(args.key_request_timeout),
        handshake_timeout: Duration::from_secs(args.handshake_timeout),
        auto_establish: args.auto_establish,
    };
    let relay = MemoryRelay::new(
        env.clone(),
        RelayConfig { group_expiration: Duration::from_secs(args.group_expiration_hours * 3600) },
    );
    let kem: Arc<dyn Kem> = Arc::new(MlKem512);

    let mut parties = Vec::new();
    for index in 0..usize::from(args.parties) {
        let name = party_name(index)?;
        parties.push(Party::join(&relay, &name, env.clone(), Arc::clone(&kem), config.clone()).await?);
    }
    tracing::info!(parties = parties.len(), "parties joined");

    let Some((admin, members)) = parties.split_first_mut() else {
        return Ok(());
    };
    let content = MessageContent::text(args.message.clone());

    for member in members.iter_mut() {
        admin.client().send_message(member.name(), &content).await?;
        let from = admin.name().clone();
        member
            .expect(wait, "pairwise message", |a| {
                matches!(a, ClientAction::DeliverMessage { from: f, .. } if *f == from)
            })
            .await?;
        tracing::info!(from = %admin.name(), to = %member.name(), "pairwise message delivered");
    }

    let names: Vec<_> = members.iter().map(|m| m.name().clone()).collect();
    let report = admin.client().create_group(&args.group_name, &names).await?;
    tracing::info!(
        group_id = %report.group_id,
        delivered = report.delivered.len(),
        failed = report.failed.len(),
        "group key distributed"
    );

    for member in members.iter_mut() {
        let group_id = report.group_id.clone();
        member
            .expect(wait, "group key", |a| {
                matches!(a, ClientAction::GroupKeyInstalled { group_id: g } if *g == group_id)
            })
            .await?;
    }

    admin
        .client()
        .send_group_message(&report.group_id, &MessageContent::text(format!("{} to all", args.message)))
        .await?;
    for member in members.iter_mut() {
        let group_id = report.group_id.clone();
        member
            .expect(wait, "group message", |a| {
                matches!(a, ClientAction::DeliverGroupMessage { group_id: g, .. } if *g == group_id)
            })
            .await?;
    }
    tracing::info!(group_id = %report.group_id, members = members.len(), "group message delivered");

    for party in &mut parties {
        for error in party.take_errors() {
            tracing::warn!(party = %party.name(), %error, "event rejected during run");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("kemlink simulation starting");

    match args.seed {
        Some(seed) => {
            tracing::info!(seed, "using seeded environment");
            run(SimEnv::with_seed(seed), &args).await?;
        },
        None => run(SystemEnv::new(), &args).await?,
    }

    tracing::info!("kemlink simulation finished");
    Ok(())
}
