use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicepay_agent::config::AgentConfig;
use voicepay_agent::payments::memory::{
    FixedMarketData, InMemoryPaymentFlow, LimitWallet, ScriptedScanner,
};
use voicepay_agent::session::{Collaborators, SessionCoordinator};

/// Voice payment assistant - live speech-model session over the microphone.
#[derive(Parser, Debug)]
#[command(name = "voicepay-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Establish the session before starting audio
    #[arg(long)]
    preconnect: bool,

    /// Wallet approval limit for the built-in demo collaborators
    #[arg(long, default_value_t = 100.0)]
    approval_limit: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::from_env().context("could not load configuration")?;
    info!(model = %config.model, voice = %config.voice, "starting voicepay agent");

    // The binary ships with in-process demo collaborators; a real deployment
    // injects its wallet, camera, and market integrations here.
    let collaborators = Collaborators {
        flow: InMemoryPaymentFlow::new(),
        wallet: LimitWallet::new(cli.approval_limit),
        scanner: ScriptedScanner::empty(),
        market: FixedMarketData::new([("SOL", 95.0), ("BTC", 64_000.0), ("ETH", 2_600.0)]),
    };

    let coordinator = SessionCoordinator::new(config, collaborators);

    if cli.preconnect && !coordinator.preconnect().await {
        anyhow::bail!("preconnect failed");
    }

    coordinator.start().await.context("could not start session")?;

    let mut status = coordinator.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow().clone();
            info!(
                state = %snapshot.state,
                speaking = snapshot.is_speaking,
                error = snapshot.last_error.as_deref().unwrap_or(""),
                "session status"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for shutdown signal")?;
    info!("shutting down");
    coordinator.stop().await;
    Ok(())
}
