use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use creditgate::{
    AuthHandle, AuthProvider, DeviceId, EntitlementConfig, EntitlementService, EntitlementState,
    Feature, FileLocalStore, GrantChannel, InMemoryRemoteStore, SpendChannel, StoreContext,
    SystemClock, Tier,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_INSUFFICIENT: u8 = 2;

#[derive(Parser)]
#[command(name = "creditctl")]
#[command(about = "Inspect and operate on a device-local credit record")]
struct Cli {
    /// Directory holding the device slot file
    #[arg(long, global = true, default_value = ".")]
    state_dir: PathBuf,

    /// JSON config file overriding tier allowances and slot name
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current record
    Show,
    /// Spend credits (search queries, then power, then fuel)
    Spend {
        #[arg(long)]
        cost: u64,
        #[arg(long, default_value = "fuel")]
        channel: SpendChannel,
    },
    /// Add credits to a balance
    Grant {
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value = "power")]
        channel: GrantChannel,
    },
    /// Change subscription tier
    Upgrade {
        #[arg(long)]
        tier: Tier,
    },
    /// Check whether an action is affordable without spending
    Check {
        #[arg(long)]
        cost: u64,
        #[arg(long, default_value = "doc")]
        feature: Feature,
    },
    /// Apply the monthly reset if the month changed
    Reset,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| (if cli.verbose { "debug" } else { "warn" }).to_string());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = load_config(cli.config.as_deref())?;
    let local = FileLocalStore::in_dir(&cli.state_dir, &config.local_slot);
    let remote = InMemoryRemoteStore::new(config.remote_collection.clone());
    let ctx = StoreContext::new(
        config,
        Arc::new(SystemClock),
        Arc::new(local.clone()),
        Arc::new(remote),
    );

    let service = EntitlementService::new(ctx);
    let auth = AuthHandle::anonymous(DeviceId::generate());
    let identity = auth
        .current()
        .identity()
        .cloned()
        .ok_or_else(|| anyhow!("device identity did not resolve"))?;
    let store = service
        .bind(identity)
        .await
        .with_context(|| format!("Failed to open '{}'", local.path().display()))?;

    match cli.command {
        Command::Show => {}
        Command::Spend { cost, channel } => {
            if !service.spend(cost, channel).await? {
                eprintln!("insufficient credits");
                print_state(&service.state())?;
                return Ok(ExitCode::from(EXIT_INSUFFICIENT));
            }
        }
        Command::Grant { amount, channel } => service.grant(amount, channel).await?,
        Command::Upgrade { tier } => service.upgrade_tier(tier).await?,
        Command::Check { cost, feature } => {
            let allowed = service.check_allowance(cost, feature);
            println!("allowed: {}", allowed);
            if !allowed {
                println!("upsell: open");
                return Ok(ExitCode::from(EXIT_INSUFFICIENT));
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Reset => {
            let applied = service.check_reset().await? || store.reset_on_bind();
            println!("reset applied: {}", applied);
        }
    }

    print_state(&service.state())?;
    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> Result<EntitlementConfig> {
    let Some(path) = path else {
        return Ok(EntitlementConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config '{}'", path.display()))?;
    EntitlementConfig::from_json(&raw).map_err(|e| anyhow!("{} ({})", e, path.display()))
}

fn print_state(state: &EntitlementState) -> Result<()> {
    let rendered = serde_json::to_string_pretty(state).context("Failed to render state")?;
    println!("{}", rendered);
    Ok(())
}
