//! `devauth` - inspect and edit the local identity state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devauth::{auth, AuthContext, Config, State, StateDeviceAssertions};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "devauth")]
#[command(about = "Local users, device identity and store credentials", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List local users
    Users,

    /// Create a local user
    AddUser {
        username: String,

        #[arg(long)]
        macaroon: String,

        /// Discharge for the macaroon (repeatable)
        #[arg(long = "discharge")]
        discharges: Vec<String>,
    },

    /// Remove a local user by id
    RemoveUser { id: u64 },

    /// Print the device record as JSON
    Device,

    /// Print the store id requests should be addressed to
    StoreId {
        #[arg(default_value = "")]
        fallback: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    let state_path = config.state.resolved_path()?;
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
    }
    let state = State::open(&state_path)
        .with_context(|| format!("Failed to open state {}", state_path.display()))?;

    match cli.command {
        Commands::Users => {
            let users = auth::users(&state.lock())?;
            if users.is_empty() {
                println!("No users.");
            }
            for u in users {
                let store = if u.has_store_auth() { "store auth" } else { "no store auth" };
                println!("{:>4}  {:<24} {store}", u.id, u.username);
            }
        }
        Commands::AddUser {
            username,
            macaroon,
            discharges,
        } => {
            let mut st = state.lock();
            let user = auth::new_user(&mut st, &username, &macaroon, &discharges)?;
            st.checkpoint().context("Failed to save state")?;
            println!("{}", user.id);
        }
        Commands::RemoveUser { id } => {
            let mut st = state.lock();
            auth::remove_user(&mut st, id).with_context(|| format!("Cannot remove user {id}"))?;
            st.checkpoint().context("Failed to save state")?;
        }
        Commands::Device => {
            let device = AuthContext::new(&state, None).device()?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        Commands::StoreId { fallback } => {
            let assertions = StateDeviceAssertions::open(&state).context("Failed to load device key")?;
            let ctx = AuthContext::with_config(&state, Some(&assertions), &config.auth);
            println!("{}", ctx.store_id(&fallback)?);
        }
    }

    Ok(())
}
