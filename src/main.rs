use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use falbot_core::billing::ledger::{BalanceLedger, FileLedger};
use falbot_core::channel::console::ConsoleTransport;
use falbot_core::channel::InboundBus;
use falbot_core::config::{self, Config};
use falbot_core::registry::ModelRegistry;
use falbot_core::service::gateway::Gateway;
use falbot_core::types::Task;

#[derive(Parser)]
#[command(
    name = "falbot",
    about = format!("{} falbot - chat gateway to the fal.ai queue", falbot_core::LOGO),
    version = falbot_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway on the console transport
    Gateway {
        /// Config file path (default: ~/.falbot/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Inspect or credit user balances
    Balance {
        #[command(subcommand)]
        command: BalanceCommands,
    },
    /// List the model catalog
    Models {
        /// Task to list (all tasks if omitted)
        task: Option<String>,
    },
}

#[derive(Subcommand)]
enum BalanceCommands {
    /// Show a user's balance
    Show {
        user: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Credit atoms to a user (admin deposit)
    Credit {
        user: String,
        atoms: i64,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    Ok(match path {
        Some(path) => Config::load(&path)?,
        None => Config::load_default()?,
    })
}

/// Config for ledger-only subcommands: no API key required.
fn load_ledger(path: Option<PathBuf>) -> Result<FileLedger> {
    let ledger_path = match path {
        Some(path) => Config::load(&path)?.ledger_path(),
        None => config::get_data_dir().join("ledger.json"),
    };
    Ok(FileLedger::open(&ledger_path)?)
}

fn init_tracing(debug: bool) {
    let default_level = if debug {
        "falbot=debug,falbot_core=debug"
    } else {
        "falbot=info,falbot_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.parse().expect("valid filter")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { config, verbose } => {
            let config = load_config(config)?;
            init_tracing(verbose || config.debug);
            let bus = InboundBus::new(256);
            ConsoleTransport::spawn_stdin_reader(bus.sender());
            let transport = Arc::new(ConsoleTransport::new());
            let gateway = Gateway::from_config(&config, transport)?;

            println!("{} falbot {} — type !help", falbot_core::LOGO, falbot_core::VERSION);
            let inbound = bus.into_receiver();
            tokio::select! {
                _ = gateway.run(inbound) => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("shutting down ({} jobs active)", gateway.active_jobs());
                    gateway.shutdown();
                }
            }
            Ok(())
        }
        Commands::Balance { command } => match command {
            BalanceCommands::Show { user, config } => {
                init_tracing(false);
                let ledger = load_ledger(config)?;
                println!("{}: {} atoms", user, ledger.get(&user).await);
                Ok(())
            }
            BalanceCommands::Credit { user, atoms, config } => {
                init_tracing(false);
                let ledger = load_ledger(config)?;
                let balance = ledger
                    .add_delta(&user, atoms)
                    .await
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
                println!("{}: {} atoms", user, balance);
                Ok(())
            }
        },
        Commands::Models { task } => {
            let registry = ModelRegistry::new();
            let tasks: Vec<Task> = match task {
                Some(name) => vec![Task::parse(&name).ok_or_else(|| anyhow::anyhow!("unknown task: {}", name))?],
                None => Task::ALL.to_vec(),
            };
            for task in tasks {
                println!("{}", registry.render_list(task, None));
                println!();
            }
            Ok(())
        }
    }
}
