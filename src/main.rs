use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use leasepool::{Config, Error, Instance, Instances, Result};

#[derive(Parser)]
#[command(name = "leasepool")]
#[command(author, version, about = "Inspect DHCP address pool configuration", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the validated configuration
    ShowConfig,
    /// List the bindings and reservations of every instance
    ListBindings {
        #[arg(short, long)]
        instance: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::ShowConfig) {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListBindings { instance } => {
            let instances = Instances::from_config(&config).await?;
            let selected = match instance {
                Some(name) => vec![lookup(&instances, &name).await?],
                None => instances.all().await,
            };

            for instance in selected {
                print_bindings(&instance).await;
            }
            Ok(())
        }
    }
}

async fn lookup(instances: &Instances, name: &str) -> Result<std::sync::Arc<Instance>> {
    instances
        .get(name)
        .await
        .ok_or_else(|| Error::InvalidArgument(format!("no instance named {}", name)))
}

async fn print_bindings(instance: &Instance) {
    let pool = instance.pool().await;
    println!(
        "{} ({} - {}, {} of {} free)",
        instance.name(),
        instance.start_address(),
        instance.end_address(),
        pool.availability(),
        pool.size()
    );
    println!(
        "{:<16} {:<20} {:<10} {:<10}",
        "IP Address", "Hardware Address", "State", "Remaining"
    );
    println!("{}", "-".repeat(58));

    for binding in pool.bindings() {
        let owner = binding
            .hardware_address()
            .map_or_else(|| "-".to_string(), |mac| mac.to_string());
        let remaining = match binding.remaining_seconds() {
            Some(0) => "expired".to_string(),
            Some(seconds) => format!("{}s", seconds),
            None => "-".to_string(),
        };

        println!(
            "{:<16} {:<20} {:<10} {:<10}",
            binding.address().to_string(),
            owner,
            binding.state_label(),
            remaining
        );
    }
    println!();
}
