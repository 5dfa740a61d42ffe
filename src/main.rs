use anyhow::Result;
use clap::{Parser, Subcommand};
use image_labeler::credentials::CredentialStore;
use image_labeler::settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the label resolution webhook
    Server,
    /// Check configuration and the credentials document for errors
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server => {
            let settings = Settings::new()?;
            image_labeler::run_server(settings).await
        }
        Commands::CheckConfig => {
            println!("Checking configuration...");
            let settings = match Settings::new() {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            };
            println!("✓ Configuration is valid");

            match CredentialStore::load(&settings.credentials.path) {
                Ok(store) => {
                    for warning in store.warnings() {
                        println!("! {}", warning);
                    }
                    println!(
                        "✓ Credentials document {} lists {} registries",
                        settings.credentials.path,
                        store.len()
                    );
                    let mut hosts: Vec<_> = store.hosts().collect();
                    hosts.sort_unstable();
                    for host in hosts {
                        println!("  - {}", host);
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Credentials error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
