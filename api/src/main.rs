mod commands;
mod config;
mod handlers;
mod provisioner;
mod request_logging;
mod workflow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{IamConfig, ServerConfig};
use handlers::SharedProvisioner;
use poem::{listener::TcpListener, Server};
use provisioner::IamProvisioner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keywrap-server", version)]
#[command(about = "Issues service account keys encrypted to an OpenPGP recipient")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Validate PUBLIC_KEY and SERVICE_ACCOUNT_EMAIL_TARGET without creating a key
    Check,
    /// Decrypt a response with the recipient's secret key
    Decrypt {
        /// Armored OpenPGP secret key
        #[arg(long)]
        secret_key: PathBuf,

        /// Response body or bare base64 ciphertext (default: stdin)
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve_command().await,
        Commands::Check => commands::check_command(),
        Commands::Decrypt { secret_key, input } => {
            commands::decrypt_command(&secret_key, input.as_deref())
        }
    }
}

async fn serve_command() -> Result<()> {
    let server = ServerConfig::from_env()?;
    let iam = IamConfig::from_env()?;
    let provisioner: SharedProvisioner = Arc::new(
        IamProvisioner::new(&iam).context("Failed to initialize IAM client")?,
    );

    let addr = server.listen_addr();
    tracing::info!(
        addr = %addr,
        iam_api = %iam.api_url,
        static_token = iam.access_token.is_some(),
        "Starting keywrap server"
    );

    let app = handlers::build_app(provisioner);
    Server::new(TcpListener::bind(&addr))
        .run(app)
        .await
        .with_context(|| format!("Server on {} failed", addr))
}
