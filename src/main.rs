use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(version, about = "Ephemeral build and live preview service for generated web apps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the build and preview server
    Serve {
        /// Port to serve on (overrides atelier.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Artifact storage directory
        #[arg(long)]
        storage_dir: Option<PathBuf>,

        /// Enable dev mode (bind all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Initialize the database and data directory without serving
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            storage_dir,
            dev,
        } => {
            cmd::cmd_serve(port, db_path, storage_dir, dev).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::cmd_init_db(db_path)?;
        }
    }

    Ok(())
}
