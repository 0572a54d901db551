//! Keep command line client
//!
//! ## Usage
//!
//! ```bash
//! # Store one block, print its signed locator
//! keep put chunk.bin --copies 2
//!
//! # Fetch a block by locator
//! keep get acbd18db4cc2f85cedef654fccc4a4d8+3+A...@... -o chunk.bin
//!
//! # List the files in a collection
//! keep ls zzzzz-4zz18-0123456789abcde
//!
//! # Upload files as a new collection, or append to an existing one
//! keep upload a.txt b.txt --name "run 42"
//! keep upload c.txt --collection zzzzz-4zz18-0123456789abcde
//!
//! # Download a collection by blocks, or through keep-web
//! keep download zzzzz-4zz18-0123456789abcde ./out
//! keep download zzzzz-4zz18-0123456789abcde ./out --gateway
//! ```
//!
//! Connection settings come from `--config <toml>` and the `ARVADOS_*`
//! environment variables, the latter taking precedence.

use anyhow::Context;
use clap::{Parser, Subcommand};
use keep_client::{
    ApiClient, FileDownloader, FileUploader, GatewayClient, KeepClient, KeepConfig, Locator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keep")]
#[command(about = "Client for Keep content-addressed storage")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "KEEP_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file as a single block
    Put {
        file: PathBuf,

        /// Desired replicas (defaults to the configured copies)
        #[arg(long)]
        copies: Option<u32>,
    },
    /// Fetch a block
    Get {
        locator: String,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// List the files of a collection
    Ls { collection: String },
    /// Upload files as a collection
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name for a new collection
        #[arg(long)]
        name: Option<String>,

        /// Owner project for a new collection
        #[arg(long)]
        project: Option<String>,

        /// Append to this collection instead of creating one
        #[arg(long, conflicts_with_all = ["name", "project"])]
        collection: Option<String>,
    },
    /// Download a collection into `<dir>/<collection>`
    Download {
        collection: String,
        dir: PathBuf,

        /// Fetch files through keep-web instead of rebuilding them from blocks
        #[arg(long)]
        gateway: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("keep_client=info".parse()?))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => KeepConfig::load(path)?,
        None => KeepConfig::default(),
    }
    .with_env();
    config.validate()?;
    let config = Arc::new(config);

    let keep = Arc::new(KeepClient::new(config.clone())?);
    let api = Arc::new(ApiClient::new(&config)?);
    let gateway = if config.keep_web_host.is_some() {
        Some(Arc::new(GatewayClient::new(&config)?))
    } else {
        None
    };

    match args.command {
        Command::Put { file, copies } => {
            let locator = keep
                .put_file(&file, copies.unwrap_or(config.copies))
                .await
                .with_context(|| format!("storing {}", file.display()))?;
            println!("{}", locator);
        }
        Command::Get { locator, output } => {
            let locator: Locator = locator.parse()?;
            let data = keep.get_data_chunk(&locator).await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(locator = %locator, bytes = data.len(), path = %output.display(), "Block saved");
        }
        Command::Ls { collection } => {
            let downloader = FileDownloader::new(keep, api, gateway);
            for token in downloader.list_file_info_from_collection(&collection).await? {
                println!("{:>12} {}", token.size, token.full_path());
            }
        }
        Command::Upload {
            files,
            name,
            project,
            collection,
        } => {
            let uploader = FileUploader::new(keep, api, gateway, config.clone());
            let result = match collection {
                Some(uuid) => uploader.upload_to_existing_collection(&files, &uuid).await?,
                None => {
                    uploader
                        .upload(&files, name.as_deref(), project.as_deref())
                        .await?
                }
            };
            println!("{}", result.uuid.unwrap_or_default());
        }
        Command::Download {
            collection,
            dir,
            gateway: use_gateway,
        } => {
            let downloader = FileDownloader::new(keep, api, gateway);
            let files = if use_gateway {
                downloader
                    .download_files_from_collection_using_gateway(&collection, &dir)
                    .await?
            } else {
                downloader
                    .download_files_from_collection(&collection, &dir)
                    .await?
            };
            for file in files {
                println!("{}", file.display());
            }
        }
    }

    Ok(())
}
