mod config;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use server::{run_block_server, run_metadata_server};
use shardstore_core::{
    DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest,
    DownloadFileOperation, DownloadFileOperationOutcome, DownloadFileOperationRequest,
    HashPlacement, ListFilesQuery, MetadataService, NearestPlacement, Placement, PlacementKind,
    RemoteMetadataService, ShardSet, TcpConnectProbe, UploadFileOperation,
    UploadFileOperationRequest, build_http_client, remote_shards,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shardstore")]
#[command(about = "Versioned file storage over content-addressed block shards")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the metadata service
    Metadata,

    /// Run one block shard
    BlockStore {
        /// Position of this shard in `block_stores`
        #[arg(long)]
        index: usize,
    },

    /// Upload a local file, replacing any existing version
    Upload {
        path: PathBuf,

        /// Block placement policy: hash | nearest
        #[arg(long, default_value = "hash")]
        placement: PlacementKind,
    },

    /// Download a file into a local directory
    Download {
        filename: String,
        destination_dir: PathBuf,
    },

    /// Delete a file
    Delete { filename: String },

    /// List stored files
    List {
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[arg(long)]
        include_tombstoned: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardstore=info,shardstore_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cfg = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Metadata => {
            tracing::info!("Starting metadata service with config: {}", cli.config);
            run_metadata_server(cfg).await.map_err(anyhow::Error::from)
        }
        Commands::BlockStore { index } => {
            tracing::info!("Starting block store {} with config: {}", index, cli.config);
            run_block_server(cfg, index).await.map_err(anyhow::Error::from)
        }
        command => run_client(cfg, command).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

struct Client {
    metadata: Arc<RemoteMetadataService>,
    shards: ShardSet,
}

impl Client {
    fn connect(cfg: &Config) -> anyhow::Result<Self> {
        let http = build_http_client(cfg.client.request_timeout())?;
        let metadata_endpoint = cfg.metadata.effective_endpoint();
        let metadata = RemoteMetadataService::new(http.clone(), &metadata_endpoint)
            .with_context(|| format!("metadata endpoint {}", metadata_endpoint))?;
        let shards = remote_shards(&http, &cfg.shard_endpoints())?;

        Ok(Self {
            metadata: Arc::new(metadata),
            shards,
        })
    }

    fn metadata(&self) -> Arc<dyn MetadataService> {
        self.metadata.clone()
    }
}

fn placement_for(kind: PlacementKind, cfg: &Config) -> Arc<dyn Placement> {
    match kind {
        PlacementKind::Hash => Arc::new(HashPlacement),
        PlacementKind::Nearest => Arc::new(NearestPlacement::new(TcpConnectProbe::new(
            cfg.client.probe_samples,
            cfg.client.probe_timeout(),
        ))),
    }
}

async fn run_client(cfg: Config, command: Commands) -> anyhow::Result<()> {
    let client = Client::connect(&cfg)?;
    let retry = cfg.client.retry_policy();

    match command {
        Commands::Upload { path, placement } => {
            let placement = placement_for(placement, &cfg);
            let request = UploadFileOperationRequest::from_path(&path, placement)
                .await
                .with_context(|| format!("failed to read {:?}", path))?;
            let operation =
                UploadFileOperation::new(client.metadata(), client.shards.clone(), retry);
            let result = operation
                .run(request)
                .await
                .with_context(|| format!("upload of {:?} failed", path))?;
            tracing::info!(
                "{} stored as v{} ({} blocks, {} pushed)",
                result.filename,
                result.version,
                result.hashlist.len(),
                result.uploaded_blocks
            );
            println!("OK");
        }
        Commands::Download {
            filename,
            destination_dir,
        } => {
            let operation = DownloadFileOperation::new(client.metadata(), client.shards.clone());
            let outcome = operation
                .run(DownloadFileOperationRequest {
                    filename: filename.clone(),
                    destination_dir,
                })
                .await
                .with_context(|| format!("download of {} failed", filename))?;
            match outcome {
                DownloadFileOperationOutcome::Downloaded(result) => {
                    tracing::info!("{} v{} written to {:?}", filename, result.version, result.path);
                    println!("OK");
                }
                DownloadFileOperationOutcome::NotFound => println!("NOT FOUND"),
            }
        }
        Commands::Delete { filename } => {
            let operation = DeleteFileOperation::new(client.metadata(), retry);
            let outcome = operation
                .run(DeleteFileOperationRequest {
                    filename: filename.clone(),
                })
                .await
                .with_context(|| format!("delete of {} failed", filename))?;
            match outcome {
                DeleteFileOperationOutcome::Deleted { .. } => println!("OK"),
                DeleteFileOperationOutcome::NotFound => println!("NOT FOUND"),
            }
        }
        Commands::List {
            prefix,
            limit,
            include_tombstoned,
        } => {
            let files = client
                .metadata
                .list_files(&ListFilesQuery {
                    prefix,
                    limit,
                    include_tombstoned,
                })
                .await
                .context("listing files failed")?;
            for file in files {
                println!(
                    "{}\tv{}\t{} blocks\t{}{}",
                    file.filename,
                    file.version,
                    file.block_count,
                    file.updated_at.to_rfc3339(),
                    if file.tombstoned { "\t(deleted)" } else { "" }
                );
            }
        }
        Commands::Metadata | Commands::BlockStore { .. } => {
            anyhow::bail!("server commands are not client operations")
        }
    }

    Ok(())
}
