//! gupload command-line entry point.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gupload_upload::{ClientConfig, ServerConfig, Transport, UploadClient};

use crate::config::FileConfig;

#[derive(Debug, Parser)]
#[command(name = "gupload", version, about = "Upload files in chunks over a persistent stream")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, global = true)]
    debug: bool,

    /// TOML file with `[server]` and `[client]` settings.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Stream,
    Http,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stream => Transport::Stream,
            TransportArg::Http => Transport::Http,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Receive uploads into a directory.
    Serve(ServeArgs),
    /// Upload a single file.
    Upload(UploadArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Port to listen on (0 = OS-assigned).
    #[arg(long)]
    port: Option<u16>,

    /// Directory uploads are written to.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// PEM certificate chain; enables TLS together with --key.
    #[arg(long)]
    certificate: Option<PathBuf>,

    /// PEM private key.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Session transport.
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Server address (host:port).
    #[arg(long)]
    address: Option<String>,

    /// File to upload.
    #[arg(long)]
    file: PathBuf,

    /// Bytes per chunk.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// PEM root certificate; enables TLS.
    #[arg(long)]
    certificate: Option<PathBuf>,

    /// Name checked against the server certificate (defaults to the address host).
    #[arg(long)]
    server_name: Option<String>,

    /// Session transport.
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// Gzip chunk content (stream transport only).
    #[arg(long)]
    compress: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let file = FileConfig::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Serve(args) => serve(server_config(args, file)?).await,
            Command::Upload(args) => {
                let path = args.file.clone();
                upload(client_config(args, file)?, path).await
            }
        }
    })
}

/// The flag wins over the config file; the file's value is parsed here.
fn pick_transport(flag: Option<TransportArg>, file: Option<String>) -> anyhow::Result<Transport> {
    match (flag, file) {
        (Some(arg), _) => Ok(arg.into()),
        (None, Some(s)) => s.parse().context("invalid transport in config file"),
        (None, None) => Ok(Transport::default()),
    }
}

fn server_config(args: ServeArgs, file: FileConfig) -> anyhow::Result<ServerConfig> {
    let section = file.server;
    Ok(ServerConfig {
        port: Some(args.port.unwrap_or(section.port)),
        save_dir: args.dir.unwrap_or(section.save_dir),
        certificate: args.certificate.or(section.certificate),
        key: args.key.or(section.key),
        transport: pick_transport(args.transport, section.transport)?,
    })
}

fn client_config(args: UploadArgs, file: FileConfig) -> anyhow::Result<ClientConfig> {
    let section = file.client;
    Ok(ClientConfig {
        address: args.address.unwrap_or(section.address),
        chunk_size: args.chunk_size.unwrap_or(section.chunk_size),
        root_certificate: args.certificate.or(section.root_certificate),
        server_name: args.server_name.or(section.server_name),
        transport: pick_transport(args.transport, section.transport)?,
        compress: args.compress || section.compress,
    })
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            token.cancel();
        }
    });
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    gupload_upload::serve(config, cancel).await?;
    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn upload(config: ClientConfig, path: PathBuf) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut client = UploadClient::new(config)?;
    let stats = client
        .upload_file(&path, &cancel)
        .await
        .with_context(|| format!("failed to upload {}", path.display()))?;
    println!("upload file time {} ns", stats.duration().as_nanos());
    Ok(())
}
