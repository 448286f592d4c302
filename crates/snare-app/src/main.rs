//! Snare - intercepting MITM proxy for security research.
//!
//! Commands:
//! - `snare ca generate` creates the root CA clients must trust
//! - `snare ca show` prints where it lives and its fingerprint
//! - `snare proxy` runs the proxy until Ctrl-C

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use snare_core::TrafficStore;
use snare_proxy::{CertificateAuthority, ProxyConfig, ProxyServer};
use snare_storage::Database;
use tokio_util::sync::CancellationToken;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Args, CaCommand, CaGenerateArgs, CaPaths, Command, ProxyArgs};

/// Initialize logging with file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("snare={},warn", log_level)));

    if let Some(log_dir) = args.data_dir().map(|d| d.join("logs")) {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("snare")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::debug!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

fn generate_ca(args: &CaGenerateArgs, data_dir: Option<&PathBuf>) -> anyhow::Result<()> {
    let (cert_path, key_path) = args.paths.resolve(data_dir)?;

    if !args.force && (cert_path.exists() || key_path.exists()) {
        bail!(
            "CA already exists at {}; pass --force to replace it",
            cert_path.display()
        );
    }

    let ca = CertificateAuthority::generate(&args.common_name)
        .context("Failed to generate CA")?;
    ca.persist(&cert_path, &key_path)
        .context("Failed to write CA files")?;

    tracing::info!("Generated CA '{}' ({})", args.common_name, ca.fingerprint());
    println!("Certificate: {}", cert_path.display());
    println!("Private key: {}", key_path.display());
    println!("SHA-256:     {}", ca.fingerprint());
    println!("Install the certificate as a trusted root in every client that routes through Snare.");
    Ok(())
}

fn show_ca(paths: &CaPaths, data_dir: Option<&PathBuf>) -> anyhow::Result<()> {
    let (cert_path, key_path) = paths.resolve(data_dir)?;
    let ca = load_ca(&cert_path, &key_path)?;

    println!("Certificate: {}", cert_path.display());
    println!("SHA-256:     {}", ca.fingerprint());
    Ok(())
}

fn load_ca(cert_path: &Path, key_path: &Path) -> anyhow::Result<CertificateAuthority> {
    CertificateAuthority::load(cert_path, key_path).with_context(|| {
        format!(
            "Failed to load CA from {}; run `snare ca generate` first",
            cert_path.display()
        )
    })
}

async fn run_proxy(args: &ProxyArgs, data_dir: Option<&PathBuf>) -> anyhow::Result<()> {
    let (cert_path, key_path) = args.ca.resolve(data_dir)?;

    let db_path = match (&args.db, data_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => dir.join("snare.db"),
        (None, None) => Database::default_db_path()?,
    };
    let db = Database::with_path(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let store: Arc<dyn TrafficStore> = Arc::new(db);

    let config = ProxyConfig::new(cert_path, key_path)
        .with_addr(args.addr)
        .with_target_override(args.target)
        .with_session_ttl(Duration::from_secs(args.session_ttl_secs))
        .with_feed(args.feed_config());
    tracing::debug!("Proxy config: {:?}", config);

    let server = ProxyServer::new(config, store).context("Failed to start proxy")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal.cancel();
    });

    println!("Snare listening on {}", server.addr());
    server.run(shutdown).await.context("Proxy server error")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    tracing::debug!("Args: {:?}", args);
    let data_dir = args.data_dir();

    match &args.command {
        Command::Ca(CaCommand::Generate(gen)) => generate_ca(gen, data_dir.as_ref()),
        Command::Ca(CaCommand::Show(paths)) => show_ca(paths, data_dir.as_ref()),
        Command::Proxy(proxy) => run_proxy(proxy, data_dir.as_ref()).await,
    }
}
