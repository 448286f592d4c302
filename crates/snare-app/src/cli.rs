//! Command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use directories::ProjectDirs;
use snare_proxy::feed::FeedConfig;
use snare_proxy::{CA_CERT_FILENAME, CA_KEY_FILENAME, DEFAULT_CA_COMMON_NAME};

/// Snare - intercepting proxy for security research
#[derive(Parser, Debug)]
#[command(name = "snare", version, about)]
pub struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "SNARE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Data directory (CA, database, logs)
    #[arg(long, global = true, env = "SNARE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the root certificate authority
    #[command(subcommand)]
    Ca(CaCommand),

    /// Run the intercepting proxy
    Proxy(ProxyArgs),
}

#[derive(Subcommand, Debug)]
pub enum CaCommand {
    /// Generate and persist a new root CA
    Generate(CaGenerateArgs),

    /// Print the CA certificate path and fingerprint
    Show(CaPaths),
}

/// CA file locations. Default to `<data>/ca/`.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CaPaths {
    /// CA certificate PEM
    #[arg(long = "ca-cert", env = "SNARE_CA_CERT")]
    pub cert: Option<PathBuf>,

    /// CA private key PEM
    #[arg(long = "ca-key", env = "SNARE_CA_KEY")]
    pub key: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct CaGenerateArgs {
    /// Certificate common name
    #[arg(long, env = "SNARE_CA_COMMON_NAME", default_value = DEFAULT_CA_COMMON_NAME)]
    pub common_name: String,

    /// Overwrite an existing CA
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub paths: CaPaths,
}

#[derive(ClapArgs, Debug)]
pub struct ProxyArgs {
    /// Listen address
    #[arg(long, env = "SNARE_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,

    /// Pin the active target instead of following the stored setting
    #[arg(long, env = "SNARE_TARGET")]
    pub target: Option<i64>,

    /// SQLite database path. Defaults to `<data>/snare.db`
    #[arg(long, env = "SNARE_DB")]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub ca: CaPaths,

    /// External feed endpoint URL
    #[arg(long, env = "SNARE_FEED_ENDPOINT")]
    pub feed_endpoint: Option<String>,

    /// Path to the target array in feed responses
    #[arg(long, env = "SNARE_FEED_TARGET_PATH", default_value = "data")]
    pub feed_target_path: String,

    /// Field holding a target's platform id
    #[arg(long, env = "SNARE_FEED_ID_FIELD", default_value = "id")]
    pub feed_id_field: String,

    /// Analytics URL template; `{id}` is replaced with the platform id
    #[arg(long, env = "SNARE_ANALYTICS_URL")]
    pub analytics_url: Option<String>,

    /// Do not fetch per-target analytics
    #[arg(long, env = "SNARE_NO_ANALYTICS")]
    pub no_analytics: bool,

    /// Do not extract findings from analytics
    #[arg(long, env = "SNARE_NO_FINDINGS")]
    pub no_findings: bool,

    /// Minimum milliseconds between analytics calls
    #[arg(long, env = "SNARE_RATE_INTERVAL_MS", default_value_t = 2000)]
    pub rate_interval_ms: u64,

    /// Seconds before an unfinished session entry is evicted
    #[arg(long, env = "SNARE_SESSION_TTL_SECS", default_value_t = 600)]
    pub session_ttl_secs: u64,
}

impl ProxyArgs {
    /// Feed settings from the command line.
    pub fn feed_config(&self) -> FeedConfig {
        let mut feed = FeedConfig::default()
            .with_target_path(self.feed_target_path.clone())
            .with_id_field(self.feed_id_field.clone())
            .with_fetch_analytics(!self.no_analytics)
            .with_extract_findings(!self.no_findings)
            .with_rate_interval(Duration::from_millis(self.rate_interval_ms));
        if let Some(endpoint) = &self.feed_endpoint {
            feed = feed.with_endpoint(endpoint.clone());
        }
        if let Some(url) = &self.analytics_url {
            feed = feed.with_analytics_url(url.clone());
        }
        feed
    }
}

/// Default data directory.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "snare", "snare").map(|dirs| dirs.data_dir().to_path_buf())
}

impl Args {
    /// The data directory, if one can be determined.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(default_data_dir)
    }
}

impl CaPaths {
    /// Resolves the certificate and key paths against `data_dir`.
    pub fn resolve(&self, data_dir: Option<&PathBuf>) -> anyhow::Result<(PathBuf, PathBuf)> {
        let ca_dir = data_dir.map(|d| d.join("ca"));
        let pick = |explicit: &Option<PathBuf>, name: &str| {
            explicit
                .clone()
                .or_else(|| ca_dir.as_ref().map(|d| d.join(name)))
                .ok_or_else(|| anyhow::anyhow!("Could not determine CA path; pass --ca-cert/--ca-key"))
        };
        Ok((pick(&self.cert, CA_CERT_FILENAME)?, pick(&self.key, CA_KEY_FILENAME)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ca_generate() {
        let args = Args::try_parse_from([
            "snare",
            "ca",
            "generate",
            "--common-name",
            "Lab CA",
            "--force",
        ])
        .unwrap();
        match args.command {
            Command::Ca(CaCommand::Generate(gen)) => {
                assert_eq!(gen.common_name, "Lab CA");
                assert!(gen.force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_proxy_defaults() {
        let args = Args::try_parse_from(["snare", "proxy", "--target", "3"]).unwrap();
        let Command::Proxy(proxy) = args.command else {
            panic!("expected proxy command");
        };
        assert_eq!(proxy.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(proxy.target, Some(3));
        assert_eq!(proxy.rate_interval_ms, 2000);

        let feed = proxy.feed_config();
        assert_eq!(feed.target_path, "data");
        assert!(feed.endpoint.is_none());
        assert!(!feed.analytics_enabled());
    }

    #[test]
    fn proxy_feed_flags() {
        let args = Args::try_parse_from([
            "snare",
            "--log-level",
            "debug",
            "proxy",
            "--feed-endpoint",
            "https://platform.test/api/programs",
            "--analytics-url",
            "https://platform.test/api/programs/{id}/analytics",
            "--no-findings",
        ])
        .unwrap();
        assert_eq!(args.log_level, "debug");
        let Command::Proxy(proxy) = args.command else {
            panic!("expected proxy command");
        };
        let feed = proxy.feed_config();
        assert!(feed.analytics_enabled());
        assert!(!feed.extract_findings);
        assert_eq!(feed.endpoint.as_deref(), Some("https://platform.test/api/programs"));
    }

    #[test]
    fn ca_paths_resolve_against_data_dir() {
        let data = PathBuf::from("/tmp/snare-data");
        let (cert, key) = CaPaths::default().resolve(Some(&data)).unwrap();
        assert_eq!(cert, data.join("ca").join(CA_CERT_FILENAME));
        assert_eq!(key, data.join("ca").join(CA_KEY_FILENAME));

        let explicit = CaPaths {
            cert: Some(PathBuf::from("/etc/ca.pem")),
            key: None,
        };
        let (cert, _) = explicit.resolve(Some(&data)).unwrap();
        assert_eq!(cert, PathBuf::from("/etc/ca.pem"));

        assert!(CaPaths::default().resolve(None).is_err());
    }
}
