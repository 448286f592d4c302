//! MITM proxy server.
//!
//! Wires the CA, interception context, session table and feed ingester into
//! a hudsucker proxy and runs it until cancelled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use snare_core::TrafficStore;

use crate::ca::{CertificateAuthority, CA_CERT_FILENAME, CA_KEY_FILENAME};
use crate::capture::CaptureController;
use crate::context::{InterceptionContext, DEFAULT_TARGET_POLL_INTERVAL};
use crate::error::{ProxyError, Result};
use crate::feed::{AnalyticsClient, FeedConfig, FeedIngester, HttpAnalyticsClient, RateLimiter};
use crate::handler::InterceptHandler;
use crate::session::{SessionTable, DEFAULT_SESSION_TTL};
use crate::DEFAULT_PROXY_PORT;

/// Default number of cached leaf certificates.
pub const DEFAULT_CERT_CACHE_SIZE: u64 = 1_000;

/// Default interval between session sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Proxy server configuration.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// CA certificate PEM path.
    pub ca_cert_path: PathBuf,
    /// CA private key PEM path.
    pub ca_key_path: PathBuf,
    /// Pins the active target, ignoring the persisted setting.
    pub target_override: Option<i64>,
    /// Leaf certificate cache size.
    pub cert_cache_size: u64,
    /// Age after which a session entry is evicted.
    pub session_ttl: Duration,
    /// How often stale sessions are swept.
    pub sweep_interval: Duration,
    /// How often the persisted active target is polled.
    pub target_poll_interval: Duration,
    /// Feed recognition and ingestion.
    pub feed: FeedConfig,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("addr", &self.addr)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("ca_key_path", &self.ca_key_path)
            .field("target_override", &self.target_override)
            .field("cert_cache_size", &self.cert_cache_size)
            .field("session_ttl", &self.session_ttl)
            .field("feed_endpoint", &self.feed.endpoint)
            .finish()
    }
}

impl ProxyConfig {
    /// Creates a configuration using the given CA files.
    pub fn new(ca_cert_path: impl Into<PathBuf>, ca_key_path: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_cert_path: ca_cert_path.into(),
            ca_key_path: ca_key_path.into(),
            target_override: None,
            cert_cache_size: DEFAULT_CERT_CACHE_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            target_poll_interval: DEFAULT_TARGET_POLL_INTERVAL,
            feed: FeedConfig::default(),
        }
    }

    /// Creates a configuration using the standard CA file names in `dir`.
    pub fn with_ca_dir(dir: &Path) -> Self {
        Self::new(dir.join(CA_CERT_FILENAME), dir.join(CA_KEY_FILENAME))
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Pins the active target.
    pub fn with_target_override(mut self, target_id: Option<i64>) -> Self {
        self.target_override = target_id;
        self
    }

    /// Sets the session TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the active target poll interval.
    pub fn with_target_poll_interval(mut self, interval: Duration) -> Self {
        self.target_poll_interval = interval;
        self
    }

    /// Sets the feed configuration.
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }
}

/// MITM proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    ca: CertificateAuthority,
    context: Arc<InterceptionContext>,
    sessions: Arc<SessionTable>,
    analytics_client: Option<Arc<dyn AnalyticsClient>>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("config", &self.config)
            .field("context", &self.context)
            .finish()
    }
}

impl ProxyServer {
    /// Loads the CA and the interception state.
    ///
    /// Fails if the CA cannot be loaded.
    pub fn new(config: ProxyConfig, store: Arc<dyn TrafficStore>) -> Result<Self> {
        let ca = CertificateAuthority::load(&config.ca_cert_path, &config.ca_key_path)?;
        tracing::info!("Loaded CA {} from {:?}", ca.fingerprint(), config.ca_cert_path);

        let context = Arc::new(InterceptionContext::new(store, config.target_override));

        Ok(Self {
            config,
            ca,
            context,
            sessions: Arc::new(SessionTable::new()),
            analytics_client: None,
        })
    }

    /// Replaces the HTTP analytics client.
    pub fn with_analytics_client(mut self, client: Arc<dyn AnalyticsClient>) -> Self {
        self.analytics_client = Some(client);
        self
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// The interception context.
    pub fn context(&self) -> &Arc<InterceptionContext> {
        &self.context
    }

    /// The loaded CA.
    pub fn ca(&self) -> &CertificateAuthority {
        &self.ca
    }

    /// Runs the proxy until `shutdown` is cancelled.
    ///
    /// In-flight exchanges are allowed to finish. Fails on bind or transport
    /// errors.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let authority = self.ca.authority(self.config.cert_cache_size)?;

        let background = shutdown.child_token();
        let mut tasks = vec![
            Arc::clone(&self.sessions).start_sweeper(
                self.config.session_ttl,
                self.config.sweep_interval,
                background.clone(),
            ),
            Arc::clone(&self.context)
                .start_target_watcher(self.config.target_poll_interval, background.clone()),
        ];

        let controller = self.build_controller(&background, &mut tasks)?;
        let handler = InterceptHandler::new(Arc::new(controller));

        tracing::info!("Starting MITM proxy on {}", self.config.addr);
        tracing::info!("CA certificate: {:?}", self.config.ca_cert_path);

        let result = match Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .build()
        {
            Ok(proxy) => proxy
                .start()
                .await
                .map_err(|e| ProxyError::Proxy(e.to_string())),
            Err(e) => Err(ProxyError::Proxy(e.to_string())),
        };

        background.cancel();
        for task in tasks {
            let _ = task.await;
        }

        match &result {
            Ok(()) => tracing::info!("Proxy server stopped"),
            Err(e) => tracing::error!("Proxy server failed: {}", e),
        }
        result
    }

    /// Starts the proxy server in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> ProxyHandle {
        let shutdown = CancellationToken::new();
        let addr = self.config.addr;
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { self.run(token).await });

        ProxyHandle {
            shutdown,
            addr,
            handle,
        }
    }

    fn build_controller(
        &self,
        shutdown: &CancellationToken,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> Result<CaptureController> {
        let controller = CaptureController::new(Arc::clone(&self.context), Arc::clone(&self.sessions));

        let endpoint = match self.config.feed.parsed_endpoint() {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return Ok(controller),
            Err(e) => {
                tracing::error!("Feed recognition disabled: {}", e);
                return Ok(controller);
            }
        };

        let client: Arc<dyn AnalyticsClient> = match &self.analytics_client {
            Some(client) => Arc::clone(client),
            None => Arc::new(HttpAnalyticsClient::new(self.config.feed.request_timeout)?),
        };

        let limiter = Arc::new(RateLimiter::new(self.config.feed.rate_interval));
        tasks.push(limiter.start(shutdown.clone()));

        let ingester = FeedIngester::new(
            self.config.feed.clone(),
            Arc::clone(self.context.store()),
            client,
            limiter,
            shutdown.clone(),
        );
        tracing::info!("Watching for feed responses from {:?}", self.config.feed.endpoint);

        Ok(controller.with_feed(endpoint, Some(Arc::new(ingester))))
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown: CancellationToken,
    addr: SocketAddr,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ProxyError::Proxy(e.to_string())),
        }
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.wait().await
    }
}
