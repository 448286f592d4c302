//! Snare Proxy - intercepting MITM proxy for security research.
//!
//! Clients route HTTP and HTTPS through the proxy. TLS is terminated with
//! leaf certificates minted by a locally generated root CA, and every
//! in-scope exchange of the active target is persisted through a
//! [`snare_core::TrafficStore`].
//!
//! ## Features
//!
//! - Root CA generation, persistence (key mode 0600) and loading
//! - Per-host leaf certificates on the fly
//! - Global exclusions and per-target scope rules
//! - Active target switching without restart
//! - Page recording session tagging
//! - Passive ingestion of an external bug-bounty feed, with rate-limited
//!   per-target analytics and findings extraction
//!
//! ## Architecture
//!
//! ```text
//! Client Request → hudsucker → InterceptHandler → CaptureController
//!                                                   │
//!                         ┌─────────────────────────┴──────────┐
//!                         │ excluded / out of scope            │ captured
//!                         ▼                                    ▼
//!                    Passthrough                        TrafficStore insert
//!                                                              │
//!                                                feed endpoint, 2xx JSON?
//!                                                              ▼
//!                                             FeedIngester (spawned task)
//!                                                  │ RateLimiter
//!                                                  ▼
//!                                          AnalyticsClient → findings
//! ```

mod ca;
mod capture;
mod context;
mod error;
pub mod feed;
mod handler;
mod proxy;
mod session;

pub use ca::{
    CertificateAuthority, LeafCertificate, CA_CERT_FILENAME, CA_KEY_FILENAME,
    DEFAULT_CA_COMMON_NAME,
};
pub use capture::{serialize_headers, CaptureController, PendingExchange};
pub use context::{InterceptionContext, DEFAULT_TARGET_POLL_INTERVAL};
pub use error::{CaError, IngestError, ProxyError, Result};
pub use feed::{FeedConfig, FeedEndpoint, FeedIngester, IngestSummary};
pub use handler::InterceptHandler;
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer, DEFAULT_CERT_CACHE_SIZE};
pub use session::{SessionTable, DEFAULT_SESSION_TTL};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;
