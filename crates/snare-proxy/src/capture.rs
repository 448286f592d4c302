//! Per-exchange capture logic.
//!
//! The controller is transport-neutral: it sees `http` request/response
//! heads plus already buffered bodies, and hands a [`PendingExchange`] from
//! the request hook to the response hook.
//!
//! ```text
//! on_request:  CONNECT? → register session
//!              excluded? → drop
//!              in scope (or feed endpoint)? → PendingExchange
//! on_response: PendingExchange → log entry → store
//!                              → feed endpoint + 2xx JSON → ingester (spawned)
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::http::{request, response, HeaderMap, Method, Version};
use url::Url;

use snare_core::{HttpTrafficLogEntry, LogSource};

use crate::context::InterceptionContext;
use crate::feed::{FeedEndpoint, FeedIngester};
use crate::session::SessionTable;

/// Partial log record carried from the request hook to the response hook.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    session: String,
    started: Instant,
    is_feed: bool,
    bearer: Option<String>,
    entry: HttpTrafficLogEntry,
}

impl PendingExchange {
    /// Stores the drained request body.
    pub fn attach_request_body(&mut self, body: &[u8]) {
        self.entry.request_body = body.to_vec();
    }

    /// The record as captured so far.
    pub fn entry(&self) -> &HttpTrafficLogEntry {
        &self.entry
    }

    /// Whether the request targets the external feed endpoint.
    pub fn is_feed(&self) -> bool {
        self.is_feed
    }
}

/// Request/response hook logic shared by every transport handler.
pub struct CaptureController {
    ctx: Arc<InterceptionContext>,
    sessions: Arc<SessionTable>,
    feed_endpoint: Option<FeedEndpoint>,
    ingester: Option<Arc<FeedIngester>>,
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("ctx", &self.ctx)
            .field("sessions", &self.sessions.len())
            .field("feed_endpoint", &self.feed_endpoint)
            .field("ingester", &self.ingester.is_some())
            .finish()
    }
}

impl CaptureController {
    /// Creates a controller without feed recognition.
    pub fn new(ctx: Arc<InterceptionContext>, sessions: Arc<SessionTable>) -> Self {
        Self {
            ctx,
            sessions,
            feed_endpoint: None,
            ingester: None,
        }
    }

    /// Enables feed recognition. Without an ingester, feed responses are
    /// still captured but not ingested.
    pub fn with_feed(mut self, endpoint: FeedEndpoint, ingester: Option<Arc<FeedIngester>>) -> Self {
        self.feed_endpoint = Some(endpoint);
        self.ingester = ingester;
        self
    }

    /// The interception context.
    pub fn context(&self) -> &Arc<InterceptionContext> {
        &self.ctx
    }

    /// The session table.
    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Registers a CONNECT tunnel.
    pub fn on_connect(&self, session: &str) {
        tracing::debug!("CONNECT tunnel from {}", session);
        self.sessions.register_tls(session);
    }

    /// Forgets a torn-down session. Tunnel entries otherwise outlive each
    /// exchange so every request inside the tunnel stays HTTPS.
    pub fn close_session(&self, session: &str) {
        self.sessions.remove(session);
    }

    /// Decides whether to capture a request and, if so, starts its record.
    ///
    /// CONNECT requests only register the session and are never captured.
    pub fn on_request(&self, session: &str, parts: &request::Parts) -> Option<PendingExchange> {
        if parts.method == Method::CONNECT {
            self.on_connect(session);
            return None;
        }

        let tunneled = self.sessions.is_tls(session);
        let url = request_url(parts, tunneled);

        if self.ctx.exclusions().is_excluded(&url) {
            tracing::trace!("Globally excluded: {}", url);
            return None;
        }

        let parsed = Url::parse(&url).ok();
        let is_feed = match (&self.feed_endpoint, &parsed) {
            (Some(endpoint), Some(u)) => endpoint.matches(u),
            _ => false,
        };

        let (active_target, scope) = self.ctx.active_target();
        let in_scope = match &parsed {
            Some(u) => scope.is_url_in_scope(u),
            None => scope.is_in_scope(&url),
        };

        let target_id = if in_scope {
            active_target
        } else if is_feed {
            None
        } else {
            tracing::trace!("Out of scope: {}", url);
            return None;
        };

        let is_https = tunneled || parsed.as_ref().is_some_and(|u| u.scheme() == "https");
        let recording_session_id = self.ctx.recording_session();

        let entry = HttpTrafficLogEntry {
            target_id,
            timestamp: Utc::now(),
            request_method: parts.method.to_string(),
            request_url: url,
            request_protocol: version_str(parts.version),
            request_headers: serialize_headers(&parts.headers),
            client_addr: session.to_string(),
            is_https,
            log_source: if recording_session_id.is_some() {
                LogSource::Recorder
            } else {
                LogSource::Proxy
            },
            recording_session_id,
            ..Default::default()
        };

        Some(PendingExchange {
            session: session.to_string(),
            started: Instant::now(),
            is_feed,
            bearer: if is_feed {
                bearer_token(&parts.headers)
            } else {
                None
            },
            entry,
        })
    }

    /// Completes and persists an exchange, then dispatches feed ingestion.
    pub fn on_response(&self, pending: PendingExchange, parts: &response::Parts, body: &Bytes) {
        let PendingExchange {
            session: _,
            started,
            is_feed,
            bearer,
            mut entry,
        } = pending;

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type_lower = content_type
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        entry.response_status = Some(parts.status.as_u16());
        entry.response_reason = parts.status.canonical_reason().map(str::to_string);
        entry.response_protocol = Some(version_str(parts.version));
        entry.response_headers = Some(serialize_headers(&parts.headers));
        entry.response_content_type = content_type;
        entry.response_body = body.to_vec();
        entry.response_size = body.len() as i64;
        entry.duration_ms = started.elapsed().as_millis() as i64;
        entry.is_page_candidate = content_type_lower.contains("html");

        self.persist(&entry);

        if is_feed && parts.status.is_success() && content_type_lower.contains("json") {
            match &self.ingester {
                Some(ingester) => {
                    tracing::info!("Feed response recognized at {}", entry.request_url);
                    ingester.spawn_ingest(body.clone(), bearer);
                }
                None => tracing::debug!("Feed response seen but ingestion is disabled"),
            }
        }
    }

    /// Persists an exchange whose response never arrived.
    pub fn on_abandoned(&self, pending: PendingExchange) {
        let mut entry = pending.entry;
        entry.duration_ms = pending.started.elapsed().as_millis() as i64;

        tracing::debug!("Exchange abandoned: {} {}", entry.request_method, entry.request_url);
        self.close_session(&pending.session);
        self.persist(&entry);
    }

    fn persist(&self, entry: &HttpTrafficLogEntry) {
        match self.ctx.store().insert_traffic_log(entry) {
            Ok(id) => tracing::debug!(
                "Logged #{} {} {} -> {:?}",
                id,
                entry.request_method,
                entry.request_url,
                entry.response_status
            ),
            Err(e) => tracing::warn!("Failed to store traffic log for {}: {}", entry.request_url, e),
        }
    }
}

/// Absolute request URL. Origin-form URIs are completed from the Host header.
fn request_url(parts: &request::Parts, tunneled: bool) -> String {
    let uri = &parts.uri;
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let scheme = if tunneled { "https" } else { "http" };
    let host = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            parts
                .headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    format!("{}://{}{}", scheme, host, path)
}

fn version_str(version: Version) -> String {
    format!("{:?}", version)
}

/// Serializes headers as a JSON object of name → values, names in first-seen
/// order.
pub fn serialize_headers(headers: &HeaderMap) -> String {
    let mut out = String::from("{");
    for (i, name) in headers.keys().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let values: Vec<serde_json::Value> = headers
            .get_all(name)
            .iter()
            .map(|v| {
                let s = match v.to_str() {
                    Ok(s) => s.to_string(),
                    Err(_) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
                };
                serde_json::Value::String(s)
            })
            .collect();
        out.push_str(&serde_json::Value::String(name.as_str().to_string()).to_string());
        out.push(':');
        out.push_str(&serde_json::Value::Array(values).to_string());
    }
    out.push('}');
    out
}

/// Token of an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::http::{Request, Response, StatusCode};
    use snare_core::{ExclusionRuleType, ProxyExclusionRule, ScopeItemType, ScopeRule};
    use snare_storage::Database;

    const CLIENT: &str = "127.0.0.1:40000";

    fn db_with_target() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.add_scope_rule(&ScopeRule::include(7, ScopeItemType::Domain, "example.com").with_wildcard(true))
            .unwrap();
        db.add_exclusion_rule(&ProxyExclusionRule::new(ExclusionRuleType::FileExtension, "png"))
            .unwrap();
        db.set_current_target(Some(7)).unwrap();
        Arc::new(db)
    }

    fn controller(db: &Arc<Database>) -> CaptureController {
        let ctx = Arc::new(InterceptionContext::new(db.clone(), None));
        CaptureController::new(ctx, Arc::new(SessionTable::new()))
    }

    fn req(method: &str, uri: &str) -> request::Parts {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("accept", "text/html")
            .header("cookie", "a=1")
            .header("cookie", "b=2")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn res(status: u16, content_type: &str) -> response::Parts {
        Response::builder()
            .status(StatusCode::from_u16(status).unwrap())
            .header("content-type", content_type)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn captures_in_scope_exchange() {
        let db = db_with_target();
        let capture = controller(&db);

        let mut pending = capture
            .on_request(CLIENT, &req("POST", "https://api.example.com/login"))
            .unwrap();
        pending.attach_request_body(b"user=a");
        capture.on_response(
            pending,
            &res(200, "text/html; charset=utf-8"),
            &Bytes::from_static(b"<html></html>"),
        );

        let logged = db.get_recent_traffic(1).unwrap().remove(0).entry;
        assert_eq!(logged.target_id, Some(7));
        assert_eq!(logged.request_method, "POST");
        assert_eq!(logged.request_body, b"user=a");
        assert_eq!(logged.response_status, Some(200));
        assert_eq!(logged.response_reason.as_deref(), Some("OK"));
        assert_eq!(logged.response_size, 13);
        assert!(logged.is_https);
        assert!(logged.is_page_candidate);
        assert_eq!(logged.log_source, LogSource::Proxy);
        assert_eq!(logged.client_addr, CLIENT);
    }

    fn origin_form(path: &str) -> request::Parts {
        Request::builder()
            .uri(path)
            .header("host", "api.example.com")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn connect_registers_session_and_is_not_logged() {
        let db = db_with_target();
        let capture = controller(&db);

        assert!(capture
            .on_request(CLIENT, &req("CONNECT", "api.example.com:443"))
            .is_none());
        assert!(capture.sessions().is_tls(CLIENT));
        assert_eq!(db.count_traffic().unwrap(), 0);
    }

    #[test]
    fn every_request_in_a_tunnel_is_https() {
        let db = db_with_target();
        let capture = controller(&db);
        capture.on_request(CLIENT, &req("CONNECT", "api.example.com:443"));

        for path in ["/one", "/two"] {
            let pending = capture.on_request(CLIENT, &origin_form(path)).unwrap();
            assert_eq!(
                pending.entry().request_url,
                format!("https://api.example.com{}", path)
            );
            assert!(pending.entry().is_https);
            capture.on_response(pending, &res(204, "text/plain"), &Bytes::new());
        }

        assert!(capture.sessions().is_tls(CLIENT));
        assert_eq!(db.count_traffic().unwrap(), 2);

        capture.close_session(CLIENT);
        let pending = capture.on_request(CLIENT, &origin_form("/three")).unwrap();
        assert_eq!(pending.entry().request_url, "http://api.example.com/three");
        assert!(!pending.entry().is_https);
    }

    #[test]
    fn excluded_and_out_of_scope_are_dropped() {
        let db = db_with_target();
        let capture = controller(&db);

        assert!(capture
            .on_request(CLIENT, &req("GET", "https://example.com/logo.png"))
            .is_none());
        assert!(capture
            .on_request(CLIENT, &req("GET", "https://other.test/"))
            .is_none());
        assert_eq!(db.count_traffic().unwrap(), 0);
    }

    #[test]
    fn abandoned_exchange_is_logged_without_response() {
        let db = db_with_target();
        let capture = controller(&db);

        let pending = capture
            .on_request(CLIENT, &req("GET", "http://example.com/slow"))
            .unwrap();
        capture.on_abandoned(pending);

        let logged = db.get_recent_traffic(1).unwrap().remove(0).entry;
        assert!(!logged.has_response());
        assert!(!logged.is_https);
    }

    #[test]
    fn recording_session_tags_entries() {
        let db = db_with_target();
        let capture = controller(&db);
        capture.context().set_recording_session(Some(3));

        let pending = capture
            .on_request(CLIENT, &req("GET", "https://example.com/"))
            .unwrap();
        assert_eq!(pending.entry().log_source, LogSource::Recorder);
        assert_eq!(pending.entry().recording_session_id, Some(3));
    }

    #[test]
    fn out_of_scope_feed_request_is_logged_without_target() {
        let db = db_with_target();
        let capture = controller(&db).with_feed(
            FeedEndpoint::parse("https://platform.test/api/programs/").unwrap(),
            None,
        );

        let mut parts = req("GET", "https://platform.test/api/programs");
        parts
            .headers
            .insert(AUTHORIZATION, "Bearer tok-123".parse().unwrap());
        let pending = capture.on_request(CLIENT, &parts).unwrap();
        assert!(pending.is_feed());
        assert_eq!(pending.bearer.as_deref(), Some("tok-123"));

        capture.on_response(pending, &res(200, "application/json"), &Bytes::from_static(b"[]"));
        let logged = db.get_recent_traffic(1).unwrap().remove(0).entry;
        assert_eq!(logged.target_id, None);
    }

    struct RecordingClient {
        calls: parking_lot::Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl crate::feed::AnalyticsClient for RecordingClient {
        async fn fetch(
            &self,
            url: &str,
            bearer: Option<&str>,
        ) -> Result<serde_json::Value, crate::error::IngestError> {
            self.calls
                .lock()
                .push((url.to_string(), bearer.map(str::to_string)));
            Ok(serde_json::json!({"groups": []}))
        }
    }

    fn feed_controller(db: &Arc<Database>, client: &Arc<RecordingClient>) -> CaptureController {
        let config = crate::feed::FeedConfig::default()
            .with_endpoint("https://platform.test/api/programs")
            .with_analytics_url("https://platform.test/api/programs/{id}/analytics");
        let ingester = crate::feed::FeedIngester::new(
            config,
            db.clone(),
            client.clone(),
            Arc::new(crate::feed::RateLimiter::new(std::time::Duration::from_millis(10))),
            tokio_util::sync::CancellationToken::new(),
        );
        controller(db).with_feed(
            FeedEndpoint::parse("https://platform.test/api/programs").unwrap(),
            Some(Arc::new(ingester)),
        )
    }

    fn feed_exchange(capture: &CaptureController, status: u16, content_type: &str, id: &str) {
        let mut parts = req("GET", "https://platform.test/api/programs");
        parts
            .headers
            .insert(AUTHORIZATION, "Bearer tok-9".parse().unwrap());
        let pending = capture.on_request(CLIENT, &parts).unwrap();
        let body = serde_json::json!({"data": [{"id": id}]}).to_string();
        capture.on_response(pending, &res(status, content_type), &Bytes::from(body));
    }

    #[tokio::test]
    async fn only_successful_json_feed_responses_are_ingested() {
        let db = db_with_target();
        let client = Arc::new(RecordingClient {
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        let capture = feed_controller(&db, &client);

        feed_exchange(&capture, 200, "text/html", "B");
        feed_exchange(&capture, 500, "application/json", "C");
        feed_exchange(&capture, 200, "application/json; charset=utf-8", "A");

        for _ in 0..200 {
            if !client.calls.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(db.get_external_target("A").unwrap().is_some());
        assert!(db.get_external_target("B").unwrap().is_none());
        assert!(db.get_external_target("C").unwrap().is_none());
        assert_eq!(
            *client.calls.lock(),
            vec![(
                "https://platform.test/api/programs/A/analytics".to_string(),
                Some("tok-9".to_string())
            )]
        );
        // All three exchanges are still captured.
        assert_eq!(db.count_traffic().unwrap(), 3);
    }

    #[test]
    fn header_serialization_groups_and_keeps_order() {
        let parts = req("GET", "https://example.com/");
        let json = serialize_headers(&parts.headers);
        assert_eq!(json, r#"{"accept":["text/html"],"cookie":["a=1","b=2"]}"#);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cookie"][1], "b=2");
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic Zm9vOmJhcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
