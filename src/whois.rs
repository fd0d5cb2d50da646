use crate::{
    config::Config,
    errors::{ConnectivityCause, LookupError},
    index::ResolutionIndex,
    proxy::WhoisProxy,
    query,
    referral::{self, Endpoint},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info, warn};

/// ARIN answers plain queries with a summary; these prefixes select its detailed output.
const ARIN_HOST: &str = "whois.arin.net";
const ARIN_ASN_PREFIX: &str = "a + ";
const ARIN_NETWORK_PREFIX: &str = "n + ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisResult {
    /// The query as sent, after trimming and ASN canonicalization.
    pub query: String,
    pub server: String,
    /// Set when a referral was followed and answered.
    pub referral_server: Option<String>,
    pub raw: String,
}

/// WHOIS over TCP with single-hop referral chasing.
#[derive(Clone)]
pub struct WhoisService {
    index: Arc<ResolutionIndex>,
    root: Endpoint,
    default_port: u16,
    dial_timeout: Duration,
    query_timeout: Duration,
    follow_referral: bool,
    stats: bool,
    max_response_size: usize,
    proxy: Option<Arc<WhoisProxy>>,
}

impl WhoisService {
    pub fn new(config: &Config, index: Arc<ResolutionIndex>) -> Self {
        info!(
            "WhoisService initialized (root {}:{}, referral {}, stats {})",
            config.whois_root_server, config.whois_port, config.whois_follow_referral, config.whois_stats
        );

        Self {
            index,
            root: Endpoint::new(config.whois_root_server.clone(), config.whois_port),
            default_port: config.whois_port,
            dial_timeout: config.whois_dial_timeout(),
            query_timeout: config.whois_timeout(),
            follow_referral: config.whois_follow_referral,
            stats: config.whois_stats,
            max_response_size: config.max_response_size,
            proxy: WhoisProxy::from_config(config).map(Arc::new),
        }
    }

    pub fn with_referral(mut self, follow_referral: bool) -> Self {
        self.follow_referral = follow_referral;
        self
    }

    pub fn with_stats(mut self, stats: bool) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_root(mut self, root: Endpoint) -> Self {
        self.root = root;
        self
    }

    pub fn with_timeouts(mut self, dial_timeout: Duration, query_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self.query_timeout = query_timeout;
        self
    }

    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    /// Route connections through a SOCKS5 proxy, or dial directly with `None`.
    pub fn with_proxy(mut self, proxy: Option<WhoisProxy>) -> Self {
        self.proxy = proxy.map(Arc::new);
        self
    }

    pub fn follows_referrals(&self) -> bool {
        self.follow_referral
    }

    /// Query the server responsible for `query`, or `server` (`host[:port]`) when given.
    pub async fn lookup(&self, query: &str, server: Option<&str>) -> Result<WhoisResult, LookupError> {
        let started = Instant::now();
        let started_at = Utc::now();

        let query = query.trim().trim_end_matches('.');
        if query.is_empty() {
            return Err(LookupError::EmptyQuery);
        }

        let is_asn = query::is_asn(query);
        let query = if is_asn {
            query::canonical_asn(query)
        } else {
            query.to_string()
        };

        let target = if !is_asn && !query.contains('.') && !query.contains(':') {
            debug!("Bare query {}, asking root server {}", query, self.root);
            self.root.clone()
        } else {
            self.find_server(&query, server).await?
        };

        let mut raw = self.raw_query(&target, &query, is_asn).await?;
        let mut referral_server = None;

        if self.follow_referral {
            let rules = self.index.host_rules();
            if let Some(referral) = referral::extract_referral(&raw, &rules, self.default_port) {
                if referral != target {
                    debug!("Following referral from {} to {}", target, referral);
                    match self.raw_query(&referral, &query, is_asn).await {
                        Ok(text) => {
                            if !raw.ends_with('\n') {
                                raw.push('\n');
                            }
                            raw.push_str(&text);
                            referral_server = Some(referral.to_string());
                        }
                        Err(e) => warn!("Referral query to {} failed, keeping {} response: {}", referral, target, e),
                    }
                }
            }
        }

        let trimmed = raw.trim();
        let raw = if self.stats && !trimmed.is_empty() {
            append_stats(trimmed.to_string(), started.elapsed(), started_at)
        } else {
            trimmed.to_string()
        };

        Ok(WhoisResult {
            query,
            server: target.to_string(),
            referral_server,
            raw,
        })
    }

    /// Override, then the TLD table, then the root server's referral for the extension.
    async fn find_server(&self, query: &str, server: Option<&str>) -> Result<Endpoint, LookupError> {
        if let Some(endpoint) = server.and_then(|s| referral::parse_endpoint(s, self.default_port)) {
            return Ok(endpoint);
        }

        let ext = query::extension(query);
        if let Some(endpoint) = self
            .index
            .whois_server(ext)
            .and_then(|host| referral::parse_endpoint(&host, self.default_port))
        {
            return Ok(endpoint);
        }

        debug!("No WHOIS server for '{}' in table, asking {}", ext, self.root);
        let answer = self.raw_query(&self.root, ext, false).await?;
        referral::extract_referral(&answer, &self.index.host_rules(), self.default_port)
            .ok_or_else(|| LookupError::ServerNotFound(query.to_string()))
    }

    async fn raw_query(&self, endpoint: &Endpoint, text: &str, is_asn: bool) -> Result<String, LookupError> {
        let text = if endpoint.host.eq_ignore_ascii_case(ARIN_HOST) {
            let prefix = if is_asn { ARIN_ASN_PREFIX } else { ARIN_NETWORK_PREFIX };
            format!("{}{}", prefix, text)
        } else {
            text.to_string()
        };

        let host = self.index.rewrite_host(&endpoint.host);
        if host != endpoint.host {
            debug!("Rewrote WHOIS host {} to {}", endpoint.host, host);
        }
        let target = Endpoint::new(host, endpoint.port);
        let server = target.to_string();

        match timeout(self.query_timeout, self.exchange(&target, &text)).await {
            Ok(Ok(response)) => {
                debug!("Received {} bytes from {}", response.len(), server);
                Ok(response)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LookupError::connectivity(server, ConnectivityCause::Timeout(self.query_timeout))),
        }
    }

    /// Dial `target` directly or through the proxy, bounded by the dial timeout.
    async fn connect(&self, target: &Endpoint) -> Result<TcpStream, LookupError> {
        let proxy = self.proxy.as_deref().filter(|proxy| !proxy.bypasses(&target.host));

        let dial = async {
            match proxy {
                Some(proxy) => {
                    debug!("Dialing {} through proxy {}", target, proxy.server());
                    proxy.connect(target).await.map_err(ConnectivityCause::Proxy)
                }
                None => TcpStream::connect((target.host.as_str(), target.port))
                    .await
                    .map_err(ConnectivityCause::Connect),
            }
        };

        match timeout(self.dial_timeout, dial).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(cause)) => Err(LookupError::connectivity(target.to_string(), cause)),
            Err(_) => Err(LookupError::connectivity(
                target.to_string(),
                ConnectivityCause::Timeout(self.dial_timeout),
            )),
        }
    }

    /// Connect, send one line and read until the server closes the connection.
    async fn exchange(&self, target: &Endpoint, text: &str) -> Result<String, LookupError> {
        let server = target.to_string();

        let mut stream = self.connect(target).await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        stream
            .write_all(format!("{}\r\n", text).as_bytes())
            .await
            .map_err(|e| LookupError::connectivity(server.clone(), ConnectivityCause::Write(e)))?;

        let mut response = Vec::new();
        let limit = self.max_response_size as u64 + 1;
        stream
            .take(limit)
            .read_to_end(&mut response)
            .await
            .map_err(|e| LookupError::connectivity(server.clone(), ConnectivityCause::Read(e)))?;

        if response.len() > self.max_response_size {
            return Err(LookupError::ResponseTooLarge(server));
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

/// Trailer with the elapsed time and the moment the query started.
fn append_stats(raw: String, elapsed: Duration, started_at: DateTime<Utc>) -> String {
    format!(
        "{}\n\n% Query time: {} msec\n% WHEN: {}\n",
        raw,
        elapsed.as_millis(),
        started_at.format("%a %b %d %H:%M:%S UTC %Y")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{RdapBootstrap, WhoisServerMap};
    use chrono::TimeZone;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    type QueryLog = Arc<Mutex<Vec<String>>>;

    async fn bind() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Answers every connection with `response` and records the received query line.
    fn serve(listener: TcpListener, response: String) -> QueryLog {
        let log: QueryLog = Arc::default();
        let seen = log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let mut reader = BufReader::new(socket);
                let mut line = String::new();
                if reader.read_line(&mut line).await.is_err() {
                    continue;
                }
                seen.lock().unwrap().push(line.trim_end_matches("\r\n").to_string());
                let mut socket = reader.into_inner();
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        log
    }

    fn queries(log: &QueryLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn service(index: ResolutionIndex) -> WhoisService {
        WhoisService::new(&Config::default(), Arc::new(index))
            .with_stats(false)
            .with_root(Endpoint::new("127.0.0.1", 1))
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
    }

    fn whois_index(servers: &str) -> ResolutionIndex {
        ResolutionIndex::build(
            &RdapBootstrap::default(),
            &WhoisServerMap::from_slice(servers.as_bytes()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_referral_is_followed_exactly_once() {
        let (listener_a, addr_a) = bind().await;
        let (listener_b, addr_b) = bind().await;
        let log_a = serve(listener_a, format!("Domain Name: EXAMPLE.COM\nrefer: 127.0.0.1:{}\n", addr_b.port()));
        let log_b = serve(listener_b, format!("Registrant: Example\nrefer: 127.0.0.1:{}\n", addr_a.port()));

        let result = service(ResolutionIndex::default())
            .lookup("example.com", Some(&addr_a.to_string()))
            .await
            .unwrap();

        assert_eq!(queries(&log_a), vec!["example.com"]);
        assert_eq!(queries(&log_b), vec!["example.com"]);
        assert_eq!(result.server, addr_a.to_string());
        assert_eq!(result.referral_server, Some(addr_b.to_string()));
        assert!(result.raw.starts_with("Domain Name: EXAMPLE.COM\n"));
        assert!(result.raw.contains("Registrant: Example"));
    }

    #[tokio::test]
    async fn test_referral_can_be_disabled() {
        let (listener_a, addr_a) = bind().await;
        let (listener_b, addr_b) = bind().await;
        let log_a = serve(listener_a, format!("refer: 127.0.0.1:{}\n", addr_b.port()));
        let log_b = serve(listener_b, "unused\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_referral(false)
            .lookup("example.com", Some(&addr_a.to_string()))
            .await
            .unwrap();

        assert_eq!(queries(&log_a).len(), 1);
        assert!(queries(&log_b).is_empty());
        assert_eq!(result.referral_server, None);
    }

    #[tokio::test]
    async fn test_referral_to_same_server_is_not_repeated() {
        let (listener, addr) = bind().await;
        let log = serve(listener, format!("whois: 127.0.0.1:{}\n", addr.port()));

        let result = service(ResolutionIndex::default())
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap();

        assert_eq!(queries(&log).len(), 1);
        assert_eq!(result.referral_server, None);
    }

    #[tokio::test]
    async fn test_failed_referral_keeps_first_response() {
        let (listener, addr) = bind().await;
        let (dead, dead_addr) = bind().await;
        drop(dead);
        serve(listener, format!("Domain Name: EXAMPLE.COM\nrefer: 127.0.0.1:{}\n", dead_addr.port()));

        let result = service(ResolutionIndex::default())
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap();

        assert!(result.raw.starts_with("Domain Name: EXAMPLE.COM"));
        assert_eq!(result.referral_server, None);
    }

    #[tokio::test]
    async fn test_stats_trailer() {
        let (listener, addr) = bind().await;
        serve(listener, "Domain Name: EXAMPLE.COM\n\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_stats(true)
            .lookup("example.com.", Some(&addr.to_string()))
            .await
            .unwrap();

        assert_eq!(result.query, "example.com");
        assert!(result.raw.starts_with("Domain Name: EXAMPLE.COM\n\n% Query time: "));
        assert!(result.raw.contains(" msec\n% WHEN: "));
        assert!(result.raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_stats_not_appended_to_empty_response() {
        let (listener, addr) = bind().await;
        serve(listener, " \r\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_stats(true)
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap();

        assert_eq!(result.raw, "");
    }

    #[test]
    fn test_stats_stamp_is_query_start() {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            append_stats("domain: COM".to_string(), Duration::from_millis(42), started_at),
            "domain: COM\n\n% Query time: 42 msec\n% WHEN: Tue Mar 05 07:08:09 UTC 2024\n"
        );
    }

    #[tokio::test]
    async fn test_response_trimmed_without_stats() {
        let (listener, addr) = bind().await;
        serve(listener, "\r\n  Domain Name: EXAMPLE.COM\r\n\r\n".to_string());

        let result = service(ResolutionIndex::default())
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap();

        assert_eq!(result.raw, "Domain Name: EXAMPLE.COM");
    }

    #[tokio::test]
    async fn test_empty_query() {
        let svc = service(ResolutionIndex::default());
        assert!(matches!(svc.lookup("", None).await, Err(LookupError::EmptyQuery)));
        assert!(matches!(svc.lookup("  ..  ", None).await, Err(LookupError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_server_from_tld_table() {
        let (listener, addr) = bind().await;
        let log = serve(listener, "Domain Name: EXAMPLE.TEST\n".to_string());
        let index = whois_index(&format!(r#"{{"servers": {{"test": "127.0.0.1:{}"}}}}"#, addr.port()));

        let result = service(index).lookup("Example.test", None).await.unwrap();
        assert_eq!(queries(&log), vec!["Example.test"]);
        assert_eq!(result.server, addr.to_string());
    }

    #[tokio::test]
    async fn test_server_discovered_from_root() {
        let (root_listener, root_addr) = bind().await;
        let (tld_listener, tld_addr) = bind().await;
        let root_log = serve(root_listener, format!("domain: TEST\nwhois: 127.0.0.1:{}\n", tld_addr.port()));
        let tld_log = serve(tld_listener, "Domain Name: EXAMPLE.TEST\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_root(Endpoint::new("127.0.0.1", root_addr.port()))
            .lookup("example.test", None)
            .await
            .unwrap();

        assert_eq!(queries(&root_log), vec!["test"]);
        assert_eq!(queries(&tld_log), vec!["example.test"]);
        assert_eq!(result.server, tld_addr.to_string());
        assert_eq!(result.raw, "Domain Name: EXAMPLE.TEST");
    }

    #[tokio::test]
    async fn test_bare_query_goes_to_root() {
        let (root_listener, root_addr) = bind().await;
        let root_log = serve(root_listener, "domain: COM\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_root(Endpoint::new("127.0.0.1", root_addr.port()))
            .lookup("com", None)
            .await
            .unwrap();

        assert_eq!(queries(&root_log), vec!["com"]);
        assert_eq!(result.raw, "domain: COM");
    }

    #[tokio::test]
    async fn test_root_without_referral_is_server_not_found() {
        let (root_listener, root_addr) = bind().await;
        serve(root_listener, "% No match\n".to_string());

        let result = service(ResolutionIndex::default())
            .with_root(Endpoint::new("127.0.0.1", root_addr.port()))
            .lookup("example.zz", None)
            .await;

        assert!(matches!(result, Err(LookupError::ServerNotFound(q)) if q == "example.zz"));
    }

    #[tokio::test]
    async fn test_arin_query_prefixes() {
        let (listener, addr) = bind().await;
        let log = serve(listener, "NetRange: 8.0.0.0 - 8.255.255.255\n".to_string());
        let index = whois_index(r#"{"rewrite": {"whois.arin.net": "127.0.0.1"}, "servers": {}}"#);
        let svc = service(index);
        let arin = format!("whois.arin.net:{}", addr.port());

        svc.lookup("8.8.8.8", Some(&arin)).await.unwrap();
        let result = svc.lookup("as13335", Some(&arin)).await.unwrap();

        assert_eq!(queries(&log), vec!["n + 8.8.8.8", "a + AS13335"]);
        assert_eq!(result.query, "AS13335");
        assert_eq!(result.server, arin);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connectivity_error() {
        let (listener, addr) = bind().await;
        drop(listener);

        let err = service(ResolutionIndex::default())
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Connectivity { ref server, .. } if *server == addr.to_string()));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (listener, addr) = bind().await;
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = service(ResolutionIndex::default())
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(200))
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_oversized_response_is_rejected() {
        let (listener, addr) = bind().await;
        serve(listener, "x".repeat(100));

        let err = service(ResolutionIndex::default())
            .with_max_response_size(16)
            .lookup("example.com", Some(&addr.to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::ResponseTooLarge(_)));
    }

    #[tokio::test]
    async fn test_latin1_bytes_are_decoded_lossily() {
        let (listener, addr) = bind().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"owner: M\xfcller\n").await;
        });

        let result = service(ResolutionIndex::default())
            .lookup("example.de", Some(&addr.to_string()))
            .await
            .unwrap();

        assert!(result.raw.starts_with("owner: M"));
        assert!(result.raw.contains('\u{FFFD}'));
    }

    /// A single-connection SOCKS5 server that logs the CONNECT target and the query, then answers as WHOIS.
    async fn socks_fixture(response: &'static str) -> (SocketAddr, QueryLog) {
        let (listener, addr) = bind().await;
        let log: QueryLog = Arc::default();
        let seen = log.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut greeting = [0u8; 2];
            socket.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            socket.read_exact(&mut methods).await.unwrap();
            socket.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request = [0u8; 4];
            socket.read_exact(&mut request).await.unwrap();
            let host = match request[3] {
                0x01 => {
                    let mut octets = [0u8; 4];
                    socket.read_exact(&mut octets).await.unwrap();
                    std::net::Ipv4Addr::from(octets).to_string()
                }
                0x03 => {
                    let len = socket.read_u8().await.unwrap();
                    let mut name = vec![0u8; len as usize];
                    socket.read_exact(&mut name).await.unwrap();
                    String::from_utf8(name).unwrap()
                }
                other => panic!("unexpected address type {}", other),
            };
            let port = socket.read_u16().await.unwrap();
            seen.lock().unwrap().push(format!("{}:{}", host, port));
            socket.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await.unwrap();

            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            seen.lock().unwrap().push(line.trim_end_matches("\r\n").to_string());
            let mut socket = reader.into_inner();
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        (addr, log)
    }

    async fn closed_port() -> SocketAddr {
        let (listener, addr) = bind().await;
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_lookup_through_socks_proxy() {
        let (proxy_addr, log) = socks_fixture("Domain Name: EXAMPLE.COM\r\n").await;
        let proxy = WhoisProxy::parse(&format!("socks5://{}", proxy_addr), "").unwrap();

        let result = service(ResolutionIndex::default())
            .with_proxy(Some(proxy))
            .lookup("example.com", Some("whois.example.test"))
            .await
            .unwrap();

        assert_eq!(queries(&log), vec!["whois.example.test:43", "example.com"]);
        assert_eq!(result.server, "whois.example.test:43");
        assert_eq!(result.raw, "Domain Name: EXAMPLE.COM");
    }

    #[tokio::test]
    async fn test_bypassed_host_is_dialed_directly() {
        let (listener, addr) = bind().await;
        let log = serve(listener, "domain: EXAMPLE.TEST\n".to_string());
        let proxy = WhoisProxy::parse(&format!("socks5://{}", closed_port().await), "127.0.0.1").unwrap();

        let result = service(ResolutionIndex::default())
            .with_proxy(Some(proxy))
            .lookup("example.test", Some(&addr.to_string()))
            .await
            .unwrap();

        assert_eq!(queries(&log), vec!["example.test"]);
        assert_eq!(result.raw, "domain: EXAMPLE.TEST");
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_connectivity_error() {
        let proxy = WhoisProxy::parse(&format!("socks5://{}", closed_port().await), "").unwrap();

        let err = service(ResolutionIndex::default())
            .with_proxy(Some(proxy))
            .lookup("example.com", Some("whois.example.test"))
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Connectivity { ref server, .. } if server == "whois.example.test:43"));
        assert!(!err.is_timeout());
    }
}
