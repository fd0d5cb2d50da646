//! SOCKS5 dialing for WHOIS connections.
//!
//! The proxy comes from `whois_proxy` (or the conventional `ALL_PROXY`) as a
//! `socks5://[user:pass@]host[:port]` URL. Hosts matched by the bypass list
//! (`whois_no_proxy` / `NO_PROXY`) are dialed directly. Target hostnames are
//! handed to the proxy unresolved.

use crate::{config::Config, errors::LookupError, referral::Endpoint};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_SOCKS_PORT: u16 = 1080;

const SOCKS_SCHEMES: [&str; 2] = ["socks5", "socks5h"];

/// One `NO_PROXY` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bypass {
    Ip(IpAddr),
    Network(IpNetwork),
    /// Stored with a leading dot; also matches the bare domain.
    Zone(String),
    Host(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoisProxy {
    server: Endpoint,
    credentials: Option<(String, String)>,
    bypass: Vec<Bypass>,
}

impl WhoisProxy {
    /// Parse a proxy URL and a comma-separated bypass list.
    pub fn parse(proxy_url: &str, no_proxy: &str) -> Result<Self, LookupError> {
        let url = Url::parse(proxy_url.trim()).map_err(|e| invalid(proxy_url, &e.to_string()))?;

        if !SOCKS_SCHEMES.contains(&url.scheme()) {
            return Err(invalid(proxy_url, &format!("unsupported scheme {}", url.scheme())));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid(proxy_url, "missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let credentials = match (url.username(), url.password()) {
            ("", None) => None,
            (user, pass) => Some((user.to_string(), pass.unwrap_or_default().to_string())),
        };

        Ok(Self {
            server: Endpoint::new(host, url.port().unwrap_or(DEFAULT_SOCKS_PORT)),
            credentials,
            bypass: parse_bypass(no_proxy),
        })
    }

    /// The configured proxy, if any. An unusable value is logged and ignored so lookups go direct.
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.whois_proxy.trim().is_empty() {
            return None;
        }

        match Self::parse(&config.whois_proxy, &config.whois_no_proxy) {
            Ok(proxy) => {
                info!("WHOIS connections go through SOCKS5 proxy {}", proxy.server);
                Some(proxy)
            }
            Err(e) => {
                warn!("Ignoring WHOIS proxy setting: {}", e);
                None
            }
        }
    }

    pub fn server(&self) -> &Endpoint {
        &self.server
    }

    /// Whether `host` should be dialed without the proxy.
    pub fn bypasses(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.bypass.iter().any(|entry| match entry {
                Bypass::Ip(bypass) => *bypass == ip,
                Bypass::Network(net) => net.contains(ip),
                _ => false,
            });
        }

        self.bypass.iter().any(|entry| match entry {
            Bypass::Zone(zone) => host.ends_with(zone.as_str()) || host == zone[1..],
            Bypass::Host(bypass) => *bypass == host,
            _ => false,
        })
    }

    /// Open a tunnel to `target`. The returned stream carries the target's bytes.
    pub async fn connect(&self, target: &Endpoint) -> Result<TcpStream, tokio_socks::Error> {
        let proxy = (self.server.host.as_str(), self.server.port);
        let destination = (target.host.as_str(), target.port);

        let stream = match &self.credentials {
            Some((user, pass)) => Socks5Stream::connect_with_password(proxy, destination, user, pass).await?,
            None => Socks5Stream::connect(proxy, destination).await?,
        };

        Ok(stream.into_inner())
    }
}

fn invalid(proxy_url: &str, reason: &str) -> LookupError {
    LookupError::ConfigError(config::ConfigError::Message(format!(
        "invalid WHOIS proxy {}: {}",
        proxy_url, reason
    )))
}

fn parse_bypass(no_proxy: &str) -> Vec<Bypass> {
    no_proxy
        .split(',')
        .map(|entry| entry.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.contains('/') {
                if let Ok(net) = entry.parse::<IpNetwork>() {
                    return Bypass::Network(net);
                }
            }
            if let Ok(ip) = entry.parse::<IpAddr>() {
                return Bypass::Ip(ip);
            }
            if let Some(zone) = entry.strip_prefix("*.") {
                return Bypass::Zone(format!(".{}", zone));
            }
            if entry.starts_with('.') {
                return Bypass::Zone(entry);
            }
            Bypass::Host(entry)
        })
        .collect()
}
