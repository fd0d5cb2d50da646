//! Referral extraction from raw WHOIS text.
//!
//! Registries point at a more specific server with one of a handful of
//! line markers. The markers are tried in priority order and the first one
//! present anywhere in the response wins; its value is normalized into a
//! bare `host[:port]`.

use std::fmt;

/// Markers tried in priority order.
pub const REFERRAL_MARKERS: [&str; 4] = [
    "Registrar WHOIS Server: ",
    "whois: ",
    "ReferralServer: ",
    "refer: ",
];

pub const DEFAULT_STRIP_PREFIXES: [&str; 4] = ["http://", "https://", "whois://", "rwhois://"];

/// A WHOIS server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// How advertised referral hostnames are cleaned up before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRules {
    strip_prefixes: Vec<String>,
}

impl Default for HostRules {
    fn default() -> Self {
        Self::new(DEFAULT_STRIP_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl HostRules {
    pub fn new(strip_prefixes: Vec<String>) -> Self {
        Self {
            strip_prefixes: strip_prefixes.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Lower-case, drop URL schemes and any path, and turn `www.` hosts into `whois.` hosts.
    pub fn normalize(&self, raw: &str) -> String {
        let mut host = raw.trim().to_lowercase();

        for prefix in &self.strip_prefixes {
            if let Some(rest) = host.strip_prefix(prefix.as_str()) {
                host = rest.to_string();
            }
        }

        if let Some(slash) = host.find('/') {
            host.truncate(slash);
        }

        if let Some(rest) = host.strip_prefix("www.whois.") {
            host = format!("whois.{}", rest);
        } else if let Some(rest) = host.strip_prefix("www.") {
            host = format!("whois.{}", rest);
        }

        host
    }
}

pub fn normalize_host(raw: &str) -> String {
    HostRules::default().normalize(raw)
}

/// Split `host`, `host:port` or `[v6]:port`. An unparsable port falls back to `default_port`.
pub fn parse_endpoint(raw: &str, default_port: u16) -> Option<Endpoint> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        return (!host.is_empty()).then(|| Endpoint::new(host, port));
    }

    match raw.split_once(':') {
        // More than one colon is a bare IPv6 literal.
        Some((_, rest)) if rest.contains(':') => Some(Endpoint::new(raw, default_port)),
        Some((host, port)) => {
            if host.is_empty() {
                return None;
            }
            Some(Endpoint::new(host, port.trim().parse().unwrap_or(default_port)))
        }
        None => Some(Endpoint::new(raw, default_port)),
    }
}

/// The referral server named by the first marker present in `text`, if any.
pub fn extract_referral(text: &str, rules: &HostRules, default_port: u16) -> Option<Endpoint> {
    REFERRAL_MARKERS.iter().find_map(|marker| {
        let start = text.find(marker)? + marker.len();
        let value = text[start..].split('\n').next().unwrap_or_default();
        Some(parse_endpoint(&rules.normalize(value), default_port))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("HTTP://WWW.WHOIS.EXAMPLE.COM/path"), "whois.example.com");
        assert_eq!(normalize_host("https://www.registrar.example/whois"), "whois.registrar.example");
        assert_eq!(normalize_host("rwhois://rwhois.example.net:4321"), "rwhois.example.net:4321");
        assert_eq!(normalize_host("  whois.nic.example \r"), "whois.nic.example");
    }

    #[test]
    fn test_normalize_host_is_idempotent() {
        for raw in ["HTTP://WWW.WHOIS.EXAMPLE.COM/path", "Whois://www.example.org", "whois.markmonitor.com"] {
            let once = normalize_host(raw);
            assert_eq!(normalize_host(&once), once);
        }
    }

    #[test]
    fn test_custom_strip_prefixes() {
        let rules = HostRules::new(vec!["TELNET://".to_string()]);
        assert_eq!(rules.normalize("telnet://whois.example.net"), "whois.example.net");
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("whois.arin.net", 43), Some(Endpoint::new("whois.arin.net", 43)));
        assert_eq!(parse_endpoint("rwhois.example.net:4321", 43), Some(Endpoint::new("rwhois.example.net", 4321)));
        assert_eq!(parse_endpoint("whois.example.net:abc", 43), Some(Endpoint::new("whois.example.net", 43)));
        assert_eq!(parse_endpoint("[2001:db8::1]:4343", 43), Some(Endpoint::new("2001:db8::1", 4343)));
        assert_eq!(parse_endpoint("2001:db8::1", 43), Some(Endpoint::new("2001:db8::1", 43)));
        assert_eq!(parse_endpoint("", 43), None);
        assert_eq!(parse_endpoint(":43", 43), None);
    }

    #[test]
    fn test_marker_priority() {
        let rules = HostRules::default();
        let text = "refer: whois.iana-refer.example\n\
                    Registrar WHOIS Server: whois.registrar.example\n\
                    whois: whois.tld.example\n";
        assert_eq!(
            extract_referral(text, &rules, 43),
            Some(Endpoint::new("whois.registrar.example", 43))
        );

        let text = "ReferralServer: rwhois://rwhois.example.net:4321/\nrefer: whois.example.org\n";
        assert_eq!(
            extract_referral(text, &rules, 43),
            Some(Endpoint::new("rwhois.example.net", 4321))
        );
    }

    #[test]
    fn test_referral_at_end_of_text_without_newline() {
        let rules = HostRules::default();
        assert_eq!(
            extract_referral("domain: COM\nrefer: whois.verisign-grs.com", &rules, 43),
            Some(Endpoint::new("whois.verisign-grs.com", 43))
        );
    }

    #[test]
    fn test_no_referral() {
        let rules = HostRules::default();
        assert_eq!(extract_referral("Domain Name: EXAMPLE.COM\n", &rules, 43), None);
        assert_eq!(extract_referral("Registrar WHOIS Server: \n", &rules, 43), None);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("whois.iana.org", 43).to_string(), "whois.iana.org:43");
        assert_eq!(Endpoint::new("::1", 4343).to_string(), "[::1]:4343");
    }
}
