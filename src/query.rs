//! Query classification shared by the resolution index and both protocol clients.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub const ASN_PREFIX: &str = "AS";

static ASN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(as|asn)?[0-9]+$").expect("ASN pattern is a valid regex")
});

/// The three shapes of resource a registry can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Ip,
    Asn,
    Domain,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Ip => "ip",
            QueryKind::Asn => "asn",
            QueryKind::Domain => "domain",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP literal first, then the ASN pattern, everything else is a domain.
pub fn classify(query: &str) -> QueryKind {
    if query.parse::<IpAddr>().is_ok() {
        QueryKind::Ip
    } else if is_asn(query) {
        QueryKind::Asn
    } else {
        QueryKind::Domain
    }
}

/// Digits with an optional case-insensitive `as`/`asn` prefix.
pub fn is_asn(query: &str) -> bool {
    ASN_PATTERN.is_match(query)
}

/// The numeric part of an ASN query, with any `as`/`asn` prefix removed.
pub fn asn_digits(query: &str) -> &str {
    let lower = query.to_ascii_lowercase();
    if lower.starts_with("asn") {
        &query[3..]
    } else if lower.starts_with("as") {
        &query[2..]
    } else {
        query
    }
}

/// Uppercase `AS`-prefixed form sent to WHOIS servers, e.g. `asn13335` becomes `AS13335`.
pub fn canonical_asn(query: &str) -> String {
    format!("{}{}", ASN_PREFIX, asn_digits(query))
}

/// The label after the last dot (the whole query for IP literals), with any `/path` suffix removed.
pub fn extension(query: &str) -> &str {
    let ext = if query.parse::<IpAddr>().is_ok() {
        query
    } else {
        query.rsplit('.').next().unwrap_or(query)
    };

    match ext.find('/') {
        Some(slash) => &ext[..slash],
        None => ext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_asn() {
        let cases = [
            ("", false),
            ("a", false),
            ("ab", false),
            ("as", false),
            ("ab1", false),
            ("as1a", false),
            ("as1", true),
            ("As1", true),
            ("AS1", true),
            ("aSn1", true),
            ("AS123", true),
            ("1", true),
            ("123", true),
        ];

        for (input, expected) in cases {
            assert_eq!(is_asn(input), expected, "is_asn({:?})", input);
        }
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(classify("1.1.1.1"), QueryKind::Ip);
        assert_eq!(classify("2001:db8::1"), QueryKind::Ip);
        assert_eq!(classify("AS13335"), QueryKind::Asn);
        assert_eq!(classify("13335"), QueryKind::Asn);
        assert_eq!(classify("example.com"), QueryKind::Domain);
        assert_eq!(classify("1.1.1.1!"), QueryKind::Domain);
    }

    #[test]
    fn test_asn_digits_and_canonical_form() {
        assert_eq!(asn_digits("asn64512"), "64512");
        assert_eq!(asn_digits("AS64512"), "64512");
        assert_eq!(asn_digits("64512"), "64512");
        assert_eq!(canonical_asn("as1"), "AS1");
        assert_eq!(canonical_asn("ASN1"), "AS1");
        assert_eq!(canonical_asn("1"), "AS1");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("example.com"), "com");
        assert_eq!(extension("example.com/whois"), "com");
        assert_eq!(extension("sub.example.co.uk"), "uk");
        assert_eq!(extension("com"), "com");
        assert_eq!(extension("8.8.8.8"), "8.8.8.8");
    }
}
