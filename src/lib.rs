//! # whodat
//!
//! Registration data lookups for domains, IP addresses and AS numbers over
//! both WHOIS (TCP port 43) and RDAP (JSON over HTTPS).
//!
//! ## Features
//!
//! - Authoritative server resolution from IANA bootstrap data, reloadable at runtime
//! - WHOIS referral chasing with loop suppression
//! - RDAP `related` link chasing for domains
//! - RDAP responses normalized into typed domain / IP network / autnum records
//! - Pluggable free-text WHOIS parsers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use whodat::RegistryClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new().await?;
//!
//!     let rdap = client.rdap("AS13335", false).await?;
//!     println!("{} via {}", rdap.record.object_class(), rdap.url);
//!
//!     let whois = client.whois("example.com", true).await?;
//!     println!("{}", whois.raw);
//!
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod dates;
pub mod errors;
pub mod index;
pub mod json;
#[cfg(feature = "server")]
pub mod metrics;
pub mod normalizer;
pub mod parser;
pub mod proxy;
pub mod query;
pub mod rdap;
pub mod records;
pub mod referral;
pub mod whois;

pub use bootstrap::{BootstrapSource, ConfiguredSource, StaticSource};
pub use config::Config;
pub use errors::LookupError;
pub use index::{IndexStats, ResolutionIndex};
pub use parser::{ParserRegistry, WhoisInfo, WhoisParser};
pub use proxy::WhoisProxy;
pub use query::QueryKind;
pub use rdap::RdapService;
pub use records::NormalizedRecord;
pub use whois::{WhoisResult, WhoisService};

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// A WHOIS lookup with its free-text answer run through the parser registry.
#[derive(Debug, Clone, Serialize)]
pub struct WhoisLookup {
    pub query: String,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_server: Option<String>,
    pub raw: String,
    pub parsed: WhoisInfo,
}

/// A normalized RDAP lookup. Serializes as `{"kind", "url", "type", "info"}`.
#[derive(Debug, Clone, Serialize)]
pub struct RdapInfo {
    pub kind: QueryKind,
    pub url: String,
    #[serde(flatten)]
    pub record: NormalizedRecord,
}

/// High-level client over one shared resolution index.
#[derive(Clone)]
pub struct RegistryClient {
    config: Arc<Config>,
    index: Arc<ResolutionIndex>,
    source: Arc<dyn BootstrapSource>,
    whois: WhoisService,
    rdap: RdapService,
    parsers: Arc<ParserRegistry>,
}

impl RegistryClient {
    /// Create a client from the environment-backed configuration.
    pub async fn new() -> Result<Self, LookupError> {
        let config = Arc::new(Config::load()?);
        Self::new_with_config(config).await
    }

    /// Create a client with custom configuration, loading bootstrap data from the sources it names.
    pub async fn new_with_config(config: Arc<Config>) -> Result<Self, LookupError> {
        let source: Arc<dyn BootstrapSource> = Arc::new(ConfiguredSource::from_config(&config)?);
        let index = Arc::new(ResolutionIndex::load(source.as_ref()).await?);
        Self::with_index(config, index, source)
    }

    /// Create a client around an existing index. `source` is what [`reload`](Self::reload) reads from.
    pub fn with_index(
        config: Arc<Config>,
        index: Arc<ResolutionIndex>,
        source: Arc<dyn BootstrapSource>,
    ) -> Result<Self, LookupError> {
        let whois = WhoisService::new(&config, Arc::clone(&index));
        let rdap = RdapService::new(&config, Arc::clone(&index))?;

        Ok(Self {
            config,
            index,
            source,
            whois,
            rdap,
            parsers: Arc::new(ParserRegistry::default()),
        })
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Arc::new(parsers);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<ResolutionIndex> {
        &self.index
    }

    pub async fn whois(&self, query: &str, follow_referral: bool) -> Result<WhoisLookup, LookupError> {
        let result = self.whois.clone().with_referral(follow_referral).lookup(query, None).await?;

        // The server that produced the final text decides the parser.
        let answered_by = result.referral_server.as_deref().unwrap_or(&result.server);
        let parsed = self.parsers.parse(answered_by, &result.raw)?;

        Ok(WhoisLookup {
            query: result.query,
            server: result.server,
            referral_server: result.referral_server,
            raw: result.raw,
            parsed,
        })
    }

    pub async fn rdap(&self, query: &str, follow_referral: bool) -> Result<RdapInfo, LookupError> {
        let response = self.rdap.clone().with_referral(follow_referral).lookup(query).await?;
        let record = normalizer::normalize_object(&response.body);

        Ok(RdapInfo {
            kind: response.kind,
            url: response.url,
            record,
        })
    }

    /// The raw RDAP object, for callers that want fields the normalizer drops.
    pub async fn rdap_raw(&self, query: &str, follow_referral: bool) -> Result<Value, LookupError> {
        let response = self.rdap.clone().with_referral(follow_referral).lookup(query).await?;
        Ok(Value::Object(response.body))
    }

    pub async fn reload(&self) -> Result<IndexStats, LookupError> {
        let stats = self.index.reload(self.source.as_ref()).await?;
        info!(
            "Bootstrap data reloaded: {} IP networks, {} ASN ranges, {} RDAP TLDs, {} WHOIS TLDs",
            stats.ip_networks, stats.asn_ranges, stats.rdap_tlds, stats.whois_tlds
        );
        Ok(stats)
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootstrap::{RdapBootstrap, WhoisServerMap};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rdap_bootstrap(base: &str) -> RdapBootstrap {
        RdapBootstrap::from_slice(
            json!({
                "dns": {"services": [[["test"], [format!("{}/", base)]]]},
                "asn": {"services": [[["64496-64511"], [format!("{}/", base)]]]}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    fn whois_map(server: &str) -> WhoisServerMap {
        WhoisServerMap {
            servers: HashMap::from([("test".to_string(), server.to_string())]),
            ..Default::default()
        }
    }

    fn client_for(source: StaticSource) -> RegistryClient {
        let index = Arc::new(ResolutionIndex::build(&source.rdap, &source.whois));
        let config = Arc::new(Config {
            whois_stats: false,
            ..Config::default()
        });
        RegistryClient::with_index(config, index, Arc::new(source)).unwrap()
    }

    /// Answers every connection with `response` after reading the query line.
    async fn whois_fixture(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_whois_lookup_is_parsed() {
        let server = whois_fixture("Domain Name: EXAMPLE.TEST\nRegistrar: Example Registrar\n").await;
        let client = client_for(StaticSource {
            rdap: RdapBootstrap::default(),
            whois: whois_map(&server),
        });

        let lookup = client.whois("example.test", false).await.unwrap();
        assert_eq!(lookup.server, server);
        assert_eq!(lookup.referral_server, None);
        assert!(lookup.raw.starts_with("Domain Name: EXAMPLE.TEST"));
        assert_eq!(lookup.parsed.domain.unwrap().domain, "example.test");
        assert_eq!(lookup.parsed.registrar.unwrap().name, "Example Registrar");
    }

    #[tokio::test]
    async fn test_blank_whois_answer_is_a_parse_error() {
        let server = whois_fixture("\r\n").await;
        let client = client_for(StaticSource {
            rdap: RdapBootstrap::default(),
            whois: whois_map(&server),
        });

        assert!(matches!(client.whois("example.test", false).await, Err(LookupError::Parse(_))));
    }

    #[tokio::test]
    async fn test_rdap_lookup_is_normalized() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/autnum/64500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objectClassName": "autnum",
                "handle": "AS64500",
                "name": "EXAMPLE-NET",
                "status": ["active"]
            })))
            .mount(&mock)
            .await;

        let client = client_for(StaticSource {
            rdap: rdap_bootstrap(&mock.uri()),
            whois: WhoisServerMap::default(),
        });

        let info = client.rdap("as64500", false).await.unwrap();
        assert_eq!(info.kind, QueryKind::Asn);
        assert_eq!(info.url, format!("{}/autnum/64500", mock.uri()));

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["kind"], "asn");
        assert_eq!(value["type"], "autnum");
        assert_eq!(value["info"]["Network Name"], "EXAMPLE-NET");
    }

    #[tokio::test]
    async fn test_unroutable_queries() {
        let client = client_for(StaticSource::default());
        assert!(matches!(client.rdap("example.zz", false).await, Err(LookupError::ServerNotFound(_))));
        assert!(matches!(client.rdap("", false).await, Err(LookupError::EmptyQuery)));
        assert!(matches!(client.whois("  ", false).await, Err(LookupError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_reload_swaps_in_new_data() {
        let mock = MockServer::start().await;
        let source = StaticSource {
            rdap: rdap_bootstrap(&mock.uri()),
            whois: whois_map("whois.example.test"),
        };
        let index = Arc::new(ResolutionIndex::build(&RdapBootstrap::default(), &WhoisServerMap::default()));
        let client = RegistryClient::with_index(Arc::new(Config::default()), index, Arc::new(source)).unwrap();

        assert_eq!(client.stats().rdap_tlds, 0);
        assert!(!client.index().resolve("example.test").found());

        let stats = client.reload().await.unwrap();
        assert_eq!(stats.rdap_tlds, 1);
        assert_eq!(stats.asn_ranges, 1);
        assert_eq!(stats.whois_tlds, 1);
        assert_eq!(
            client.index().resolve("example.test").url.as_deref(),
            Some(format!("{}/domain/example.test", mock.uri()).as_str())
        );
        assert_eq!(client.index().whois_server("test").as_deref(), Some("whois.example.test"));
    }
}
