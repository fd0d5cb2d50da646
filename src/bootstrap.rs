//! Bootstrap data: which registry serves which TLD, address block and ASN range.
//!
//! Two independent datasets feed the [`ResolutionIndex`](crate::index::ResolutionIndex):
//! the RDAP bootstrap in IANA format (RFC 9224) and the legacy WHOIS server map
//! `{"rewrite": {...}, "servers": {tld: host}}`. Either can come from the
//! snapshot compiled into the crate, from a local file, or (RDAP only) from IANA.

use crate::{
    config::{Config, ONLINE_BOOTSTRAP},
    errors::{ConnectivityCause, LookupError},
};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tracing::{debug, info, warn};
use url::Url;

const EMBEDDED_RDAP: &str = include_str!("../data/rdap.json");
const EMBEDDED_WHOIS_SERVERS: &str = include_str!("../data/servers.json");

/// One IANA bootstrap document (`dns.json`, `ipv4.json`, `ipv6.json` or `asn.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapDataset {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub publication: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub version: Option<String>,
}

impl BootstrapDataset {
    pub fn from_slice(data: &[u8]) -> Result<Self, LookupError> {
        serde_json::from_slice(data)
            .map_err(|e| LookupError::Bootstrap(format!("invalid bootstrap document: {}", e)))
    }
}

/// A `[[keys...], [urls...]]` service entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Vec<String>>", into = "Vec<Vec<String>>")]
pub struct ServiceEntry {
    pub keys: Vec<String>,
    pub urls: Vec<String>,
}

impl From<Vec<Vec<String>>> for ServiceEntry {
    fn from(mut parts: Vec<Vec<String>>) -> Self {
        if parts.len() < 2 {
            return ServiceEntry {
                keys: parts.pop().unwrap_or_default(),
                urls: Vec::new(),
            };
        }
        let urls = std::mem::take(&mut parts[1]);
        let keys = std::mem::take(&mut parts[0]);
        ServiceEntry { keys, urls }
    }
}

impl From<ServiceEntry> for Vec<Vec<String>> {
    fn from(entry: ServiceEntry) -> Self {
        vec![entry.keys, entry.urls]
    }
}

impl ServiceEntry {
    /// Preferred base URL: the first `https://` one, else the first listed, always ending in `/`.
    pub fn base_url(&self) -> Option<String> {
        let url = self
            .urls
            .iter()
            .find(|u| u.to_ascii_lowercase().starts_with("https://"))
            .or_else(|| self.urls.first())?
            .trim();

        if url.is_empty() {
            return None;
        }

        if url.ends_with('/') {
            Some(url.to_string())
        } else {
            Some(format!("{}/", url))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Dns,
    Ipv4,
    Ipv6,
    Asn,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Dns, Category::Ipv4, Category::Ipv6, Category::Asn];

    pub fn file_name(&self) -> &'static str {
        match self {
            Category::Dns => "dns.json",
            Category::Ipv4 => "ipv4.json",
            Category::Ipv6 => "ipv6.json",
            Category::Asn => "asn.json",
        }
    }
}

/// All four RDAP categories. Also the layout of a combined bootstrap file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RdapBootstrap {
    #[serde(default)]
    pub ipv4: BootstrapDataset,
    #[serde(default)]
    pub ipv6: BootstrapDataset,
    #[serde(default)]
    pub asn: BootstrapDataset,
    #[serde(default)]
    pub dns: BootstrapDataset,
}

impl RdapBootstrap {
    pub fn from_slice(data: &[u8]) -> Result<Self, LookupError> {
        serde_json::from_slice(data)
            .map_err(|e| LookupError::Bootstrap(format!("invalid RDAP bootstrap file: {}", e)))
    }

    pub fn embedded() -> Result<Self, LookupError> {
        Self::from_slice(EMBEDDED_RDAP.as_bytes())
    }

    fn set(&mut self, category: Category, dataset: BootstrapDataset) {
        match category {
            Category::Dns => self.dns = dataset,
            Category::Ipv4 => self.ipv4 = dataset,
            Category::Ipv6 => self.ipv6 = dataset,
            Category::Asn => self.asn = dataset,
        }
    }
}

/// Legacy WHOIS routing: TLD to host, plus corrections for hostnames registries advertise wrongly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhoisServerMap {
    #[serde(default)]
    pub rewrite: HashMap<String, String>,
    #[serde(default)]
    pub servers: HashMap<String, String>,
    /// Overrides the URL schemes stripped from referral hostnames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefixes: Option<Vec<String>>,
}

impl WhoisServerMap {
    pub fn from_slice(data: &[u8]) -> Result<Self, LookupError> {
        serde_json::from_slice(data)
            .map_err(|e| LookupError::Bootstrap(format!("invalid WHOIS server map: {}", e)))
    }

    pub fn embedded() -> Result<Self, LookupError> {
        Self::from_slice(EMBEDDED_WHOIS_SERVERS.as_bytes())
    }
}

#[async_trait]
pub trait BootstrapSource: Send + Sync {
    async fn rdap(&self) -> Result<RdapBootstrap, LookupError>;
    async fn whois(&self) -> Result<WhoisServerMap, LookupError>;
}

/// Already-decoded datasets, handed out as-is.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub rdap: RdapBootstrap,
    pub whois: WhoisServerMap,
}

#[async_trait]
impl BootstrapSource for StaticSource {
    async fn rdap(&self) -> Result<RdapBootstrap, LookupError> {
        Ok(self.rdap.clone())
    }

    async fn whois(&self) -> Result<WhoisServerMap, LookupError> {
        Ok(self.whois.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdapOrigin {
    Embedded,
    File(PathBuf),
    Iana(String),
}

/// Source selected by `rdap_bootstrap` / `whois_servers` in [`Config`].
pub struct ConfiguredSource {
    rdap: RdapOrigin,
    whois: Option<PathBuf>,
    client: reqwest::Client,
}

impl ConfiguredSource {
    pub fn from_config(config: &Config) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(config.bootstrap_timeout())
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()?;

        let rdap = match config.rdap_bootstrap.trim() {
            "" => RdapOrigin::Embedded,
            ONLINE_BOOTSTRAP => RdapOrigin::Iana(config.iana_bootstrap_url.clone()),
            path => RdapOrigin::File(PathBuf::from(path)),
        };

        let whois = match config.whois_servers.trim() {
            "" => None,
            path => Some(PathBuf::from(path)),
        };

        Ok(Self::new(rdap, whois, client))
    }

    pub fn new(rdap: RdapOrigin, whois: Option<PathBuf>, client: reqwest::Client) -> Self {
        Self { rdap, whois, client }
    }

    async fn fetch_iana(&self, base_url: &str) -> Result<RdapBootstrap, LookupError> {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&base)
            .map_err(|e| LookupError::Bootstrap(format!("invalid bootstrap URL '{}': {}", base_url, e)))?;

        info!("Fetching RDAP bootstrap data from {}", base);

        let documents = try_join_all(Category::ALL.iter().map(|category| self.fetch_category(&base, *category))).await?;

        let mut bootstrap = RdapBootstrap::default();
        for (category, dataset) in documents {
            bootstrap.set(category, dataset);
        }
        Ok(bootstrap)
    }

    async fn fetch_category(&self, base: &Url, category: Category) -> Result<(Category, BootstrapDataset), LookupError> {
        let url = base
            .join(category.file_name())
            .map_err(|e| LookupError::Bootstrap(format!("invalid bootstrap URL: {}", e)))?;

        debug!("Requesting {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LookupError::connectivity(url.as_str(), ConnectivityCause::Http(e)))?;

        if !response.status().is_success() {
            return Err(LookupError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LookupError::connectivity(url.as_str(), ConnectivityCause::Http(e)))?;

        Ok((category, BootstrapDataset::from_slice(&body)?))
    }
}

#[async_trait]
impl BootstrapSource for ConfiguredSource {
    async fn rdap(&self) -> Result<RdapBootstrap, LookupError> {
        match &self.rdap {
            RdapOrigin::Embedded => {
                debug!("Reading embedded RDAP bootstrap snapshot");
                RdapBootstrap::embedded()
            }
            RdapOrigin::File(path) => {
                info!("Reading RDAP bootstrap from {}", path.display());
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| LookupError::Bootstrap(format!("cannot read {}: {}", path.display(), e)))?;
                RdapBootstrap::from_slice(&data)
            }
            RdapOrigin::Iana(base_url) => match self.fetch_iana(base_url).await {
                Ok(bootstrap) => Ok(bootstrap),
                Err(e) => {
                    warn!("Failed to fetch RDAP bootstrap from IANA ({}), using embedded snapshot", e);
                    RdapBootstrap::embedded()
                }
            },
        }
    }

    async fn whois(&self) -> Result<WhoisServerMap, LookupError> {
        match &self.whois {
            None => {
                debug!("Reading embedded WHOIS server map");
                WhoisServerMap::embedded()
            }
            Some(path) => {
                info!("Reading WHOIS server map from {}", path.display());
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| LookupError::Bootstrap(format!("cannot read {}: {}", path.display(), e)))?;
                WhoisServerMap::from_slice(&data)
            }
        }
    }
}
