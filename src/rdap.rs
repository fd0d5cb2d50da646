//! RDAP (Registration Data Access Protocol) client.
//!
//! The base URL comes from the [`ResolutionIndex`]; the response is returned
//! as a raw JSON object for the normalizer. Domain responses may name a more
//! specific server through a `related` link, which is followed at most once.

use crate::{
    config::Config,
    errors::{ConnectivityCause, LookupError},
    index::ResolutionIndex,
    json::JsonObjectExt,
    query::QueryKind,
};
use reqwest::{header::ACCEPT, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const RELATED_REL: &str = "related";

#[derive(Debug, Clone, PartialEq)]
pub struct RdapResponse {
    pub kind: QueryKind,
    /// The URL whose response is in `body` (the referral target when one was followed).
    pub url: String,
    pub body: Map<String, Value>,
}

#[derive(Clone)]
pub struct RdapService {
    client: reqwest::Client,
    index: Arc<ResolutionIndex>,
    follow_referral: bool,
}

impl RdapService {
    pub fn new(config: &Config, index: Arc<ResolutionIndex>) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(config.rdap_timeout())
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()?;

        info!(
            "RdapService initialized (timeout {}s, referral {})",
            config.rdap_timeout_seconds, config.rdap_follow_referral
        );

        Ok(Self::with_client(client, index, config.rdap_follow_referral))
    }

    pub fn with_client(client: reqwest::Client, index: Arc<ResolutionIndex>, follow_referral: bool) -> Self {
        Self {
            client,
            index,
            follow_referral,
        }
    }

    pub fn with_referral(mut self, follow_referral: bool) -> Self {
        self.follow_referral = follow_referral;
        self
    }

    pub fn follows_referrals(&self) -> bool {
        self.follow_referral
    }

    pub async fn lookup(&self, query: &str) -> Result<RdapResponse, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LookupError::EmptyQuery);
        }

        let resolution = self.index.resolve(query);
        let Some(url) = resolution.url else {
            return Err(LookupError::ServerNotFound(query.to_string()));
        };

        let body = self.fetch(&url).await?;
        let first = RdapResponse {
            kind: resolution.kind,
            url,
            body,
        };

        if !self.follow_referral || first.kind != QueryKind::Domain {
            return Ok(first);
        }

        let Some(related) = related_link(&first.body) else {
            return Ok(first);
        };

        debug!("Following RDAP related link from {} to {}", first.url, related);
        match self.fetch(related.as_str()).await {
            Ok(body) => Ok(RdapResponse {
                kind: first.kind,
                url: related.to_string(),
                body,
            }),
            Err(e) => {
                warn!("RDAP referral to {} failed, keeping {} response: {}", related, first.url, e);
                Ok(first)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Map<String, Value>, LookupError> {
        debug!("Querying RDAP server: {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| LookupError::connectivity(url, ConnectivityCause::Http(e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(LookupError::NotFound(url.to_string())),
            status => {
                return Err(LookupError::UnexpectedStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                })
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LookupError::connectivity(url, ConnectivityCause::Http(e)))?;

        debug!("RDAP response length: {} bytes", bytes.len());

        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(body)) => Ok(body),
            Ok(_) => Err(LookupError::MalformedResponse(format!("{} did not return a JSON object", url))),
            Err(e) => Err(LookupError::MalformedResponse(format!("{}: {}", url, e))),
        }
    }
}

/// The `value` of the first `links[]` entry with `rel: related` and a string `value`,
/// if it is an absolute URL.
fn related_link(body: &Map<String, Value>) -> Option<Url> {
    let value = body
        .array_field("links")?
        .iter()
        .filter_map(Value::as_object)
        .filter(|link| link.str_field("rel") == Some(RELATED_REL))
        .find_map(|link| link.str_field("value"))?;

    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        _ => {
            debug!("Ignoring unusable related link: {}", value);
            None
        }
    }
}
