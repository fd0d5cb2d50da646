//! Typed records produced from RDAP responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DNSSEC_UNSIGNED: &str = "unsigned";
pub const DNSSEC_SIGNED: &str = "signedDelegation";
pub const UNKNOWN_NETWORK_TYPE: &str = "Unknown";

/// Registration lifecycle dates, kept both as published and parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(default)]
    pub created_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_in_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date_in_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date_in_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    /// `unsigned` or `signedDelegation`.
    #[serde(default)]
    pub dnssec: String,
    #[serde(default)]
    pub dnssec_ds_data: String,
    #[serde(flatten)]
    pub dates: Lifecycle,
    #[serde(default)]
    pub registrar: String,
    #[serde(default)]
    pub registrar_iana_id: String,
    #[serde(default)]
    pub last_updated_of_rdapdb: String,
}

/// IP network record, serialized with the display-style keys registry clients expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    /// The registry handle of the network.
    #[serde(default, rename = "IP Network")]
    pub ip_network: String,
    #[serde(default, rename = "Address Range")]
    pub range: String,
    #[serde(default, rename = "Network Name")]
    pub network_name: String,
    #[serde(default, rename = "CIDR")]
    pub cidr: String,
    #[serde(default, rename = "Network Type")]
    pub network_type: String,
    #[serde(default, rename = "Country")]
    pub country: String,
    #[serde(default, rename = "Status")]
    pub status: Vec<String>,
    #[serde(default, rename = "Creation Date")]
    pub created_date: String,
    #[serde(default, rename = "Updated Date")]
    pub updated_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnInfo {
    #[serde(default, rename = "AS Number")]
    pub as_number: String,
    #[serde(default, rename = "Network Name")]
    pub network_name: String,
    #[serde(default, rename = "Status")]
    pub status: Vec<String>,
    #[serde(default, rename = "Creation Date")]
    pub created_date: String,
    #[serde(default, rename = "Updated Date")]
    pub updated_date: String,
}

/// One normalized RDAP object, serialized as `{"type": ..., "info": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "info")]
pub enum NormalizedRecord {
    #[serde(rename = "domain")]
    Domain(DomainInfo),
    #[serde(rename = "autnum")]
    Autnum(AsnInfo),
    #[serde(rename = "ip network")]
    IpNetwork(IpInfo),
}

impl NormalizedRecord {
    pub fn object_class(&self) -> &'static str {
        match self {
            NormalizedRecord::Domain(_) => "domain",
            NormalizedRecord::Autnum(_) => "autnum",
            NormalizedRecord::IpNetwork(_) => "ip network",
        }
    }
}
