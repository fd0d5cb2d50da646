//! Resolution index: routes a query to the server responsible for it.
//!
//! The RDAP half maps address blocks (longest-prefix match), ASN intervals
//! (bisection) and TLDs to RDAP base URLs. The WHOIS half maps TLDs to legacy
//! hosts and carries the host rewrite table and referral host rules.
//!
//! Both halves live in one immutable [`RoutingTable`] snapshot behind an
//! [`ArcSwap`]. Lookups load the current snapshot without blocking, and a
//! reload builds a replacement off to the side before swapping it in.

pub mod asn;
pub mod cidr;

pub use asn::{AsnRange, AsnRanges};
pub use cidr::CidrTable;

use crate::{
    bootstrap::{BootstrapSource, RdapBootstrap, WhoisServerMap},
    errors::LookupError,
    query::{self, QueryKind},
    referral::HostRules,
};
use arc_swap::ArcSwap;
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::{collections::HashMap, net::IpAddr, sync::Arc};
use tracing::{info, warn};

/// RDAP routing built from the four IANA bootstrap categories.
#[derive(Debug, Clone, Default)]
pub struct RdapRoutes {
    networks: CidrTable<String>,
    asns: AsnRanges,
    tlds: HashMap<String, String>,
}

impl RdapRoutes {
    /// Unparsable keys and services without a usable URL are logged and skipped.
    pub fn build(bootstrap: &RdapBootstrap) -> Self {
        let mut networks = CidrTable::new();
        for entry in bootstrap.ipv4.services.iter().chain(&bootstrap.ipv6.services) {
            let Some(base) = entry.base_url() else {
                warn!("Skipping IP bootstrap entry {:?}: no server URL", entry.keys);
                continue;
            };
            for key in &entry.keys {
                match key.trim().parse::<IpNetwork>() {
                    Ok(network) => {
                        networks.insert(network, base.clone());
                    }
                    Err(e) => warn!("Skipping invalid CIDR '{}': {}", key, e),
                }
            }
        }

        let mut ranges = Vec::new();
        for entry in &bootstrap.asn.services {
            let Some(base) = entry.base_url() else {
                warn!("Skipping ASN bootstrap entry {:?}: no server URL", entry.keys);
                continue;
            };
            for key in &entry.keys {
                match AsnRange::parse(key, base.clone()) {
                    Ok(range) => ranges.push(range),
                    Err(e) => warn!("{}", e),
                }
            }
        }

        let mut tlds = HashMap::new();
        for entry in &bootstrap.dns.services {
            let Some(base) = entry.base_url() else {
                warn!("Skipping DNS bootstrap entry {:?}: no server URL", entry.keys);
                continue;
            };
            for key in &entry.keys {
                let tld = key.trim().trim_matches('.').to_lowercase();
                if !tld.is_empty() {
                    tlds.insert(tld, base.clone());
                }
            }
        }

        Self {
            networks,
            asns: AsnRanges::from_ranges(ranges),
            tlds,
        }
    }

    /// Base URL of the most specific network containing `ip`.
    pub fn ip_base(&self, ip: IpAddr) -> Option<&str> {
        self.networks.longest_match(ip).map(|(_, base)| base.as_str())
    }

    pub fn asn_base(&self, asn: u32) -> Option<&str> {
        self.asns.find(asn).map(|range| range.url.as_str())
    }

    pub fn tld_base(&self, tld: &str) -> Option<&str> {
        self.tlds.get(&tld.to_lowercase()).map(String::as_str)
    }
}

/// Legacy WHOIS routing: TLD table, host rewrites and referral host rules.
#[derive(Debug, Clone, Default)]
pub struct WhoisRoutes {
    servers: HashMap<String, String>,
    rewrite: HashMap<String, String>,
    host_rules: HostRules,
}

impl WhoisRoutes {
    pub fn build(map: &WhoisServerMap) -> Self {
        let mut servers = HashMap::with_capacity(map.servers.len());
        for (tld, host) in &map.servers {
            let host = host.trim();
            if host.is_empty() {
                warn!("Skipping WHOIS server entry for '{}': empty host", tld);
                continue;
            }
            servers.insert(tld.trim().trim_matches('.').to_lowercase(), host.to_string());
        }

        let rewrite = map
            .rewrite
            .iter()
            .map(|(advertised, real)| (advertised.trim().to_lowercase(), real.trim().to_string()))
            .collect();

        let host_rules = map
            .strip_prefixes
            .clone()
            .map(HostRules::new)
            .unwrap_or_default();

        Self {
            servers,
            rewrite,
            host_rules,
        }
    }
}

/// One immutable routing snapshot.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub rdap: Arc<RdapRoutes>,
    pub whois: Arc<WhoisRoutes>,
}

/// Outcome of [`ResolutionIndex::resolve`]; `url` is `None` when nothing covers the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: QueryKind,
    pub url: Option<String>,
}

impl Resolution {
    pub fn found(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub ip_networks: usize,
    pub asn_ranges: usize,
    pub rdap_tlds: usize,
    pub whois_tlds: usize,
    pub host_rewrites: usize,
}

#[derive(Debug, Default)]
pub struct ResolutionIndex {
    table: ArcSwap<RoutingTable>,
}

impl ResolutionIndex {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn build(rdap: &RdapBootstrap, whois: &WhoisServerMap) -> Self {
        let index = Self::new(RoutingTable {
            rdap: Arc::new(RdapRoutes::build(rdap)),
            whois: Arc::new(WhoisRoutes::build(whois)),
        });
        info!("Resolution index built: {:?}", index.stats());
        index
    }

    /// Index over the snapshots compiled into the crate.
    pub fn embedded() -> Result<Self, LookupError> {
        Ok(Self::build(&RdapBootstrap::embedded()?, &WhoisServerMap::embedded()?))
    }

    pub async fn load(source: &dyn BootstrapSource) -> Result<Self, LookupError> {
        let rdap = source.rdap().await?;
        let whois = source.whois().await?;
        Ok(Self::build(&rdap, &whois))
    }

    /// Re-read both datasets and swap them in together. On error the current tables stay in place.
    pub async fn reload(&self, source: &dyn BootstrapSource) -> Result<IndexStats, LookupError> {
        let rdap = source.rdap().await?;
        let whois = source.whois().await?;

        let table = RoutingTable {
            rdap: Arc::new(RdapRoutes::build(&rdap)),
            whois: Arc::new(WhoisRoutes::build(&whois)),
        };
        self.table.store(Arc::new(table));

        let stats = self.stats();
        info!("Resolution index reloaded: {:?}", stats);
        Ok(stats)
    }

    /// Replace only the RDAP half; the WHOIS half of the current snapshot is shared.
    pub fn install_rdap(&self, bootstrap: &RdapBootstrap) {
        let rdap = Arc::new(RdapRoutes::build(bootstrap));
        self.table.rcu(|current| RoutingTable {
            rdap: Arc::clone(&rdap),
            whois: Arc::clone(&current.whois),
        });
    }

    /// Replace only the WHOIS half; the RDAP half of the current snapshot is shared.
    pub fn install_whois(&self, map: &WhoisServerMap) {
        let whois = Arc::new(WhoisRoutes::build(map));
        self.table.rcu(|current| RoutingTable {
            rdap: Arc::clone(&current.rdap),
            whois: Arc::clone(&whois),
        });
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Classify `query` and build the RDAP URL for it.
    pub fn resolve(&self, query: &str) -> Resolution {
        let table = self.table.load();
        let rdap = &table.rdap;

        match query::classify(query) {
            QueryKind::Ip => {
                // The canonical text form, so `2001:DB8:0::1` is sent as `2001:db8::1`.
                let url = query
                    .parse::<IpAddr>()
                    .ok()
                    .and_then(|ip| rdap.ip_base(ip).map(|base| format!("{}ip/{}", base, ip)));
                Resolution { kind: QueryKind::Ip, url }
            }
            QueryKind::Asn => {
                let digits = query::asn_digits(query);
                let url = digits
                    .parse::<u32>()
                    .ok()
                    .and_then(|asn| rdap.asn_base(asn))
                    .map(|base| format!("{}autnum/{}", base, digits));
                Resolution { kind: QueryKind::Asn, url }
            }
            QueryKind::Domain => {
                let url = rdap
                    .tld_base(query::extension(query))
                    .map(|base| format!("{}domain/{}", base, query));
                Resolution { kind: QueryKind::Domain, url }
            }
        }
    }

    /// Legacy WHOIS host (optionally `host:port`) for an exact TLD.
    pub fn whois_server(&self, tld: &str) -> Option<String> {
        self.table.load().whois.servers.get(&tld.to_lowercase()).cloned()
    }

    /// The real query host for a host registries advertise incorrectly, else `host` unchanged.
    pub fn rewrite_host(&self, host: &str) -> String {
        match self.table.load().whois.rewrite.get(&host.to_lowercase()) {
            Some(real) => real.clone(),
            None => host.to_string(),
        }
    }

    pub fn host_rules(&self) -> HostRules {
        self.table.load().whois.host_rules.clone()
    }

    pub fn stats(&self) -> IndexStats {
        let table = self.table.load();
        IndexStats {
            ip_networks: table.rdap.networks.len(),
            asn_ranges: table.rdap.asns.len(),
            rdap_tlds: table.rdap.tlds.len(),
            whois_tlds: table.whois.servers.len(),
            host_rewrites: table.whois.rewrite.len(),
        }
    }
}
