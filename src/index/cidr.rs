use ipnetwork::IpNetwork;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

type PrefixBucket<V> = HashMap<IpAddr, (IpNetwork, V)>;

/// Longest-prefix-match table: one exact-match bucket per prefix length, searched from the most specific down.
#[derive(Debug, Clone)]
pub struct CidrTable<V> {
    v4: BTreeMap<u8, PrefixBucket<V>>,
    v6: BTreeMap<u8, PrefixBucket<V>>,
    len: usize,
}

impl<V> Default for CidrTable<V> {
    fn default() -> Self {
        Self {
            v4: BTreeMap::new(),
            v6: BTreeMap::new(),
            len: 0,
        }
    }
}

impl<V> CidrTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host bits in `network` are masked off. Returns the value previously stored for the same network.
    pub fn insert(&mut self, network: IpNetwork, value: V) -> Option<V> {
        let prefix = network.prefix();
        let base = network.network();
        let canonical = match IpNetwork::new(base, prefix) {
            Ok(net) => net,
            Err(_) => network,
        };

        let buckets = match base {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };

        let previous = buckets
            .entry(prefix)
            .or_default()
            .insert(base, (canonical, value))
            .map(|(_, v)| v);

        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// The most specific network containing `ip`.
    pub fn longest_match(&self, ip: IpAddr) -> Option<(&IpNetwork, &V)> {
        self.buckets_for(ip).iter().rev().find_map(|(prefix, bucket)| {
            let masked = IpNetwork::new(ip, *prefix).ok()?.network();
            bucket.get(&masked).map(|(net, value)| (net, value))
        })
    }

    /// Every network containing `ip`, most specific first.
    pub fn containing(&self, ip: IpAddr) -> Vec<(&IpNetwork, &V)> {
        self.buckets_for(ip)
            .iter()
            .rev()
            .filter_map(|(prefix, bucket)| {
                let masked = IpNetwork::new(ip, *prefix).ok()?.network();
                bucket.get(&masked).map(|(net, value)| (net, value))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn buckets_for(&self, ip: IpAddr) -> &BTreeMap<u8, PrefixBucket<V>> {
        match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }
}
