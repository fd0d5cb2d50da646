use crate::errors::LookupError;
use tracing::warn;

/// Inclusive ASN interval served by one RDAP base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnRange {
    pub start: u32,
    pub end: u32,
    pub url: String,
}

impl AsnRange {
    /// Parse `"start-end"` or a single `"asn"` from a bootstrap key.
    pub fn parse(range: &str, url: impl Into<String>) -> Result<Self, LookupError> {
        let parse_bound = |s: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|e| LookupError::Bootstrap(format!("invalid ASN range '{}': {}", range, e)))
        };

        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (parse_bound(start)?, parse_bound(end)?),
            None => {
                let single = parse_bound(range)?;
                (single, single)
            }
        };

        if start > end {
            return Err(LookupError::Bootstrap(format!("inverted ASN range '{}'", range)));
        }

        Ok(Self {
            start,
            end,
            url: url.into(),
        })
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.start <= asn && asn <= self.end
    }
}

/// Disjoint intervals sorted by start, searched by bisection.
#[derive(Debug, Clone, Default)]
pub struct AsnRanges {
    ranges: Vec<AsnRange>,
}

impl AsnRanges {
    /// Sorts the input; an interval overlapping one already accepted is dropped with a warning.
    pub fn from_ranges(mut ranges: Vec<AsnRange>) -> Self {
        ranges.sort_by_key(|r| (r.start, r.end));

        let mut accepted: Vec<AsnRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = accepted.last() {
                if range.start <= last.end {
                    warn!(
                        "Skipping ASN range {}-{} ({}): overlaps {}-{} ({})",
                        range.start, range.end, range.url, last.start, last.end, last.url
                    );
                    continue;
                }
            }
            accepted.push(range);
        }

        Self { ranges: accepted }
    }

    /// First interval whose end is at or past `asn`, if it also starts at or before it.
    pub fn find(&self, asn: u32) -> Option<&AsnRange> {
        let index = self.ranges.partition_point(|r| r.end < asn);
        self.ranges.get(index).filter(|r| r.start <= asn)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AsnRange> {
        self.ranges.iter()
    }
}
