// The metainfo codec (C3): a region-map of opaque per-region blobs that
// must cover the universe region exactly, with no gaps and no overlaps,
// after every update.
//
// The per-pair serialization the original design describes is wasteful;
// per the Design Notes this coalesces the whole map into a single
// versioned blob stored under one key in the superblock table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{corrupt, Result};

/// A half-open interval `[start, end)` over the primary key's hash space.
/// `end == u64::MAX` is treated as unbounded (covers the last point too,
/// since hash values never exceed `u64::MAX`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "region start must not exceed end");
        Region { start, end }
    }

    pub fn universe() -> Self {
        Region { start: 0, end: u64::MAX }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, point: u64) -> bool {
        self.start <= point && (point < self.end || self.end == u64::MAX)
    }

    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end || (start == end && self.end == u64::MAX && other.end == u64::MAX) {
            Some(Region::new(start, end))
        } else {
            None
        }
    }
}

const FORMAT_VERSION: u8 = 1;

/// A region-map of opaque per-region bytes, coalesced to one on-disk blob.
/// Maintains, as an invariant checked on every load, that the domain is
/// exactly [`Region::universe`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Metainfo {
    // Keyed by region start; value is (region end, blob).
    entries: BTreeMap<u64, (u64, Vec<u8>)>,
}

impl Metainfo {
    pub fn new_universe(blob: Vec<u8>) -> Self {
        let mut m = Metainfo::default();
        m.entries.insert(0, (u64::MAX, blob));
        m
    }

    pub fn is_empty_map(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite `region` with `blob`, splitting any existing entries that
    /// straddle its boundaries. New regions overwrite overlapping old
    /// regions, exactly as `check_and_update_metainfo` requires.
    pub fn update_region(&mut self, region: Region, blob: Vec<u8>) {
        if region.is_empty() {
            return;
        }
        let mut to_remove = Vec::new();
        let mut to_insert = Vec::new();
        for (&start, (end, old_blob)) in self.entries.iter() {
            let ends_before_region = *end <= region.start && *end != u64::MAX;
            let starts_after_region = start >= region.end && region.end != u64::MAX;
            if ends_before_region || starts_after_region {
                continue;
            }
            // `start..*end` overlaps `region`.
            to_remove.push(start);
            if start < region.start {
                to_insert.push((start, (region.start, old_blob.clone())));
            }
            if *end > region.end || (*end == u64::MAX && region.end != u64::MAX) {
                to_insert.push((region.end, (*end, old_blob.clone())));
            }
        }
        for s in to_remove {
            self.entries.remove(&s);
        }
        for (s, v) in to_insert {
            self.entries.insert(s, v);
        }
        self.entries.insert(region.start, (region.end, blob));
    }

    pub fn update(&mut self, pairs: impl IntoIterator<Item = (Region, Vec<u8>)>) {
        for (region, blob) in pairs {
            self.update_region(region, blob);
        }
    }

    /// Iterate the region-map in ascending region order.
    pub fn iter(&self) -> impl Iterator<Item = (Region, &[u8])> {
        self.entries.iter().map(|(&start, (end, blob))| (Region::new(start, *end), blob.as_slice()))
    }

    /// Look up the blob(s) covering `region`, for `check_metainfo`'s debug
    /// assertions; returns every overlapping (sub)region and its blob.
    pub fn get_overlapping(&self, region: Region) -> Vec<(Region, &[u8])> {
        self.iter().filter_map(|(r, b)| r.intersect(&region).map(|i| (i, b))).collect()
    }

    /// Verify the domain equals the universe region exactly: sorted,
    /// contiguous, no gaps, starts at 0, ends unbounded. A violation is
    /// fatal corruption per the spec.
    pub fn check_domain_is_universe(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(corrupt("metainfo domain is empty, expected universe"));
        }
        let mut expect_start = 0u64;
        let mut last_was_universe_end = false;
        for (&start, (end, _)) in self.entries.iter() {
            if start != expect_start {
                return Err(corrupt("metainfo domain has a gap or overlap"));
            }
            if *end == u64::MAX {
                last_was_universe_end = true;
                break;
            }
            expect_start = *end;
        }
        if !last_was_universe_end {
            return Err(corrupt("metainfo domain does not reach the end of the universe"));
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let pairs: Vec<(u64, u64, &[u8])> =
            self.entries.iter().map(|(&s, (e, b))| (s, *e, b.as_slice())).collect();
        let mut buf = Vec::with_capacity(1 + pairs.len() * 16);
        buf.push(FORMAT_VERSION);
        rmp_serde::encode::write(&mut buf, &pairs).expect("encoding to a Vec cannot fail");
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (version, rest) = bytes.split_first().ok_or_else(|| corrupt("empty metainfo blob"))?;
        match version {
            1 => {
                let pairs: Vec<(u64, u64, Vec<u8>)> = rmp_serde::from_slice(rest)?;
                let mut entries = BTreeMap::new();
                for (start, end, blob) in pairs {
                    entries.insert(start, (end, blob));
                }
                let m = Metainfo { entries };
                m.check_domain_is_universe()?;
                Ok(m)
            }
            v => Err(corrupt(format!("unsupported metainfo format version {v}"))),
        }
    }
}
