//! Address ranges within a binary and sets of them.

use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

use crate::Result;

/// A half-open range `[start, start + size)` of relative virtual addresses. Ranges that exist only
/// in memory (e.g. zero-initialised data) are flagged as virtual-size-only and contribute nothing to
/// the on-disk size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RvaRange {
    pub start: u32,
    pub len: u32,
    #[serde(default)]
    pub is_virtual_size_only: bool,
}

impl RvaRange {
    #[must_use]
    pub fn from_rva_and_size(start: u32, size: u32) -> Self {
        Self {
            start,
            len: size,
            is_virtual_size_only: false,
        }
    }

    #[must_use]
    pub fn virtual_only(start: u32, size: u32) -> Self {
        Self {
            start,
            len: size,
            is_virtual_size_only: true,
        }
    }

    /// One past the last address in the range.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.len)
    }

    /// Bytes occupied on disk.
    #[must_use]
    pub fn size(&self) -> u32 {
        if self.is_virtual_size_only { 0 } else { self.len }
    }

    /// Bytes occupied in memory.
    #[must_use]
    pub fn virtual_size(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.start && u64::from(rva) < self.end()
    }

    #[must_use]
    pub fn contains_rva_and_size(&self, rva: u32, size: u32) -> bool {
        rva >= self.start && u64::from(rva) + u64::from(size) <= self.end()
    }

    #[must_use]
    pub fn fully_contains(&self, other: &RvaRange) -> bool {
        self.contains_rva_and_size(other.start, other.len)
    }

    #[must_use]
    pub fn at_least_partially_overlaps_with(&self, other: &RvaRange) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }

    /// Returns whether the gap between the two ranges is at most `max_padding` bytes. Overlapping
    /// ranges and ranges with the same start are not adjacent.
    #[must_use]
    pub fn is_adjacent_to(&self, other: &RvaRange, max_padding: u32) -> bool {
        let (first, second) = match self.start.cmp(&other.start) {
            std::cmp::Ordering::Less => (self, other),
            std::cmp::Ordering::Greater => (other, self),
            std::cmp::Ordering::Equal => return false,
        };
        let second_start = u64::from(second.start);
        second_start >= first.end() && second_start - first.end() <= u64::from(max_padding)
    }

    #[must_use]
    pub fn can_be_combined_with(&self, other: &RvaRange, max_padding: u32) -> bool {
        if self.is_virtual_size_only != other.is_virtual_size_only {
            return false;
        }
        self.is_adjacent_to(other, max_padding)
            || self.at_least_partially_overlaps_with(other)
            || self.fully_contains(other)
            || other.fully_contains(self)
    }

    /// Merges two ranges into one covering both, including any padding between them.
    pub fn combine_with(&self, other: &RvaRange) -> Result<RvaRange> {
        if self.is_virtual_size_only != other.is_virtual_size_only {
            bail!("Cannot merge virtual-size-only range {self} with on-disk range {other}");
        }
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        let Ok(len) = u32::try_from(end - u64::from(start)) else {
            bail!("Merging {self} with {other} overflows the address space");
        };
        Ok(RvaRange {
            start,
            len,
            is_virtual_size_only: self.is_virtual_size_only,
        })
    }
}

impl Display for RvaRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}..0x{:x}", self.start, self.end())?;
        if self.is_virtual_size_only {
            write!(f, " (virtual)")?;
        }
        Ok(())
    }
}

/// A set of ranges that are kept sorted and never overlap or touch. Callers are expected to
/// coalesce before inserting, which `from_ranges` does for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RvaRangeSet {
    ranges: Vec<RvaRange>,
}

impl RvaRangeSet {
    /// Builds a set from arbitrary ranges, merging any whose gap is at most `max_padding_to_merge`
    /// bytes.
    pub fn from_ranges(
        ranges: impl IntoIterator<Item = RvaRange>,
        max_padding_to_merge: u32,
    ) -> Result<Self> {
        Ok(Self {
            ranges: coalesce(ranges, max_padding_to_merge)?,
        })
    }

    /// Adds a range that must not overlap or be adjacent to any range already in the set.
    pub fn insert(&mut self, range: RvaRange) -> Result {
        if let Some(existing) = self.ranges.iter().find(|r| {
            r.is_adjacent_to(&range, 0)
                || r.at_least_partially_overlaps_with(&range)
                || r.fully_contains(&range)
                || range.fully_contains(r)
        }) {
            bail!(
                "Range {range} overlaps or touches {existing}. Coalesce ranges before inserting them"
            );
        }
        let index = self.ranges.partition_point(|r| r.start < range.start);
        self.ranges.insert(index, range);
        Ok(())
    }

    pub fn union_with(&mut self, other: &RvaRangeSet) -> Result {
        for range in &other.ranges {
            if self.ranges.contains(range) {
                continue;
            }
            self.insert(*range)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, rva: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(rva))
    }

    #[must_use]
    pub fn fully_contains(&self, range: &RvaRange) -> bool {
        self.ranges.iter().any(|r| r.fully_contains(range))
    }

    #[must_use]
    pub fn at_least_partially_overlaps_with(&self, range: &RvaRange) -> bool {
        self.ranges
            .iter()
            .any(|r| r.at_least_partially_overlaps_with(range))
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.ranges.iter().map(|r| u64::from(r.size())).sum()
    }

    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.ranges.iter().map(|r| u64::from(r.virtual_size())).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RvaRange> {
        self.ranges.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[RvaRange] {
        &self.ranges
    }
}

/// Sorts `ranges` by start address and merges neighbours that can be combined.
pub fn coalesce(
    ranges: impl IntoIterator<Item = RvaRange>,
    max_padding_to_merge: u32,
) -> Result<Vec<RvaRange>> {
    let mut sorted: Vec<RvaRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
    sorted.sort_by_key(|r| (r.start, r.is_virtual_size_only));

    let mut out: Vec<RvaRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = out.last_mut()
            && last.can_be_combined_with(&range, max_padding_to_merge)
        {
            *last = last.combine_with(&range)?;
            continue;
        }
        if let Some(last) = out.last()
            && last.at_least_partially_overlaps_with(&range)
        {
            bail!("Virtual-size-only range overlaps on-disk range: {last} and {range}");
        }
        out.push(range);
    }
    Ok(out)
}
