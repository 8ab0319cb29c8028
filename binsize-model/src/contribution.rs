//! Contributions: the address ranges that one entity (a lib, a compiland or a source file) occupies
//! within one section or COFF group.
//!
//! Contributions are accumulated through builders while a binary is being enumerated. Once built, a
//! `Contribution` has no mutating API.

use crate::Result;
use crate::rva::RvaRange;
use crate::rva::RvaRangeSet;
use anyhow::bail;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// The ranges owned by a single (entity, section-or-group) pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "ContributionData", into = "ContributionData")]
pub struct Contribution {
    ranges: RvaRangeSet,
}

/// The serialized form of a contribution. Deserializing goes back through `ContributionBuilder`, so
/// hand-written or corrupt files can't produce overlapping ranges.
#[derive(Serialize, Deserialize)]
struct ContributionData {
    ranges: Vec<RvaRange>,
}

impl Contribution {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.ranges.size()
    }

    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.ranges.virtual_size()
    }

    #[must_use]
    pub fn ranges(&self) -> &RvaRangeSet {
        &self.ranges
    }

    #[must_use]
    pub fn contains(&self, rva: u32) -> bool {
        self.ranges.contains(rva)
    }
}

impl TryFrom<ContributionData> for Contribution {
    type Error = anyhow::Error;

    fn try_from(data: ContributionData) -> Result<Self> {
        let mut builder = ContributionBuilder::default();
        builder.add_ranges(data.ranges);
        builder.build()
    }
}

impl From<Contribution> for ContributionData {
    fn from(contribution: Contribution) -> Self {
        ContributionData {
            ranges: contribution.ranges.as_slice().to_vec(),
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct ContributionBuilder {
    ranges: Vec<RvaRange>,
}

impl ContributionBuilder {
    pub fn add_range(&mut self, range: RvaRange) -> &mut Self {
        self.ranges.push(range);
        self
    }

    pub fn add_ranges(&mut self, ranges: impl IntoIterator<Item = RvaRange>) -> &mut Self {
        self.ranges.extend(ranges);
        self
    }

    /// Freezes the accumulated ranges. Touching ranges are merged. Overlapping ranges mean that
    /// two symbols claimed the same bytes, which is an error.
    pub fn build(&self) -> Result<Contribution> {
        let mut sorted = self.ranges.clone();
        sorted.sort_by_key(|r| r.start);
        for pair in sorted.windows(2) {
            if pair[0].at_least_partially_overlaps_with(&pair[1]) {
                bail!(
                    "Contribution ranges {} and {} overlap",
                    pair[0],
                    pair[1]
                );
            }
        }
        Ok(Contribution {
            ranges: RvaRangeSet::from_ranges(sorted, 0)?,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Contributions of one entity, keyed by section or COFF group name in the order they were first
/// seen.
#[derive(Default, Debug, Clone)]
pub struct ContributionsBuilder {
    by_name: IndexMap<String, ContributionBuilder>,
}

impl ContributionsBuilder {
    /// Returns the builder for `name`, creating it the first time the entity contributes there.
    pub fn for_name(&mut self, name: &str) -> &mut ContributionBuilder {
        self.by_name.entry(name.to_owned()).or_default()
    }

    pub fn add(&mut self, name: &str, range: RvaRange) -> &mut Self {
        self.for_name(name).add_range(range);
        self
    }

    /// Adds every range of already built contributions, e.g. to roll compilands up into their lib.
    pub fn absorb(&mut self, contributions: &IndexMap<String, Contribution>) -> &mut Self {
        for (name, contribution) in contributions {
            self.for_name(name)
                .add_ranges(contribution.ranges().iter().copied());
        }
        self
    }

    pub fn build(&self) -> Result<IndexMap<String, Contribution>> {
        self.by_name
            .iter()
            .filter(|(_, builder)| !builder.is_empty())
            .map(|(name, builder)| -> Result<(String, Contribution)> {
                let contribution = builder.build().map_err(|error| {
                    error.context(format!("Failed to build contribution to `{name}`"))
                })?;
                Ok((name.clone(), contribution))
            })
            .collect()
    }
}
