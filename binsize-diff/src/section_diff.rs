//! Diffs of the sections and COFF groups that make up a binary. These are the top-level buckets
//! that every contribution diff is keyed by.

use crate::Change;
use crate::cache::DiffSessionDataCache;
use crate::error::Result;
use crate::pairing::pair_exactly;
use binsize_model::BinarySection;
use binsize_model::CoffGroup;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
pub struct BinarySectionDiff<'a> {
    change: Change<&'a BinarySection>,
    coff_group_diffs: Vec<Rc<CoffGroupDiff<'a>>>,
}

#[derive(Debug)]
pub struct CoffGroupDiff<'a> {
    section_name: &'a str,
    change: Change<&'a CoffGroup>,
}

impl<'a> BinarySectionDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a BinarySection> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|s| u64::from(s.size))
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|s| u64::from(s.virtual_size))
    }

    #[must_use]
    pub fn virtual_size_including_padding_diff(&self) -> i64 {
        self.change.delta(BinarySection::virtual_size_including_padding)
    }

    #[must_use]
    pub fn coff_group_diffs(&self) -> &[Rc<CoffGroupDiff<'a>>] {
        &self.coff_group_diffs
    }
}

impl<'a> CoffGroupDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    /// The name of the section containing this group. If the group moved between sections, this
    /// is the before section.
    #[must_use]
    pub fn section_name(&self) -> &'a str {
        self.section_name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a CoffGroup> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|g| u64::from(g.size))
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|g| u64::from(g.virtual_size))
    }

    #[must_use]
    pub fn virtual_size_including_padding_diff(&self) -> i64 {
        self.change.delta(CoffGroup::virtual_size_including_padding)
    }
}

/// Pairs sections by exact name, then pairs the COFF groups within each pair of sections the same
/// way. Every diff built is recorded in `cache`.
pub fn build_binary_section_diffs<'a>(
    before: &'a [BinarySection],
    after: &'a [BinarySection],
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Vec<Rc<BinarySectionDiff<'a>>>> {
    pair_exactly(before, after, |b, a| b.name == a.name)
        .into_iter()
        .map(|(b, a)| build_binary_section_diff(b, a, cache))
        .collect()
}

pub fn build_binary_section_diff<'a>(
    before: Option<&'a BinarySection>,
    after: Option<&'a BinarySection>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<BinarySectionDiff<'a>>> {
    let change = Change::from_options(before, after, "sections")?;
    let section_name = change.either().name.as_str();

    let coff_group_diffs = pair_exactly(
        before.map_or(&[][..], |s| s.coff_groups.as_slice()),
        after.map_or(&[][..], |s| s.coff_groups.as_slice()),
        |b, a| b.name == a.name,
    )
    .into_iter()
    .map(|(b, a)| {
        let diff = Rc::new(CoffGroupDiff {
            section_name,
            change: Change::from_options(b, a, "COFF groups")?,
        });
        cache.record_coff_group_diff(&diff)?;
        Ok(diff)
    })
    .collect::<Result<Vec<_>>>()?;

    let diff = Rc::new(BinarySectionDiff {
        change,
        coff_group_diffs,
    });
    debug!(
        section = diff.name(),
        change = change.label(),
        size_diff = diff.size_diff(),
        "Built section diff"
    );
    cache.record_section_diff(&diff)?;
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiffError;
    use crate::Strictness;

    fn section(name: &str, size: u32, groups: &[(&str, u32)]) -> BinarySection {
        BinarySection {
            name: name.to_owned(),
            rva: 0x1000,
            size,
            virtual_size: size,
            padding: 0,
            coff_groups: groups
                .iter()
                .map(|(name, size)| CoffGroup {
                    name: (*name).to_owned(),
                    rva: 0x1000,
                    size: *size,
                    virtual_size: *size,
                    padding: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_sections_and_groups_are_paired_by_name() {
        let before = vec![
            section(".text", 0x100, &[(".text$mn", 0xc0), (".text$x", 0x40)]),
            section(".pdata", 0x20, &[(".pdata", 0x20)]),
        ];
        let after = vec![
            section(".text", 0x140, &[(".text$mn", 0x100), (".text$x", 0x40)]),
            section(".rdata", 0x10, &[(".rdata", 0x10)]),
        ];
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let diffs = build_binary_section_diffs(&before, &after, &mut cache).unwrap();

        let names: Vec<_> = diffs.iter().map(|d| (d.name(), d.change().label())).collect();
        assert_eq!(
            names,
            vec![
                (".text", "changed"),
                (".pdata", "removed"),
                (".rdata", "added")
            ]
        );
        assert_eq!(diffs[0].size_diff(), 0x40);
        assert_eq!(diffs[1].size_diff(), -0x20);
        assert_eq!(diffs[0].coff_group_diffs()[0].size_diff(), 0x40);
        assert_eq!(diffs[0].coff_group_diffs()[1].size_diff(), 0);
        assert_eq!(diffs[2].coff_group_diffs()[0].section_name(), ".rdata");
    }

    #[test]
    fn test_duplicate_section_names_are_rejected_when_strict() {
        let before = vec![section(".text", 0x10, &[]), section(".text", 0x10, &[])];
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let error = build_binary_section_diffs(&before, &before, &mut cache).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DiffError>(),
            Some(DiffError::InvariantViolation(_))
        ));

        let mut cache = DiffSessionDataCache::new(Strictness::Lenient);
        assert_eq!(
            build_binary_section_diffs(&before, &before, &mut cache)
                .unwrap()
                .len(),
            2
        );
    }
}
