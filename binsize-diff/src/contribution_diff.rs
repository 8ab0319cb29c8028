//! How a lib, compiland or source file's contributions to each section and COFF group changed.

use crate::Change;
use crate::Strictness;
use crate::error::Result;
use crate::section_diff::BinarySectionDiff;
use crate::section_diff::CoffGroupDiff;
use binsize_model::Contribution;
use binsize_model::ContributionSource;
use indexmap::IndexMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct ContributionDiff<'a> {
    name: String,
    target_name: &'a str,
    change: Change<&'a Contribution>,
}

impl<'a> ContributionDiff<'a> {
    /// For example "foo.obj contributions to .text".
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The section or COFF group contributed to.
    #[must_use]
    pub fn target_name(&self) -> &'a str {
        self.target_name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a Contribution> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(Contribution::size)
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(Contribution::virtual_size)
    }
}

/// All the contribution diffs of one entity, keyed by section or COFF group name. Only targets the
/// entity contributed to on at least one side get an entry.
#[derive(Debug, Default)]
pub struct ContributionDiffs<'a> {
    by_section: IndexMap<&'a str, ContributionDiff<'a>>,
    by_coff_group: IndexMap<&'a str, ContributionDiff<'a>>,
}

impl<'a> ContributionDiffs<'a> {
    /// Builds one diff per section diff and per COFF group diff that either side of the entity
    /// contributes to.
    pub fn build<S: ContributionSource>(
        entity_name: &str,
        before: Option<&'a S>,
        after: Option<&'a S>,
        section_diffs: &[Rc<BinarySectionDiff<'a>>],
    ) -> Result<Self> {
        let mut diffs = ContributionDiffs::default();
        for section_diff in section_diffs {
            if let Some(diff) = contribution_diff(
                entity_name,
                section_diff.name(),
                before.and_then(|b| b.section_contributions().get(section_diff.name())),
                after.and_then(|a| a.section_contributions().get(section_diff.name())),
            )? {
                diffs.by_section.insert(section_diff.name(), diff);
            }

            for coff_group_diff in section_diff.coff_group_diffs() {
                let group_name = coff_group_diff.name();
                if let Some(diff) = contribution_diff(
                    entity_name,
                    group_name,
                    before.and_then(|b| b.coff_group_contributions().get(group_name)),
                    after.and_then(|a| a.coff_group_contributions().get(group_name)),
                )? {
                    diffs.by_coff_group.insert(group_name, diff);
                }
            }
        }
        Ok(diffs)
    }

    #[must_use]
    pub fn section_contribution_diff(&self, section_name: &str) -> Option<&ContributionDiff<'a>> {
        self.by_section.get(section_name)
    }

    #[must_use]
    pub fn section_contribution_diff_for(
        &self,
        section_diff: &BinarySectionDiff<'_>,
    ) -> Option<&ContributionDiff<'a>> {
        self.section_contribution_diff(section_diff.name())
    }

    #[must_use]
    pub fn coff_group_contribution_diff(&self, group_name: &str) -> Option<&ContributionDiff<'a>> {
        self.by_coff_group.get(group_name)
    }

    #[must_use]
    pub fn coff_group_contribution_diff_for(
        &self,
        coff_group_diff: &CoffGroupDiff<'_>,
    ) -> Option<&ContributionDiff<'a>> {
        self.coff_group_contribution_diff(coff_group_diff.name())
    }

    pub fn section_contribution_diffs(&self) -> impl Iterator<Item = &ContributionDiff<'a>> {
        self.by_section.values()
    }

    pub fn coff_group_contribution_diffs(&self) -> impl Iterator<Item = &ContributionDiff<'a>> {
        self.by_coff_group.values()
    }

    #[must_use]
    pub fn section_size_diff_total(&self) -> i64 {
        self.by_section.values().map(ContributionDiff::size_diff).sum()
    }

    #[must_use]
    pub fn coff_group_size_diff_total(&self) -> i64 {
        self.by_coff_group
            .values()
            .map(ContributionDiff::size_diff)
            .sum()
    }

    /// Checks that both the section and the COFF group contributions add up to `size_diff`.
    pub(crate) fn check_sums(
        &self,
        strictness: Strictness,
        entity: &str,
        size_diff: i64,
    ) -> Result {
        strictness.check_sum(
            || format!("section contributions of {entity}"),
            size_diff,
            self.section_size_diff_total(),
        )?;
        strictness.check_sum(
            || format!("COFF group contributions of {entity}"),
            size_diff,
            self.coff_group_size_diff_total(),
        )
    }
}

fn contribution_diff<'a>(
    entity_name: &str,
    target_name: &'a str,
    before: Option<&'a Contribution>,
    after: Option<&'a Contribution>,
) -> Result<Option<ContributionDiff<'a>>> {
    if before.is_none() && after.is_none() {
        return Ok(None);
    }
    Ok(Some(ContributionDiff {
        name: format!("{entity_name} contributions to {target_name}"),
        target_name,
        change: Change::from_options(before, after, "contributions")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiffSessionDataCache;
    use crate::section_diff::build_binary_section_diffs;
    use binsize_model::BinarySection;
    use binsize_model::CoffGroup;
    use binsize_model::Compiland;
    use binsize_model::CompilandBuilder;
    use binsize_model::RvaRange;

    fn text_section(size: u32) -> BinarySection {
        BinarySection {
            name: ".text".to_owned(),
            rva: 0x1000,
            size,
            virtual_size: size,
            padding: 0,
            coff_groups: vec![CoffGroup {
                name: ".text$mn".to_owned(),
                rva: 0x1000,
                size,
                virtual_size: size,
                padding: 0,
            }],
        }
    }

    fn compiland(size: u32) -> Compiland {
        CompilandBuilder::new("a.obj")
            .add_contribution(".text", ".text$mn", RvaRange::from_rva_and_size(0x1000, size))
            .build()
            .unwrap()
    }

    #[test]
    fn test_contributions_keyed_by_section_and_group() {
        let before_sections = vec![text_section(0x100)];
        let after_sections = vec![text_section(0x120)];
        let before = compiland(0x10);
        let after = compiland(0x30);
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let section_diffs =
            build_binary_section_diffs(&before_sections, &after_sections, &mut cache).unwrap();

        let diffs =
            ContributionDiffs::build("a.obj", Some(&before), Some(&after), &section_diffs).unwrap();

        let text = diffs.section_contribution_diff(".text").unwrap();
        assert_eq!(text.name(), "a.obj contributions to .text");
        assert_eq!(text.size_diff(), 0x20);
        assert_eq!(
            diffs
                .coff_group_contribution_diff_for(&section_diffs[0].coff_group_diffs()[0])
                .unwrap()
                .size_diff(),
            0x20
        );
        assert!(diffs.section_contribution_diff(".data").is_none());
        diffs.check_sums(Strictness::Strict, "a.obj", 0x20).unwrap();
        assert!(diffs.check_sums(Strictness::Strict, "a.obj", 0x30).is_err());
    }

    #[test]
    fn test_removed_entity_contributes_negatively() {
        let sections = vec![text_section(0x100)];
        let before = compiland(0x18);
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let section_diffs = build_binary_section_diffs(&sections, &sections, &mut cache).unwrap();
        let diffs = ContributionDiffs::build("a.obj", Some(&before), None, &section_diffs).unwrap();
        assert_eq!(diffs.section_size_diff_total(), -0x18);
        assert_eq!(diffs.coff_group_size_diff_total(), -0x18);
    }
}
