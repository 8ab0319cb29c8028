//! Diffs of libs and of the compilands within them.

use crate::Change;
use crate::cache::DiffSessionDataCache;
use crate::contribution_diff::ContributionDiffs;
use crate::error::Result;
use crate::pairing::pair_greedily;
use crate::path_similarity::path_names_are_very_similar;
use crate::section_diff::BinarySectionDiff;
use binsize_model::Compiland;
use binsize_model::ContributionSource;
use binsize_model::Library;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
pub struct LibDiff<'a> {
    change: Change<&'a Library>,
    compiland_diffs: Vec<Rc<CompilandDiff<'a>>>,
    contributions: ContributionDiffs<'a>,
}

#[derive(Debug)]
pub struct CompilandDiff<'a> {
    lib_name: &'a str,
    change: Change<&'a Compiland>,
    contributions: ContributionDiffs<'a>,
}

impl<'a> LibDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a Library> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|lib| lib.size())
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|lib| lib.virtual_size())
    }

    #[must_use]
    pub fn compiland_diffs(&self) -> &[Rc<CompilandDiff<'a>>] {
        &self.compiland_diffs
    }

    #[must_use]
    pub fn compiland_diff_by_name(&self, name: &str) -> Option<&Rc<CompilandDiff<'a>>> {
        self.compiland_diffs.iter().find(|c| c.name() == name)
    }

    #[must_use]
    pub fn contributions(&self) -> &ContributionDiffs<'a> {
        &self.contributions
    }
}

impl<'a> CompilandDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    /// The name of the lib this compiland belongs to, preferring the before lib's name.
    #[must_use]
    pub fn lib_name(&self) -> &'a str {
        self.lib_name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a Compiland> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|c| c.size())
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|c| c.virtual_size())
    }

    #[must_use]
    pub fn contributions(&self) -> &ContributionDiffs<'a> {
        &self.contributions
    }
}

/// Builds the diff of a lib and every compiland in it. Compilands are paired by exact name first,
/// then by path similarity, since the same object file is often built in a different directory.
pub fn build_lib_diff<'a>(
    before: Option<&'a Library>,
    after: Option<&'a Library>,
    section_diffs: &[Rc<BinarySectionDiff<'a>>],
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<LibDiff<'a>>> {
    let change = Change::from_options(before, after, "libs")?;
    let lib_name = change.either().name.as_str();

    let pairing = pair_greedily(
        before.into_iter().flat_map(|lib| &lib.compilands),
        after.into_iter().flat_map(|lib| &lib.compilands),
        |b, a| b.name == a.name,
        |b, a| path_names_are_very_similar(&b.name, &a.name),
    );
    let compiland_diffs = pairing
        .pairs
        .into_iter()
        .map(|(b, a)| build_compiland_diff(lib_name, b, a, section_diffs, cache))
        .collect::<Result<Vec<_>>>()?;

    let contributions = ContributionDiffs::build(lib_name, before, after, section_diffs)?;
    let diff = LibDiff {
        change,
        compiland_diffs,
        contributions,
    };

    let strictness = cache.strictness();
    let entity = format!("lib `{lib_name}`");
    strictness.check_sum(
        || format!("compilands of {entity}"),
        diff.size_diff(),
        diff.compiland_diffs.iter().map(|c| c.size_diff()).sum(),
    )?;
    diff.contributions
        .check_sums(strictness, &entity, diff.size_diff())?;

    debug!(
        lib = lib_name,
        change = change.label(),
        size_diff = diff.size_diff(),
        compilands = diff.compiland_diffs.len(),
        "Built lib diff"
    );
    Ok(Rc::new(diff))
}

pub fn build_compiland_diff<'a>(
    lib_name: &'a str,
    before: Option<&'a Compiland>,
    after: Option<&'a Compiland>,
    section_diffs: &[Rc<BinarySectionDiff<'a>>],
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<CompilandDiff<'a>>> {
    let change = Change::from_options(before, after, "compilands")?;
    let name = change.either().name.as_str();
    let diff = Rc::new(CompilandDiff {
        lib_name,
        change,
        contributions: ContributionDiffs::build(name, before, after, section_diffs)?,
    });

    diff.contributions.check_sums(
        cache.strictness(),
        &format!("compiland `{name}` in lib `{lib_name}`"),
        diff.size_diff(),
    )?;
    cache.record_compiland_diff(&diff)?;
    Ok(diff)
}
