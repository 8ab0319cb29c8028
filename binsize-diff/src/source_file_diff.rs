use crate::Change;
use crate::cache::DiffSessionDataCache;
use crate::contribution_diff::ContributionDiffs;
use crate::error::Result;
use crate::pairing::pair_greedily;
use crate::path_similarity::path_names_are_very_similar;
use crate::section_diff::BinarySectionDiff;
use binsize_model::ContributionSource;
use binsize_model::SourceFile;
use std::rc::Rc;

#[derive(Debug)]
pub struct SourceFileDiff<'a> {
    change: Change<&'a SourceFile>,
    contributions: ContributionDiffs<'a>,
}

impl<'a> SourceFileDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a SourceFile> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|f| f.size())
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|f| f.virtual_size())
    }

    #[must_use]
    pub fn contributions(&self) -> &ContributionDiffs<'a> {
        &self.contributions
    }
}

/// Pairs source files by exact path, then by path similarity.
pub fn pair_source_files<'a>(
    before: &'a [SourceFile],
    after: &'a [SourceFile],
) -> Vec<(Option<&'a SourceFile>, Option<&'a SourceFile>)> {
    pair_greedily(
        before,
        after,
        |b, a| b.name == a.name,
        |b, a| path_names_are_very_similar(&b.name, &a.name),
    )
    .pairs
}

pub fn build_source_file_diff<'a>(
    before: Option<&'a SourceFile>,
    after: Option<&'a SourceFile>,
    section_diffs: &[Rc<BinarySectionDiff<'a>>],
    cache: &DiffSessionDataCache<'a>,
) -> Result<Rc<SourceFileDiff<'a>>> {
    let change = Change::from_options(before, after, "source files")?;
    let name = change.either().name.as_str();
    let diff = SourceFileDiff {
        change,
        contributions: ContributionDiffs::build(name, before, after, section_diffs)?,
    };
    diff.contributions.check_sums(
        cache.strictness(),
        &format!("source file `{name}`"),
        diff.size_diff(),
    )?;
    Ok(Rc::new(diff))
}
