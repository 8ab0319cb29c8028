use crate::Change;
use crate::error::Result;
use crate::pairing::pair_exactly;
use binsize_model::TemplateFoldabilityItem;
use std::rc::Rc;

/// How the waste from template instantiations that could have been folded together changed.
#[derive(Debug)]
pub struct TemplateFoldabilityItemDiff<'a> {
    change: Change<&'a TemplateFoldabilityItem>,
}

impl<'a> TemplateFoldabilityItemDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().template_name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a TemplateFoldabilityItem> {
        self.change
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|t| t.total_size)
    }

    #[must_use]
    pub fn wasted_size_diff(&self) -> i64 {
        self.change.delta(|t| t.wasted_size)
    }

    #[must_use]
    pub fn wasted_size_remaining(&self) -> u64 {
        self.change.after().map_or(0, |t| t.wasted_size)
    }

    /// Instantiations that only exist in the after binary.
    pub fn added_instantiations(&self) -> impl Iterator<Item = &'a str> {
        let before = self.change.before();
        self.change
            .after()
            .into_iter()
            .flat_map(|t| &t.instantiation_names)
            .filter(move |name| before.is_none_or(|b| !b.instantiation_names.contains(*name)))
            .map(String::as_str)
    }

    /// Instantiations that only exist in the before binary.
    pub fn removed_instantiations(&self) -> impl Iterator<Item = &'a str> {
        let after = self.change.after();
        self.change
            .before()
            .into_iter()
            .flat_map(|t| &t.instantiation_names)
            .filter(move |name| after.is_none_or(|a| !a.instantiation_names.contains(*name)))
            .map(String::as_str)
    }
}

pub fn build_template_foldability_item_diff<'a>(
    before: Option<&'a TemplateFoldabilityItem>,
    after: Option<&'a TemplateFoldabilityItem>,
) -> Result<Rc<TemplateFoldabilityItemDiff<'a>>> {
    Ok(Rc::new(TemplateFoldabilityItemDiff {
        change: Change::from_options(before, after, "template foldability items")?,
    }))
}

pub fn pair_template_foldability_items<'a>(
    before: &'a [TemplateFoldabilityItem],
    after: &'a [TemplateFoldabilityItem],
) -> Vec<(
    Option<&'a TemplateFoldabilityItem>,
    Option<&'a TemplateFoldabilityItem>,
)> {
    pair_exactly(before, after, |b, a| b.template_name == a.template_name)
}
