//! A diff session owns the two models being compared and the cache of every diff built from them.
//!
//! Lists of diffs are built lazily the first time they're asked for. Each item in a list is diffed
//! in isolation: if diffing one lib or one symbol fails, the failure is recorded along with the
//! diagnostics emitted while diffing it, and the rest of the list is still produced.

use crate::DiffError;
use crate::Strictness;
use crate::cache::DiffSessionDataCache;
use crate::diagnostics::TraceOutput;
use crate::diagnostics::trace_scope;
use crate::duplicate_data_diff::DuplicateDataItemDiff;
use crate::duplicate_data_diff::build_duplicate_data_item_diff;
use crate::duplicate_data_diff::pair_duplicate_data_items;
use crate::error::Result;
use crate::lib_diff::CompilandDiff;
use crate::lib_diff::LibDiff;
use crate::lib_diff::build_lib_diff;
use crate::pairing::pair_greedily;
use crate::path_similarity::path_names_are_very_similar;
use crate::section_diff::BinarySectionDiff;
use crate::section_diff::CoffGroupDiff;
use crate::section_diff::build_binary_section_diffs;
use crate::source_file_diff::SourceFileDiff;
use crate::source_file_diff::build_source_file_diff;
use crate::source_file_diff::pair_source_files;
use crate::symbol_diff::SymbolDiff;
use crate::symbol_diff::SymbolListEntry;
use crate::symbol_diff::create_symbol_diff;
use crate::symbol_diff::create_symbol_list_entry;
use crate::symbol_diff::pair_symbols;
use crate::template_foldability_diff::TemplateFoldabilityItemDiff;
use crate::template_foldability_diff::build_template_foldability_item_diff;
use crate::template_foldability_diff::pair_template_foldability_items;
use crate::type_layout_diff::TypeLayoutItemDiff;
use crate::type_layout_diff::build_type_layout_item_diff;
use crate::type_layout_diff::pair_type_layouts;
use crate::wasteful_virtual_diff::WastefulVirtualItemDiff;
use crate::wasteful_virtual_diff::build_wasteful_virtual_item_diff;
use crate::wasteful_virtual_diff::pair_wasteful_virtual_items;
use anyhow::bail;
use binsize_model::BinaryModel;
use binsize_model::SymbolRef;
use binsize_model::TypeGraph;
use std::rc::Rc;
use tracing::debug;
use tracing::warn;

/// An item that couldn't be diffed.
#[derive(Debug, Clone)]
pub struct DiffFailure {
    /// The kind of item, e.g. "lib" or "symbol".
    pub category: &'static str,
    pub item: String,
    pub message: String,
    pub kind: Option<DiffError>,

    /// Everything traced while the item was being diffed.
    pub diagnostics: TraceOutput,
}

pub struct DiffSession<'a> {
    before: &'a BinaryModel,
    after: &'a BinaryModel,
    cache: DiffSessionDataCache<'a>,
    failures: Vec<DiffFailure>,
    warnings: Vec<String>,
}

impl<'a> DiffSession<'a> {
    #[must_use]
    pub fn new(before: &'a BinaryModel, after: &'a BinaryModel, strictness: Strictness) -> Self {
        Self {
            before,
            after,
            cache: DiffSessionDataCache::new(strictness),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn before(&self) -> &'a BinaryModel {
        self.before
    }

    #[must_use]
    pub fn after(&self) -> &'a BinaryModel {
        self.after
    }

    #[must_use]
    pub fn strictness(&self) -> Strictness {
        self.cache.strictness()
    }

    #[must_use]
    pub fn cache(&self) -> &DiffSessionDataCache<'a> {
        &self.cache
    }

    /// Items that failed to diff, in the order they were attempted.
    #[must_use]
    pub fn failures(&self) -> &[DiffFailure] {
        &self.failures
    }

    /// Warnings emitted while diffing items that otherwise succeeded.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Drops every cached diff. Any further request for diffs fails.
    pub fn dispose(&mut self) {
        self.cache.dispose();
    }

    fn ensure_not_disposed(&self) -> Result {
        if self.cache.is_disposed() {
            bail!(
                "Diff session comparing `{}` with `{}` has been disposed",
                self.before.name,
                self.after.name
            );
        }
        Ok(())
    }

    /// Runs `f`, turning an error into a recorded failure rather than propagating it.
    fn isolated<T>(
        &mut self,
        category: &'static str,
        item: &str,
        f: impl FnOnce(&mut DiffSessionDataCache<'a>) -> Result<T>,
    ) -> Option<T> {
        let mut diagnostics = TraceOutput::default();
        let cache = &mut self.cache;
        let result = trace_scope(&mut diagnostics, || f(cache));

        self.warnings.extend(
            diagnostics
                .warnings()
                .map(|w| format!("{category} `{item}`: {w}")),
        );

        match result {
            Ok(value) => Some(value),
            Err(error) => {
                warn!("Failed to diff {category} `{item}`: {error:#}");
                self.failures.push(DiffFailure {
                    category,
                    item: item.to_owned(),
                    message: format!("{error:#}"),
                    kind: error.downcast_ref::<DiffError>().cloned(),
                    diagnostics,
                });
                None
            }
        }
    }

    /// Sections aren't isolated. Every other diff is attributed to them, so if they can't be
    /// diffed, nothing else can be either.
    pub fn section_diffs(&mut self) -> Result<Vec<Rc<BinarySectionDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_section_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;
        let diffs = build_binary_section_diffs(&before.sections, &after.sections, &mut self.cache)?;
        debug!(count = diffs.len(), "Built section diffs");
        self.cache.all_section_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    pub fn coff_group_diffs(&mut self) -> Result<Vec<Rc<CoffGroupDiff<'a>>>> {
        Ok(self
            .section_diffs()?
            .iter()
            .flat_map(|s| s.coff_group_diffs().iter().cloned())
            .collect())
    }

    pub fn lib_diffs(&mut self) -> Result<Vec<Rc<LibDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_lib_diffs {
            return Ok(diffs.clone());
        }
        let section_diffs = self.section_diffs()?;
        let before = self.before;
        let after = self.after;

        let pairing = pair_greedily(
            &before.libraries,
            &after.libraries,
            |b, a| b.name.eq_ignore_ascii_case(&a.name),
            |b, a| path_names_are_very_similar(&b.name, &a.name),
        );
        let strict = self.strictness().is_strict();

        let mut diffs = Vec::new();
        for (b, a) in pairing.pairs {
            let name = b.or(a).map_or("", |l| l.name.as_str());
            let ambiguous =
                b.is_some_and(|b| pairing.ambiguous.iter().any(|x| std::ptr::eq(*x, b)));
            let diff = self.isolated("lib", name, |cache| {
                if strict && ambiguous {
                    return Err(DiffError::InvariantViolation(format!(
                        "Lib `{name}` has more than one plausible match in the after binary"
                    ))
                    .into());
                }
                build_lib_diff(b, a, &section_diffs, cache)
            });
            diffs.extend(diff);
        }

        self.cache.all_lib_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    pub fn compiland_diffs(&mut self) -> Result<Vec<Rc<CompilandDiff<'a>>>> {
        Ok(self
            .lib_diffs()?
            .iter()
            .flat_map(|l| l.compiland_diffs().iter().cloned())
            .collect())
    }

    /// Finds a compiland diff by lib and compiland name. Lib names are compared
    /// case-insensitively against either side.
    pub fn compiland_diff_by_name(
        &mut self,
        lib_name: &str,
        compiland_name: &str,
    ) -> Result<Option<Rc<CompilandDiff<'a>>>> {
        Ok(self
            .lib_diffs()?
            .iter()
            .filter(|l| {
                let change = l.change();
                [change.before(), change.after()]
                    .into_iter()
                    .flatten()
                    .any(|lib| lib.name.eq_ignore_ascii_case(lib_name))
            })
            .find_map(|l| l.compiland_diff_by_name(compiland_name).cloned()))
    }

    pub fn source_file_diffs(&mut self) -> Result<Vec<Rc<SourceFileDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_source_file_diffs {
            return Ok(diffs.clone());
        }
        let section_diffs = self.section_diffs()?;
        let before = self.before;
        let after = self.after;

        let mut diffs = Vec::new();
        for (b, a) in pair_source_files(&before.source_files, &after.source_files) {
            let name = b.or(a).map_or("", |s| s.name.as_str());
            diffs.extend(self.isolated("source file", name, |cache| {
                build_source_file_diff(b, a, &section_diffs, cache)
            }));
        }

        self.cache.all_source_file_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    /// Every symbol in either binary, paired up. Functions appear whole, not as separate blocks.
    pub fn symbol_diffs(&mut self) -> Result<Vec<SymbolListEntry<'a>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_symbol_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;

        let mut entries = Vec::new();
        for (b, a) in pair_symbols(before.symbols(), after.symbols()) {
            let name = b.or(a).map_or("", |s| s.name());
            entries.extend(self.isolated("symbol", name, |cache| {
                create_symbol_list_entry(b, a, cache)
            }));
        }

        self.cache.all_symbol_diffs = Some(entries.clone());
        Ok(entries)
    }

    /// Gets or creates the diff for a specific pair of symbols. Unlike the list methods, an error
    /// here is returned to the caller.
    pub fn symbol_diff(
        &mut self,
        before: Option<SymbolRef<'a>>,
        after: Option<SymbolRef<'a>>,
    ) -> Result<Rc<SymbolDiff<'a>>> {
        self.ensure_not_disposed()?;
        create_symbol_diff(before, after, &mut self.cache)
    }

    /// Finds the diff of the symbols at these RVAs, building the symbol list first if needed.
    pub fn symbol_diff_by_rvas(
        &mut self,
        before_rva: Option<u32>,
        after_rva: Option<u32>,
    ) -> Result<Option<Rc<SymbolDiff<'a>>>> {
        if before_rva.is_none() && after_rva.is_none() {
            return Err(DiffError::InvalidArguments(
                "Both before and after RVAs are absent".to_owned(),
            )
            .into());
        }
        self.symbol_diffs()?;
        Ok(self.cache.find_symbol_diff_by_rvas(before_rva, after_rva))
    }

    pub fn duplicate_data_diffs(&mut self) -> Result<Vec<Rc<DuplicateDataItemDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_duplicate_data_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;

        let mut diffs = Vec::new();
        for (b, a) in pair_duplicate_data_items(&before.duplicate_data, &after.duplicate_data) {
            let name = b.or(a).map_or("", |i| i.symbol.name.as_str());
            diffs.extend(self.isolated("duplicate data", name, |cache| {
                build_duplicate_data_item_diff(b, a, cache)
            }));
        }

        self.cache.all_duplicate_data_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    pub fn wasteful_virtual_diffs(&mut self) -> Result<Vec<Rc<WastefulVirtualItemDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_wasteful_virtual_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;
        let before_types: &'a dyn TypeGraph = before;
        let after_types: &'a dyn TypeGraph = after;

        let pairs =
            pair_wasteful_virtual_items(&before.wasteful_virtuals, &after.wasteful_virtuals);
        let mut diffs = Vec::new();
        for (b, a) in pairs {
            let name = b.or(a).map_or("", |i| i.user_defined_type.name.as_str());
            diffs.extend(self.isolated("wasteful virtual", name, |cache| {
                build_wasteful_virtual_item_diff(b, a, cache, before_types, after_types)
            }));
        }

        self.cache.all_wasteful_virtual_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    pub fn template_foldability_diffs(
        &mut self,
    ) -> Result<Vec<Rc<TemplateFoldabilityItemDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_template_foldability_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;

        let pairs = pair_template_foldability_items(
            &before.template_foldability,
            &after.template_foldability,
        );
        let mut diffs = Vec::new();
        for (b, a) in pairs {
            let name = b.or(a).map_or("", |i| i.template_name.as_str());
            diffs.extend(self.isolated("template foldability", name, |_| {
                build_template_foldability_item_diff(b, a)
            }));
        }

        self.cache.all_template_foldability_diffs = Some(diffs.clone());
        Ok(diffs)
    }

    pub fn type_layout_diffs(&mut self) -> Result<Vec<Rc<TypeLayoutItemDiff<'a>>>> {
        self.ensure_not_disposed()?;
        if let Some(diffs) = &self.cache.all_type_layout_diffs {
            return Ok(diffs.clone());
        }
        let before = self.before;
        let after = self.after;

        let mut diffs = Vec::new();
        for (b, a) in pair_type_layouts(&before.type_layouts, &after.type_layouts) {
            let name = b.or(a).map_or("", |t| t.user_defined_type.name.as_str());
            diffs.extend(self.isolated("type layout", name, |_| build_type_layout_item_diff(b, a)));
        }

        self.cache.all_type_layout_diffs = Some(diffs.clone());
        Ok(diffs)
    }
}
