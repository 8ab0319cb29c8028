//! Per-session memoisation of diffs.
//!
//! Every diff of a given pair of symbols must be the same `Rc`, so that code blocks can find the
//! function they belong to and so that callers can compare diffs by identity. The cache also owns
//! the memoised list diffs and the uniqueness checks that run as diffs are constructed.
//!
//! The cache is single-threaded. Everything in it borrows from the two binary models for `'a`.

use crate::Strictness;
use crate::check_invariant;
use crate::duplicate_data_diff::DuplicateDataItemDiff;
use crate::error::Result;
use crate::lib_diff::CompilandDiff;
use crate::lib_diff::LibDiff;
use crate::section_diff::BinarySectionDiff;
use crate::section_diff::CoffGroupDiff;
use crate::source_file_diff::SourceFileDiff;
use crate::symbol_diff::FunctionCodeSymbolDiff;
use crate::symbol_diff::SymbolDiff;
use crate::symbol_diff::SymbolListEntry;
use crate::template_foldability_diff::TemplateFoldabilityItemDiff;
use crate::type_layout_diff::TypeLayoutItemDiff;
use crate::wasteful_virtual_diff::WastefulVirtualItemDiff;
use binsize_model::SymbolComparisonClass;
use binsize_model::SymbolRef;
use hashbrown::HashMap;
use hashbrown::HashSet;
use std::rc::Rc;
use tracing::debug;

/// Compilands with this prefix describe import stubs. Several libs can legitimately contain a
/// compiland of the same name.
const IMPORT_COMPILAND_PREFIX: &str = "Import:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Side {
    Before,
    After,
}

/// Identifies one symbol on one side. RVA 0 symbols are never keyed, since many unrelated symbols
/// (pure virtuals, folded-away functions) share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SymbolKey<'a> {
    side: Side,
    class: SymbolComparisonClass,
    rva: u32,
    name: &'a str,
}

impl<'a> SymbolKey<'a> {
    fn new(side: Side, symbol: SymbolRef<'a>) -> Self {
        Self {
            side,
            class: symbol.comparison_class(),
            rva: symbol.rva(),
            name: symbol.name(),
        }
    }
}

pub struct DiffSessionDataCache<'a> {
    strictness: Strictness,
    disposed: bool,

    section_diffs_constructed_ever: Vec<Rc<BinarySectionDiff<'a>>>,
    coff_group_diffs_constructed_ever: Vec<Rc<CoffGroupDiff<'a>>>,
    compiland_diffs_constructed_ever: Vec<Rc<CompilandDiff<'a>>>,
    section_diff_names: HashSet<&'a str>,
    coff_group_diff_names: HashSet<&'a str>,
    compiland_diff_keys: HashSet<(&'a str, &'a str)>,

    symbol_diffs_by_before_rva: HashMap<u32, Rc<SymbolDiff<'a>>>,
    symbol_diffs_by_after_rva: HashMap<u32, Rc<SymbolDiff<'a>>>,
    symbol_diffs_by_rva_pair: HashMap<(u32, u32), Rc<SymbolDiff<'a>>>,
    symbol_diffs_by_symbol: HashMap<SymbolKey<'a>, Rc<SymbolDiff<'a>>>,

    /// Code block diffs only hold weak references to their function, so the cache keeps the
    /// functions alive.
    function_diffs: Vec<Rc<FunctionCodeSymbolDiff<'a>>>,

    pub(crate) all_section_diffs: Option<Vec<Rc<BinarySectionDiff<'a>>>>,
    pub(crate) all_lib_diffs: Option<Vec<Rc<LibDiff<'a>>>>,
    pub(crate) all_source_file_diffs: Option<Vec<Rc<SourceFileDiff<'a>>>>,
    pub(crate) all_symbol_diffs: Option<Vec<SymbolListEntry<'a>>>,
    pub(crate) all_duplicate_data_diffs: Option<Vec<Rc<DuplicateDataItemDiff<'a>>>>,
    pub(crate) all_wasteful_virtual_diffs: Option<Vec<Rc<WastefulVirtualItemDiff<'a>>>>,
    pub(crate) all_template_foldability_diffs: Option<Vec<Rc<TemplateFoldabilityItemDiff<'a>>>>,
    pub(crate) all_type_layout_diffs: Option<Vec<Rc<TypeLayoutItemDiff<'a>>>>,
}

impl<'a> DiffSessionDataCache<'a> {
    #[must_use]
    pub fn new(strictness: Strictness) -> Self {
        Self {
            strictness,
            disposed: false,
            section_diffs_constructed_ever: Vec::new(),
            coff_group_diffs_constructed_ever: Vec::new(),
            compiland_diffs_constructed_ever: Vec::new(),
            section_diff_names: HashSet::new(),
            coff_group_diff_names: HashSet::new(),
            compiland_diff_keys: HashSet::new(),
            symbol_diffs_by_before_rva: HashMap::new(),
            symbol_diffs_by_after_rva: HashMap::new(),
            symbol_diffs_by_rva_pair: HashMap::new(),
            symbol_diffs_by_symbol: HashMap::new(),
            function_diffs: Vec::new(),
            all_section_diffs: None,
            all_lib_diffs: None,
            all_source_file_diffs: None,
            all_symbol_diffs: None,
            all_duplicate_data_diffs: None,
            all_wasteful_virtual_diffs: None,
            all_template_foldability_diffs: None,
            all_type_layout_diffs: None,
        }
    }

    #[must_use]
    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn record_section_diff(&mut self, diff: &Rc<BinarySectionDiff<'a>>) -> Result {
        if self.strictness.is_strict() {
            check_invariant!(
                self.section_diff_names.insert(diff.name()),
                "Section `{}` was diffed more than once",
                diff.name()
            );
        }
        self.section_diffs_constructed_ever.push(Rc::clone(diff));
        Ok(())
    }

    pub(crate) fn record_coff_group_diff(&mut self, diff: &Rc<CoffGroupDiff<'a>>) -> Result {
        if self.strictness.is_strict() {
            check_invariant!(
                self.coff_group_diff_names.insert(diff.name()),
                "COFF group `{}` was diffed more than once",
                diff.name()
            );
        }
        self.coff_group_diffs_constructed_ever.push(Rc::clone(diff));
        Ok(())
    }

    pub(crate) fn record_compiland_diff(&mut self, diff: &Rc<CompilandDiff<'a>>) -> Result {
        if self.strictness.is_strict() && !diff.name().starts_with(IMPORT_COMPILAND_PREFIX) {
            check_invariant!(
                self.compiland_diff_keys.insert((diff.name(), diff.lib_name())),
                "Compiland `{}` in lib `{}` was diffed more than once",
                diff.name(),
                diff.lib_name()
            );
        }
        self.compiland_diffs_constructed_ever.push(Rc::clone(diff));
        Ok(())
    }

    #[must_use]
    pub fn section_diffs_constructed_ever(&self) -> &[Rc<BinarySectionDiff<'a>>] {
        &self.section_diffs_constructed_ever
    }

    #[must_use]
    pub fn coff_group_diffs_constructed_ever(&self) -> &[Rc<CoffGroupDiff<'a>>] {
        &self.coff_group_diffs_constructed_ever
    }

    #[must_use]
    pub fn compiland_diffs_constructed_ever(&self) -> &[Rc<CompilandDiff<'a>>] {
        &self.compiland_diffs_constructed_ever
    }

    /// Looks up an existing diff for this pair of symbols. Checked in order: by after RVA when
    /// there's no before, by before RVA when there's no after, by the pair of RVAs, then by either
    /// symbol's identity.
    pub(crate) fn find_symbol_diff(
        &self,
        before: Option<SymbolRef<'a>>,
        after: Option<SymbolRef<'a>>,
    ) -> Option<Rc<SymbolDiff<'a>>> {
        let by_rva = match (before, after) {
            (None, Some(after)) => self.find_symbol_diff_by_rvas(None, Some(after.rva())),
            (Some(before), None) => self.find_symbol_diff_by_rvas(Some(before.rva()), None),
            (Some(before), Some(after)) => {
                self.find_symbol_diff_by_rvas(Some(before.rva()), Some(after.rva()))
            }
            (None, None) => None,
        };
        if by_rva.is_some() {
            return by_rva;
        }

        before
            .and_then(|s| {
                self.symbol_diffs_by_symbol
                    .get(&SymbolKey::new(Side::Before, s))
            })
            .or_else(|| {
                after.and_then(|s| {
                    self.symbol_diffs_by_symbol
                        .get(&SymbolKey::new(Side::After, s))
                })
            })
            .cloned()
    }

    /// Looks up a diff by the RVAs of its symbols. `None` for an RVA means that side is absent.
    /// RVA 0 never matches anything.
    #[must_use]
    pub fn find_symbol_diff_by_rvas(
        &self,
        before_rva: Option<u32>,
        after_rva: Option<u32>,
    ) -> Option<Rc<SymbolDiff<'a>>> {
        match (before_rva, after_rva) {
            (None, Some(after_rva)) if after_rva != 0 => {
                self.symbol_diffs_by_after_rva.get(&after_rva)
            }
            (Some(before_rva), None) if before_rva != 0 => {
                self.symbol_diffs_by_before_rva.get(&before_rva)
            }
            (Some(before_rva), Some(after_rva)) if before_rva != 0 && after_rva != 0 => {
                self.symbol_diffs_by_rva_pair.get(&(before_rva, after_rva))
            }
            _ => None,
        }
        .cloned()
    }

    /// Makes `diff` findable by `find_symbol_diff`. Symbols at RVA 0 aren't recorded, since the RVA
    /// doesn't identify them.
    pub(crate) fn record_symbol_diff(&mut self, diff: &Rc<SymbolDiff<'a>>) {
        let before = diff.change().before();
        let after = diff.change().after();
        let before_rva = before.map(|s| s.rva());
        let after_rva = after.map(|s| s.rva());

        match (before_rva, after_rva) {
            (None, Some(after_rva)) if after_rva != 0 => {
                self.symbol_diffs_by_after_rva
                    .insert(after_rva, Rc::clone(diff));
            }
            (Some(before_rva), None) if before_rva != 0 => {
                self.symbol_diffs_by_before_rva
                    .insert(before_rva, Rc::clone(diff));
            }
            (Some(before_rva), Some(after_rva)) if before_rva != 0 && after_rva != 0 => {
                self.symbol_diffs_by_rva_pair
                    .insert((before_rva, after_rva), Rc::clone(diff));
            }
            _ => {
                debug!(symbol = diff.name(), "Not caching symbol diff at RVA 0");
                return;
            }
        }

        if let Some(before) = before {
            self.symbol_diffs_by_symbol
                .insert(SymbolKey::new(Side::Before, before), Rc::clone(diff));
        }
        if let Some(after) = after {
            self.symbol_diffs_by_symbol
                .insert(SymbolKey::new(Side::After, after), Rc::clone(diff));
        }
    }

    pub(crate) fn record_function_diff(&mut self, diff: &Rc<FunctionCodeSymbolDiff<'a>>) {
        self.function_diffs.push(Rc::clone(diff));
    }

    #[must_use]
    pub fn function_diffs_constructed_ever(&self) -> &[Rc<FunctionCodeSymbolDiff<'a>>] {
        &self.function_diffs
    }

    /// Drops everything the cache holds. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(
            sections = self.section_diffs_constructed_ever.len(),
            compilands = self.compiland_diffs_constructed_ever.len(),
            functions = self.function_diffs.len(),
            "Disposing diff cache"
        );
        let strictness = self.strictness;
        *self = Self::new(strictness);
        self.disposed = true;
    }
}
