//! Symbol diffs and the factory that hands them out.
//!
//! A function is diffed as a whole, producing one `SymbolDiff` per code block. Each block diff
//! holds a weak reference back to its function diff, so asking for the diff of any block of a
//! function yields the same block diff that the function diff holds. All diffs go through
//! `DiffSessionDataCache`, so asking twice for the same pair of symbols gives the same `Rc`.

use crate::Change;
use crate::DiffError;
use crate::cache::DiffSessionDataCache;
use crate::correspondence::VeryLikelyTheSame as _;
use crate::correspondence::code_blocks_are_very_likely_the_same;
use crate::error::Result;
use crate::pairing::pair_exactly;
use binsize_model::FunctionSymbol;
use binsize_model::SymbolComparisonClass;
use binsize_model::SymbolRef;
use indexmap::IndexMap;
use std::fmt::Display;
use std::rc::Rc;
use std::rc::Weak;
use tracing::trace;

#[derive(Debug)]
pub struct SymbolDiff<'a> {
    change: Change<SymbolRef<'a>>,

    /// Only set for code blocks.
    parent_function: Weak<FunctionCodeSymbolDiff<'a>>,
}

#[derive(Debug)]
pub struct FunctionCodeSymbolDiff<'a> {
    change: Change<&'a FunctionSymbol>,
    code_block_diffs: Vec<Rc<SymbolDiff<'a>>>,
}

/// One entry in the diff of a binary's symbols. Functions are diffed whole.
#[derive(Debug, Clone)]
pub enum SymbolListEntry<'a> {
    Function(Rc<FunctionCodeSymbolDiff<'a>>),
    Symbol(Rc<SymbolDiff<'a>>),
}

impl<'a> SymbolDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.change.either().name()
    }

    #[must_use]
    pub fn change(&self) -> Change<SymbolRef<'a>> {
        self.change
    }

    #[must_use]
    pub fn before_symbol(&self) -> Option<SymbolRef<'a>> {
        self.change.before()
    }

    #[must_use]
    pub fn after_symbol(&self) -> Option<SymbolRef<'a>> {
        self.change.after()
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(|s| s.size())
    }

    #[must_use]
    pub fn virtual_size_diff(&self) -> i64 {
        self.change.delta(|s| s.virtual_size())
    }

    #[must_use]
    pub fn is_code_block(&self) -> bool {
        self.change.either().is_code_block()
    }

    /// The diff of the function this code block belongs to. `None` if this isn't a code block.
    #[must_use]
    pub fn parent_function_diff(&self) -> Option<Rc<FunctionCodeSymbolDiff<'a>>> {
        self.parent_function.upgrade()
    }
}

impl Display for SymbolDiff<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.change.either().fmt(f)
    }
}

impl<'a> FunctionCodeSymbolDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a FunctionSymbol> {
        self.change
    }

    /// Total across all blocks of the function.
    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(FunctionSymbol::size)
    }

    #[must_use]
    pub fn code_block_diffs(&self) -> &[Rc<SymbolDiff<'a>>] {
        &self.code_block_diffs
    }

    /// The diff containing the primary block of the before function, or of the after function if
    /// there is no before.
    #[must_use]
    pub fn primary_block_diff(&self) -> Option<&Rc<SymbolDiff<'a>>> {
        self.code_block_diffs.iter().find(|d| {
            d.change.either().comparison_class() == SymbolComparisonClass::PrimaryCodeBlock
        })
    }
}

impl<'a> SymbolListEntry<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            SymbolListEntry::Function(f) => f.name(),
            SymbolListEntry::Symbol(s) => s.name(),
        }
    }

    #[must_use]
    pub fn size_diff(&self) -> i64 {
        match self {
            SymbolListEntry::Function(f) => f.size_diff(),
            SymbolListEntry::Symbol(s) => s.size_diff(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SymbolListEntry::Function(f) => f.change().label(),
            SymbolListEntry::Symbol(s) => s.change().label(),
        }
    }
}

/// A whole function stands for its primary block.
fn as_block(symbol: Option<SymbolRef<'_>>) -> Option<SymbolRef<'_>> {
    match symbol {
        Some(SymbolRef::Function(function)) => Some(SymbolRef::primary_block(function)),
        other => other,
    }
}

fn is_same_block(a: SymbolRef<'_>, b: SymbolRef<'_>) -> bool {
    match (a, b) {
        (
            SymbolRef::CodeBlock {
                function: a,
                index: a_index,
            },
            SymbolRef::CodeBlock {
                function: b,
                index: b_index,
            },
        ) => std::ptr::eq(a, b) && a_index == b_index,
        _ => false,
    }
}

fn side_matches(requested: Option<SymbolRef<'_>>, found: Option<SymbolRef<'_>>) -> bool {
    match (requested, found) {
        (Some(x), Some(y)) => is_same_block(x, y),
        (None, None) => true,
        _ => false,
    }
}

/// Returns the diff of a pair of symbols, creating it if this pair hasn't been diffed before.
/// Passing code blocks diffs their whole function, and the returned diff is the one the function
/// diff holds for the requested block.
pub fn create_symbol_diff<'a>(
    before: Option<SymbolRef<'a>>,
    after: Option<SymbolRef<'a>>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<SymbolDiff<'a>>> {
    let before = as_block(before);
    let after = as_block(after);
    let change = Change::from_options(before, after, "symbols")?;

    if let Some(existing) = cache.find_symbol_diff(before, after) {
        return Ok(existing);
    }

    let all_code_blocks = before.is_none_or(|s| s.is_code_block())
        && after.is_none_or(|s| s.is_code_block());
    if all_code_blocks {
        let function_diff = create_function_code_symbol_diff(
            before.and_then(|s| s.parent_function()),
            after.and_then(|s| s.parent_function()),
            cache,
        )?;
        if let Some(existing) = cache.find_symbol_diff(before, after) {
            return Ok(existing);
        }
        // Blocks at RVA 0 aren't cached, so search the function diff directly. Both sides must
        // agree, including which side is absent.
        let found = function_diff.code_block_diffs.iter().find(|d| {
            side_matches(before, d.before_symbol()) && side_matches(after, d.after_symbol())
        });
        return found.cloned().ok_or_else(|| {
            DiffError::InvariantViolation(format!(
                "Diff of function `{}` doesn't contain a diff of block {}",
                function_diff.name(),
                change.either()
            ))
            .into()
        });
    }

    let diff = Rc::new(SymbolDiff {
        change,
        parent_function: Weak::new(),
    });
    trace!(symbol = %diff, change = change.label(), "Created symbol diff");
    cache.record_symbol_diff(&diff);
    Ok(diff)
}

/// Returns the diff of a pair of functions, creating it and a diff for each of its code blocks if
/// needed. Blocks are paired greedily with `code_blocks_are_very_likely_the_same`.
pub fn create_function_code_symbol_diff<'a>(
    before: Option<&'a FunctionSymbol>,
    after: Option<&'a FunctionSymbol>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<FunctionCodeSymbolDiff<'a>>> {
    let change = Change::from_options(before, after, "functions")?;

    if let Some(parent) = cache
        .find_symbol_diff(
            before.map(SymbolRef::primary_block),
            after.map(SymbolRef::primary_block),
        )
        .and_then(|primary| primary.parent_function_diff())
    {
        return Ok(parent);
    }

    let block_count = |f: Option<&FunctionSymbol>| f.map_or(0, |f| f.separated_blocks.len() + 1);
    let block_pairs = pair_exactly(
        0..block_count(before),
        0..block_count(after),
        |b, a| match (before, after) {
            (Some(bf), Some(af)) => code_blocks_are_very_likely_the_same(bf, b, af, a),
            _ => false,
        },
    );
    let block_ref = |function: Option<&'a FunctionSymbol>, index: Option<usize>| {
        function
            .zip(index)
            .map(|(function, index)| SymbolRef::CodeBlock { function, index })
    };
    let block_changes = block_pairs
        .into_iter()
        .map(|(b, a)| {
            Change::from_options(block_ref(before, b), block_ref(after, a), "code blocks")
        })
        .collect::<Result<Vec<_>>>()?;

    let diff = Rc::new_cyclic(|parent: &Weak<FunctionCodeSymbolDiff<'a>>| {
        FunctionCodeSymbolDiff {
            change,
            code_block_diffs: block_changes
                .into_iter()
                .map(|change| {
                    Rc::new(SymbolDiff {
                        change,
                        parent_function: parent.clone(),
                    })
                })
                .collect(),
        }
    });

    trace!(
        function = diff.name(),
        change = change.label(),
        blocks = diff.code_block_diffs.len(),
        "Created function diff"
    );
    for block_diff in &diff.code_block_diffs {
        cache.record_symbol_diff(block_diff);
    }
    cache.record_function_diff(&diff);
    Ok(diff)
}

type SymbolsBySide<'a> = (Vec<SymbolRef<'a>>, Vec<SymbolRef<'a>>);

/// Pairs symbols of the same comparison class that are very likely the same.
pub fn pair_symbols<'a>(
    before: impl IntoIterator<Item = SymbolRef<'a>>,
    after: impl IntoIterator<Item = SymbolRef<'a>>,
) -> Vec<(Option<SymbolRef<'a>>, Option<SymbolRef<'a>>)> {
    let mut by_class: IndexMap<SymbolComparisonClass, SymbolsBySide<'a>> = IndexMap::new();
    for symbol in before {
        by_class
            .entry(symbol.comparison_class())
            .or_default()
            .0
            .push(symbol);
    }
    for symbol in after {
        by_class
            .entry(symbol.comparison_class())
            .or_default()
            .1
            .push(symbol);
    }
    by_class
        .into_values()
        .flat_map(|(before, after)| {
            pair_exactly(before, after, |b, a| b.is_very_likely_the_same_as(&a))
        })
        .collect()
}

/// Creates the list entry for a pair of symbols. Pairs of whole functions get a function diff.
pub fn create_symbol_list_entry<'a>(
    before: Option<SymbolRef<'a>>,
    after: Option<SymbolRef<'a>>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<SymbolListEntry<'a>> {
    let as_function = |s: Option<SymbolRef<'a>>| match s {
        Some(SymbolRef::Function(function)) => Some(function),
        _ => None,
    };
    let before_function = as_function(before);
    let after_function = as_function(after);
    let is_function = (before_function.is_some() || after_function.is_some())
        && before_function.is_some() == before.is_some()
        && after_function.is_some() == after.is_some();

    if is_function {
        create_function_code_symbol_diff(before_function, after_function, cache)
            .map(SymbolListEntry::Function)
    } else {
        create_symbol_diff(before, after, cache).map(SymbolListEntry::Symbol)
    }
}

pub fn build_symbol_diffs<'a>(
    before: impl IntoIterator<Item = SymbolRef<'a>>,
    after: impl IntoIterator<Item = SymbolRef<'a>>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Vec<SymbolListEntry<'a>>> {
    pair_symbols(before, after)
        .into_iter()
        .map(|(b, a)| create_symbol_list_entry(b, a, cache))
        .collect()
}
