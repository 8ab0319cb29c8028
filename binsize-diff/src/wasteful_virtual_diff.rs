//! Diffs of wasteful virtuals, with every byte of the change in waste attributed either to an
//! override that became or stopped being wasteful, or to a derived type that joined or left the
//! hierarchy.

use crate::Change;
use crate::cache::DiffSessionDataCache;
use crate::check_invariant;
use crate::correspondence::VeryLikelyTheSame as _;
use crate::error::Result;
use crate::pairing::pair_exactly;
use crate::symbol_diff::FunctionCodeSymbolDiff;
use crate::symbol_diff::create_function_code_symbol_diff;
use binsize_model::FunctionSymbol;
use binsize_model::TypeGraph;
use binsize_model::UserDefinedType;
use binsize_model::WastefulVirtualItem;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
pub struct WastefulVirtualItemDiff<'a> {
    change: Change<&'a WastefulVirtualItem>,
    type_hierarchy_changes: Vec<TypeHierarchyChange<'a>>,
    wasted_override_changes: Vec<WastedOverrideChange<'a>>,
}

/// A derived type was added to or removed from the hierarchy.
#[derive(Debug)]
pub struct TypeHierarchyChange<'a> {
    pub user_defined_type: Change<&'a UserDefinedType>,
    pub waste_change: i64,
}

/// An override started or stopped being wasteful.
#[derive(Debug)]
pub struct WastedOverrideChange<'a> {
    pub function: Rc<FunctionCodeSymbolDiff<'a>>,
    pub waste_change: i64,
}

impl<'a> WastefulVirtualItemDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().user_defined_type.name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a WastefulVirtualItem> {
        self.change
    }

    #[must_use]
    pub fn is_com_type(&self) -> bool {
        self.change.either().is_com_type
    }

    #[must_use]
    pub fn wasted_size_diff(&self) -> i64 {
        self.change.delta(WastefulVirtualItem::wasted_size)
    }

    /// Vtable slots always occupy real bytes, so the size diff is the waste diff.
    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.wasted_size_diff()
    }

    #[must_use]
    pub fn wasted_size_remaining(&self) -> u64 {
        self.change.after().map_or(0, WastefulVirtualItem::wasted_size)
    }

    #[must_use]
    pub fn type_hierarchy_changes(&self) -> &[TypeHierarchyChange<'a>] {
        &self.type_hierarchy_changes
    }

    #[must_use]
    pub fn wasted_override_changes(&self) -> &[WastedOverrideChange<'a>] {
        &self.wasted_override_changes
    }
}

fn contains_same_function<'f>(
    functions: impl IntoIterator<Item = &'f FunctionSymbol>,
    function: &FunctionSymbol,
) -> bool {
    functions
        .into_iter()
        .any(|f| f.is_very_likely_the_same_as(function))
}

fn contains_same_type(types: &[&UserDefinedType], udt: &UserDefinedType) -> bool {
    types.iter().any(|t| t.is_very_likely_the_same_as(udt))
}

/// `before_types` and `after_types` are the type graphs of each binary, used to find the types
/// derived from the item's type.
pub fn build_wasteful_virtual_item_diff<'a>(
    before: Option<&'a WastefulVirtualItem>,
    after: Option<&'a WastefulVirtualItem>,
    cache: &mut DiffSessionDataCache<'a>,
    before_types: &'a dyn TypeGraph,
    after_types: &'a dyn TypeGraph,
) -> Result<Rc<WastefulVirtualItemDiff<'a>>> {
    let change = Change::from_options(before, after, "wasteful virtual items")?;
    let mut type_hierarchy_changes = Vec::new();
    let mut wasted_override_changes = Vec::new();

    match change {
        // With only one side, the overrides account for all of the waste.
        Change::Added(after) => {
            for function in after.all_wasted_overrides() {
                wasted_override_changes.push(WastedOverrideChange {
                    function: create_function_code_symbol_diff(None, Some(function), cache)?,
                    waste_change: after.waste_per_slot() as i64,
                });
            }
        }
        Change::Removed(before) => {
            for function in before.all_wasted_overrides() {
                wasted_override_changes.push(WastedOverrideChange {
                    function: create_function_code_symbol_diff(Some(function), None, cache)?,
                    waste_change: -(before.waste_per_slot() as i64),
                });
            }
        }
        Change::Changed { before, after } => {
            let mut gone_since_before = 0;
            for function in before.all_wasted_overrides() {
                if !contains_same_function(after.all_wasted_overrides(), function) {
                    wasted_override_changes.push(WastedOverrideChange {
                        function: create_function_code_symbol_diff(Some(function), None, cache)?,
                        waste_change: -(before.waste_per_slot() as i64),
                    });
                    gone_since_before += 1;
                }
            }

            let mut new_in_after = 0;
            for function in after.all_wasted_overrides() {
                if !contains_same_function(before.all_wasted_overrides(), function) {
                    wasted_override_changes.push(WastedOverrideChange {
                        function: create_function_code_symbol_diff(None, Some(function), cache)?,
                        waste_change: after.waste_per_slot() as i64,
                    });
                    new_in_after += 1;
                }
            }

            let before_derived = before_types.derived_types(&before.user_defined_type);
            let after_derived = after_types.derived_types(&after.user_defined_type);
            if cache.strictness().is_strict() {
                check_derived_type_count(before, &before_derived)?;
                check_derived_type_count(after, &after_derived)?;
            }

            // Each slot of a type that left or joined the hierarchy is one word, except for the
            // overrides whose change was already counted above. The type's own slot is only waste
            // while it has derived types, so the last type to leave or the first to join also
            // carries that slot.
            let mut own_slot_lost = before.derived_type_count != 0 && after.derived_type_count == 0;
            for udt in &before_derived {
                if !contains_same_type(&after_derived, udt) {
                    let slots = (before.wasted_override_count() - gone_since_before) as i64;
                    let words = if std::mem::take(&mut own_slot_lost) { 2 } else { 1 };
                    type_hierarchy_changes.push(TypeHierarchyChange {
                        user_defined_type: Change::Removed(*udt),
                        waste_change: -slots * words * i64::from(before.bytes_per_word),
                    });
                }
            }
            let mut own_slot_gained =
                before.derived_type_count == 0 && after.derived_type_count != 0;
            for udt in &after_derived {
                if !contains_same_type(&before_derived, udt) {
                    let slots = (after.wasted_override_count() - new_in_after) as i64;
                    let words = if std::mem::take(&mut own_slot_gained) { 2 } else { 1 };
                    type_hierarchy_changes.push(TypeHierarchyChange {
                        user_defined_type: Change::Added(*udt),
                        waste_change: slots * words * i64::from(after.bytes_per_word),
                    });
                }
            }
        }
    }

    let diff = WastefulVirtualItemDiff {
        change,
        type_hierarchy_changes,
        wasted_override_changes,
    };
    let attributed = diff
        .type_hierarchy_changes
        .iter()
        .map(|c| c.waste_change)
        .chain(diff.wasted_override_changes.iter().map(|c| c.waste_change))
        .sum();
    cache.strictness().check_sum(
        || format!("wasteful virtual changes of `{}`", diff.name()),
        diff.wasted_size_diff(),
        attributed,
    )?;

    debug!(
        type_name = diff.name(),
        wasted_size_diff = diff.wasted_size_diff(),
        "Built wasteful virtual diff"
    );
    Ok(Rc::new(diff))
}

fn check_derived_type_count(item: &WastefulVirtualItem, derived: &[&UserDefinedType]) -> Result {
    check_invariant!(
        derived.len() == item.derived_type_count as usize,
        "`{}` has {} derived types in the type graph, but the wasteful virtual analysis found {}",
        item.user_defined_type.name,
        derived.len(),
        item.derived_type_count
    );
    Ok(())
}

pub fn pair_wasteful_virtual_items<'a>(
    before: &'a [WastefulVirtualItem],
    after: &'a [WastefulVirtualItem],
) -> Vec<(Option<&'a WastefulVirtualItem>, Option<&'a WastefulVirtualItem>)> {
    pair_exactly(before, after, |b, a| {
        b.user_defined_type
            .is_very_likely_the_same_as(&a.user_defined_type)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiffError;
    use crate::Strictness;
    use binsize_model::BinaryModel;
    use binsize_model::CodeBlock;
    use rstest::rstest;

    fn udt(name: &str, bases: &[&str]) -> UserDefinedType {
        UserDefinedType {
            name: name.to_owned(),
            instance_size: 16,
            base_types: bases.iter().map(|b| (*b).to_owned()).collect(),
        }
    }

    fn function(name: &str, rva: u32) -> FunctionSymbol {
        FunctionSymbol {
            name: name.to_owned(),
            is_static: false,
            is_virtual: true,
            is_pure: true,
            function_type: None,
            primary_block: CodeBlock { rva, size: 0x20 },
            separated_blocks: Vec::new(),
        }
    }

    fn model(types: Vec<UserDefinedType>) -> BinaryModel {
        let mut model = BinaryModel::new("test.dll", 8);
        model.user_defined_types = types;
        model
    }

    fn item(derived_type_count: u32, pure: Vec<FunctionSymbol>) -> WastefulVirtualItem {
        WastefulVirtualItem {
            user_defined_type: udt("IShape", &[]),
            is_com_type: false,
            bytes_per_word: 8,
            derived_type_count,
            wasted_overrides_pure_with_exactly_one_override: pure,
            wasted_overrides_non_pure_with_no_overrides: Vec::new(),
        }
    }

    #[test]
    fn test_removed_derived_type_is_not_double_counted() {
        let before_model = model(vec![udt("IShape", &[]), udt("Circle", &["IShape"])]);
        let after_model = model(vec![udt("IShape", &[])]);
        let before = item(1, vec![function("IShape::Area", 0x1000)]);
        let after = item(0, Vec::new());
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);

        let diff = build_wasteful_virtual_item_diff(
            Some(&before),
            Some(&after),
            &mut cache,
            &before_model,
            &after_model,
        )
        .unwrap();

        assert_eq!(diff.wasted_size_diff(), -16);
        assert_eq!(diff.wasted_override_changes().len(), 1);
        assert_eq!(diff.wasted_override_changes()[0].waste_change, -16);
        assert_eq!(
            diff.wasted_override_changes()[0].function.change().label(),
            "removed"
        );
        assert_eq!(diff.type_hierarchy_changes().len(), 1);
        assert_eq!(diff.type_hierarchy_changes()[0].waste_change, 0);
        assert_eq!(
            diff.type_hierarchy_changes()[0]
                .user_defined_type
                .either()
                .name,
            "Circle"
        );
    }

    #[test]
    fn test_added_derived_type_adds_a_word_per_remaining_override() {
        let before_model = model(vec![udt("IShape", &[]), udt("Circle", &["IShape"])]);
        let after_model = model(vec![
            udt("IShape", &[]),
            udt("Circle", &["IShape"]),
            udt("Square", &["IShape"]),
        ]);
        let mut before = item(1, Vec::new());
        before.wasted_overrides_non_pure_with_no_overrides = vec![function("IShape::Name", 0x1000)];
        let mut after = item(2, Vec::new());
        after.wasted_overrides_non_pure_with_no_overrides = vec![function("IShape::Name", 0x1100)];
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);

        let diff = build_wasteful_virtual_item_diff(
            Some(&before),
            Some(&after),
            &mut cache,
            &before_model,
            &after_model,
        )
        .unwrap();

        // 2 * 8 before, 3 * 8 after.
        assert_eq!(diff.wasted_size_diff(), 8);
        assert!(diff.wasted_override_changes().is_empty());
        assert_eq!(diff.type_hierarchy_changes()[0].waste_change, 8);
    }

    #[rstest]
    #[case::first_derived_type(0, 1, 16)]
    #[case::last_derived_type(1, 0, -16)]
    #[case::first_two_derived_types(0, 2, 24)]
    fn test_type_gaining_or_losing_all_derived_types_counts_its_own_slot(
        #[case] before_count: u32,
        #[case] after_count: u32,
        #[case] expected: i64,
    ) {
        let hierarchy = |count: u32| {
            let mut types = vec![udt("IShape", &[])];
            types.extend(
                ["Circle", "Square"][..count as usize]
                    .iter()
                    .map(|name| udt(name, &["IShape"])),
            );
            model(types)
        };
        let with_name = |count: u32, rva: u32| {
            let mut item = item(count, Vec::new());
            item.wasted_overrides_non_pure_with_no_overrides =
                vec![function("IShape::Name", rva)];
            item
        };
        let before_model = hierarchy(before_count);
        let after_model = hierarchy(after_count);
        let before = with_name(before_count, 0x1000);
        let after = with_name(after_count, 0x1100);

        for strictness in [Strictness::Strict, Strictness::Lenient] {
            let mut cache = DiffSessionDataCache::new(strictness);
            let diff = build_wasteful_virtual_item_diff(
                Some(&before),
                Some(&after),
                &mut cache,
                &before_model,
                &after_model,
            )
            .unwrap();

            assert_eq!(diff.wasted_size_diff(), expected);
            assert!(diff.wasted_override_changes().is_empty());
            let attributed: i64 = diff
                .type_hierarchy_changes()
                .iter()
                .map(|c| c.waste_change)
                .sum();
            assert_eq!(attributed, expected);
        }
    }

    #[test]
    fn test_removed_item_removes_each_override_from_the_before_side() {
        let empty = model(Vec::new());
        let before = item(
            3,
            vec![function("IShape::Area", 0x1000), function("IShape::Draw", 0x1100)],
        );
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let diff =
            build_wasteful_virtual_item_diff(Some(&before), None, &mut cache, &empty, &empty)
                .unwrap();
        assert_eq!(diff.wasted_size_diff(), -64);
        for change in diff.wasted_override_changes() {
            assert_eq!(change.waste_change, -32);
            assert!(change.function.change().before().is_some());
            assert!(change.function.change().after().is_none());
        }
    }

    #[test]
    fn test_derived_type_count_must_match_type_graph() {
        let before_model = model(vec![udt("IShape", &[])]);
        let before = item(2, vec![function("IShape::Area", 0x1000)]);
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let error = build_wasteful_virtual_item_diff(
            Some(&before),
            Some(&before),
            &mut cache,
            &before_model,
            &before_model,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DiffError>(),
            Some(DiffError::InvariantViolation(_))
        ));
    }
}
