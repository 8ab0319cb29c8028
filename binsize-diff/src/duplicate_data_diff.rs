use crate::Change;
use crate::DiffError;
use crate::cache::DiffSessionDataCache;
use crate::correspondence::VeryLikelyTheSame as _;
use crate::error::Result;
use crate::pairing::pair_exactly;
use crate::symbol_diff::SymbolDiff;
use crate::symbol_diff::create_symbol_diff;
use binsize_model::DuplicateDataItem;
use binsize_model::SymbolRef;
use std::rc::Rc;

/// How a piece of data that's duplicated across several translation units changed.
#[derive(Debug)]
pub struct DuplicateDataItemDiff<'a> {
    change: Change<&'a DuplicateDataItem>,
    symbol_diff: Rc<SymbolDiff<'a>>,
}

impl<'a> DuplicateDataItemDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().symbol.name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a DuplicateDataItem> {
        self.change
    }

    #[must_use]
    pub fn symbol_diff(&self) -> &Rc<SymbolDiff<'a>> {
        &self.symbol_diff
    }

    /// Change in the total size of every copy.
    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.change.delta(DuplicateDataItem::total_size)
    }

    #[must_use]
    pub fn wasted_size_diff(&self) -> i64 {
        self.change.delta(DuplicateDataItem::wasted_size)
    }

    /// Waste still present in the after binary.
    #[must_use]
    pub fn wasted_size_remaining(&self) -> u64 {
        self.change.after().map_or(0, DuplicateDataItem::wasted_size)
    }
}

/// Fails with `DiffError::Unsupported` if the symbol on either side came from XDATA, since unwind
/// data isn't attributed to a single translation unit.
pub fn build_duplicate_data_item_diff<'a>(
    before: Option<&'a DuplicateDataItem>,
    after: Option<&'a DuplicateDataItem>,
    cache: &mut DiffSessionDataCache<'a>,
) -> Result<Rc<DuplicateDataItemDiff<'a>>> {
    let change = Change::from_options(before, after, "duplicate data items")?;
    if let Some(xdata) = [before, after].into_iter().flatten().find(|i| i.symbol.from_xdata) {
        return Err(DiffError::Unsupported(format!(
            "Duplicate data `{}` came from exception unwinding data, which can't be \
             attributed to a single translation unit",
            xdata.symbol.name
        ))
        .into());
    }

    let symbol_diff = create_symbol_diff(
        before.map(|i| SymbolRef::StaticData(&i.symbol)),
        after.map(|i| SymbolRef::StaticData(&i.symbol)),
        cache,
    )?;
    Ok(Rc::new(DuplicateDataItemDiff {
        change,
        symbol_diff,
    }))
}

/// Pairs items whose data symbols are very likely the same.
pub fn pair_duplicate_data_items<'a>(
    before: &'a [DuplicateDataItem],
    after: &'a [DuplicateDataItem],
) -> Vec<(Option<&'a DuplicateDataItem>, Option<&'a DuplicateDataItem>)> {
    pair_exactly(before, after, |b, a| {
        b.symbol.is_very_likely_the_same_as(&a.symbol)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Strictness;
    use binsize_model::DataKind;
    use binsize_model::StaticDataSymbol;

    fn item(rva: u32, size: u32, copies: usize) -> DuplicateDataItem {
        DuplicateDataItem {
            symbol: StaticDataSymbol {
                name: "kDefaultOptions".to_owned(),
                rva,
                size,
                data_kind: DataKind::FileStatic,
                type_name: Some("const Options".to_owned()),
                parent_function: None,
                from_xdata: false,
            },
            referenced_in: (0..copies).map(|i| format!("unit{i}.obj")).collect(),
        }
    }

    #[test]
    fn test_waste_diff() {
        let before = vec![item(0x3000, 0x10, 3)];
        let after = vec![item(0x3040, 0x10, 2)];
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let pairs = pair_duplicate_data_items(&before, &after);
        assert_eq!(pairs.len(), 1);
        let diff = build_duplicate_data_item_diff(pairs[0].0, pairs[0].1, &mut cache).unwrap();
        assert_eq!(diff.size_diff(), -0x10);
        assert_eq!(diff.wasted_size_diff(), -0x10);
        assert_eq!(diff.wasted_size_remaining(), 0x10);
        assert_eq!(diff.symbol_diff().size_diff(), 0);
    }

    #[test]
    fn test_removed_item_has_no_remaining_waste() {
        let before = item(0x3000, 0x8, 4);
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let diff = build_duplicate_data_item_diff(Some(&before), None, &mut cache).unwrap();
        assert_eq!(diff.wasted_size_diff(), -0x18);
        assert_eq!(diff.wasted_size_remaining(), 0);
    }

    #[test]
    fn test_xdata_duplicates_are_unsupported() {
        let mut after = item(0x3000, 0x8, 2);
        after.symbol.from_xdata = true;
        let mut cache = DiffSessionDataCache::new(Strictness::Strict);
        let error = build_duplicate_data_item_diff(None, Some(&after), &mut cache).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DiffError>(),
            Some(DiffError::Unsupported(_))
        ));
    }
}
