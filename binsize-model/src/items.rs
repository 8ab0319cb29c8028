//! Results of the single-binary analyses that the diff engine compares across binaries.

use crate::symbols::FunctionSymbol;
use crate::symbols::StaticDataSymbol;
use crate::types::UserDefinedType;
use serde::Deserialize;
use serde::Serialize;

/// A piece of static data that was emitted once per referencing compiland instead of once per
/// binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DuplicateDataItem {
    pub symbol: StaticDataSymbol,

    /// Names of the compilands that each carry a copy.
    pub referenced_in: Vec<String>,
}

impl DuplicateDataItem {
    #[must_use]
    pub fn total_size(&self) -> u64 {
        u64::from(self.symbol.size) * self.referenced_in.len() as u64
    }

    #[must_use]
    pub fn wasted_size(&self) -> u64 {
        u64::from(self.symbol.size) * (self.referenced_in.len() as u64).saturating_sub(1)
    }
}

/// Instantiations of one template whose code is similar enough that they could share an
/// implementation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateFoldabilityItem {
    pub template_name: String,
    pub instantiation_names: Vec<String>,
    pub total_size: u64,
    pub wasted_size: u64,
}

/// A type with virtual functions whose dispatch buys nothing: pure virtuals with exactly one
/// override, or non-pure virtuals that nothing overrides. Each costs one vtable slot in the type
/// and in every type derived from it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WastefulVirtualItem {
    pub user_defined_type: UserDefinedType,
    #[serde(default)]
    pub is_com_type: bool,
    pub bytes_per_word: u8,

    /// The number of types that directly or indirectly derive from `user_defined_type`.
    pub derived_type_count: u32,

    #[serde(default)]
    pub wasted_overrides_pure_with_exactly_one_override: Vec<FunctionSymbol>,
    #[serde(default)]
    pub wasted_overrides_non_pure_with_no_overrides: Vec<FunctionSymbol>,
}

impl WastefulVirtualItem {
    /// Bytes wasted per vtable slot, across the type itself and all derived types. A type with no
    /// derived types has nothing to devirtualize against, so wastes nothing.
    #[must_use]
    pub fn waste_per_slot(&self) -> u64 {
        if self.derived_type_count == 0 {
            return 0;
        }
        (u64::from(self.derived_type_count) + 1) * u64::from(self.bytes_per_word)
    }

    #[must_use]
    pub fn wasted_size(&self) -> u64 {
        self.wasted_override_count() as u64 * self.waste_per_slot()
    }

    #[must_use]
    pub fn wasted_override_count(&self) -> usize {
        self.wasted_overrides_pure_with_exactly_one_override.len()
            + self.wasted_overrides_non_pure_with_no_overrides.len()
    }

    pub fn all_wasted_overrides(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.wasted_overrides_pure_with_exactly_one_override
            .iter()
            .chain(&self.wasted_overrides_non_pure_with_no_overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::CodeBlock;
    use crate::symbols::DataKind;

    fn function(name: &str) -> FunctionSymbol {
        FunctionSymbol {
            name: name.to_owned(),
            is_static: false,
            is_virtual: true,
            is_pure: false,
            function_type: None,
            primary_block: CodeBlock { rva: 0, size: 0 },
            separated_blocks: Vec::new(),
        }
    }

    #[test]
    fn test_wasteful_virtual_sizes() {
        let mut item = WastefulVirtualItem {
            user_defined_type: UserDefinedType {
                name: "Base".to_owned(),
                instance_size: 8,
                base_types: Vec::new(),
            },
            is_com_type: false,
            bytes_per_word: 8,
            derived_type_count: 2,
            wasted_overrides_pure_with_exactly_one_override: vec![function("Base::A")],
            wasted_overrides_non_pure_with_no_overrides: vec![
                function("Base::B"),
                function("Base::C"),
            ],
        };
        assert_eq!(item.waste_per_slot(), 24);
        assert_eq!(item.wasted_size(), 72);

        item.derived_type_count = 0;
        assert_eq!(item.waste_per_slot(), 0);
        assert_eq!(item.wasted_size(), 0);
    }

    #[test]
    fn test_duplicate_data_sizes() {
        let item = DuplicateDataItem {
            symbol: StaticDataSymbol {
                name: "kTable".to_owned(),
                rva: 0x3000,
                size: 100,
                data_kind: DataKind::FileStatic,
                type_name: Some("const int[25]".to_owned()),
                parent_function: None,
                from_xdata: false,
            },
            referenced_in: vec!["a.obj".to_owned(), "b.obj".to_owned(), "c.obj".to_owned()],
        };
        assert_eq!(item.total_size(), 300);
        assert_eq!(item.wasted_size(), 200);
    }
}
