//! User-defined types, their inheritance graph and their memory layouts.

use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserDefinedType {
    pub name: String,
    pub instance_size: u32,

    /// Names of the direct base types.
    #[serde(default)]
    pub base_types: Vec<String>,
}

/// Answers questions about the inheritance hierarchy of one binary.
pub trait TypeGraph {
    fn user_defined_type(&self, name: &str) -> Option<&UserDefinedType>;

    /// Every type that directly or indirectly derives from `udt`, each exactly once, nearest
    /// first.
    fn derived_types(&self, udt: &UserDefinedType) -> Vec<&UserDefinedType>;
}

pub const ALIGNMENT_PADDING_NAME: &str = "<alignment padding>";
pub const TAIL_SLOP_ALIGNMENT_NAME: &str = "<tail slop alignment padding>";
pub const VFPTR_NAME: &str = "vfptr";

/// One member of a type layout. Offsets and sizes are in bits so that bitfields are exact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TypeLayoutItemMember {
    pub name: String,
    pub offset_bits: u64,
    pub size_bits: u64,
    #[serde(default)]
    pub is_bit_field: bool,
    #[serde(default)]
    pub is_alignment_member: bool,
    #[serde(default)]
    pub is_tail_slop_alignment_member: bool,
    #[serde(default)]
    pub type_name: Option<String>,
}

impl TypeLayoutItemMember {
    #[must_use]
    pub fn data(name: &str, type_name: &str, offset_bytes: u64, size_bytes: u64) -> Self {
        Self {
            name: name.to_owned(),
            offset_bits: offset_bytes * 8,
            size_bits: size_bytes * 8,
            is_bit_field: false,
            is_alignment_member: false,
            is_tail_slop_alignment_member: false,
            type_name: Some(type_name.to_owned()),
        }
    }

    #[must_use]
    pub fn bit_field(name: &str, type_name: &str, offset_bits: u64, size_bits: u64) -> Self {
        Self {
            is_bit_field: true,
            offset_bits,
            size_bits,
            ..Self::data(name, type_name, 0, 0)
        }
    }

    #[must_use]
    pub fn alignment_padding(offset_bits: u64, size_bits: u64) -> Self {
        Self {
            name: ALIGNMENT_PADDING_NAME.to_owned(),
            offset_bits,
            size_bits,
            is_bit_field: offset_bits % 8 != 0 || size_bits % 8 != 0,
            is_alignment_member: true,
            is_tail_slop_alignment_member: false,
            type_name: None,
        }
    }

    #[must_use]
    pub fn tail_slop(offset_bits: u64, size_bits: u64) -> Self {
        Self {
            name: TAIL_SLOP_ALIGNMENT_NAME.to_owned(),
            is_tail_slop_alignment_member: true,
            ..Self::alignment_padding(offset_bits, size_bits)
        }
    }

    #[must_use]
    pub fn vfptr(offset_bytes: u64, size_bytes: u64) -> Self {
        Self {
            type_name: None,
            ..Self::data(VFPTR_NAME, "", offset_bytes, size_bytes)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TypeLayoutItem {
    pub user_defined_type: UserDefinedType,

    /// Padding inside this type, not counting padding inside its base types.
    #[serde(default)]
    pub alignment_waste_exclusive_bits: u64,

    /// Bytes used for vfptrs introduced by this type.
    #[serde(default)]
    pub used_for_vfptrs_exclusive: u32,

    #[serde(default)]
    pub members: Vec<TypeLayoutItemMember>,

    #[serde(default)]
    pub base_type_layouts: Vec<TypeLayoutItem>,
}

impl TypeLayoutItem {
    #[must_use]
    pub fn alignment_waste_including_base_types_bits(&self) -> u64 {
        self.alignment_waste_exclusive_bits
            + self
                .base_type_layouts
                .iter()
                .map(TypeLayoutItem::alignment_waste_including_base_types_bits)
                .sum::<u64>()
    }

    #[must_use]
    pub fn used_for_vfptrs_including_base_types(&self) -> u64 {
        u64::from(self.used_for_vfptrs_exclusive)
            + self
                .base_type_layouts
                .iter()
                .map(TypeLayoutItem::used_for_vfptrs_including_base_types)
                .sum::<u64>()
    }
}
