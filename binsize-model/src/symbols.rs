//! Symbols recovered from the debug information of a single binary.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Determines which symbols may be compared with one another. Symbols of different classes are
/// never the same thing, even if they have the same name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolComparisonClass {
    PrimaryCodeBlock,
    SeparatedCodeBlock,
    StaticData,
    PublicSymbol,
    Thunk,
    StringLiteral,
    ImportDescriptor,
    PdataEntry,
    XdataEntry,
    RsrcEntry,
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataKind {
    #[default]
    Unknown,
    Local,
    StaticLocal,
    Param,
    ObjectPointer,
    FileStatic,
    Global,
    Member,
    StaticMember,
    Constant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionArgument {
    /// Absent when the debug information didn't record a name.
    #[serde(default)]
    pub name: Option<String>,
    pub type_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_volatile: bool,
    #[serde(default)]
    pub arguments: Vec<FunctionArgument>,
    pub return_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeBlock {
    pub rva: u32,
    pub size: u32,
}

/// A function. Functions that the compiler split into a hot primary block plus one or more
/// separated (usually cold) blocks are "complex", others are "simple".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    /// Fully qualified name, including namespaces and enclosing types.
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_pure: bool,
    #[serde(default)]
    pub function_type: Option<FunctionType>,

    /// RVA 0 is used for functions that have no code in the binary, such as pure virtuals.
    pub primary_block: CodeBlock,
    #[serde(default)]
    pub separated_blocks: Vec<CodeBlock>,
}

impl FunctionSymbol {
    #[must_use]
    pub fn is_complex(&self) -> bool {
        !self.separated_blocks.is_empty()
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.blocks().map(|b| u64::from(b.size)).sum()
    }

    /// The primary block followed by any separated blocks. Block indexes used by `SymbolRef` refer
    /// to positions in this sequence.
    pub fn blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        std::iter::once(&self.primary_block).chain(&self.separated_blocks)
    }

    #[must_use]
    pub fn block(&self, index: usize) -> Option<&CodeBlock> {
        if index == 0 {
            Some(&self.primary_block)
        } else {
            self.separated_blocks.get(index - 1)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StaticDataSymbol {
    pub name: String,
    pub rva: u32,
    pub size: u32,
    #[serde(default)]
    pub data_kind: DataKind,
    #[serde(default)]
    pub type_name: Option<String>,

    /// The enclosing function of a function-local static.
    #[serde(default)]
    pub parent_function: Option<Box<FunctionSymbol>>,

    /// Set for symbols that were synthesized while walking exception-handling unwind data rather
    /// than found in the debug information.
    #[serde(default)]
    pub from_xdata: bool,
}

/// Any other symbol with an address: public symbols, thunks, import descriptors, PE structures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OtherSymbol {
    pub name: String,
    pub rva: u32,
    pub size: u32,
    pub comparison_class: SymbolComparisonClass,

    /// Set when the linker folded this symbol with identical ones (COMDAT folding). All of the
    /// folded symbols share the canonical name.
    #[serde(default)]
    pub canonical_name: Option<String>,
}

/// A borrowed view of any symbol in a binary.
#[derive(Debug, Clone, Copy)]
pub enum SymbolRef<'a> {
    Function(&'a FunctionSymbol),

    /// One block of a function. Index 0 is the primary block.
    CodeBlock {
        function: &'a FunctionSymbol,
        index: usize,
    },

    StaticData(&'a StaticDataSymbol),
    Other(&'a OtherSymbol),
}

impl<'a> SymbolRef<'a> {
    #[must_use]
    pub fn primary_block(function: &'a FunctionSymbol) -> Self {
        SymbolRef::CodeBlock { function, index: 0 }
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        match *self {
            SymbolRef::Function(f) | SymbolRef::CodeBlock { function: f, .. } => &f.name,
            SymbolRef::StaticData(d) => &d.name,
            SymbolRef::Other(o) => &o.name,
        }
    }

    #[must_use]
    pub fn rva(&self) -> u32 {
        match *self {
            SymbolRef::Function(f) => f.primary_block.rva,
            SymbolRef::CodeBlock { function, index } => {
                function.block(index).map_or(0, |b| b.rva)
            }
            SymbolRef::StaticData(d) => d.rva,
            SymbolRef::Other(o) => o.rva,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        match *self {
            SymbolRef::Function(f) => f.size(),
            SymbolRef::CodeBlock { function, index } => {
                function.block(index).map_or(0, |b| u64::from(b.size))
            }
            SymbolRef::StaticData(d) => u64::from(d.size),
            SymbolRef::Other(o) => u64::from(o.size),
        }
    }

    /// Symbols only have a virtual size that differs from their size when they live in
    /// zero-initialised data, which the debug information doesn't distinguish. So the two are
    /// the same.
    #[must_use]
    pub fn virtual_size(&self) -> u64 {
        self.size()
    }

    #[must_use]
    pub fn comparison_class(&self) -> SymbolComparisonClass {
        match *self {
            SymbolRef::Function(_) | SymbolRef::CodeBlock { index: 0, .. } => {
                SymbolComparisonClass::PrimaryCodeBlock
            }
            SymbolRef::CodeBlock { .. } => SymbolComparisonClass::SeparatedCodeBlock,
            SymbolRef::StaticData(_) => SymbolComparisonClass::StaticData,
            SymbolRef::Other(o) => o.comparison_class,
        }
    }

    #[must_use]
    pub fn canonical_name(&self) -> Option<&'a str> {
        match *self {
            SymbolRef::Other(o) => o.canonical_name.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_code_block(&self) -> bool {
        matches!(self, SymbolRef::CodeBlock { .. })
    }

    /// The function that owns this symbol, if this is a code block.
    #[must_use]
    pub fn parent_function(&self) -> Option<&'a FunctionSymbol> {
        match *self {
            SymbolRef::CodeBlock { function, .. } => Some(function),
            _ => None,
        }
    }
}

impl Display for SymbolRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolRef::CodeBlock { function, index } if *index > 0 => {
                write!(f, "{} (separated block {index})", function.name)
            }
            _ => self.name().fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex_function() -> FunctionSymbol {
        FunctionSymbol {
            name: "CFoo::Run".to_owned(),
            is_static: false,
            is_virtual: false,
            is_pure: false,
            function_type: None,
            primary_block: CodeBlock {
                rva: 0x1000,
                size: 0x40,
            },
            separated_blocks: vec![CodeBlock {
                rva: 0x9000,
                size: 0x10,
            }],
        }
    }

    #[test]
    fn test_blocks() {
        let f = complex_function();
        assert!(f.is_complex());
        assert_eq!(f.size(), 0x50);

        let separated = SymbolRef::CodeBlock {
            function: &f,
            index: 1,
        };
        assert_eq!(separated.rva(), 0x9000);
        assert_eq!(separated.size(), 0x10);
        assert_eq!(
            separated.comparison_class(),
            SymbolComparisonClass::SeparatedCodeBlock
        );
        assert_eq!(separated.to_string(), "CFoo::Run (separated block 1)");

        let primary = SymbolRef::primary_block(&f);
        assert_eq!(
            primary.comparison_class(),
            SymbolComparisonClass::PrimaryCodeBlock
        );
        assert_eq!(primary.parent_function().map(|p| p.name.as_str()), Some("CFoo::Run"));
    }
}
