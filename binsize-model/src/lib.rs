//! This crate defines the model of a single binary that the diff engine consumes: where each
//! section, COFF group, lib, compiland and source file lives, the symbols found in the binary and
//! the results of the single-binary analyses (duplicate data, wasteful virtuals, template
//! foldability and type layouts).
//!
//! Models are produced by whatever reads the binary and its debug information, then serialized
//! either as postcard or, mostly for tests and hand-written fixtures, as TOML.

use anyhow::Context;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub mod binary;
pub mod contribution;
pub mod items;
pub mod rva;
pub mod symbols;
pub mod types;

pub use binary::BinarySection;
pub use binary::CoffGroup;
pub use binary::Compiland;
pub use binary::CompilandBuilder;
pub use binary::ContributionSource;
pub use binary::Library;
pub use binary::LibraryBuilder;
pub use binary::SourceFile;
pub use binary::SourceFileBuilder;
pub use contribution::Contribution;
pub use contribution::ContributionBuilder;
pub use contribution::ContributionsBuilder;
pub use items::DuplicateDataItem;
pub use items::TemplateFoldabilityItem;
pub use items::WastefulVirtualItem;
pub use rva::RvaRange;
pub use rva::RvaRangeSet;
pub use symbols::CodeBlock;
pub use symbols::DataKind;
pub use symbols::FunctionArgument;
pub use symbols::FunctionSymbol;
pub use symbols::FunctionType;
pub use symbols::OtherSymbol;
pub use symbols::StaticDataSymbol;
pub use symbols::SymbolComparisonClass;
pub use symbols::SymbolRef;
pub use types::TypeGraph;
pub use types::TypeLayoutItem;
pub use types::TypeLayoutItemMember;
pub use types::UserDefinedType;

pub type Result<T = (), E = anyhow::Error> = core::result::Result<T, E>;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct BinaryModel {
    /// A short name for the binary, used when reporting.
    pub name: String,

    /// 4 for 32 bit binaries, 8 for 64 bit.
    pub bytes_per_word: u8,

    #[serde(default)]
    pub sections: Vec<BinarySection>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    pub source_files: Vec<SourceFile>,

    #[serde(default)]
    pub functions: Vec<FunctionSymbol>,
    #[serde(default)]
    pub data_symbols: Vec<StaticDataSymbol>,
    #[serde(default)]
    pub other_symbols: Vec<OtherSymbol>,

    #[serde(default)]
    pub user_defined_types: Vec<UserDefinedType>,
    #[serde(default)]
    pub duplicate_data: Vec<DuplicateDataItem>,
    #[serde(default)]
    pub wasteful_virtuals: Vec<WastefulVirtualItem>,
    #[serde(default)]
    pub template_foldability: Vec<TemplateFoldabilityItem>,
    #[serde(default)]
    pub type_layouts: Vec<TypeLayoutItem>,
}

impl BinaryModel {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes_per_word: u8) -> Self {
        Self {
            name: name.into(),
            bytes_per_word,
            sections: Vec::new(),
            libraries: Vec::new(),
            source_files: Vec::new(),
            functions: Vec::new(),
            data_symbols: Vec::new(),
            other_symbols: Vec::new(),
            user_defined_types: Vec::new(),
            duplicate_data: Vec::new(),
            wasteful_virtuals: Vec::new(),
            template_foldability: Vec::new(),
            type_layouts: Vec::new(),
        }
    }

    /// Loads a model. Files with a `.toml` extension are parsed as TOML, everything else as
    /// postcard.
    pub fn from_path(path: &Path) -> Result<Self> {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read `{}`", path.display()))?;
            return Self::from_toml_str(&text)
                .with_context(|| format!("Failed to parse `{}`", path.display()));
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read `{}`", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Failed to parse `{}`", path.display()))
    }

    pub fn write(&self, writer: &mut impl Write) -> Result {
        postcard::to_io(self, writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).context("Invalid binary model")
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid binary model")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<&BinarySection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Lib names are compared case-insensitively.
    #[must_use]
    pub fn library_by_name(&self, name: &str) -> Option<&Library> {
        self.libraries
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
    }

    /// Every symbol in the binary. Functions are returned whole rather than block by block.
    pub fn symbols(&self) -> impl Iterator<Item = SymbolRef<'_>> {
        self.functions
            .iter()
            .map(SymbolRef::Function)
            .chain(self.data_symbols.iter().map(SymbolRef::StaticData))
            .chain(self.other_symbols.iter().map(SymbolRef::Other))
    }

    fn direct_derived_types<'a>(
        &'a self,
        base_name: &str,
    ) -> impl Iterator<Item = &'a UserDefinedType> {
        self.user_defined_types
            .iter()
            .filter(move |t| t.base_types.iter().any(|b| b == base_name))
    }
}

impl TypeGraph for BinaryModel {
    fn user_defined_type(&self, name: &str) -> Option<&UserDefinedType> {
        self.user_defined_types.iter().find(|t| t.name == name)
    }

    fn derived_types(&self, udt: &UserDefinedType) -> Vec<&UserDefinedType> {
        // Diamond inheritance means a type can be reached more than once.
        let mut seen: IndexSet<&str> = IndexSet::new();
        let mut out = Vec::new();
        let mut next = 0;
        let mut frontier: Vec<&UserDefinedType> = self.direct_derived_types(&udt.name).collect();
        while next < frontier.len() {
            let derived = frontier[next];
            next += 1;
            if derived.name == udt.name || !seen.insert(derived.name.as_str()) {
                continue;
            }
            out.push(derived);
            frontier.extend(self.direct_derived_types(&derived.name));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udt(name: &str, bases: &[&str]) -> UserDefinedType {
        UserDefinedType {
            name: name.to_owned(),
            instance_size: 8,
            base_types: bases.iter().map(|b| (*b).to_owned()).collect(),
        }
    }

    fn sample_model() -> BinaryModel {
        let mut model = BinaryModel::new("sample.dll", 8);
        model.sections.push(BinarySection {
            name: ".text".to_owned(),
            rva: 0x1000,
            size: 0x200,
            virtual_size: 0x1f0,
            padding: 0x10,
            coff_groups: vec![CoffGroup {
                name: ".text$mn".to_owned(),
                rva: 0x1000,
                size: 0x200,
                virtual_size: 0x1f0,
                padding: 0,
            }],
        });
        let compiland = CompilandBuilder::new(r"c:\src\a.obj")
            .add_contribution(".text", ".text$mn", RvaRange::from_rva_and_size(0x1000, 0x40))
            .build()
            .unwrap();
        model.libraries.push(
            LibraryBuilder::new(r"c:\src\a.lib")
                .add_compiland(compiland)
                .build()
                .unwrap(),
        );
        model.user_defined_types = vec![
            udt("Base", &[]),
            udt("Left", &["Base"]),
            udt("Right", &["Base"]),
            udt("Diamond", &["Left", "Right"]),
            udt("Unrelated", &[]),
        ];
        model
    }

    #[test]
    fn test_round_trip() {
        let model = sample_model();
        let bytes = model.to_bytes().unwrap();
        assert_eq!(BinaryModel::from_bytes(&bytes).unwrap(), model);

        let text = model.to_toml_string().unwrap();
        assert_eq!(BinaryModel::from_toml_str(&text).unwrap(), model);
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        let model = sample_model();
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("model.toml");
        std::fs::write(&toml_path, model.to_toml_string().unwrap()).unwrap();
        assert_eq!(BinaryModel::from_path(&toml_path).unwrap(), model);

        let bin_path = dir.path().join("model.bin");
        let mut file = std::fs::File::create(&bin_path).unwrap();
        model.write(&mut file).unwrap();
        drop(file);
        assert_eq!(BinaryModel::from_path(&bin_path).unwrap(), model);
    }

    #[test]
    fn test_derived_types_are_transitive_and_deduplicated() {
        let model = sample_model();
        let base = model.user_defined_type("Base").unwrap();
        let names: Vec<&str> = model
            .derived_types(base)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["Left", "Right", "Diamond"]);

        let unrelated = model.user_defined_type("Unrelated").unwrap();
        assert!(model.derived_types(unrelated).is_empty());
    }

    #[test]
    fn test_lookups() {
        let model = sample_model();
        assert!(model.library_by_name(r"C:\SRC\A.LIB").is_some());
        assert_eq!(
            model
                .section_by_name(".text")
                .map(BinarySection::virtual_size_including_padding),
            Some(0x200)
        );
    }
}
