//! Sections, COFF groups and the entities that contribute bytes to them.

use crate::Result;
use crate::contribution::Contribution;
use crate::contribution::ContributionsBuilder;
use crate::rva::RvaRange;
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BinarySection {
    pub name: String,
    pub rva: u32,
    pub size: u32,
    pub virtual_size: u32,

    /// Bytes reserved in memory after the section to satisfy alignment, but not present on disk.
    #[serde(default)]
    pub padding: u32,

    #[serde(default)]
    pub coff_groups: Vec<CoffGroup>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CoffGroup {
    pub name: String,
    pub rva: u32,
    pub size: u32,
    pub virtual_size: u32,
    #[serde(default)]
    pub padding: u32,
}

impl BinarySection {
    #[must_use]
    pub fn virtual_size_including_padding(&self) -> u64 {
        u64::from(self.virtual_size) + u64::from(self.padding)
    }

    #[must_use]
    pub fn coff_group_by_name(&self, name: &str) -> Option<&CoffGroup> {
        self.coff_groups.iter().find(|g| g.name == name)
    }
}

impl CoffGroup {
    #[must_use]
    pub fn virtual_size_including_padding(&self) -> u64 {
        u64::from(self.virtual_size) + u64::from(self.padding)
    }
}

/// Something that owns contributions to sections and COFF groups.
pub trait ContributionSource {
    fn name(&self) -> &str;

    fn section_contributions(&self) -> &IndexMap<String, Contribution>;

    fn coff_group_contributions(&self) -> &IndexMap<String, Contribution>;

    fn size(&self) -> u64 {
        self.section_contributions()
            .values()
            .map(Contribution::size)
            .sum()
    }

    fn virtual_size(&self) -> u64 {
        self.section_contributions()
            .values()
            .map(Contribution::virtual_size)
            .sum()
    }
}

/// One object file's contribution to the binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Compiland {
    pub name: String,
    #[serde(default)]
    pub section_contributions: IndexMap<String, Contribution>,
    #[serde(default)]
    pub coff_group_contributions: IndexMap<String, Contribution>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,

    /// Compilands in link order. Linker-synthesized `Import:` compilands may share a name.
    #[serde(default)]
    pub compilands: Vec<Compiland>,

    #[serde(default)]
    pub section_contributions: IndexMap<String, Contribution>,
    #[serde(default)]
    pub coff_group_contributions: IndexMap<String, Contribution>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    #[serde(default)]
    pub section_contributions: IndexMap<String, Contribution>,
    #[serde(default)]
    pub coff_group_contributions: IndexMap<String, Contribution>,
}

impl Library {
    #[must_use]
    pub fn compiland_by_name(&self, name: &str) -> Option<&Compiland> {
        self.compilands.iter().find(|c| c.name == name)
    }
}

macro_rules! impl_contribution_source {
    ($t:ty) => {
        impl ContributionSource for $t {
            fn name(&self) -> &str {
                &self.name
            }

            fn section_contributions(&self) -> &IndexMap<String, Contribution> {
                &self.section_contributions
            }

            fn coff_group_contributions(&self) -> &IndexMap<String, Contribution> {
                &self.coff_group_contributions
            }
        }
    };
}

impl_contribution_source!(Compiland);
impl_contribution_source!(Library);
impl_contribution_source!(SourceFile);

/// Accumulates the section and COFF group contributions of a compiland or source file. Every range
/// is attributed to both its section and the COFF group within it, so the two views always sum to
/// the same total.
#[derive(Debug, Clone)]
pub struct CompilandBuilder {
    name: String,
    sections: ContributionsBuilder,
    coff_groups: ContributionsBuilder,
}

impl CompilandBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: ContributionsBuilder::default(),
            coff_groups: ContributionsBuilder::default(),
        }
    }

    pub fn add_contribution(
        &mut self,
        section: &str,
        coff_group: &str,
        range: RvaRange,
    ) -> &mut Self {
        self.sections.add(section, range);
        self.coff_groups.add(coff_group, range);
        self
    }

    pub fn build(&self) -> Result<Compiland> {
        let (section_contributions, coff_group_contributions) =
            build_both(&self.sections, &self.coff_groups)
                .with_context(|| format!("Failed to build compiland `{}`", self.name))?;
        Ok(Compiland {
            name: self.name.clone(),
            section_contributions,
            coff_group_contributions,
        })
    }
}

/// Source files attribute bytes exactly the way compilands do.
#[derive(Debug, Clone)]
pub struct SourceFileBuilder {
    inner: CompilandBuilder,
}

impl SourceFileBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: CompilandBuilder::new(name),
        }
    }

    pub fn add_contribution(
        &mut self,
        section: &str,
        coff_group: &str,
        range: RvaRange,
    ) -> &mut Self {
        self.inner.add_contribution(section, coff_group, range);
        self
    }

    pub fn build(&self) -> Result<SourceFile> {
        let compiland = self.inner.build()?;
        Ok(SourceFile {
            name: compiland.name,
            section_contributions: compiland.section_contributions,
            coff_group_contributions: compiland.coff_group_contributions,
        })
    }
}

/// A library's contributions are the union of those of its compilands.
#[derive(Debug, Clone)]
pub struct LibraryBuilder {
    name: String,
    compilands: Vec<Compiland>,
}

impl LibraryBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compilands: Vec::new(),
        }
    }

    pub fn add_compiland(&mut self, compiland: Compiland) -> &mut Self {
        self.compilands.push(compiland);
        self
    }

    pub fn build(&self) -> Result<Library> {
        let mut sections = ContributionsBuilder::default();
        let mut coff_groups = ContributionsBuilder::default();
        for compiland in &self.compilands {
            sections.absorb(&compiland.section_contributions);
            coff_groups.absorb(&compiland.coff_group_contributions);
        }
        let (section_contributions, coff_group_contributions) =
            build_both(&sections, &coff_groups)
                .with_context(|| format!("Failed to build lib `{}`", self.name))?;
        Ok(Library {
            name: self.name.clone(),
            compilands: self.compilands.clone(),
            section_contributions,
            coff_group_contributions,
        })
    }
}

fn build_both(
    sections: &ContributionsBuilder,
    coff_groups: &ContributionsBuilder,
) -> Result<(IndexMap<String, Contribution>, IndexMap<String, Contribution>)> {
    Ok((sections.build()?, coff_groups.build()?))
}
