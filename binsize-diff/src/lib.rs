//! This crate attributes the change in size between two builds of a binary to the things that
//! caused it: sections and the COFF groups within them, libs and their compilands, source files,
//! individual symbols, and the results of several single-binary waste analyses (duplicated data,
//! wasteful virtual functions, foldable template instantiations and type layouts).
//!
//! Every diff borrows from the two `BinaryModel`s being compared. Diffs of the same pair of
//! entities are shared, so a session caches what it builds. Because the numbers are only useful if
//! they add up, the builders check that children account for their parent's size change. With
//! `Strictness::Strict`, any violated invariant fails the diff being built.
//!
//! When diffing a whole binary, a failure affects only the item that failed. It's recorded on the
//! session together with whatever was traced while that item was being diffed.

use clap::Parser;
use clap::ValueEnum;
use std::path::PathBuf;

mod cache;
mod change;
mod contribution_diff;
mod correspondence;
mod diagnostics;
mod duplicate_data_diff;
mod error;
mod lib_diff;
mod pairing;
mod path_similarity;
mod report;
mod section_diff;
mod session;
mod source_file_diff;
mod symbol_diff;
mod template_foldability_diff;
mod type_layout_diff;
mod wasteful_virtual_diff;

pub use cache::DiffSessionDataCache;
pub use change::Change;
pub use contribution_diff::ContributionDiff;
pub use contribution_diff::ContributionDiffs;
pub use correspondence::VeryLikelyTheSame;
pub use correspondence::code_blocks_are_very_likely_the_same;
pub use diagnostics::TraceMessage;
pub use diagnostics::TraceOutput;
pub use diagnostics::enable_diagnostics;
pub use duplicate_data_diff::DuplicateDataItemDiff;
pub use duplicate_data_diff::build_duplicate_data_item_diff;
pub use error::DiffError;
pub use error::Result;
pub use error::Strictness;
pub use error::diff_error_kind;
pub use lib_diff::CompilandDiff;
pub use lib_diff::LibDiff;
pub use lib_diff::build_compiland_diff;
pub use lib_diff::build_lib_diff;
pub use pairing::Pairing;
pub use pairing::pair_exactly;
pub use pairing::pair_greedily;
pub use path_similarity::path_names_are_very_similar;
pub use report::Report;
pub use section_diff::BinarySectionDiff;
pub use section_diff::CoffGroupDiff;
pub use section_diff::build_binary_section_diff;
pub use section_diff::build_binary_section_diffs;
pub use session::DiffFailure;
pub use session::DiffSession;
pub use source_file_diff::SourceFileDiff;
pub use source_file_diff::build_source_file_diff;
pub use symbol_diff::FunctionCodeSymbolDiff;
pub use symbol_diff::SymbolDiff;
pub use symbol_diff::SymbolListEntry;
pub use symbol_diff::build_symbol_diffs;
pub use symbol_diff::create_function_code_symbol_diff;
pub use symbol_diff::create_symbol_diff;
pub use template_foldability_diff::TemplateFoldabilityItemDiff;
pub use template_foldability_diff::build_template_foldability_item_diff;
pub use type_layout_diff::TypeLayoutItemDiff;
pub use type_layout_diff::TypeLayoutItemMemberDiff;
pub use type_layout_diff::build_type_layout_item_diff;
pub use wasteful_virtual_diff::TypeHierarchyChange;
pub use wasteful_virtual_diff::WastedOverrideChange;
pub use wasteful_virtual_diff::WastefulVirtualItemDiff;
pub use wasteful_virtual_diff::build_wasteful_virtual_item_diff;

#[non_exhaustive]
#[derive(Parser, Default, Clone, Debug)]
pub struct Config {
    /// Keys to ignore. A trailing `*` matches any key with that prefix, e.g. `symbol.*`.
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Show only the specified keys.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Hide differences smaller than this many bytes.
    #[arg(long, default_value_t = 0)]
    pub min_size_diff: u64,

    /// Fail an item on any violated invariant. Default for debug builds.
    #[arg(long, conflicts_with = "lenient")]
    pub strict: bool,

    /// Skip uniqueness checks and only warn about bytes that are attributed more than once.
    /// Default for release builds.
    #[arg(long)]
    pub lenient: bool,

    #[arg(long, alias = "color", default_value = "auto")]
    pub colour: Colour,

    /// Model of the binary before the change. `.toml` files are read as TOML, anything else as
    /// postcard.
    pub before: PathBuf,

    /// Model of the binary after the change.
    pub after: PathBuf,
}

#[derive(ValueEnum, Copy, Clone, Default, Debug)]
pub enum Colour {
    #[default]
    Auto,
    Never,
    Always,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse()
    }

    #[must_use]
    pub fn strictness(&self) -> Strictness {
        if self.strict {
            Strictness::Strict
        } else if self.lenient {
            Strictness::Lenient
        } else {
            Strictness::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let config = Config::try_parse_from([
            "binsize-diff",
            "--ignore",
            "symbol.*,section.rsrc",
            "--lenient",
            "--color",
            "never",
            "--min-size-diff",
            "16",
            "before.toml",
            "after.bin",
        ])
        .unwrap();
        assert_eq!(config.ignore, vec!["symbol.*", "section.rsrc"]);
        assert_eq!(config.strictness(), Strictness::Lenient);
        assert_eq!(config.min_size_diff, 16);
        assert_eq!(config.before, PathBuf::from("before.toml"));
        assert_eq!(config.after, PathBuf::from("after.bin"));
    }

    #[test]
    fn test_strict_and_lenient_conflict() {
        let result = Config::try_parse_from(["binsize-diff", "--strict", "--lenient", "a", "b"]);
        assert!(result.is_err());
    }
}
