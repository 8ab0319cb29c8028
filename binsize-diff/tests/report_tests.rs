//! Writes pairs of binary models to disk, runs them through `Report::from_config` the same way the
//! binary does, then checks what was reported.

use binsize_diff::Config;
use binsize_diff::DiffError;
use binsize_diff::DiffSession;
use binsize_diff::Report;
use binsize_diff::Strictness;
use binsize_model::BinaryModel;
use binsize_model::BinarySection;
use binsize_model::CodeBlock;
use binsize_model::CoffGroup;
use binsize_model::CompilandBuilder;
use binsize_model::FunctionSymbol;
use binsize_model::LibraryBuilder;
use binsize_model::RvaRange;
use binsize_model::TypeLayoutItem;
use binsize_model::TypeLayoutItemMember;
use binsize_model::UserDefinedType;
use clap::Parser as _;
use rstest::rstest;
use std::path::Path;
use std::path::PathBuf;

fn section(name: &str, group: &str, rva: u32, size: u32) -> BinarySection {
    BinarySection {
        name: name.to_owned(),
        rva,
        size,
        virtual_size: size,
        padding: 0,
        coff_groups: vec![CoffGroup {
            name: group.to_owned(),
            rva,
            size,
            virtual_size: size,
            padding: 0,
        }],
    }
}

fn function(name: &str, rva: u32, size: u32) -> FunctionSymbol {
    FunctionSymbol {
        name: name.to_owned(),
        is_static: false,
        is_virtual: false,
        is_pure: false,
        function_type: None,
        primary_block: CodeBlock { rva, size },
        separated_blocks: Vec::new(),
    }
}

/// Two libs. `core.lib` has one compiland whose code is `alloc_size` bytes, built in `build_dir`.
/// `util.lib` never changes.
fn model(name: &str, build_dir: &str, alloc_size: u32) -> BinaryModel {
    let util_rva = 0x1000 + alloc_size;
    let mut model = BinaryModel::new(name, 8);
    model.sections = vec![
        section(".text", ".text$mn", 0x1000, alloc_size + 0x80),
        section(".data", ".data", 0x8000, 0x40),
    ];

    let alloc = CompilandBuilder::new(format!(r"{build_dir}\src\core\alloc.obj"))
        .add_contribution(".text", ".text$mn", RvaRange::from_rva_and_size(0x1000, alloc_size))
        .build()
        .unwrap();
    let util = CompilandBuilder::new("util.obj")
        .add_contribution(".text", ".text$mn", RvaRange::from_rva_and_size(util_rva, 0x80))
        .add_contribution(".data", ".data", RvaRange::from_rva_and_size(0x8000, 0x40))
        .build()
        .unwrap();
    model.libraries = vec![
        LibraryBuilder::new("core.lib")
            .add_compiland(alloc)
            .build()
            .unwrap(),
        LibraryBuilder::new("util.lib")
            .add_compiland(util)
            .build()
            .unwrap(),
    ];

    model.functions = vec![
        function("Allocator::Grow", 0x1000, alloc_size),
        function("Util::Hash", util_rva, 0x80),
    ];
    model
}

fn write_model(dir: &Path, file_name: &str, model: &BinaryModel) -> PathBuf {
    let path = dir.join(file_name);
    if file_name.ends_with(".toml") {
        std::fs::write(&path, model.to_toml_string().unwrap()).unwrap();
    } else {
        std::fs::write(&path, model.to_bytes().unwrap()).unwrap();
    }
    path
}

fn config(before: &Path, after: &Path, extra_args: &[&str]) -> Config {
    let mut args = vec!["binsize-diff", "--colour", "never"];
    args.extend_from_slice(extra_args);
    args.push(before.to_str().unwrap());
    args.push(after.to_str().unwrap());
    Config::try_parse_from(args).unwrap()
}

#[rstest]
#[case::toml("before.toml", "after.toml")]
#[case::postcard("before.bin", "after.bin")]
fn test_growth_is_attributed(#[case] before_file: &str, #[case] after_file: &str) {
    let dir = tempfile::tempdir().unwrap();
    let before = write_model(dir.path(), before_file, &model("before", r"o:\build1", 0x40));
    let after = write_model(dir.path(), after_file, &model("after", r"o:\build2", 0x60));

    let report = Report::from_config(config(&before, &after, &["--strict"])).unwrap();
    assert!(!report.has_failures(), "{report}");
    assert_eq!(
        report.keys().collect::<Vec<_>>(),
        vec!["section..text", "lib.core.lib", "symbol.Allocator::Grow"]
    );
    assert_eq!(report.delta("section..text"), Some(0x20));
    assert_eq!(report.delta("lib.core.lib"), Some(0x20));
    assert_eq!(report.delta("symbol.Allocator::Grow"), Some(0x20));

    // The compiland moved to a different build directory, but it's still the same compiland.
    let text = report.to_string();
    assert!(text.contains(r"o:\build1\src\core\alloc.obj (changed) +32"), "{text}");
}

#[test]
fn test_only_filter() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_model(dir.path(), "before.toml", &model("before", r"o:\b", 0x40));
    let after = write_model(dir.path(), "after.toml", &model("after", r"o:\b", 0x60));

    let report = Report::from_config(config(&before, &after, &["--only", "lib.*"])).unwrap();
    assert_eq!(report.keys().collect::<Vec<_>>(), vec!["lib.core.lib"]);
}

#[test]
fn test_missing_model_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_model(dir.path(), "before.toml", &model("before", r"o:\b", 0x40));
    let error = Report::from_config(config(&before, &dir.path().join("nope.toml"), &[]))
        .err()
        .unwrap();
    assert!(format!("{error:#}").contains("nope.toml"), "{error:#}");
}

fn broken_layout(members: Vec<TypeLayoutItemMember>) -> TypeLayoutItem {
    TypeLayoutItem {
        user_defined_type: UserDefinedType {
            name: "Packet".to_owned(),
            instance_size: 16,
            base_types: Vec::new(),
        },
        alignment_waste_exclusive_bits: 0,
        used_for_vfptrs_exclusive: 0,
        members,
        base_type_layouts: Vec::new(),
    }
}

#[test]
fn test_one_failed_item_does_not_stop_the_rest() {
    let mut before = model("before", r"o:\b", 0x40);
    let mut after = model("after", r"o:\b", 0x60);
    before.type_layouts.push(broken_layout(vec![
        TypeLayoutItemMember::data("kind", "char", 0, 1),
        TypeLayoutItemMember::alignment_padding(8, 24),
        TypeLayoutItemMember::alignment_padding(32, 32),
        TypeLayoutItemMember::data("length", "uint64_t", 8, 8),
    ]));
    after.type_layouts.push(broken_layout(vec![
        TypeLayoutItemMember::data("kind", "short", 0, 2),
        TypeLayoutItemMember::alignment_padding(16, 48),
        TypeLayoutItemMember::data("length", "uint64_t", 8, 8),
    ]));

    let mut session = DiffSession::new(&before, &after, Strictness::Lenient);
    let report = Report::from_session(&mut session, Config::default()).unwrap();

    assert!(report.has_failures());
    let failure = &report.failures()[0];
    assert_eq!(failure.category, "type layout");
    assert_eq!(failure.item, "Packet");
    assert!(matches!(
        failure.kind,
        Some(DiffError::InvariantViolation(_))
    ));
    assert_eq!(report.delta("lib.core.lib"), Some(0x20));
    assert!(report.to_string().contains("type layout `Packet`"));
}
