//! Decides whether two symbols or types from different binaries are "very likely the same" thing.
//!
//! There's no identifier that survives a rebuild, so identity is structural: names first, then
//! whatever else the debug information gives us that a rebuild shouldn't change. Every predicate
//! here is symmetric and has no side effects.

use binsize_model::FunctionSymbol;
use binsize_model::FunctionType;
use binsize_model::StaticDataSymbol;
use binsize_model::SymbolRef;
use binsize_model::UserDefinedType;

pub trait VeryLikelyTheSame {
    fn is_very_likely_the_same_as(&self, other: &Self) -> bool;
}

impl VeryLikelyTheSame for FunctionSymbol {
    /// Simple and complex functions compare equal if everything except their block structure
    /// matches. When only one side has type information we can only go on the name and
    /// staticness.
    fn is_very_likely_the_same_as(&self, other: &Self) -> bool {
        if self.name != other.name || self.is_static != other.is_static {
            return false;
        }
        match (&self.function_type, &other.function_type) {
            (Some(a), Some(b)) => function_types_match(a, b),
            _ => true,
        }
    }
}

/// Argument names are ignored. Renaming a parameter doesn't make a different function, but
/// reordering the types does.
fn function_types_match(a: &FunctionType, b: &FunctionType) -> bool {
    a.is_const == b.is_const
        && a.is_volatile == b.is_volatile
        && a.return_type == b.return_type
        && a.arguments.len() == b.arguments.len()
        && a.arguments
            .iter()
            .zip(&b.arguments)
            .all(|(x, y)| x.type_name == y.type_name)
}

impl VeryLikelyTheSame for StaticDataSymbol {
    /// Data kinds are never interchangeable, even though a variable could in principle move from
    /// file-static to static-local between builds.
    fn is_very_likely_the_same_as(&self, other: &Self) -> bool {
        if self.name != other.name || self.data_kind != other.data_kind {
            return false;
        }
        let types_match = match (&self.type_name, &other.type_name) {
            (None, None) => true,
            (Some(a), Some(b)) => data_type_names_match(a, b),
            _ => false,
        };
        if !types_match {
            return false;
        }
        match (&self.parent_function, &other.parent_function) {
            (None, None) => true,
            (Some(a), Some(b)) => a.is_very_likely_the_same_as(b),
            _ => false,
        }
    }
}

/// Types of function-local statics embed compiler-generated scope names such as `__l7` that
/// change whenever code above them changes. Only the last scope segment is compared, so the
/// enclosing scopes are ignored entirely: `Foo::__l7::X` and `Bar::__l7::X` match.
fn data_type_names_match(a: &str, b: &str) -> bool {
    a == b || last_scope_segment(a) == last_scope_segment(b)
}

fn last_scope_segment(name: &str) -> &str {
    name.rsplit_once("::").map_or(name, |(_, last)| last)
}

impl VeryLikelyTheSame for UserDefinedType {
    fn is_very_likely_the_same_as(&self, other: &Self) -> bool {
        self.name == other.name
            || normalize_generated_scopes(&self.name) == normalize_generated_scopes(&other.name)
    }
}

/// Replaces the counter in each `__l<digits>` scope segment so that names differing only in those
/// counters compare equal.
fn normalize_generated_scopes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find("__l") {
        let (head, tail) = rest.split_at(pos + 3);
        out.push_str(head);
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            out.push('#');
        }
        rest = &tail[digits..];
    }
    out.push_str(rest);
    out
}

/// Code blocks match when their functions match. A primary block only matches a primary block.
/// Separated blocks are only paired when each function has exactly one, since there's no
/// reliable way to tell several separated blocks apart.
#[must_use]
pub fn code_blocks_are_very_likely_the_same(
    a_function: &FunctionSymbol,
    a_index: usize,
    b_function: &FunctionSymbol,
    b_index: usize,
) -> bool {
    if !a_function.is_very_likely_the_same_as(b_function) {
        return false;
    }
    match (a_index, b_index) {
        (0, 0) => true,
        (0, _) | (_, 0) => false,
        _ => a_function.separated_blocks.len() == 1 && b_function.separated_blocks.len() == 1,
    }
}

impl VeryLikelyTheSame for SymbolRef<'_> {
    fn is_very_likely_the_same_as(&self, other: &Self) -> bool {
        match (*self, *other) {
            (SymbolRef::Function(a), SymbolRef::Function(b)) => a.is_very_likely_the_same_as(b),
            (
                SymbolRef::CodeBlock {
                    function: a,
                    index: a_index,
                },
                SymbolRef::CodeBlock {
                    function: b,
                    index: b_index,
                },
            ) => code_blocks_are_very_likely_the_same(a, a_index, b, b_index),
            (SymbolRef::StaticData(a), SymbolRef::StaticData(b)) => {
                a.is_very_likely_the_same_as(b)
            }
            (SymbolRef::Other(_), SymbolRef::Other(_)) => generic_symbols_match(*self, *other),
            _ => false,
        }
    }
}

/// Symbols of the same comparison class match by name. COMDAT-folded symbols also match if they
/// were folded into the same canonical symbol, since the name we see for a folded symbol is
/// whichever one the linker happened to keep.
fn generic_symbols_match(a: SymbolRef, b: SymbolRef) -> bool {
    if a.comparison_class() != b.comparison_class() {
        return false;
    }
    if a.name() == b.name() {
        return true;
    }
    match (a.canonical_name(), b.canonical_name()) {
        (Some(x), Some(y)) => a.rva() != 0 && b.rva() != 0 && x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsize_model::CodeBlock;
    use binsize_model::DataKind;
    use binsize_model::FunctionArgument;
    use binsize_model::OtherSymbol;
    use binsize_model::SymbolComparisonClass;
    use rstest::rstest;

    fn args(types: &[(&str, &str)]) -> Vec<FunctionArgument> {
        types
            .iter()
            .map(|(name, ty)| FunctionArgument {
                name: Some((*name).to_owned()),
                type_name: (*ty).to_owned(),
            })
            .collect()
    }

    fn function(
        name: &str,
        is_static: bool,
        arguments: Option<&[(&str, &str)]>,
        rva: u32,
        separated: usize,
    ) -> FunctionSymbol {
        FunctionSymbol {
            name: name.to_owned(),
            is_static,
            is_virtual: false,
            is_pure: false,
            function_type: arguments.map(|a| FunctionType {
                is_const: false,
                is_volatile: false,
                arguments: args(a),
                return_type: "void".to_owned(),
            }),
            primary_block: CodeBlock { rva, size: 0x20 },
            separated_blocks: (0..separated)
                .map(|i| CodeBlock {
                    rva: rva + 0x8000 + i as u32 * 0x10,
                    size: 0x10,
                })
                .collect(),
        }
    }

    fn data(
        name: &str,
        kind: DataKind,
        ty: Option<&str>,
        parent: Option<FunctionSymbol>,
    ) -> StaticDataSymbol {
        StaticDataSymbol {
            name: name.to_owned(),
            rva: 0x4000,
            size: 8,
            data_kind: kind,
            type_name: ty.map(str::to_owned),
            parent_function: parent.map(Box::new),
            from_xdata: false,
        }
    }

    fn assert_symmetric<T: VeryLikelyTheSame>(a: &T, b: &T, expected: bool) {
        assert_eq!(a.is_very_likely_the_same_as(b), expected);
        assert_eq!(b.is_very_likely_the_same_as(a), expected);
    }

    #[test]
    fn test_static_mismatch() {
        let a = function("CFoo::ABC", false, Some(&[]), 0x1000, 0);
        let b = function("CFoo::ABC", true, Some(&[]), 0x2000, 0);
        assert_symmetric(&a, &b, false);
    }

    #[test]
    fn test_argument_order_matters() {
        let a = function("ABC", false, Some(&[("a", "int"), ("b", "float")]), 0x1000, 0);
        let swapped = function("ABC", false, Some(&[("a", "float"), ("b", "int")]), 0x1000, 0);
        let same = function("ABC", false, Some(&[("a", "int"), ("b", "float")]), 0x3000, 0);
        assert_symmetric(&a, &swapped, false);
        assert_symmetric(&a, &same, true);
    }

    #[test]
    fn test_argument_names_are_ignored() {
        let a = function("ABC", false, Some(&[("count", "int")]), 0x1000, 0);
        let b = function("ABC", false, Some(&[("n", "int")]), 0x1000, 0);
        assert_symmetric(&a, &b, true);
    }

    #[test]
    fn test_simple_and_complex_functions_match() {
        let simple = function("CFoo::Run", false, Some(&[("x", "int")]), 0x1000, 0);
        let complex = function("CFoo::Run", false, Some(&[("x", "int")]), 0x2000, 2);
        assert_symmetric(&simple, &complex, true);
    }

    #[test]
    fn test_missing_type_compares_name_and_staticness() {
        let typed = function("Foo", false, Some(&[("x", "int")]), 0x1000, 0);
        let untyped = function("Foo", false, None, 0x1000, 0);
        assert_symmetric(&typed, &untyped, true);
        let untyped_static = function("Foo", true, None, 0x1000, 0);
        assert_symmetric(&typed, &untyped_static, false);
    }

    #[test]
    fn test_const_and_return_type() {
        let a = function("Foo", false, Some(&[]), 0x1000, 0);
        let mut b = a.clone();
        if let Some(t) = b.function_type.as_mut() {
            t.is_const = true;
        }
        assert_symmetric(&a, &b, false);
        let mut c = a.clone();
        if let Some(t) = c.function_type.as_mut() {
            t.return_type = "int".to_owned();
        }
        assert_symmetric(&a, &c, false);
    }

    #[rstest]
    #[case::same_type(Some("int"), Some("int"), true)]
    #[case::no_types(None, None, true)]
    #[case::one_type(Some("int"), None, false)]
    #[case::generated_scope(
        Some("Foo::__l7::<unnamed-type-x>"),
        Some("Foo::__l8::<unnamed-type-x>"),
        true
    )]
    #[case::enclosing_scopes_ignored(Some("Foo::__l7::X"), Some("Bar::__l7::X"), true)]
    #[case::last_segment_differs(Some("Foo::__l7::X"), Some("Foo::__l7::Y"), false)]
    #[case::different_type(Some("int"), Some("long"), false)]
    fn test_data_types(#[case] a: Option<&str>, #[case] b: Option<&str>, #[case] expected: bool) {
        let a = data("g_value", DataKind::Global, a, None);
        let b = data("g_value", DataKind::Global, b, None);
        assert_symmetric(&a, &b, expected);
    }

    #[test]
    fn test_data_kind_must_match() {
        let a = data("s_value", DataKind::FileStatic, Some("int"), None);
        let b = data("s_value", DataKind::StaticLocal, Some("int"), None);
        assert_symmetric(&a, &b, false);
    }

    #[test]
    fn test_data_parent_functions() {
        let parent = function("Foo", false, Some(&[]), 0x1000, 0);
        let other_parent = function("Bar", false, Some(&[]), 0x1000, 0);
        let a = data("s", DataKind::StaticLocal, Some("int"), Some(parent.clone()));
        let b = data("s", DataKind::StaticLocal, Some("int"), Some(parent));
        let c = data("s", DataKind::StaticLocal, Some("int"), Some(other_parent));
        let d = data("s", DataKind::StaticLocal, Some("int"), None);
        assert_symmetric(&a, &b, true);
        assert_symmetric(&a, &c, false);
        assert_symmetric(&a, &d, false);
    }

    #[test]
    fn test_functions_never_match_data() {
        let f = function("Foo", false, None, 0x1000, 0);
        let d = data("Foo", DataKind::Global, None, None);
        assert_symmetric(&SymbolRef::Function(&f), &SymbolRef::StaticData(&d), false);
    }

    #[test]
    fn test_code_blocks() {
        let a = function("Foo", false, None, 0x1000, 1);
        let b = function("Foo", false, None, 0x5000, 1);
        let c = function("Foo", false, None, 0x5000, 2);
        let block = |f, index| SymbolRef::CodeBlock { function: f, index };
        assert_symmetric(&block(&a, 0), &block(&b, 0), true);
        assert_symmetric(&block(&a, 0), &block(&b, 1), false);
        assert_symmetric(&block(&a, 1), &block(&b, 1), true);
        assert_symmetric(&block(&a, 1), &block(&c, 1), false);
    }

    #[test]
    fn test_user_defined_types() {
        let udt = |name: &str| UserDefinedType {
            name: name.to_owned(),
            instance_size: 4,
            base_types: Vec::new(),
        };
        assert_symmetric(&udt("Foo"), &udt("Foo"), true);
        assert_symmetric(&udt("Foo::__l3::Local"), &udt("Foo::__l12::Local"), true);
        assert_symmetric(&udt("Foo::__l3::Local"), &udt("Bar::__l3::Local"), false);
        assert_symmetric(&udt("Foo"), &udt("Bar"), false);
    }

    #[test]
    fn test_folded_symbols_match_by_canonical_name() {
        let other = |name: &str, rva: u32, canonical: Option<&str>| OtherSymbol {
            name: name.to_owned(),
            rva,
            size: 4,
            comparison_class: SymbolComparisonClass::PublicSymbol,
            canonical_name: canonical.map(str::to_owned),
        };
        let a = other("a", 0x10, Some("folded"));
        let b = other("b", 0x20, Some("folded"));
        let c = other("c", 0, Some("folded"));
        assert_symmetric(&SymbolRef::Other(&a), &SymbolRef::Other(&b), true);
        assert_symmetric(&SymbolRef::Other(&a), &SymbolRef::Other(&c), false);
    }
}
