use clap::ValueEnum;
use tracing::warn;

pub type Result<T = (), E = anyhow::Error> = core::result::Result<T, E>;

/// The kinds of failure that callers may want to tell apart. Errors are propagated as
/// `anyhow::Error`, so use `downcast_ref::<DiffError>()` to recover the kind.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// A diff was requested with neither a before nor an after side.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The diff that was built doesn't add up. This is a bug in the diff engine or inconsistent
    /// input data, not something the caller did wrong.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// How seriously to take invariant violations.
#[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Strictness {
    /// Every violated invariant fails the diff being built.
    Strict,

    /// Skip the uniqueness checks. Sum checks still run, but bytes that are attributed more than
    /// once only produce a warning. Bytes that go missing are still an error.
    Lenient,
}

impl Default for Strictness {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Strictness::Strict
        } else {
            Strictness::Lenient
        }
    }
}

impl Strictness {
    #[must_use]
    pub fn is_strict(self) -> bool {
        self == Strictness::Strict
    }

    /// Checks that `parts`, the sum of the children's size diffs, accounts for `whole`, the
    /// parent's size diff.
    pub fn check_sum(self, what: impl FnOnce() -> String, whole: i64, parts: i64) -> Result {
        if whole == parts {
            return Ok(());
        }
        let under_attributed = parts.unsigned_abs() < whole.unsigned_abs()
            || (whole != 0 && parts.signum() != whole.signum());
        if self.is_strict() || under_attributed {
            return Err(DiffError::InvariantViolation(format!(
                "Sizes of {} don't add up: expected {whole}, children sum to {parts}",
                what()
            ))
            .into());
        }
        warn!(
            "Sizes of {} don't add up: expected {whole}, children sum to {parts}",
            what()
        );
        Ok(())
    }
}

/// Like `anyhow::ensure`, but fails with `DiffError::InvariantViolation` so callers can tell
/// modeling bugs apart from bad input.
#[macro_export]
macro_rules! check_invariant {
    ($e:expr, $($rest:tt)*) => {
        if !$e {
            return Err(anyhow::Error::new($crate::DiffError::InvariantViolation(
                format!($($rest)*),
            )));
        }
    };
}

/// Returns the `DiffError` kind of `error`, if it has one.
#[must_use]
pub fn diff_error_kind(error: &anyhow::Error) -> Option<&DiffError> {
    error.downcast_ref::<DiffError>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact(Strictness::Lenient, 10, 10, true)]
    #[case::strict_over(Strictness::Strict, 10, 12, false)]
    #[case::lenient_over(Strictness::Lenient, 10, 12, true)]
    #[case::lenient_over_from_zero(Strictness::Lenient, 0, 4, true)]
    #[case::lenient_under(Strictness::Lenient, 10, 8, false)]
    #[case::lenient_under_negative(Strictness::Lenient, -10, -8, false)]
    #[case::lenient_opposite_sign(Strictness::Lenient, -10, 12, false)]
    fn test_check_sum(
        #[case] strictness: Strictness,
        #[case] whole: i64,
        #[case] parts: i64,
        #[case] ok: bool,
    ) {
        let result = strictness.check_sum(|| "lib `a.lib`".to_owned(), whole, parts);
        assert_eq!(result.is_ok(), ok);
        if let Err(error) = result {
            assert!(matches!(
                diff_error_kind(&error),
                Some(DiffError::InvariantViolation(_))
            ));
        }
    }

    #[test]
    fn test_check_invariant_macro() {
        fn check(value: u32) -> Result {
            check_invariant!(value < 10, "value {value} is too big");
            Ok(())
        }
        assert!(check(3).is_ok());
        let error = check(12).unwrap_err();
        assert_eq!(
            diff_error_kind(&error),
            Some(&DiffError::InvariantViolation(
                "value 12 is too big".to_owned()
            ))
        );
    }
}
