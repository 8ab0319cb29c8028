use crate::Colour;
use crate::Config;
use crate::error::Result;
use crate::session::DiffFailure;
use crate::session::DiffSession;
use crate::symbol_diff::SymbolListEntry;
use binsize_model::BinaryModel;
use colored::ColoredString;
use colored::Colorize;
use itertools::Itertools as _;
use std::cmp::Ordering;
use std::fmt::Display;

pub struct Report {
    before_name: String,
    after_name: String,

    /// The differences that survived filtering, in the order they were found.
    entries: Vec<Entry>,

    failures: Vec<DiffFailure>,
    warnings: Vec<String>,

    config: Config,
}

struct Entry {
    /// e.g. `lib.foo.lib`. This is what `--only` and `--ignore` match against.
    key: String,
    label: &'static str,
    delta: i64,
    details: Vec<Detail>,
}

struct Detail {
    text: String,
    delta: Option<i64>,
}

impl Detail {
    fn sized(text: impl Into<String>, delta: i64) -> Self {
        Self {
            text: text.into(),
            delta: Some(delta),
        }
    }

    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delta: None,
        }
    }
}

impl Report {
    pub fn from_config(config: Config) -> Result<Report> {
        // Global state, but the only users are the binary and tests.
        match config.colour {
            Colour::Auto => colored::control::unset_override(),
            Colour::Never => colored::control::set_override(false),
            Colour::Always => colored::control::set_override(true),
        }

        let before = BinaryModel::from_path(&config.before)?;
        let after = BinaryModel::from_path(&config.after)?;
        let mut session = DiffSession::new(&before, &after, config.strictness());
        let report = Report::from_session(&mut session, config);
        session.dispose();
        report
    }

    /// Builds a report from every list the session can produce. Items that fail are reported as
    /// failures rather than aborting the report.
    pub fn from_session(session: &mut DiffSession<'_>, config: Config) -> Result<Report> {
        let mut report = Report {
            before_name: session.before().name.clone(),
            after_name: session.after().name.clone(),
            entries: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            config,
        };

        report.add_section_entries(session)?;
        report.add_lib_entries(session)?;
        report.add_source_file_entries(session)?;
        report.add_symbol_entries(session)?;
        report.add_duplicate_data_entries(session)?;
        report.add_wasteful_virtual_entries(session)?;
        report.add_template_foldability_entries(session)?;
        report.add_type_layout_entries(session)?;

        report.failures = session.failures().to_vec();
        report.warnings = session.warnings().to_vec();
        Ok(report)
    }

    fn add_section_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.section_diffs()? {
            let details = diff
                .coff_group_diffs()
                .iter()
                .filter(|g| g.size_diff() != 0 || !g.change().is_changed())
                .map(|g| {
                    Detail::sized(
                        format!("{} ({})", g.name(), g.change().label()),
                        g.size_diff(),
                    )
                })
                .collect_vec();
            self.add_entry(
                format!("section.{}", diff.name()),
                diff.change().label(),
                diff.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_lib_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.lib_diffs()? {
            let details = diff
                .compiland_diffs()
                .iter()
                .filter(|c| c.size_diff() != 0 || !c.change().is_changed())
                .map(|c| {
                    Detail::sized(
                        format!("{} ({})", c.name(), c.change().label()),
                        c.size_diff(),
                    )
                })
                .collect_vec();
            self.add_entry(
                format!("lib.{}", diff.name()),
                diff.change().label(),
                diff.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_source_file_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.source_file_diffs()? {
            let details = diff
                .contributions()
                .section_contribution_diffs()
                .filter(|c| c.size_diff() != 0)
                .map(|c| Detail::sized(c.target_name(), c.size_diff()))
                .collect_vec();
            self.add_entry(
                format!("source-file.{}", diff.name()),
                diff.change().label(),
                diff.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_symbol_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for entry in session.symbol_diffs()? {
            let details = match &entry {
                SymbolListEntry::Function(function) if function.code_block_diffs().len() > 1 => {
                    function
                        .code_block_diffs()
                        .iter()
                        .map(|block| Detail::sized(block.to_string(), block.size_diff()))
                        .collect_vec()
                }
                _ => Vec::new(),
            };
            self.add_entry(
                format!("symbol.{}", entry.name()),
                entry.label(),
                entry.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_duplicate_data_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.duplicate_data_diffs()? {
            let mut details = Vec::new();
            if diff.wasted_size_diff() != 0 {
                details.push(Detail::sized("wasted", diff.wasted_size_diff()));
                details.push(Detail::text(format!(
                    "{} bytes still wasted",
                    diff.wasted_size_remaining()
                )));
            }
            self.add_entry(
                format!("duplicate-data.{}", diff.name()),
                diff.change().label(),
                diff.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_wasteful_virtual_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.wasteful_virtual_diffs()? {
            let mut details: Vec<Detail> = diff
                .wasted_override_changes()
                .iter()
                .map(|o| {
                    Detail::sized(format!("override {}", o.function.name()), o.waste_change)
                })
                .collect();
            details.extend(
                diff.type_hierarchy_changes()
                    .iter()
                    .filter(|t| t.waste_change != 0)
                    .map(|t| {
                        Detail::sized(
                            format!(
                                "derived type {} ({})",
                                t.user_defined_type.either().name,
                                t.user_defined_type.label()
                            ),
                            t.waste_change,
                        )
                    }),
            );
            if diff.is_com_type() && !details.is_empty() {
                details.push(Detail::text("COM type, so waste may be unavoidable"));
            }
            self.add_entry(
                format!("wasteful-virtual.{}", diff.name()),
                diff.change().label(),
                diff.wasted_size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_template_foldability_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.template_foldability_diffs()? {
            let mut details = Vec::new();
            if diff.wasted_size_diff() != 0 {
                details.push(Detail::sized("wasted", diff.wasted_size_diff()));
            }
            details.extend(diff.added_instantiations().map(|n| Detail::text(format!("+ {n}"))));
            details.extend(diff.removed_instantiations().map(|n| Detail::text(format!("- {n}"))));
            self.add_entry(
                format!("template-foldability.{}", diff.name()),
                diff.change().label(),
                diff.size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_type_layout_entries(&mut self, session: &mut DiffSession<'_>) -> Result {
        for diff in session.type_layout_diffs()? {
            if diff.is_unchanged() {
                continue;
            }
            let mut details: Vec<Detail> = diff
                .member_diffs()
                .iter()
                .filter(|m| m.size_diff_bits() != 0 || m.offset_diff_bits() != Some(0))
                .map(|m| {
                    let moved = m
                        .offset_diff_bits()
                        .filter(|d| *d != 0)
                        .map(|d| format!(", moved {d:+} bits"))
                        .unwrap_or_default();
                    Detail::text(format!(
                        "{} ({}{moved}) {:+} bits",
                        m.name(),
                        m.change().label(),
                        m.size_diff_bits()
                    ))
                })
                .collect();
            let waste = diff.alignment_waste_exclusive_diff_bits();
            if waste != 0 {
                details.push(Detail::text(format!("alignment waste {waste:+} bits")));
            }
            self.add_entry(
                format!("type-layout.{}", diff.name()),
                diff.change().label(),
                diff.instance_size_diff(),
                details,
            );
        }
        Ok(())
    }

    fn add_entry(&mut self, key: String, label: &'static str, delta: i64, details: Vec<Detail>) {
        if self.should_ignore(&key) {
            return;
        }
        // A changed item that didn't change size is only interesting if something inside it did.
        if delta == 0 && label == "changed" && details.is_empty() {
            return;
        }
        if delta.unsigned_abs() < self.config.min_size_diff {
            return;
        }
        self.entries.push(Entry {
            key,
            label,
            delta,
            details,
        });
    }

    #[must_use]
    pub fn has_differences(&self) -> bool {
        !self.entries.is_empty()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[DiffFailure] {
        &self.failures
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Keys of every reported difference.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// The size delta reported for `key`, if it was reported.
    #[must_use]
    pub fn delta(&self, key: &str) -> Option<i64> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.delta)
    }

    #[must_use]
    pub fn should_ignore(&self, key: &str) -> bool {
        let matches = |pattern: &String| {
            if let Some(prefix) = pattern.strip_suffix('*') {
                key.starts_with(prefix)
            } else {
                key == pattern
            }
        };
        if !self.config.only.is_empty() {
            return !self.config.only.iter().any(matches);
        }
        self.config.ignore.iter().any(matches)
    }
}

fn format_delta(delta: i64) -> ColoredString {
    let text = format!("{delta:+}");
    match delta.cmp(&0) {
        Ordering::Greater => text.red(),
        Ordering::Less => text.green(),
        Ordering::Equal => text.normal(),
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "before: {}", self.before_name)?;
        writeln!(f, "after: {}", self.after_name)?;
        writeln!(f)?;

        for entry in &self.entries {
            writeln!(
                f,
                "{} ({}) {}",
                entry.key,
                entry.label,
                format_delta(entry.delta)
            )?;
            for detail in &entry.details {
                match detail.delta {
                    Some(delta) => writeln!(f, "  {} {}", detail.text, format_delta(delta))?,
                    None => writeln!(f, "  {}", detail.text)?,
                }
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", "Failed to diff:".red().bold())?;
            for failure in &self.failures {
                writeln!(f, "{} `{}`", failure.category, failure.item)?;
                for line in failure.message.lines() {
                    writeln!(f, "  {line}")?;
                }
                for message in &failure.diagnostics.messages {
                    writeln!(f, "    [{}] {}", message.level, message.text)?;
                }
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", "Warnings:".yellow())?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }

        Ok(())
    }
}
