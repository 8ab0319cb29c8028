fn main() -> anyhow::Result<()> {
    binsize_diff::enable_diagnostics();
    let config = binsize_diff::Config::from_env();
    let report = binsize_diff::Report::from_config(config)?;
    if report.has_differences() || report.has_failures() {
        println!("{report}");
    } else {
        println!("No size differences detected");
    }
    if report.has_failures() {
        anyhow::bail!("{} items could not be diffed", report.failures().len());
    }
    Ok(())
}
