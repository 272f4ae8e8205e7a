use anyhow::Result;
use judgecraft_types::RunReport;

/// Helper to assert a run's pass rate meets a threshold.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_agent() -> Result<()> {
///     let runner = Runner::builder().agent(agent).judge(judge).build()?;
///     let report = runner.run(&JsonlCaseSource::new("cases.jsonl"), Schedule::parallel(5)).await?;
///
///     // Assert 80% pass rate
///     assert_pass_rate(&report, 0.8)?;
///
///     Ok(())
/// }
/// ```
pub fn assert_pass_rate(report: &RunReport, min_pass_rate: f64) -> Result<()> {
    if report.summary.pass_rate < min_pass_rate {
        anyhow::bail!(
            "Evaluation failed: pass rate {:.1}% is below threshold {:.1}%\n{}",
            report.summary.pass_rate * 100.0,
            min_pass_rate * 100.0,
            report.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert all cases passed.
pub fn assert_all_passed(report: &RunReport) -> Result<()> {
    if report.summary.failed > 0 {
        let failures: Vec<String> = report
            .summary
            .failures
            .iter()
            .map(|f| format!("  {}: {}", f.case_name, f.reason))
            .collect();
        anyhow::bail!(
            "Evaluation failed: {}/{} cases passed\n{}\n{}",
            report.summary.passed,
            report.summary.total,
            failures.join("\n"),
            report.summary_table()
        );
    }
    Ok(())
}
