//! Report rendering: terminal summary, Markdown, JSON and the suite artifact.

use chrono::SecondsFormat;
use colored::Colorize;
use specprobe_core::{
    ApiModel, GeneratedSuite, OutcomeStatus, ReportFormat, ReportModel, TestOutcome, Totals,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to write report: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Pretty JSON of the full report model.
#[derive(Debug, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, report: &ReportModel) -> Result<String, ReporterError> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

/// Plain Markdown dump of the report.
#[derive(Debug, Default)]
pub struct MarkdownReporter;

impl MarkdownReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, report: &ReportModel) -> String {
        let mut out = String::new();
        self.write_header(&mut out, report);
        self.write_summary(&mut out, report);
        self.write_categories(&mut out, report);
        self.write_endpoints(&mut out, report);
        self.write_coverage(&mut out, report);
        self.write_latency(&mut out, report);
        self.write_failures(&mut out, report);
        self.write_synthesis(&mut out, report);
        out
    }

    fn write_header(&self, out: &mut String, report: &ReportModel) {
        out.push_str(&format!(
            "# API Test Report: {} v{}\n\n",
            report.api.title, report.api.version
        ));
        let (emoji, verdict) = verdict(&report.totals);
        out.push_str(&format!("## {} {}\n\n", emoji, verdict));
        out.push_str(&format!("**Run:** `{}`  \n", report.run_id));
        out.push_str(&format!("**Target:** {}  \n", report.base_url));
        out.push_str(&format!(
            "**Started:** {}  \n",
            report.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!("**Duration:** {:.1}s\n\n", report.duration_ms / 1000.0));
    }

    fn write_summary(&self, out: &mut String, report: &ReportModel) {
        let t = &report.totals;
        out.push_str("## Summary\n\n");
        out.push_str("| Total | Passed | Failed | Errored | Skipped | Pass rate |\n");
        out.push_str("|------:|-------:|-------:|--------:|--------:|----------:|\n");
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.1}% |\n\n",
            t.total, t.passed, t.failed, t.errored, t.skipped, report.pass_rate
        ));
    }

    fn write_categories(&self, out: &mut String, report: &ReportModel) {
        if report.by_category.is_empty() {
            return;
        }
        out.push_str("## By Category\n\n");
        out.push_str("| Category | Total | Passed | Failed | Errored | Skipped |\n");
        out.push_str("|----------|------:|-------:|-------:|--------:|--------:|\n");
        for (category, t) in &report.by_category {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                category, t.total, t.passed, t.failed, t.errored, t.skipped
            ));
        }
        out.push('\n');
    }

    fn write_endpoints(&self, out: &mut String, report: &ReportModel) {
        if report.endpoints.is_empty() {
            return;
        }
        out.push_str("## By Endpoint\n\n");
        out.push_str("| Endpoint | Total | Passed | Failing | Pass rate |\n");
        out.push_str("|----------|------:|-------:|--------:|----------:|\n");
        for entry in &report.endpoints {
            out.push_str(&format!(
                "| `{}` | {} | {} | {} | {:.1}% |\n",
                entry.endpoint,
                entry.totals.total,
                entry.totals.passed,
                entry.totals.failing(),
                entry.pass_rate
            ));
        }
        out.push('\n');
    }

    fn write_coverage(&self, out: &mut String, report: &ReportModel) {
        let c = &report.coverage;
        if c.total_endpoints == 0 {
            return;
        }
        out.push_str("## Coverage

");
        out.push_str(&format!(
            "{} of {} endpoints tested ({:.1}%)

",
            c.tested_endpoints, c.total_endpoints, c.coverage_pct
        ));
        if !c.untested_endpoints.is_empty() {
            out.push_str("Untested:

");
            for endpoint in &c.untested_endpoints {
                out.push_str(&format!("- `{}`
", endpoint));
            }
            out.push('\n');
        }
    }

    fn write_latency(&self, out: &mut String, report: &ReportModel) {
        let Some(latency) = &report.latency else {
            return;
        };
        out.push_str("## Latency\n\n");
        out.push_str(&format!(
            "avg {:.1} ms, min {:.1} ms, max {:.1} ms over {} responses\n\n",
            latency.avg_ms, latency.min_ms, latency.max_ms, latency.measured
        ));
        if !report.slowest.is_empty() {
            out.push_str("Slowest units:\n\n");
            for unit in &report.slowest {
                out.push_str(&format!(
                    "- `{}` ({}): {:.1} ms\n",
                    unit.unit_id, unit.endpoint, unit.latency_ms
                ));
            }
            out.push('\n');
        }
    }

    fn write_failures(&self, out: &mut String, report: &ReportModel) {
        if report.failure_clusters.is_empty() {
            return;
        }
        out.push_str("## Failures\n\n");
        for cluster in &report.failure_clusters {
            out.push_str(&format!(
                "### {} ({})\n\nExample: {}\n\n",
                cluster.key, cluster.count, cluster.sample
            ));
            for id in &cluster.unit_ids {
                out.push_str(&format!("- `{}`\n", id));
            }
            out.push('\n');
        }

        out.push_str("### By category\n\n");
        for (category, ids) in &report.failures_by_category {
            out.push_str(&format!("- **{}**: {}\n", category, ids.join(", ")));
        }
        out.push('\n');
    }

    fn write_synthesis(&self, out: &mut String, report: &ReportModel) {
        let s = &report.synthesis;
        out.push_str("## Synthesis\n\n");
        out.push_str(&format!(
            "{} endpoints, {} scenarios ({} from the oracle, {} deterministic)\n\n",
            s.endpoints, s.scenarios, s.oracle_scenarios, s.fallback_scenarios
        ));
        if !s.fallback_endpoints.is_empty() {
            out.push_str("Fully deterministic endpoints:\n\n");
            for endpoint in &s.fallback_endpoints {
                out.push_str(&format!("- `{}`\n", endpoint));
            }
            out.push('\n');
        }
        if !s.dropped_candidates.is_empty() {
            out.push_str("Dropped oracle candidates:\n\n");
            out.push_str("| Endpoint | # | Reason |\n|----------|--:|--------|\n");
            for dropped in &s.dropped_candidates {
                out.push_str(&format!(
                    "| `{}` | {} | {} |\n",
                    dropped.endpoint, dropped.index, dropped.reason
                ));
            }
            out.push('\n');
        }
        if !s.compile_defects.is_empty() {
            out.push_str("Compile defects:\n\n");
            for defect in &s.compile_defects {
                out.push_str(&format!("- `{}`: {}\n", defect.scenario_id, defect.error));
            }
            out.push('\n');
        }
    }
}

fn verdict(totals: &Totals) -> (&'static str, &'static str) {
    if totals.failing() == 0 {
        ("🟢", "PASSED")
    } else if totals.passed > 0 {
        ("🟡", "MIXED")
    } else {
        ("🔴", "FAILED")
    }
}

/// Writes reports into an output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes the report in the requested format(s); returns the paths written.
    pub fn write(
        &self,
        report: &ReportModel,
        format: ReportFormat,
    ) -> Result<Vec<PathBuf>, ReporterError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let mut written = Vec::new();
        if format.includes_json() {
            written.push(self.write_json(report)?);
        }
        if format.includes_markdown() {
            written.push(self.write_markdown(report)?);
        }
        Ok(written)
    }

    pub fn write_json(&self, report: &ReportModel) -> Result<PathBuf, ReporterError> {
        let content = JsonReporter::new().generate(report)?;
        let path = self.output_dir.join(format!("report-{}.json", report.run_id));
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn write_markdown(&self, report: &ReportModel) -> Result<PathBuf, ReporterError> {
        let content = MarkdownReporter::new().generate(report);
        let path = self.output_dir.join(format!("report-{}.md", report.run_id));
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Writes the compiled suite as `suite.json`.
    pub fn write_suite(&self, suite: &GeneratedSuite) -> Result<PathBuf, ReporterError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join("suite.json");
        std::fs::write(&path, serde_json::to_string_pretty(suite)?)?;
        Ok(path)
    }
}

/// Colored console output.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    verbose: bool,
}

impl TerminalReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn print_summary(&self, report: &ReportModel) {
        println!("\n{}", "━".repeat(40).dimmed());

        let t = &report.totals;
        let (emoji, verdict) = verdict(t);
        let color = if t.failing() == 0 {
            colored::Color::Green
        } else if t.passed > 0 {
            colored::Color::Yellow
        } else {
            colored::Color::Red
        };

        let mut parts = vec![];
        if t.passed > 0 {
            parts.push(format!("{} passed", t.passed).green().to_string());
        }
        if t.failed > 0 {
            parts.push(format!("{} failed", t.failed).red().to_string());
        }
        if t.errored > 0 {
            parts.push(format!("{} errored", t.errored).magenta().to_string());
        }
        if t.skipped > 0 {
            parts.push(format!("{} skipped", t.skipped).dimmed().to_string());
        }

        let verdict_text = format!(
            "{}: {} of {} units ({:.1}%)",
            verdict, t.passed, t.total, report.pass_rate
        );
        println!("{} {}", emoji, verdict_text.color(color).bold());
        if !parts.is_empty() {
            println!("   {}", parts.join(", "));
        }

        let c = &report.coverage;
        if !c.untested_endpoints.is_empty() {
            println!(
                "   {}",
                format!(
                    "{} of {} endpoint(s) untested",
                    c.untested_endpoints.len(),
                    c.total_endpoints
                )
                .yellow()
            );
        }

        let s = &report.synthesis;
        if s.fallback_scenarios > 0 || !s.dropped_candidates.is_empty() {
            println!(
                "   {}",
                format!(
                    "{} deterministic scenario(s), {} oracle candidate(s) dropped",
                    s.fallback_scenarios,
                    s.dropped_candidates.len()
                )
                .dimmed()
            );
        }
        println!(
            "\n   {}",
            format!("Completed in {:.1}s", report.duration_ms / 1000.0).dimmed()
        );
    }

    /// One line per failing unit; every unit when verbose.
    pub fn print_outcomes(&self, report: &ReportModel) {
        let shown: Vec<&TestOutcome> = report
            .outcomes
            .iter()
            .filter(|o| self.verbose || matches!(o.status, OutcomeStatus::Failed | OutcomeStatus::Errored))
            .collect();
        if shown.is_empty() {
            return;
        }
        println!();
        for outcome in shown {
            let marker = match outcome.status {
                OutcomeStatus::Passed => "✓".green(),
                OutcomeStatus::Failed => "✗".red(),
                OutcomeStatus::Errored => "!".magenta(),
                OutcomeStatus::Skipped => "-".dimmed(),
            };
            let detail = outcome
                .detail
                .as_ref()
                .map(|d| format!(": {}", d))
                .unwrap_or_default();
            println!("  {} {}{}", marker, outcome.unit_id, detail.dimmed());
        }
    }

    pub fn print_endpoints(&self, model: &ApiModel) {
        println!(
            "{} {}\n",
            model.info.title.bold(),
            format!("v{}", model.info.version).dimmed()
        );
        for endpoint in &model.endpoints {
            let auth = if endpoint.auth.is_none() {
                String::new()
            } else {
                format!(" [{}]", endpoint.auth)
            };
            println!(
                "  {:<7} {}{}  {}",
                endpoint.method.as_str().cyan(),
                endpoint.path,
                auth.yellow(),
                endpoint.summary.dimmed()
            );
        }
        println!(
            "\n  {}",
            format!("Total: {} endpoint(s)", model.endpoints.len()).dimmed()
        );
    }

    pub fn print_suite(&self, suite: &GeneratedSuite) {
        println!(
            "{} {} units for {} v{} against {}",
            "Generated".green().bold(),
            suite.units.len(),
            suite.api.title,
            suite.api.version,
            suite.base_url
        );
        for (endpoint, units) in suite.endpoint_groups() {
            println!("  {} {}", endpoint.to_string().bold(), format!("({})", units.len()).dimmed());
            if self.verbose {
                for unit in units {
                    println!("    {} {}", unit.id.cyan(), unit.request.url.dimmed());
                }
            }
        }
    }
}
