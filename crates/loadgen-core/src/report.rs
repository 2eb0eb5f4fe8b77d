//! Results reporting and formatting.

use std::path::Path;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use tracing::info;

use crate::config::{OutputConfig, OutputFormat};
use crate::error::LoadResult;
use crate::summary::RunSummary;

/// Formats run summaries for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Write the summary to the configured file, or print it unless quiet.
    pub fn emit(summary: &RunSummary, output: &OutputConfig) -> LoadResult<()> {
        if let Some(path) = &output.output_file {
            Self::write_json_file(summary, path)?;
            info!(path = %path.display(), "Final summary written");
        } else if !output.quiet {
            let rendered = match output.format {
                OutputFormat::Table => Self::format_table(summary),
                OutputFormat::Json => Self::format_json(summary)?,
                OutputFormat::Csv => format!("{}\n{}", Self::csv_header(), Self::format_csv(summary)),
            };
            println!("{}", rendered);
        }
        Ok(())
    }

    /// Format the summary as a console table.
    pub fn format_table(summary: &RunSummary) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                format!("Load Test Summary: {}", summary.app_name),
                summary.run_id.clone(),
            ]);

        table.add_row(vec!["Duration:", &summary.duration]);
        if let Some(reason) = &summary.stop_reason {
            table.add_row(vec!["Stopped:", reason]);
        }
        table.add_row(vec![
            "Total Commands:",
            &summary.total_commands_count.to_string(),
        ]);
        table.add_row(vec![
            "Successful / Failed:",
            &format!(
                "{} / {}",
                summary.successful_commands_count, summary.failed_commands_count
            ),
        ]);
        table.add_row(vec![
            "Success Rate:",
            &format!("{:.2}%", summary.success_rate),
        ]);
        table.add_row(vec![
            "Throughput:",
            &format!("{:.1} ops/sec", summary.overall_throughput),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "min / avg / p50 / p95 / p99 / max"]);
        let l = &summary.latency;
        table.add_row(vec![
            "",
            &format!(
                "{:.3} / {:.3} / {:.3} / {:.3} / {:.3} / {:.3}",
                l.min_ms, l.avg_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms
            ),
        ]);

        table.add_row(vec!["", ""]);
        let c = &summary.connections;
        table.add_row(vec![
            "Connections:",
            &format!(
                "{} attempts, {} failed ({:.1}% ok)",
                c.attempts, c.failures, c.success_rate
            ),
        ]);
        if c.reconnections > 0 {
            table.add_row(vec![
                "Reconnections:",
                &format!("{} (avg {:.1} ms)", c.reconnections, c.avg_reconnection_ms),
            ]);
        }
        let p = &summary.pubsub;
        if p.published + p.publish_failures + p.received + p.receive_errors > 0 {
            table.add_row(vec![
                "Pub/Sub:",
                &format!("{} published, {} received", p.published, p.received),
            ]);
        }

        if !summary.operations.is_empty() {
            table.add_row(vec!["", ""]);
            table.add_row(vec!["Operation", "count / errors / p50 / p99 (ms)"]);
            for op in &summary.operations {
                table.add_row(vec![
                    op.operation.clone(),
                    format!(
                        "{} / {} / {:.3} / {:.3}",
                        op.total_count, op.error_count, op.latency.p50_ms, op.latency.p99_ms
                    ),
                ]);
            }
        }

        table.to_string()
    }

    /// Format the summary as JSON.
    pub fn format_json(summary: &RunSummary) -> LoadResult<String> {
        Ok(serde_json::to_string_pretty(summary)?)
    }

    /// Format the summary as a CSV row.
    pub fn format_csv(summary: &RunSummary) -> String {
        format!(
            "{},{},{},{:.2},{},{},{},{:.1},{:.3},{:.3},{:.3}",
            summary.end_time,
            summary.app_name,
            summary.run_id,
            summary.duration_secs,
            summary.total_commands_count,
            summary.successful_commands_count,
            summary.failed_commands_count,
            summary.overall_throughput,
            summary.latency.p50_ms,
            summary.latency.p95_ms,
            summary.latency.p99_ms
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,app,run_id,duration,total,successful,failed,ops_per_sec,p50,p95,p99"
    }

    pub fn write_json_file(summary: &RunSummary, path: &Path) -> LoadResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::format_json(summary)?)?;
        Ok(())
    }
}
