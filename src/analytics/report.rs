//! 文本报告模板

use crate::error::{AppError, Result};
use crate::models::analytics::{AnalyticsData, ReportKind};
use std::fmt::{self, Write};

pub fn render(kind: ReportKind, data: &AnalyticsData) -> Result<String> {
    let mut out = String::new();
    let written = match kind {
        ReportKind::Summary => summary(&mut out, data),
        ReportKind::Detailed => return Ok(serde_json::to_string_pretty(data)?),
        ReportKind::Executive => executive(&mut out, data),
    };
    written.map_err(|e| AppError::Internal(format!("Report rendering failed: {}", e)))?;
    Ok(out)
}

fn summary(out: &mut impl Write, data: &AnalyticsData) -> fmt::Result {
    let o = &data.overview;
    let t = &data.time_metrics;

    writeln!(out, "# Organization Profile Summary")?;
    writeln!(out, "Generated: {}", data.generated_at.format("%Y-%m-%d %H:%M UTC"))?;
    writeln!(out)?;
    writeln!(out, "## Overview")?;
    writeln!(out, "- Overall progress: {}%", o.overall_progress)?;
    writeln!(
        out,
        "- Sections: {} completed, {} in progress, {} not started (of {})",
        o.completed_sections, o.in_progress_sections, o.not_started_sections, o.total_sections
    )?;
    writeln!(
        out,
        "- Fields: {}/{} completed, {} empty",
        o.completed_fields, o.total_fields, o.empty_fields
    )?;
    writeln!(out, "- Documents: {}", o.total_documents)?;
    writeln!(out, "- Active users: {}", o.active_users)?;
    writeln!(out, "- Total edits: {}", o.total_edits)?;
    writeln!(out)?;
    writeln!(out, "## Sections")?;
    for s in &data.section_metrics {
        writeln!(
            out,
            "- {}: {}% ({}/{} fields, {} edits)",
            s.section_id, s.progress, s.completed_fields, s.total_fields, s.edit_count
        )?;
    }
    writeln!(out)?;
    writeln!(out, "## Time")?;
    writeln!(out, "- Total time spent: {:.0} minutes", t.total_time_spent_minutes)?;
    writeln!(out, "- Average per section: {:.1} minutes", t.average_time_per_section)?;
    if let Some(s) = &t.slowest_section {
        writeln!(out, "- Most time: {} ({:.0} minutes)", s.section_id, s.minutes)?;
    }
    Ok(())
}

fn executive(out: &mut impl Write, data: &AnalyticsData) -> fmt::Result {
    let o = &data.overview;

    writeln!(out, "# Executive Summary")?;
    writeln!(out, "Generated: {}", data.generated_at.format("%Y-%m-%d"))?;
    writeln!(out)?;
    writeln!(out, "## Key Metrics")?;
    writeln!(out, "- Profile completion: {}%", o.overall_progress)?;
    writeln!(
        out,
        "- Sections complete: {} of {}",
        o.completed_sections, o.total_sections
    )?;
    writeln!(out, "- Team members engaged: {}", o.active_users)?;
    writeln!(out, "- Documents uploaded: {}", o.total_documents)?;
    writeln!(out)?;
    writeln!(out, "## Recommendations")?;
    for rec in recommendations(data) {
        writeln!(out, "- {}", rec)?;
    }
    Ok(())
}

/// 基于规则的建议
pub fn recommendations(data: &AnalyticsData) -> Vec<String> {
    let o = &data.overview;
    let mut recs = Vec::new();

    if o.overall_progress < 50 {
        recs.push(format!(
            "Prioritize the remaining sections; overall completion is {}%.",
            o.overall_progress
        ));
    }
    if o.not_started_sections > 0 {
        recs.push(format!(
            "Begin work on the {} section(s) that have not been started.",
            o.not_started_sections
        ));
    }
    let empty: Vec<&str> = data
        .field_analytics
        .frequently_empty_fields
        .iter()
        .take(3)
        .map(|f| f.field.as_str())
        .collect();
    if !empty.is_empty() {
        recs.push(format!("Fill in frequently empty fields: {}.", empty.join(", ")));
    }
    if o.total_documents == 0 {
        recs.push("Upload supporting documents such as bylaws and financial statements.".to_string());
    }
    if o.active_users <= 1 {
        recs.push("Invite additional team members to share the workload.".to_string());
    }
    if recs.is_empty() {
        recs.push("The profile is in good shape; keep it current as information changes.".to_string());
    }

    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{compute, AnalyticsInputs};
    use crate::config::AnalyticsMode;
    use crate::models::form::ApplicationData;
    use chrono::Utc;
    use serde_json::json;

    fn data(progress: &[(&str, f64)]) -> AnalyticsData {
        let app = ApplicationData {
            section_progress: progress.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            form_data: json!({"mission": {"statement": ""}}),
        };
        compute(
            &AnalyticsInputs {
                application: &app,
                documents: &[],
                audit_logs: &[],
                snapshots: &[],
                date_range: None,
            },
            AnalyticsMode::Placeholder,
            Utc::now(),
        )
    }

    #[test]
    fn test_summary_lists_sections() {
        let text = render(ReportKind::Summary, &data(&[("mission", 100.0), ("board", 20.0)])).unwrap();
        assert!(text.starts_with("# Organization Profile Summary"));
        assert!(text.contains("- Overall progress: 60%"));
        assert!(text.contains("- mission: 100%"));
        assert!(text.contains("- board: 20%"));
    }

    #[test]
    fn test_detailed_is_json() {
        let text = render(ReportKind::Detailed, &data(&[("mission", 10.0)])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["overview"]["overallProgress"], 10);
    }

    #[test]
    fn test_executive_recommendations() {
        let d = data(&[("mission", 10.0), ("board", 0.0)]);
        let recs = recommendations(&d);
        assert!(recs.iter().any(|r| r.contains("overall completion is 5%")));
        assert!(recs.iter().any(|r| r.contains("1 section(s)")));
        assert!(recs.iter().any(|r| r.contains("mission.statement")));

        let text = render(ReportKind::Executive, &d).unwrap();
        assert!(text.contains("## Recommendations"));
    }

    struct FullBuffer(usize);

    impl Write for FullBuffer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0 = self.0.checked_sub(s.len()).ok_or(fmt::Error)?;
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_stops_rendering() {
        let d = data(&[("mission", 10.0)]);
        assert!(summary(&mut FullBuffer(16), &d).is_err());
        assert!(executive(&mut FullBuffer(16), &d).is_err());
        assert!(summary(&mut FullBuffer(usize::MAX), &d).is_ok());
    }
}
