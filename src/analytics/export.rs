//! 分析数据导出：JSON / CSV / HTML

use crate::error::{AppError, Result};
use crate::models::analytics::{AnalyticsData, AnalyticsExportFormat, ExportBlob};
use std::fmt::Write;

pub fn export(format: AnalyticsExportFormat, data: &AnalyticsData) -> Result<ExportBlob> {
    let stem = format!("analytics-{}", data.generated_at.format("%Y-%m-%d"));
    match format {
        AnalyticsExportFormat::Json => Ok(ExportBlob {
            file_name: format!("{}.json", stem),
            content_type: "application/json",
            body: serde_json::to_string_pretty(data)?,
        }),
        AnalyticsExportFormat::Csv => Ok(ExportBlob {
            file_name: format!("{}.csv", stem),
            content_type: "text/csv",
            body: to_csv(data)?,
        }),
        AnalyticsExportFormat::Html => Ok(ExportBlob {
            file_name: format!("{}.html", stem),
            content_type: "text/html",
            body: to_html(data),
        }),
    }
}

/// 只导出指标/数值对
fn to_csv(data: &AnalyticsData) -> Result<String> {
    let o = &data.overview;
    let t = &data.time_metrics;
    let rows: [(&str, String); 12] = [
        ("Overall Progress", o.overall_progress.to_string()),
        ("Total Sections", o.total_sections.to_string()),
        ("Completed Sections", o.completed_sections.to_string()),
        ("In Progress Sections", o.in_progress_sections.to_string()),
        ("Not Started Sections", o.not_started_sections.to_string()),
        ("Total Fields", o.total_fields.to_string()),
        ("Completed Fields", o.completed_fields.to_string()),
        ("Empty Fields", o.empty_fields.to_string()),
        ("Total Documents", o.total_documents.to_string()),
        ("Active Users", o.active_users.to_string()),
        ("Total Edits", o.total_edits.to_string()),
        ("Total Time Spent (minutes)", format!("{:.0}", t.total_time_spent_minutes)),
    ];

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(["Metric", "Value"])?;
    for (metric, value) in &rows {
        writer.write_record([*metric, value.as_str()])?;
    }

    let bytes = writer.into_inner().map_err(AppError::internal)?;
    String::from_utf8(bytes).map_err(AppError::internal)
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

const STYLE: &str = "body{font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;margin:2rem;color:#1f2933}\
h1{font-size:1.6rem}h2{font-size:1.2rem;margin-top:2rem}\
table{border-collapse:collapse;width:100%}th,td{border:1px solid #d9e2ec;padding:.5rem;text-align:left}\
th{background:#f0f4f8}.metric{display:inline-block;margin-right:2rem}";

fn to_html(data: &AnalyticsData) -> String {
    let o = &data.overview;
    let mut out = String::new();

    let _ = write!(
        out,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Analytics Report</title><style>{}</style></head><body>",
        STYLE
    );
    let _ = write!(
        out,
        "<h1>Analytics Report</h1><p>Generated {}</p>",
        escape_html(&data.generated_at.to_rfc3339())
    );
    let _ = write!(
        out,
        "<div><span class=\"metric\">Overall progress: {}%</span><span class=\"metric\">Active users: {}</span><span class=\"metric\">Documents: {}</span></div>",
        o.overall_progress, o.active_users, o.total_documents
    );

    out.push_str("<h2>Section Progress</h2><table><tr><th>Section</th><th>Progress</th><th>Fields</th><th>Edits</th></tr>");
    for s in &data.section_metrics {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}%</td><td>{}/{}</td><td>{}</td></tr>",
            escape_html(&s.section_id),
            s.progress,
            s.completed_fields,
            s.total_fields,
            s.edit_count
        );
    }
    out.push_str("</table>");

    out.push_str("<h2>User Activity</h2><table><tr><th>User</th><th>Edits</th><th>Actions</th><th>Last Active</th></tr>");
    for u in &data.user_activity {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&u.user_name),
            u.total_edits,
            u.total_actions,
            u.last_active.format("%Y-%m-%d %H:%M")
        );
    }
    out.push_str("</table></body></html>");

    out
}
