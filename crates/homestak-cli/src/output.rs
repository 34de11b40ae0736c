use std::collections::BTreeMap;
use std::time::Duration;

use homestak_executor::{Change, RunReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PhaseRecord {
    name: String,
    status: &'static str,
    duration: f64,
}

#[derive(Debug, Serialize)]
struct Trailer {
    scenario: String,
    success: bool,
    duration_seconds: f64,
    phases: Vec<PhaseRecord>,
    context: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Renders the structured-output trailer: a single JSON object that must be
/// the last non-empty line of standard output, the protocol between a
/// parent run and a delegated child run.
pub fn render_trailer(scenario: &str, report: &RunReport, elapsed: Duration) -> String {
    let phases = report.changes.iter().map(phase_record).collect();

    let mut context = BTreeMap::new();
    for change in &report.changes {
        if let Change::NodeDelegated { node, child_count } = change {
            context.insert(format!("{node}.delegated_children"), child_count.to_string());
        }
    }

    let error = if report.is_success() {
        None
    } else {
        Some(report.errors.join("; "))
    };

    let trailer = Trailer {
        scenario: scenario.to_string(),
        success: report.is_success(),
        duration_seconds: elapsed.as_secs_f64(),
        phases,
        context,
        error,
    };

    serde_json::to_string(&trailer).expect("trailer fields are all serializable")
}

fn phase_record(change: &Change) -> PhaseRecord {
    let (name, status) = match change {
        Change::NodeCreated { node } => (format!("{node}:create"), "passed"),
        Change::NodeConfigured { node } => (format!("{node}:configure"), "passed"),
        Change::NodeTested { node } => (format!("{node}:test"), "passed"),
        Change::NodeDelegated { node, .. } => (format!("{node}:delegate"), "passed"),
        Change::NodeDestroyed { node } => (format!("{node}:destroy"), "passed"),
        Change::NodeSkipped { node } => (format!("{node}:skip"), "skipped"),
        Change::NodeFailed { node, .. } => (format!("{node}:fail"), "failed"),
    };
    PhaseRecord {
        name,
        status,
        duration: 0.0,
    }
}

/// Human-readable rendering for the non-structured-output path.
pub fn render_phase_summary(report: &RunReport) -> String {
    if report.changes.is_empty() {
        return "No changes.\n".to_string();
    }
    let mut out = String::new();
    for change in &report.changes {
        let line = match change {
            Change::NodeCreated { node } => format!("+ {node} created"),
            Change::NodeConfigured { node } => format!("~ {node} configured"),
            Change::NodeTested { node } => format!("\u{2713} {node} tested"),
            Change::NodeDelegated { node, child_count } => {
                format!("> {node} delegated ({child_count} child nodes)")
            }
            Change::NodeDestroyed { node } => format!("- {node} destroyed"),
            Change::NodeSkipped { node } => format!("  {node} skipped"),
            Change::NodeFailed { node, message } => format!("! {node} failed: {message}"),
        };
        out.push_str(&line);
        out.push('\n');
    }
    if !report.errors.is_empty() {
        out.push_str(&format!("\n{} error(s):\n", report.errors.len()));
        for e in &report.errors {
            out.push_str(&format!("  ! {e}\n"));
        }
    }
    out
}
