//! Console rendering for listings and received messages.

use std::fmt::Write as _;

use sb_core::domain::{EntityListing, MessageEnvelope};
use sb_core::{MessageObserver, ShutdownSummary};

/// Prints every received message to stdout.
pub struct ConsoleObserver;

impl MessageObserver for ConsoleObserver {
    fn on_message(&self, envelope: &MessageEnvelope) {
        println!("{}", render_envelope(envelope));
    }
}

pub fn render_envelope(envelope: &MessageEnvelope) -> String {
    let source = match &envelope.subscription_name {
        Some(subscription) => format!("{}/{subscription}", envelope.entity_name),
        None => envelope.entity_name.clone(),
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}] {source} message {}",
        envelope.received_at.format("%H:%M:%S%.3f"),
        envelope.message_id
    );
    let _ = writeln!(
        out,
        "  enqueued: {}",
        envelope.enqueued_at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
    );
    if let Some(label) = &envelope.label {
        let _ = writeln!(out, "  label: {label}");
    }
    for (key, value) in &envelope.user_properties {
        let _ = writeln!(out, "  {key}: {value}");
    }
    let _ = write!(out, "{}", envelope.body_text());
    out
}

pub fn print_listing(title: &str, rows: &[EntityListing]) {
    if rows.is_empty() {
        println!("No {title} found");
        return;
    }
    println!("{title}:");
    for row in rows {
        println!("  {row}");
    }
}

pub fn print_summary(summary: &ShutdownSummary) {
    for report in &summary.reports {
        let mut line = format!(
            "{}: {} received, {} completed",
            report.spec, report.received, report.completed
        );
        if report.completion_failures > 0 {
            let _ = write!(line, ", {} completion failures", report.completion_failures);
        }
        if report.tap_deleted {
            line.push_str(", tap deleted");
        }
        if let Some(error) = &report.error {
            let _ = write!(line, " (error: {error})");
        }
        println!("{line}");
    }
    for spec in &summary.timed_out {
        println!("{spec}: did not stop before the drain deadline");
    }
    for spec in &summary.panicked {
        println!("{spec}: worker task failed");
    }
}
