//! Concurrent fan-out of independent per-row operations with settle-all bookkeeping.

use std::{fmt::Display, future::Future};

use futures::future::join_all;
use shared::protocol::MessageLogEntry;
use tracing::{info, warn};

pub const REQUEST_FAILED: &str = "Request failed.";
const NONE_MARKER: &str = "(none)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Resolved with a `success` entry.
    Succeeded(MessageLogEntry),
    /// Resolved, but with any other message type.
    Failed(MessageLogEntry),
    /// The request itself was rejected.
    RequestFailed(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    AllSuccess,
    AllFailure,
    Partial,
}

/// Texts used when a resolved entity carries no message of its own.
#[derive(Debug, Clone, Copy)]
pub struct FallbackTexts {
    pub success: &'static str,
    pub failure: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    items: Vec<BulkItem>,
}

impl BulkReport {
    pub fn items(&self) -> &[BulkItem] {
        &self.items
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|item| item.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|item| !item.outcome.is_success())
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded().next().is_some()
    }

    pub fn aggregate(&self) -> Aggregate {
        match (self.succeeded().count(), self.failed().count()) {
            (_, 0) => Aggregate::AllSuccess,
            (0, _) => Aggregate::AllFailure,
            _ => Aggregate::Partial,
        }
    }

    /// One `id - text` line per row; the partial case is grouped under
    /// `Succeeded:` and `Failed:` headings.
    pub fn summary(&self, texts: FallbackTexts) -> String {
        let line = |item: &BulkItem| format!("{} - {}", item.id, outcome_text(&item.outcome, texts));
        let group = |lines: Vec<String>| {
            if lines.is_empty() {
                vec![NONE_MARKER.to_string()]
            } else {
                lines
            }
        };
        let succeeded: Vec<String> = self.succeeded().map(line).collect();
        let failed: Vec<String> = self.failed().map(line).collect();
        match self.aggregate() {
            Aggregate::AllSuccess => succeeded.join("\n"),
            Aggregate::AllFailure => failed.join("\n"),
            Aggregate::Partial => {
                let mut lines = vec!["Succeeded:".to_string()];
                lines.extend(group(succeeded));
                lines.push(String::new());
                lines.push("Failed:".to_string());
                lines.extend(group(failed));
                lines.join("\n")
            }
        }
    }
}

fn outcome_text(outcome: &ItemOutcome, texts: FallbackTexts) -> String {
    let (entry, fallback) = match outcome {
        ItemOutcome::Succeeded(entry) => (entry, texts.success),
        ItemOutcome::Failed(entry) => (entry, texts.failure),
        ItemOutcome::RequestFailed(_) => return REQUEST_FAILED.to_string(),
    };
    let message = entry.message.trim();
    if message.is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOperationAggregator;

impl BulkOperationAggregator {
    /// Starts every operation at once and waits for all of them to settle; one typed outcome
    /// per row, in row order. Rows are never retried.
    pub async fn run<R, I, F, Fut, E>(&self, rows: Vec<R>, id_of: I, op: F) -> BulkReport
    where
        I: Fn(&R) -> String,
        F: Fn(R) -> Fut,
        Fut: Future<Output = Result<MessageLogEntry, E>>,
        E: Display,
    {
        let ids: Vec<String> = rows.iter().map(&id_of).collect();
        let settled = join_all(rows.into_iter().map(op)).await;

        let items: Vec<BulkItem> = ids
            .into_iter()
            .zip(settled)
            .map(|(id, result)| {
                let outcome = match result {
                    Ok(entry) if entry.is_success() => ItemOutcome::Succeeded(entry),
                    Ok(entry) => ItemOutcome::Failed(entry),
                    Err(err) => {
                        warn!(row = %id, error = %err, "bulk: row request failed");
                        ItemOutcome::RequestFailed(err.to_string())
                    }
                };
                BulkItem { id, outcome }
            })
            .collect();

        let report = BulkReport { items };
        info!(
            rows = report.items.len(),
            succeeded = report.succeeded().count(),
            aggregate = ?report.aggregate(),
            "bulk: all rows settled"
        );
        report
    }
}

#[cfg(test)]
#[path = "tests/bulk_tests.rs"]
mod tests;
