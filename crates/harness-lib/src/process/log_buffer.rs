use std::time::Duration;

use regex::Regex;
use tokio::sync::{Notify, RwLock};

/// A line of captured output that matched a pattern, with its capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMatch {
    pub line: String,
    /// Capture groups in pattern order, group 0 (the whole match) excluded.
    pub captures: Vec<Option<String>>,
}

impl LogMatch {
    fn from_captures(line: &str, captures: regex::Captures<'_>) -> Self {
        Self {
            line: line.to_string(),
            captures: captures
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Returns the `index`-th capture group, starting from 1.
    pub fn capture(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.captures.get(i))
            .and_then(|group| group.as_deref())
    }
}

/// Append-only buffer of output lines.
///
/// Writers notify all pending waiters after every append. Waiters register for
/// the notification before scanning, so a line appended between a scan and the
/// following wait is never missed.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: RwLock<Vec<String>>,
    changed: Notify,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, line: String) {
        self.lines.write().await.push(line);
        self.changed.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.lines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lines.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    /// Scans every line from `start` on and returns the first match.
    pub async fn find(&self, regex: &Regex, start: usize) -> Option<LogMatch> {
        let lines = self.lines.read().await;
        lines.iter().skip(start).find_map(|line| {
            regex
                .captures(line)
                .map(|captures| LogMatch::from_captures(line, captures))
        })
    }

    /// Waits until a line from `start` on matches `regex`. Returns `None` once
    /// `timeout` has elapsed without a match.
    pub async fn wait_for(
        &self,
        regex: &Regex,
        start: usize,
        timeout: Duration,
    ) -> Option<LogMatch> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(found) = self.find(regex, start).await {
                    return found;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }
}
