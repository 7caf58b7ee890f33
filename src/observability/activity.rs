//! Recent operator-facing activity.
//!
//! Keeps the last N human-readable lines (`[Proxy:Route] GET /x -> http://t`)
//! so the management surface can show a tail without reading log files.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

pub const DEFAULT_TAIL: usize = 10;

/// Bounded ring buffer of timestamped lines.
#[derive(Debug)]
pub struct ActivityLog {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append a line, prefixed with an RFC 3339 timestamp.
    pub fn record(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message.as_ref()
        );

        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
