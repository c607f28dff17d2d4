//! Debug log ring buffer with cursor-based polling.
//!
//! Displays push their console output here so it can be read back from the
//! admin page. Push subscribers get each entry live; the ring is what a
//! (re)connecting client replays from.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default poll limit
pub const DEFAULT_LIMIT: usize = 100;

/// Maximum poll limit
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lenient parse; browsers send `log` and `warning` as well.
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" | "log" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// A buffered log line with sequence number and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, starting at 1
    pub seq: u64,
    /// Unix timestamp in milliseconds when the entry was buffered
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    /// Which display or component sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Buffer statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub oldest_cursor: u64,
    pub newest_cursor: u64,
    pub retained: usize,
    pub total_entries: u64,
    pub capacity: u64,
}

/// Poll result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub entries: Vec<LogEntry>,
    pub cursor: u64,
    pub has_more: bool,
    pub buffer: BufferStats,
    /// Server timestamp at response time (millis since epoch)
    pub server_time_ms: u64,
}

/// Poll error types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PollError {
    /// Entries after the cursor were evicted
    CursorExpired { message: String, oldest_cursor: u64 },
    /// Cursor is in the future
    InvalidCursor { message: String, newest_cursor: u64 },
    /// Limit value out of range
    InvalidLimit { message: String },
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::CursorExpired { message, .. } => write!(f, "{}", message),
            PollError::InvalidCursor { message, .. } => write!(f, "{}", message),
            PollError::InvalidLimit { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for PollError {}

/// Ring buffer of log entries
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
    capacity: usize,
    /// Highest sequence number dropped by eviction (not by `clear`)
    evicted_through: u64,
    total_pushed: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            next_seq: 1, // Start at 1 so 0 can mean "no cursor"
            capacity,
            evicted_through: 0,
            total_pushed: 0,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, source: Option<String>) -> LogEntry {
        let entry = LogEntry {
            seq: self.next_seq,
            timestamp_ms: current_time_ms(),
            level,
            message: message.into(),
            source,
        };

        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.evicted_through = evicted.seq;
            }
        }

        self.entries.push_back(entry.clone());
        self.next_seq += 1;
        self.total_pushed += 1;

        debug!(seq = entry.seq, size = self.entries.len(), "buffered log entry");
        entry
    }

    pub fn stats(&self) -> BufferStats {
        let oldest_cursor = self.entries.front().map(|e| e.seq).unwrap_or(self.next_seq);
        let newest_cursor = self.next_seq.saturating_sub(1);

        BufferStats {
            oldest_cursor,
            newest_cursor,
            retained: self.entries.len(),
            total_entries: self.total_pushed,
            capacity: self.capacity as u64,
        }
    }

    /// Entries after `cursor`, or the newest `limit` entries without one.
    pub fn poll(&self, cursor: Option<u64>, limit: usize) -> Result<PollResult, PollError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(PollError::InvalidLimit {
                message: format!("limit must be between 1 and {}", MAX_LIMIT),
            });
        }

        let stats = self.stats();

        let entries = if let Some(cursor_seq) = cursor {
            if cursor_seq < self.evicted_through {
                return Err(PollError::CursorExpired {
                    message: format!(
                        "Cursor {} is no longer available. Oldest: {}",
                        cursor_seq, stats.oldest_cursor
                    ),
                    oldest_cursor: stats.oldest_cursor,
                });
            }

            if cursor_seq > stats.newest_cursor {
                return Err(PollError::InvalidCursor {
                    message: format!(
                        "Cursor {} is in the future. Newest: {}",
                        cursor_seq, stats.newest_cursor
                    ),
                    newest_cursor: stats.newest_cursor,
                });
            }

            self.entries
                .iter()
                .filter(|e| e.seq > cursor_seq)
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
        } else {
            self.tail(limit)
        };

        let new_cursor = entries
            .last()
            .map(|e| e.seq)
            .unwrap_or_else(|| cursor.unwrap_or(stats.newest_cursor));

        let has_more = if cursor.is_some() {
            entries.last().map(|e| e.seq < stats.newest_cursor).unwrap_or(false)
        } else {
            entries.first().map(|e| e.seq > stats.oldest_cursor).unwrap_or(false)
        };

        Ok(PollResult {
            entries,
            cursor: new_cursor,
            has_more,
            buffer: stats,
            server_time_ms: current_time_ms(),
        })
    }

    /// Newest `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Drop every retained entry. Sequence numbers keep counting.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}

/// Get current time in milliseconds since epoch
fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> LogBuffer {
        let mut buffer = LogBuffer::new(capacity);
        for i in 0..count {
            buffer.push(LogLevel::Info, format!("line {}", i), Some("display-1".into()));
        }
        buffer
    }

    #[test]
    fn test_push_and_poll() {
        let buffer = filled(100, 2);
        let result = buffer.poll(None, DEFAULT_LIMIT).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.cursor, 2);
        assert!(!result.has_more);
    }

    #[test]
    fn test_cursor_polling() {
        let buffer = filled(100, 5);
        let result = buffer.poll(Some(2), DEFAULT_LIMIT).unwrap();
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.entries[0].seq, 3);
        assert_eq!(result.cursor, 5);
    }

    #[test]
    fn test_ring_buffer_eviction() {
        let buffer = filled(3, 5);
        let stats = buffer.stats();
        assert_eq!(stats.retained, 3);
        assert_eq!(stats.oldest_cursor, 3);
        assert_eq!(stats.total_entries, 5);

        // Cursor 2 has seen everything that was evicted.
        assert!(buffer.poll(Some(2), DEFAULT_LIMIT).is_ok());
        assert!(matches!(
            buffer.poll(Some(1), DEFAULT_LIMIT),
            Err(PollError::CursorExpired { oldest_cursor: 3, .. })
        ));
    }

    #[test]
    fn test_invalid_cursor() {
        let buffer = filled(10, 2);
        assert!(matches!(
            buffer.poll(Some(9), DEFAULT_LIMIT),
            Err(PollError::InvalidCursor { newest_cursor: 2, .. })
        ));
    }

    #[test]
    fn test_limit() {
        let buffer = filled(100, 10);
        let result = buffer.poll(Some(0), 4).unwrap();
        assert_eq!(result.entries.len(), 4);
        assert!(result.has_more);

        let tail = buffer.poll(None, 4).unwrap();
        assert_eq!(tail.entries.first().map(|e| e.seq), Some(7));
        assert!(tail.has_more);

        assert!(matches!(
            buffer.poll(None, 0),
            Err(PollError::InvalidLimit { .. })
        ));
    }

    #[test]
    fn test_clear_keeps_cursors_valid() {
        let mut buffer = filled(10, 4);
        assert_eq!(buffer.clear(), 4);
        let result = buffer.poll(Some(2), DEFAULT_LIMIT).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.cursor, 2);

        let entry = buffer.push(LogLevel::Warn, "after clear", None);
        assert_eq!(entry.seq, 5);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("LOG"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("shout"), None);
    }
}
