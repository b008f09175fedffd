// Per-job append-only log buffer

use crate::domain::job::LogLine;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lines read from a buffer starting at a cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSlice {
    pub lines: Vec<LogLine>,
    /// `cursor + lines.len()`; the position a reader should ask for next
    pub next_cursor: u64,
}

/// Isolated, append-only sequence of log lines owned by one job.
///
/// Sequence numbers start at 0 and are assigned under the write lock, so they
/// stay gap-free and strictly increasing even with several producers. Readers
/// hold the read lock only long enough to copy their slice; they never share a
/// read position.
#[derive(Debug, Default)]
pub struct JobLogBuffer {
    lines: RwLock<Vec<LogLine>>,
}

impl JobLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return its sequence number
    pub fn append(&self, text: impl Into<String>) -> u64 {
        let mut lines = self.write();
        let sequence_number = lines.len() as u64;
        lines.push(LogLine {
            sequence_number,
            text: text.into(),
        });
        sequence_number
    }

    /// Read every line with `sequence_number >= cursor`
    pub fn read_from(&self, cursor: u64) -> LogSlice {
        self.read_from_limited(cursor, usize::MAX)
    }

    /// Read at most `max_lines` lines starting at `cursor`.
    ///
    /// A cursor past the end is not an error: it yields no lines and echoes
    /// the cursor back.
    pub fn read_from_limited(&self, cursor: u64, max_lines: usize) -> LogSlice {
        let lines = self.read();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        if start >= lines.len() {
            return LogSlice {
                lines: Vec::new(),
                next_cursor: cursor,
            };
        }

        let page: Vec<LogLine> = lines[start..].iter().take(max_lines).cloned().collect();
        LogSlice {
            next_cursor: cursor + page.len() as u64,
            lines: page,
        }
    }

    pub fn len(&self) -> u64 {
        self.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Appends cannot leave the vector half-written, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Vec<LogLine>> {
        self.lines.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LogLine>> {
        self.lines.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn texts(slice: &LogSlice) -> Vec<&str> {
        slice.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_append_then_read_incrementally() {
        let buffer = JobLogBuffer::new();
        assert_eq!(buffer.append("a"), 0);
        assert_eq!(buffer.append("b"), 1);

        let first = buffer.read_from(0);
        assert_eq!(texts(&first), vec!["a", "b"]);
        assert_eq!(first.next_cursor, 2);

        buffer.append("c");
        let second = buffer.read_from(first.next_cursor);
        assert_eq!(
            second.lines,
            vec![LogLine {
                sequence_number: 2,
                text: "c".to_string()
            }]
        );
        assert_eq!(second.next_cursor, 3);
    }

    #[test]
    fn test_stale_cursor_is_empty_not_error() {
        let buffer = JobLogBuffer::new();
        buffer.append("only");

        let slice = buffer.read_from(10);
        assert!(slice.lines.is_empty());
        assert_eq!(slice.next_cursor, 10);

        let at_end = buffer.read_from(1);
        assert!(at_end.lines.is_empty());
        assert_eq!(at_end.next_cursor, 1);
    }

    #[test]
    fn test_limited_read_pages_through() {
        let buffer = JobLogBuffer::new();
        for i in 0..5 {
            buffer.append(format!("line {}", i));
        }

        let page = buffer.read_from_limited(1, 2);
        assert_eq!(texts(&page), vec!["line 1", "line 2"]);
        assert_eq!(page.next_cursor, 3);

        let rest = buffer.read_from_limited(page.next_cursor, 100);
        assert_eq!(texts(&rest), vec!["line 3", "line 4"]);
        assert_eq!(rest.next_cursor, 5);
    }

    #[test]
    fn test_independent_readers_do_not_disturb_each_other() {
        let buffer = JobLogBuffer::new();
        buffer.append("x");
        buffer.append("y");

        let tab_a = buffer.read_from(0);
        let tab_b = buffer.read_from(1);
        let tab_a_again = buffer.read_from(0);

        assert_eq!(tab_a, tab_a_again);
        assert_eq!(texts(&tab_b), vec!["y"]);
    }

    #[test]
    fn test_concurrent_producers_get_gap_free_sequence() {
        let buffer = Arc::new(JobLogBuffer::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        buffer.append(format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = buffer.read_from(0);
        assert_eq!(all.lines.len(), 2000);
        for (expected, line) in all.lines.iter().enumerate() {
            assert_eq!(line.sequence_number, expected as u64);
        }
    }
}
