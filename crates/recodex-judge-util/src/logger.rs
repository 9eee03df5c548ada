//! A small stream-like logger that tags every message with a severity and
//! can truncate itself to a byte budget at flush time without ever cutting
//! the most important messages first.
//!
//! Severities are ordered by urgency (`Fatal` first, `Debug` last); `Any`
//! is a sentinel used only as a default "no restriction" ceiling.

use std::fmt::Write as _;
use std::io::Write as IoWrite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Info,
    Notice,
    Debug,
    Any,
}

struct Block {
    severity: Severity,
    text: String,
}

/// Accumulates log blocks in declaration order, then flushes them to a
/// sink under an optional byte budget. Budget enforcement is size-smart:
/// it keeps all messages strictly more urgent than the chosen cutoff
/// severity intact, and only truncates (at a line boundary where
/// possible) the blocks at the cutoff severity itself.
pub struct Logger {
    blocks: Vec<Block>,
    current: Option<(Severity, String)>,
    max_severity: Severity,
    max_length: usize,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current: None,
            max_severity: Severity::Any,
            max_length: usize::MAX,
        }
    }

    /// Messages at or below this severity (in urgency, i.e. numerically
    /// at-or-after it) are dropped outright regardless of budget.
    pub fn restrict_severity(&mut self, max_severity: Severity) {
        self.max_severity = max_severity;
    }

    /// Caps the total flushed size in bytes.
    pub fn restrict_size(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    fn flush_current(&mut self) {
        if let Some((severity, text)) = self.current.take() {
            if !text.is_empty() {
                self.blocks.push(Block { severity, text });
            }
        }
    }

    /// Appends to the message currently being built at `severity`,
    /// starting a new block if the severity changed.
    pub fn write(&mut self, severity: Severity, data: impl std::fmt::Display) {
        if self.current.as_ref().map(|(s, _)| *s) != Some(severity) {
            self.flush_current();
            self.current = Some((severity, String::new()));
        }
        let (_, text) = self.current.as_mut().unwrap();
        let _ = write!(text, "{data}");
    }

    fn length_at(&self, severity: Severity) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.severity == severity)
            .map(|b| b.text.len())
            .sum()
    }

    /// Total bytes logged at or more urgent than `severity`.
    pub fn size(&self, severity: Severity) -> usize {
        let mut total: usize = self
            .blocks
            .iter()
            .filter(|b| b.severity <= severity)
            .map(|b| b.text.len())
            .sum();
        if let Some((s, text)) = &self.current {
            if *s <= severity {
                total += text.len();
            }
        }
        total
    }

    /// Whether the accumulated size at or above `severity` already meets
    /// the budget, used by the judge to bail out of its diff loop early.
    pub fn is_full(&self, severity: Severity) -> bool {
        self.max_length <= self.size(severity)
    }

    /// Finds the cutoff severity and the remaining byte budget at that
    /// exact severity level (everything more urgent is kept whole).
    fn size_limit(&self) -> (Severity, usize) {
        let levels = [
            Severity::Fatal,
            Severity::Error,
            Severity::Warning,
            Severity::Info,
            Severity::Notice,
            Severity::Debug,
        ];
        let mut total = 0usize;
        for &level in &levels {
            if level >= self.max_severity {
                return (level, usize::MAX);
            }
            let at_level = self.length_at(level);
            if total + at_level >= self.max_length {
                let remaining = self.max_length.saturating_sub(total);
                return (level, remaining);
            }
            total += at_level;
        }
        (Severity::Debug, usize::MAX)
    }

    /// Writes every retained block to `sink` and clears the logger.
    pub fn flush(&mut self, sink: &mut impl IoWrite) {
        self.flush_current();
        let (cutoff, mut budget_at_cutoff) = self.size_limit();

        for block in &self.blocks {
            if block.severity > cutoff {
                continue;
            }
            if block.severity == cutoff {
                if budget_at_cutoff == 0 {
                    continue;
                }
                if budget_at_cutoff != usize::MAX && budget_at_cutoff < block.text.len() {
                    let mut cut = budget_at_cutoff;
                    if let Some(newline) = block.text[..cut].rfind('\n') {
                        cut = newline + 1;
                    }
                    let _ = sink.write_all(block.text[..cut].as_bytes());
                    budget_at_cutoff = 0;
                    continue;
                }
                if budget_at_cutoff != usize::MAX {
                    budget_at_cutoff -= block.text.len();
                }
            }
            let _ = sink.write_all(block.text.as_bytes());
        }

        self.clear();
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_urgent_messages_whole_and_truncates_the_cutoff_level() {
        let mut log = Logger::new();
        log.restrict_size(10);
        log.write(Severity::Error, "12345");
        log.write(Severity::Debug, "abcdefghijklmnop");

        let mut out = Vec::new();
        log.flush(&mut out);
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("12345"));
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn unrestricted_logger_keeps_everything() {
        let mut log = Logger::new();
        log.write(Severity::Error, "line one\n");
        log.write(Severity::Warning, "line two\n");

        let mut out = Vec::new();
        log.flush(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn truncation_prefers_a_newline_boundary() {
        let mut log = Logger::new();
        log.restrict_size(8);
        log.write(Severity::Error, "ab\ncdefghij");

        let mut out = Vec::new();
        log.flush(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "ab\n");
    }
}
