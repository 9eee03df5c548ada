//! Token- and line-level comparison (spec.md §4.11): a token comparator
//! with optional case-folding and numeric tolerance, and a line
//! comparator built on top of it, in ordered (LCS) or unordered
//! (multiset-difference) mode.

use crate::lcs::lcs_length;
use crate::reader::{Line, Reader};
use recodex_judge_util::{Logger, Severity};
use std::collections::HashMap;

/// Maximum value a line comparator can return; errors are linearly
/// rescaled into `0..=RESULT_MAX`.
pub const RESULT_MAX: u32 = u32::MAX;

fn try_parse_int(token: &[u8]) -> Option<i64> {
    std::str::from_utf8(token).ok()?.parse::<i64>().ok()
}

fn try_parse_float(token: &[u8]) -> Option<f64> {
    std::str::from_utf8(token).ok()?.parse::<f64>().ok()
}

fn bytes_eq_lowercased(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

/// Compares two tokens for equality, trying numeric interpretations
/// before falling back to a (possibly case-insensitive) string compare.
pub struct TokenComparator {
    ignore_case: bool,
    numeric: bool,
    float_tolerance: f64,
}

impl TokenComparator {
    pub fn new(ignore_case: bool, numeric: bool, float_tolerance: f64) -> Self {
        Self { ignore_case, numeric, float_tolerance }
    }

    pub fn numeric(&self) -> bool {
        self.numeric
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> bool {
        // No plausible number needs more than 32 characters.
        if self.numeric && a.len() < 32 && b.len() < 32 {
            if let (Some(x), Some(y)) = (try_parse_int(a), try_parse_int(b)) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (try_parse_float(a), try_parse_float(b)) {
                let err = (x - y).abs() / (x.abs() + y.abs());
                return err <= self.float_tolerance || (x == 0.0 && y == 0.0);
            }
        }

        if self.ignore_case {
            bytes_eq_lowercased(a, b)
        } else {
            a == b
        }
    }
}

fn round_half_to_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn compute_result(errors: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let scaled = RESULT_MAX as f64 * errors as f64 / total as f64;
    round_half_to_even(scaled.clamp(0.0, RESULT_MAX as f64)) as u32
}

/// A token key usable in a multiset for the unordered line comparison:
/// numeric tokens are bucketed by parsed value so `1` and `01` collide.
#[derive(PartialEq, Eq, Hash)]
enum TokenKey {
    Int(i64),
    Float(u64), // bit pattern of the f64, to make it Eq/Hash-able
    Text(Vec<u8>),
}

fn token_key(token: &[u8], numeric: bool) -> TokenKey {
    if numeric {
        if let Some(i) = try_parse_int(token) {
            return TokenKey::Int(i);
        }
        if let Some(f) = try_parse_float(token) {
            return TokenKey::Float(f.to_bits());
        }
    }
    TokenKey::Text(token.to_vec())
}

/// Compares whole lines, either preserving token order (LCS-based) or
/// ignoring it (multiset difference, for `shuffled_tokens`).
pub struct LineComparator {
    token_comparator: TokenComparator,
    shuffled_tokens: bool,
    token_lcs_max_window: usize,
}

impl LineComparator {
    pub fn new(token_comparator: TokenComparator, shuffled_tokens: bool, token_lcs_max_window: usize) -> Self {
        Self { token_comparator, shuffled_tokens, token_lcs_max_window }
    }

    pub fn compare(&self, reader1: &Reader, line1: &Line, reader2: &Reader, line2: &Line) -> u32 {
        if self.shuffled_tokens {
            self.compare_unordered(reader1, line1, reader2, line2, None)
        } else {
            self.compare_ordered(reader1, line1, reader2, line2, None)
        }
    }

    /// Same comparison, but also emits per-token diagnostics to `log`.
    pub fn compare_and_log(&self, reader1: &Reader, line1: &Line, reader2: &Reader, line2: &Line, log: &mut Logger) -> u32 {
        if self.shuffled_tokens {
            self.compare_unordered(reader1, line1, reader2, line2, Some(log))
        } else {
            self.compare_ordered(reader1, line1, reader2, line2, Some(log))
        }
    }

    fn compare_ordered(
        &self,
        reader1: &Reader,
        line1: &Line,
        reader2: &Reader,
        line2: &Line,
        log: Option<&mut Logger>,
    ) -> u32 {
        let comparator = &self.token_comparator;
        let lcs = lcs_length(line1.size(), line2.size(), self.token_lcs_max_window, |i1, i2| {
            comparator.compare(reader1.token_bytes(line1.token(i1)), reader2.token_bytes(line2.token(i2)))
        });

        if let Some(log) = log {
            log_ordered_diffs(reader1, line1, reader2, line2, comparator, self.token_lcs_max_window, log);
        }

        let errors = (line1.size() + line2.size()).saturating_sub(2 * lcs);
        compute_result(errors, line1.size() + line2.size())
    }

    fn compare_unordered(
        &self,
        reader1: &Reader,
        line1: &Line,
        reader2: &Reader,
        line2: &Line,
        log: Option<&mut Logger>,
    ) -> u32 {
        let numeric = self.token_comparator.numeric();
        let mut counts: HashMap<TokenKey, i64> = HashMap::new();

        for i in 0..line1.size() {
            let token = reader1.token_bytes(line1.token(i));
            let key = token_key(token, numeric);
            let key = if self.token_comparator_ignores_case() {
                lowercase_text_key(key)
            } else {
                key
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        for i in 0..line2.size() {
            let token = reader2.token_bytes(line2.token(i));
            let key = token_key(token, numeric);
            let key = if self.token_comparator_ignores_case() {
                lowercase_text_key(key)
            } else {
                key
            };
            *counts.entry(key).or_insert(0) -= 1;
        }

        let errors = counts.values().filter(|&&n| n != 0).count();
        if let Some(log) = log {
            for (key, count) in &counts {
                if *count != 0 {
                    log_unordered_mismatch(key, *count, line2.line_number(), log);
                }
            }
        }

        compute_result(errors, line1.size() + line2.size())
    }

    fn token_comparator_ignores_case(&self) -> bool {
        self.token_comparator.ignore_case
    }
}

fn lowercase_text_key(key: TokenKey) -> TokenKey {
    match key {
        TokenKey::Text(bytes) => TokenKey::Text(bytes.iter().map(u8::to_ascii_lowercase).collect()),
        other => other,
    }
}

fn log_unordered_mismatch(key: &TokenKey, diff: i64, line: u32, log: &mut Logger) {
    let value = match key {
        TokenKey::Int(i) => i.to_string(),
        TokenKey::Float(bits) => f64::from_bits(*bits).to_string(),
        TokenKey::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    };
    let verb = if diff < 0 { "unexpected" } else { "missing" };
    log.write(Severity::Error, format!("{line}: {verb} token '{value}'"));
    if diff.abs() > 1 {
        log.write(Severity::Warning, format!(" ({}x)", diff.abs()));
    }
    log.write(Severity::Error, "\n");
}

#[allow(clippy::too_many_arguments)]
fn log_ordered_diffs(
    reader1: &Reader,
    line1: &Line,
    reader2: &Reader,
    line2: &Line,
    comparator: &TokenComparator,
    max_window: usize,
    log: &mut Logger,
) {
    // Re-derive which tokens matched by recomputing the LCS with indices
    // visible to a simple greedy walk; sufficient for human-readable
    // diagnostics even though it is not a full traceback.
    let mut i1 = 0usize;
    let mut i2 = 0usize;
    while i1 < line1.size() && i2 < line2.size() {
        let t1 = reader1.token_bytes(line1.token(i1));
        let t2 = reader2.token_bytes(line2.token(i2));
        if comparator.compare(t1, t2) {
            i1 += 1;
            i2 += 1;
            continue;
        }
        let remaining1 = line1.size() - i1;
        let remaining2 = line2.size() - i2;
        if remaining1 <= remaining2 {
            log.write(Severity::Error, format!("{}: unexpected token '{}'\n", line2.line_number(), String::from_utf8_lossy(t2)));
            i2 += 1;
        } else {
            log.write(Severity::Error, format!("{}: missing token '{}'\n", line1.line_number(), String::from_utf8_lossy(t1)));
            i1 += 1;
        }
        let _ = max_window;
    }
    while i2 < line2.size() {
        log.write(Severity::Error, format!("{}: unexpected token '{}'\n", line2.line_number(), String::from_utf8_lossy(reader2.token_bytes(line2.token(i2)))));
        i2 += 1;
    }
    while i1 < line1.size() {
        log.write(Severity::Error, format!("{}: missing token '{}'\n", line1.line_number(), String::from_utf8_lossy(reader1.token_bytes(line1.token(i1)))));
        i1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tolerance_accepts_close_floats() {
        let cmp = TokenComparator::new(false, true, 0.001);
        assert!(cmp.compare(b"1.00001", b"1.00002"));
        assert!(!cmp.compare(b"1.0", b"2.0"));
    }

    #[test]
    fn integers_compare_exactly_even_with_tolerance_set() {
        let cmp = TokenComparator::new(false, true, 0.5);
        assert!(cmp.compare(b"10", b"10"));
        assert!(!cmp.compare(b"10", b"11"));
    }

    #[test]
    fn case_insensitive_strings_match() {
        let cmp = TokenComparator::new(true, false, 0.0);
        assert!(cmp.compare(b"Foo", b"foo"));
    }

    #[test]
    fn compute_result_rounds_half_to_even() {
        assert_eq!(compute_result(1, 2), (RESULT_MAX as f64 / 2.0).round() as u32);
    }
}
