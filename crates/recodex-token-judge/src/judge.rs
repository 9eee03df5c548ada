//! The top-level diff loop (spec.md §4.11, steps 1-7): fast-skip matching
//! leading lines, then buffer a bounded window from each file and pair
//! lines with a weighted line-level LCS, logging mismatches until the
//! log's severity budget is spent or both files are exhausted.
//!
//! Line buffers are `VecDeque`s rather than the front-erasing `Vec`s the
//! original uses, so consuming matched lines off the front is O(1).

use crate::comparator::LineComparator;
use crate::reader::{Line, Reader};
use recodex_judge_util::{Logger, Severity};
use std::collections::VecDeque;

const MAX_LINES: usize = 100;
const MAX_TOKENS: usize = 1000;
const MAX_CHARS: usize = 10_000;

/// One cell of the line-level LCS dynamic-programming matrix.
#[derive(Clone, Copy, Default)]
struct LcsNode {
    comparison_result: u32,
    total_tokens: usize,
    score: i64,
    /// Back-pointer deltas; `-1` means "this axis moved", `0` means it
    /// didn't. Named to match which loop index they adjust during
    /// traceback (`c += dc; r += dr;`), not a row/column convention.
    dc: i8,
    dr: i8,
}

/// One reconstructed pairing between a correct-buffer line and a
/// result-buffer line (either side may be absent, meaning that line was
/// skipped rather than paired).
struct Diff {
    correct: Option<usize>,
    result: Option<usize>,
    is_match: bool,
}

/// Runs the ordered-line comparison strategy over two readers, logging
/// mismatches to `log`. `shuffled_lines` is rejected by the CLI before a
/// `Judge` is ever constructed (spec.md Design Notes).
pub struct Judge {
    line_comparator: LineComparator,
}

impl Judge {
    pub fn new(line_comparator: LineComparator) -> Self {
        Self { line_comparator }
    }

    /// Compares `correct` against `result`, returning whether they match.
    pub fn compare(&self, correct: &mut Reader, result: &mut Reader, log: &mut Logger) -> bool {
        let mut correct_held: Option<Line> = None;
        let mut result_held: Option<Line> = None;
        let mut correct_buf: VecDeque<Line> = VecDeque::new();
        let mut result_buf: VecDeque<Line> = VecDeque::new();

        let all_matched = self.skip_matching_leading_lines(
            correct,
            result,
            &mut correct_held,
            &mut result_held,
            &mut correct_buf,
            &mut result_buf,
        );

        if all_matched {
            let mut reported = self.log_impaired_correct_trailing(correct, &mut correct_held, &mut correct_buf, log);
            reported |= self.log_impaired_result_trailing(result, &mut result_held, &mut result_buf, log);
            return !reported;
        }

        loop {
            if log.is_full(Severity::Error) {
                break;
            }

            self.fill_buffers(correct, result, &mut correct_held, &mut result_held, &mut correct_buf, &mut result_buf);

            if (correct.eof() && correct_buf.is_empty()) || (result.eof() && result_buf.is_empty()) {
                self.log_impaired_correct_trailing(correct, &mut correct_held, &mut correct_buf, log);
                self.log_impaired_result_trailing(result, &mut result_held, &mut result_buf, log);
                break;
            }

            let matrix = self.compute_lcs_matrix(correct, result, &correct_buf, &result_buf);
            let (diffs, last_matched_correct, last_matched_result) =
                self.collect_diff_records(&matrix, correct_buf.len(), result_buf.len());
            self.process_and_log_diffs(
                correct,
                result,
                &mut correct_buf,
                &mut result_buf,
                &diffs,
                last_matched_correct,
                last_matched_result,
                log,
            );

            if correct.eof() && correct_buf.is_empty() && result.eof() && result_buf.is_empty() {
                break;
            }
        }

        false
    }

    fn read_next_correct_line(&self, reader: &mut Reader, held: &mut Option<Line>, buf: &mut VecDeque<Line>) {
        *held = if let Some(line) = buf.pop_front() { Some(line) } else { reader.read_line() };
    }

    fn read_next_result_line(&self, reader: &mut Reader, held: &mut Option<Line>, buf: &mut VecDeque<Line>) {
        *held = if let Some(line) = buf.pop_front() { Some(line) } else { reader.read_line() };
    }

    /// Drops leading line pairs that compare as exact matches. Returns
    /// `true` if this consumed one side (or both) entirely without ever
    /// finding a mismatch; the last-read pair (if any) is left in
    /// `correct_held`/`result_held` for the caller.
    #[allow(clippy::too_many_arguments)]
    fn skip_matching_leading_lines(
        &self,
        correct: &mut Reader,
        result: &mut Reader,
        correct_held: &mut Option<Line>,
        result_held: &mut Option<Line>,
        correct_buf: &mut VecDeque<Line>,
        result_buf: &mut VecDeque<Line>,
    ) -> bool {
        while (!correct.eof() || !correct_buf.is_empty()) && (!result.eof() || !result_buf.is_empty()) {
            self.read_next_correct_line(correct, correct_held, correct_buf);
            self.read_next_result_line(result, result_held, result_buf);
            match (correct_held.as_ref(), result_held.as_ref()) {
                (None, None) => return true,
                (None, Some(_)) | (Some(_), None) => return false,
                (Some(c), Some(r)) => {
                    if self.line_comparator.compare(correct, c, result, r) != 0 {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn fill_buffers(
        &self,
        correct: &mut Reader,
        result: &mut Reader,
        correct_held: &mut Option<Line>,
        result_held: &mut Option<Line>,
        correct_buf: &mut VecDeque<Line>,
        result_buf: &mut VecDeque<Line>,
    ) {
        if let Some(line) = correct_held.take() {
            correct_buf.push_front(line);
        }
        let (mut tokens, mut chars) = (0usize, 0usize);
        for line in correct_buf.iter() {
            tokens += line.size();
            chars += line.raw_length();
        }
        while !correct.eof() && correct_buf.len() < MAX_LINES && tokens < MAX_TOKENS && chars < MAX_CHARS {
            if let Some(line) = correct.read_line() {
                tokens += line.size();
                chars += line.raw_length();
                correct_buf.push_back(line);
            } else {
                break;
            }
        }

        if let Some(line) = result_held.take() {
            result_buf.push_front(line);
        }
        let (mut tokens, mut chars) = (0usize, 0usize);
        for line in result_buf.iter() {
            tokens += line.size();
            chars += line.raw_length();
        }
        while !result.eof() && result_buf.len() < MAX_LINES && tokens < MAX_TOKENS && chars < MAX_CHARS {
            if let Some(line) = result.read_line() {
                tokens += line.size();
                chars += line.raw_length();
                result_buf.push_back(line);
            } else {
                break;
            }
        }
    }

    fn compute_lcs_matrix(
        &self,
        correct_reader: &Reader,
        result_reader: &Reader,
        correct_buf: &VecDeque<Line>,
        result_buf: &VecDeque<Line>,
    ) -> Vec<LcsNode> {
        let size_c = correct_buf.len();
        let size_r = result_buf.len();
        let stride = size_r + 1;
        let mut matrix = vec![LcsNode::default(); (size_c + 1) * stride];

        for c in 0..size_c {
            let prev = matrix[c * stride].score;
            let node = &mut matrix[(c + 1) * stride];
            node.score = prev + correct_buf[c].size() as i64 + 1;
            node.dc = -1;
        }
        for r in 0..size_r {
            let prev = matrix[r].score;
            let node = &mut matrix[r + 1];
            node.score = prev + result_buf[r].size() as i64 + 1;
            node.dr = -1;
        }

        for c in 0..size_c {
            for r in 0..size_r {
                let comparison_result =
                    self.line_comparator.compare(correct_reader, &correct_buf[c], result_reader, &result_buf[r]);
                let total_tokens = correct_buf[c].size() + result_buf[r].size();

                let upper_score = matrix[c * stride + (r + 1)].score + correct_buf[c].size() as i64 + 1;
                let left_score = matrix[(c + 1) * stride + r].score + result_buf[r].size() as i64 + 1;
                let diag_score = matrix[c * stride + r].score + comparison_result as i64;

                let node = &mut matrix[(c + 1) * stride + (r + 1)];
                node.comparison_result = comparison_result;
                node.total_tokens = total_tokens;
                if diag_score <= left_score && diag_score <= upper_score {
                    node.dc = -1;
                    node.dr = -1;
                    node.score = diag_score;
                } else if left_score <= upper_score {
                    node.dr = -1;
                    node.score = left_score;
                } else {
                    node.dc = -1;
                    node.score = upper_score;
                }
            }
        }

        matrix
    }

    fn collect_diff_records(
        &self,
        matrix: &[LcsNode],
        size_c: usize,
        size_r: usize,
    ) -> (Vec<Diff>, Option<usize>, Option<usize>) {
        let stride = size_r + 1;
        let mut diffs = Vec::new();
        let mut last_matched_correct = None;
        let mut last_matched_result = None;
        let mut c = size_c;
        let mut r = size_r;

        while c > 0 || r > 0 {
            let node = &matrix[c * stride + r];
            if node.dc == 0 || node.dr == 0 || node.comparison_result != 0 {
                let correct_idx = if node.dc != 0 { Some(c - 1) } else { None };
                let result_idx = if node.dr != 0 { Some(r - 1) } else { None };
                let is_match =
                    node.dc != 0 && node.dr != 0 && (node.comparison_result as u64) * 3 < node.total_tokens as u64;
                diffs.push(Diff { correct: correct_idx, result: result_idx, is_match });
            } else if node.dc != 0 && node.dr != 0 {
                last_matched_correct.get_or_insert(c - 1);
                last_matched_result.get_or_insert(r - 1);
            }
            c = (c as i64 + node.dc as i64) as usize;
            r = (r as i64 + node.dr as i64) as usize;
        }

        (diffs, last_matched_correct, last_matched_result)
    }

    fn log_impaired_correct_line(&self, reader: &Reader, line: &Line, log: &mut Logger) {
        log.write(
            Severity::Error,
            format!("-{}: {}\n", line.line_number(), String::from_utf8_lossy(reader.raw_line_bytes(line))),
        );
    }

    fn log_impaired_result_line(&self, reader: &Reader, line: &Line, log: &mut Logger) {
        log.write(
            Severity::Error,
            format!("+{}: {}\n", line.line_number(), String::from_utf8_lossy(reader.raw_line_bytes(line))),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn process_and_log_diffs(
        &self,
        correct_reader: &Reader,
        result_reader: &Reader,
        correct_buf: &mut VecDeque<Line>,
        result_buf: &mut VecDeque<Line>,
        diffs: &[Diff],
        last_matched_correct: Option<usize>,
        last_matched_result: Option<usize>,
        log: &mut Logger,
    ) {
        let mut last_correct = None;
        let mut last_result = None;

        for diff in diffs.iter().rev() {
            if diff.is_match {
                let c = diff.correct.unwrap();
                let r = diff.result.unwrap();
                self.line_comparator.compare_and_log(correct_reader, &correct_buf[c], result_reader, &result_buf[r], log);
                last_correct = Some(c);
                last_result = Some(r);
            } else {
                if let Some(c) = diff.correct {
                    self.log_impaired_correct_line(correct_reader, &correct_buf[c], log);
                    last_correct = Some(c);
                }
                if let Some(r) = diff.result {
                    self.log_impaired_result_line(result_reader, &result_buf[r], log);
                    last_result = Some(r);
                }
            }

            let at_correct_tail = diff.correct == Some(correct_buf.len() - 1);
            let at_result_tail = diff.result == Some(result_buf.len() - 1);
            if at_correct_tail || at_result_tail {
                break;
            }
        }

        if let Some(c) = last_matched_correct {
            last_correct = Some(last_correct.map_or(c, |existing| existing.max(c)));
        }
        if let Some(r) = last_matched_result {
            last_result = Some(last_result.map_or(r, |existing| existing.max(r)));
        }

        if let Some(c) = last_correct {
            correct_buf.drain(..=c);
        }
        if let Some(r) = last_result {
            result_buf.drain(..=r);
        }
    }

    fn log_impaired_correct_trailing(
        &self,
        reader: &mut Reader,
        held: &mut Option<Line>,
        buf: &mut VecDeque<Line>,
        log: &mut Logger,
    ) -> bool {
        let mut reported = false;
        while !reader.eof() && !log.is_full(Severity::Error) {
            self.read_next_correct_line(reader, held, buf);
            if let Some(line) = held.take() {
                self.log_impaired_correct_line(reader, &line, log);
                reported = true;
            }
        }
        reported
    }

    fn log_impaired_result_trailing(
        &self,
        reader: &mut Reader,
        held: &mut Option<Line>,
        buf: &mut VecDeque<Line>,
        log: &mut Logger,
    ) -> bool {
        let mut reported = false;
        while !reader.eof() && !log.is_full(Severity::Error) {
            self.read_next_result_line(reader, held, buf);
            if let Some(line) = held.take() {
                self.log_impaired_result_line(reader, &line, log);
                reported = true;
            }
        }
        reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::TokenComparator;
    use std::io::Write;

    fn reader_over(contents: &str) -> (Reader, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let reader = Reader::open(file.path(), false, false, false, false).unwrap();
        (reader, file)
    }

    fn judge() -> Judge {
        let token_comparator = TokenComparator::new(false, false, 0.0001);
        Judge::new(LineComparator::new(token_comparator, false, 0))
    }

    #[test]
    fn identical_files_match() {
        let (mut correct, _f1) = reader_over("a b c\nd e\n");
        let (mut result, _f2) = reader_over("a b c\nd e\n");
        let mut log = Logger::new();
        assert!(judge().compare(&mut correct, &mut result, &mut log));
    }

    #[test]
    fn extra_trailing_line_is_a_mismatch() {
        let (mut correct, _f1) = reader_over("a b\n");
        let (mut result, _f2) = reader_over("a b\nc d\n");
        let mut log = Logger::new();
        assert!(!judge().compare(&mut correct, &mut result, &mut log));

        let mut out = Vec::new();
        log.flush(&mut out);
        assert!(String::from_utf8(out).unwrap().contains("c d"));
    }

    #[test]
    fn a_single_wrong_token_is_reported_but_matched_as_a_line_pair() {
        let (mut correct, _f1) = reader_over("1 2 3\n");
        let (mut result, _f2) = reader_over("1 2 4\n");
        let mut log = Logger::new();
        assert!(!judge().compare(&mut correct, &mut result, &mut log));
    }

    #[test]
    fn completely_different_line_counts_as_two_impaired_lines() {
        let (mut correct, _f1) = reader_over("the quick brown fox\n");
        let (mut result, _f2) = reader_over("zzz\n");
        let mut log = Logger::new();
        assert!(!judge().compare(&mut correct, &mut result, &mut log));
    }
}
