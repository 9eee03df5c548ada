//! Windowed longest-common-subsequence length, used to compare the
//! tokens on a matched pair of lines. A positive `max_window` trades
//! precision for speed by only exploring a diagonal band of the DP
//! matrix (an approximation, never an overestimate of the true LCS).

fn compute_window(r: usize, row_size: usize, max_window: usize) -> (usize, usize) {
    let mut from_i = 0usize;
    let mut to_i = row_size;
    if max_window > 0 && max_window <= to_i {
        from_i = if r < max_window / 2 { 0 } else { r - max_window / 2 };
        to_i = (r + max_window / 2 + 1).max(from_i + max_window).min(to_i);
        if to_i == row_size {
            from_i = to_i - max_window;
        }
    }
    (from_i, to_i)
}

/// Length of the longest common subsequence between two index ranges
/// `0..len1` and `0..len2`, where `compare(i1, i2)` decides whether the
/// elements at those indices match. `max_window` of `0` runs the exact
/// algorithm; otherwise only a band of `max_window` columns around the
/// diagonal is scanned per row.
pub fn lcs_length(len1: usize, len2: usize, max_window: usize, compare: impl Fn(usize, usize) -> bool) -> usize {
    if len1 == 0 || len2 == 0 {
        return 0;
    }

    // Run with the shorter sequence as the row to minimize memory.
    let (rows, cols, swapped) = if len1 >= len2 { (len1, len2, false) } else { (len2, len1, true) };
    let mut row = vec![0usize; cols];

    for r in 0..rows {
        let (from, to) = compute_window(r, cols, max_window);
        let mut last_upper_left = 0usize;
        let mut last_left = 0usize;
        for i in from..to {
            let upper = row[i];
            let matched = if swapped { compare(i, r) } else { compare(r, i) };
            row[i] = if matched { last_upper_left + 1 } else { last_left.max(upper) };
            last_left = row[i];
            last_upper_left = upper;
        }
    }

    row[cols - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: &[u8], b: &[u8]) -> usize {
        lcs_length(a.len(), b.len(), 0, |i, j| a[i] == b[j])
    }

    #[test]
    fn finds_exact_lcs_length() {
        assert_eq!(eq(b"ABCBDAB", b"BDCABA"), 4);
    }

    #[test]
    fn empty_sequence_has_zero_length_lcs() {
        assert_eq!(eq(b"", b"anything"), 0);
    }

    #[test]
    fn identical_sequences_match_completely() {
        assert_eq!(eq(b"same", b"same"), 4);
    }

    #[test]
    fn windowed_lcs_never_exceeds_the_exact_result() {
        let a = b"abcdefghij";
        let b = b"jihgfedcba";
        let exact = lcs_length(a.len(), b.len(), 0, |i, j| a[i] == b[j]);
        let approx = lcs_length(a.len(), b.len(), 3, |i, j| a[i] == b[j]);
        assert!(approx <= exact);
    }
}
