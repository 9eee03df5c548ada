//! `shuffled [-[n][i][r]] file1 file2` (spec.md §6): compares two files as
//! rows of whitespace-delimited tokens, optionally ignoring newlines
//! (`-n`, collapsing the whole file into one row), permuting tokens within
//! a row (`-i`), or permuting whole rows (`-r`). Exit `0` match, `1`
//! mismatch, `2` error. Ground truth:
//! examples/original_source/judges/shuffled/{main.cpp,token.cpp}.
//!
//! The original orders rows/tokens by a custom XOR hash (with a documented
//! off-by-one in its bit mask) purely so `std::sort` can group equal
//! entries for comparison; a plain lexicographic sort of owned token
//! vectors gives the same grouping without needing that hash at all.

use std::process::ExitCode;

type Row = Vec<String>;

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Splits `contents` into rows of tokens. If `ignore_newlines`, the whole
/// file becomes a single row (matching the original's `skipWhitespace`
/// treating `\n` as ordinary whitespace and thus never closing a row).
fn load_rows(contents: &str, ignore_newlines: bool) -> Vec<Row> {
    let bytes = contents.as_bytes();
    let mut i = 0;
    let mut rows = Vec::new();
    let mut current = Row::new();

    loop {
        let mut newline = false;
        while i < bytes.len() && is_whitespace(bytes[i]) {
            if bytes[i] == b'\n' {
                newline = true;
            }
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if newline && !ignore_newlines && !current.is_empty() {
            rows.push(std::mem::take(&mut current));
        }
        let start = i;
        while i < bytes.len() && !is_whitespace(bytes[i]) {
            i += 1;
        }
        current.push(contents[start..i].to_string());
    }
    if !current.is_empty() {
        rows.push(current);
    }
    rows
}

fn usage_error(msg: impl std::fmt::Display) -> ExitCode {
    eprintln!("{msg}");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let (ignore_newlines, shuffled_items, shuffled_rows, file1, file2) = match args.as_slice() {
        [f1, f2] => (false, false, false, f1.clone(), f2.clone()),
        [switches, f1, f2] => {
            if !switches.starts_with('-') || switches.len() < 2 {
                return usage_error(format!("Wrong argument \"{switches}\"."));
            }
            let (mut n, mut i, mut r) = (false, false, false);
            for ch in switches[1..].chars() {
                match ch {
                    'n' => n = true,
                    'i' => i = true,
                    'r' => r = true,
                    other => return usage_error(format!("Wrong argument \"-{other}\".")),
                }
            }
            (n, i, r, f1.clone(), f2.clone())
        }
        _ => return usage_error("Wrong amount of arguments."),
    };

    let contents1 = match std::fs::read_to_string(&file1) {
        Ok(c) => c,
        Err(e) => return usage_error(format!("File \"{file1}\" can not be open: {e}")),
    };
    let contents2 = match std::fs::read_to_string(&file2) {
        Ok(c) => c,
        Err(e) => return usage_error(format!("File \"{file2}\" can not be open: {e}")),
    };

    let mut rows1 = load_rows(&contents1, ignore_newlines);
    let mut rows2 = load_rows(&contents2, ignore_newlines);

    if shuffled_items {
        for row in rows1.iter_mut().chain(rows2.iter_mut()) {
            row.sort();
        }
    }
    if shuffled_rows {
        rows1.sort();
        rows2.sort();
    }

    if rows1 == rows2 {
        ExitCode::from(0)
    } else {
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(words: &[&str]) -> Row {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ignoring_newlines_collapses_the_file_into_one_row() {
        let rows = load_rows("a b\nc d\n", true);
        assert_eq!(rows, vec![row(&["a", "b", "c", "d"])]);
    }

    #[test]
    fn rows_are_split_on_newlines_by_default() {
        let rows = load_rows("a b\nc d\n", false);
        assert_eq!(rows, vec![row(&["a", "b"]), row(&["c", "d"])]);
    }

    #[test]
    fn sorting_rows_detects_a_permuted_match() {
        let mut rows1 = load_rows("a\nb\nc\n", false);
        let mut rows2 = load_rows("c\na\nb\n", false);
        rows1.sort();
        rows2.sort();
        assert_eq!(rows1, rows2);
    }

    #[test]
    fn sorting_items_within_a_row_detects_a_permuted_row() {
        let mut rows1 = load_rows("a b c\n", false);
        let mut rows2 = load_rows("c a b\n", false);
        for row in rows1.iter_mut().chain(rows2.iter_mut()) {
            row.sort();
        }
        assert_eq!(rows1, rows2);
    }
}
