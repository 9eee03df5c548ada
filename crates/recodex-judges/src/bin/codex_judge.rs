//! `codex_judge [-r][-n] file1 file2` (spec.md §6): the original universal
//! CodEx judge — tokenwise comparison with an optional newline-agnostic
//! mode (`-n`) and an optional tolerant-real-number mode (`-r`). Exit `0`
//! on match, `1` on mismatch, `2` on error; ground truth is the
//! `codex_judge` original in examples/original_source/judges/codex_judge.

use recodex_judge_util::tokenize::floats_equal;
use std::process::ExitCode;

const MARGIN_OF_ERROR: f64 = 0.00001;
const MINIMAL_EPSILON: f64 = 1e-30;

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// A token together with whether a newline was skipped before it.
struct Token<'a> {
    text: &'a str,
    newline_before: bool,
}

fn tokenize(contents: &str) -> Vec<Token<'_>> {
    let bytes = contents.as_bytes();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < bytes.len() {
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
        let start = i;
        while i < bytes.len() && !is_whitespace(bytes[i]) {
            i += 1;
        }
        tokens.push(Token { text: &contents[start..i], newline_before: newline });
    }
    tokens
}

fn tokens_equal(a: &str, b: &str, real_numbers: bool) -> bool {
    if real_numbers {
        let (x, y) = (a.parse::<f64>(), b.parse::<f64>());
        return match (x, y) {
            (Ok(x), Ok(y)) => x == y || floats_equal(x, y, MARGIN_OF_ERROR, MINIMAL_EPSILON),
            (Err(_), Err(_)) => a == b,
            _ => false,
        };
    }
    a == b
}

fn usage_error(msg: impl std::fmt::Display) -> ExitCode {
    eprintln!("{msg}");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let (real_numbers, ignore_newline, file1, file2) = match args.as_slice() {
        [f1, f2] => (false, false, f1.clone(), f2.clone()),
        [switches, f1, f2] => {
            if !switches.starts_with('-') || switches.len() < 2 {
                return usage_error(format!("Invalid argument format \"{switches}\""));
            }
            let mut real_numbers = false;
            let mut ignore_newline = false;
            for ch in switches[1..].chars() {
                match ch {
                    'n' => ignore_newline = true,
                    'r' => real_numbers = true,
                    other => return usage_error(format!("Invalid argument format \"-{other}\"")),
                }
            }
            (real_numbers, ignore_newline, f1.clone(), f2.clone())
        }
        _ => return usage_error("Wrong amount of arguments."),
    };

    let contents1 = match std::fs::read_to_string(&file1) {
        Ok(c) => c,
        Err(e) => return usage_error(format!("Can not open file \"{file1}\": {e}")),
    };
    let contents2 = match std::fs::read_to_string(&file2) {
        Ok(c) => c,
        Err(e) => return usage_error(format!("Can not open file \"{file2}\": {e}")),
    };

    let tokens1 = tokenize(&contents1);
    let tokens2 = tokenize(&contents2);

    let mut matched = tokens1.len() == tokens2.len();
    if matched {
        for (t1, t2) in tokens1.iter().zip(tokens2.iter()) {
            if !tokens_equal(t1.text, t2.text, real_numbers) {
                matched = false;
                break;
            }
            if !ignore_newline && t1.newline_before != t2.newline_before {
                matched = false;
                break;
            }
        }
    }

    if matched {
        ExitCode::from(0)
    } else {
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_token_streams_match() {
        let t1 = tokenize("foo bar\nbaz\n");
        let t2 = tokenize("foo   bar\n  baz");
        assert_eq!(t1.len(), t2.len());
        for (a, b) in t1.iter().zip(t2.iter()) {
            assert!(tokens_equal(a.text, b.text, false));
            assert_eq!(a.newline_before, b.newline_before);
        }
    }

    #[test]
    fn real_number_tolerance_accepts_close_values() {
        assert!(tokens_equal("1.00001", "1.00002", true));
        assert!(!tokens_equal("1.0", "2.0", true));
    }

    #[test]
    fn real_number_mode_rejects_non_numeric_vs_numeric() {
        assert!(!tokens_equal("1.0", "abc", true));
    }

    #[test]
    fn newline_before_flag_differs_when_line_breaks_move() {
        let t1 = tokenize("a\nb");
        let t2 = tokenize("a b");
        assert!(t1[1].newline_before);
        assert!(!t2[1].newline_before);
    }
}
