//! Whitespace tokenizing and numeric-tolerance comparison shared by the
//! small judge binaries (`codex-judge`, `shuffled`).

/// Splits `text` on ASCII whitespace. When `ignore_newline` is false,
/// `\n` is treated as ordinary whitespace too (tokens never span lines
/// only matters to callers that count lines separately; this tokenizer
/// always flattens the whole input).
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Real-number tolerance used by `codex-judge -r`: relative error with a
/// floor to avoid division blowing up near zero.
pub fn floats_equal(a: f64, b: f64, relative_tolerance: f64, min_epsilon: f64) -> bool {
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs()).max(min_epsilon);
    diff <= relative_tolerance * scale
}

/// Compares two tokens under the `codex-judge`/`shuffled` flag set:
/// numeric tolerance if `numeric` is set and both parse as `f64`,
/// otherwise a plain string compare (case-insensitive if requested).
pub fn tokens_equal(a: &str, b: &str, numeric: bool, case_insensitive: bool, tolerance: Option<f64>) -> bool {
    if numeric {
        if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
            return match tolerance {
                Some(tol) => floats_equal(x, y, tol, 1e-30),
                None => x == y,
            };
        }
    }
    if case_insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_on_any_whitespace_including_newlines() {
        assert_eq!(tokenize("a b\nc\t d"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn float_tolerance_respects_relative_scale() {
        assert!(floats_equal(1.0, 1.00001, 1e-4, 1e-30));
        assert!(!floats_equal(1.0, 1.1, 1e-4, 1e-30));
    }

    #[test]
    fn numeric_tokens_compare_past_string_mismatch() {
        assert!(tokens_equal("1.0", "1.00", true, false, None));
        assert!(!tokens_equal("1.0", "1.00", false, false, None));
    }
}
