//! CLI entry point for the token judge (spec.md §6): compares two text
//! files tokenwise under a configurable set of flags and prints `1.0`/`0.0`
//! to stdout, exiting `0` (match), `1` (mismatch) or `2` (internal error).

mod comparator;
mod judge;
mod lcs;
mod reader;

use clap::Parser;
use comparator::{LineComparator, TokenComparator};
use judge::Judge;
use reader::Reader;
use recodex_judge_util::Logger;
use std::path::PathBuf;
use std::process::ExitCode;

/// Two-level LCS diff judge: lines paired by weighted LCS, tokens within
/// matched lines compared by LCS (optionally windowed and/or order-blind).
#[derive(Parser, Debug)]
#[command(name = "recodex-token-judge", about = "ReCodEx token-wise output judge")]
struct Args {
    /// Expected (correct) output file.
    expected: PathBuf,

    /// Tested solution's output file.
    actual: PathBuf,

    /// Empty lines are ignored completely.
    #[arg(long, conflicts_with_all = ["ignore_line_ends", "ignore_trailing_whitespace"])]
    ignore_empty_lines: bool,

    /// Lines starting with '#' are ignored completely.
    #[arg(long)]
    allow_comments: bool,

    /// Newline characters are treated as regular whitespace.
    #[arg(long, conflicts_with = "ignore_trailing_whitespace")]
    ignore_line_ends: bool,

    /// Any whitespace at the end of either file is ignored.
    #[arg(long)]
    ignore_trailing_whitespace: bool,

    /// Alphanumeric tokens are compared without case sensitivity.
    #[arg(long)]
    case_insensitive: bool,

    /// Tokens that look like integers or decimal floats are compared as numbers.
    #[arg(long)]
    numeric: bool,

    /// Maximal allowed error for float comparisons: |a-b|/(|a|+|b|).
    #[arg(long, default_value_t = 0.0001)]
    float_tolerance: f64,

    /// Tokens on a line may appear in any order.
    #[arg(long)]
    shuffled_tokens: bool,

    /// Lines may appear in any order. Not implemented; rejected.
    #[arg(long, conflicts_with = "ignore_line_ends")]
    shuffled_lines: bool,

    /// Tuning parameter for the approximate token LCS (0 = always exact).
    #[arg(long, default_value_t = 11, value_parser = clap::value_parser!(u16).range(0..=255))]
    token_lcs_approx_max_window: u16,

    /// Maximal length of the diagnostic log, in bytes.
    #[arg(long)]
    log_limit: Option<usize>,
}

fn run(args: &Args) -> anyhow::Result<bool> {
    if !(0.0..=0.9).contains(&args.float_tolerance) {
        anyhow::bail!("float-tolerance must be within 0..=0.9");
    }
    if args.shuffled_lines {
        anyhow::bail!("shuffled-lines comparison is not implemented");
    }

    let mut log = Logger::new();
    if let Some(limit) = args.log_limit {
        log.restrict_size(limit);
    }

    let mut correct = Reader::open(
        &args.expected,
        args.ignore_empty_lines,
        args.allow_comments,
        args.ignore_line_ends,
        args.ignore_trailing_whitespace,
    )?;
    let mut result = Reader::open(
        &args.actual,
        args.ignore_empty_lines,
        args.allow_comments,
        args.ignore_line_ends,
        args.ignore_trailing_whitespace,
    )?;

    let token_comparator = TokenComparator::new(args.case_insensitive, args.numeric, args.float_tolerance);
    let line_comparator =
        LineComparator::new(token_comparator, args.shuffled_tokens, args.token_lcs_approx_max_window as usize);
    let judge = Judge::new(line_comparator);

    let matched = judge.compare(&mut correct, &mut result, &mut log);
    log.flush(&mut std::io::stderr());
    Ok(matched)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(true) => {
            println!("1.0");
            ExitCode::from(0)
        }
        Ok(false) => {
            println!("0.0");
            ExitCode::from(1)
        }
        Err(err) => {
            println!("0.0");
            eprintln!("Error: {err}\n");
            ExitCode::from(2)
        }
    }
}
