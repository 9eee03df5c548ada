//! `recodex-judge-passthrough in out` (spec.md §6): copies `in` to stdout
//! verbatim; `out` is accepted for CLI-compatibility with the other judges
//! but unused, matching the original
//! (examples/original_source/judges/judge_passthrough/main.cpp) which also
//! never opens its second argument. Exit `0` on success, `2` on error.

use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [input, _output] = args.as_slice() else {
        eprintln!("Wrong amount of arguments.");
        return ExitCode::from(2);
    };

    let mut file = match File::open(input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = io::copy(&mut file, &mut io::stdout()) {
        eprintln!("Error: {e}");
        return ExitCode::from(2);
    }
    let _ = io::stdout().flush();

    ExitCode::from(0)
}
