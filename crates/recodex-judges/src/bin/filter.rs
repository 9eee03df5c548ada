//! `filter [in [out]]` (spec.md §6): strips `//`-prefixed line comments
//! from a text stream, deleting the whole line when the comment starts at
//! its beginning. Missing `in`/`out` default to stdin/stdout. Ground
//! truth: examples/original_source/judges/filter/{main.c,io.c}.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::process::ExitCode;

fn filter_comments(input: impl Read, mut output: impl Write) -> io::Result<()> {
    let mut reader = BufReader::new(input);
    let mut buf = [0u8; 1];
    let mut newline = true;

    let mut next = |reader: &mut BufReader<_>| -> io::Result<Option<u8>> {
        match reader.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    };

    let mut ch = next(&mut reader)?;
    loop {
        if ch == Some(b'/') {
            let ch2 = next(&mut reader)?;
            if ch2 == Some(b'/') {
                let mut c = next(&mut reader)?;
                while let Some(b) = c {
                    if b == b'\n' {
                        break;
                    }
                    c = next(&mut reader)?;
                }
                if newline {
                    ch = next(&mut reader)?;
                    continue;
                }
                ch = c;
            } else {
                output.write_all(b"/")?;
                ch = ch2;
            }
        }

        let Some(b) = ch else { break };
        output.write_all(&[b])?;
        newline = b == b'\n';
        ch = next(&mut reader)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let input: Box<dyn Read> = match args.first() {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                eprintln!("Error: Input file \"{path}\" can not be open: {e}");
                return ExitCode::from(1);
            }
        },
        None => Box::new(io::stdin()),
    };

    let output: Box<dyn Write> = match args.get(1) {
        Some(path) => match File::create(path) {
            Ok(f) => Box::new(BufWriter::new(f)),
            Err(e) => {
                eprintln!("Error: Output file \"{path}\" can not be open: {e}");
                return ExitCode::from(1);
            }
        },
        None => Box::new(io::stdout()),
    };

    if let Err(e) = filter_comments(input, output) {
        eprintln!("Error occured while reading input file: {e}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> String {
        let mut out = Vec::new();
        filter_comments(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn strips_a_whole_comment_line() {
        assert_eq!(run("// a comment\ncode\n"), "code\n");
    }

    #[test]
    fn strips_a_trailing_comment_but_keeps_the_code() {
        assert_eq!(run("code // trailing\nmore\n"), "code \nmore\n");
    }

    #[test]
    fn a_single_slash_is_passed_through() {
        assert_eq!(run("a / b\n"), "a / b\n");
    }

    #[test]
    fn file_with_no_comments_is_unchanged() {
        assert_eq!(run("plain text\nwith lines\n"), "plain text\nwith lines\n");
    }
}
