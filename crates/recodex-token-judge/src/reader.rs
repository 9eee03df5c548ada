//! Tokenizing reader over a memory-mapped file (spec.md §4.11): splits the
//! input into lines, each a sequence of whitespace-delimited tokens,
//! honoring the empty-line/comment/line-ending flags.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

/// A single token's location in the mapped file, cheap to copy and reused
/// across the judge's buffered line comparisons.
#[derive(Debug, Clone, Copy)]
pub struct TokenRef {
    pub offset: u32,
    pub length: u32,
    pub line_number: u32,
    pub char_number: u32,
}

/// One line's worth of tokens. Token text is fetched back from the
/// [`Reader`] that produced it, mirroring the original `Line` holding a
/// reference to its parent reader rather than copying token bytes.
#[derive(Debug, Default)]
pub struct Line {
    line_number: u32,
    tokens: Vec<TokenRef>,
    raw_offset: usize,
    raw_length: usize,
}

impl Line {
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn size(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, idx: usize) -> &TokenRef {
        &self.tokens[idx]
    }

    pub fn raw_offset(&self) -> usize {
        self.raw_offset
    }

    pub fn raw_length(&self) -> usize {
        self.raw_length
    }
}

/// Memory-maps `path` and parses it on demand, one [`Line`] at a time.
pub struct Reader {
    mmap: Mmap,
    ignore_empty_lines: bool,
    allow_comments: bool,
    ignore_line_ends: bool,
    length: usize,
    offset: usize,
    line_number: u32,
    line_offset: usize,
}

impl Reader {
    pub fn open(
        path: &Path,
        ignore_empty_lines: bool,
        allow_comments: bool,
        ignore_line_ends: bool,
        ignore_trailing_whitespace: bool,
    ) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;
        let mut length = mmap.len();
        if ignore_trailing_whitespace {
            while length > 0 && is_space(mmap[length - 1]) {
                length -= 1;
            }
        }
        Ok(Self {
            mmap,
            ignore_empty_lines,
            allow_comments,
            ignore_line_ends,
            length,
            offset: 0,
            line_number: 1,
            line_offset: 0,
        })
    }

    pub fn eof(&self) -> bool {
        self.offset >= self.length
    }

    fn data(&self) -> &[u8] {
        &self.mmap[..self.length]
    }

    pub fn token_bytes(&self, token: &TokenRef) -> &[u8] {
        let start = token.offset as usize;
        &self.data()[start..start + token.length as usize]
    }

    pub fn raw_line_bytes(&self, line: &Line) -> &[u8] {
        &self.data()[line.raw_offset..line.raw_offset + line.raw_length]
    }

    fn eol(&self) -> bool {
        !self.eof() && self.data()[self.offset] == b'\n'
    }

    fn skip_whitespace(&mut self) {
        while !self.eof() && !self.eol() && is_space(self.data()[self.offset]) {
            self.offset += 1;
        }
    }

    fn skip_token(&mut self) {
        while !self.eof() && !is_space(self.data()[self.offset]) {
            self.offset += 1;
        }
    }

    fn skip_rest_of_line(&mut self) {
        while !self.eof() && !self.eol() {
            self.offset += 1;
        }
        if !self.eof() {
            self.offset += 1;
        }
        self.line_number += 1;
        self.line_offset = self.offset;
    }

    fn is_comment_start(&self) -> bool {
        self.allow_comments && !self.eof() && self.data()[self.offset] == b'#'
    }

    fn is_token_start(&self) -> bool {
        !self.eof() && !is_space(self.data()[self.offset]) && !self.is_comment_start()
    }

    /// Parses one line of tokens; if `ignore_line_ends`, the whole file is
    /// a single logical line.
    pub fn read_line(&mut self) -> Option<Line> {
        if self.eof() {
            return None;
        }

        let mut line = Line {
            line_number: self.line_number,
            tokens: Vec::new(),
            raw_offset: self.offset,
            raw_length: 0,
        };

        while !self.eof() {
            self.skip_whitespace();

            if self.is_token_start() {
                let start = self.offset;
                self.skip_token();
                line.tokens.push(TokenRef {
                    offset: start as u32,
                    length: (self.offset - start) as u32,
                    line_number: self.line_number,
                    char_number: (start - self.line_offset + 1) as u32,
                });
                continue;
            }

            let comment = self.is_comment_start();
            self.skip_rest_of_line();
            if self.ignore_line_ends {
                continue;
            }
            if !line.tokens.is_empty() || (!self.ignore_empty_lines && !comment) {
                break;
            }

            // Skipped an empty or comment-only line; restart the raw span here.
            line.line_number = self.line_number;
            line.raw_offset = self.offset;
        }

        if line.tokens.is_empty() && self.ignore_empty_lines {
            return None;
        }

        line.raw_length = match line.tokens.last() {
            Some(last) => (last.char_number + last.length - 1) as usize,
            None => 0,
        };
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn reader_over(contents: &str, ignore_empty_lines: bool, allow_comments: bool) -> (Reader, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let reader = Reader::open(file.path(), ignore_empty_lines, allow_comments, false, false).unwrap();
        (reader, file)
    }

    #[test]
    fn splits_lines_into_whitespace_delimited_tokens() {
        let (mut reader, _file) = reader_over("foo bar\nbaz\n", false, false);
        let first = reader.read_line().unwrap();
        assert_eq!(first.size(), 2);
        assert_eq!(reader.token_bytes(first.token(0)), b"foo");
        assert_eq!(reader.token_bytes(first.token(1)), b"bar");

        let second = reader.read_line().unwrap();
        assert_eq!(second.size(), 1);
        assert!(reader.read_line().is_none());
    }

    #[test]
    fn ignores_empty_lines_when_requested() {
        let (mut reader, _file) = reader_over("a\n\n\nb\n", true, false);
        let first = reader.read_line().unwrap();
        assert_eq!(reader.token_bytes(first.token(0)), b"a");
        let second = reader.read_line().unwrap();
        assert_eq!(reader.token_bytes(second.token(0)), b"b");
        assert!(reader.read_line().is_none());
    }

    #[test]
    fn skips_comment_lines_when_allowed() {
        let (mut reader, _file) = reader_over("# a comment\nreal line\n", true, true);
        let line = reader.read_line().unwrap();
        assert_eq!(reader.token_bytes(line.token(0)), b"real");
    }
}
