//! Source location tracking for diagnostics and backtraces.
//!
//! Spans are byte ranges into a single module's source text. Each module
//! carries its own [`SourceInfo`] with a precomputed line-start table, so a
//! span can be resolved to a 1-based line/column pair without rescanning.

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Byte range in a module's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Zero-length span at the start of a module.
    pub fn zero() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Span covering both `self` and `other`.
    pub fn merge(&self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Per-module source metadata: path plus a line-start index.
#[derive(Debug)]
pub struct SourceInfo {
    path: PathBuf,
    line_starts: Vec<u32>,
}

impl SourceInfo {
    pub fn new(path: PathBuf, source: &str) -> Rc<Self> {
        Rc::new(Self {
            path,
            line_starts: compute_line_starts(source),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a byte offset to a 1-based (line, column) pair.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        let line = (line_idx + 1) as u32;
        let col = offset - self.line_starts[line_idx] + 1;
        (line, col)
    }

    /// Render a span as `path:line:col`.
    pub fn position(&self, span: Span) -> Position {
        let (line, col) = self.line_col(span.start);
        Position {
            path: self.path.clone(),
            line,
            col,
        }
    }
}

/// Fully resolved source position, as shown in error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub path: PathBuf,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.col)
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0];
    for (idx, ch) in source.char_indices() {
        if ch == '\n' {
            starts.push((idx + 1) as u32);
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let info = SourceInfo::new(PathBuf::from("m.pconf"), "a = 1\nbb = 2\n");
        assert_eq!(info.line_col(0), (1, 1));
        assert_eq!(info.line_col(4), (1, 5));
        assert_eq!(info.line_col(6), (2, 1));
        assert_eq!(info.line_col(11), (2, 6));
    }

    #[test]
    fn test_position_display() {
        let info = SourceInfo::new(PathBuf::from("dir/m.pconf"), "x = 1");
        let pos = info.position(Span::new(4, 5));
        assert_eq!(pos.to_string(), "dir/m.pconf:1:5");
    }

    #[test]
    fn test_merge() {
        let a = Span::new(3, 7);
        let b = Span::new(5, 12);
        assert_eq!(a.merge(b), Span::new(3, 12));
    }
}
