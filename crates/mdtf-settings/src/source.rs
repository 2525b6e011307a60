//! Line indexing over original JSONC text for error reporting.

use std::path::{Path, PathBuf};

/// A single settings file with line indexing.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Original text, before comment stripping
    pub source: String,
    /// Byte offsets of each line start
    ///
    /// line_starts[0] is always 0 (start of file).
    /// line_starts.len() == number of lines + 1 (includes EOF sentinel).
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = compute_line_starts(&source);
        Self {
            path: path.into(),
            source,
            line_starts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get (line, column) for a byte offset. Both are 1-based.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.source.len());
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx.min(self.line_starts.len().saturating_sub(2)),
            Err(idx) => idx.max(1) - 1,
        };
        (line_idx + 1, offset - self.line_starts[line_idx] + 1)
    }

    /// Text of a 1-based line without its terminator.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        if line == 0 || line >= self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line - 1];
        let end = self.line_starts[line];
        Some(self.source[start..end].trim_end_matches(['\n', '\r']))
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len() - 1
    }

    /// Render the offending line with a caret under `column`.
    ///
    /// ```text
    ///   12 |     "FIRSTYR": 1990,,
    ///      |                     ^
    /// ```
    pub fn snippet(&self, line: usize, column: usize) -> String {
        let Some(text) = self.line_text(line) else {
            return String::new();
        };
        let gutter = line.to_string();
        let pad = " ".repeat(gutter.len());
        let caret_pad: String = text
            .chars()
            .take(column.saturating_sub(1))
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        format!("  {gutter} | {text}\n  {pad} | {caret_pad}^")
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(
        source
            .bytes()
            .enumerate()
            .filter(|&(_, b)| b == b'\n')
            .map(|(i, _)| i + 1),
    );
    if starts.last() != Some(&source.len()) {
        starts.push(source.len());
    }
    starts
}
