//! JSON with comments.
//!
//! Comments are blanked out rather than removed: every comment byte becomes
//! a space and newlines are kept, so a byte offset, line or column reported
//! by the JSON parser points at the same place in the original file.
//! Trailing commas are not accepted.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SettingsError};
use crate::source::SourceFile;
use crate::subst::{EnvSnapshot, substitute};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    String,
    StringEscape,
    LineComment,
    BlockComment,
}

/// Blank out `//` and `/* */` comments outside string literals.
pub fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match (b, next) {
                (b'"', _) => {
                    state = State::String;
                    out.push(b);
                }
                (b'/', Some(b'/')) => {
                    state = State::LineComment;
                    out.extend_from_slice(b"  ");
                    i += 1;
                }
                (b'/', Some(b'*')) => {
                    state = State::BlockComment;
                    out.extend_from_slice(b"  ");
                    i += 1;
                }
                _ => out.push(b),
            },
            State::String => {
                match b {
                    b'\\' => state = State::StringEscape,
                    b'"' => state = State::Code,
                    _ => {}
                }
                out.push(b);
            }
            State::StringEscape => {
                state = State::String;
                out.push(b);
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b);
                } else if b == b'\r' {
                    out.push(b);
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else if b == b'\n' || b == b'\r' {
                    out.push(b);
                } else {
                    out.push(b' ');
                }
            }
        }
        i += 1;
    }

    // Comment delimiters are ASCII, so multi-byte characters are either
    // copied whole or blanked whole.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Parse JSONC text into a JSON value, reporting syntax errors against the
/// original text.
pub fn parse_value(path: &Path, text: &str) -> Result<Value> {
    let stripped = strip_comments(text);
    serde_json::from_str(&stripped).map_err(|e| {
        let file = SourceFile::new(path, text);
        let (line, column) = (e.line(), e.column());
        SettingsError::Syntax {
            path: path.to_path_buf(),
            line,
            column,
            message: strip_position(&e.to_string()),
            snippet: file.snippet(line, column),
        }
    })
}

/// Parse JSONC text, substitute `${NAME}` references from `env`, and
/// deserialize into `T`.
pub fn parse<T: DeserializeOwned>(path: &Path, text: &str, env: &EnvSnapshot) -> Result<T> {
    let mut value = parse_value(path, text)?;
    substitute(&mut value, env, path)?;
    serde_json::from_value(value).map_err(|e| SettingsError::schema(path, e.to_string()))
}

/// Read and parse a JSONC file.
pub fn load<T: DeserializeOwned>(path: &Path, env: &EnvSnapshot) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &text, env)
}

// serde_json appends " at line L column C"; the error carries those already.
fn strip_position(message: &str) -> String {
    match message.rfind(" at line ") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
