//! `${NAME}` substitution in string values.
//!
//! Reads from an [`EnvSnapshot`] taken once at startup; the process
//! environment is never written.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{Result, SettingsError};

/// Immutable copy of the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Substitute every string value in `value` in place.
pub fn substitute(value: &mut Value, env: &EnvSnapshot, file: &Path) -> Result<()> {
    walk(value, env, file, &mut String::from("$"))
}

fn walk(value: &mut Value, env: &EnvSnapshot, file: &Path, json_path: &mut String) -> Result<()> {
    match value {
        Value::String(s) => {
            if s.contains('$') {
                *s = expand(s, env, file, json_path)?;
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let len = json_path.len();
                json_path.push_str(&format!("[{i}]"));
                walk(item, env, file, json_path)?;
                json_path.truncate(len);
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                let len = json_path.len();
                json_path.push('.');
                json_path.push_str(key);
                walk(item, env, file, json_path)?;
                json_path.truncate(len);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Expand `${NAME}` and `$$` in one string. A `$` followed by anything else
/// is kept literally.
pub fn expand(text: &str, env: &EnvSnapshot, file: &Path, json_path: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(after) = tail.strip_prefix("$$") {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix("${") {
            let end = body.find('}').ok_or_else(|| {
                SettingsError::schema(
                    file,
                    format!("unterminated '${{' in {json_path}: \"{text}\""),
                )
            })?;
            let name = &body[..end];
            let resolved = env
                .get(name)
                .ok_or_else(|| SettingsError::UnresolvedVariable {
                    path: file.to_path_buf(),
                    name: name.to_string(),
                    json_path: json_path.to_string(),
                })?;
            out.push_str(resolved);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> EnvSnapshot {
        EnvSnapshot::from_pairs([("MODEL_ROOT", "/data/models"), ("USER", "mdtf")])
    }

    #[test]
    fn expands_nested_values() {
        let mut value = json!({
            "case_list": [{"root": "${MODEL_ROOT}/CM4"}],
            "note": "cost $$5 for $USER"
        });
        substitute(&mut value, &env(), Path::new("cfg.jsonc")).unwrap();
        assert_eq!(value["case_list"][0]["root"], "/data/models/CM4");
        assert_eq!(value["note"], "cost $5 for $USER");
    }

    #[test]
    fn unresolved_name_reports_json_path() {
        let mut value = json!({"paths": {"OBS_DATA": "${OBS_ROOT}/obs"}});
        let err = substitute(&mut value, &env(), Path::new("cfg.jsonc")).unwrap_err();
        match err {
            SettingsError::UnresolvedVariable { name, json_path, .. } => {
                assert_eq!(name, "OBS_ROOT");
                assert_eq!(json_path, "$.paths.OBS_DATA");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
