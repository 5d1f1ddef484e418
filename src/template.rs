//! Placeholder substitution for site templates.
//!
//! Template files mark values with `{{NAME}}` (whitespace inside the braces
//! is allowed). [`render`] replaces every marker whose name is known and
//! leaves the rest untouched so [`find_unresolved`] can report them; an
//! unresolved marker must never slip silently into a production config.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Z][A-Z0-9_]*)\s*\}\}").expect("valid regex"))
}

/// Named values available to templates.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// A marker left in a file after rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub file: PathBuf,
    pub line: usize,
    pub marker: String,
}

pub fn render(content: &str, values: &Placeholders) -> String {
    marker_regex()
        .replace_all(content, |caps: &Captures| match values.get(&caps[1]) {
            Some(v) => v.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// `(line number, marker)` for every marker in `content`, 1-based lines.
pub fn find_unresolved(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .flat_map(|(i, line)| {
            marker_regex()
                .find_iter(line)
                .map(move |m| (i + 1, m.as_str().to_string()))
        })
        .collect()
}

/// Render `path` in place and return the markers that remain. Each one is
/// logged as a warning.
pub fn render_file(path: &Path, values: &Placeholders) -> Result<Vec<Unresolved>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template: {}", path.display()))?;
    let rendered = render(&content, values);
    if rendered != content {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write rendered file: {}", path.display()))?;
    }

    let unresolved: Vec<Unresolved> = find_unresolved(&rendered)
        .into_iter()
        .map(|(line, marker)| Unresolved {
            file: path.to_path_buf(),
            line,
            marker,
        })
        .collect();
    for u in &unresolved {
        tracing::warn!(
            file = %u.file.display(),
            line = u.line,
            marker = %u.marker,
            "unresolved placeholder"
        );
    }
    Ok(unresolved)
}
