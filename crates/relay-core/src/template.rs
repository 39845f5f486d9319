//! Message templates.
//!
//! Human-readable text comes from a key-path-addressable catalog of format
//! strings (`telegram.commands.start.welcome`, ...). Templates use `{name}`
//! placeholders; `{{` and `}}` produce literal braces.

use serde_json::Value;
use std::path::Path;
use tracing::{error, info};

/// Default catalog file.
pub const MESSAGES_FILE: &str = "messages.json";

/// Template variables, as `(name, value)` pairs.
pub type Vars<'a> = [(&'a str, String)];

/// Rendering capability.
pub trait Render: Send + Sync {
    /// Look up the raw template at `path`.
    ///
    /// Returns `None` if any segment is missing or the node is not a
    /// non-empty string.
    fn lookup(&self, path: &[&str]) -> Option<String>;

    /// Render the template at `path`, or an empty string if it does not resolve.
    fn render(&self, path: &[&str], vars: &Vars<'_>) -> String {
        self.render_or(path, "", vars)
    }

    /// Render the template at `path`, or `default` if it does not resolve.
    fn render_or(&self, path: &[&str], default: &str, vars: &Vars<'_>) -> String {
        let template = self.lookup(path);
        format_placeholders(template.as_deref().unwrap_or(default), vars)
    }
}

/// In-memory template catalog backed by a JSON tree.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    root: Value,
}

impl MessageCatalog {
    /// Create an empty catalog; every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a catalog from a parsed JSON tree.
    #[must_use]
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Parse a catalog from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(serde_json::from_str(text)?))
    }

    /// Load a catalog file.
    ///
    /// A missing or invalid file is logged and yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| Self::from_json_str(&text).map_err(|e| e.to_string()));

        match parsed {
            Ok(catalog) => {
                info!(path = %path.display(), "Message catalog loaded");
                catalog
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load message catalog");
                Self::empty()
            }
        }
    }
}

impl Render for MessageCatalog {
    fn lookup(&self, path: &[&str]) -> Option<String> {
        let mut node = &self.root;
        for key in path {
            node = node.as_object()?.get(*key)?;
        }

        match node {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// Replace `{name}` placeholders with their values.
///
/// Placeholders without a value are left as written.
#[must_use]
pub fn format_placeholders(template: &str, vars: &Vars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                let is_ident =
                    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
                if is_ident {
                    if let Some((_, value)) = vars.iter().find(|(key, _)| *key == name) {
                        out.push_str(value);
                        rest = &tail[end + 1..];
                        continue;
                    }
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

/// Truncate to at most `max_chars` characters.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
