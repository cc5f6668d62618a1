//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use stashdb_core::{wire, Document, Loaded, Value};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print one document
    pub fn print_document(&self, doc: &Document) {
        match self.format {
            OutputFormat::Human => {
                let id = doc
                    .id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(none)".to_string());
                println!("ID: {}", id);
                for line in describe_fields(doc, 1) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => println!("{}", wire::to_string_pretty(doc)),
            OutputFormat::Quiet => {
                if let Some(id) = doc.id() {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a load result, keeping its cardinality visible
    pub fn print_loaded(&self, loaded: &Loaded) {
        match (self.format, loaded) {
            (OutputFormat::Human, Loaded::None) => println!("No documents found."),
            (OutputFormat::Json, Loaded::None) => println!("null"),
            (OutputFormat::Quiet, Loaded::None) => {}
            (_, Loaded::One(doc)) => self.print_document(doc),
            (OutputFormat::Human, Loaded::Many(docs)) => {
                for (i, doc) in docs.iter().enumerate() {
                    if i > 0 {
                        println!();
                    }
                    self.print_document(doc);
                }
                println!("\n{} document(s)", docs.len());
            }
            (OutputFormat::Json, Loaded::Many(docs)) => {
                let list: Vec<_> = docs.iter().map(wire::to_json).collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
                );
            }
            (OutputFormat::Quiet, Loaded::Many(docs)) => {
                for doc in docs {
                    self.print_document(doc);
                }
            }
        }
    }

    /// Print a list of distinct values
    pub fn print_values(&self, values: &[Value]) {
        match self.format {
            OutputFormat::Human => {
                if values.is_empty() {
                    println!("No values found.");
                    return;
                }
                for value in values {
                    println!("{}", value);
                }
                println!("\n{} value(s)", values.len());
            }
            OutputFormat::Json => {
                let list: Vec<_> = values.iter().map(wire::value_to_json).collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Quiet => {
                for value in values {
                    match value {
                        Value::String(s) => println!("{}", s),
                        other => println!("{}", other),
                    }
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One line per field, nested documents indented
///
/// `_id` is printed separately by the caller and skipped here.
fn describe_fields(doc: &Document, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();
    for (key, value) in doc {
        if depth == 1 && key == stashdb_core::fields::ID {
            continue;
        }
        match value {
            Value::Document(inner) => {
                lines.push(format!("{}{}:", indent, key));
                lines.extend(describe_fields(inner, depth + 1));
            }
            Value::String(s) => lines.push(format!("{}{}: {}", indent, key, truncate(s, 60))),
            Value::List(items) if items.iter().all(|v| matches!(v, Value::Blob(_))) => {
                lines.push(format!("{}{}: {} blob(s)", indent, key, items.len()));
            }
            other => lines.push(format!("{}{}: {}", indent, key, other)),
        }
    }
    lines
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::{doc, BlobHandle, NdArray};

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }

    #[test]
    fn test_describe_fields() {
        let handle = BlobHandle::new();
        let mut d = doc! {
            "item" => "A",
            "jpg" => doc! { "data" => handle },
            "m" => NdArray::from_vec(vec![1.0f64, 2.0, 3.0]),
        };
        d.set_np_object_ids(&[handle]);

        let lines = describe_fields(&d, 1);
        assert_eq!(
            lines,
            vec![
                "  _npObjectIDs: 1 blob(s)".to_string(),
                "  item: A".to_string(),
                "  jpg:".to_string(),
                format!("    data: blob({})", handle),
                "  m: array<f64>[3]".to_string(),
            ]
        );
    }
}
