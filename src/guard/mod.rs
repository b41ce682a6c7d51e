//! Static validation and result sanitation for the read-only query tool.
//!
//! The validator is a denylist heuristic, not a SQL parser. It accepts a single
//! statement starting with `SELECT` and rejects anything containing a
//! mutating/administrative keyword as a standalone token, or one of a fixed set
//! of structural attack patterns (statement chaining, UNION smuggling,
//! comment smuggling, dynamic execution, procedure prefixes, external data
//! sources, system introspection, time delays, char-code obfuscation).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::db::Row;

/// Longest query text accepted, in characters.
pub const MAX_QUERY_LENGTH: usize = 10_000;

/// Most rows returned to the caller; the remainder is discarded.
pub const MAX_RESULT_ROWS: usize = 10_000;

/// Keywords denied anywhere in the comment-stripped query.
pub const DENIED_KEYWORDS: &[&str] = &[
    "DELETE", "DROP", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "EXEC", "EXECUTE",
    "MERGE", "REPLACE", "GRANT", "REVOKE", "COMMIT", "ROLLBACK", "TRANSACTION", "BEGIN",
    "DECLARE", "SET", "USE", "BACKUP", "RESTORE", "KILL", "SHUTDOWN", "WAITFOR", "OPENROWSET",
    "OPENDATASOURCE", "OPENQUERY", "OPENXML", "BULK",
];

const MSG_EMPTY: &str = "Query must be a non-empty string";
const MSG_EMPTY_AFTER_COMMENTS: &str = "Query cannot be empty after removing comments";
const MSG_NOT_SELECT: &str = "Query must start with SELECT for security reasons";
const MSG_PATTERN: &str =
    "Potentially malicious SQL pattern detected. Only simple SELECT queries are allowed.";
const MSG_MULTIPLE: &str =
    "Multiple SQL statements are not allowed. Use only a single SELECT statement.";
const MSG_CHAR_FUNCTIONS: &str =
    "Character conversion functions are not allowed as they may be used for obfuscation.";
const MSG_TOO_LONG: &str = "Query is too long. Maximum allowed length is 10,000 characters.";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static KEYWORD_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DENIED_KEYWORDS
        .iter()
        .map(|kw| {
            let re = Regex::new(&format!(r"(?i)(?:^|[^A-Za-z0-9_]){kw}(?:$|[^A-Za-z0-9_])"))
                .expect("valid regex");
            (*kw, re)
        })
        .collect()
});

/// Structural attack patterns, checked against the query with line comments removed.
static ATTACK_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    const MUTATING: &str = "DELETE|DROP|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE";
    let patterns = [
        (
            "statement chaining",
            r"(?i);\s*(DELETE|DROP|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|MERGE|REPLACE|GRANT|REVOKE)".to_string(),
        ),
        (
            "union smuggling",
            format!(r"(?i)UNION\s+(?:ALL\s+)?SELECT.*?({MUTATING})"),
        ),
        (
            "comment smuggling",
            format!(r"(?i)/\*.*?({MUTATING}).*?\*/"),
        ),
        ("dynamic execution", r"(?i)EXEC\s*\(".to_string()),
        ("dynamic execution", r"(?i)EXECUTE\s*\(".to_string()),
        ("stored procedure", r"(?i)sp_".to_string()),
        ("extended procedure", r"(?i)xp_".to_string()),
        ("bulk load", r"(?i)BULK\s+INSERT".to_string()),
        ("external data source", r"(?i)OPENROWSET".to_string()),
        ("external data source", r"(?i)OPENDATASOURCE".to_string()),
        ("system variable", r"@@".to_string()),
        ("system introspection", r"(?i)SYSTEM_USER".to_string()),
        ("system introspection", r"(?i)USER_NAME".to_string()),
        ("system introspection", r"(?i)DB_NAME".to_string()),
        ("system introspection", r"(?i)HOST_NAME".to_string()),
        ("time delay", r"(?i)WAITFOR\s+DELAY".to_string()),
        ("time delay", r"(?i)WAITFOR\s+TIME".to_string()),
        ("statement chaining", r";\s*\w".to_string()),
        ("char obfuscation", r"(?i)\+\s*CHAR\s*\(".to_string()),
        ("char obfuscation", r"(?i)\+\s*NCHAR\s*\(".to_string()),
        ("char obfuscation", r"(?i)\+\s*ASCII\s*\(".to_string()),
    ];
    patterns
        .into_iter()
        .map(|(category, pattern)| (category, Regex::new(&pattern).expect("valid regex")))
        .collect()
});

/// Outcome of [`validate_query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Which comment forms [`strip_comments`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strip {
    LineOnly,
    All,
}

/// Replace comments with a space.
///
/// Quoted text (`'..'`, `".."`, `[..]`) is copied through untouched, so a
/// comment marker inside a literal never hides what follows it. An
/// unterminated quote or block comment runs to the end of the input.
fn strip_comments(query: &str, strip: Strip) -> String {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;

    while let Some(c) = rest.chars().next() {
        let close = match c {
            '\'' => Some('\''),
            '"' => Some('"'),
            '[' => Some(']'),
            _ => None,
        };

        if let Some(close) = close {
            let end = rest[1..].find(close).map_or(rest.len(), |i| i + 2);
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else if rest.starts_with("--") {
            out.push(' ');
            rest = &rest[rest.find('\n').unwrap_or(rest.len())..];
        } else if rest.starts_with("/*") {
            match rest[2..].find("*/") {
                Some(i) if strip == Strip::All => {
                    out.push(' ');
                    rest = &rest[i + 4..];
                }
                Some(i) => {
                    out.push_str(&rest[..i + 4]);
                    rest = &rest[i + 4..];
                }
                None => {
                    out.push_str(rest);
                    rest = "";
                }
            }
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Strip comments, collapse whitespace and trim.
///
/// Comments are replaced by a space so they keep acting as token separators.
pub fn normalize_query(query: &str) -> String {
    let uncommented = strip_comments(query, Strip::All);
    WHITESPACE
        .replace_all(&uncommented, " ")
        .trim()
        .to_string()
}

/// Statically check that `query` is a single read-only SELECT.
pub fn validate_query(query: &str) -> ValidationResult {
    if query.chars().count() > MAX_QUERY_LENGTH {
        return ValidationResult::invalid(MSG_TOO_LONG);
    }
    if query.trim().is_empty() {
        return ValidationResult::invalid(MSG_EMPTY);
    }

    let clean = normalize_query(query);
    if clean.is_empty() {
        return ValidationResult::invalid(MSG_EMPTY_AFTER_COMMENTS);
    }

    let upper = clean.to_uppercase();
    if !upper.starts_with("SELECT") {
        return ValidationResult::invalid(MSG_NOT_SELECT);
    }

    for (keyword, pattern) in KEYWORD_PATTERNS.iter() {
        if pattern.is_match(&upper) {
            return ValidationResult::invalid(format!(
                "Dangerous keyword '{}' detected in query. Only SELECT operations are allowed.",
                keyword
            ));
        }
    }

    // Line comments are inert; block comments stay visible to the patterns
    // because some engines execute hinted block comments.
    let uncommented = strip_comments(query, Strip::LineOnly);
    for (category, pattern) in ATTACK_PATTERNS.iter() {
        if pattern.is_match(&uncommented) {
            debug!("Query rejected by {} pattern", category);
            return ValidationResult::invalid(MSG_PATTERN);
        }
    }

    let statements = clean
        .split(';')
        .filter(|stmt| !stmt.trim().is_empty())
        .count();
    if statements > 1 {
        return ValidationResult::invalid(MSG_MULTIPLE);
    }

    if query.contains("CHAR(") || query.contains("NCHAR(") || query.contains("ASCII(") {
        return ValidationResult::invalid(MSG_CHAR_FUNCTIONS);
    }

    ValidationResult::valid()
}

fn is_safe_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c.is_whitespace()
}

/// Strip characters outside the safe set from a field name.
pub fn sanitize_field_name(name: &str) -> String {
    name.chars().filter(|c| is_safe_field_char(*c)).collect()
}

/// Cap the row count and rewrite unsafe field names.
///
/// A rewritten name that is empty or collides with another field gets a
/// numeric suffix, so no field is ever dropped.
pub fn sanitize_rows(rows: Vec<Row>) -> Vec<Row> {
    let total = rows.len();
    if total > MAX_RESULT_ROWS {
        warn!(
            "Query returned {} records, limiting to {}",
            total, MAX_RESULT_ROWS
        );
    }

    rows.into_iter()
        .take(MAX_RESULT_ROWS)
        .map(sanitize_row)
        .collect()
}

fn sanitize_row(row: Row) -> Row {
    if row.keys().all(|k| k.chars().all(is_safe_field_char) && !k.is_empty()) {
        return row;
    }

    let original: HashSet<String> = row.keys().cloned().collect();
    let mut sanitized = Map::with_capacity(row.len());
    for (key, value) in row {
        let mut name = sanitize_field_name(&key);
        if name != key || name.is_empty() {
            let base = if name.is_empty() { "column".to_string() } else { name.clone() };
            let mut n = 1;
            while name.is_empty() || sanitized.contains_key(&name) || original.contains(&name) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            warn!("Column name sanitized: {} -> {}", key, name);
        }
        sanitized.insert(name, value);
    }
    sanitized
}

/// Render a value as table cell text.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render rows as a fixed-width, `|`-separated text table.
pub fn format_rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "No records found.".to_string();
    };

    let columns: Vec<&String> = first.keys().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell_text(row.get(*c))).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain([col.chars().count(), 3])
                .max()
                .unwrap_or(3)
        })
        .collect();

    let render = |values: Vec<String>| -> String {
        let line = values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = w))
            .collect::<Vec<_>>()
            .join(" | ");
        line.trim_end().to_string()
    };

    let mut output = String::new();
    output.push_str(&render(columns.iter().map(|c| c.to_string()).collect()));
    output.push('\n');
    output.push_str(&render(widths.iter().map(|w| "-".repeat(*w)).collect()));
    output.push('\n');
    for row in cells {
        output.push_str(&render(row));
        output.push('\n');
    }
    output
}
