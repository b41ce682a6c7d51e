//! Schema exploration and read-only query tools.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::DataSource;
use crate::error::Result;
use crate::guard::{format_rows, sanitize_rows, validate_query};
use crate::mcp::handler::{get_string_arg, ToolHandler};
use crate::mcp::protocol::Tool;
use crate::service::SynonymMap;
use crate::tool_schema;

const LIST_TABLES_SQL: &str = "SELECT name AS table_name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const TABLE_COLUMNS_SQL: &str = "SELECT name, type, \"notnull\" AS not_null, pk \
     FROM pragma_table_info(?1) ORDER BY cid";

const RELATIONSHIPS_SQL: &str = "SELECT m.name AS parent_table, f.id AS fk_id, \
     f.\"from\" AS parent_column, f.\"table\" AS referenced_table, f.\"to\" AS referenced_column \
     FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
     WHERE m.type = 'table' ORDER BY m.name, f.id, f.seq";

const EXAMPLE_QUERIES_SQL: &str = "SELECT question, sql_query FROM example_queries \
     WHERE priority = 1 ORDER BY id LIMIT 10";

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

/// List tables tool.
pub struct ListTablesTool {
    source: Arc<dyn DataSource>,
}

impl ListTablesTool {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ToolHandler for ListTablesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "list_tables".to_string(),
            description: "List every table available in the connected database. Use this to \
                learn the current schema or confirm a table exists before writing a query."
                .to_string(),
            input_schema: tool_schema! {},
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
        let rows = self.source.query(LIST_TABLES_SQL, &[]).await?;
        if rows.is_empty() {
            return Ok("No tables found in the database.".to_string());
        }

        let mut output = String::from("Tables in the database:\n\n");
        for row in &rows {
            let _ = writeln!(output, "- {}", text(row.get("table_name")));
        }
        Ok(output)
    }
}

/// Describe table tool.
pub struct DescribeTableTool {
    source: Arc<dyn DataSource>,
    synonyms: Arc<SynonymMap>,
}

impl DescribeTableTool {
    pub fn new(source: Arc<dyn DataSource>, synonyms: Arc<SynonymMap>) -> Self {
        Self { source, synonyms }
    }
}

#[async_trait]
impl ToolHandler for DescribeTableTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "describe_table".to_string(),
            description: "Describe the structure of a table: each column with its type and \
                nullability, plus the primary key columns. Business terms are mapped to real \
                table names through the synonym dictionary."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name (or a known synonym) to describe"
                    }
                },
                "required": ["table"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
        let requested = get_string_arg(&args, "table")?;
        let table = self.synonyms.resolve(requested.trim()).to_string();

        let columns = self
            .source
            .query(TABLE_COLUMNS_SQL, std::slice::from_ref(&table))
            .await?;
        if columns.is_empty() {
            return Ok(format!("Table \"{}\" was not found.", table));
        }

        let mut output = format!("Table \"{}\" structure:\n\nColumns:\n", table);
        let mut keys = Vec::new();
        for col in &columns {
            let name = text(col.get("name"));
            let declared = text(col.get("type"));
            let declared = if declared.is_empty() { "ANY".to_string() } else { declared };
            let is_key = col.get("pk").and_then(Value::as_i64).unwrap_or(0) > 0;
            // SQLite reports rowid keys as notnull = 0.
            let nullable = !is_key && col.get("not_null").and_then(Value::as_i64) == Some(0);
            let _ = writeln!(
                output,
                "- {} ({}){}",
                name,
                declared,
                if nullable { " [nullable]" } else { "" }
            );
            if is_key {
                keys.push(name);
            }
        }

        output.push_str("\nPrimary Keys:\n");
        if keys.is_empty() {
            output.push_str("None\n");
        } else {
            for key in keys {
                let _ = writeln!(output, "- {}", key);
            }
        }
        Ok(output)
    }
}

/// List relationships tool.
pub struct ListRelationshipsTool {
    source: Arc<dyn DataSource>,
}

impl ListRelationshipsTool {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ToolHandler for ListRelationshipsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "list_relationships".to_string(),
            description: "List every foreign key relationship between tables. Use this to build \
                correct JOINs across related tables."
                .to_string(),
            input_schema: tool_schema! {},
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
        let rows = self.source.query(RELATIONSHIPS_SQL, &[]).await?;
        if rows.is_empty() {
            return Ok("No foreign key relationships found in the database.".to_string());
        }

        let mut output = String::from("Foreign key relationships:\n\n");
        for rel in &rows {
            let parent = text(rel.get("parent_table"));
            let _ = writeln!(
                output,
                "- [fk_{}_{}]: {}.{} → {}.{}",
                parent,
                text(rel.get("fk_id")),
                parent,
                text(rel.get("parent_column")),
                text(rel.get("referenced_table")),
                text(rel.get("referenced_column")),
            );
        }
        Ok(output)
    }
}

/// Read data tool: the only tool that runs caller-supplied SQL.
pub struct ReadDataTool {
    source: Arc<dyn DataSource>,
}

impl ReadDataTool {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ToolHandler for ReadDataTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "read_data".to_string(),
            description: "Run a single read-only SELECT query and return the rows as a text \
                table. Data-modifying statements, multiple statements and obfuscation \
                constructs are refused with an explanation so the query can be corrected."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A single SELECT statement"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
        let query = get_string_arg(&args, "query")?;

        let validation = validate_query(&query);
        if !validation.is_valid {
            let reason = validation.error.unwrap_or_default();
            warn!(
                "Security validation failed for query: {} ({})",
                truncate(&query, 100),
                reason
            );
            crate::metrics::record_query_rejected();
            return Ok(format!("Security validation failed: {}", reason));
        }

        info!("Executing validated SELECT query: {}", truncate(&query, 200));
        let rows = self.source.query(&query, &[]).await?;
        let total = rows.len();
        let rows = sanitize_rows(rows);

        let mut output = format!(
            "Query executed successfully. Retrieved {} record(s)",
            rows.len()
        );
        if rows.len() != total {
            let _ = write!(output, " (limited from {} total records)", total);
        }
        output.push_str("\n\n");
        output.push_str(&format_rows(&rows));
        Ok(output)
    }
}

/// Example queries tool.
pub struct GetExampleQueriesTool {
    source: Arc<dyn DataSource>,
}

impl GetExampleQueriesTool {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ToolHandler for GetExampleQueriesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_example_queries".to_string(),
            description: "Return curated example questions with the SQL that answers them, \
                stored in the example_queries table. Useful context before writing a query."
                .to_string(),
            input_schema: tool_schema! {},
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
        let rows = self.source.query(EXAMPLE_QUERIES_SQL, &[]).await?;
        if rows.is_empty() {
            return Ok("No example queries available.".to_string());
        }

        let mut output = String::from("Example queries:\n");
        for (i, row) in rows.iter().enumerate() {
            let _ = write!(
                output,
                "\n{}. Query: {}\n   Description: {}\n",
                i + 1,
                text(row.get("sql_query")),
                text(row.get("question")),
            );
        }
        Ok(output)
    }
}

/// Synonym dictionary tool.
pub struct GetSynonymsTool {
    synonyms: Arc<SynonymMap>,
}

impl GetSynonymsTool {
    pub fn new(synonyms: Arc<SynonymMap>) -> Self {
        Self { synonyms }
    }
}

#[async_trait]
impl ToolHandler for GetSynonymsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_synonyms".to_string(),
            description: "Return the synonym dictionary mapping business terms to real table \
                and column names."
                .to_string(),
            input_schema: tool_schema! {},
        }
    }

    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
        self.synonyms.to_pretty_json()
    }
}
