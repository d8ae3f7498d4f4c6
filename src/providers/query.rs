//! Query building for the SQL provider
//!
//! Built-in queries are assembled from the filter fields that are present.
//! Workspace templates use named parameters (`:line_id`) which are rewritten
//! into dialect placeholders. Caller values are always bound, never spliced.

use super::dialect::SqlDialect;
use crate::domain::QueryFilter;
use crate::errors::{Result, SourceplaneError};

/// Template key for the equipment status query
pub const EQUIPMENT_STATUS_QUERY: &str = "equipment_status";
/// Template key for the measurement query
pub const MEASUREMENT_DATA_QUERY: &str = "measurement_data";

/// Parameter names a template may reference
pub const TEMPLATE_PARAMETERS: &[&str] =
    &["equipment_id", "line_id", "equipment_type", "status", "from", "to", "limit", "workspace_id"];

/// A value to bind, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(Option<String>),
    Int(i64),
}

/// SQL text plus its ordered bind values
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// Values available to templates
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub filter: &'a QueryFilter,
    pub workspace_id: &'a str,
    pub limit: u32,
}

impl TemplateContext<'_> {
    fn value_of(&self, name: &str) -> BindValue {
        match name {
            "limit" => BindValue::Int(i64::from(self.limit)),
            "workspace_id" => BindValue::Text(Some(self.workspace_id.to_string())),
            other => BindValue::Text(
                self.filter
                    .named_values()
                    .into_iter()
                    .find(|(n, _)| *n == other)
                    .and_then(|(_, v)| v.map(str::to_string)),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Param(String),
}

/// A parsed custom query template
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

impl QueryTemplate {
    /// Split a template into literal text and `:name` parameters.
    ///
    /// `::` casts and quoted text are left alone. Unknown names are rejected.
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' | '"' | '`' => {
                    text.push(c);
                    // Doubled quotes inside the literal close and reopen it
                    for inner in chars.by_ref() {
                        text.push(inner);
                        if inner == c {
                            break;
                        }
                    }
                }
                ':' if chars.peek() == Some(&':') => {
                    text.push_str("::");
                    chars.next();
                }
                ':' if chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                    let mut name = String::new();
                    while let Some(n) = chars.peek().copied() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if !TEMPLATE_PARAMETERS.contains(&name.as_str()) {
                        return Err(SourceplaneError::config(format!(
                            "Custom query references unknown parameter ':{}'",
                            name
                        )));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Param(name));
                }
                _ => text.push(c),
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { segments })
    }

    /// Whether the template binds `:limit` itself
    pub fn uses_limit(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(name) if name == "limit"))
    }

    pub fn render(&self, dialect: SqlDialect, ctx: &TemplateContext<'_>) -> BoundQuery {
        let mut sql = String::new();
        let mut binds = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(name) => {
                    binds.push(ctx.value_of(name));
                    sql.push_str(&dialect.placeholder(binds.len()));
                }
            }
        }
        BoundQuery { sql, binds }
    }
}

/// Shape of one built-in read
struct BuiltinTable {
    table: &'static str,
    text_columns: &'static [&'static str],
    float_columns: &'static [&'static str],
    timestamp_column: &'static str,
    filter_columns: &'static [&'static str],
    order_by: &'static str,
}

const EQUIPMENT_TABLE: BuiltinTable = BuiltinTable {
    table: "equipment_status",
    text_columns: &["equipment_id", "equipment_name", "equipment_type", "line_id", "status"],
    float_columns: &[],
    timestamp_column: "updated_at",
    filter_columns: &["equipment_id", "line_id", "equipment_type", "status"],
    order_by: "equipment_id",
};

const MEASUREMENT_TABLE: BuiltinTable = BuiltinTable {
    table: "measurement_data",
    text_columns: &["equipment_id", "line_id", "metric", "unit", "status"],
    float_columns: &["value", "usl", "lsl"],
    timestamp_column: "measured_at",
    filter_columns: &["equipment_id", "line_id", "status"],
    order_by: "measured_at",
};

/// Built-in reads: the row query and, for equipment, a matching count
pub struct BuiltinQueries {
    pub rows: BoundQuery,
    pub count: Option<BoundQuery>,
}

fn where_clause(
    dialect: SqlDialect,
    shape: &BuiltinTable,
    filter: &QueryFilter,
) -> (String, Vec<BindValue>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    for (name, value) in filter.named_values() {
        let Some(value) = value else { continue };
        if shape.filter_columns.contains(&name) {
            binds.push(BindValue::Text(Some(value.to_string())));
            conditions.push(format!(
                "{} = {}",
                dialect.quote_ident(name),
                dialect.placeholder(binds.len())
            ));
        }
    }

    let ts = dialect.quote_ident(shape.timestamp_column);
    if let Some(from) = &filter.from {
        binds.push(BindValue::Text(Some(from.clone())));
        conditions.push(format!(
            "{} >= {}",
            ts,
            dialect.timestamp_param(&dialect.placeholder(binds.len()))
        ));
    }
    if let Some(to) = &filter.to {
        binds.push(BindValue::Text(Some(to.clone())));
        conditions.push(format!(
            "{} <= {}",
            ts,
            dialect.timestamp_param(&dialect.placeholder(binds.len()))
        ));
    }

    if conditions.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), binds)
    }
}

fn select_list(dialect: SqlDialect, shape: &BuiltinTable) -> String {
    let mut columns: Vec<String> =
        shape.text_columns.iter().map(|c| dialect.quote_ident(c)).collect();
    for column in shape.float_columns {
        let quoted = dialect.quote_ident(column);
        columns.push(format!("{} AS {}", dialect.float_cast(&quoted), quoted));
    }
    let ts = dialect.quote_ident(shape.timestamp_column);
    columns.push(format!("{} AS {}", dialect.text_cast(&ts), ts));
    columns.join(", ")
}

/// Equipment status rows ordered by equipment id, plus the unpaged count
pub fn equipment_status_queries(
    dialect: SqlDialect,
    filter: &QueryFilter,
    limit: u32,
) -> BuiltinQueries {
    let shape = &EQUIPMENT_TABLE;
    let (where_sql, binds) = where_clause(dialect, shape, filter);
    let table = dialect.quote_ident(shape.table);

    BuiltinQueries {
        rows: BoundQuery {
            sql: format!(
                "SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
                select_list(dialect, shape),
                table,
                where_sql,
                dialect.quote_ident(shape.order_by),
                limit
            ),
            binds: binds.clone(),
        },
        count: Some(BoundQuery {
            sql: format!("SELECT COUNT(*) AS total FROM {}{}", table, where_sql),
            binds,
        }),
    }
}

/// Latest measurements first
pub fn measurement_queries(dialect: SqlDialect, filter: &QueryFilter, limit: u32) -> BuiltinQueries {
    let shape = &MEASUREMENT_TABLE;
    let (where_sql, binds) = where_clause(dialect, shape, filter);

    BuiltinQueries {
        rows: BoundQuery {
            sql: format!(
                "SELECT {} FROM {}{} ORDER BY {} DESC LIMIT {}",
                select_list(dialect, shape),
                dialect.quote_ident(shape.table),
                where_sql,
                dialect.quote_ident(shape.order_by),
                limit
            ),
            binds,
        },
        count: None,
    }
}
