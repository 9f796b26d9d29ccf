use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEngineers {
        engineers: Vec<Engineer>,
    },
    /// Tasks with an engineer are inserted (and reshuffled); the rest go to
    /// the unassigned pool.
    InsertTasks {
        tasks: Vec<Task>,
        returning: bool,
    },
    Relocate {
        request: RelocationRequest,
        /// `RETURNING`: answer with the moved task and every shifted neighbour.
        returning: bool,
    },
    DeleteTask {
        id: String,
    },
    SelectTasks {
        filter: TaskFilter,
    },
    SelectEngineers,
    SelectConflicts {
        engineer_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Id(String),
    Engineer(String),
    /// `WHERE engineer_id IS NULL`
    Unassigned,
}

const ENGINEER_COLUMNS: &[&str] = &["id", "name", "specialization", "region"];
const TASK_COLUMNS: &[&str] = &[
    "id",
    "engineer_id",
    "priority",
    "start",
    "end",
    "status",
    "title",
    "customer_id",
    "location_id",
    "timezone",
    "country",
    "description",
];
const RELOCATION_COLUMNS: &[&str] = &["task_id", "start", "end", "engineer_id", "timezone", "country"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// One VALUES row addressed by column name.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string(self.required(column)?)
    }

    fn string_or_null(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map_or(Ok(None), parse_string_or_null)
    }

    fn timestamp(&self, column: &'static str) -> Result<Ms, SqlError> {
        parse_timestamp(self.required(column)?)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, known): (&'static str, &[&str]) = match table.as_str() {
        "engineers" => ("engineers", ENGINEER_COLUMNS),
        "tasks" => ("tasks", TASK_COLUMNS),
        "relocations" => ("relocations", RELOCATION_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        known.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(bad) = columns.iter().find(|c| !known.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(bad.clone()));
    }

    let rows = extract_all_insert_rows(insert)?;
    for row in &rows {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), row.len()));
        }
    }
    let returning = insert.returning.is_some();
    let rows = rows.iter().map(|values| Row {
        columns: &columns,
        values,
    });

    match table {
        "engineers" => {
            let engineers = rows.map(|row| parse_engineer(&row)).collect::<Result<_, _>>()?;
            Ok(Command::InsertEngineers { engineers })
        }
        "tasks" => {
            let tasks = rows.map(|row| parse_task(&row)).collect::<Result<_, _>>()?;
            Ok(Command::InsertTasks { tasks, returning })
        }
        _ => {
            let mut rows = rows;
            let (Some(row), None) = (rows.next(), rows.next()) else {
                return Err(SqlError::Unsupported("relocations take exactly one row".into()));
            };
            Ok(Command::Relocate {
                request: parse_relocation(&row)?,
                returning,
            })
        }
    }
}

fn parse_engineer(row: &Row<'_>) -> Result<Engineer, SqlError> {
    Ok(Engineer {
        id: row.string("id")?,
        name: row.string_or_null("name")?,
        specialization: row.string_or_null("specialization")?,
        region: row.string_or_null("region")?,
    })
}

fn parse_task(row: &Row<'_>) -> Result<Task, SqlError> {
    let id = row
        .string_or_null("id")?
        .unwrap_or_else(|| Ulid::new().to_string());
    let priority = row
        .string("priority")?
        .parse()
        .map_err(SqlError::Parse)?;
    let status = match row.string_or_null("status")? {
        Some(s) => s.parse().map_err(SqlError::Parse)?,
        None => TaskStatus::default(),
    };
    Ok(Task {
        id,
        priority,
        engineer_id: row.string_or_null("engineer_id")?,
        // Not `Span::new`: an inverted interval is the engine's to reject.
        span: Span {
            start: row.timestamp("start")?,
            end: row.timestamp("end")?,
        },
        status,
        title: row.string_or_null("title")?,
        description: row.string_or_null("description")?,
        customer_id: row.string_or_null("customer_id")?,
        location_id: row.string_or_null("location_id")?,
        timezone: row.string_or_null("timezone")?,
        country: row.string_or_null("country")?,
    })
}

fn parse_relocation(row: &Row<'_>) -> Result<RelocationRequest, SqlError> {
    Ok(RelocationRequest {
        task_id: row.string("task_id")?,
        span: Span {
            start: row.timestamp("start")?,
            end: row.timestamp("end")?,
        },
        engineer_id: row.string_or_null("engineer_id")?,
        timezone: row.string_or_null("timezone")?,
        country: row.string_or_null("country")?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "tasks" {
        return Err(SqlError::UnknownTable(table));
    }
    match extract_where_eq(&delete.selection)? {
        Some((col, value)) if col == "id" => Ok(Command::DeleteTask { id: value }),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "engineers" => Ok(Command::SelectEngineers),
        "tasks" => {
            let filter = match &select.selection {
                None => TaskFilter::All,
                Some(Expr::IsNull(inner)) if expr_column_name(inner).as_deref() == Some("engineer_id") => {
                    TaskFilter::Unassigned
                }
                selection => match extract_where_eq(selection)? {
                    Some((col, value)) if col == "id" => TaskFilter::Id(value),
                    Some((col, value)) if col == "engineer_id" => TaskFilter::Engineer(value),
                    _ => {
                        return Err(SqlError::Unsupported(
                            "tasks filter must be id = .., engineer_id = .. or engineer_id IS NULL".into(),
                        ));
                    }
                },
            };
            Ok(Command::SelectTasks { filter })
        }
        "conflicts" => match extract_where_eq(&select.selection)? {
            Some((col, engineer_id)) if col == "engineer_id" => Ok(Command::SelectConflicts { engineer_id }),
            _ => Err(SqlError::MissingFilter("engineer_id")),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE col = 'value'` → `Some((col, value))`; no WHERE → `None`.
fn extract_where_eq(selection: &Option<Expr>) -> Result<Option<(String, String)>, SqlError> {
    let Some(sel) = selection else {
        return Ok(None);
    };
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            Ok(Some((col, parse_string(right)?)))
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Timestamps travel as RFC3339 text only.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_rfc3339_ms(s).map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")))
        }
        _ => Err(SqlError::Parse(format!("expected RFC3339 string, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
