use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::BookingRequest;
use crate::time;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectResources,
    SelectSlots {
        resource: String,
        day: NaiveDate,
    },
    SelectAvailability {
        resource: String,
        day: NaiveDate,
    },
    SelectReservations {
        resource: String,
        day: Option<NaiveDate>,
    },
    SelectAllReservations {
        admin_secret: Option<String>,
    },
    InsertReservation(BookingRequest),
    DeleteReservation {
        id: Ulid,
        credential: String,
    },
}

/// Columns accepted by `INSERT INTO reservations` when no column list is given.
const RESERVATION_COLUMNS: [&str; 6] = ["resource", "start", "minutes", "holder_name", "contact", "note"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("one reservation per INSERT".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        RESERVATION_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::WrongArity("reservations", columns.len(), values.len()));
    }

    let (mut resource, mut start, mut minutes, mut holder_name) = (None, None, None, None);
    let (mut contact, mut note) = (None, None);
    for (column, value) in columns.iter().zip(values) {
        match column.as_str() {
            "resource" => resource = Some(parse_string_expr(value)?),
            "start" => start = Some(parse_string_expr(value)?),
            "minutes" | "duration_minutes" => minutes = Some(parse_i64_expr(value)?),
            "holder_name" => holder_name = Some(parse_string_expr(value)?),
            "contact" => contact = parse_string_or_null(value)?,
            "note" => note = parse_string_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertReservation(BookingRequest {
        resource: resource.ok_or(SqlError::MissingColumn("resource"))?,
        start: start.ok_or(SqlError::MissingColumn("start"))?,
        duration_minutes: minutes.ok_or(SqlError::MissingColumn("minutes"))?,
        holder_name: holder_name.ok_or(SqlError::MissingColumn("holder_name"))?,
        contact,
        note,
    }))
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let filters = Filters::from_selection(delete.selection.as_ref())?;
    let id = parse_ulid_expr(filters.require("id")?)?;
    let credential = parse_string_expr(filters.require("credential")?)?;
    Ok(Command::DeleteReservation { id, credential })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "slots" => Ok(Command::SelectSlots {
            resource: parse_string_expr(filters.require("resource")?)?,
            day: parse_day_expr(filters.require("day")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            resource: parse_string_expr(filters.require("resource")?)?,
            day: parse_day_expr(filters.require("day")?)?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            resource: parse_string_expr(filters.require("resource")?)?,
            day: filters.get("day").map(parse_day_expr).transpose()?,
        }),
        "all_reservations" => Ok(Command::SelectAllReservations {
            admin_secret: filters.get("admin_secret").map(parse_string_expr).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column = value` pairs from a WHERE clause joined with AND.
struct Filters<'a> {
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Self { pairs: Vec::new() };
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    self.collect(left)?;
                    self.collect(right)
                }
                ast::BinaryOperator::Eq => {
                    let col = expr_column_name(left)
                        .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                    self.pairs.push((col, &**right));
                    Ok(())
                }
                other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
            },
            other => Err(SqlError::Unsupported(format!("WHERE clause {other}"))),
        }
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.pairs.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::BadValue(format!("bad reservation id {s:?}: {e}")))
}

fn parse_day_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    time::parse_day(&s).map_err(|e| SqlError::BadValue(e.to_string()))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::BadValue(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::BadValue(format!("integer out of range: -{expr}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
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
    /// Syntactically fine, but the literal is not a valid id, day, or number.
    BadValue(String),
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
            SqlError::BadValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
