//! Deterministic in-memory row source.
//!
//! Understands exactly the statement shapes the catalog and the select
//! builder emit (`DESCRIBE`, `SHOW KEYS`, `SHOW CREATE TABLE`, the
//! `KEY_COLUMN_USAGE` lookup, and `SELECT ... [WHERE ...] [LIMIT n]`),
//! which is enough to drive the whole pipeline in tests without a server.

use std::cell::RefCell;

use ahash::AHashSet;

use super::{Row, RowSource};
use crate::cancel::CancelToken;
use crate::error::{DumpError, Result};
use crate::value::SqlValue;

#[derive(Debug, Clone)]
pub struct MemoryColumn {
    pub name: String,
    pub physical_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryForeignKey {
    name: String,
    columns: Vec<String>,
    referenced_table: String,
    referenced_columns: Vec<String>,
}

/// One table definition plus its rows, built fluently:
///
/// ```ignore
/// MemoryTable::new("users")
///     .column("id", "int(11)", false)
///     .column("name", "varchar(255)", true)
///     .primary_key(&["id"])
///     .row(vec![SqlValue::from("42"), SqlValue::from("alice")])
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<MemoryColumn>,
    primary_key: Vec<String>,
    foreign_keys: Vec<MemoryForeignKey>,
    create_statement: Option<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl MemoryTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            create_statement: None,
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, physical_type: &str, nullable: bool) -> Self {
        self.columns.push(MemoryColumn {
            name: name.to_string(),
            physical_type: physical_type.to_string(),
            nullable,
            default: None,
        });
        self
    }

    pub fn column_with_default(
        mut self,
        name: &str,
        physical_type: &str,
        nullable: bool,
        default: &str,
    ) -> Self {
        self.columns.push(MemoryColumn {
            name: name.to_string(),
            physical_type: physical_type.to_string(),
            nullable,
            default: Some(default.to_string()),
        });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_key(
        mut self,
        name: &str,
        columns: &[&str],
        referenced_table: &str,
        referenced_columns: &[&str],
    ) -> Self {
        self.foreign_keys.push(MemoryForeignKey {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: referenced_table.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Override the synthesized DDL.
    pub fn create_statement(mut self, statement: &str) -> Self {
        self.create_statement = Some(statement.to_string());
        self
    }

    /// Append a row; cells must follow the declared column order.
    pub fn row(mut self, cells: Vec<SqlValue>) -> Self {
        assert_eq!(
            cells.len(),
            self.columns.len(),
            "row arity must match table {}",
            self.name
        );
        self.rows.push(cells);
        self
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// DDL in the shape `SHOW CREATE TABLE` reports it.
    fn ddl(&self) -> String {
        if let Some(statement) = &self.create_statement {
            return statement.clone();
        }

        let mut lines: Vec<String> = Vec::new();
        for column in &self.columns {
            let mut line = format!("  `{}` {}", column.name, column.physical_type);
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                line.push_str(&format!(" DEFAULT '{default}'"));
            }
            lines.push(line);
        }
        if !self.primary_key.is_empty() {
            let cols: Vec<String> = self.primary_key.iter().map(|c| format!("`{c}`")).collect();
            lines.push(format!("  PRIMARY KEY ({})", cols.join(",")));
        }
        for fk in &self.foreign_keys {
            let local: Vec<String> = fk.columns.iter().map(|c| format!("`{c}`")).collect();
            let referenced: Vec<String> = fk
                .referenced_columns
                .iter()
                .map(|c| format!("`{c}`"))
                .collect();
            lines.push(format!(
                "  CONSTRAINT `{}` FOREIGN KEY ({}) REFERENCES `{}` ({})",
                fk.name,
                local.join(","),
                fk.referenced_table,
                referenced.join(",")
            ));
        }

        format!(
            "CREATE TABLE `{}` (\n{}\n) ENGINE=InnoDB",
            self.name,
            lines.join(",\n")
        )
    }
}

/// In-memory [`RowSource`] over a fixed set of tables. Every executed
/// statement is logged so tests can assert on the generated SQL.
pub struct MemorySource {
    tables: Vec<MemoryTable>,
    log: RefCell<Vec<String>>,
}

impl MemorySource {
    pub fn new(tables: Vec<MemoryTable>) -> Self {
        Self {
            tables,
            log: RefCell::new(Vec::new()),
        }
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DumpError::Query(format!("table `{name}` doesn't exist")))
    }

    fn describe(&self, name: &str) -> Result<Vec<Row>> {
        let table = self.table(name)?;
        let mut rows = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let mut row = Row::default();
            row.insert("Field".to_string(), SqlValue::from(column.name.as_str()));
            row.insert(
                "Type".to_string(),
                SqlValue::from(column.physical_type.as_str()),
            );
            row.insert(
                "Null".to_string(),
                SqlValue::from(if column.nullable { "YES" } else { "NO" }),
            );
            row.insert("Key".to_string(), SqlValue::from(""));
            row.insert(
                "Default".to_string(),
                match &column.default {
                    Some(default) => SqlValue::from(default.as_str()),
                    None => SqlValue::Null,
                },
            );
            row.insert("Extra".to_string(), SqlValue::from(""));
            rows.push(row);
        }
        Ok(rows)
    }

    fn show_keys(&self, name: &str) -> Result<Vec<Row>> {
        let table = self.table(name)?;
        let mut rows = Vec::new();
        for (i, column) in table.primary_key.iter().enumerate() {
            let mut row = Row::default();
            row.insert("Table".to_string(), SqlValue::from(name));
            row.insert("Non_unique".to_string(), SqlValue::from("0"));
            row.insert("Key_name".to_string(), SqlValue::from("PRIMARY"));
            row.insert(
                "Seq_in_index".to_string(),
                SqlValue::from((i + 1).to_string()),
            );
            row.insert("Column_name".to_string(), SqlValue::from(column.as_str()));
            rows.push(row);
        }
        Ok(rows)
    }

    fn foreign_key_usage(&self, params: &[SqlValue]) -> Result<Vec<Row>> {
        let name = params
            .first()
            .and_then(SqlValue::as_text)
            .ok_or_else(|| DumpError::Query("KEY_COLUMN_USAGE needs a table parameter".into()))?;
        let table = self.table(&name)?;

        let mut rows = Vec::new();
        for fk in &table.foreign_keys {
            for (local, referenced) in fk.columns.iter().zip(&fk.referenced_columns) {
                let mut row = Row::default();
                row.insert(
                    "CONSTRAINT_NAME".to_string(),
                    SqlValue::from(fk.name.as_str()),
                );
                row.insert("COLUMN_NAME".to_string(), SqlValue::from(local.as_str()));
                row.insert(
                    "REFERENCED_TABLE_NAME".to_string(),
                    SqlValue::from(fk.referenced_table.as_str()),
                );
                row.insert(
                    "REFERENCED_COLUMN_NAME".to_string(),
                    SqlValue::from(referenced.as_str()),
                );
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn show_create(&self, name: &str) -> Result<Vec<Row>> {
        let table = self.table(name)?;
        let mut row = Row::default();
        row.insert("Table".to_string(), SqlValue::from(name));
        row.insert("Create Table".to_string(), SqlValue::from(table.ddl()));
        Ok(vec![row])
    }

    fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = sql.trim().trim_end_matches(';').trim();
        let rest = strip_prefix_ci(sql, "SELECT ")
            .ok_or_else(|| DumpError::Query(format!("unsupported statement: {sql}")))?;

        let from = find_ci(rest, " FROM ")
            .ok_or_else(|| DumpError::Query(format!("missing FROM: {sql}")))?;
        let projection = rest[..from].trim();
        let mut tail = rest[from + 6..].trim();

        let table_name = tail
            .split_whitespace()
            .next()
            .ok_or_else(|| DumpError::Query(format!("missing table name: {sql}")))?;
        let table = self.table(table_name)?;
        tail = tail[table_name.len()..].trim();

        let mut predicates = Vec::new();
        let mut limit = None;
        let mut cursor = 0usize;

        if let Some(after_where) = strip_prefix_ci(tail, "WHERE ") {
            let (where_part, limit_part) = match find_top_level_ci(after_where, " LIMIT ") {
                Some(pos) => (&after_where[..pos], Some(after_where[pos + 7..].trim())),
                None => (after_where, None),
            };
            for condition in split_top_level_ci(where_part, " AND ") {
                predicates.push(self.parse_condition(condition.trim(), params, &mut cursor)?);
            }
            if let Some(limit_text) = limit_part {
                limit = Some(parse_limit(limit_text)?);
            }
        } else if let Some(limit_text) = strip_prefix_ci(tail, "LIMIT ") {
            limit = Some(parse_limit(limit_text.trim())?);
        } else if !tail.is_empty() {
            return Err(DumpError::Query(format!("unsupported clause: {tail}")));
        }

        let projected: Vec<usize> = if projection == "*" {
            (0..table.columns.len()).collect()
        } else {
            let mut indexes = Vec::new();
            for name in projection.split(',') {
                let name = name.trim();
                let index = table.column_index(name).ok_or_else(|| {
                    DumpError::Query(format!("unknown column {name} in table {table_name}"))
                })?;
                indexes.push(index);
            }
            indexes
        };

        let mut rows = Vec::new();
        for cells in &table.rows {
            if !predicates
                .iter()
                .map(|p| p.matches(table, cells))
                .collect::<Result<Vec<bool>>>()?
                .iter()
                .all(|m| *m)
            {
                continue;
            }

            let mut row = Row::default();
            for &index in &projected {
                row.insert(table.columns[index].name.clone(), cells[index].clone());
            }
            rows.push(row);

            if limit.is_some_and(|l| rows.len() as u64 >= l) {
                break;
            }
        }

        Ok(rows)
    }

    fn parse_condition(
        &self,
        condition: &str,
        params: &[SqlValue],
        cursor: &mut usize,
    ) -> Result<Predicate> {
        if condition.starts_with('(') {
            // (c1,c2) IN ((?,?), (?,?))
            let close = matching_paren(condition, 0)?;
            let columns: Vec<String> = condition[1..close]
                .split(',')
                .map(|c| c.trim().to_string())
                .collect();
            let rest = condition[close + 1..].trim();
            let rest = strip_prefix_ci(rest, "IN")
                .ok_or_else(|| DumpError::Query(format!("expected IN: {condition}")))?
                .trim();
            let outer_close = matching_paren(rest, 0)?;
            let groups = rest[1..outer_close].trim();

            let mut tuples = AHashSet::new();
            let mut offset = 0;
            while let Some(open) = groups[offset..].find('(') {
                let open = offset + open;
                let close = matching_paren(groups, open)?;
                let mut tuple = Vec::with_capacity(columns.len());
                for item in groups[open + 1..close].split(',') {
                    tuple.push(self.bind_value(item.trim(), params, cursor)?);
                }
                if tuple.len() != columns.len() {
                    return Err(DumpError::Query(format!("tuple arity mismatch: {condition}")));
                }
                if let Some(canonical) = tuple
                    .iter()
                    .map(SqlValue::as_text)
                    .collect::<Option<Vec<String>>>()
                {
                    tuples.insert(canonical);
                }
                offset = close + 1;
            }

            return Ok(Predicate::TupleIn { columns, tuples });
        }

        if let Some(in_pos) = find_ci(condition, " IN ") {
            let column = condition[..in_pos].trim().to_string();
            let rest = condition[in_pos + 4..].trim();
            let close = matching_paren(rest, 0)?;
            let inner = rest[1..close].trim();

            let values = if strip_prefix_ci(inner, "SELECT ").is_some() {
                let mut values = Vec::new();
                for row in self.select(inner, &[])? {
                    if row.len() != 1 {
                        return Err(DumpError::Query(
                            "subquery must return a single column".into(),
                        ));
                    }
                    if let Some(text) = row.values().next().and_then(SqlValue::as_text) {
                        values.push(text);
                    }
                }
                values
            } else {
                let mut values = Vec::new();
                for item in inner.split(',') {
                    if let Some(text) = self.bind_value(item.trim(), params, cursor)?.as_text() {
                        values.push(text);
                    }
                }
                values
            };

            return Ok(Predicate::InValues { column, values });
        }

        if let Some((column, rhs)) = condition.split_once('=') {
            let value = self.bind_value(rhs.trim(), params, cursor)?;
            return Ok(Predicate::Equals {
                column: column.trim().to_string(),
                value: value
                    .as_text()
                    .ok_or_else(|| DumpError::Query(format!("NULL comparison: {condition}")))?,
            });
        }

        Err(DumpError::Query(format!("unsupported condition: {condition}")))
    }

    fn bind_value(&self, item: &str, params: &[SqlValue], cursor: &mut usize) -> Result<SqlValue> {
        if item == "?" {
            let value = params
                .get(*cursor)
                .cloned()
                .ok_or_else(|| DumpError::Query("not enough bound parameters".into()))?;
            *cursor += 1;
            Ok(value)
        } else if item.starts_with('\'') && item.ends_with('\'') && item.len() >= 2 {
            Ok(SqlValue::from(&item[1..item.len() - 1]))
        } else {
            Ok(SqlValue::from(item))
        }
    }
}

impl RowSource for MemorySource {
    fn query(&self, cancel: &CancelToken, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        cancel.check()?;
        self.log.borrow_mut().push(sql.to_string());

        let trimmed = sql.trim();
        if let Some(rest) = strip_prefix_ci(trimmed, "DESCRIBE ") {
            return self.describe(&unquote_ident(rest));
        }
        if let Some(rest) = strip_prefix_ci(trimmed, "SHOW KEYS FROM ") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            return self.show_keys(&unquote_ident(name));
        }
        if let Some(rest) = strip_prefix_ci(trimmed, "SHOW CREATE TABLE ") {
            return self.show_create(&unquote_ident(rest));
        }
        if find_ci(trimmed, "KEY_COLUMN_USAGE").is_some() {
            return self.foreign_key_usage(params);
        }

        self.select(trimmed, params)
    }
}

enum Predicate {
    InValues { column: String, values: Vec<String> },
    TupleIn {
        columns: Vec<String>,
        tuples: AHashSet<Vec<String>>,
    },
    Equals { column: String, value: String },
}

impl Predicate {
    fn matches(&self, table: &MemoryTable, cells: &[SqlValue]) -> Result<bool> {
        let cell = |name: &str| -> Result<Option<String>> {
            let index = table
                .column_index(name)
                .ok_or_else(|| DumpError::Query(format!("unknown column {name}")))?;
            Ok(cells[index].as_text())
        };

        match self {
            Predicate::InValues { column, values } => {
                Ok(cell(column)?.is_some_and(|v| values.contains(&v)))
            }
            Predicate::TupleIn { columns, tuples } => {
                let mut tuple = Vec::with_capacity(columns.len());
                for column in columns {
                    match cell(column)? {
                        Some(value) => tuple.push(value),
                        None => return Ok(false),
                    }
                }
                Ok(tuples.contains(&tuple))
            }
            Predicate::Equals { column, value } => {
                Ok(cell(column)?.is_some_and(|v| v == *value))
            }
        }
    }
}

fn parse_limit(text: &str) -> Result<u64> {
    text.split_whitespace()
        .next()
        .unwrap_or_default()
        .parse::<u64>()
        .map_err(|e| DumpError::Query(format!("bad LIMIT: {e}")))
}

fn unquote_ident(text: &str) -> String {
    text.trim().trim_matches('`').to_string()
}

fn strip_prefix_ci<'s>(text: &'s str, prefix: &str) -> Option<&'s str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_ascii_lowercase();
    haystack_lower.find(&needle.to_ascii_lowercase())
}

/// Find `needle` at paren depth zero, case-insensitively.
fn find_top_level_ci(haystack: &str, needle: &str) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let mut depth = 0usize;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && lower[i..].starts_with(needle.as_str()) {
            return Some(i);
        }
    }
    None
}

fn split_top_level_ci<'s>(text: &'s str, separator: &str) -> Vec<&'s str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = find_top_level_ci(rest, separator) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + separator.len()..];
    }
    parts.push(rest);
    parts
}

fn matching_paren(text: &str, open: usize) -> Result<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return Err(DumpError::Query(format!("expected paren group: {text}")));
    }

    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(DumpError::Query(format!("unbalanced parens: {text}")))
}
