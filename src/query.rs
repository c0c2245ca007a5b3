//! SELECT statement builder.
//!
//! Builds the only two query shapes the engine needs: seed selection via
//! `WHERE id IN (<subquery>)` and FK expansion via composite-safe
//! `WHERE (c1, c2) IN ((?, ?), ...)` tuples.

use crate::cancel::CancelToken;
use crate::error::{DumpError, Result};
use crate::schema::SchemaCatalog;
use crate::source::{Row, RowSource};
use crate::value::SqlValue;

#[derive(Debug, Clone)]
struct WhereIn {
    columns: Vec<String>,
    tuples: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    in_subquery: Option<String>,
    where_in: Vec<WhereIn>,
    limit: u64,
}

impl SelectBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            in_subquery: None,
            where_in: Vec::new(),
            limit: 0,
        }
    }

    /// Explicit projection; empty means `SELECT *`.
    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// Seed clause `WHERE id IN (<query>)`.
    ///
    /// The seed column is hard-coded to `id`; tables with a different or
    /// composite primary key are reachable only transitively through
    /// [`SelectBuilder::where_in`].
    pub fn in_subquery(mut self, query: &str) -> Self {
        self.in_subquery = Some(query.to_string());
        self
    }

    /// Composite-safe tuple clause; multiple calls are AND-joined.
    pub fn where_in(mut self, columns: Vec<String>, tuples: Vec<Vec<SqlValue>>) -> Self {
        self.where_in.push(WhereIn { columns, tuples });
        self
    }

    /// Row cap; 0 leaves the query unlimited.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Execute, returning the effective projection and the result rows.
    ///
    /// When no explicit projection was set the column list is pulled from
    /// the catalog so downstream emission has a stable order. An empty
    /// result short-circuits to `(vec![], vec![])`.
    pub fn exec(
        &self,
        source: &dyn RowSource,
        catalog: &mut SchemaCatalog<'_>,
        cancel: &CancelToken,
    ) -> Result<(Vec<String>, Vec<Row>)> {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        let mut params: Vec<SqlValue> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        if let Some(subquery) = &self.in_subquery {
            // MySQL forbids LIMIT inside an IN subquery; pre-execute the
            // seed query and bind the collected ids instead.
            if subquery.to_lowercase().contains("limit") {
                let ids = collect_ids(source, cancel, subquery)?;
                if ids.is_empty() {
                    return Ok((Vec::new(), Vec::new()));
                }
                clauses.push(format!("id IN ({})", placeholders(ids.len())));
                params.extend(ids);
            } else {
                clauses.push(format!("id IN ({subquery})"));
            }
        }

        for clause in &self.where_in {
            let columns = clause.columns.join(", ");
            let tuple = format!("({})", placeholders(clause.columns.len()));
            let tuples: Vec<&str> = clause.tuples.iter().map(|_| tuple.as_str()).collect();
            clauses.push(format!("({columns}) IN ({})", tuples.join(", ")));
            for row in &clause.tuples {
                params.extend(row.iter().cloned());
            }
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if self.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", self.limit));
        }

        let rows = source.query(cancel, &sql, &params)?;
        if rows.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let columns = if self.columns.is_empty() {
            catalog.get_table(cancel, &self.table)?.column_names().to_vec()
        } else {
            self.columns.clone()
        };

        Ok((columns, rows))
    }
}

/// Run a seed query and collect its single id column.
fn collect_ids(
    source: &dyn RowSource,
    cancel: &CancelToken,
    subquery: &str,
) -> Result<Vec<SqlValue>> {
    let rows = source.query(cancel, subquery, &[])?;

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != 1 {
            return Err(DumpError::Query(format!(
                "seed query must return a single id column, got {}: {subquery}",
                row.len()
            )));
        }
        let id = row.into_iter().map(|(_, value)| value).next();
        ids.push(id.unwrap_or(SqlValue::Null));
    }
    Ok(ids)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
