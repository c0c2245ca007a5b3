//! Final artifact assembly.
//!
//! Renders `INSERT ... ON DUPLICATE KEY UPDATE` statements for the
//! engine, and writes the complete dump: the optional FK-checks pragma,
//! rewritten CREATE statements, then the per-table buffers in first-touch
//! order.

use std::io::{self, Write};

use ahash::AHashSet;
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

use crate::buffer::RowsBuffer;
use crate::cancel::CancelToken;
use crate::config::{DumperConfig, TableConfig};
use crate::error::Result;
use crate::progress::CountingWriter;
use crate::schema::{SchemaCatalog, Table};
use crate::source::Row;
use crate::value::SqlValue;

static REFERENCES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"REFERENCES `([^`]+)`").expect("references pattern"));

const CYCLE_HEADER: &str =
    "# Disable FK checks because references cycle detected\nSET FOREIGN_KEY_CHECKS = 0;\n\n";

/// Render one multi-row INSERT for `rows` of `table`.
///
/// The column list is always the full declared set: cells the projection
/// did not fetch fall back to the column default, ignored columns are
/// replaced by their default, and faked columns get a fresh synthetic
/// value. The `ON DUPLICATE KEY UPDATE` tail lists every non-ignored
/// column so repeated loads are idempotent.
pub fn render_insert(
    table: &Table,
    config: &TableConfig,
    rows: &[Row],
    add_column_name: bool,
    rng: &mut dyn RngCore,
) -> Result<String> {
    let columns = table.column_names();

    let mut out = String::new();
    out.push_str(&format!(
        "INSERT INTO {} ({}) VALUES",
        table.name,
        columns.join(", ")
    ));

    for (i, row) in rows.iter().enumerate() {
        out.push_str(if i == 0 { "\n\t(" } else { ",\n\t(" });

        for (j, column_name) in columns.iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            if add_column_name {
                out.push_str(&format!("\n\t\t# {column_name}\n\t\t"));
            }

            let column = table
                .column(column_name)
                .expect("declared column is present");
            let literal = if config.is_ignored(column_name) {
                column.default_value()
            } else if let Some(faker) = config.column_fakers.get(column_name) {
                column.format(&SqlValue::from(faker.generate(rng)))?
            } else if let Some(value) = row.get(column_name) {
                column.format(value)?
            } else {
                column.default_value()
            };
            out.push_str(&literal);
        }

        out.push(')');
    }

    out.push_str("\nON DUPLICATE KEY UPDATE ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !config.is_ignored(c))
        .map(|c| format!("{c} = VALUES({c})"))
        .collect();
    out.push_str(&updates.join(", "));
    out.push_str(";\n");

    Ok(out)
}

/// Drop `REFERENCES` lines pointing at tables outside the configured set
/// and repair the trailing comma their removal may leave behind.
pub fn strip_dangling_references(create: &str, configured: &AHashSet<&str>) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut dropped = false;

    for line in create.lines() {
        if let Some(captures) = REFERENCES_RE.captures(line) {
            if !configured.contains(&captures[1]) {
                dropped = true;
                continue;
            }
        }
        lines.push(line.to_string());
    }

    if dropped {
        if let Some(close) = lines
            .iter()
            .rposition(|line| line.trim_start().starts_with(')'))
        {
            if close > 0 {
                let previous = &mut lines[close - 1];
                let trimmed = previous.trim_end();
                if let Some(without_comma) = trimmed.strip_suffix(',') {
                    *previous = without_comma.to_string();
                }
            }
        }
    }

    lines.join("\n")
}

/// Streams the final dump script.
pub struct DumpEmitter<'a, 'b> {
    pub catalog: &'a mut SchemaCatalog<'b>,
    pub buffer: &'a RowsBuffer,
    pub config: &'a DumperConfig,
    pub cancel: &'a CancelToken,
    pub emission_order: &'a [String],
    pub cycle_detected: bool,
}

impl DumpEmitter<'_, '_> {
    pub fn write_dump<W: Write>(&mut self, out: &mut CountingWriter<W>) -> Result<()> {
        if self.cycle_detected {
            out.write_all(CYCLE_HEADER.as_bytes())?;
        }

        if !self.config.dump.only_data {
            let configured = self.config.table_names();
            for table_config in &self.config.tables {
                let raw = self.catalog.create_statement(
                    self.cancel,
                    &table_config.name,
                    self.config.dump.create_tables_if_not_exist,
                )?;
                let create = strip_dangling_references(&raw, &configured);
                out.write_all(create.as_bytes())?;
                out.write_all(b";\n\n")?;
            }
        }

        let mut written: AHashSet<&str> = AHashSet::new();
        for table in self.emission_order {
            if !written.insert(table.as_str()) {
                continue;
            }
            let mut reader = self.buffer.reader(table)?;
            io::copy(&mut reader, out)?;
            out.write_all(b"\n\n")?;
        }

        Ok(())
    }
}
