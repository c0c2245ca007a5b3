//! The referential closure engine.
//!
//! Walks the configured seed queries, recursively follows outgoing
//! foreign keys across configured tables, deduplicates rows by
//! primary-key fingerprint, and emits `INSERT ... ON DUPLICATE KEY
//! UPDATE` statements in leaves-first order. Cycles are tolerated: they
//! flip a flag that makes the final dump disable FK checks during load.

use std::io::Write;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use smallvec::SmallVec;

use crate::buffer::RowsBuffer;
use crate::cancel::CancelToken;
use crate::config::{DumperConfig, TableConfig};
use crate::emitter::{render_insert, DumpEmitter};
use crate::error::{DumpError, Result};
use crate::progress::CountingWriter;
use crate::query::SelectBuilder;
use crate::schema::{ForeignKey, SchemaCatalog, Table};
use crate::source::{Row, RowSource};
use crate::value::SqlValue;

/// Rows selected so far, keyed by table and primary-key fingerprint.
///
/// Once a fingerprint is in the set, no path emits that row again; the
/// set is consulted both before emitting and before expanding FK tuples
/// that would re-fetch the row.
#[derive(Debug, Default)]
pub struct SeenSet {
    tables: AHashMap<String, AHashSet<String>>,
}

impl SeenSet {
    /// Whether the table has ever been entered, even without kept rows.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Whether the table already holds at least one fingerprint.
    pub fn is_populated(&self, table: &str) -> bool {
        self.tables.get(table).is_some_and(|set| !set.is_empty())
    }

    pub fn contains(&self, table: &str, fingerprint: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|set| set.contains(fingerprint))
    }

    /// Insert, returning true when the fingerprint was new.
    pub fn insert(&mut self, table: &str, fingerprint: String) -> bool {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(fingerprint)
    }

    /// Mark the table as entered without recording any fingerprint.
    pub fn touch(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }
}

/// Statistics of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct DumpStats {
    pub tables_dumped: usize,
    pub rows_emitted: u64,
    pub bytes_written: u64,
    pub cycle_detected: bool,
}

pub struct Dumper<'a> {
    config: &'a DumperConfig,
    source: &'a dyn RowSource,
    cancel: CancelToken,
    catalog: SchemaCatalog<'a>,
    seen: SeenSet,
    buffer: RowsBuffer,
    emission_order: Vec<String>,
    cycle_detected: bool,
    rows_emitted: u64,
    rng: StdRng,
}

impl<'a> Dumper<'a> {
    pub fn new(config: &'a DumperConfig, source: &'a dyn RowSource, cancel: CancelToken) -> Self {
        Self::with_buffer(config, source, cancel, RowsBuffer::new())
    }

    /// Injectable buffer so tests can force the spill path.
    pub fn with_buffer(
        config: &'a DumperConfig,
        source: &'a dyn RowSource,
        cancel: CancelToken,
        buffer: RowsBuffer,
    ) -> Self {
        Self {
            config,
            source,
            cancel,
            catalog: SchemaCatalog::new(source),
            seen: SeenSet::default(),
            buffer,
            emission_order: Vec::new(),
            cycle_detected: false,
            rows_emitted: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Run the whole dump, writing the artifact to `out`. The spill files
    /// are removed on success and failure paths alike.
    pub fn run(&mut self, out: &mut dyn Write) -> Result<DumpStats> {
        let result = self.run_inner(out);
        self.buffer.clear();
        result
    }

    fn run_inner(&mut self, out: &mut dyn Write) -> Result<DumpStats> {
        for table_config in &self.config.tables {
            for seed_query in &table_config.select_queries {
                let table = self.catalog.get_table(&self.cancel, &table_config.name)?;
                let builder = SelectBuilder::new(&table_config.name)
                    .in_subquery(seed_query)
                    .limit(table_config.limit);
                self.select_records(table, builder)?;
            }
        }

        if let Some(latched) = self.buffer.take_error() {
            return Err(DumpError::Write(latched));
        }

        let mut counting = CountingWriter::new(out);
        let mut emitter = DumpEmitter {
            catalog: &mut self.catalog,
            buffer: &self.buffer,
            config: self.config,
            cancel: &self.cancel,
            emission_order: &self.emission_order,
            cycle_detected: self.cycle_detected,
        };
        emitter.write_dump(&mut counting)?;
        counting.flush()?;

        Ok(DumpStats {
            tables_dumped: self.emission_order.len(),
            rows_emitted: self.rows_emitted,
            bytes_written: counting.bytes_written(),
            cycle_detected: self.cycle_detected,
        })
    }

    /// Select, deduplicate, recurse, emit. Tables without a config entry
    /// are skipped: the closure is pruned at user-declared boundaries.
    fn select_records(&mut self, table: Rc<Table>, builder: SelectBuilder) -> Result<()> {
        self.cancel.check()?;

        let Some(table_config) = self.config.table(&table.name) else {
            return Ok(());
        };

        let revisited = self.seen.is_populated(&table.name);

        let builder = match projection_for(&table, table_config)? {
            Some(columns) => builder.columns(columns),
            None => builder,
        };

        let (_columns, rows) = builder.exec(self.source, &mut self.catalog, &self.cancel)?;
        let rows = self.filter_rows(&table, rows)?;
        if rows.is_empty() {
            return Ok(());
        }

        // New rows out of a table that already yielded some means an outer
        // frame is still walking it: a reference cycle.
        if revisited {
            self.cycle_detected = true;
        }

        for fk in &table.foreign_keys {
            if self.config.table(&fk.referenced_table).is_none() {
                continue;
            }
            if self.seen.has_table(&fk.referenced_table) {
                self.cycle_detected = true;
            }

            let referenced = self.catalog.get_table(&self.cancel, &fk.referenced_table)?;
            let tuples = self.pending_tuples(&rows, fk, &referenced)?;
            if tuples.is_empty() {
                continue;
            }

            let fk_builder = SelectBuilder::new(&fk.referenced_table)
                .where_in(fk.referenced_columns.clone(), tuples);
            self.select_records(referenced, fk_builder)?;
        }

        self.emit_rows(&table, table_config, &rows)?;
        if !self.emission_order.contains(&table.name) {
            self.emission_order.push(table.name.clone());
        }

        Ok(())
    }

    /// Keep only rows whose fingerprint is new, inserting into the seen
    /// set in the same pass.
    fn filter_rows(&mut self, table: &Table, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(rows);
        }

        self.seen.touch(&table.name);
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let fingerprint = table.fingerprint(&row)?;
            if self.seen.insert(&table.name, fingerprint) {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// FK value tuples of `rows` that still need fetching: tuples with a
    /// NULL component are dropped, tuples whose referenced row is already
    /// in the seen set are dropped, duplicates collapse.
    fn pending_tuples(
        &self,
        rows: &[Row],
        fk: &ForeignKey,
        referenced: &Table,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let mut batch_seen: AHashSet<String> = AHashSet::new();
        let mut tuples = Vec::new();

        'rows: for row in rows {
            let mut tuple: SmallVec<[SqlValue; 2]> = SmallVec::new();
            for column in &fk.local_columns {
                match row.get(column) {
                    Some(value) if !value.is_null() => tuple.push(value.clone()),
                    _ => continue 'rows,
                }
            }

            let fingerprint = referenced.fingerprint_tuple(&fk.referenced_columns, &tuple)?;
            if self.seen.contains(&fk.referenced_table, &fingerprint) {
                continue;
            }
            if !batch_seen.insert(fingerprint) {
                continue;
            }

            tuples.push(tuple.into_vec());
        }

        Ok(tuples)
    }

    fn emit_rows(&mut self, table: &Table, table_config: &TableConfig, rows: &[Row]) -> Result<()> {
        let statement = render_insert(
            table,
            table_config,
            rows,
            self.config.dump.add_column_name,
            &mut self.rng,
        )?;
        self.buffer.write(&table.name, statement.as_bytes());
        self.rows_emitted += rows.len() as u64;
        Ok(())
    }
}

/// Compute the projection for a table per the column policy:
/// `None` (meaning `*`) when nothing is restricted; otherwise the allow
/// list (or all columns) plus every mandatory PK/FK column, minus ignored
/// non-mandatory columns, in declared column order.
pub fn projection_for(table: &Table, config: &TableConfig) -> Result<Option<Vec<String>>> {
    if config.allow_columns.is_empty() && config.ignore_columns.is_empty() {
        return Ok(None);
    }

    for name in &config.allow_columns {
        if table.column(name).is_none() {
            return Err(DumpError::Config(format!(
                "allow_columns names unknown column {name} on table {}",
                table.name
            )));
        }
    }

    let mut columns: Vec<String> = if config.allow_columns.is_empty() {
        table.column_names().to_vec()
    } else {
        let mut columns = config.allow_columns.clone();
        for name in table.column_names() {
            if !columns.contains(name) && table.is_key_column(name) {
                columns.push(name.clone());
            }
        }
        columns
    };

    columns.retain(|name| table.is_key_column(name) || !config.is_ignored(name));
    table.sort_to_declared_order(&mut columns);

    Ok(Some(columns))
}
