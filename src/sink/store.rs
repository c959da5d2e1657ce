use super::{Sink, TableStats};
use crate::accumulator::{ListBatch, TableBatch};
use crate::compiler::{ListRegistry, TableSchema};
use crate::error::{LoaderError, Result};
use crate::index::{ExistingTable, IndexBuild, Placement};
use crate::value::Value;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A keyed, spreadsheet-like store: named tables of header plus rows.
///
/// Records whose primary key already exists overwrite the mapped cells of that
/// row; everything else is appended. Tables that do not exist yet are created
/// with the mapped columns as their header.
pub struct TableStoreSink {
    destination: String,
    path: Option<PathBuf>,
    tables: BTreeMap<String, Arc<ExistingTable>>,
    builds: HashMap<String, IndexBuild>,
    /// Schema each build was started with; its column map is only valid for
    /// batches of that schema.
    built_for: HashMap<String, Arc<TableSchema>>,
    stats: BTreeMap<String, TableStats>,
    changed: bool,
}

impl TableStoreSink {
    pub fn new(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            path: None,
            tables: BTreeMap::new(),
            builds: HashMap::new(),
            built_for: HashMap::new(),
            stats: BTreeMap::new(),
            changed: false,
        }
    }

    pub fn with_tables(destination: &str, tables: BTreeMap<String, ExistingTable>) -> Self {
        let mut sink = Self::new(destination);
        sink.tables = tables
            .into_iter()
            .map(|(name, table)| (name, Arc::new(table)))
            .collect();
        sink
    }

    /// Opens a JSON snapshot. A missing file is an empty store that will be
    /// written on [`Sink::finalize`] if anything changes.
    pub fn load_json(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str::<BTreeMap<String, ExistingTable>>(&text)?
        } else {
            BTreeMap::new()
        };
        let mut sink = Self::with_tables(&path.display().to_string(), tables);
        sink.path = Some(path.to_path_buf());
        Ok(sink)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let tables: BTreeMap<&str, &ExistingTable> = self
            .tables
            .iter()
            .map(|(name, table)| (name.as_str(), table.as_ref()))
            .collect();
        fs::write(path, serde_json::to_string_pretty(&tables)?)?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&ExistingTable> {
        self.tables.get(name).map(|t| t.as_ref())
    }

    pub fn into_tables(self) -> BTreeMap<String, ExistingTable> {
        self.tables
            .into_iter()
            .map(|(name, table)| (name, Arc::unwrap_or_clone(table)))
            .collect()
    }

    fn create_table(&mut self, schema: &Arc<TableSchema>) {
        let table = ExistingTable::with_header(schema.column_names().map(String::from).collect());
        debug!("Creating table {} with {} columns", schema.name, table.header.len());
        self.builds
            .insert(schema.name.clone(), IndexBuild::inline(&table, schema));
        self.built_for
            .insert(schema.name.clone(), Arc::clone(schema));
        self.tables.insert(schema.name.clone(), Arc::new(table));
    }

    fn write_table(&mut self, batch: &TableBatch<'_>) -> Result<()> {
        let name = batch.name();
        if !self.tables.contains_key(name) {
            self.create_table(batch.schema);
        }

        let index = self
            .builds
            .get_mut(name)
            .ok_or_else(|| LoaderError::IndexNotReady(name.to_string()))?
            .wait()?;
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| LoaderError::IndexNotReady(name.to_string()))?;

        let column_map = match self.built_for.get(name) {
            Some(schema) if Arc::ptr_eq(schema, batch.schema) => index.column_map().to_vec(),
            _ => header_positions(table, batch.schema)?,
        };

        // the build thread has been joined, so this is the only reference
        let table = Arc::make_mut(table);
        let width = table.header.len();
        let stats = self.stats.entry(name.to_string()).or_default();

        for (record, key) in batch.rows() {
            let row = match index.classify(key) {
                Placement::Update(position) => {
                    stats.updated += 1;
                    position
                }
                Placement::Insert(position) => {
                    stats.inserted += 1;
                    position
                }
            };
            if row >= table.rows.len() {
                table.rows.resize(row + 1, vec![Value::Null; width]);
            }
            let target = &mut table.rows[row];
            if target.len() < width {
                target.resize(width, Value::Null);
            }
            for (value, &column) in record.iter().zip(column_map.iter()) {
                target[column] = value.clone();
            }
        }

        self.changed |= !batch.records.is_empty();
        Ok(())
    }
}

fn header_positions(table: &ExistingTable, schema: &TableSchema) -> Result<Vec<usize>> {
    schema
        .column_names()
        .map(|column| {
            table
                .column_index(column)
                .ok_or_else(|| LoaderError::UnknownColumn {
                    row: format!("header of {}", schema.name),
                    table: schema.name.clone(),
                    column: column.to_string(),
                })
        })
        .collect()
}

impl Sink for TableStoreSink {
    fn destination(&self) -> &str {
        &self.destination
    }

    /// Starts one key index build per mapped table that already holds data.
    fn prepare(&mut self, registry: &ListRegistry) -> Result<()> {
        for (_, schema) in registry.schemas() {
            if self.builds.contains_key(&schema.name) {
                continue;
            }
            let Some(existing) = self.tables.get(&schema.name) else {
                continue;
            };
            debug!(
                "Indexing {} existing rows of {}",
                existing.rows.len(),
                schema.name
            );
            let build = IndexBuild::start(Arc::clone(existing), Arc::clone(schema))?;
            self.builds.insert(schema.name.clone(), build);
            self.built_for
                .insert(schema.name.clone(), Arc::clone(schema));
        }
        Ok(())
    }

    fn write_batch(&mut self, batch: &ListBatch<'_>) -> Result<()> {
        for table in &batch.tables {
            self.write_table(table)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let (true, Some(path)) = (self.changed, self.path.as_ref()) {
            self.save_json(path)?;
            info!("Saved {} tables to {}", self.tables.len(), path.display());
        }
        Ok(())
    }

    fn stats(&self) -> &BTreeMap<String, TableStats> {
        &self.stats
    }
}
