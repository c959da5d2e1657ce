use crate::compiler::{KeyTuple, TableSchema};
use crate::error::{LoaderError, Result};
use crate::value::Value;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Below this many rows an index is built on the calling thread; spawning
/// costs more than the scan.
pub const INLINE_BUILD_ROWS: usize = 32;

/// Keyed data a sink already holds for one table: a header row of column
/// names and the data rows beneath it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExistingTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ExistingTable {
    pub fn with_header(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

/// Where a record goes in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Update(usize),
    Insert(usize),
}

/// Primary-key tuple -> row position in an [`ExistingTable`].
#[derive(Debug, Clone)]
pub struct KeyIndex {
    table: String,
    /// Record position -> destination column index.
    column_map: Vec<usize>,
    positions: HashMap<KeyTuple, usize>,
    next_position: usize,
}

impl KeyIndex {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column_map(&self) -> &[usize] {
        &self.column_map
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, key: &KeyTuple) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Found keys update their indexed row. Unknown keys are assigned the next
    /// free row and added to the index, so a repeat within the same batch
    /// updates the row just inserted.
    pub fn classify(&mut self, key: &KeyTuple) -> Placement {
        if let Some(&row) = self.positions.get(key) {
            return Placement::Update(row);
        }
        let row = self.next_position;
        self.next_position += 1;
        self.positions.insert(key.clone(), row);
        Placement::Insert(row)
    }
}

/// Scans `existing` once and indexes each row's primary-key tuple.
pub fn build_index(table: &str, existing: &ExistingTable, schema: &TableSchema) -> Result<KeyIndex> {
    if schema.primary_key.is_empty() {
        return Err(LoaderError::MissingPrimaryKey(table.to_string()));
    }

    let column_map = schema
        .column_names()
        .map(|column| {
            existing
                .column_index(column)
                .ok_or_else(|| LoaderError::IndexBuildFailed {
                    table: table.to_string(),
                    details: format!("column {} is not in the existing data", column),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    let key_columns = schema
        .primary_key_names()
        .map(|column| {
            existing
                .column_index(column)
                .ok_or_else(|| LoaderError::IndexBuildFailed {
                    table: table.to_string(),
                    details: format!("primary key column {} is not in the existing data", column),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut positions = HashMap::with_capacity(existing.rows.len());
    for (row_number, row) in existing.rows.iter().enumerate() {
        let key: KeyTuple = key_columns
            .iter()
            .map(|&idx| row.get(idx).cloned().unwrap_or_default())
            .collect();
        positions.insert(key, row_number);
    }

    debug!("Indexed {} rows of {}", existing.rows.len(), table);
    Ok(KeyIndex {
        table: table.to_string(),
        column_map,
        positions,
        next_position: existing.rows.len(),
    })
}

fn failure_details(error: LoaderError) -> String {
    match error {
        LoaderError::IndexBuildFailed { details, .. } => details,
        other => other.to_string(),
    }
}

enum BuildState {
    Running(JoinHandle<Result<KeyIndex>>),
    Ready(KeyIndex),
    Failed(String),
}

/// Handle to a key index build that may still be running. The index can only
/// be read through [`IndexBuild::wait`].
pub struct IndexBuild {
    table: String,
    state: BuildState,
}

impl IndexBuild {
    /// Starts the build on its own thread.
    pub fn spawn(existing: Arc<ExistingTable>, schema: Arc<TableSchema>) -> Result<Self> {
        let table = schema.name.clone();
        let handle = thread::Builder::new()
            .name(format!("index-{}", table))
            .spawn(move || build_index(&schema.name, &existing, &schema))?;
        Ok(Self {
            table,
            state: BuildState::Running(handle),
        })
    }

    /// Runs the build on the calling thread.
    pub fn inline(existing: &ExistingTable, schema: &TableSchema) -> Self {
        let state = match build_index(&schema.name, existing, schema) {
            Ok(index) => BuildState::Ready(index),
            Err(e) => BuildState::Failed(failure_details(e)),
        };
        Self {
            table: schema.name.clone(),
            state,
        }
    }

    /// Spawns for large tables and builds small ones inline.
    pub fn start(existing: Arc<ExistingTable>, schema: Arc<TableSchema>) -> Result<Self> {
        if existing.rows.len() < INLINE_BUILD_ROWS {
            Ok(Self::inline(&existing, &schema))
        } else {
            Self::spawn(existing, schema)
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            BuildState::Running(handle) => handle.is_finished(),
            BuildState::Ready(_) | BuildState::Failed(_) => true,
        }
    }

    /// Blocks until the build reaches a terminal state. A failed build is a
    /// configuration error every time it is waited on.
    pub fn wait(&mut self) -> Result<&mut KeyIndex> {
        let state = std::mem::replace(&mut self.state, BuildState::Failed(String::new()));
        self.state = match state {
            BuildState::Running(handle) => match handle.join() {
                Ok(Ok(index)) => BuildState::Ready(index),
                Ok(Err(e)) => BuildState::Failed(failure_details(e)),
                Err(_) => BuildState::Failed("index thread panicked".to_string()),
            },
            terminal => terminal,
        };

        match &mut self.state {
            BuildState::Ready(index) => Ok(index),
            BuildState::Failed(details) => Err(LoaderError::IndexBuildFailed {
                table: self.table.clone(),
                details: details.clone(),
            }),
            BuildState::Running(_) => Err(LoaderError::IndexNotReady(self.table.clone())),
        }
    }
}
