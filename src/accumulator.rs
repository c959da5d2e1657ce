use crate::compiler::{KeyTuple, ListRegistry, Record, TableEntry, TableSchema};
use crate::error::Result;
use crate::sink::Sink;
use crate::value::cast_value;
use crate::walker::ListEvents;
use chrono_tz::Tz;
use log::debug;
use std::sync::Arc;

/// Everything one table accumulated during a list occurrence.
#[derive(Debug, Clone, Copy)]
pub struct TableBatch<'a> {
    pub schema: &'a Arc<TableSchema>,
    pub records: &'a [Record],
    /// Parallel to `records`.
    pub keys: &'a [KeyTuple],
}

impl TableBatch<'_> {
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Record, &KeyTuple)> {
        self.records.iter().zip(self.keys.iter())
    }
}

/// The finished output of one list occurrence, handed to a sink.
#[derive(Debug, Clone)]
pub struct ListBatch<'a> {
    pub list: &'a str,
    pub tables: Vec<TableBatch<'a>>,
}

impl<'a> ListBatch<'a> {
    pub fn from_registry(registry: &'a ListRegistry, list: &'a str) -> Self {
        let tables = registry
            .tables(list)
            .map(|tables| {
                tables
                    .values()
                    .map(|entry| TableBatch {
                        schema: &entry.schema,
                        records: &entry.records,
                        keys: &entry.keys,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { list, tables }
    }

    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }
}

/// Casts walker values into per-table record buffers, deduplicates them by
/// primary key and hands each finished list occurrence to a sink.
///
/// Idle -> ListOpen -> (RecordOpen -> RecordClosed)* -> ListClosed -> Idle
pub struct Accumulator<'s, S: Sink + ?Sized> {
    registry: ListRegistry,
    zone: Tz,
    current_list: Option<String>,
    duplicates: usize,
    sink: &'s mut S,
}

impl<'s, S: Sink + ?Sized> Accumulator<'s, S> {
    pub fn new(registry: ListRegistry, zone: Tz, sink: &'s mut S) -> Self {
        Self {
            registry,
            zone,
            current_list: None,
            duplicates: 0,
            sink,
        }
    }

    pub fn registry(&self) -> &ListRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ListRegistry {
        self.registry
    }

    pub fn current_list(&self) -> Option<&str> {
        self.current_list.as_deref()
    }

    fn each_table(&mut self, mut f: impl FnMut(&mut TableEntry)) {
        let Some(list) = self.current_list.as_deref() else {
            return;
        };
        if let Some(tables) = self.registry.tables_mut(list) {
            tables.values_mut().for_each(&mut f);
        }
    }
}

impl<S: Sink + ?Sized> ListEvents for Accumulator<'_, S> {
    fn begin_list(&mut self, list: &str) -> Result<bool> {
        match self.registry.tables_mut(list) {
            Some(tables) => {
                tables.values_mut().for_each(|t| t.clear());
                self.current_list = Some(list.to_string());
                self.duplicates = 0;
                Ok(true)
            }
            None => {
                self.current_list = None;
                Ok(false)
            }
        }
    }

    fn begin_record(&mut self) {
        self.each_table(|t| t.open_record());
    }

    fn put(&mut self, tag: &str, value: &str, qualified_tag: &str) {
        let zone = self.zone;
        self.each_table(|entry| {
            let Some((position, cast)) = entry
                .schema
                .slot_for(tag, qualified_tag)
                .map(|slot| (slot.position, cast_value(value, &slot.type_code, &zone)))
            else {
                return;
            };
            if let Some(slot) = entry
                .current_mut()
                .and_then(|record| record.get_mut(position))
            {
                *slot = cast;
            }
        });
    }

    fn end_record(&mut self) {
        let mut dropped = 0;
        self.each_table(|t| {
            if !t.close_record() {
                dropped += 1;
            }
        });
        self.duplicates += dropped;
    }

    fn end_list(&mut self) -> Result<()> {
        let Some(list) = self.current_list.take() else {
            return Ok(());
        };

        let batch = ListBatch::from_registry(&self.registry, &list);
        debug!(
            "List {} closed: {} records across {} tables, {} duplicates dropped",
            list,
            batch.record_count(),
            batch.tables.len(),
            self.duplicates
        );
        self.sink.write_batch(&batch)
    }

    fn finalize(&mut self) -> Result<()> {
        self.sink.finalize()
    }
}
