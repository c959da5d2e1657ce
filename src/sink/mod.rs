pub mod csv;
pub mod store;

pub use self::csv::{CsvOptions, CsvSink, QuoteRule};
pub use self::store::TableStoreSink;

use crate::accumulator::ListBatch;
use crate::compiler::ListRegistry;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Per-table insert/update counts reported back by a sink after a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub destination: String,
    pub tables: BTreeMap<String, TableStats>,
}

impl RunSummary {
    pub fn total(&self) -> TableStats {
        self.tables.values().fold(TableStats::default(), |acc, t| TableStats {
            inserted: acc.inserted + t.inserted,
            updated: acc.updated + t.updated,
        })
    }
}

/// A destination for finished list batches.
///
/// A sink decides its own insert/update language and persistence format; the
/// loader only guarantees batches arrive in dependency order.
pub trait Sink {
    /// Display name of the destination, used in the run summary.
    fn destination(&self) -> &str;

    /// Called once before the walk. Sinks that hold existing keyed data start
    /// their key index builds here.
    fn prepare(&mut self, _registry: &ListRegistry) -> Result<()> {
        Ok(())
    }

    fn write_batch(&mut self, batch: &ListBatch<'_>) -> Result<()>;

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> &BTreeMap<String, TableStats>;

    fn summary(&self) -> RunSummary {
        RunSummary {
            destination: self.destination().to_string(),
            tables: self.stats().clone(),
        }
    }
}

/// Accepts and discards every batch.
#[derive(Debug, Default)]
pub struct NullSink {
    pub batches: usize,
    pub records: usize,
    stats: BTreeMap<String, TableStats>,
}

impl Sink for NullSink {
    fn destination(&self) -> &str {
        "nowhere"
    }

    fn write_batch(&mut self, batch: &ListBatch<'_>) -> Result<()> {
        self.batches += 1;
        self.records += batch.record_count();
        Ok(())
    }

    fn stats(&self) -> &BTreeMap<String, TableStats> {
        &self.stats
    }
}
