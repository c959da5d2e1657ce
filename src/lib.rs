//! # Financial Statement Loader
//!
//! A library for flattening hierarchical financial statements (bank, card and
//! investment downloads) into deduplicated, typed records and merging them
//! into keyed destinations.
//!
//! ## Core Concepts
//!
//! - **Mapping**: Declarative rows `[list, table, tag, column]` saying which source tag
//!   lands in which destination column
//! - **List occurrence**: One appearance of a repeating section (e.g. `BANKTRANLIST`)
//!   together with the values around it
//! - **Nearby context**: Values outside a list entry but inside its scope (account id,
//!   currency, statement date range) copied onto every entry
//! - **Primary key**: Records sharing a key within one occurrence are kept once; sinks use
//!   the same key to decide between insert and update
//! - **Dependency order**: A table referenced by a foreign key is always written before the
//!   tables referencing it
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_statement_loader::*;
//!
//! let config = LoaderConfig::from_json_str(r#"{
//!     "time_zone": "America/New_York",
//!     "mapping": [
//!         ["STMTRS/BANKTRANLIST", "Transactions", "FITID", "Id"],
//!         ["STMTRS/BANKTRANLIST", "Transactions", "TRNAMT", "Amount"],
//!         ["STMTRS/BANKTRANLIST", "Transactions", "ACCTID", "Account"]
//!     ],
//!     "tables": [{
//!         "name": "Transactions",
//!         "columns": [
//!             { "name": "Id", "type": "S", "primary_key": true },
//!             { "name": "Amount", "type": "N" },
//!             { "name": "Account", "type": "S" }
//!         ]
//!     }]
//! }"#)?;
//!
//! let document: Element = parse_my_statement("download.ofx")?;
//! let mut sink = TableStoreSink::load_json(Path::new("ledger.json"))?;
//! let summary = load_statement(config, &document, &mut sink)?;
//! println!("{:?}", summary.total());
//! ```

pub mod accumulator;
pub mod compiler;
pub mod dependency;
pub mod document;
pub mod error;
pub mod index;
pub mod mapping;
pub mod schema;
pub mod sink;
pub mod value;
pub mod walker;

pub use accumulator::{Accumulator, ListBatch, TableBatch};
pub use compiler::{compile, KeyTuple, ListRegistry, Record, TableSchema};
pub use dependency::{DependencyGraph, ProcessingOrder};
pub use document::{Element, ElementNode, ElementWalk};
pub use error::{LoaderError, Result};
pub use index::{build_index, ExistingTable, IndexBuild, KeyIndex, Placement};
pub use mapping::{normalize_mapping, MappingRow};
pub use schema::*;
pub use sink::{CsvOptions, CsvSink, NullSink, QuoteRule, RunSummary, Sink, TableStats, TableStoreSink};
pub use value::{cast_value, TypeCode, Value};
pub use walker::{document_globals, ContextWalker, EventTrace, ListEvents};

use chrono_tz::Tz;
use log::{debug, info};

/// A compiled mapping, ready to load any number of statements.
pub struct StatementLoader {
    config: LoaderConfig,
    order: ProcessingOrder,
    registry: ListRegistry,
    zone: Tz,
}

impl StatementLoader {
    /// Orders, normalizes and compiles the mapping. Every configuration error
    /// surfaces here, before any sink is touched.
    pub fn new(config: LoaderConfig) -> Result<Self> {
        let zone = config.target_zone()?;
        let graph = DependencyGraph::from_config(&config);
        let order = graph.order()?;
        if graph.has_references() {
            debug!(
                "Dependency order: {}",
                order.list_names().collect::<Vec<_>>().join(", ")
            );
        }

        let rows = normalize_mapping(&config, &order)?;
        let registry = compile(&rows)?;

        info!(
            "Loader ready: {} mapping rows, {} lists, target zone {}",
            rows.len(),
            order.lists.len(),
            config.time_zone
        );
        Ok(Self {
            config,
            order,
            registry,
            zone,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn order(&self) -> &ProcessingOrder {
        &self.order
    }

    pub fn registry(&self) -> &ListRegistry {
        &self.registry
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Walks `document` once per configured list, in dependency order, and
    /// hands every finished list occurrence to `sink`.
    pub fn run<N: ElementNode, S: Sink + ?Sized>(
        &mut self,
        document: &N,
        sink: &mut S,
    ) -> Result<RunSummary> {
        sink.prepare(&self.registry)?;

        let registry = std::mem::take(&mut self.registry);
        let mut accumulator = Accumulator::new(registry, self.zone, &mut *sink);
        let outcome = self.walk(document, &mut accumulator);
        self.registry = accumulator.into_registry();
        let entries = outcome?;

        let summary = sink.summary();
        let total = summary.total();
        info!(
            "Loaded {} entries into {}: {} inserted, {} updated",
            entries, summary.destination, total.inserted, total.updated
        );
        Ok(summary)
    }

    /// Reports every walk event to an [`EventTrace`] instead of a sink.
    pub fn trace<N: ElementNode>(&self, document: &N) -> Result<EventTrace> {
        let mut trace = EventTrace::default();
        self.walk(document, &mut trace)?;
        Ok(trace)
    }

    fn walk<N: ElementNode, E: ListEvents>(&self, document: &N, events: &mut E) -> Result<usize> {
        let walker = ContextWalker::new(&self.config.known_lists);
        let globals = document_globals(document);

        let mut entries = 0;
        for list in self.order.list_names() {
            let count = walker.walk_list(document, list, &globals, events)?;
            debug!("{} entries in {}", count, list);
            entries += count;
        }
        events.finalize()?;
        Ok(entries)
    }
}

/// Compiles `config` and loads a single statement into `sink`.
pub fn load_statement<N: ElementNode, S: Sink + ?Sized>(
    config: LoaderConfig,
    document: &N,
    sink: &mut S,
) -> Result<RunSummary> {
    StatementLoader::new(config)?.run(document, sink)
}
