use crate::error::{LoaderError, Result};
use crate::mapping::MappingRow;
use crate::value::{TypeCode, Value};
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A fixed-length record, one slot per mapped destination column.
pub type Record = Vec<Value>;

/// Values of a record's primary-key columns, in key-column order. Null
/// components are valid key material.
pub type KeyTuple = Vec<Value>;

/// Where a source tag lands in a table's records.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSlot {
    pub position: usize,
    pub type_code: TypeCode,
}

/// Compiled layout of one destination table within one list.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    /// Column name -> record position, in appearance order.
    pub columns: IndexMap<String, usize>,
    /// Primary-key column name -> record position, in appearance order.
    pub primary_key: IndexMap<String, usize>,
    pub tags: HashMap<String, TagSlot>,
    blank: Record,
}

impl TableSchema {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    pub fn primary_key_names(&self) -> impl Iterator<Item = &str> {
        self.primary_key.keys().map(|s| s.as_str())
    }

    pub fn width(&self) -> usize {
        self.blank.len()
    }

    /// A fresh, privately owned copy of the all-null template.
    pub fn blank_record(&self) -> Record {
        self.blank.clone()
    }

    pub fn key_of(&self, record: &[Value]) -> KeyTuple {
        self.primary_key
            .values()
            .map(|&pos| record.get(pos).cloned().unwrap_or_default())
            .collect()
    }

    /// Slot for `tag`, falling back to the parent-qualified tag.
    pub fn slot_for(&self, tag: &str, qualified_tag: &str) -> Option<&TagSlot> {
        self.tags.get(tag).or_else(|| self.tags.get(qualified_tag))
    }
}

/// Per-table accumulation state for the list currently open.
#[derive(Debug)]
pub struct TableEntry {
    pub schema: Arc<TableSchema>,
    pub records: Vec<Record>,
    pub keys: Vec<KeyTuple>,
    seen: HashSet<KeyTuple>,
    current: Option<Record>,
}

impl TableEntry {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            records: Vec::new(),
            keys: Vec::new(),
            seen: HashSet::new(),
            current: None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.keys.clear();
        self.seen.clear();
        self.current = None;
    }

    pub(crate) fn open_record(&mut self) {
        self.current = Some(self.schema.blank_record());
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Record> {
        self.current.as_mut()
    }

    /// Appends the open record unless its key was already seen since the last
    /// clear. Returns whether the record was kept.
    pub(crate) fn close_record(&mut self) -> bool {
        let Some(record) = self.current.take() else {
            return false;
        };
        let key = self.schema.key_of(&record);
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.records.push(record);
        self.keys.push(key);
        true
    }
}

/// List name -> table name -> accumulation state, in processing order.
#[derive(Debug, Default)]
pub struct ListRegistry {
    lists: IndexMap<String, IndexMap<String, TableEntry>>,
}

impl ListRegistry {
    pub fn list_names(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(|s| s.as_str())
    }

    pub fn tables(&self, list: &str) -> Option<&IndexMap<String, TableEntry>> {
        self.lists.get(list)
    }

    pub(crate) fn tables_mut(&mut self, list: &str) -> Option<&mut IndexMap<String, TableEntry>> {
        self.lists.get_mut(list)
    }

    pub fn schema(&self, list: &str, table: &str) -> Option<&Arc<TableSchema>> {
        self.lists.get(list)?.get(table).map(|t| &t.schema)
    }

    /// Every (list, table schema) pair, in processing order.
    pub fn schemas(&self) -> impl Iterator<Item = (&str, &Arc<TableSchema>)> {
        self.lists.iter().flat_map(|(list, tables)| {
            tables
                .values()
                .map(move |entry| (list.as_str(), &entry.schema))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[derive(Default)]
struct SchemaBuilder {
    columns: IndexMap<String, usize>,
    primary_key: IndexMap<String, usize>,
    tags: HashMap<String, TagSlot>,
    blank: Record,
}

impl SchemaBuilder {
    fn add(&mut self, row: &MappingRow) -> Result<()> {
        let position = match self.columns.get(&row.column) {
            Some(&pos) => pos,
            None => {
                self.blank.push(Value::Null);
                let pos = self.blank.len() - 1;
                self.columns.insert(row.column.clone(), pos);
                pos
            }
        };

        if let Some(existing) = self.tags.get(&row.tag) {
            if existing.position != position {
                let first = self
                    .columns
                    .get_index(existing.position)
                    .map(|(name, _)| name.clone())
                    .unwrap_or_default();
                return Err(LoaderError::AmbiguousTag {
                    table: row.table.clone(),
                    tag: row.tag.clone(),
                    first,
                    second: row.column.clone(),
                });
            }
        }

        if let TypeCode::Other(code) = &row.type_code {
            warn!(
                "Column {}.{} has unsupported type category '{}'; its values will be null",
                row.table, row.column, code
            );
        }

        self.tags.insert(
            row.tag.clone(),
            TagSlot {
                position,
                type_code: row.type_code.clone(),
            },
        );
        if row.is_primary_key {
            self.primary_key.insert(row.column.clone(), position);
        }
        Ok(())
    }

    fn finish(self, name: &str) -> TableSchema {
        if self.primary_key.is_empty() {
            warn!(
                "Table {} has no primary key column; only the first entry of each list occurrence will be kept",
                name
            );
        }
        TableSchema {
            name: name.to_string(),
            columns: self.columns,
            primary_key: self.primary_key,
            tags: self.tags,
            blank: self.blank,
        }
    }
}

/// Consumes the ordered mapping rows once and builds the registry.
pub fn compile(rows: &[MappingRow]) -> Result<ListRegistry> {
    if rows.is_empty() {
        return Err(LoaderError::EmptyMapping);
    }

    let mut registry = ListRegistry::default();
    let mut tables: IndexMap<String, TableEntry> = IndexMap::new();
    let mut builder = SchemaBuilder::default();

    for row in rows {
        builder.add(row)?;

        if row.starts_new_table {
            let schema = std::mem::take(&mut builder).finish(&row.table);
            tables.insert(row.table.clone(), TableEntry::new(schema));
        }
        if row.starts_new_list {
            registry
                .lists
                .insert(row.list.clone(), std::mem::take(&mut tables));
        }
    }

    if !tables.is_empty() || !builder.columns.is_empty() {
        let last = rows.last().map(|r| r.describe()).unwrap_or_default();
        return Err(LoaderError::MalformedMappingRow {
            row: last,
            details: "last mapping row does not close its table and list".to_string(),
        });
    }

    info!(
        "Compiled mapping: {} lists, {} tables",
        registry.lists.len(),
        registry.lists.values().map(|t| t.len()).sum::<usize>()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::mark_boundaries;

    fn row(list: &str, table: &str, tag: &str, column: &str, code: &str, pk: bool) -> MappingRow {
        MappingRow {
            list: list.to_string(),
            table: table.to_string(),
            tag: tag.to_string(),
            column: column.to_string(),
            type_code: TypeCode::from(code),
            is_primary_key: pk,
            ordinal: 0,
            starts_new_table: false,
            starts_new_list: false,
        }
    }

    fn rows(mut rows: Vec<MappingRow>) -> Vec<MappingRow> {
        mark_boundaries(&mut rows);
        rows
    }

    #[test]
    fn test_blank_width_counts_distinct_columns() {
        let rows = rows(vec![
            row("BANKTRANLIST", "Transactions", "FITID", "Id", "S", true),
            row("BANKTRANLIST", "Transactions", "DTPOSTED", "Trade_Date", "DATE", false),
            row("BANKTRANLIST", "Transactions", "DTTRADE", "Trade_Date", "DATE", false),
            row("BANKTRANLIST", "Transactions", "TRNAMT", "Amount", "N", false),
            row("BANKTRANLIST", "Accounts", "ACCTID", "AcctId", "S", true),
            row("BANKTRANLIST", "Accounts", "FITID", "LastFitId", "S", false),
        ]);
        let registry = compile(&rows).unwrap();

        let txn = registry.schema("BANKTRANLIST", "Transactions").unwrap();
        assert_eq!(txn.width(), 3);
        assert_eq!(txn.blank_record(), vec![Value::Null; 3]);
        assert_eq!(txn.tags["DTTRADE"].position, 1);
        assert_eq!(txn.tags["TRNAMT"].type_code, TypeCode::Numeric);
        assert_eq!(txn.primary_key_names().collect::<Vec<_>>(), vec!["Id"]);

        // same tag, different tables
        let accounts = registry.schema("BANKTRANLIST", "Accounts").unwrap();
        assert_eq!(accounts.tags["FITID"].position, 1);
        assert_eq!(
            accounts.column_names().collect::<Vec<_>>(),
            vec!["AcctId", "LastFitId"]
        );
    }

    #[test]
    fn test_tag_mapped_twice_in_one_table() {
        let rows = rows(vec![
            row("BANKTRANLIST", "Transactions", "DTPOSTED", "Trade_Date", "D", false),
            row("BANKTRANLIST", "Transactions", "DTPOSTED", "Settle_Date", "D", false),
        ]);
        let err = compile(&rows).unwrap_err();
        assert!(matches!(err, LoaderError::AmbiguousTag { ref tag, .. } if tag == "DTPOSTED"));
    }

    #[test]
    fn test_lists_are_grouped() {
        let rows = rows(vec![
            row("SECLIST", "Securities", "UNIQUEID", "Cusip", "S", true),
            row("INVSTMTRS/INVPOSLIST", "Positions", "UNIQUEID", "Cusip", "S", true),
            row("INVSTMTRS/INVPOSLIST", "Positions", "UNITS", "Units", "N", false),
        ]);
        let registry = compile(&rows).unwrap();
        assert_eq!(
            registry.list_names().collect::<Vec<_>>(),
            vec!["SECLIST", "INVSTMTRS/INVPOSLIST"]
        );
        assert_eq!(registry.schemas().count(), 2);
    }

    #[test]
    fn test_unclosed_table_is_rejected() {
        let rows = vec![row("SECLIST", "Securities", "UNIQUEID", "Cusip", "S", true)];
        assert!(matches!(
            compile(&rows),
            Err(LoaderError::MalformedMappingRow { .. })
        ));
        assert!(matches!(compile(&[]), Err(LoaderError::EmptyMapping)));
    }

    #[test]
    fn test_table_without_key_keeps_one_record_per_occurrence() {
        let rows = rows(vec![row("BANKTRANLIST", "Transactions", "FITID", "Id", "S", false)]);
        let mut registry = compile(&rows).unwrap();
        let entry = registry
            .tables_mut("BANKTRANLIST")
            .unwrap()
            .get_mut("Transactions")
            .unwrap();
        assert_eq!(entry.schema.primary_key_names().count(), 0);

        for id in ["1", "2"] {
            entry.open_record();
            entry.current_mut().unwrap()[0] = Value::Text(id.to_string());
            entry.close_record();
        }
        assert_eq!(entry.records, vec![vec![Value::Text("1".to_string())]]);
        assert_eq!(entry.keys, vec![KeyTuple::new()]);
    }

    #[test]
    fn test_records_never_alias_the_template() {
        let rows = rows(vec![row("SECLIST", "Securities", "UNIQUEID", "Cusip", "S", true)]);
        let mut registry = compile(&rows).unwrap();
        let entry = registry
            .tables_mut("SECLIST")
            .unwrap()
            .get_mut("Securities")
            .unwrap();

        entry.open_record();
        entry.current_mut().unwrap()[0] = Value::Text("037833100".to_string());
        assert!(entry.close_record());
        assert_eq!(entry.schema.blank_record(), vec![Value::Null]);

        entry.open_record();
        entry.current_mut().unwrap()[0] = Value::Text("037833100".to_string());
        assert!(!entry.close_record());
        assert_eq!(entry.records.len(), 1);
        assert_eq!(entry.keys, vec![vec![Value::Text("037833100".to_string())]]);
    }
}
