use crate::dependency::ProcessingOrder;
use crate::error::{LoaderError, Result};
use crate::schema::{list_tag, LoaderConfig, MappingEntry};
use crate::value::TypeCode;

/// One fully-resolved tag-to-column mapping, in compiler order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRow {
    pub list: String,
    pub table: String,
    pub tag: String,
    pub column: String,
    pub type_code: TypeCode,
    pub is_primary_key: bool,
    pub ordinal: usize,
    /// Set on the last row of a table group: the next row starts a new table.
    pub starts_new_table: bool,
    /// Set on the last row of a list group: the next row starts a new list.
    pub starts_new_list: bool,
}

impl MappingRow {
    pub fn describe(&self) -> String {
        format!("{}, {}, {}, {}", self.list, self.table, self.tag, self.column)
    }
}

struct Resolved<'a> {
    entry: &'a MappingEntry,
    type_code: TypeCode,
    is_primary_key: bool,
    ordinal: usize,
    rank: (usize, usize),
}

/// Resolves configured mapping rows against the table metadata and returns
/// them sorted by list, table, ordinal and tag, with boundary flags set.
pub fn normalize_mapping(config: &LoaderConfig, order: &ProcessingOrder) -> Result<Vec<MappingRow>> {
    if config.mapping.is_empty() {
        return Err(LoaderError::EmptyMapping);
    }

    let mut resolved = Vec::with_capacity(config.mapping.len());
    for entry in &config.mapping {
        if !config.is_known_list(list_tag(&entry.list)) {
            return Err(LoaderError::MalformedMappingRow {
                row: entry.to_string(),
                details: format!(
                    "list '{}' does not end in a known list ({})",
                    entry.list,
                    config.known_lists.join(", ")
                ),
            });
        }

        let (type_code, is_primary_key, ordinal) = resolve_column(config, entry)?;
        let rank = (
            order.list_rank(&entry.list).unwrap_or(usize::MAX),
            order
                .table_rank(&entry.list, &entry.table)
                .unwrap_or(usize::MAX),
        );
        resolved.push(Resolved {
            entry,
            type_code,
            is_primary_key,
            ordinal,
            rank,
        });
    }

    resolved.sort_by(|a, b| {
        (a.rank, a.ordinal, &a.entry.tag, &a.entry.column).cmp(&(
            b.rank,
            b.ordinal,
            &b.entry.tag,
            &b.entry.column,
        ))
    });

    let mut rows: Vec<MappingRow> = resolved
        .into_iter()
        .map(|r| MappingRow {
            list: r.entry.list.clone(),
            table: r.entry.table.clone(),
            tag: r.entry.tag.clone(),
            column: r.entry.column.clone(),
            type_code: r.type_code,
            is_primary_key: r.is_primary_key,
            ordinal: r.ordinal,
            starts_new_table: false,
            starts_new_list: false,
        })
        .collect();

    mark_boundaries(&mut rows);
    Ok(rows)
}

fn resolve_column(config: &LoaderConfig, entry: &MappingEntry) -> Result<(TypeCode, bool, usize)> {
    let table = config.table(&entry.table);

    if let Some(described) = &entry.described {
        if let Some(table) = table {
            if table.column_ordinal(&entry.column).is_none() {
                return Err(unknown_column(entry));
            }
        }
        return Ok((
            described.type_code.clone(),
            described.is_primary_key,
            described.ordinal,
        ));
    }

    let table = table.ok_or_else(|| LoaderError::UnknownTable {
        row: entry.to_string(),
        table: entry.table.clone(),
    })?;
    let ordinal = table
        .column_ordinal(&entry.column)
        .ok_or_else(|| unknown_column(entry))?;
    let column = &table.columns[ordinal];

    Ok((column.type_code.clone(), column.primary_key, ordinal))
}

fn unknown_column(entry: &MappingEntry) -> LoaderError {
    LoaderError::UnknownColumn {
        row: entry.to_string(),
        table: entry.table.clone(),
        column: entry.column.clone(),
    }
}

/// Boundary flags are inferred from adjacency in the sorted rows.
pub fn mark_boundaries(rows: &mut [MappingRow]) {
    for i in 0..rows.len() {
        let (new_table, new_list) = match rows.get(i + 1) {
            Some(next) => {
                let new_list = next.list != rows[i].list;
                (new_list || next.table != rows[i].table, new_list)
            }
            None => (true, true),
        };
        rows[i].starts_new_table = new_table;
        rows[i].starts_new_list = new_list;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyGraph;

    fn config(json: &str) -> LoaderConfig {
        LoaderConfig::from_json_str(json).unwrap()
    }

    fn normalize(config: &LoaderConfig) -> Result<Vec<MappingRow>> {
        let order = DependencyGraph::from_config(config).order()?;
        normalize_mapping(config, &order)
    }

    const TABLES: &str = r#"
        "tables": [
            {"name": "Transactions", "columns": [
                {"name": "Id", "type": "S", "primary_key": true},
                {"name": "Trade_Date", "type": "DATE"},
                {"name": "Amount", "type": "N"}
            ]},
            {"name": "Accounts", "columns": [
                {"name": "AcctId", "type": "S", "primary_key": true},
                {"name": "Currency", "type": "S"}
            ]}
        ]"#;

    #[test]
    fn test_rows_are_sorted_and_flagged() {
        let cfg = config(&format!(
            r#"{{"mapping": [
                ["BANKTRANLIST", "Transactions", "TRNAMT", "Amount"],
                ["BANKTRANLIST", "Transactions", "FITID", "Id"],
                ["BANKTRANLIST", "Accounts", "ACCTID", "AcctId"],
                ["BANKTRANLIST", "Transactions", "DTPOSTED", "Trade_Date"],
                ["BANKTRANLIST", "Transactions", "DTTRADE", "Trade_Date"],
                ["SECLIST", "Accounts", "CURDEF", "Currency"]
            ], {}}}"#,
            TABLES
        ));
        let rows = normalize(&cfg).unwrap();
        let tags: Vec<&str> = rows.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec!["FITID", "DTPOSTED", "DTTRADE", "TRNAMT", "ACCTID", "CURDEF"]
        );

        let flags: Vec<(bool, bool)> = rows
            .iter()
            .map(|r| (r.starts_new_table, r.starts_new_list))
            .collect();
        assert_eq!(
            flags,
            vec![
                (false, false),
                (false, false),
                (false, false),
                (true, false),
                (true, true),
                (true, true)
            ]
        );

        assert!(rows[0].is_primary_key);
        assert_eq!(rows[1].type_code, TypeCode::Date);
        assert_eq!(rows[3].ordinal, 2);
    }

    #[test]
    fn test_unknown_table_and_column_name_the_row() {
        let cfg = config(&format!(
            r#"{{"mapping": [["SECLIST", "Securities", "UNIQUEID", "Id"]], {}}}"#,
            TABLES
        ));
        let err = normalize(&cfg).unwrap_err();
        assert!(matches!(err, LoaderError::UnknownTable { .. }));
        assert!(err.to_string().contains("SECLIST, Securities, UNIQUEID, Id"));

        let cfg = config(&format!(
            r#"{{"mapping": [["SECLIST", "Accounts", "UNIQUEID", "Cusip"]], {}}}"#,
            TABLES
        ));
        let err = normalize(&cfg).unwrap_err();
        assert!(matches!(err, LoaderError::UnknownColumn { ref column, .. } if column == "Cusip"));
    }

    #[test]
    fn test_empty_mapping_and_unknown_list() {
        let cfg = config(r#"{"mapping": []}"#);
        assert!(matches!(normalize(&cfg), Err(LoaderError::EmptyMapping)));

        let cfg = config(&format!(
            r#"{{"mapping": [["STMTRS/NOTALIST", "Accounts", "ACCTID", "AcctId"]], {}}}"#,
            TABLES
        ));
        assert!(matches!(
            normalize(&cfg),
            Err(LoaderError::MalformedMappingRow { .. })
        ));
    }

    #[test]
    fn test_described_rows_need_no_table_definition() {
        let cfg = config(
            r#"{"mapping": [
                ["SECLIST", "Securities", "TICKER", "Ticker", "S", "", "1"],
                ["SECLIST", "Securities", "UNIQUEID", "Cusip", "S", "PK", "0"]
            ]}"#,
        );
        let rows = normalize(&cfg).unwrap();
        assert_eq!(rows[0].column, "Cusip");
        assert!(rows[0].is_primary_key);
        assert!(!rows[1].is_primary_key);
        assert!(rows[1].starts_new_list);
    }

    #[test]
    fn test_described_row_must_match_defined_table() {
        let cfg = config(&format!(
            r#"{{"mapping": [["SECLIST", "Accounts", "CURDEF", "Cur", "S", "", "1"]], {}}}"#,
            TABLES
        ));
        let err = normalize(&cfg).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::UnknownColumn { ref table, ref column, .. }
                if table == "Accounts" && column == "Cur"
        ));
        assert!(err.is_configuration_error());
    }
}
