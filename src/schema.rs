use crate::error::{LoaderError, Result};
use crate::value::TypeCode;
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_TIME_ZONE: &str = "America/New_York";

/// The list wrappers defined by the statement format. Their contents are
/// entries, never nearby context.
pub const KNOWN_LISTS: [&str; 8] = [
    "SECLIST",
    "INVPOSLIST",
    "INVTRANLIST",
    "BANKTRANLIST",
    "BANKTRANLISTP",
    "LOANTRANLIST",
    "AMRTTRANLIST",
    "CLOSING",
];

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_known_lists() -> Vec<String> {
    KNOWN_LISTS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoaderConfig {
    #[serde(default = "default_time_zone")]
    #[schemars(
        description = "IANA time zone every timestamp is converted to before it is stored (e.g. 'America/New_York')."
    )]
    pub time_zone: String,

    #[serde(default = "default_known_lists")]
    #[schemars(
        description = "List-wrapper tags. The nearby-context walk never descends into these elements."
    )]
    pub known_lists: Vec<String>,

    #[schemars(
        description = "Ordered mapping rows: [list, table, tag, column] or [list, table, tag, column, type, is_pk, ordinal]. The list is a '/'-separated tag path ending in a list wrapper, e.g. 'INVSTMTRS/INVTRANLIST'."
    )]
    pub mapping: Vec<MappingEntry>,

    #[serde(default)]
    #[schemars(description = "Destination table metadata referenced by the mapping rows.")]
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableDefinition {
    #[schemars(description = "Destination table, worksheet or file name.")]
    pub name: String,

    #[schemars(description = "Columns in destination order.")]
    pub columns: Vec<ColumnDefinition>,

    #[serde(default)]
    #[schemars(
        description = "Tables this table holds foreign keys to. Referenced tables are always written first."
    )]
    pub references: Vec<String>,
}

impl TableDefinition {
    pub fn column_ordinal(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(rename = "type", default = "default_type_code")]
    #[schemars(
        with = "String",
        description = "Type category: S (text), E (enum), N (numeric), B (boolean), D (timestamp) or DATE."
    )]
    pub type_code: TypeCode,

    #[serde(default)]
    pub primary_key: bool,
}

fn default_type_code() -> TypeCode {
    TypeCode::Text
}

/// One configured mapping row, in either of the two accepted shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct MappingEntry {
    pub list: String,
    pub table: String,
    pub tag: String,
    pub column: String,
    /// Present only in the self-describing seven-field shape.
    pub described: Option<ColumnDescription>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub type_code: TypeCode,
    pub is_primary_key: bool,
    pub ordinal: usize,
}

impl MappingEntry {
    pub fn new(list: &str, table: &str, tag: &str, column: &str) -> Self {
        Self {
            list: list.to_string(),
            table: table.to_string(),
            tag: tag.to_string(),
            column: column.to_string(),
            described: None,
        }
    }

    pub fn described(
        list: &str,
        table: &str,
        tag: &str,
        column: &str,
        type_code: TypeCode,
        is_primary_key: bool,
        ordinal: usize,
    ) -> Self {
        Self {
            described: Some(ColumnDescription {
                type_code,
                is_primary_key,
                ordinal,
            }),
            ..Self::new(list, table, tag, column)
        }
    }
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}, {}", self.list, self.table, self.tag, self.column)
    }
}

impl JsonSchema for MappingEntry {
    fn schema_name() -> String {
        "MappingEntry".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <Vec<String>>::json_schema(gen)
    }
}

impl TryFrom<Vec<String>> for MappingEntry {
    type Error = String;

    fn try_from(fields: Vec<String>) -> std::result::Result<Self, Self::Error> {
        let fields: Vec<String> = fields.into_iter().map(|f| f.trim().to_string()).collect();
        match fields.as_slice() {
            [list, table, tag, column] => Ok(MappingEntry::new(list, table, tag, column)),
            [list, table, tag, column, type_code, is_pk, ordinal] => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    format!(
                        "Mapping item ({}) - ordinal '{}' is not a number",
                        fields.join(", "),
                        ordinal
                    )
                })?;
                let is_pk = matches!(
                    is_pk.to_ascii_uppercase().as_str(),
                    "PK" | "Y" | "YES" | "T" | "TRUE" | "1"
                );
                Ok(MappingEntry::described(
                    list,
                    table,
                    tag,
                    column,
                    TypeCode::from(type_code.as_str()),
                    is_pk,
                    ordinal,
                ))
            }
            _ => Err(format!(
                "Mapping item ({}) - should have 4 or 7 comma-separated items",
                fields.join(", ")
            )),
        }
    }
}

impl From<MappingEntry> for Vec<String> {
    fn from(entry: MappingEntry) -> Self {
        let mut fields = vec![entry.list, entry.table, entry.tag, entry.column];
        if let Some(d) = entry.described {
            fields.push(d.type_code.to_string());
            fields.push(if d.is_primary_key { "PK" } else { "" }.to_string());
            fields.push(d.ordinal.to_string());
        }
        fields
    }
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn target_zone(&self) -> Result<Tz> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| LoaderError::UnknownTimeZone(self.time_zone.clone()))
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_known_list(&self, tag: &str) -> bool {
        self.known_lists.iter().any(|l| l == tag)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(LoaderConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// The final path segment of a list name: `INVSTMTRS/INVTRANLIST` -> `INVTRANLIST`.
pub fn list_tag(list: &str) -> &str {
    list.rsplit('/').next().unwrap_or(list)
}
