use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Mapping source is empty: no rows to compile")]
    EmptyMapping,

    #[error("Mapping item ({row}) is malformed: {details}")]
    MalformedMappingRow { row: String, details: String },

    #[error("For mapping item ({row}): no table named {table} in configuration")]
    UnknownTable { row: String, table: String },

    #[error("For mapping item ({row}): no column {column} in table {table}")]
    UnknownColumn {
        row: String,
        table: String,
        column: String,
    },

    #[error("Tag {tag} is mapped to both {first} and {second} in table {table}")]
    AmbiguousTag {
        table: String,
        tag: String,
        first: String,
        second: String,
    },

    #[error("Unknown time zone '{0}': expected an IANA zone name such as America/New_York")]
    UnknownTimeZone(String),

    #[error("Foreign key cycle prevents ordering: {0}")]
    DependencyCycle(String),

    #[error("Failed to create unique index for table {table}: {details}")]
    IndexBuildFailed { table: String, details: String },

    #[error("Table {0} has no usable primary key for merge classification")]
    MissingPrimaryKey(String),

    #[error("Key index for table {0} was read before its build was started")]
    IndexNotReady(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LoaderError {
    /// Configuration errors are fatal to the run and always name the
    /// offending row, table or column.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(
            self,
            LoaderError::Csv(_) | LoaderError::SerializationError(_) | LoaderError::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
