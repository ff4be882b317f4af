use thiserror::Error;

#[derive(Debug, Error)]
pub enum SautoError {
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{device} protocol error: {reason}")]
    Protocol { device: &'static str, reason: String },

    #[error("{device} rejected command '{command}'")]
    Rejected {
        device: &'static str,
        command: String,
    },

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("{table} row with id {id} not found")]
    RowNotFound { table: &'static str, id: i64 },

    #[error("no vendor matches {0}")]
    VendorNotFound(String),

    #[error("inventory error: {0}")]
    Inventory(String),

    #[error("resource not available after {waited_secs}s: {resource}")]
    ResourceTimeout { resource: String, waited_secs: u64 },

    #[error("no sync found for vendor {vendor}: {reason}")]
    NoSync { vendor: String, reason: String },

    #[error("vendor {vendor} needs {value:.1} dB, below the minimum attenuation")]
    ExceedMinimumAttenuation { vendor: String, value: f64 },

    #[error("radio balance check failed for {name}: {difference:.1} dB apart")]
    Unbalanced { name: String, difference: f64 },

    #[error("LSU could not decode cell {0}")]
    SignalNotDecoded(u32),

    #[error("cell {cell} configuration failed: {reason}")]
    CellConfig { cell: u32, reason: String },

    #[error("command `{command}` failed: {reason}")]
    Shell { command: String, reason: String },

    #[error("required tool not found on PATH: {0}")]
    ToolMissing(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, SautoError>;
