/// Top-level Cartograph error type.
///
/// All fallible operations in `cartograph-core` return
/// [`Result<T, CartographError>`](Result). Each variant wraps a
/// domain-specific error enum so callers can match on the source.
#[derive(thiserror::Error, Debug)]
pub enum CartographError {
    /// Error from the versioned graph store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A pipeline stage failed.
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// Error reading repository history.
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Error from the SQLite run ledger.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Error writing documentation artifacts.
    #[error("Documentation error: {0}")]
    Docs(#[from] DocsError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error constructing an agent gateway.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Knowledge graph invariant violation.
    #[error("Graph error: {0}")]
    Graph(#[from] cartograph_graph::GraphError),
}

/// Errors from the filesystem-backed graph store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A requested archive version does not exist.
    #[error("Graph version not found: v{0}")]
    VersionNotFound(u64),

    /// Filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot JSON could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted artifact is structurally invalid.
    #[error("Corrupt artifact {path}: {message}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// What was wrong with it.
        message: String,
    },
}

/// Errors raised by a pipeline stage.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    /// The agent could not be invoked or did not finish.
    #[error("Agent transport failure ({reason}): {detail}")]
    Transport {
        /// `process_error` or `timeout`.
        reason: String,
        /// Diagnostic text from the gateway.
        detail: String,
    },

    /// The agent answered but the answer was unusable and strict mode is on.
    #[error("Unusable agent output: {0}")]
    Content(String),

    /// The stage output could not be persisted.
    #[error("Persist failed: {0}")]
    Persist(String),

    /// The stage's own input (repository history, source tree) was unreadable.
    #[error("Input unavailable: {0}")]
    Input(String),
}

/// Errors while reading repository history.
#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    /// Git operation failed (open, rev-parse, diff, etc.).
    #[error("Git error: {0}")]
    Git(String),

    /// The requested branch or ref does not resolve.
    #[error("Unknown ref: {0}")]
    UnknownRef(String),
}

/// Errors from the SQLite-backed run ledger.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored run report could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The ledger directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the documentation sink.
#[derive(thiserror::Error, Debug)]
pub enum DocsError {
    /// Path is absolute or escapes the documentation root.
    #[error("Invalid documentation path: {0}")]
    InvalidPath(String),

    /// Filesystem I/O error writing documentation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in Cartograph configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors constructing an agent gateway.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// Agent configuration is missing or invalid (API key, command, etc.).
    #[error("Agent configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, CartographError>`.
pub type Result<T> = std::result::Result<T, CartographError>;
