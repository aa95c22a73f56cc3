/// Top-level chainstat error type.
///
/// All fallible operations in `chainstat-core` return
/// [`Result<T, ChainstatError>`](Result). Each variant wraps a domain-specific
/// error enum, allowing callers to match on the error source without losing
/// type information.
///
/// Entity-level upstream failures (a single build missing or unreachable) are
/// *not* errors at this level: the chain walker absorbs them into partial
/// results. What reaches callers here is structural: store integrity
/// violations, interner misuse, configuration problems, and connection
/// construction failures.
#[derive(thiserror::Error, Debug)]
pub enum ChainstatError {
    /// Error from the build store layer (`SQLite` operations, integrity).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error talking to the upstream CI server.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Error from the connection cache (handle construction).
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Error from the string interner (unknown code — programming error).
    #[error("Interner error: {0}")]
    Intern(#[from] InternError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from the build store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A different record already exists for this build id.
    ///
    /// Finished builds are immutable; a conflicting re-insert indicates
    /// upstream data corruption or id reuse and must never be swallowed.
    #[error("Conflicting record for build {build_id}: finished builds are immutable")]
    Conflict {
        /// The build id with two non-identical records.
        build_id: i32,
    },

    /// JSON serialization/deserialization of record payloads failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the upstream CI REST client.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// The requested entity does not exist upstream (terminal for the entity).
    #[error("Build {0} not found on upstream server")]
    NotFound(i32),

    /// Transient network/service failure, surfaced after the retry budget
    /// is exhausted. Treated like `NotFound` at the chain level.
    #[error("Upstream transient failure: {0}")]
    Transient(String),

    /// Authentication rejected by the upstream server. Never retried.
    #[error("Upstream authentication rejected: {0}")]
    Auth(String),

    /// Non-retryable HTTP failure (unexpected status, malformed payload).
    #[error("Upstream API error: {0}")]
    Api(String),
}

/// Errors from connection-handle construction.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    /// Handle construction failed. The failure reached every waiter of the
    /// single-flight attempt; the slot is cleared so the next caller retries.
    #[error("Server handle construction failed: {0}")]
    Construction(String),
}

/// Errors from the string interner.
#[derive(thiserror::Error, Debug)]
pub enum InternError {
    /// The code was never produced by this table. Indicates a record from a
    /// foreign interner or a corrupted store — a programming error, fatal.
    #[error("Unknown string code: {0}")]
    UnknownCode(u32),
}

/// Errors in chainstat configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),

    /// A server code is not declared in the configuration.
    #[error("Unknown server code: {0}")]
    UnknownServer(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Convenience alias for `Result<T, ChainstatError>`.
pub type Result<T> = std::result::Result<T, ChainstatError>;
