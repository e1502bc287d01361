use thiserror::Error;

/// Result alias for engine operations.
pub type LineageResult<T> = Result<T, LineageError>;

#[derive(Error, Debug)]
pub enum LineageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    InvalidConfig(String),

    #[error("{0} is mandatory")]
    MissingArgument(&'static str),

    #[error("no matching {kind} for {request}")]
    NotFound { kind: &'static str, request: String },

    #[error("multiple {kind}s are matching {request}:\n{candidates}Please use the full {kind} path.")]
    Ambiguous {
        kind: &'static str,
        request: String,
        candidates: String,
    },

    #[error("cannot remove current state: {0}")]
    CannotRemoveCurrent(String),

    #[error("one or multiple manually cloned datasets should be removed first.\n{0}Please use \"zfs destroy\" to remove them manually.")]
    ExternalClones(String),

    #[error("user states are linked to system states:\n{0}")]
    LinkedToSystem(String),

    #[error("cannot collect user states attached to this state:\n{0}")]
    BlockedUserStates(String),

    #[error("couldn't update the {property} property of {dataset}: {source}")]
    PropertySetFailed {
        property: &'static str,
        dataset: String,
        #[source]
        source: Box<LineageError>,
    },

    #[error("couldn't destroy {name}: {source}")]
    DestroyFailed {
        name: String,
        #[source]
        source: Box<LineageError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("zfs binding error: {0}")]
    Binding(String),
}
