//! Error types with actionable hints.
//!
//! Every error in the core is local-recoverable: transport failures are
//! logged by the bus, config and fixture errors stop a host before it starts. Each
//! variant carries a suggestion so hosts can print something useful.

use std::path::PathBuf;

use thiserror::Error;

use crate::context::ContextKind;
use crate::dom::ElementHandle;

/// A remote delivery attempt failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No peer for the addressed context is reachable.
    #[error("no reachable {0} context")]
    Unreachable(ContextKind),

    /// The underlying channel was closed by the other side.
    #[error("transport closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn suggestion(&self) -> &'static str {
        match self {
            TransportError::Unreachable(_) => {
                "The addressed context is not running; messages to it are dropped until it connects"
            }
            TransportError::Closed => "Reconnect the context to the relay",
            TransportError::Encode(_) => "This is an internal error. Please report it if it persists.",
            TransportError::Io(_) => "Check that the relay is running with 'plumbline relay'",
        }
    }
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn suggestion(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "Check the --config path exists and is readable",
            ConfigError::Parse(_) => "The config file must be a JSON object; unknown fields are rejected",
            ConfigError::Invalid(_) => "Fix the named field or remove it to use the default",
        }
    }
}

/// A document fixture does not describe a tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("duplicate node {0}")]
    DuplicateNode(ElementHandle),

    #[error("node {node} names missing parent {parent}")]
    MissingParent {
        node: ElementHandle,
        parent: ElementHandle,
    },

    #[error("node {0} is its own ancestor")]
    ParentCycle(ElementHandle),
}

impl DocumentError {
    pub fn suggestion(&self) -> &'static str {
        match self {
            DocumentError::DuplicateNode(_) => "Give every node a unique id",
            DocumentError::MissingParent { .. } => "Add the parent node or drop the parent field",
            DocumentError::ParentCycle(_) => "Parent links must form a tree; break the loop",
        }
    }
}
