use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Invalid unit key: {0:?}")]
    InvalidKey(String),

    #[error("Cannot parse amount {raw:?} for unit '{unit}': {reason}")]
    NumericParse {
        unit: String,
        raw: String,
        reason: String,
    },

    #[error("Organizational hierarchy contains a cycle through node '{0}'")]
    CyclicHierarchy(String),

    #[error("Policy configuration is missing required field: {0}")]
    MissingPolicyConfig(&'static str),

    #[error("Invalid policy configuration: {0}")]
    InvalidPolicy(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Node '{node}' references unknown parent '{parent}'")]
    UnknownParent { node: String, parent: String },

    #[error("Dynamic node '{node}' is anchored to '{anchor}', which is not one of its ancestors")]
    InvalidDynamicAnchor { node: String, anchor: String },

    #[error("Duplicate node id '{0}' in organizational hierarchy")]
    DuplicateNodeId(String),

    #[error("Organizational hierarchy root not found: {0}")]
    RootNotFound(String),

    #[error("Rollup integrity violation at '{node}': rolled up {rolled_up} but drawn units sum to {expected}")]
    IntegrityViolation {
        node: String,
        rolled_up: String,
        expected: String,
    },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RollupError>;
