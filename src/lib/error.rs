use thiserror::Error;

use crate::client::ApiError;

/// Errors surfaced to the autoscaling control loop.
///
/// Remote failures are passed through verbatim so the loop can decide
/// how to react (back off, retry next cycle). Precondition violations
/// are detected locally, before any remote call is attempted.
#[derive(Debug, Error)]
pub enum CloudProviderError {
    /// The adapter configuration is unusable. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A remote API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("node with id {0:?} does not exist")]
    NodeNotFound(String),

    #[error("node group with id {0:?} does not exist")]
    NodeGroupNotFound(String),

    #[error("delta must be positive, have: {0}")]
    DeltaNotPositive(i32),

    #[error("delta must be negative, have: {0}")]
    DeltaNotNegative(i32),

    #[error("size increase is too large. current: {current} desired: {desired} max: {max}")]
    SizeIncreaseTooLarge {
        current: i32,
        desired: i32,
        max: i32,
    },

    #[error(
        "size decrease is too large. current: {current} desired: {desired} existing nodes: {existing}"
    )]
    SizeDecreaseTooLarge {
        current: i32,
        desired: i32,
        existing: i32,
    },

    /// The node named in a delete request is not a member of the group.
    #[error("node {node:?} does not belong to node group {group:?}")]
    NotMember { node: String, group: String },

    /// Optional capability this provider does not offer. Callers must
    /// treat this as "skip the feature", not as a failure.
    #[error("not implemented")]
    NotImplemented,
}
