
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Failures of the model contract operations.
///
/// Every operation is deterministic given its inputs and the state of the
/// shared random source, so none of these is transient. A `Validation` or
/// `Domain` error is fatal for the offending call only, never for the
/// process.
#[derive( Debug, Error )]
pub enum ModelError {
    /// Hyperparameters violate the family's domain
    #[error( "invalid hyperparameters for {family}: {reason}" )]
    Validation { family: &'static str, reason: String },

    /// A value lies outside the support of the family
    #[error( "value outside the support of {family}: {reason}" )]
    Domain { family: &'static str, reason: String },

    /// An operation was called on statistics that cannot satisfy it,
    /// e.g. removing a value that was never added
    #[error( "precondition violated for {family}: {reason}" )]
    Precondition { family: &'static str, reason: String },

    /// A load record does not deserialize into the expected shape
    #[error( "malformed record: {0}" )]
    Record( #[from] serde_json::Error ),
}

impl ModelError {
    pub fn validation( family: &'static str, reason: String ) -> ModelError {
	ModelError::Validation { family, reason }
    }

    pub fn domain( family: &'static str, reason: String ) -> ModelError {
	ModelError::Domain { family, reason }
    }

    pub fn precondition( family: &'static str, reason: String ) -> ModelError {
	ModelError::Precondition { family, reason }
    }
}
