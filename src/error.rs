//! Error taxonomy for trust engine operations
//!
//! Every caller-visible failure aborts the operation before any state change.
//! Side-channel failures (history, accountability) are logged, never returned.

use thiserror::Error;

use crate::vouch::{VouchStatus, VouchType};

pub type TrustResult<T> = Result<T, TrustError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrustError {
    /// Malformed input, rejected before touching the store
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("a user cannot vouch for themselves")]
    SelfVouch,

    /// An open vouch of the same type already links voucher and vouchee
    #[error("an open {vouch_type} vouch from {voucher_id} to {vouchee_id} already exists")]
    DuplicateRequest {
        voucher_id: String,
        vouchee_id: String,
        vouch_type: VouchType,
    },

    /// The vouchee already holds the maximum number of active vouches of this type
    #[error("{vouch_type} vouch limit of {max} reached")]
    LimitExceeded { vouch_type: VouchType, max: usize },

    #[error("cannot {action} a vouch in status {from}")]
    InvalidStateTransition { from: VouchStatus, action: String },

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl TrustError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        TrustError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_transition(from: VouchStatus, action: impl Into<String>) -> Self {
        TrustError::InvalidStateTransition {
            from,
            action: action.into(),
        }
    }

    /// Errors caused by infrastructure rather than by the request itself
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, TrustError::Storage(_) | TrustError::Timeout(_))
    }
}

impl From<sqlx::Error> for TrustError {
    fn from(e: sqlx::Error) -> Self {
        TrustError::Storage(e.to_string())
    }
}
