use thiserror::Error;

use crate::activity::ValueKind;

/// The five error kinds surfaced by this crate, plus enumeration exhaustion.
///
/// `EndOfEnumeration` is caught internally by [`crate::scan::ParameterScan`]
/// and converted into a halt condition; it should never reach a caller of
/// [`crate::algorithm::Algorithm::optimize`].
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{operation} is not defined for value kind {kind}")]
    UnsupportedKind {
        operation: &'static str,
        kind: ValueKind,
    },

    #[error("grammar error at byte {offset} of {input:?}: {message}")]
    GrammarError {
        offset: usize,
        input: String,
        message: String,
    },

    #[error("state violation: {0}")]
    StateViolation(String),

    #[error("resource error: {0}")]
    ResourceError(String),

    #[error("parameter enumeration exhausted")]
    EndOfEnumeration,
}

pub type MetaResult<T> = Result<T, MetaError>;
