//! Processor client error types

use crate::processors::types::ProcessorKind;

/// Errors from a payment-processor call. Every variant counts as a
/// delivery failure: the dispatch engine logs it and moves to the next
/// candidate or the retry schedule, never surfacing it to the client.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{processor}: request failed: {message}")]
    Network {
        processor: ProcessorKind,
        message: String,
    },

    #[error("{processor}: rejected with HTTP {status}")]
    Rejected {
        processor: ProcessorKind,
        status: u16,
    },

    #[error("{processor}: deadline exceeded")]
    DeadlineExceeded { processor: ProcessorKind },
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_owning_processor() {
        let err = ProcessorError::Rejected {
            processor: ProcessorKind::Default,
            status: 500,
        };
        assert_eq!(err.to_string(), "default: rejected with HTTP 500");

        let err = ProcessorError::DeadlineExceeded {
            processor: ProcessorKind::Fallback,
        };
        assert_eq!(err.to_string(), "fallback: deadline exceeded");
    }
}
