use thiserror::Error;

use crate::models::AttachmentKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by repositories, services and transports.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    Validation(String),

    /// A declared message type requires an attachment collection that is missing or empty.
    #[error("{0} is empty or null")]
    Empty(AttachmentKind),

    /// An attachment row could not be written.
    #[error("failed to upload {0}")]
    UploadFailed(AttachmentKind),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("temporary failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream rejected request: {0}")]
    UpstreamPermanent(String),

    /// Work abandoned because a sibling branch failed first.
    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(what: impl std::fmt::Display) -> Self {
        Self::Internal(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Errors that fail the overall call but must not cancel sibling branches.
    pub fn spares_siblings(&self) -> bool {
        matches!(self, Self::UploadFailed(_))
    }
}

/// Turns a NotFound into an empty value; every other error passes through.
pub fn absorb_not_found<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(Error::NotFound(_)) => Ok(T::default()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_absorbed_as_empty() {
        let r: Result<Vec<i64>> = Err(Error::not_found("media"));
        assert!(absorb_not_found(r).unwrap().is_empty());
    }

    #[test]
    fn other_errors_are_kept() {
        let r: Result<Vec<i64>> = Err(Error::UpstreamTransient("db down".into()));
        assert!(matches!(absorb_not_found(r), Err(Error::UpstreamTransient(_))));
    }

    #[test]
    fn empty_message_names_the_collection() {
        assert_eq!(Error::Empty(AttachmentKind::Media).to_string(), "media is empty or null");
    }
}
