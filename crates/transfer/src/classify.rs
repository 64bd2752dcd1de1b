//! Maps raw backend error codes onto [`TransferError`].

use std::collections::HashMap;

use crate::backend::RawError;
use crate::{ErrorKind, TransferError};

/// Well-known raw error codes.
///
/// Backends are free to report other codes; those classify as
/// [`TransferError::Unknown`] unless the table is extended.
pub mod codes {
    /// Failure reported without an error payload.
    pub const UNSPECIFIED: i64 = 0;
    pub const UNAUTHENTICATED: i64 = 401;
    pub const UNAUTHORIZED: i64 = 403;
    pub const OBJECT_NOT_FOUND: i64 = 404;
    pub const CHECKSUM_MISMATCH: i64 = 422;
    pub const CANCELLED: i64 = 499;
    pub const INTERNAL: i64 = 500;
}

/// Classification table from raw code to error kind.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    table: HashMap<i64, ErrorKind>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let table = HashMap::from([
            (codes::OBJECT_NOT_FOUND, ErrorKind::ResourceNotFound),
            (codes::UNAUTHENTICATED, ErrorKind::Unauthorized),
            (codes::UNAUTHORIZED, ErrorKind::Unauthorized),
            (codes::CANCELLED, ErrorKind::Cancelled),
        ]);
        Self { table }
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the default table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `code` to `kind`, replacing any existing entry.
    pub fn with_code(mut self, code: i64, kind: ErrorKind) -> Self {
        self.table.insert(code, kind);
        self
    }

    /// Looks up the kind registered for `code`.
    pub fn kind_of(&self, code: i64) -> ErrorKind {
        self.table.get(&code).copied().unwrap_or(ErrorKind::Unknown)
    }

    pub fn classify(&self, raw: &RawError) -> TransferError {
        match self.kind_of(raw.code) {
            ErrorKind::ResourceNotFound => TransferError::ResourceNotFound,
            ErrorKind::Unauthorized => TransferError::Unauthorized,
            ErrorKind::Cancelled => TransferError::Cancelled,
            ErrorKind::Unknown => TransferError::Unknown {
                code: raw.code,
                message: raw.message.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let c = ErrorClassifier::new();
        assert_eq!(
            c.classify(&RawError::new(404, "no such object")),
            TransferError::ResourceNotFound
        );
        assert_eq!(
            c.classify(&RawError::new(401, "login")),
            TransferError::Unauthorized
        );
        assert_eq!(
            c.classify(&RawError::new(403, "denied")),
            TransferError::Unauthorized
        );
        assert_eq!(
            c.classify(&RawError::new(499, "aborted")),
            TransferError::Cancelled
        );
    }

    #[test]
    fn unknown_preserves_raw_code() {
        let c = ErrorClassifier::new();
        let err = c.classify(&RawError::new(-13000, "server said no"));
        assert_eq!(
            err,
            TransferError::Unknown {
                code: -13000,
                message: "server said no".into(),
            }
        );
    }

    #[test]
    fn overrides_extend_and_replace() {
        let c = ErrorClassifier::new()
            .with_code(-13010, ErrorKind::ResourceNotFound)
            .with_code(403, ErrorKind::Unknown);
        assert_eq!(c.kind_of(-13010), ErrorKind::ResourceNotFound);
        assert!(matches!(
            c.classify(&RawError::new(403, "quota")),
            TransferError::Unknown { code: 403, .. }
        ));
    }
}
