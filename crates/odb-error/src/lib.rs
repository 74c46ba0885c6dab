use thiserror::Error;

/// Primary error type for the object layer.
///
/// Object identifiers are carried as their raw 64-bit value and rendered as
/// 16 hex digits, matching `ObjId`'s display form. Field and type storage ids
/// are carried as raw `u32`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OdbError {
    // === Identity cache ===
    /// A proxy's construction looked itself up before registering itself.
    #[error("reentrant lookup of object {id:016x} during its own construction before it was registered")]
    ReentrantConstruction { id: u64 },

    /// The instance registered during construction is not the instance the
    /// factory returned.
    #[error("identity mismatch for object {id:016x}: registered proxy differs from constructed proxy")]
    IdentityMismatch { id: u64 },

    /// The factory produced a proxy for the wrong identifier.
    #[error("proxy factory returned object {actual:016x} when asked for {expected:016x}")]
    ProxyIdMismatch { expected: u64, actual: u64 },

    /// `register_self` was called twice with different instances.
    #[error("object {id:016x} registered twice during construction")]
    DuplicateRegistration { id: u64 },

    /// The proxy factory failed.
    #[error("failed to construct proxy for object {id:016x}: {detail}")]
    ConstructionFailed { id: u64, detail: String },

    // === Scheduling ===
    /// A blocked wait was cancelled through its context.
    #[error("interrupted")]
    Interrupted,

    /// Waiting for another thread's construction exceeded the wait budget.
    #[error("object {id:016x} is busy: construction in progress elsewhere")]
    Busy { id: u64 },

    // === Object errors ===
    /// Object does not exist in the transaction.
    #[error("object {id:016x} not found")]
    DeletedObject { id: u64 },

    /// A copied reference points at an object absent from the destination.
    #[error(
        "illegal assignment of deleted object {target:016x} to field {field} in object {referrer:016x} ({unresolved} unresolved)"
    )]
    DanglingReference {
        referrer: u64,
        field: u32,
        target: u64,
        unresolved: usize,
    },

    /// Object already exists.
    #[error("object {id:016x} already exists")]
    ObjectExists { id: u64 },

    // === Schema errors ===
    /// No object type with this storage id.
    #[error("unknown object type {type_id}")]
    UnknownType { type_id: u32 },

    /// Object type has no field with this storage id.
    #[error("object type {type_id} has no field {field}")]
    UnknownField { type_id: u32, field: u32 },

    /// Value does not fit the field kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // === Usage errors ===
    /// API misuse by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // === Transaction errors ===
    /// Write attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Transaction already committed or rolled back.
    #[error("transaction {txn_id} is no longer usable")]
    TransactionClosed { txn_id: u64 },

    /// Operation not supported by this transaction kind.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Numeric result codes for the object layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Resource busy.
    Busy = 5,
    /// Attempt to write a read-only transaction.
    ReadOnly = 8,
    /// Interrupted by cancellation.
    Interrupt = 9,
    /// Object not found.
    NotFound = 12,
    /// Referential or uniqueness constraint violation.
    Constraint = 19,
    /// Data type mismatch.
    Mismatch = 20,
    /// Library used incorrectly.
    Misuse = 21,
}

impl OdbError {
    /// Map this error to a numeric code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::ReentrantConstruction { .. }
            | Self::DuplicateRegistration { .. }
            | Self::InvalidArgument(_)
            | Self::TransactionClosed { .. } => ErrorCode::Misuse,
            Self::IdentityMismatch { .. } | Self::ProxyIdMismatch { .. } | Self::Internal(_) => {
                ErrorCode::Internal
            }
            Self::ConstructionFailed { .. } | Self::Unsupported(_) => ErrorCode::Error,
            Self::Interrupted => ErrorCode::Interrupt,
            Self::Busy { .. } => ErrorCode::Busy,
            Self::DeletedObject { .. } | Self::UnknownType { .. } | Self::UnknownField { .. } => {
                ErrorCode::NotFound
            }
            Self::DanglingReference { .. } | Self::ObjectExists { .. } => ErrorCode::Constraint,
            Self::TypeMismatch { .. } => ErrorCode::Mismatch,
            Self::ReadOnly => ErrorCode::ReadOnly,
        }
    }

    /// Whether the caller can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. }
                | Self::Interrupted
                | Self::DeletedObject { .. }
                | Self::DanglingReference { .. }
                | Self::ObjectExists { .. }
                | Self::ConstructionFailed { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Busy { .. } => Some("Retry the lookup after the other construction completes"),
            Self::DanglingReference { .. } => {
                Some("Include the referenced object in the copy cascade or clear the reference")
            }
            Self::ReentrantConstruction { .. } => {
                Some("Call register_self before looking the object up from its own constructor")
            }
            Self::TransactionClosed { .. } => Some("Begin a new transaction"),
            _ => None,
        }
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Interrupted)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a usage error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create a construction failure for object `id`.
    pub fn construction_failed(id: u64, detail: impl Into<String>) -> Self {
        Self::ConstructionFailed {
            id,
            detail: detail.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias using `OdbError`.
pub type Result<T> = std::result::Result<T, OdbError>;
