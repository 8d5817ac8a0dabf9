use catalog_core_types::RequestId;
use thiserror::Error;

/// Result type alias using CatalogError
pub type Result<T> = std::result::Result<T, CatalogError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every error that crosses a crate boundary is classified into one of these
/// kinds. The kind decides what the caller does next: producer errors are
/// reported upstream, `ConcurrentModification` is retried at change-set
/// granularity, `InvariantViolation` aborts immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Producer errors (fixed by resubmitting a corrected graph)
    InvalidInput,
    SchemaViolation,
    UnresolvedReference,
    NotFound,
    InvalidMerge,

    // Write-time conflicts
    DisambiguationConflict,
    ConcurrentModification,

    // Programming errors
    InvariantViolation,
    InvalidSchema,

    // Integration/IO
    Io,
    Serialization,
    Persistence,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::SchemaViolation => "ERR_SCHEMA_VIOLATION",
            ExErrorKind::UnresolvedReference => "ERR_UNRESOLVED_REFERENCE",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::InvalidMerge => "ERR_INVALID_MERGE",
            ExErrorKind::DisambiguationConflict => "ERR_DISAMBIGUATION_CONFLICT",
            ExErrorKind::ConcurrentModification => "ERR_CONCURRENT_MODIFICATION",
            ExErrorKind::InvariantViolation => "ERR_INVARIANT_VIOLATION",
            ExErrorKind::InvalidSchema => "ERR_INVALID_SCHEMA",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether a fresh attempt of the whole change-set may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExErrorKind::ConcurrentModification)
    }
}

/// Canonical structured error type
///
/// Carries the kind plus whatever ledger context was known where the error
/// surfaced, so a caller can tell which change-set and which Change failed.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    node_id: Option<String>,
    change_set_id: Option<i64>,
    change_id: Option<i64>,
    request_id: Option<RequestId>,
    message: String,
}

impl ExError {
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_type: None,
            entity_id: None,
            node_id: None,
            change_set_id: None,
            change_id: None,
            request_id: None,
            message: String::new(),
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Add change-set context (kept if already set closer to the failure)
    pub fn with_change_set_id(mut self, id: i64) -> Self {
        self.change_set_id.get_or_insert(id);
        self
    }

    /// Add failing Change context (kept if already set closer to the failure)
    pub fn with_change_id(mut self, id: i64) -> Self {
        self.change_id.get_or_insert(id);
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn change_set_id(&self) -> Option<i64> {
        self.change_set_id
    }

    pub fn change_id(&self) -> Option<i64> {
        self.change_id
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured form persisted on a rejected change-set
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "op": self.op,
            "message": self.message,
            "entity_type": self.entity_type,
            "entity_id": self.entity_id,
            "node_id": self.node_id,
            "change_id": self.change_id,
        })
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let (Some(t), Some(id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " ({} {})", t, id)?;
        }
        if let Some(node_id) = &self.node_id {
            write!(f, " (node: {})", node_id)?;
        }
        if let Some(cs) = self.change_set_id {
            write!(f, " (change_set: {})", cs)?;
        }
        if let Some(c) = self.change_id {
            write!(f, " (change: {})", c)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Domain error taxonomy raised by the pure kernel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// A node or field does not match the schema registry
    #[error("Schema violation on {node_type} {node_id}: {reason}")]
    SchemaViolation {
        node_id: String,
        node_type: String,
        reason: String,
    },

    /// A type name is not declared in the schema registry
    #[error("Unknown entity type: {type_name}")]
    UnknownType { type_name: String },

    /// A blank or concrete reference could not be resolved
    #[error("Unresolved reference {ref_type} {ref_id}: {reason}")]
    UnresolvedReference {
        ref_id: String,
        ref_type: String,
        reason: String,
    },

    /// Entity is absent from the entity store
    #[error("Entity not found: {entity_type} {entity_id}")]
    EntityNotFound {
        entity_type: String,
        entity_id: String,
    },

    /// A create collided with an existing natural key
    #[error("Natural key collision for {entity_type} (key {key_digest})")]
    DisambiguationConflict {
        entity_type: String,
        key_digest: String,
    },

    /// Lock or transaction conflict with a concurrent writer
    #[error("Concurrent modification: {reason}")]
    ConcurrentModification { reason: String },

    /// A state the engine must never reach
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Merge directive cannot be carried out
    #[error("Invalid merge: {reason}")]
    InvalidMerge { reason: String },

    /// Schema registry is internally inconsistent
    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<CatalogError> for ExError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::SchemaViolation {
                node_id, node_type, ..
            } => ExError::new(ExErrorKind::SchemaViolation)
                .with_node_id(node_id)
                .with_entity_type(node_type)
                .with_message(message),
            CatalogError::UnknownType { type_name } => ExError::new(ExErrorKind::SchemaViolation)
                .with_entity_type(type_name)
                .with_message(message),
            CatalogError::UnresolvedReference {
                ref_id, ref_type, ..
            } => ExError::new(ExErrorKind::UnresolvedReference)
                .with_node_id(ref_id)
                .with_entity_type(ref_type)
                .with_message(message),
            CatalogError::EntityNotFound {
                entity_type,
                entity_id,
            } => ExError::new(ExErrorKind::NotFound)
                .with_entity_type(entity_type)
                .with_entity_id(entity_id)
                .with_message(message),
            CatalogError::DisambiguationConflict { entity_type, .. } => {
                ExError::new(ExErrorKind::DisambiguationConflict)
                    .with_entity_type(entity_type)
                    .with_message(message)
            }
            CatalogError::ConcurrentModification { .. } => {
                ExError::new(ExErrorKind::ConcurrentModification).with_message(message)
            }
            CatalogError::InvariantViolation { .. } => {
                ExError::new(ExErrorKind::InvariantViolation).with_message(message)
            }
            CatalogError::InvalidMerge { .. } => {
                ExError::new(ExErrorKind::InvalidMerge).with_message(message)
            }
            CatalogError::InvalidSchema { .. } => {
                ExError::new(ExErrorKind::InvalidSchema).with_message(message)
            }
            CatalogError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
            CatalogError::Internal { .. } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
