//! Error taxonomy: validation, conflict, domain-capacity and infrastructure
use crate::document::Field;
use crate::stage::{DocType, Stage, Workflow};

fn list<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown document type '{0}'")]
    UnknownDocType(String),
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
}

/// Deterministic, user-correctable rejections. Never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{workflow} is {stage}, a terminal stage, and can no longer change")]
    Immutable { workflow: Workflow, stage: Stage },
    #[error(
        "{workflow} cannot move from {from} to {to}; allowed next stages: {}",
        list(.allowed)
    )]
    IllegalTransition {
        workflow: Workflow,
        from: Stage,
        to: Stage,
        allowed: Vec<Stage>,
    },
    #[error(
        "{workflow} cannot enter {to} until these fields are set: {}",
        list(.fields)
    )]
    MissingFields {
        workflow: Workflow,
        to: Stage,
        fields: Vec<Field>,
    },
    #[error("{workflow} in {stage} only accepts changes to its renewal fields")]
    LockedFields { workflow: Workflow, stage: Stage },
    #[error("{workflow} cannot be edited into a {requested}")]
    WorkflowChange { workflow: Workflow, requested: Workflow },
    #[error("{workflow} in {stage} is not eligible to {action}")]
    NotEligible {
        workflow: Workflow,
        stage: Stage,
        action: &'static str,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("record at '{0}' is inconsistent")]
    Corrupt(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StockError {
    #[error("product {product} has {available} in stock but {requested} were requested")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: u64,
    },
    #[error("stock movement for product {product} needs a positive quantity")]
    InvalidQuantity { product: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything the engine can hand back to a caller, classified by
/// [`ErrorKind`].
#[derive(thiserror::Error, Debug)]
pub enum TransitionError {
    #[error("{entity} {id} was not found")]
    NotFound { entity: String, id: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(
        "{doc_type} {id} was changed by another request (expected version {expected}, found {found}); re-read it and try again"
    )]
    Conflict {
        doc_type: DocType,
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("a credit note ({credit_note}) was already issued for return order {return_order}")]
    AlreadyIssued {
        return_order: String,
        credit_note: String,
    },
    #[error("{workflow} {from} -> {to} cannot proceed: {source}")]
    Stock {
        workflow: Workflow,
        from: Stage,
        to: Stage,
        source: StockError,
    },
    #[error("{workflow} {from} -> {to} did not finish within {budget_ms} ms and was rolled back")]
    Timeout {
        workflow: Workflow,
        from: Stage,
        to: Stage,
        budget_ms: u64,
    },
    #[error("{workflow} {from} -> {to} was rolled back: {source}")]
    RolledBack {
        workflow: Workflow,
        from: Stage,
        to: Stage,
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Machine-readable error classes shared by the audit log and the HTTP
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalTransition,
    MissingField,
    Immutable,
    LockedFields,
    NotEligible,
    InsufficientStock,
    InvalidQuantity,
    InvalidRequest,
    NotFound,
    Conflict,
    Timeout,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IllegalTransition => "ILLEGAL_TRANSITION",
            ErrorKind::MissingField => "MISSING_FIELD",
            ErrorKind::Immutable => "IMMUTABLE",
            ErrorKind::LockedFields => "LOCKED_FIELDS",
            ErrorKind::NotEligible => "NOT_ELIGIBLE",
            ErrorKind::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorKind::InvalidQuantity => "INVALID_QUANTITY",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Storage => "STORAGE",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Timeout | ErrorKind::Storage => 500,
            _ => 400,
        }
    }

    /// Only infrastructure failures are worth retrying unchanged. Conflicts
    /// need a fresh read first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Storage)
    }
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::Immutable { .. } => ErrorKind::Immutable,
            ValidationError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            ValidationError::MissingFields { .. } => ErrorKind::MissingField,
            ValidationError::LockedFields { .. } => ErrorKind::LockedFields,
            ValidationError::NotEligible { .. } => ErrorKind::NotEligible,
            ValidationError::WorkflowChange { .. } => ErrorKind::InvalidRequest,
        }
    }
}

impl StockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StockError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            StockError::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
            StockError::Store(_) => ErrorKind::Storage,
        }
    }
}

impl TransitionError {
    pub fn not_found(doc_type: DocType, id: &str) -> Self {
        TransitionError::NotFound {
            entity: doc_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitionError::NotFound { .. } => ErrorKind::NotFound,
            TransitionError::Invalid(e) => e.kind(),
            TransitionError::Conflict { .. } | TransitionError::AlreadyIssued { .. } => {
                ErrorKind::Conflict
            }
            TransitionError::Stock { source, .. } => source.kind(),
            TransitionError::Timeout { .. } => ErrorKind::Timeout,
            TransitionError::RolledBack { .. } | TransitionError::Store(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
