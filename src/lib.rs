//! Multi-tenant lifecycle engine for sales documents: opportunities, quotes,
//! invoices, contracts and return orders.
//!
//! Every stage change goes through [`executor::TransitionExecutor`], which
//! validates it against the [`stage::StageCatalog`], then applies it together
//! with its cascades and audit entry in one sled transaction.
pub mod audit;
pub mod cascade;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod guard;
pub mod http;
pub mod labels;
pub mod ledger;
pub mod outbox;
pub mod records;
pub mod service;
pub mod stage;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod validator;

pub use error::{ErrorKind, TransitionError};
pub use executor::{TransitionOutcome, TransitionRequest};
pub use service::LifecycleService;
pub use stage::{DocType, InvoiceKind, Stage, Workflow};
pub use types::Caller;
