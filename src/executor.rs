//! Transition executor.
//!
//! One transition is one sled transaction: the stage change, every cascade
//! it sets off and the SUCCESS audit entry commit together or not at all.
//! Rejections and rollbacks are audited separately after the fact.
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError as SledTxError, TransactionalTree};
use tracing::{debug, error, info, info_span, warn};

use crate::audit::{AuditEntry, AuditLog, Outcome};
use crate::cascade::{Cascade, CascadeContext, CascadeRegistry, NewRecord, RecordType};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{ErrorKind, StockError, StoreError, TransitionError};
use crate::guard::TenantGuard;
use crate::ledger::{StockLedger, StockLedgerEntry};
use crate::outbox::{Outbox, SideEffectIntent};
use crate::records::{FINANCE_PREFIX, FinanceRecord, RecordStore};
use crate::stage::{DocType, Stage, Workflow};
use crate::store::{Abort, DocumentStore, TxResult, abort};
use crate::types::{Caller, TimeStamp};
use crate::utils::new_record_id;
use crate::validator::{TransitionValidator, ValidTransition};

const INTENT_PREFIX: &str = "fx_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub doc_type: DocType,
    pub id: String,
    pub to: Stage,
    /// Version the caller last read. When set, a newer stored version is a
    /// conflict even before validation.
    pub expected_version: Option<u64>,
}

impl TransitionRequest {
    pub fn new(doc_type: DocType, id: impl Into<String>, to: Stage) -> Self {
        Self {
            doc_type,
            id: id.into(),
            to,
            expected_version: None,
        }
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDocument {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub doc_type: DocType,
    pub id: String,
    pub from_stage: Stage,
    pub new_stage: Stage,
    pub version: u64,
    pub created_documents: Vec<CreatedDocument>,
    pub stock_entries: Vec<StockLedgerEntry>,
    pub audit_id: String,
}

/// Observer invoked before each cascade step, inside the unit of work.
/// An error fails the step and rolls the whole transition back.
pub trait CascadeHook: Send + Sync {
    fn before_step(&self, workflow: Workflow, to: Stage, step: usize, cascade: &Cascade) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct TransitionExecutor {
    instance: Arc<sled::Db>,
    config: Arc<EngineConfig>,
    audit: AuditLog,
    hook: Option<Arc<dyn CascadeHook>>,
}

impl TransitionExecutor {
    pub fn new(instance: Arc<sled::Db>, config: Arc<EngineConfig>) -> Self {
        Self {
            audit: AuditLog::new(instance.clone()),
            instance,
            config,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CascadeHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn execute(&self, caller: &Caller, request: &TransitionRequest) -> Result<TransitionOutcome, TransitionError> {
        let span = info_span!(
            "transition",
            doc_type = %request.doc_type,
            id = %request.id,
            to = %request.to,
            tenant = %caller.tenant_id,
        );
        let _enter = span.enter();

        let deadline = Instant::now() + self.config.transition_timeout();

        let found = DocumentStore::new(self.instance.clone()).load(request.doc_type, &request.id)?;
        let snapshot = match TenantGuard::scope(caller, request.doc_type, &request.id, found) {
            Ok(doc) => doc,
            Err(err) => {
                // the caller's own tenant, so nothing about the real owner leaks
                self.audit_failure(caller, request, &caller.tenant_id, None, Outcome::Rejected, &err);
                return Err(err);
            }
        };

        if let Some(expected) = request.expected_version.filter(|v| *v != snapshot.version) {
            let err = TransitionError::Conflict {
                doc_type: request.doc_type,
                id: request.id.clone(),
                expected,
                found: snapshot.version,
            };
            self.audit_failure(
                caller,
                request,
                &snapshot.tenant_id,
                Some(snapshot.stage),
                Outcome::Rejected,
                &err,
            );
            return Err(err);
        }

        let token = match TransitionValidator::validate(&snapshot, request.to) {
            Ok(token) => token,
            Err(invalid) => {
                let err = TransitionError::from(invalid);
                self.audit_failure(
                    caller,
                    request,
                    &snapshot.tenant_id,
                    Some(snapshot.stage),
                    Outcome::Rejected,
                    &err,
                );
                return Err(err);
            }
        };

        let ctx = CascadeContext {
            settings: self.config.tenant(&snapshot.tenant_id),
        };
        let cascades = CascadeRegistry::cascades_for(token.workflow(), token.from(), token.to());

        let result = self
            .instance
            .transaction(|tx| self.apply(tx, caller, request, &token, &cascades, &ctx, deadline));

        match result {
            Ok(outcome) => {
                info!(
                    from = %outcome.from_stage,
                    version = outcome.version,
                    created = outcome.created_documents.len(),
                    stock_entries = outcome.stock_entries.len(),
                    audit_id = %outcome.audit_id,
                    "transition committed"
                );
                Ok(outcome)
            }
            Err(failure) => {
                let err = self.to_transition_error(failure, request, &token);
                let outcome = match err.kind() {
                    ErrorKind::Timeout | ErrorKind::Storage => Outcome::Partial,
                    _ => Outcome::Rejected,
                };
                self.audit_failure(
                    caller,
                    request,
                    &snapshot.tenant_id,
                    Some(token.from()),
                    outcome,
                    &err,
                );
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        tx: &TransactionalTree,
        caller: &Caller,
        request: &TransitionRequest,
        token: &ValidTransition,
        cascades: &[&'static Cascade],
        ctx: &CascadeContext,
        deadline: Instant,
    ) -> TxResult<TransitionOutcome> {
        let Some(mut doc) = DocumentStore::tx_load(tx, request.doc_type, &request.id)? else {
            return Err(ConflictableTransactionError::Abort(Abort::Missing));
        };
        if doc.version != token.version() {
            return Err(ConflictableTransactionError::Abort(Abort::Conflict { found: doc.version }));
        }

        doc.stage = token.to();
        doc.version += 1;
        doc.updated_at = TimeStamp::new();
        DocumentStore::tx_save(tx, &doc)?;

        let mut created_documents = vec![];
        let mut stock_entries = vec![];

        for (step, cascade) in cascades.iter().enumerate() {
            past_deadline(deadline)?;
            if let Some(hook) = &self.hook {
                hook.before_step(token.workflow(), token.to(), step, cascade)
                    .map_err(abort)?;
            }
            debug!(step, ?cascade, "cascade step");

            match cascade {
                Cascade::CreateDocument { target, mapper } => {
                    let record = mapper(&doc, ctx).ok_or_else(|| {
                        abort(StoreError::Corrupt(format!(
                            "{} {} cannot seed a {target:?}",
                            doc.doc_type(),
                            doc.id
                        )))
                    })?;
                    created_documents.push(Self::create_in(tx, &doc, *target, record)?);
                }
                Cascade::AdjustStock { movement, items } => {
                    for (product, quantity) in items(&doc) {
                        stock_entries.push(StockLedger::post_in(
                            tx,
                            &doc.tenant_id,
                            &product,
                            movement(quantity),
                            &doc.id,
                            ctx.settings.allow_backorder,
                        )?);
                    }
                }
                Cascade::EmitSideEffect { kind, template } => {
                    let intent = SideEffectIntent {
                        id: new_record_id(INTENT_PREFIX).map_err(abort)?,
                        kind: *kind,
                        template: template.to_string(),
                        source_type: doc.doc_type(),
                        source_id: doc.id.clone(),
                        tenant_id: doc.tenant_id.clone(),
                        enqueued_at: TimeStamp::new(),
                    };
                    Outbox::enqueue_in(tx, &intent)?;
                }
            }
        }
        past_deadline(deadline)?;

        let entry = AuditEntry::new(
            request.doc_type,
            &doc.id,
            Some(token.from()),
            token.to(),
            caller,
            &doc.tenant_id,
            Outcome::Success,
        );
        let audit_id = AuditLog::record_in(tx, &entry)?;

        Ok(TransitionOutcome {
            doc_type: request.doc_type,
            id: doc.id,
            from_stage: token.from(),
            new_stage: doc.stage,
            version: doc.version,
            created_documents,
            stock_entries,
            audit_id,
        })
    }

    fn create_in(
        tx: &TransactionalTree,
        source: &Document,
        target: RecordType,
        record: NewRecord,
    ) -> TxResult<CreatedDocument> {
        let id = match record {
            NewRecord::Document(body) => {
                let doc = Document::new(&source.tenant_id, body).map_err(abort)?;
                DocumentStore::tx_save(tx, &doc)?;
                doc.id
            }
            NewRecord::Finance { kind, amount } => {
                let record = FinanceRecord {
                    id: new_record_id(FINANCE_PREFIX).map_err(abort)?,
                    tenant_id: source.tenant_id.clone(),
                    kind,
                    amount,
                    source_type: source.doc_type(),
                    source_ref: source.id.clone(),
                    created_at: TimeStamp::new(),
                };
                RecordStore::save_finance_in(tx, &record)?;
                record.id
            }
        };
        debug!(?target, %id, "cascade created record");
        Ok(CreatedDocument {
            record_type: target,
            id,
        })
    }

    fn to_transition_error(&self, failure: SledTxError<Abort>, request: &TransitionRequest, token: &ValidTransition) -> TransitionError {
        let (workflow, from, to) = (token.workflow(), token.from(), token.to());
        let rolled_back = |source: StoreError| TransitionError::RolledBack {
            workflow,
            from,
            to,
            source,
        };

        match failure {
            SledTxError::Abort(Abort::Missing) => TransitionError::not_found(request.doc_type, &request.id),
            SledTxError::Abort(Abort::Conflict { found }) => TransitionError::Conflict {
                doc_type: request.doc_type,
                id: request.id.clone(),
                expected: token.version(),
                found,
            },
            SledTxError::Abort(Abort::Rejected(source)) => source.into(),
            SledTxError::Abort(Abort::AlreadyIssued { credit_note }) => TransitionError::AlreadyIssued {
                return_order: request.id.clone(),
                credit_note,
            },
            SledTxError::Abort(Abort::Stock(StockError::Store(source))) => rolled_back(source),
            SledTxError::Abort(Abort::Stock(source)) => TransitionError::Stock {
                workflow,
                from,
                to,
                source,
            },
            SledTxError::Abort(Abort::Timeout) => TransitionError::Timeout {
                workflow,
                from,
                to,
                budget_ms: self.config.workflow.transition_timeout_ms,
            },
            SledTxError::Abort(Abort::Store(source)) => rolled_back(source),
            SledTxError::Storage(source) => rolled_back(source.into()),
        }
    }

    fn audit_failure(
        &self,
        caller: &Caller,
        request: &TransitionRequest,
        tenant_id: &str,
        from: Option<Stage>,
        outcome: Outcome,
        err: &TransitionError,
    ) {
        warn!(kind = err.kind().as_str(), ?outcome, error = %err, "transition failed");

        let entry = AuditEntry::new(request.doc_type, &request.id, from, request.to, caller, tenant_id, outcome)
            .with_reason(err.kind().as_str());
        if let Err(e) = self.audit.record(&entry) {
            error!(error = %e, "failed to record audit entry");
        }
    }
}

fn past_deadline(deadline: Instant) -> TxResult<()> {
    if Instant::now() >= deadline {
        return Err(ConflictableTransactionError::Abort(Abort::Timeout));
    }
    Ok(())
}
