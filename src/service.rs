//! Service layer API for document lifecycle operations
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError as SledTxError};
use tracing::info;

use crate::audit::{AuditLog, AuditRecord, Outcome};
use crate::config::EngineConfig;
use crate::document::{Document, DocumentBody};
use crate::error::{StockError, StoreError, TransitionError, ValidationError};
use crate::executor::{CascadeHook, TransitionExecutor, TransitionOutcome, TransitionRequest};
use crate::guard::TenantGuard;
use crate::ledger::{LedgerBreak, StockLedger, StockLedgerEntry, StockMovement};
use crate::outbox::Outbox;
use crate::records::{CREDIT_NOTE_PREFIX, CreditNote, FinanceRecord, RecordStore};
use crate::stage::{DocType, Stage, StageCatalog};
use crate::store::{Abort, DocumentStore, storage_failure};
use crate::types::{Caller, TimeStamp};
use crate::utils::new_record_id;

pub struct LifecycleService {
    instance: Arc<sled::Db>,
    config: Arc<EngineConfig>,
    documents: DocumentStore,
    ledger: StockLedger,
    audit: AuditLog,
    records: RecordStore,
    outbox: Outbox,
    executor: TransitionExecutor,
}

impl LifecycleService {
    pub fn new(instance: Arc<sled::Db>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            documents: DocumentStore::new(instance.clone()),
            ledger: StockLedger::new(instance.clone()),
            audit: AuditLog::new(instance.clone()),
            records: RecordStore::new(instance.clone()),
            outbox: Outbox::new(instance.clone()),
            executor: TransitionExecutor::new(instance.clone(), config.clone()),
            instance,
            config,
        }
    }

    /// Open the database named by `database.path`.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.database.path)?;
        Ok(Self::new(Arc::new(db), config))
    }

    /// Install an observer that runs before every cascade step.
    pub fn with_hook(mut self, hook: Arc<dyn CascadeHook>) -> Self {
        self.executor = self.executor.with_hook(hook);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Flush pending writes to disk. Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.instance.flush()?)
    }

    /// Create a document for the caller's tenant at its workflow's initial
    /// stage.
    pub fn create(&self, caller: &Caller, body: impl Into<DocumentBody>) -> Result<Document, TransitionError> {
        let doc = Document::new(&caller.tenant_id, body)?;
        self.instance
            .transaction(|tx| DocumentStore::tx_save(tx, &doc))
            .map_err(storage_failure)?;

        info!(doc_type = %doc.doc_type(), id = %doc.id, tenant = %doc.tenant_id, "document created");
        Ok(doc)
    }

    pub fn get(&self, caller: &Caller, doc_type: DocType, id: &str) -> Result<Document, TransitionError> {
        let found = self.documents.load(doc_type, id)?;
        TenantGuard::scope(caller, doc_type, id, found)
    }

    pub fn list(&self, caller: &Caller, doc_type: DocType) -> Result<Vec<Document>, TransitionError> {
        Ok(self.documents.list_for_tenant(&caller.tenant_id, doc_type)?)
    }

    /// Replace a document's fields. The stage only ever changes through
    /// [`LifecycleService::transition`].
    pub fn edit(
        &self,
        caller: &Caller,
        doc_type: DocType,
        id: &str,
        expected_version: u64,
        body: impl Into<DocumentBody>,
    ) -> Result<Document, TransitionError> {
        let body = body.into();
        let current = self.get(caller, doc_type, id)?;
        if current.version != expected_version {
            return Err(TransitionError::Conflict {
                doc_type,
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }

        // the edit rules are judged against the copy being replaced
        let result = self.instance.transaction(|tx| {
            let Some(mut doc) = DocumentStore::tx_load(tx, doc_type, id)? else {
                return Err(ConflictableTransactionError::Abort(Abort::Missing));
            };
            if doc.version != expected_version {
                return Err(ConflictableTransactionError::Abort(Abort::Conflict { found: doc.version }));
            }
            Self::check_edit(&doc, &body).map_err(|e| ConflictableTransactionError::Abort(Abort::Rejected(e)))?;
            doc.body = body.clone();
            doc.version += 1;
            doc.updated_at = TimeStamp::new();
            DocumentStore::tx_save(tx, &doc)?;
            Ok(doc)
        });

        match result {
            Ok(doc) => Ok(doc),
            Err(SledTxError::Abort(Abort::Missing)) => Err(TransitionError::not_found(doc_type, id)),
            Err(SledTxError::Abort(Abort::Conflict { found })) => Err(TransitionError::Conflict {
                doc_type,
                id: id.to_string(),
                expected: expected_version,
                found,
            }),
            Err(SledTxError::Abort(Abort::Rejected(e))) => Err(e.into()),
            Err(other) => Err(storage_failure(other).into()),
        }
    }

    fn check_edit(current: &Document, body: &DocumentBody) -> Result<(), ValidationError> {
        let workflow = current.workflow();
        if StageCatalog::is_terminal(workflow, current.stage) {
            return Err(ValidationError::Immutable {
                workflow,
                stage: current.stage,
            });
        }
        if body.workflow() != workflow {
            return Err(ValidationError::WorkflowChange {
                workflow,
                requested: body.workflow(),
            });
        }
        if let (Stage::Active, DocumentBody::Contract(before), DocumentBody::Contract(after)) =
            (current.stage, &current.body, body)
        {
            if before.differs_outside_renewal(after) {
                return Err(ValidationError::LockedFields {
                    workflow,
                    stage: current.stage,
                });
            }
        }
        Ok(())
    }

    pub fn transition(&self, caller: &Caller, request: &TransitionRequest) -> Result<TransitionOutcome, TransitionError> {
        self.executor.execute(caller, request)
    }

    /// Issue the single credit note a return order may carry. Allowed while
    /// the order is APPROVED, or COMPLETED after having been approved.
    pub fn issue_credit_note(&self, caller: &Caller, return_order_id: &str) -> Result<CreditNote, TransitionError> {
        let order = self.get(caller, DocType::ReturnOrder, return_order_id)?;
        let not_eligible = || ValidationError::NotEligible {
            workflow: order.workflow(),
            stage: order.stage,
            action: "issue a credit note",
        };

        let DocumentBody::ReturnOrder(body) = &order.body else {
            return Err(not_eligible().into());
        };
        let eligible = match order.stage {
            Stage::Approved => true,
            Stage::Completed => self.was_approved(return_order_id)?,
            _ => false,
        };
        let Some(amount) = body.refund_amount.filter(|_| eligible) else {
            return Err(not_eligible().into());
        };

        let note = CreditNote {
            id: new_record_id(CREDIT_NOTE_PREFIX)?,
            tenant_id: order.tenant_id.clone(),
            return_order_ref: order.id.clone(),
            invoice_ref: body.invoice_ref.clone(),
            amount,
            created_at: TimeStamp::new(),
        };

        match self.instance.transaction(|tx| RecordStore::issue_credit_note_in(tx, &note)) {
            Ok(()) => {
                info!(credit_note = %note.id, return_order = %order.id, amount, "credit note issued");
                Ok(note)
            }
            Err(SledTxError::Abort(Abort::AlreadyIssued { credit_note })) => Err(TransitionError::AlreadyIssued {
                return_order: order.id.clone(),
                credit_note,
            }),
            Err(other) => Err(storage_failure(other).into()),
        }
    }

    fn was_approved(&self, return_order_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .audit
            .entries_for(DocType::ReturnOrder, return_order_id)?
            .iter()
            .any(|record| record.entry.outcome == Outcome::Success && record.entry.to_stage == Stage::Approved))
    }

    pub fn credit_note_for(&self, caller: &Caller, return_order_id: &str) -> Result<Option<CreditNote>, TransitionError> {
        self.get(caller, DocType::ReturnOrder, return_order_id)?;
        Ok(self.records.credit_note_for(return_order_id)?)
    }

    pub fn finance_record(&self, caller: &Caller, id: &str) -> Result<FinanceRecord, TransitionError> {
        match self.records.finance(id)? {
            Some(record) if TenantGuard::admits(caller, &record.tenant_id) => Ok(record),
            _ => Err(TransitionError::NotFound {
                entity: "finance record".to_string(),
                id: id.to_string(),
            }),
        }
    }

    pub fn finance_records(&self, caller: &Caller) -> Result<Vec<FinanceRecord>, StoreError> {
        self.records.finance_for_tenant(&caller.tenant_id)
    }

    /// Manual stock movement, subject to the caller tenant's backorder
    /// setting.
    pub fn adjust_stock(
        &self,
        caller: &Caller,
        product: &str,
        movement: StockMovement,
        cause_ref: &str,
    ) -> Result<StockLedgerEntry, StockError> {
        let settings = self.config.tenant(&caller.tenant_id);
        let entry = self.ledger.post(&caller.tenant_id, product, movement, cause_ref, settings.allow_backorder)?;
        info!(
            product,
            actor = %caller.actor_id,
            kind = ?entry.kind,
            new_balance = entry.new_balance,
            "manual stock movement"
        );
        Ok(entry)
    }

    pub fn stock_balance(&self, product: &str) -> Result<i64, StoreError> {
        self.ledger.balance(product)
    }

    /// Stock is shared across tenants, so movements posted by another tenant
    /// come back without their cause or tenant unless the caller holds the
    /// cross-tenant override.
    pub fn stock_history(&self, caller: &Caller, product: &str) -> Result<Vec<StockLedgerEntry>, StoreError> {
        let mut history = self.ledger.history(product)?;
        for entry in history
            .iter_mut()
            .filter(|entry| !TenantGuard::admits(caller, &entry.tenant_id))
        {
            entry.cause_ref.clear();
            entry.tenant_id.clear();
        }
        Ok(history)
    }

    /// Replays the shared history and returns only the derived balance.
    pub fn verify_stock(&self, product: &str) -> Result<i64, LedgerBreak> {
        self.ledger.verify(product)
    }

    pub fn audit_trail(&self, caller: &Caller, doc_type: DocType, id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        self.audit.trail(caller, doc_type, id)
    }
}
