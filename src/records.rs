//! Records created by cascades and follow-ups that are not stage-bearing
//! documents: finance entries and credit notes.
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::error::StoreError;
use crate::stage::DocType;
use crate::store::{Abort, TxResult, get, keys, scan, tx_get, tx_put};
use crate::types::TimeStamp;

pub const FINANCE_PREFIX: &str = "fin_";
pub const CREDIT_NOTE_PREFIX: &str = "cn_";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceKind {
    #[n(0)]
    Income,
    #[n(1)]
    Expense,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FinanceRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub kind: FinanceKind,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub source_type: DocType,
    #[n(5)]
    pub source_ref: String,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CreditNote {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub return_order_ref: String,
    #[n(3)]
    pub invoice_ref: Option<String>,
    #[n(4)]
    pub amount: u64,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Clone)]
pub struct RecordStore {
    instance: Arc<sled::Db>,
}

impl RecordStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn finance(&self, id: &str) -> Result<Option<FinanceRecord>, StoreError> {
        get(&self.instance, &keys::finance(id))
    }

    pub fn finance_for_tenant(&self, tenant: &str) -> Result<Vec<FinanceRecord>, StoreError> {
        Ok(scan::<FinanceRecord>(&self.instance, keys::FINANCE_PREFIX)?
            .into_iter()
            .filter(|record| record.tenant_id == tenant)
            .collect())
    }

    pub fn credit_note(&self, id: &str) -> Result<Option<CreditNote>, StoreError> {
        get(&self.instance, &keys::credit_note(id))
    }

    /// The credit note issued against a return order, if any.
    pub fn credit_note_for(&self, return_order: &str) -> Result<Option<CreditNote>, StoreError> {
        match get::<String>(&self.instance, &keys::credit_note_for(return_order))? {
            Some(id) => self.credit_note(&id),
            None => Ok(None),
        }
    }

    pub(crate) fn save_finance_in(tx: &TransactionalTree, record: &FinanceRecord) -> TxResult<()> {
        tx_put(tx, &keys::finance(&record.id), record)
    }

    /// Write a credit note and claim its return order. Aborts if the return
    /// order already has one.
    pub(crate) fn issue_credit_note_in(tx: &TransactionalTree, note: &CreditNote) -> TxResult<()> {
        let claim = keys::credit_note_for(&note.return_order_ref);
        if let Some(existing) = tx_get::<String>(tx, &claim)? {
            return Err(sled::transaction::ConflictableTransactionError::Abort(
                Abort::AlreadyIssued {
                    credit_note: existing,
                },
            ));
        }
        tx_put(tx, &keys::credit_note(&note.id), note)?;
        tx_put(tx, &claim, &note.id)
    }
}
