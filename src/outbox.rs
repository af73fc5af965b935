//! Outbox of notification and email intents.
//!
//! Intents are written inside the unit of work of the transition that
//! caused them and drained by an external dispatcher, so a rolled-back
//! transition never sends anything.
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::error::StoreError;
use crate::stage::DocType;
use crate::store::{TxResult, keys, scan, tx_put};
use crate::types::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffectKind {
    #[n(0)]
    Notification,
    #[n(1)]
    Email,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SideEffectIntent {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub kind: SideEffectKind,
    #[n(2)]
    pub template: String, // e.g. "invoice.sent"
    #[n(3)]
    pub source_type: DocType,
    #[n(4)]
    pub source_id: String,
    #[n(5)]
    pub tenant_id: String,
    #[n(6)]
    pub enqueued_at: TimeStamp<Utc>,
}

impl SideEffectIntent {
    fn key(&self) -> String {
        keys::outbox(self.enqueued_at.nanos(), &self.id)
    }
}

#[derive(Clone)]
pub struct Outbox {
    instance: Arc<sled::Db>,
}

impl Outbox {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub(crate) fn enqueue_in(tx: &TransactionalTree, intent: &SideEffectIntent) -> TxResult<()> {
        tx_put(tx, &intent.key(), intent)
    }

    /// Undelivered intents, oldest first.
    pub fn pending(&self) -> Result<Vec<SideEffectIntent>, StoreError> {
        scan(&self.instance, keys::OUTBOX_PREFIX)
    }

    /// Drop a delivered intent. Returns false if it was already gone.
    pub fn acknowledge(&self, intent: &SideEffectIntent) -> Result<bool, StoreError> {
        Ok(self.instance.remove(intent.key().as_bytes())?.is_some())
    }
}
