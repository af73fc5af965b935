//! Append-only audit trail of every attempted and successful transition
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::error::StoreError;
use crate::guard::TenantGuard;
use crate::stage::{DocType, Stage};
use crate::store::{TxResult, abort, keys};
use crate::types::{Caller, TimeStamp};
use crate::utils::to_cbor;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[n(0)]
    Success,
    #[n(1)]
    Rejected,
    // the unit of work started and was rolled back
    #[n(2)]
    Partial,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    #[n(0)]
    pub entity: DocType,
    #[n(1)]
    pub entity_id: String,
    #[n(2)]
    pub from_stage: Option<Stage>,
    #[n(3)]
    pub to_stage: Stage,
    #[n(4)]
    pub actor_id: String,
    #[n(5)]
    pub tenant_id: String,
    #[n(6)]
    pub timestamp: TimeStamp<Utc>,
    #[n(7)]
    pub outcome: Outcome,
    #[n(8)]
    pub reason: Option<String>, // error kind for rejected and partial attempts
}

/// An entry as read back from the log, with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub audit_id: String,
    pub entry: AuditEntry,
}

impl AuditEntry {
    pub fn new(
        entity: DocType,
        entity_id: &str,
        from_stage: Option<Stage>,
        to_stage: Stage,
        caller: &Caller,
        tenant_id: &str,
        outcome: Outcome,
    ) -> Self {
        Self {
            entity,
            entity_id: entity_id.to_string(),
            from_stage,
            to_stage,
            actor_id: caller.actor_id.clone(),
            tenant_id: tenant_id.to_string(),
            timestamp: TimeStamp::new(),
            outcome,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// The entry's id is the sha256 of its CBOR encoding.
    pub fn build(&self) -> Result<(String, Vec<u8>), StoreError> {
        let cbor = to_cbor(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    fn key(&self, audit_id: &str) -> String {
        keys::audit(self.entity, &self.entity_id, self.timestamp.nanos(), audit_id)
    }
}

#[derive(Clone)]
pub struct AuditLog {
    instance: Arc<sled::Db>,
}

impl AuditLog {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    /// Append outside any unit of work. Used for attempts that never got to
    /// commit.
    pub fn record(&self, entry: &AuditEntry) -> Result<String, StoreError> {
        let (audit_id, cbor) = entry.build()?;
        self.instance.insert(entry.key(&audit_id).as_bytes(), cbor)?;
        Ok(audit_id)
    }

    pub(crate) fn record_in(tx: &TransactionalTree, entry: &AuditEntry) -> TxResult<String> {
        let (audit_id, cbor) = entry.build().map_err(abort)?;
        tx.insert(entry.key(&audit_id).as_bytes(), cbor)?;
        Ok(audit_id)
    }

    /// Every entry for one document, oldest first.
    pub fn entries_for(&self, entity: DocType, entity_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let prefix = keys::audit_prefix(entity, entity_id);
        let mut records = vec![];
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key);
            let audit_id = key
                .rsplit('/')
                .next()
                .ok_or_else(|| StoreError::Corrupt(key.to_string()))?
                .to_string();
            let entry: AuditEntry = minicbor::decode(&bytes)?;
            records.push(AuditRecord { audit_id, entry });
        }
        Ok(records)
    }

    /// Entries the caller's tenant may see.
    pub fn trail(&self, caller: &Caller, entity: DocType, entity_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .entries_for(entity, entity_id)?
            .into_iter()
            .filter(|record| TenantGuard::admits(caller, &record.entry.tenant_id))
            .collect())
    }
}
