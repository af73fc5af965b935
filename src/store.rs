//! Persistence over a single sled tree.
//!
//! Every record type lives under its own key prefix so one
//! [`sled::Tree::transaction`] can span documents, ledger entries, audit
//! entries and outbox intents. Values are CBOR.
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};

use crate::document::Document;
use crate::error::{StockError, StoreError, ValidationError};
use crate::stage::DocType;
use crate::utils::{from_cbor, to_cbor};

pub(crate) mod keys {
    use std::borrow::Cow;

    use crate::stage::DocType;

    /// Tenant, document and product names are caller-supplied, so `/` and
    /// `%` are percent-escaped to keep one name from nesting under another.
    pub fn segment(raw: &str) -> Cow<'_, str> {
        if raw.contains(['/', '%']) {
            Cow::Owned(raw.replace('%', "%25").replace('/', "%2F"))
        } else {
            Cow::Borrowed(raw)
        }
    }

    pub fn doc(doc_type: DocType, id: &str) -> String {
        format!("doc/{}/{}", doc_type.as_str(), segment(id))
    }
    pub fn tenant_index(tenant: &str, doc_type: DocType, id: &str) -> String {
        format!("{}{}", tenant_prefix(tenant, doc_type), segment(id))
    }
    pub fn tenant_prefix(tenant: &str, doc_type: DocType) -> String {
        format!("tenant/{}/{}/", segment(tenant), doc_type.as_str())
    }
    pub fn audit(entity: DocType, id: &str, nanos: i64, audit_id: &str) -> String {
        format!("{}{:020}/{}", audit_prefix(entity, id), nanos.max(0), audit_id)
    }
    pub fn audit_prefix(entity: DocType, id: &str) -> String {
        format!("audit/{}/{}/", entity.as_str(), segment(id))
    }
    pub fn stock_entry(product: &str, seq: u64) -> String {
        format!("{}{:020}", stock_prefix(product), seq)
    }
    pub fn stock_prefix(product: &str) -> String {
        format!("stock/{}/", segment(product))
    }
    pub fn stock_head(product: &str) -> String {
        format!("stock-head/{}", segment(product))
    }
    pub fn finance(id: &str) -> String {
        format!("{}{}", FINANCE_PREFIX, segment(id))
    }
    pub const FINANCE_PREFIX: &str = "finance/";
    pub fn credit_note(id: &str) -> String {
        format!("credit-note/{}", segment(id))
    }
    pub fn credit_note_for(return_order: &str) -> String {
        format!("credit-note-for/{}", segment(return_order))
    }
    pub fn outbox(nanos: i64, intent_id: &str) -> String {
        format!("outbox/{:020}/{}", nanos.max(0), intent_id)
    }
    pub const OUTBOX_PREFIX: &str = "outbox/";

}

/// Why a unit of work was aborted. Translated into a caller-facing error by
/// whoever opened the transaction.
#[derive(Debug)]
pub(crate) enum Abort {
    Missing,
    Conflict { found: u64 },
    Rejected(ValidationError),
    AlreadyIssued { credit_note: String },
    Stock(StockError),
    Timeout,
    Store(StoreError),
}

impl From<StoreError> for Abort {
    fn from(value: StoreError) -> Self {
        Abort::Store(value)
    }
}

impl From<StockError> for Abort {
    fn from(value: StockError) -> Self {
        Abort::Stock(value)
    }
}

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<Abort>>;

pub(crate) fn abort<E: Into<Abort>>(err: E) -> ConflictableTransactionError<Abort> {
    ConflictableTransactionError::Abort(err.into())
}

/// Collapse a failed unit of work whose only expected aborts are storage
/// failures.
pub(crate) fn storage_failure(failure: TransactionError<Abort>) -> StoreError {
    match failure {
        TransactionError::Abort(Abort::Store(e)) => e,
        TransactionError::Abort(Abort::Stock(StockError::Store(e))) => e,
        TransactionError::Abort(other) => StoreError::Corrupt(format!("unexpected abort: {other:?}")),
        TransactionError::Storage(e) => e.into(),
    }
}

pub(crate) fn tx_get<T>(tx: &TransactionalTree, key: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key.as_bytes())? {
        Some(bytes) => from_cbor(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: minicbor::Encode<()>>(
    tx: &TransactionalTree,
    key: &str,
    value: &T,
) -> TxResult<()> {
    let bytes = to_cbor(value).map_err(abort)?;
    tx.insert(key.as_bytes(), bytes)?;
    Ok(())
}

pub(crate) fn get<T>(tree: &sled::Tree, key: &str) -> Result<Option<T>, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every value under `prefix`, in key order.
pub(crate) fn scan<T>(tree: &sled::Tree, prefix: &str) -> Result<Vec<T>, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    let mut out = vec![];
    for item in tree.scan_prefix(prefix.as_bytes()) {
        let (_, bytes) = item?;
        out.push(from_cbor(&bytes)?);
    }
    Ok(out)
}

/// Document records and their tenant index.
#[derive(Clone)]
pub struct DocumentStore {
    instance: Arc<sled::Db>,
}

impl DocumentStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    /// Unscoped load. Callers outside the engine go through
    /// [`crate::guard::TenantGuard`].
    pub fn load(&self, doc_type: DocType, id: &str) -> Result<Option<Document>, StoreError> {
        get(&self.instance, &keys::doc(doc_type, id))
    }

    pub fn list_for_tenant(&self, tenant: &str, doc_type: DocType) -> Result<Vec<Document>, StoreError> {
        let prefix = keys::tenant_prefix(tenant, doc_type);
        let mut docs = vec![];
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (key, id) = item?;
            let id = String::from_utf8_lossy(&id);
            match self.load(doc_type, &id)? {
                Some(doc) => docs.push(doc),
                None => return Err(StoreError::Corrupt(String::from_utf8_lossy(&key).into_owned())),
            }
        }
        Ok(docs)
    }

    pub(crate) fn tx_load(tx: &TransactionalTree, doc_type: DocType, id: &str) -> TxResult<Option<Document>> {
        tx_get(tx, &keys::doc(doc_type, id))
    }

    /// Write the document and (re)write its tenant index entry, whose value
    /// is the unescaped id.
    pub(crate) fn tx_save(tx: &TransactionalTree, doc: &Document) -> TxResult<()> {
        let doc_type = doc.doc_type();
        tx_put(tx, &keys::doc(doc_type, &doc.id), doc)?;
        tx.insert(
            keys::tenant_index(&doc.tenant_id, doc_type, &doc.id).as_bytes(),
            doc.id.as_bytes(),
        )?;
        Ok(())
    }
}
