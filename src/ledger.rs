//! Append-only stock ledger.
//!
//! The balance of a product is never stored on its own: it is the
//! `new_balance` of the latest entry. `stock-head/{product}` only points at
//! that entry's sequence number.
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use tracing::debug;

use crate::error::{StockError, StoreError};
use crate::store::{Abort, TxResult, abort, get, keys, scan, tx_get, tx_put};
use crate::types::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    #[n(0)]
    In,
    #[n(1)]
    Out,
    #[n(2)]
    Adjustment,
    #[n(3)]
    Return,
}

/// A requested change to a product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockMovement {
    In(u64),
    Out(u64),
    Return(u64),
    Adjustment { target: i64 },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StockLedgerEntry {
    #[n(0)]
    pub product_ref: String,
    #[n(1)]
    pub seq: u64, // contiguous per product, starting at 1
    #[n(2)]
    pub kind: MovementKind,
    #[n(3)]
    pub quantity_delta: i64,
    #[n(4)]
    pub target_balance: Option<i64>, // adjustments only
    #[n(5)]
    pub previous_balance: i64,
    #[n(6)]
    pub new_balance: i64,
    #[n(7)]
    pub cause_ref: String,
    #[n(8)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(9)]
    pub tenant_id: String, // whose document or caller posted it
}

/// First point where a product's history stops adding up.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("stock ledger for {product} breaks at entry {seq}: {reason}")]
pub struct LedgerBreak {
    pub product: String,
    pub seq: u64,
    pub reason: String,
}

impl StockMovement {
    pub fn kind(&self) -> MovementKind {
        match self {
            StockMovement::In(_) => MovementKind::In,
            StockMovement::Out(_) => MovementKind::Out,
            StockMovement::Return(_) => MovementKind::Return,
            StockMovement::Adjustment { .. } => MovementKind::Adjustment,
        }
    }

    /// `(quantity_delta, new_balance)` for a movement applied on top of
    /// `previous`. IN and RETURN add, OUT subtracts, ADJUSTMENT sets.
    pub fn apply(&self, product: &str, previous: i64) -> Result<(i64, i64), StockError> {
        let invalid = || StockError::InvalidQuantity {
            product: product.to_string(),
        };
        let signed = |quantity: u64| -> Result<i64, StockError> {
            match i64::try_from(quantity) {
                Ok(q) if q > 0 => Ok(q),
                _ => Err(invalid()),
            }
        };

        let delta = match *self {
            StockMovement::In(q) | StockMovement::Return(q) => signed(q)?,
            StockMovement::Out(q) => -signed(q)?,
            StockMovement::Adjustment { target } => target.checked_sub(previous).ok_or_else(invalid)?,
        };
        let new_balance = previous.checked_add(delta).ok_or_else(invalid)?;

        Ok((delta, new_balance))
    }
}

#[derive(Clone)]
pub struct StockLedger {
    instance: Arc<sled::Db>,
}

impl StockLedger {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    /// Post one movement in its own unit of work.
    pub fn post(
        &self,
        tenant_id: &str,
        product: &str,
        movement: StockMovement,
        cause_ref: &str,
        allow_backorder: bool,
    ) -> Result<StockLedgerEntry, StockError> {
        let result = self
            .instance
            .transaction(|tx| Self::post_in(tx, tenant_id, product, movement, cause_ref, allow_backorder));

        match result {
            Ok(entry) => Ok(entry),
            Err(TransactionError::Abort(Abort::Stock(e))) => Err(e),
            Err(TransactionError::Abort(Abort::Store(e))) => Err(e.into()),
            Err(TransactionError::Abort(other)) => Err(StoreError::Corrupt(format!(
                "unexpected abort posting stock for {product}: {other:?}"
            ))
            .into()),
            Err(TransactionError::Storage(e)) => Err(StoreError::from(e).into()),
        }
    }

    /// Post one movement inside an enclosing unit of work. The previous
    /// balance is read from the latest entry for the product.
    pub(crate) fn post_in(
        tx: &TransactionalTree,
        tenant_id: &str,
        product: &str,
        movement: StockMovement,
        cause_ref: &str,
        allow_backorder: bool,
    ) -> TxResult<StockLedgerEntry> {
        let head: Option<u64> = tx_get(tx, &keys::stock_head(product))?;
        let (seq, previous) = match head {
            Some(seq) => {
                let latest: StockLedgerEntry = tx_get(tx, &keys::stock_entry(product, seq))?
                    .ok_or_else(|| abort(StoreError::Corrupt(keys::stock_entry(product, seq))))?;
                (seq + 1, latest.new_balance)
            }
            None => (1, 0),
        };

        let (delta, new_balance) = movement.apply(product, previous).map_err(abort)?;

        if movement.kind() == MovementKind::Out && new_balance < 0 && !allow_backorder {
            return Err(ConflictableTransactionError::Abort(Abort::Stock(
                StockError::InsufficientStock {
                    product: product.to_string(),
                    available: previous,
                    requested: delta.unsigned_abs(),
                },
            )));
        }

        let entry = StockLedgerEntry {
            product_ref: product.to_string(),
            seq,
            kind: movement.kind(),
            quantity_delta: delta,
            target_balance: match movement {
                StockMovement::Adjustment { target } => Some(target),
                _ => None,
            },
            previous_balance: previous,
            new_balance,
            cause_ref: cause_ref.to_string(),
            recorded_at: TimeStamp::new(),
            tenant_id: tenant_id.to_string(),
        };

        tx_put(tx, &keys::stock_entry(product, seq), &entry)?;
        tx_put(tx, &keys::stock_head(product), &seq)?;

        debug!(product, seq, kind = ?entry.kind, delta, new_balance, cause = cause_ref, "stock posted");
        Ok(entry)
    }

    /// Balance derived from the latest entry; zero for an unknown product.
    pub fn balance(&self, product: &str) -> Result<i64, StoreError> {
        let Some(seq) = get::<u64>(&self.instance, &keys::stock_head(product))? else {
            return Ok(0);
        };
        get::<StockLedgerEntry>(&self.instance, &keys::stock_entry(product, seq))?
            .map(|entry| entry.new_balance)
            .ok_or_else(|| StoreError::Corrupt(keys::stock_entry(product, seq)))
    }

    pub fn history(&self, product: &str) -> Result<Vec<StockLedgerEntry>, StoreError> {
        scan(&self.instance, &keys::stock_prefix(product))
    }

    /// Re-derive the running balance from the first entry and check every
    /// entry against it. Returns the derived balance.
    pub fn verify(&self, product: &str) -> Result<i64, LedgerBreak> {
        let broken = |seq: u64, reason: String| LedgerBreak {
            product: product.to_string(),
            seq,
            reason,
        };

        let history = self.history(product).map_err(|e| broken(0, e.to_string()))?;
        let running = verify_chain(product, &history)?;

        let balance = self.balance(product).map_err(|e| broken(0, e.to_string()))?;
        if balance != running {
            return Err(broken(
                history.last().map(|e| e.seq).unwrap_or(0),
                format!("head balance {balance} differs from running sum {running}"),
            ));
        }
        Ok(running)
    }
}

/// Check an ordered history against the per-kind balance rules.
pub fn verify_chain(product: &str, history: &[StockLedgerEntry]) -> Result<i64, LedgerBreak> {
    let broken = |seq: u64, reason: String| LedgerBreak {
        product: product.to_string(),
        seq,
        reason,
    };

    let mut running = 0i64;
    for (index, entry) in history.iter().enumerate() {
        let expected_seq = index as u64 + 1;
        if entry.seq != expected_seq {
            return Err(broken(entry.seq, format!("expected sequence {expected_seq}")));
        }
        if entry.previous_balance != running {
            return Err(broken(
                entry.seq,
                format!("previous balance {} but running sum is {running}", entry.previous_balance),
            ));
        }
        let sign_ok = match entry.kind {
            MovementKind::In | MovementKind::Return => entry.quantity_delta > 0,
            MovementKind::Out => entry.quantity_delta < 0,
            MovementKind::Adjustment => entry.target_balance == Some(entry.new_balance),
        };
        if !sign_ok || entry.previous_balance.checked_add(entry.quantity_delta) != Some(entry.new_balance) {
            return Err(broken(entry.seq, format!("{:?} entry does not add up", entry.kind)));
        }
        running = entry.new_balance;
    }
    Ok(running)
}
