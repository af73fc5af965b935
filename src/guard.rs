//! Tenant scoping for every document read and mutation
use tracing::warn;

use crate::document::Document;
use crate::error::TransitionError;
use crate::stage::DocType;
use crate::types::Caller;

pub struct TenantGuard;

impl TenantGuard {
    pub fn admits(caller: &Caller, tenant_id: &str) -> bool {
        caller.cross_tenant_override || caller.tenant_id == tenant_id
    }

    /// Hand a loaded document to the caller only if it belongs to their
    /// tenant. A foreign document is reported exactly like a missing one.
    pub fn scope(
        caller: &Caller,
        doc_type: DocType,
        id: &str,
        found: Option<Document>,
    ) -> Result<Document, TransitionError> {
        match found {
            Some(doc) if Self::admits(caller, &doc.tenant_id) => Ok(doc),
            Some(_) => {
                warn!(
                    tenant = %caller.tenant_id,
                    actor = %caller.actor_id,
                    %doc_type,
                    id,
                    "cross-tenant access refused"
                );
                Err(TransitionError::not_found(doc_type, id))
            }
            None => Err(TransitionError::not_found(doc_type, id)),
        }
    }
}
