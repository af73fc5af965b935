//! Transition validation against the stage catalog
use crate::document::Document;
use crate::error::ValidationError;
use crate::stage::{Stage, StageCatalog, Workflow};

/// Proof that a transition passed validation. It can only be built here and
/// is consumed by the executor, so a stage cannot change without going
/// through [`TransitionValidator::validate`].
#[derive(Debug, PartialEq, Eq)]
pub struct ValidTransition {
    workflow: Workflow,
    from: Stage,
    to: Stage,
    version: u64,
}

impl ValidTransition {
    pub fn workflow(&self) -> Workflow {
        self.workflow
    }
    pub fn from(&self) -> Stage {
        self.from
    }
    pub fn to(&self) -> Stage {
        self.to
    }
    /// Document version the validation was performed against.
    pub fn version(&self) -> u64 {
        self.version
    }
}

pub struct TransitionValidator;

impl TransitionValidator {
    /// Rules, in order: terminal stages are immutable, the target must be a
    /// legal next stage, and every required field of the target must be set
    /// (all missing fields are reported together).
    pub fn validate(snapshot: &Document, requested: Stage) -> Result<ValidTransition, ValidationError> {
        let workflow = snapshot.workflow();
        let current = snapshot.stage;

        if StageCatalog::is_terminal(workflow, current) {
            return Err(ValidationError::Immutable {
                workflow,
                stage: current,
            });
        }

        let allowed = StageCatalog::legal_transitions(workflow, current);
        if !allowed.contains(&requested) {
            return Err(ValidationError::IllegalTransition {
                workflow,
                from: current,
                to: requested,
                allowed: allowed.into_iter().collect(),
            });
        }

        let missing = snapshot.missing_fields(&StageCatalog::required_fields(workflow, requested));
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields {
                workflow,
                to: requested,
                fields: missing,
            });
        }

        Ok(ValidTransition {
            workflow,
            from: current,
            to: requested,
            version: snapshot.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentBody, Field, Invoice, LineItem, Opportunity};
    use crate::stage::InvoiceKind;
    use crate::types::TimeStamp;

    fn doc(stage: Stage, body: impl Into<DocumentBody>) -> Document {
        Document {
            id: "doc_1".into(),
            tenant_id: "acme".into(),
            stage,
            version: 3,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
            body: body.into(),
        }
    }

    #[test]
    fn terminal_check_comes_first() {
        // WON -> LEAD is also illegal, but immutability wins
        let won = doc(Stage::Won, Opportunity::new("deal"));
        assert!(matches!(
            TransitionValidator::validate(&won, Stage::Lead),
            Err(ValidationError::Immutable { stage: Stage::Won, .. })
        ));
    }

    #[test]
    fn illegal_transition_reports_allowed_stages() {
        let lead = doc(Stage::Lead, Opportunity::new("deal"));
        match TransitionValidator::validate(&lead, Stage::Won) {
            Err(ValidationError::IllegalTransition { allowed, .. }) => {
                assert_eq!(allowed, vec![Stage::Contacted]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn all_missing_fields_are_accumulated() {
        let negotiation = doc(Stage::Negotiation, Opportunity::new("deal"));
        match TransitionValidator::validate(&negotiation, Stage::Won) {
            Err(ValidationError::MissingFields { fields, .. }) => {
                assert_eq!(fields, vec![Field::MonetaryValue, Field::CustomerRef]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn token_carries_the_validated_version() {
        let invoice = doc(
            Stage::Sent,
            Invoice::new(InvoiceKind::Sales).add_line_item(LineItem::new("sku", 1, 10)),
        );
        let token = TransitionValidator::validate(&invoice, Stage::Shipped).unwrap();
        assert_eq!(token.from(), Stage::Sent);
        assert_eq!(token.to(), Stage::Shipped);
        assert_eq!(token.version(), 3);
        assert_eq!(token.workflow(), Workflow::Invoice(InvoiceKind::Sales));
    }
}
