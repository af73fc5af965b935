//! Stage catalog: the finite stage set and legal-transition table of every
//! document workflow.
//!
//! This is the single source of truth for which stages exist, which are
//! terminal, which moves are allowed and what fields a target stage needs.
//! Lookups fail closed: a `(workflow, stage)` pair that is not in the table
//! yields an empty set.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::Field;
use crate::error::ParseError;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    #[n(0)]
    Opportunity,
    #[n(1)]
    Quote,
    #[n(2)]
    Invoice,
    #[n(3)]
    Contract,
    #[n(4)]
    ReturnOrder,
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    #[n(0)]
    Sales,
    #[n(1)]
    Purchase,
    #[n(2)]
    Service,
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    // opportunity
    #[n(0)]
    Lead,
    #[n(1)]
    Contacted,
    #[n(2)]
    Proposal,
    #[n(3)]
    Negotiation,
    #[n(4)]
    Won,
    #[n(5)]
    Lost,
    // shared by quote, invoice, contract
    #[n(6)]
    Draft,
    #[n(7)]
    Sent,
    #[n(8)]
    Waiting,
    #[n(9)]
    Accepted,
    #[n(10)]
    Declined,
    #[n(11)]
    Expired,
    #[n(12)]
    Shipped,
    #[n(13)]
    Received,
    #[n(14)]
    Paid,
    #[n(15)]
    Overdue,
    #[n(16)]
    Cancelled,
    #[n(17)]
    Active,
    #[n(18)]
    Terminated,
    // return order
    #[n(19)]
    Pending,
    #[n(20)]
    Approved,
    #[n(21)]
    Rejected,
    #[n(22)]
    Completed,
}

/// A catalog key. Invoices split into three workflows by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Workflow {
    Opportunity,
    Quote,
    Invoice(InvoiceKind),
    Contract,
    ReturnOrder,
}

impl DocType {
    pub const ALL: [DocType; 5] = [
        DocType::Opportunity,
        DocType::Quote,
        DocType::Invoice,
        DocType::Contract,
        DocType::ReturnOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Opportunity => "OPPORTUNITY",
            DocType::Quote => "QUOTE",
            DocType::Invoice => "INVOICE",
            DocType::Contract => "CONTRACT",
            DocType::ReturnOrder => "RETURN_ORDER",
        }
    }

    /// Bech32 prefix for ids of this type.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            DocType::Opportunity => "opp_",
            DocType::Quote => "quote_",
            DocType::Invoice => "inv_",
            DocType::Contract => "ctr_",
            DocType::ReturnOrder => "ret_",
        }
    }
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Sales => "SALES",
            InvoiceKind::Purchase => "PURCHASE",
            InvoiceKind::Service => "SERVICE",
        }
    }
}

impl Stage {
    pub const ALL: [Stage; 23] = [
        Stage::Lead,
        Stage::Contacted,
        Stage::Proposal,
        Stage::Negotiation,
        Stage::Won,
        Stage::Lost,
        Stage::Draft,
        Stage::Sent,
        Stage::Waiting,
        Stage::Accepted,
        Stage::Declined,
        Stage::Expired,
        Stage::Shipped,
        Stage::Received,
        Stage::Paid,
        Stage::Overdue,
        Stage::Cancelled,
        Stage::Active,
        Stage::Terminated,
        Stage::Pending,
        Stage::Approved,
        Stage::Rejected,
        Stage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lead => "LEAD",
            Stage::Contacted => "CONTACTED",
            Stage::Proposal => "PROPOSAL",
            Stage::Negotiation => "NEGOTIATION",
            Stage::Won => "WON",
            Stage::Lost => "LOST",
            Stage::Draft => "DRAFT",
            Stage::Sent => "SENT",
            Stage::Waiting => "WAITING",
            Stage::Accepted => "ACCEPTED",
            Stage::Declined => "DECLINED",
            Stage::Expired => "EXPIRED",
            Stage::Shipped => "SHIPPED",
            Stage::Received => "RECEIVED",
            Stage::Paid => "PAID",
            Stage::Overdue => "OVERDUE",
            Stage::Cancelled => "CANCELLED",
            Stage::Active => "ACTIVE",
            Stage::Terminated => "TERMINATED",
            Stage::Pending => "PENDING",
            Stage::Approved => "APPROVED",
            Stage::Rejected => "REJECTED",
            Stage::Completed => "COMPLETED",
        }
    }
}

impl Workflow {
    pub const ALL: [Workflow; 7] = [
        Workflow::Opportunity,
        Workflow::Quote,
        Workflow::Invoice(InvoiceKind::Sales),
        Workflow::Invoice(InvoiceKind::Purchase),
        Workflow::Invoice(InvoiceKind::Service),
        Workflow::Contract,
        Workflow::ReturnOrder,
    ];

    pub fn doc_type(&self) -> DocType {
        match self {
            Workflow::Opportunity => DocType::Opportunity,
            Workflow::Quote => DocType::Quote,
            Workflow::Invoice(_) => DocType::Invoice,
            Workflow::Contract => DocType::Contract,
            Workflow::ReturnOrder => DocType::ReturnOrder,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workflow::Invoice(kind) => write!(f, "{} INVOICE", kind.as_str()),
            other => f.write_str(other.doc_type().as_str()),
        }
    }
}

impl FromStr for DocType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        DocType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ParseError::UnknownDocType(s.to_string()))
    }
}

impl FromStr for Stage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Stage::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| ParseError::UnknownStage(s.to_string()))
    }
}

struct Lifecycle {
    initial: Stage,
    stages: &'static [Stage],
    terminal: &'static [Stage],
    edges: &'static [(Stage, &'static [Stage])],
    // reachable from every non-terminal stage other than themselves
    escapes: &'static [Stage],
    required: &'static [(Stage, &'static [Field])],
}

static OPPORTUNITY: Lifecycle = Lifecycle {
    initial: Stage::Lead,
    stages: &[
        Stage::Lead,
        Stage::Contacted,
        Stage::Proposal,
        Stage::Negotiation,
        Stage::Won,
        Stage::Lost,
    ],
    terminal: &[Stage::Won, Stage::Lost],
    edges: &[
        (Stage::Lead, &[Stage::Contacted]),
        (Stage::Contacted, &[Stage::Proposal]),
        (Stage::Proposal, &[Stage::Negotiation]),
        (Stage::Negotiation, &[Stage::Won, Stage::Lost]),
    ],
    escapes: &[],
    required: &[
        (Stage::Contacted, &[Field::CustomerRef]),
        (Stage::Won, &[Field::CustomerRef, Field::MonetaryValue]),
        (Stage::Lost, &[Field::LostReason]),
    ],
};

static QUOTE: Lifecycle = Lifecycle {
    initial: Stage::Draft,
    stages: &[
        Stage::Draft,
        Stage::Sent,
        Stage::Waiting,
        Stage::Accepted,
        Stage::Declined,
        Stage::Expired,
    ],
    terminal: &[Stage::Accepted, Stage::Declined, Stage::Expired],
    edges: &[
        (Stage::Draft, &[Stage::Sent]),
        (
            Stage::Sent,
            &[Stage::Waiting, Stage::Accepted, Stage::Declined, Stage::Expired],
        ),
        (Stage::Waiting, &[Stage::Sent]),
    ],
    escapes: &[],
    required: &[
        (Stage::Sent, &[Field::LineItems, Field::Total]),
        (Stage::Accepted, &[Field::OpportunityRef, Field::Total]),
    ],
};

const INVOICE_REQUIRED: &[(Stage, &[Field])] = &[
    (Stage::Sent, &[Field::TotalAmount, Field::DueDate]),
    (Stage::Shipped, &[Field::LineItems]),
    (Stage::Received, &[Field::LineItems]),
    (Stage::Paid, &[Field::TotalAmount]),
];

static SALES_INVOICE: Lifecycle = Lifecycle {
    initial: Stage::Draft,
    stages: &[
        Stage::Draft,
        Stage::Sent,
        Stage::Shipped,
        Stage::Paid,
        Stage::Overdue,
        Stage::Cancelled,
    ],
    terminal: &[Stage::Paid, Stage::Cancelled],
    edges: &[
        (Stage::Draft, &[Stage::Sent]),
        (Stage::Sent, &[Stage::Shipped]),
        (Stage::Shipped, &[Stage::Paid]),
        (Stage::Overdue, &[Stage::Paid]),
    ],
    escapes: &[Stage::Overdue, Stage::Cancelled],
    required: INVOICE_REQUIRED,
};

static PURCHASE_INVOICE: Lifecycle = Lifecycle {
    initial: Stage::Draft,
    stages: &[
        Stage::Draft,
        Stage::Sent,
        Stage::Received,
        Stage::Paid,
        Stage::Overdue,
        Stage::Cancelled,
    ],
    terminal: &[Stage::Paid, Stage::Cancelled],
    edges: &[
        (Stage::Draft, &[Stage::Sent]),
        (Stage::Sent, &[Stage::Received]),
        (Stage::Received, &[Stage::Paid]),
        (Stage::Overdue, &[Stage::Paid]),
    ],
    escapes: &[Stage::Overdue, Stage::Cancelled],
    required: INVOICE_REQUIRED,
};

static SERVICE_INVOICE: Lifecycle = Lifecycle {
    initial: Stage::Draft,
    stages: &[
        Stage::Draft,
        Stage::Sent,
        Stage::Paid,
        Stage::Overdue,
        Stage::Cancelled,
    ],
    terminal: &[Stage::Paid, Stage::Cancelled],
    edges: &[
        (Stage::Draft, &[Stage::Sent]),
        (Stage::Sent, &[Stage::Paid]),
        (Stage::Overdue, &[Stage::Paid]),
    ],
    escapes: &[Stage::Overdue, Stage::Cancelled],
    required: INVOICE_REQUIRED,
};

static CONTRACT: Lifecycle = Lifecycle {
    initial: Stage::Draft,
    stages: &[
        Stage::Draft,
        Stage::Active,
        Stage::Expired,
        Stage::Terminated,
    ],
    terminal: &[Stage::Expired, Stage::Terminated],
    edges: &[
        (Stage::Draft, &[Stage::Active]),
        (Stage::Active, &[Stage::Expired, Stage::Terminated]),
    ],
    escapes: &[],
    required: &[(
        Stage::Active,
        &[Field::DealRef, Field::Value, Field::StartDate, Field::EndDate],
    )],
};

static RETURN_ORDER: Lifecycle = Lifecycle {
    initial: Stage::Pending,
    stages: &[
        Stage::Pending,
        Stage::Approved,
        Stage::Rejected,
        Stage::Completed,
    ],
    terminal: &[Stage::Completed],
    edges: &[
        (Stage::Pending, &[Stage::Approved, Stage::Rejected]),
        (Stage::Approved, &[Stage::Completed]),
        (Stage::Rejected, &[Stage::Completed]),
    ],
    escapes: &[],
    required: &[(
        Stage::Approved,
        &[Field::InvoiceRef, Field::Items, Field::RefundAmount],
    )],
};

fn lifecycle(workflow: Workflow) -> &'static Lifecycle {
    match workflow {
        Workflow::Opportunity => &OPPORTUNITY,
        Workflow::Quote => &QUOTE,
        Workflow::Invoice(InvoiceKind::Sales) => &SALES_INVOICE,
        Workflow::Invoice(InvoiceKind::Purchase) => &PURCHASE_INVOICE,
        Workflow::Invoice(InvoiceKind::Service) => &SERVICE_INVOICE,
        Workflow::Contract => &CONTRACT,
        Workflow::ReturnOrder => &RETURN_ORDER,
    }
}

/// Static lookups over the lifecycle tables.
pub struct StageCatalog;

impl StageCatalog {
    pub fn initial_stage(workflow: Workflow) -> Stage {
        lifecycle(workflow).initial
    }

    pub fn stages(workflow: Workflow) -> &'static [Stage] {
        lifecycle(workflow).stages
    }

    pub fn knows(workflow: Workflow, stage: Stage) -> bool {
        lifecycle(workflow).stages.contains(&stage)
    }

    pub fn is_terminal(workflow: Workflow, stage: Stage) -> bool {
        lifecycle(workflow).terminal.contains(&stage)
    }

    pub fn legal_transitions(workflow: Workflow, from: Stage) -> BTreeSet<Stage> {
        let table = lifecycle(workflow);
        if !table.stages.contains(&from) || table.terminal.contains(&from) {
            return BTreeSet::new();
        }

        let direct = table
            .edges
            .iter()
            .filter(|(source, _)| *source == from)
            .flat_map(|(_, targets)| targets.iter().copied());

        direct
            .chain(table.escapes.iter().copied())
            .filter(|to| *to != from)
            .collect()
    }

    pub fn required_fields(workflow: Workflow, to: Stage) -> BTreeSet<Field> {
        let table = lifecycle(workflow);
        if !table.stages.contains(&to) {
            return BTreeSet::new();
        }

        table
            .required
            .iter()
            .filter(|(stage, _)| *stage == to)
            .flat_map(|(_, fields)| fields.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_reachable_from_every_open_sales_invoice_stage() {
        let wf = Workflow::Invoice(InvoiceKind::Sales);
        for from in [Stage::Draft, Stage::Sent, Stage::Shipped, Stage::Overdue] {
            assert!(
                StageCatalog::legal_transitions(wf, from).contains(&Stage::Cancelled),
                "CANCELLED should be reachable from {from}"
            );
        }
    }

    #[test]
    fn overdue_does_not_loop_to_itself() {
        let wf = Workflow::Invoice(InvoiceKind::Service);
        let allowed = StageCatalog::legal_transitions(wf, Stage::Overdue);
        assert!(!allowed.contains(&Stage::Overdue));
        assert!(allowed.contains(&Stage::Paid));
    }

    #[test]
    fn service_invoices_have_no_shipping_step() {
        let wf = Workflow::Invoice(InvoiceKind::Service);
        assert!(!StageCatalog::knows(wf, Stage::Shipped));
        assert!(StageCatalog::legal_transitions(wf, Stage::Sent).contains(&Stage::Paid));
        assert!(StageCatalog::legal_transitions(wf, Stage::Shipped).is_empty());
    }

    #[test]
    fn unknown_pairs_fail_closed() {
        assert!(StageCatalog::legal_transitions(Workflow::Contract, Stage::Lead).is_empty());
        assert!(StageCatalog::required_fields(Workflow::Quote, Stage::Paid).is_empty());
    }

    #[test]
    fn waiting_returns_to_sent() {
        let allowed = StageCatalog::legal_transitions(Workflow::Quote, Stage::Waiting);
        assert_eq!(allowed.into_iter().collect::<Vec<_>>(), vec![Stage::Sent]);
    }

    #[test]
    fn lost_requires_a_reason() {
        let fields = StageCatalog::required_fields(Workflow::Opportunity, Stage::Lost);
        assert!(fields.contains(&Field::LostReason));
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("return_order".parse::<DocType>().unwrap(), DocType::ReturnOrder);
        assert_eq!("RETURN-ORDER".parse::<DocType>().unwrap(), DocType::ReturnOrder);
        assert_eq!("accepted".parse::<Stage>().unwrap(), Stage::Accepted);
        assert!("SHIPPING".parse::<Stage>().is_err());
    }
}
