//! Cascade registry: what a successful transition sets off, in order.
//!
//! Rules are keyed by `(workflow, target stage)` with an optional source
//! stage filter. The table is static data; the executor runs it.
use std::fmt;

use serde::Serialize;

use crate::config::TenantSettings;
use crate::document::{Contract, Document, DocumentBody, Invoice};
use crate::ledger::StockMovement;
use crate::outbox::SideEffectKind;
use crate::records::FinanceKind;
use crate::stage::{InvoiceKind, Stage, Workflow};

/// Kinds of record a cascade can create.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Invoice,
    Contract,
    FinanceRecord,
}

/// What a `CreateDocument` mapper produces from its source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewRecord {
    Document(DocumentBody),
    Finance { kind: FinanceKind, amount: u64 },
}

/// Per-tenant inputs a mapper may read.
#[derive(Debug, Clone, Copy)]
pub struct CascadeContext {
    pub settings: TenantSettings,
}

pub type FieldMapper = fn(&Document, &CascadeContext) -> Option<NewRecord>;
pub type ItemSelector = fn(&Document) -> Vec<(String, u64)>;

pub enum Cascade {
    /// Create a record whose fields are mapped from the source document.
    /// `None` from the mapper means the source lacks a field the target
    /// stage should have required.
    CreateDocument { target: RecordType, mapper: FieldMapper },
    /// Post one ledger movement per selected `(product, quantity)`.
    AdjustStock {
        movement: fn(u64) -> StockMovement,
        items: ItemSelector,
    },
    /// Enqueue an intent in the outbox.
    EmitSideEffect {
        kind: SideEffectKind,
        template: &'static str,
    },
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cascade::CreateDocument { target, .. } => write!(f, "CreateDocument({target:?})"),
            Cascade::AdjustStock { movement, .. } => {
                write!(f, "AdjustStock({:?})", movement(1).kind())
            }
            Cascade::EmitSideEffect { kind, template } => {
                write!(f, "EmitSideEffect({kind:?}, {template})")
            }
        }
    }
}

#[derive(Debug)]
pub struct CascadeRule {
    pub workflows: &'static [Workflow],
    pub to: Stage,
    pub only_from: Option<Stage>,
    pub effects: &'static [Cascade],
}

const OPPORTUNITY: &[Workflow] = &[Workflow::Opportunity];
const QUOTE: &[Workflow] = &[Workflow::Quote];
const RETURN_ORDER: &[Workflow] = &[Workflow::ReturnOrder];
const ANY_INVOICE: &[Workflow] = &[
    Workflow::Invoice(InvoiceKind::Sales),
    Workflow::Invoice(InvoiceKind::Purchase),
    Workflow::Invoice(InvoiceKind::Service),
];
const SALES_INVOICE: &[Workflow] = &[Workflow::Invoice(InvoiceKind::Sales)];
const PURCHASE_INVOICE: &[Workflow] = &[Workflow::Invoice(InvoiceKind::Purchase)];
const INCOME_INVOICE: &[Workflow] = &[
    Workflow::Invoice(InvoiceKind::Sales),
    Workflow::Invoice(InvoiceKind::Service),
];

static RULES: &[CascadeRule] = &[
    CascadeRule {
        workflows: OPPORTUNITY,
        to: Stage::Won,
        only_from: None,
        effects: &[
            Cascade::CreateDocument {
                target: RecordType::Contract,
                mapper: contract_from_opportunity,
            },
            Cascade::EmitSideEffect {
                kind: SideEffectKind::Notification,
                template: "opportunity.won",
            },
        ],
    },
    CascadeRule {
        workflows: QUOTE,
        to: Stage::Sent,
        only_from: None,
        effects: &[Cascade::EmitSideEffect {
            kind: SideEffectKind::Email,
            template: "quote.sent",
        }],
    },
    CascadeRule {
        workflows: QUOTE,
        to: Stage::Accepted,
        only_from: None,
        effects: &[
            Cascade::CreateDocument {
                target: RecordType::Invoice,
                mapper: invoice_from_quote,
            },
            Cascade::CreateDocument {
                target: RecordType::Contract,
                mapper: contract_from_quote,
            },
        ],
    },
    CascadeRule {
        workflows: ANY_INVOICE,
        to: Stage::Sent,
        only_from: None,
        effects: &[Cascade::EmitSideEffect {
            kind: SideEffectKind::Email,
            template: "invoice.sent",
        }],
    },
    CascadeRule {
        workflows: SALES_INVOICE,
        to: Stage::Shipped,
        only_from: None,
        effects: &[Cascade::AdjustStock {
            movement: StockMovement::Out,
            items: invoice_line_items,
        }],
    },
    CascadeRule {
        workflows: PURCHASE_INVOICE,
        to: Stage::Received,
        only_from: None,
        effects: &[Cascade::AdjustStock {
            movement: StockMovement::In,
            items: invoice_line_items,
        }],
    },
    CascadeRule {
        workflows: INCOME_INVOICE,
        to: Stage::Paid,
        only_from: None,
        effects: &[Cascade::CreateDocument {
            target: RecordType::FinanceRecord,
            mapper: income_from_invoice,
        }],
    },
    CascadeRule {
        workflows: PURCHASE_INVOICE,
        to: Stage::Paid,
        only_from: None,
        effects: &[Cascade::CreateDocument {
            target: RecordType::FinanceRecord,
            mapper: expense_from_invoice,
        }],
    },
    CascadeRule {
        workflows: ANY_INVOICE,
        to: Stage::Overdue,
        only_from: None,
        effects: &[Cascade::EmitSideEffect {
            kind: SideEffectKind::Email,
            template: "invoice.overdue",
        }],
    },
    // rejected returns are closed without restocking
    CascadeRule {
        workflows: RETURN_ORDER,
        to: Stage::Completed,
        only_from: Some(Stage::Approved),
        effects: &[Cascade::AdjustStock {
            movement: StockMovement::Return,
            items: return_items,
        }],
    },
];

fn contract_from_opportunity(doc: &Document, _: &CascadeContext) -> Option<NewRecord> {
    let DocumentBody::Opportunity(opportunity) = &doc.body else {
        return None;
    };
    let contract = Contract::new()
        .set_deal_ref(doc.id.as_str())
        .set_value(opportunity.monetary_value?);
    Some(NewRecord::Document(contract.into()))
}

fn invoice_from_quote(doc: &Document, ctx: &CascadeContext) -> Option<NewRecord> {
    let DocumentBody::Quote(quote) = &doc.body else {
        return None;
    };
    let mut invoice = Invoice::new(ctx.settings.default_invoice_kind)
        .set_quote_ref(doc.id.as_str())
        .set_total_amount(quote.total?);
    invoice.line_items = quote.line_items.clone();
    Some(NewRecord::Document(invoice.into()))
}

fn contract_from_quote(doc: &Document, _: &CascadeContext) -> Option<NewRecord> {
    let DocumentBody::Quote(quote) = &doc.body else {
        return None;
    };
    let contract = Contract::new()
        .set_deal_ref(quote.opportunity_ref.as_deref()?)
        .set_value(quote.total?);
    Some(NewRecord::Document(contract.into()))
}

fn finance_from_invoice(doc: &Document, kind: FinanceKind) -> Option<NewRecord> {
    let DocumentBody::Invoice(invoice) = &doc.body else {
        return None;
    };
    Some(NewRecord::Finance {
        kind,
        amount: invoice.total_amount?,
    })
}

fn income_from_invoice(doc: &Document, _: &CascadeContext) -> Option<NewRecord> {
    finance_from_invoice(doc, FinanceKind::Income)
}

fn expense_from_invoice(doc: &Document, _: &CascadeContext) -> Option<NewRecord> {
    finance_from_invoice(doc, FinanceKind::Expense)
}

fn invoice_line_items(doc: &Document) -> Vec<(String, u64)> {
    match &doc.body {
        DocumentBody::Invoice(invoice) => invoice
            .line_items
            .iter()
            .map(|item| (item.product_ref.clone(), item.quantity))
            .collect(),
        _ => vec![],
    }
}

fn return_items(doc: &Document) -> Vec<(String, u64)> {
    match &doc.body {
        DocumentBody::ReturnOrder(order) => order
            .items
            .iter()
            .map(|item| (item.product_ref.clone(), item.quantity))
            .collect(),
        _ => vec![],
    }
}

pub struct CascadeRegistry;

impl CascadeRegistry {
    pub fn rules() -> &'static [CascadeRule] {
        RULES
    }

    /// Effects of `workflow` moving `from -> to`, in the order they run.
    pub fn cascades_for(workflow: Workflow, from: Stage, to: Stage) -> Vec<&'static Cascade> {
        RULES
            .iter()
            .filter(|rule| rule.workflows.contains(&workflow) && rule.to == to)
            .filter(|rule| rule.only_from.is_none_or(|only| only == from))
            .flat_map(|rule| rule.effects.iter())
            .collect()
    }

    /// Number of records a successful `from -> to` creates.
    pub fn created_document_count(workflow: Workflow, from: Stage, to: Stage) -> usize {
        Self::cascades_for(workflow, from, to)
            .into_iter()
            .filter(|cascade| matches!(cascade, Cascade::CreateDocument { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{LineItem, Opportunity, Quote};
    use crate::types::TimeStamp;

    fn doc(id: &str, stage: Stage, body: impl Into<DocumentBody>) -> Document {
        Document {
            id: id.into(),
            tenant_id: "acme".into(),
            stage,
            version: 1,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
            body: body.into(),
        }
    }

    #[test]
    fn accepted_quote_creates_invoice_then_contract() {
        let cascades = CascadeRegistry::cascades_for(Workflow::Quote, Stage::Sent, Stage::Accepted);
        let targets: Vec<_> = cascades
            .iter()
            .map(|cascade| match cascade {
                Cascade::CreateDocument { target, .. } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![Some(RecordType::Invoice), Some(RecordType::Contract)]);
    }

    #[test]
    fn only_approved_returns_restock() {
        assert_eq!(
            CascadeRegistry::cascades_for(Workflow::ReturnOrder, Stage::Approved, Stage::Completed).len(),
            1
        );
        assert!(CascadeRegistry::cascades_for(Workflow::ReturnOrder, Stage::Rejected, Stage::Completed).is_empty());
    }

    #[test]
    fn paid_invoices_book_by_kind() {
        let invoice = |kind| doc("inv_1", Stage::Sent, Invoice::new(kind).set_total_amount(900));
        let ctx = CascadeContext {
            settings: TenantSettings::default(),
        };

        for (kind, expected) in [
            (InvoiceKind::Sales, FinanceKind::Income),
            (InvoiceKind::Service, FinanceKind::Income),
            (InvoiceKind::Purchase, FinanceKind::Expense),
        ] {
            let cascades = CascadeRegistry::cascades_for(Workflow::Invoice(kind), Stage::Sent, Stage::Paid);
            let [Cascade::CreateDocument { mapper, .. }] = cascades.as_slice() else {
                panic!("unexpected cascades {cascades:?}");
            };
            assert_eq!(
                mapper(&invoice(kind), &ctx),
                Some(NewRecord::Finance {
                    kind: expected,
                    amount: 900
                })
            );
        }
    }

    #[test]
    fn quote_mapper_uses_tenant_invoice_kind() {
        let quote = doc(
            "quote_1",
            Stage::Sent,
            Quote::new()
                .set_opportunity_ref("opp_1")
                .set_total(48000)
                .add_line_item(LineItem::new("sku-a", 2, 24000)),
        );
        let ctx = CascadeContext {
            settings: TenantSettings {
                default_invoice_kind: InvoiceKind::Service,
                allow_backorder: false,
            },
        };

        let Some(NewRecord::Document(DocumentBody::Invoice(invoice))) = invoice_from_quote(&quote, &ctx) else {
            panic!("expected an invoice");
        };
        assert_eq!(invoice.kind, InvoiceKind::Service);
        assert_eq!(invoice.quote_ref.as_deref(), Some("quote_1"));
        assert_eq!(invoice.total_amount, Some(48000));
        assert_eq!(invoice.line_items.len(), 1);
    }

    #[test]
    fn won_contract_needs_a_value() {
        let ctx = CascadeContext {
            settings: TenantSettings::default(),
        };
        let without = doc("opp_1", Stage::Negotiation, Opportunity::new("deal"));
        assert_eq!(contract_from_opportunity(&without, &ctx), None);
    }
}
