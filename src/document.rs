//! Sales documents: the shared header plus a typed body per document type
use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::stage::{DocType, InvoiceKind, Stage, StageCatalog, Workflow};
use crate::types::TimeStamp;
use crate::utils::new_record_id;

/// A named attribute a stage can require before it may be entered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    MonetaryValue,
    CustomerRef,
    LostReason,
    OpportunityRef,
    Total,
    LineItems,
    QuoteRef,
    TotalAmount,
    TaxRate,
    DueDate,
    DealRef,
    Value,
    StartDate,
    EndDate,
    AutoRenew,
    InvoiceRef,
    Items,
    RefundAmount,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::MonetaryValue => "monetaryValue",
            Field::CustomerRef => "customerRef",
            Field::LostReason => "lostReason",
            Field::OpportunityRef => "opportunityRef",
            Field::Total => "total",
            Field::LineItems => "lineItems",
            Field::QuoteRef => "quoteRef",
            Field::TotalAmount => "totalAmount",
            Field::TaxRate => "taxRate",
            Field::DueDate => "dueDate",
            Field::DealRef => "dealRef",
            Field::Value => "value",
            Field::StartDate => "startDate",
            Field::EndDate => "endDate",
            Field::AutoRenew => "autoRenew",
            Field::InvoiceRef => "invoiceRef",
            Field::Items => "items",
            Field::RefundAmount => "refundAmount",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub product_ref: String,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub unit_price: u64, // minor units
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReturnItem {
    #[n(0)]
    pub product_ref: String,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub reason: String,
}

impl LineItem {
    pub fn new(product_ref: impl Into<String>, quantity: u64, unit_price: u64) -> Self {
        Self {
            product_ref: product_ref.into(),
            quantity,
            unit_price,
        }
    }
}

impl ReturnItem {
    pub fn new(product_ref: impl Into<String>, quantity: u64, reason: impl Into<String>) -> Self {
        Self {
            product_ref: product_ref.into(),
            quantity,
            reason: reason.into(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Opportunity {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub monetary_value: Option<u64>,
    #[n(2)]
    pub customer_ref: Option<String>,
    #[n(3)]
    pub lost_reason: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Quote {
    #[n(0)]
    pub opportunity_ref: Option<String>,
    #[n(1)]
    pub total: Option<u64>,
    #[n(2)]
    pub line_items: Vec<LineItem>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    #[n(0)]
    pub kind: InvoiceKind,
    #[n(1)]
    pub quote_ref: Option<String>,
    #[n(2)]
    pub total_amount: Option<u64>,
    #[n(3)]
    pub tax_rate_bps: Option<u32>,
    #[n(4)]
    pub due_date: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub line_items: Vec<LineItem>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Contract {
    #[n(0)]
    pub deal_ref: Option<String>,
    #[n(1)]
    pub value: Option<u64>,
    #[n(2)]
    pub start_date: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub end_date: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub auto_renew: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnOrder {
    #[n(0)]
    pub invoice_ref: Option<String>,
    #[n(1)]
    pub items: Vec<ReturnItem>,
    #[n(2)]
    pub refund_amount: Option<u64>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum DocumentBody {
    #[n(0)]
    Opportunity(#[n(0)] Opportunity),
    #[n(1)]
    Quote(#[n(0)] Quote),
    #[n(2)]
    Invoice(#[n(0)] Invoice),
    #[n(3)]
    Contract(#[n(0)] Contract),
    #[n(4)]
    ReturnOrder(#[n(0)] ReturnOrder),
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Document {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub stage: Stage,
    #[n(3)]
    pub version: u64, // optimistic concurrency token
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
    #[n(5)]
    pub updated_at: TimeStamp<Utc>,
    #[n(6)]
    pub body: DocumentBody,
}

impl Opportunity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
    pub fn set_monetary_value(mut self, value: u64) -> Self {
        self.monetary_value = Some(value);
        self
    }
    pub fn set_customer_ref(mut self, customer: impl Into<String>) -> Self {
        self.customer_ref = Some(customer.into());
        self
    }
    pub fn set_lost_reason(mut self, reason: impl Into<String>) -> Self {
        self.lost_reason = Some(reason.into());
        self
    }
}

impl Quote {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_opportunity_ref(mut self, opportunity: impl Into<String>) -> Self {
        self.opportunity_ref = Some(opportunity.into());
        self
    }
    pub fn set_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
    pub fn add_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }
}

impl Invoice {
    pub fn new(kind: InvoiceKind) -> Self {
        Self {
            kind,
            quote_ref: None,
            total_amount: None,
            tax_rate_bps: None,
            due_date: None,
            line_items: vec![],
        }
    }
    pub fn set_quote_ref(mut self, quote: impl Into<String>) -> Self {
        self.quote_ref = Some(quote.into());
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = Some(amount);
        self
    }
    pub fn set_tax_rate_bps(mut self, bps: u32) -> Self {
        self.tax_rate_bps = Some(bps);
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }
    pub fn add_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }
}

impl Contract {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_deal_ref(mut self, deal: impl Into<String>) -> Self {
        self.deal_ref = Some(deal.into());
        self
    }
    pub fn set_value(mut self, value: u64) -> Self {
        self.value = Some(value);
        self
    }
    pub fn set_start_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }
    pub fn set_end_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.end_date = Some(date);
        self
    }
    pub fn set_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }

    /// True when `other` differs from `self` in anything but the renewal
    /// fields (`end_date`, `auto_renew`).
    pub fn differs_outside_renewal(&self, other: &Contract) -> bool {
        let mut normalised = other.clone();
        normalised.end_date = self.end_date.clone();
        normalised.auto_renew = self.auto_renew;
        normalised != *self
    }
}

impl ReturnOrder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_invoice_ref(mut self, invoice: impl Into<String>) -> Self {
        self.invoice_ref = Some(invoice.into());
        self
    }
    pub fn add_item(mut self, item: ReturnItem) -> Self {
        self.items.push(item);
        self
    }
    pub fn set_refund_amount(mut self, amount: u64) -> Self {
        self.refund_amount = Some(amount);
        self
    }
}

impl From<Opportunity> for DocumentBody {
    fn from(value: Opportunity) -> Self {
        DocumentBody::Opportunity(value)
    }
}
impl From<Quote> for DocumentBody {
    fn from(value: Quote) -> Self {
        DocumentBody::Quote(value)
    }
}
impl From<Invoice> for DocumentBody {
    fn from(value: Invoice) -> Self {
        DocumentBody::Invoice(value)
    }
}
impl From<Contract> for DocumentBody {
    fn from(value: Contract) -> Self {
        DocumentBody::Contract(value)
    }
}
impl From<ReturnOrder> for DocumentBody {
    fn from(value: ReturnOrder) -> Self {
        DocumentBody::ReturnOrder(value)
    }
}

fn text_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl DocumentBody {
    pub fn workflow(&self) -> Workflow {
        match self {
            DocumentBody::Opportunity(_) => Workflow::Opportunity,
            DocumentBody::Quote(_) => Workflow::Quote,
            DocumentBody::Invoice(invoice) => Workflow::Invoice(invoice.kind),
            DocumentBody::Contract(_) => Workflow::Contract,
            DocumentBody::ReturnOrder(_) => Workflow::ReturnOrder,
        }
    }

    pub fn doc_type(&self) -> DocType {
        self.workflow().doc_type()
    }

    /// Whether `field` is set. Blank strings and empty item lists count as
    /// missing; fields that do not belong to this document type are missing.
    pub fn has_field(&self, field: Field) -> bool {
        match (self, field) {
            (DocumentBody::Opportunity(o), Field::MonetaryValue) => o.monetary_value.is_some(),
            (DocumentBody::Opportunity(o), Field::CustomerRef) => text_present(&o.customer_ref),
            (DocumentBody::Opportunity(o), Field::LostReason) => text_present(&o.lost_reason),

            (DocumentBody::Quote(q), Field::OpportunityRef) => text_present(&q.opportunity_ref),
            (DocumentBody::Quote(q), Field::Total) => q.total.is_some(),
            (DocumentBody::Quote(q), Field::LineItems) => !q.line_items.is_empty(),

            (DocumentBody::Invoice(i), Field::QuoteRef) => text_present(&i.quote_ref),
            (DocumentBody::Invoice(i), Field::TotalAmount) => i.total_amount.is_some(),
            (DocumentBody::Invoice(i), Field::TaxRate) => i.tax_rate_bps.is_some(),
            (DocumentBody::Invoice(i), Field::DueDate) => i.due_date.is_some(),
            (DocumentBody::Invoice(i), Field::LineItems) => !i.line_items.is_empty(),

            (DocumentBody::Contract(c), Field::DealRef) => text_present(&c.deal_ref),
            (DocumentBody::Contract(c), Field::Value) => c.value.is_some(),
            (DocumentBody::Contract(c), Field::StartDate) => c.start_date.is_some(),
            (DocumentBody::Contract(c), Field::EndDate) => c.end_date.is_some(),
            (DocumentBody::Contract(_), Field::AutoRenew) => true,

            (DocumentBody::ReturnOrder(r), Field::InvoiceRef) => text_present(&r.invoice_ref),
            (DocumentBody::ReturnOrder(r), Field::Items) => !r.items.is_empty(),
            (DocumentBody::ReturnOrder(r), Field::RefundAmount) => r.refund_amount.is_some(),

            _ => false,
        }
    }
}

impl Document {
    /// A fresh document at the initial stage of its workflow.
    pub fn new(tenant_id: &str, body: impl Into<DocumentBody>) -> Result<Self, StoreError> {
        let body = body.into();
        let now = TimeStamp::new();
        Ok(Self {
            id: new_record_id(body.doc_type().id_prefix())?,
            tenant_id: tenant_id.to_string(),
            stage: StageCatalog::initial_stage(body.workflow()),
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            body,
        })
    }

    pub fn workflow(&self) -> Workflow {
        self.body.workflow()
    }

    pub fn doc_type(&self) -> DocType {
        self.body.doc_type()
    }

    /// Every field of `required` that is missing, in field order.
    pub fn missing_fields(&self, required: &BTreeSet<Field>) -> Vec<Field> {
        required
            .iter()
            .copied()
            .filter(|field| !self.body.has_field(*field))
            .collect()
    }
}
