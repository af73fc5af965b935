use std::sync::Arc;

use sled::open;
use tempfile::{TempDir, tempdir};

use sales_lifecycle::config::EngineConfig;
use sales_lifecycle::document::{Contract, Invoice, LineItem, Quote, ReturnItem, ReturnOrder};
use sales_lifecycle::error::{ErrorKind, TransitionError};
use sales_lifecycle::ledger::{MovementKind, StockMovement};
use sales_lifecycle::records::FinanceKind;
use sales_lifecycle::types::TimeStamp;
use sales_lifecycle::{Caller, DocType, InvoiceKind, LifecycleService, Stage, TransitionRequest};

fn open_service() -> anyhow::Result<(TempDir, LifecycleService)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join("follow_ups.db"))?;
    Ok((temp_dir, LifecycleService::new(Arc::new(db), EngineConfig::default())))
}

fn acme() -> Caller {
    Caller::new("acme", "user_bob")
}

fn move_to(service: &LifecycleService, caller: &Caller, doc_type: DocType, id: &str, to: Stage) -> Result<(), TransitionError> {
    service.transition(caller, &TransitionRequest::new(doc_type, id, to))?;
    Ok(())
}

fn approved_return(service: &LifecycleService, caller: &Caller) -> anyhow::Result<String> {
    let order = service.create(
        caller,
        ReturnOrder::new()
            .set_invoice_ref("inv_original")
            .add_item(ReturnItem::new("sku-chair", 2, "damaged in transit"))
            .set_refund_amount(3000),
    )?;
    move_to(service, caller, DocType::ReturnOrder, &order.id, Stage::Approved)?;
    Ok(order.id)
}

#[test]
fn one_credit_note_per_return_order() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let order_id = approved_return(&service, &caller)?;

    let note = service.issue_credit_note(&caller, &order_id)?;
    assert_eq!(note.amount, 3000);
    assert_eq!(note.invoice_ref.as_deref(), Some("inv_original"));
    assert!(note.id.starts_with("cn_1"));

    let again = service.issue_credit_note(&caller, &order_id).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Conflict);
    assert!(matches!(again, TransitionError::AlreadyIssued { ref credit_note, .. } if *credit_note == note.id));

    // completing the return keeps the note and restocks the items
    move_to(&service, &caller, DocType::ReturnOrder, &order_id, Stage::Completed)?;
    assert_eq!(service.credit_note_for(&caller, &order_id)?, Some(note));

    let history = service.stock_history(&caller, "sku-chair")?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MovementKind::Return);
    assert_eq!(history[0].new_balance, 2);
    assert_eq!(history[0].cause_ref, order_id);
    Ok(())
}

#[test]
fn completed_after_approval_may_still_get_a_credit_note() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let order_id = approved_return(&service, &caller)?;
    move_to(&service, &caller, DocType::ReturnOrder, &order_id, Stage::Completed)?;

    let note = service.issue_credit_note(&caller, &order_id)?;
    assert_eq!(note.return_order_ref, order_id);
    Ok(())
}

#[test]
fn pending_and_rejected_returns_are_not_eligible() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();

    let order = service.create(
        &caller,
        ReturnOrder::new()
            .set_invoice_ref("inv_original")
            .add_item(ReturnItem::new("sku-lamp", 1, "wrong colour"))
            .set_refund_amount(800),
    )?;
    let pending = service.issue_credit_note(&caller, &order.id).unwrap_err();
    assert_eq!(pending.kind(), ErrorKind::NotEligible);

    move_to(&service, &caller, DocType::ReturnOrder, &order.id, Stage::Rejected)?;
    move_to(&service, &caller, DocType::ReturnOrder, &order.id, Stage::Completed)?;

    let rejected = service.issue_credit_note(&caller, &order.id).unwrap_err();
    assert_eq!(rejected.kind(), ErrorKind::NotEligible);
    // closing a rejected return does not restock
    assert!(service.stock_history(&caller, "sku-lamp")?.is_empty());
    assert_eq!(service.credit_note_for(&caller, &order.id)?, None);
    Ok(())
}

#[test]
fn credit_notes_are_tenant_scoped() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let order_id = approved_return(&service, &caller)?;

    let other = Caller::new("globex", "user_eve");
    let err = service.issue_credit_note(&other, &order_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(service.credit_note_for(&caller, &order_id)?, None);
    Ok(())
}

#[test]
fn paid_invoices_book_finance_records() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let due = TimeStamp::new_with(2030, 6, 30, 0, 0, 0).expect("valid date");

    let sale = service.create(
        &caller,
        Invoice::new(InvoiceKind::Service)
            .set_total_amount(12500)
            .set_due_date(due.clone()),
    )?;
    move_to(&service, &caller, DocType::Invoice, &sale.id, Stage::Sent)?;
    let paid = service.transition(&caller, &TransitionRequest::new(DocType::Invoice, &sale.id, Stage::Paid))?;

    let income = service.finance_record(&caller, &paid.created_documents[0].id)?;
    assert_eq!(income.kind, FinanceKind::Income);
    assert_eq!(income.amount, 12500);
    assert_eq!(income.source_ref, sale.id);

    // purchases receive stock, then book an expense
    let purchase = service.create(
        &caller,
        Invoice::new(InvoiceKind::Purchase)
            .set_total_amount(7000)
            .set_due_date(due)
            .add_line_item(LineItem::new("sku-paper", 70, 100)),
    )?;
    move_to(&service, &caller, DocType::Invoice, &purchase.id, Stage::Sent)?;
    move_to(&service, &caller, DocType::Invoice, &purchase.id, Stage::Received)?;
    assert_eq!(service.stock_balance("sku-paper")?, 70);

    move_to(&service, &caller, DocType::Invoice, &purchase.id, Stage::Overdue)?;
    let paid = service.transition(&caller, &TransitionRequest::new(DocType::Invoice, &purchase.id, Stage::Paid))?;
    let expense = service.finance_record(&caller, &paid.created_documents[0].id)?;
    assert_eq!(expense.kind, FinanceKind::Expense);
    assert_eq!(expense.amount, 7000);

    assert_eq!(service.finance_records(&caller)?.len(), 2);
    let other = Caller::new("globex", "user_eve");
    assert_eq!(
        service.finance_record(&other, &expense.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let templates: Vec<_> = service.outbox().pending()?.into_iter().map(|i| i.template).collect();
    assert_eq!(templates, vec!["invoice.sent", "invoice.sent", "invoice.overdue"]);
    Ok(())
}

#[test]
fn outbox_intents_are_acknowledged_once() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();

    let quote = service.create(&caller, Quote::new().set_total(10).add_line_item(LineItem::new("sku", 1, 10)))?;
    move_to(&service, &caller, DocType::Quote, &quote.id, Stage::Sent)?;

    let pending = service.outbox().pending()?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].tenant_id, "acme");
    assert!(service.outbox().acknowledge(&pending[0])?);
    assert!(!service.outbox().acknowledge(&pending[0])?);
    assert!(service.outbox().pending()?.is_empty());
    Ok(())
}

fn signed_contract() -> Contract {
    Contract::new()
        .set_deal_ref("opp_1")
        .set_value(120000)
        .set_start_date(TimeStamp::new_with(2025, 1, 1, 0, 0, 0).expect("valid date"))
        .set_end_date(TimeStamp::new_with(2025, 12, 31, 0, 0, 0).expect("valid date"))
}

#[test]
fn active_contracts_only_accept_renewal_edits() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();

    let contract = service.create(&caller, signed_contract())?;
    move_to(&service, &caller, DocType::Contract, &contract.id, Stage::Active)?;
    let active = service.get(&caller, DocType::Contract, &contract.id)?;

    let repriced = service
        .edit(&caller, DocType::Contract, &contract.id, active.version, signed_contract().set_value(1))
        .unwrap_err();
    assert_eq!(repriced.kind(), ErrorKind::LockedFields);

    let renewed = service.edit(
        &caller,
        DocType::Contract,
        &contract.id,
        active.version,
        signed_contract()
            .set_end_date(TimeStamp::new_with(2026, 12, 31, 0, 0, 0).expect("valid date"))
            .set_auto_renew(true),
    )?;
    assert_eq!(renewed.version, active.version + 1);
    assert_eq!(renewed.stage, Stage::Active);

    // a stale version loses
    let stale = service
        .edit(&caller, DocType::Contract, &contract.id, active.version, signed_contract())
        .unwrap_err();
    assert_eq!(stale.kind(), ErrorKind::Conflict);

    move_to(&service, &caller, DocType::Contract, &contract.id, Stage::Terminated)?;
    let terminated = service.get(&caller, DocType::Contract, &contract.id)?;
    let frozen = service
        .edit(&caller, DocType::Contract, &contract.id, terminated.version, signed_contract())
        .unwrap_err();
    assert_eq!(frozen.kind(), ErrorKind::Immutable);
    Ok(())
}

#[test]
fn edits_cannot_change_the_document_kind() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();

    let invoice = service.create(&caller, Invoice::new(InvoiceKind::Sales))?;
    let err = service
        .edit(&caller, DocType::Invoice, &invoice.id, 1, Invoice::new(InvoiceKind::Purchase))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    Ok(())
}

#[test]
fn manual_adjustments_reset_the_baseline() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();

    service.adjust_stock(&caller, "sku-bolt", StockMovement::In(40), "delivery")?;
    service.adjust_stock(&caller, "sku-bolt", StockMovement::Out(15), "workshop")?;
    let counted = service.adjust_stock(&caller, "sku-bolt", StockMovement::Adjustment { target: 20 }, "stocktake")?;

    assert_eq!(counted.quantity_delta, -5);
    assert_eq!(counted.target_balance, Some(20));
    assert_eq!(service.verify_stock("sku-bolt")?, 20);

    let short = service
        .adjust_stock(&caller, "sku-bolt", StockMovement::Out(21), "workshop")
        .unwrap_err();
    assert_eq!(short.kind(), ErrorKind::InsufficientStock);
    assert_eq!(service.stock_history(&caller, "sku-bolt")?.len(), 3);
    Ok(())
}

#[test]
fn slashes_in_names_do_not_leak_between_tenants() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let nested = Caller::new("acme/QUOTE", "user_mallory");

    let ours = service.create(&caller, Quote::new())?;
    let theirs = service.create(&nested, Quote::new())?;

    let listed: Vec<_> = service.list(&caller, DocType::Quote)?.into_iter().map(|doc| doc.id).collect();
    assert_eq!(listed, vec![ours.id.clone()]);
    let listed: Vec<_> = service.list(&nested, DocType::Quote)?.into_iter().map(|doc| doc.id).collect();
    assert_eq!(listed, vec![theirs.id]);

    // a forged id nested under a real one is just missing
    let forged = format!("{}/forged", ours.id);
    let err = service
        .transition(&caller, &TransitionRequest::new(DocType::Quote, &forged, Stage::Sent))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(service.audit_trail(&caller, DocType::Quote, &ours.id)?.is_empty());
    assert_eq!(service.audit_trail(&caller, DocType::Quote, &forged)?.len(), 1);

    service.adjust_stock(&caller, "sku/blue", StockMovement::In(5), "delivery")?;
    assert_eq!(service.stock_balance("sku")?, 0);
    assert_eq!(service.stock_balance("sku/blue")?, 5);
    Ok(())
}

#[test]
fn shared_stock_hides_other_tenants_causes() -> anyhow::Result<()> {
    let (_dir, service) = open_service()?;
    let caller = acme();
    let order_id = approved_return(&service, &caller)?;
    move_to(&service, &caller, DocType::ReturnOrder, &order_id, Stage::Completed)?;

    let globex = Caller::new("globex", "user_eve");
    let seen = service.stock_history(&globex, "sku-chair")?;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].new_balance, 2);
    assert!(seen[0].cause_ref.is_empty());
    assert!(seen[0].tenant_id.is_empty());

    let ops = globex.with_cross_tenant_override();
    assert_eq!(service.stock_history(&ops, "sku-chair")?[0].cause_ref, order_id);
    assert_eq!(service.stock_history(&caller, "sku-chair")?[0].tenant_id, "acme");
    Ok(())
}
