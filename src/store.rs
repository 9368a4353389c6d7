//! Read-only access to normalized records.
//!
//! Builders never talk to a store directly: [`RecordSet::load`] pulls every
//! record a report needs up front, and aggregation runs over that
//! materialized set.

use crate::error::{ReportError, Result};
use crate::schema::{
    Customer, DateRange, Expense, Invoice, InvoiceLineItem, InvoiceStatus, Payment,
    PaymentMethod, PaymentStatus, Product, ReportFilters,
};
use log::debug;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Range and entity filters for a store lookup. Empty status/method sets match
/// everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub range: DateRange,
    pub customer_id: Option<String>,
    pub invoice_statuses: Vec<InvoiceStatus>,
    pub payment_statuses: Vec<PaymentStatus>,
    pub payment_methods: Vec<PaymentMethod>,
}

impl RecordQuery {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            customer_id: None,
            invoice_statuses: Vec::new(),
            payment_statuses: Vec::new(),
            payment_methods: Vec::new(),
        }
    }

    pub fn with_customer(mut self, customer_id: Option<String>) -> Self {
        self.customer_id = customer_id;
        self
    }

    pub fn with_payment_statuses(mut self, statuses: Vec<PaymentStatus>) -> Self {
        self.payment_statuses = statuses;
        self
    }

    pub fn with_invoice_statuses(mut self, statuses: Vec<InvoiceStatus>) -> Self {
        self.invoice_statuses = statuses;
        self
    }

    pub fn with_payment_methods(mut self, methods: Vec<PaymentMethod>) -> Self {
        self.payment_methods = methods;
        self
    }

    pub fn matches_invoice(&self, invoice: &Invoice) -> bool {
        self.range.contains(invoice.issue_date)
            && self.matches_customer(&invoice.customer_id)
            && (self.invoice_statuses.is_empty() || self.invoice_statuses.contains(&invoice.status))
    }

    pub fn matches_payment(&self, payment: &Payment) -> bool {
        self.range.contains(payment.date())
            && self.matches_customer(&payment.customer_id)
            && (self.payment_statuses.is_empty() || self.payment_statuses.contains(&payment.status))
            && (self.payment_methods.is_empty() || self.payment_methods.contains(&payment.method))
    }

    fn matches_customer(&self, customer_id: &str) -> bool {
        self.customer_id
            .as_deref()
            .map_or(true, |wanted| wanted == customer_id)
    }
}

/// The storage collaborator. Lookups that match nothing return empty vectors or
/// `None`; `Err` is reserved for the store itself failing.
pub trait RecordStore: Send + Sync {
    fn customer(&self, id: &str) -> Result<Option<Customer>>;

    fn product(&self, id: &str) -> Result<Option<Product>>;

    fn invoice(&self, id: &str) -> Result<Option<Invoice>>;

    /// Invoices whose issue date falls inside the query range.
    fn invoices(&self, query: &RecordQuery) -> Result<Vec<Invoice>>;

    fn line_items(&self, invoice_ids: &[String]) -> Result<Vec<InvoiceLineItem>>;

    /// Payments whose payment date falls inside the query range.
    fn payments(&self, query: &RecordQuery) -> Result<Vec<Payment>>;

    fn expenses(&self, range: &DateRange) -> Result<Vec<Expense>>;
}

/// Store backed by plain vectors. Results keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    customers: Vec<Customer>,
    products: Vec<Product>,
    invoices: Vec<Invoice>,
    line_items: Vec<InvoiceLineItem>,
    payments: Vec<Payment>,
    expenses: Vec<Expense>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&mut self, customer: Customer) -> &mut Self {
        self.customers.push(customer);
        self
    }

    pub fn add_product(&mut self, product: Product) -> &mut Self {
        self.products.push(product);
        self
    }

    pub fn add_invoice(&mut self, invoice: Invoice) -> &mut Self {
        self.invoices.push(invoice);
        self
    }

    pub fn add_line_item(&mut self, item: InvoiceLineItem) -> &mut Self {
        self.line_items.push(item);
        self
    }

    pub fn add_payment(&mut self, payment: Payment) -> &mut Self {
        self.payments.push(payment);
        self
    }

    pub fn add_expense(&mut self, expense: Expense) -> &mut Self {
        self.expenses.push(expense);
        self
    }
}

impl RecordStore for InMemoryStore {
    fn customer(&self, id: &str) -> Result<Option<Customer>> {
        Ok(self.customers.iter().find(|c| c.id == id).cloned())
    }

    fn product(&self, id: &str) -> Result<Option<Product>> {
        Ok(self.products.iter().find(|p| p.id == id).cloned())
    }

    fn invoice(&self, id: &str) -> Result<Option<Invoice>> {
        Ok(self.invoices.iter().find(|i| i.id == id).cloned())
    }

    fn invoices(&self, query: &RecordQuery) -> Result<Vec<Invoice>> {
        Ok(self
            .invoices
            .iter()
            .filter(|i| query.matches_invoice(i))
            .cloned()
            .collect())
    }

    fn line_items(&self, invoice_ids: &[String]) -> Result<Vec<InvoiceLineItem>> {
        let wanted: HashSet<&str> = invoice_ids.iter().map(String::as_str).collect();
        Ok(self
            .line_items
            .iter()
            .filter(|li| wanted.contains(li.invoice_id.as_str()))
            .cloned()
            .collect())
    }

    fn payments(&self, query: &RecordQuery) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .iter()
            .filter(|p| query.matches_payment(p))
            .cloned()
            .collect())
    }

    fn expenses(&self, range: &DateRange) -> Result<Vec<Expense>> {
        Ok(self
            .expenses
            .iter()
            .filter(|e| range.contains(e.date))
            .cloned()
            .collect())
    }
}

/// Cooperative cancellation shared between a caller and an in-flight report.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ReportError::Cancelled);
        }
        Ok(())
    }
}

/// Which record collections a load fetches. Line items are looked up for the
/// loaded invoices, so they come back empty unless invoices are fetched too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKinds {
    pub invoices: bool,
    pub line_items: bool,
    pub payments: bool,
    pub expenses: bool,
}

impl RecordKinds {
    pub const ALL: Self = Self {
        invoices: true,
        line_items: true,
        payments: true,
        expenses: true,
    };

    pub const NONE: Self = Self {
        invoices: false,
        line_items: false,
        payments: false,
        expenses: false,
    };
}

/// Every record a report computation reads, fully materialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub invoices: Vec<Invoice>,
    pub line_items: Vec<InvoiceLineItem>,
    pub payments: Vec<Payment>,
    pub expenses: Vec<Expense>,
}

impl RecordSet {
    /// Loads invoices, their line items, payments and expenses dated inside
    /// `window`. Explicit customer or invoice filters that do not resolve are
    /// rejected with [`ReportError::MissingReference`]. Cancellation is checked
    /// before every store call.
    pub fn load(
        store: &dyn RecordStore,
        window: &DateRange,
        filters: &ReportFilters,
        cancel: &CancelFlag,
    ) -> Result<Self> {
        Self::load_only(store, window, filters, RecordKinds::ALL, cancel)
    }

    /// Like [`RecordSet::load`], but collections not named in `kinds` are left
    /// empty without asking the store.
    pub fn load_only(
        store: &dyn RecordStore,
        window: &DateRange,
        filters: &ReportFilters,
        kinds: RecordKinds,
        cancel: &CancelFlag,
    ) -> Result<Self> {
        if let Some(customer_id) = &filters.customer_id {
            cancel.check()?;
            if store.customer(customer_id)?.is_none() {
                return Err(ReportError::MissingReference {
                    entity: "customer",
                    id: customer_id.clone(),
                });
            }
        }

        if let Some(invoice_id) = &filters.invoice_id {
            cancel.check()?;
            if store.invoice(invoice_id)?.is_none() {
                return Err(ReportError::MissingReference {
                    entity: "invoice",
                    id: invoice_id.clone(),
                });
            }
        }

        cancel.check()?;
        let query = RecordQuery::new(*window).with_customer(filters.customer_id.clone());

        let invoices = if kinds.invoices {
            store.invoices(&query)?
        } else {
            Vec::new()
        };

        let invoice_ids: Vec<String> = invoices.iter().map(|i| i.id.clone()).collect();
        let line_items = if kinds.line_items && !invoice_ids.is_empty() {
            cancel.check()?;
            store.line_items(&invoice_ids)?
        } else {
            Vec::new()
        };

        let payments = if kinds.payments {
            cancel.check()?;
            store.payments(&query)?
        } else {
            Vec::new()
        };

        let expenses = if kinds.expenses {
            cancel.check()?;
            store.expenses(window)?
        } else {
            Vec::new()
        };

        debug!(
            "Loaded {} invoices, {} line items, {} payments and {} expenses for {}",
            invoices.len(),
            line_items.len(),
            payments.len(),
            expenses.len(),
            window
        );

        Ok(Self {
            invoices,
            line_items,
            payments,
            expenses,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
            && self.line_items.is_empty()
            && self.payments.is_empty()
            && self.expenses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CustomerStatus;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn invoice(id: &str, customer: &str, issued: NaiveDate, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: id.to_string(),
            number: id.to_uppercase(),
            customer_id: customer.to_string(),
            issue_date: issued,
            due_date: issued,
            paid_date: None,
            subtotal: dec!(100),
            tax_total: dec!(16),
            discount_total: dec!(0),
            total: dec!(116),
            amount_paid: dec!(0),
            status,
        }
    }

    fn payment(id: &str, customer: &str, date: NaiveDate, status: PaymentStatus) -> Payment {
        Payment {
            id: id.to_string(),
            invoice_id: None,
            customer_id: customer.to_string(),
            amount: dec!(50),
            currency: "KES".to_string(),
            method: PaymentMethod::Mpesa,
            status,
            transaction_ref: None,
            paid_at: date.and_hms_opt(9, 30, 0).unwrap(),
        }
    }

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store
            .add_customer(Customer {
                id: "cus-1".to_string(),
                name: "Acme".to_string(),
                email: None,
                phone: None,
                status: CustomerStatus::Active,
            })
            .add_invoice(invoice("inv-1", "cus-1", d(2024, 1, 5), InvoiceStatus::Pending))
            .add_invoice(invoice("inv-2", "cus-2", d(2024, 1, 31), InvoiceStatus::Paid))
            .add_invoice(invoice("inv-3", "cus-1", d(2024, 2, 1), InvoiceStatus::Draft))
            .add_line_item(InvoiceLineItem::compute("li-1", "inv-1", dec!(1), dec!(100), dec!(0.16)))
            .add_line_item(InvoiceLineItem::compute("li-3", "inv-3", dec!(1), dec!(100), dec!(0.16)))
            .add_payment(payment("pay-1", "cus-1", d(2024, 1, 31), PaymentStatus::Completed))
            .add_payment(payment("pay-2", "cus-1", d(2024, 1, 31), PaymentStatus::Failed));
        store
    }

    #[test]
    fn test_range_is_inclusive_on_both_ends() {
        let store = store();
        let query = RecordQuery::new(DateRange::new(d(2024, 1, 5), d(2024, 1, 31)).unwrap());
        let invoices = store.invoices(&query).unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(store.payments(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_status_and_customer_filters() {
        let store = store();
        let range = DateRange::new(d(2024, 1, 1), d(2024, 12, 31)).unwrap();

        let completed = RecordQuery::new(range).with_payment_statuses(vec![PaymentStatus::Completed]);
        assert_eq!(store.payments(&completed).unwrap().len(), 1);

        let by_customer = RecordQuery::new(range).with_customer(Some("cus-1".to_string()));
        let ids: Vec<String> = store
            .invoices(&by_customer)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["inv-1", "inv-3"]);

        let drafts = RecordQuery::new(range).with_invoice_statuses(vec![InvoiceStatus::Draft]);
        assert_eq!(store.invoices(&drafts).unwrap().len(), 1);

        let by_card = RecordQuery::new(range).with_payment_methods(vec![PaymentMethod::Card]);
        assert!(store.payments(&by_card).unwrap().is_empty());
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let store = store();
        let query = RecordQuery::new(DateRange::new(d(2030, 1, 1), d(2030, 1, 31)).unwrap());
        assert!(store.invoices(&query).unwrap().is_empty());
        assert!(store.line_items(&[]).unwrap().is_empty());
        assert!(store.invoice("nope").unwrap().is_none());
    }

    #[test]
    fn test_load_materializes_line_items_for_loaded_invoices() {
        let store = store();
        let window = DateRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let set = RecordSet::load(&store, &window, &ReportFilters::default(), &CancelFlag::new())
            .unwrap();
        assert_eq!(set.invoices.len(), 2);
        assert_eq!(set.line_items.len(), 1);
        assert_eq!(set.line_items[0].id, "li-1");
    }

    #[test]
    fn test_load_only_skips_unrequested_collections() {
        let store = store();
        let window = DateRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let payments_only = RecordKinds {
            payments: true,
            ..RecordKinds::NONE
        };
        let set = RecordSet::load_only(&store, &window, &ReportFilters::default(), payments_only, &CancelFlag::new())
            .unwrap();
        assert!(set.invoices.is_empty());
        assert!(set.line_items.is_empty());
        assert_eq!(set.payments.len(), 2);

        let nothing = RecordSet::load_only(&store, &window, &ReportFilters::default(), RecordKinds::NONE, &CancelFlag::new())
            .unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_references() {
        let store = store();
        let window = DateRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();

        let filters = ReportFilters {
            customer_id: Some("cus-404".to_string()),
            invoice_id: None,
        };
        let err = RecordSet::load(&store, &window, &filters, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ReportError::MissingReference { entity: "customer", .. }));

        let filters = ReportFilters {
            customer_id: None,
            invoice_id: Some("inv-404".to_string()),
        };
        let err = RecordSet::load(&store, &window, &filters, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ReportError::MissingReference { entity: "invoice", .. }));
    }

    #[test]
    fn test_load_honours_cancellation() {
        let store = store();
        let window = DateRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            RecordSet::load(&store, &window, &ReportFilters::default(), &cancel),
            Err(ReportError::Cancelled)
        ));
    }
}
