use crate::error::Result;
use crate::schema::{
    Customer, CustomerStatus, Invoice, InvoiceLineItem, InvoiceStatus, Payment, PaymentMethod,
    PaymentStatus, Product, ProductSnapshot,
};
use crate::store::InMemoryStore;
use crate::utils::parse_iso_date;
use chrono::NaiveDateTime;
use log::{debug, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddedCustomer {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddedItem {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddedPayment {
    #[serde(default)]
    pub id: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_ref: Option<String>,
    pub paid_at: NaiveDateTime,
}

/// A legacy invoice document with its customer, items and payments inlined.
/// Dates are kept as the `YYYY-MM-DD` strings found in the source.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddedInvoiceDocument {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    pub customer: EmbeddedCustomer,
    pub issue_date: String,
    pub due_date: String,
    #[serde(default)]
    pub paid_date: Option<String>,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub items: Vec<EmbeddedItem>,
    #[serde(default)]
    pub payments: Vec<EmbeddedPayment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedRecords {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub invoices: Vec<Invoice>,
    pub line_items: Vec<InvoiceLineItem>,
    pub payments: Vec<Payment>,
    /// Documents that normalized but whose figures disagree with their status.
    pub warnings: Vec<String>,
}

impl NormalizedRecords {
    pub fn into_store(self) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for customer in self.customers {
            store.add_customer(customer);
        }
        for product in self.products {
            store.add_product(product);
        }
        for invoice in self.invoices {
            store.add_invoice(invoice);
        }
        for item in self.line_items {
            store.add_line_item(item);
        }
        for payment in self.payments {
            store.add_payment(payment);
        }
        store
    }
}

fn customer_key(customer: &EmbeddedCustomer) -> String {
    if let Some(id) = &customer.id {
        return format!("id:{}", id);
    }
    match &customer.email {
        Some(email) if !email.trim().is_empty() => format!("email:{}", email.trim().to_lowercase()),
        _ => format!("name:{}", customer.name.trim().to_lowercase()),
    }
}

fn product_key(item: &EmbeddedItem) -> String {
    match (&item.sku, &item.product_id) {
        (Some(sku), _) => format!("sku:{}", sku),
        (None, Some(id)) => format!("id:{}", id),
        (None, None) => format!("name:{}", item.name.trim().to_lowercase()),
    }
}

/// Splits embedded invoice documents into referenced records. Customers are
/// deduplicated by id, then e-mail, then name; products by SKU or id, then name.
/// Invoice totals are recomputed from the line items.
pub fn normalize_documents(documents: &[EmbeddedInvoiceDocument]) -> Result<NormalizedRecords> {
    let mut customers: BTreeMap<String, Customer> = BTreeMap::new();
    let mut customer_order: Vec<String> = Vec::new();
    let mut products: BTreeMap<String, Product> = BTreeMap::new();
    let mut product_order: Vec<String> = Vec::new();
    let mut records = NormalizedRecords::default();

    for document in documents {
        let key = customer_key(&document.customer);
        let next_customer = customers.len() + 1;
        let customer = customers.entry(key.clone()).or_insert_with(|| {
            customer_order.push(key.clone());
            Customer {
                id: document
                    .customer
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("cus-{}", next_customer)),
                name: document.customer.name.trim().to_string(),
                email: document.customer.email.clone(),
                phone: document.customer.phone.clone(),
                status: CustomerStatus::Active,
            }
        });
        let customer_id = customer.id.clone();

        let mut subtotal = Decimal::ZERO;
        let mut tax_total = Decimal::ZERO;
        for (index, item) in document.items.iter().enumerate() {
            let key = product_key(item);
            let next_product = products.len() + 1;
            let product = products.entry(key.clone()).or_insert_with(|| {
                product_order.push(key.clone());
                Product {
                    id: item
                        .product_id
                        .clone()
                        .or_else(|| item.sku.clone())
                        .unwrap_or_else(|| format!("prd-{}", next_product)),
                    name: item.name.trim().to_string(),
                    unit_price: item.unit_price,
                    tax_rate: item.tax_rate,
                    category: item.category.clone(),
                }
            });

            let mut line = InvoiceLineItem::compute(
                format!("{}-li-{}", document.id, index + 1),
                document.id.clone(),
                item.quantity,
                item.unit_price,
                item.tax_rate,
            );
            line.product_id = Some(product.id.clone());
            // what the customer was sold, not what the catalog says today
            line.snapshot = Some(ProductSnapshot {
                name: item.name.trim().to_string(),
                unit_price: item.unit_price,
                category: item.category.clone().or_else(|| product.category.clone()),
            });

            subtotal += line.net_amount();
            tax_total += line.tax_amount();
            records.line_items.push(line);
        }

        let mut amount_paid = Decimal::ZERO;
        let mut last_paid = None;
        for (index, embedded) in document.payments.iter().enumerate() {
            if embedded.status == PaymentStatus::Completed {
                amount_paid += embedded.amount;
                last_paid = last_paid.max(Some(embedded.paid_at.date()));
            }
            records.payments.push(Payment {
                id: embedded
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}-pay-{}", document.id, index + 1)),
                invoice_id: Some(document.id.clone()),
                customer_id: customer_id.clone(),
                amount: embedded.amount,
                currency: embedded.currency.clone().unwrap_or_else(|| "KES".to_string()),
                method: embedded.method,
                status: embedded.status,
                transaction_ref: embedded.transaction_ref.clone(),
                paid_at: embedded.paid_at,
            });
        }

        let paid_date = match &document.paid_date {
            Some(raw) => Some(parse_iso_date(raw)?),
            None if document.status == InvoiceStatus::Paid => last_paid,
            None => None,
        };

        let invoice = Invoice {
            id: document.id.clone(),
            number: document.number.clone().unwrap_or_else(|| document.id.clone()),
            customer_id,
            issue_date: parse_iso_date(&document.issue_date)?,
            due_date: parse_iso_date(&document.due_date)?,
            paid_date,
            subtotal,
            tax_total,
            discount_total: document.discount,
            total: subtotal + tax_total - document.discount,
            amount_paid,
            status: document.status,
        };

        if let Err(e) = invoice.check_invariants() {
            warn!("Keeping invoice {} despite inconsistency: {}", invoice.id, e);
            records.warnings.push(e.to_string());
        }
        records.invoices.push(invoice);
    }

    records.customers = customer_order
        .iter()
        .filter_map(|key| customers.remove(key))
        .collect();
    records.products = product_order
        .iter()
        .filter_map(|key| products.remove(key))
        .collect();

    debug!(
        "Normalized {} documents into {} customers, {} products, {} line items and {} payments",
        documents.len(),
        records.customers.len(),
        records.products.len(),
        records.line_items.len(),
        records.payments.len()
    );

    Ok(records)
}
