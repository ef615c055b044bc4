//! Fulfillment orchestration: confirmation emails, stock decrement,
//! low-stock alerting, and the final paid transition. Runs exactly once per
//! order, either synchronously at e-transfer placement or on a validated
//! approved gateway postback.
//!
//! Ordering guarantee: every side effect is attempted and its outcome
//! recorded before the order is marked paid, so a crash mid-fulfillment
//! leaves the order pending and eligible for retry instead of silently
//! "paid but never fulfilled".

use crate::config::MailCategory;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::models::{EmailStatus, FulfillmentOutcome, StockUpdate};
use crate::services::catalog::CatalogClient;
use crate::services::mailer::{send_with_status, MailSender, OutboundEmail};
use crate::services::orders::OrderStore;
use crate::services::tasks::{create_entry_best_effort, TaskTracker, TrackerEntry};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

pub struct FulfillmentService {
    orders: Arc<OrderStore>,
    catalog: Arc<dyn CatalogClient>,
    mailer: Arc<dyn MailSender>,
    tracker: Arc<dyn TaskTracker>,
    admin_email: Option<String>,
    low_stock_threshold: i64,
    low_stock_cooldown: Duration,
    /// Serializes the catalog read-modify-write; two near-simultaneous
    /// orders must not interleave between the stock read and write.
    stock_lock: tokio::sync::Mutex<()>,
    last_low_stock_alert: Mutex<Option<Instant>>,
}

impl FulfillmentService {
    pub fn new(
        orders: Arc<OrderStore>,
        catalog: Arc<dyn CatalogClient>,
        mailer: Arc<dyn MailSender>,
        tracker: Arc<dyn TaskTracker>,
        admin_email: Option<String>,
        low_stock_threshold: i64,
        low_stock_cooldown: Duration,
    ) -> Self {
        Self {
            orders,
            catalog,
            mailer,
            tracker,
            admin_email,
            low_stock_threshold,
            low_stock_cooldown,
            stock_lock: tokio::sync::Mutex::new(()),
            last_low_stock_alert: Mutex::new(None),
        }
    }

    /// Runs the fulfillment pipeline for an order. `mark_paid` is set on the
    /// card path once the postback is verified; e-transfer orders stay
    /// pending until manual reconciliation.
    ///
    /// Email failures are captured as statuses and never abort the pipeline.
    /// A stock write failure records the partial outcome and propagates, so
    /// the card path can answer the gateway with a processing failure and
    /// leave the order retryable.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn fulfill(
        &self,
        order: &order::Model,
        mark_paid: bool,
    ) -> Result<order::Model, ServiceError> {
        // Steps 1-2: compose and send notifications, best-effort.
        let customer_email = send_with_status(
            self.mailer.as_ref(),
            MailCategory::Order,
            &compose_customer_email(order),
        )
        .await;

        let admin_email = match &self.admin_email {
            Some(admin_to) => {
                send_with_status(
                    self.mailer.as_ref(),
                    MailCategory::Order,
                    &compose_admin_email(order, admin_to),
                )
                .await
            }
            None => EmailStatus::Skipped,
        };

        // Step 3: decrement stock under the serializing lock.
        let stock_result = self.decrement_stock(order).await;
        let (stock_updated, low_stock_items) = match stock_result {
            Ok(low) => (true, low),
            Err(err) => {
                error!(error = %err, order_number = %order.order_number, "stock decrement failed");
                let outcome = FulfillmentOutcome {
                    customer_email,
                    admin_email,
                    stock_updated: false,
                };
                // Record what happened before surfacing the failure; the
                // order is left unpaid and retryable.
                self.orders
                    .record_fulfillment(&order.order_number, &outcome, false)
                    .await?;
                return Err(err);
            }
        };

        // Step 4: low-stock alerting, never fatal.
        if !low_stock_items.is_empty() {
            self.alert_low_stock(&low_stock_items).await;
        }

        // Step 5: persist the outcome and (card path) mark paid.
        let outcome = FulfillmentOutcome {
            customer_email,
            admin_email,
            stock_updated,
        };
        let updated = self
            .orders
            .record_fulfillment(&order.order_number, &outcome, mark_paid)
            .await?;

        info!(order_number = %order.order_number, mark_paid, "fulfillment complete");
        Ok(updated)
    }

    /// Reads the catalog, decrements each purchased line (clamped at zero),
    /// and writes the updated stock back. Returns products at or below the
    /// low-stock threshold after the decrement.
    async fn decrement_stock(
        &self,
        order: &order::Model,
    ) -> Result<Vec<(String, i64)>, ServiceError> {
        let lines = order.line_items()?;
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.stock_lock.lock().await;

        let products = self.catalog.fetch_products().await?;
        let mut updates = Vec::new();
        let mut low_stock = Vec::new();

        for line in &lines {
            let product = products
                .iter()
                .find(|p| p.matches(line.product_id, line.slug.as_deref()));

            let Some(product) = product else {
                warn!(name = %line.name, "purchased line missing from catalog during decrement");
                continue;
            };

            let new_stock = (product.stock - line.quantity).max(0);
            updates.push(StockUpdate {
                product_id: product.id,
                stock: new_stock,
            });
            if new_stock <= self.low_stock_threshold {
                low_stock.push((product.name.clone(), new_stock));
            }
        }

        if !updates.is_empty() {
            self.catalog.write_stock(&updates).await?;
        }

        Ok(low_stock)
    }

    /// Sends the low-stock email and tracker entry, rate-limited by the
    /// alert cooldown so back-to-back orders do not spam the channel.
    async fn alert_low_stock(&self, items: &[(String, i64)]) {
        {
            let mut last = self
                .last_low_stock_alert
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < self.low_stock_cooldown {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let summary = items
            .iter()
            .map(|(name, stock)| format!("{}: {} left", name, stock))
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(admin_to) = &self.admin_email {
            let email = OutboundEmail {
                category_from: "low-stock".to_string(),
                to: admin_to.clone(),
                reply_to: None,
                subject: format!("Low stock: {} product(s) need restocking", items.len()),
                text_body: summary.clone(),
            };
            let status = send_with_status(self.mailer.as_ref(), MailCategory::LowStock, &email).await;
            if let EmailStatus::Error(msg) = status {
                warn!(error = %msg, "low-stock email failed");
            }
        }

        create_entry_best_effort(
            self.tracker.as_ref(),
            &TrackerEntry {
                title: "Restock needed".to_string(),
                details: summary,
            },
        )
        .await;
    }
}

fn compose_customer_email(order: &order::Model) -> OutboundEmail {
    let lines = order.line_items().unwrap_or_default();
    let mut body = format!(
        "Hi {},\n\nThanks for your order {}.\n\n",
        order.customer_first_name, order.order_number
    );
    for line in &lines {
        body.push_str(&format!(
            "  {} x{} @ ${}\n",
            line.name, line.quantity, line.unit_price
        ));
    }
    body.push_str(&format!(
        "\nSubtotal: ${}\nShipping ({}): ${}\n",
        order.subtotal, order.shipping_method, order.shipping_cost
    ));
    if order.discount_amount > rust_decimal::Decimal::ZERO {
        body.push_str(&format!("Discount: -${}\n", order.discount_amount));
    }
    if order.card_fee > rust_decimal::Decimal::ZERO {
        body.push_str(&format!("Card fee: ${}\n", order.card_fee));
    }
    body.push_str(&format!("Total: ${}\n", order.total));

    if order.payment_method == "etransfer" {
        body.push_str(
            "\nPlease send your bank transfer using the instructions shown at checkout. \
             Your order ships once the transfer arrives.\n",
        );
    } else {
        body.push_str("\nYour card payment is being processed.\n");
    }

    OutboundEmail {
        category_from: "orders".to_string(),
        to: order.customer_email.clone(),
        reply_to: None,
        subject: format!("Order {} received", order.order_number),
        text_body: body,
    }
}

fn compose_admin_email(order: &order::Model, admin_to: &str) -> OutboundEmail {
    let body = format!(
        "New order {} ({})\n\nCustomer: {} {} <{}>\nTotal: ${}\nPayment: {}\n",
        order.order_number,
        order.created_at.to_rfc3339(),
        order.customer_first_name,
        order.customer_last_name,
        order.customer_email,
        order.total,
        order.payment_method,
    );

    OutboundEmail {
        category_from: "orders".to_string(),
        to: admin_to.to_string(),
        // Replying to the notification reaches the customer directly.
        reply_to: Some(order.customer_email.clone()),
        subject: format!("New order {}", order.order_number),
        text_body: body,
    }
}
