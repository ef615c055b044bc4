//! Checkout orchestration for both payment paths.
//!
//! Every submission is re-priced from the catalog snapshot; client-supplied
//! figures are only ever compared against, never trusted. The e-transfer
//! path persists and fulfills synchronously; the card path persists a
//! pending order, hands the browser to the gateway, and completes via the
//! postback pipeline in [`process_postback`](CheckoutService::process_postback).

use crate::entities::order::{self, PAYMENT_STATUS_PENDING};
use crate::errors::ServiceError;
use crate::idempotency::{CachedCheckout, IdempotencyStore};
use crate::models::{Address, OrderItemLine, PaymentMethod, ShippingMethod};
use crate::services::catalog::CatalogClient;
use crate::services::fulfillment::FulfillmentService;
use crate::services::gateway::{xml_ack, AckCode, GatewayAdapter, RedirectParams};
use crate::services::orders::OrderStore;
use crate::services::pricing;
use crate::services::validation::{self, CustomerFields, LineRef};
use axum::http::HeaderMap;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Accepted difference between the client-displayed total and the
/// recomputed one.
const TOTAL_TOLERANCE: Decimal = dec!(0.01);

/// One cart line as submitted by the client. Prices are intentionally
/// absent; they are recomputed from the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CartLineRequest {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: i64,
}

impl CartLineRequest {
    fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.slug.clone())
            .or_else(|| self.product_id.map(|id| format!("product {}", id)))
            .unwrap_or_else(|| "item".to_string())
    }
}

/// Checkout submission payload, shared by both endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub billing_address: Address,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    pub shipping_method: ShippingMethod,
    #[serde(default)]
    pub promo_code: Option<String>,
    pub items: Vec<CartLineRequest>,
    /// Client-displayed total, checked against the recomputation.
    pub client_total: Decimal,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Honeypot; humans never fill this.
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EtransferCheckoutResponse {
    pub ok: bool,
    pub order_id: String,
    pub order_number: String,
}

#[derive(Debug, Serialize)]
pub struct CardCheckoutResponse {
    pub ok: bool,
    pub redirect_url: String,
    pub order_number: String,
}

pub struct CheckoutService {
    orders: Arc<OrderStore>,
    catalog: Arc<dyn CatalogClient>,
    fulfillment: Arc<FulfillmentService>,
    gateway: Arc<GatewayAdapter>,
    idempotency: Arc<IdempotencyStore>,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderStore>,
        catalog: Arc<dyn CatalogClient>,
        fulfillment: Arc<FulfillmentService>,
        gateway: Arc<GatewayAdapter>,
        idempotency: Arc<IdempotencyStore>,
    ) -> Self {
        Self {
            orders,
            catalog,
            fulfillment,
            gateway,
            idempotency,
        }
    }

    /// E-transfer path: recompute, validate, persist, fulfill synchronously,
    /// and hand the order number back for the bank-transfer instructions.
    /// The order stays `pending` until the transfer is reconciled manually.
    #[instrument(skip(self, headers, request))]
    pub async fn place_etransfer_order(
        &self,
        headers: &HeaderMap,
        request: CheckoutRequest,
    ) -> Result<EtransferCheckoutResponse, ServiceError> {
        let key = IdempotencyStore::resolve_key(headers, request.idempotency_key.as_deref());
        if let Some(key) = &key {
            if let Some(CachedCheckout::Etransfer {
                order_id,
                order_number,
            }) = self.idempotency.get(key)
            {
                info!(order_number = %order_number, "returning cached e-transfer result");
                return Ok(EtransferCheckoutResponse {
                    ok: true,
                    order_id,
                    order_number,
                });
            }
        }

        if matches!(request.payment_method, Some(PaymentMethod::CreditCard)) {
            return Err(ServiceError::InvalidOperation(
                "Card payments must use the gateway endpoint".to_string(),
            ));
        }

        let order = self
            .price_and_validate(&request, PaymentMethod::Etransfer)
            .await?;
        let order = self.orders.upsert_order(order).await?;

        // Fulfillment runs synchronously; a partial failure is recorded on
        // the order and must not fail a submission that is already
        // persisted.
        if let Err(err) = self.fulfillment.fulfill(&order, false).await {
            warn!(
                error = %err,
                order_number = %order.order_number,
                "e-transfer fulfillment incomplete"
            );
        }

        let response = EtransferCheckoutResponse {
            ok: true,
            order_id: order.id.to_string(),
            order_number: order.order_number.clone(),
        };
        if let Some(key) = &key {
            self.idempotency.set(
                key,
                CachedCheckout::Etransfer {
                    order_id: response.order_id.clone(),
                    order_number: response.order_number.clone(),
                },
            );
        }
        Ok(response)
    }

    /// Card path: recompute, validate, persist pending, and build the
    /// encrypted gateway redirect. Fulfillment waits for the postback.
    #[instrument(skip(self, headers, request))]
    pub async fn create_gateway_session(
        &self,
        headers: &HeaderMap,
        request: CheckoutRequest,
    ) -> Result<CardCheckoutResponse, ServiceError> {
        let key = IdempotencyStore::resolve_key(headers, request.idempotency_key.as_deref());
        if let Some(key) = &key {
            if let Some(CachedCheckout::Card {
                order_number,
                redirect_url,
            }) = self.idempotency.get(key)
            {
                info!(order_number = %order_number, "returning cached gateway session");
                return Ok(CardCheckoutResponse {
                    ok: true,
                    redirect_url,
                    order_number,
                });
            }
        }

        if !matches!(request.payment_method, Some(PaymentMethod::CreditCard)) {
            return Err(ServiceError::InvalidOperation(
                "This endpoint only handles card payments".to_string(),
            ));
        }

        let order = self
            .price_and_validate(&request, PaymentMethod::CreditCard)
            .await?;
        let order = self.orders.upsert_order(order).await?;

        let redirect_url = self
            .gateway
            .build_payment_redirect_url(&RedirectParams {
                order_number: order.order_number.clone(),
                amount: order.total,
                description: format!("Order {}", order.order_number),
                first_name: order.customer_first_name.clone(),
                last_name: order.customer_last_name.clone(),
                email: order.customer_email.clone(),
                street: request.billing_address.street.clone(),
                city: request.billing_address.city.clone(),
                province: request.billing_address.province.clone(),
                postal_code: request.billing_address.postal_code.clone(),
                country: request.billing_address.country.clone(),
            })?;

        let response = CardCheckoutResponse {
            ok: true,
            redirect_url: redirect_url.clone(),
            order_number: order.order_number.clone(),
        };
        if let Some(key) = &key {
            self.idempotency.set(
                key,
                CachedCheckout::Card {
                    order_number: order.order_number.clone(),
                    redirect_url,
                },
            );
        }
        Ok(response)
    }

    /// Postback pipeline: the three-stage gate, session resolution, replay
    /// short-circuit, approval and amount reconciliation, then at-most-once
    /// fulfillment. Always answers with the XML envelope; HTTP stays 200.
    #[instrument(skip(self, raw_body, headers))]
    pub async fn process_postback(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        source_ip: Option<&str>,
    ) -> String {
        let fields = match self
            .gateway
            .verify_inbound_request(raw_body, headers, source_ip)
        {
            Ok(fields) => fields,
            Err(rejection) => return xml_ack(rejection.code, &rejection.message),
        };

        let order = match self.orders.get_order_by_session(&fields.session).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(session = %fields.session, "postback for unknown session");
                return xml_ack(AckCode::MalformedRequest, "Unknown session");
            }
            Err(err) => {
                error!(error = %err, "order lookup failed during postback");
                return xml_ack(AckCode::ProcessingFailure, "Processing failure");
            }
        };

        // Replayed or duplicate callback: acknowledge without re-running
        // fulfillment.
        if order.is_paid() {
            info!(order_number = %order.order_number, "postback replay for paid order");
            return xml_ack(AckCode::Success, "Already processed");
        }

        if let Err(rejection) = self.gateway.check_approval(&fields) {
            return xml_ack(rejection.code, &rejection.message);
        }
        if let Err(rejection) = self.gateway.reconcile_amount(&fields, order.total) {
            return xml_ack(rejection.code, &rejection.message);
        }

        match self.fulfillment.fulfill(&order, true).await {
            Ok(_) => {
                if let Err(err) = self.orders.complete_retry_job(&order.order_number).await {
                    warn!(error = %err, "failed to close retry job");
                }
                xml_ack(AckCode::Success, "OK")
            }
            Err(err) => {
                error!(
                    error = %err,
                    order_number = %order.order_number,
                    "fulfillment failed after approved payment"
                );
                if let Err(job_err) = self
                    .orders
                    .upsert_retry_job(&order.order_number, &err.to_string())
                    .await
                {
                    error!(error = %job_err, "failed to record retry job");
                }
                // Not marked paid; the gateway may retry the callback.
                xml_ack(AckCode::ProcessingFailure, "Processing failure")
            }
        }
    }

    /// Shared recomputation and validation for both paths. The returned
    /// order carries server-computed prices only.
    async fn price_and_validate(
        &self,
        request: &CheckoutRequest,
        method: PaymentMethod,
    ) -> Result<order::Model, ServiceError> {
        // Honeypot: a populated hidden field gets a generic rejection that
        // reveals nothing.
        if request.website.as_deref().is_some_and(|v| !v.is_empty()) {
            warn!("honeypot field populated; rejecting submission");
            return Err(ServiceError::ValidationError("Invalid request".to_string()));
        }

        // Fresh snapshot per request; stock is business-critical.
        let catalog = self.catalog.fetch_products().await?;

        let display_names: Vec<String> =
            request.items.iter().map(|l| l.display_name()).collect();
        let line_refs: Vec<LineRef<'_>> = request
            .items
            .iter()
            .zip(&display_names)
            .map(|(line, name)| LineRef {
                product_id: line.product_id,
                slug: line.slug.as_deref(),
                name,
                quantity: line.quantity,
            })
            .collect();

        let customer = CustomerFields {
            first_name: &request.first_name,
            last_name: &request.last_name,
            email: &request.email,
            notes: request.notes.as_deref(),
        };
        validation::validate_checkout(
            &customer,
            &request.billing_address,
            request.shipping_address.as_ref(),
            &line_refs,
            &catalog,
        )?;

        // Promo resolution: a valid promo overrides the volume discount.
        let promo = match &request.promo_code {
            Some(code) if !code.trim().is_empty() => {
                let promos = self.catalog.fetch_promo_codes().await?;
                let promo = promos
                    .into_iter()
                    .find(|p| p.active && p.code.eq_ignore_ascii_case(code.trim()));
                match promo {
                    Some(promo) => Some(promo),
                    None => {
                        return Err(ServiceError::ValidationError(
                            "Invalid promo code".to_string(),
                        ))
                    }
                }
            }
            _ => None,
        };
        let promo_active = promo.is_some();

        // Authoritative pricing from catalog prices.
        let mut priced_lines = Vec::with_capacity(request.items.len());
        let mut subtotal_inputs = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let product = catalog
                .iter()
                .find(|p| p.matches(line.product_id, line.slug.as_deref()))
                .ok_or_else(|| {
                    ServiceError::InternalError("validated line missing from catalog".to_string())
                })?;

            let unit_price = pricing::unit_price(product.price, line.quantity, promo_active);
            subtotal_inputs.push((product.price, line.quantity));
            priced_lines.push(OrderItemLine {
                product_id: Some(product.id),
                slug: Some(product.slug.clone()),
                name: product.name.clone(),
                unit_price,
                quantity: line.quantity,
            });
        }

        let subtotal = pricing::cart_subtotal(&subtotal_inputs, promo_active);
        let discount_amount = match &promo {
            Some(promo) => pricing::promo_discount_amount(subtotal, promo.percent),
            None => Decimal::ZERO,
        };
        let card_fee = match method {
            PaymentMethod::CreditCard => pricing::card_fee(subtotal - discount_amount),
            PaymentMethod::Etransfer => Decimal::ZERO,
        };
        let shipping_cost = pricing::shipping_cost(request.shipping_method);
        let total = pricing::order_total(subtotal, shipping_cost, discount_amount, card_fee);

        // Anti-tampering: the client-displayed total must agree with the
        // recomputation.
        if (total - request.client_total).abs() > TOTAL_TOLERANCE {
            warn!(
                submitted = %request.client_total,
                computed = %total,
                "client total disagrees with recomputation"
            );
            return Err(ServiceError::TotalMismatch {
                submitted: request.client_total,
                computed: total,
            });
        }

        Ok(order::Model {
            id: Uuid::new_v4(),
            order_number: OrderStore::generate_order_number(),
            created_at: Utc::now(),
            payment_status: PAYMENT_STATUS_PENDING.to_string(),
            paid_at: None,
            payment_method: method.as_str().to_string(),
            customer_first_name: request.first_name.trim().to_string(),
            customer_last_name: request.last_name.trim().to_string(),
            customer_email: request.email.trim().to_string(),
            customer_phone: request.phone.clone(),
            billing_address: serde_json::to_string(&request.billing_address)?,
            shipping_address: request
                .shipping_address
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            shipping_method: request.shipping_method.as_str().to_string(),
            shipping_cost,
            items: serde_json::to_string(&priced_lines)?,
            subtotal,
            discount_amount,
            promo_code: promo.map(|p| p.code),
            card_fee,
            total,
            stock_updated: false,
            customer_email_status: "skipped".to_string(),
            admin_email_status: "skipped".to_string(),
            notes: request.notes.clone(),
        })
    }
}
