use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment method selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "etransfer")]
    Etransfer,
    #[serde(rename = "creditcard")]
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etransfer => "etransfer",
            Self::CreditCard => "creditcard",
        }
    }
}

/// Shipping methods offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    Standard,
    Express,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Express => "express",
        }
    }
}

/// A postal address as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "CA".to_string()
}

/// One cart line as charged: the unit price is the server-computed price at
/// order time, never the client-submitted one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemLine {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub slug: Option<String>,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i64,
}

/// Outcome of one outbound email attempt, persisted on the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailStatus {
    Sent,
    Skipped,
    Error(String),
}

impl EmailStatus {
    /// Column encoding: `sent`, `skipped`, or `error:<message>`.
    pub fn to_column_value(&self) -> String {
        match self {
            Self::Sent => "sent".to_string(),
            Self::Skipped => "skipped".to_string(),
            Self::Error(msg) => format!("error:{}", msg),
        }
    }

    pub fn from_column_value(value: &str) -> Self {
        match value {
            "sent" => Self::Sent,
            "skipped" => Self::Skipped,
            other => match other.strip_prefix("error:") {
                Some(msg) => Self::Error(msg.to_string()),
                None => Self::Skipped,
            },
        }
    }
}

/// A product row from the external catalog service. The checkout core reads
/// `price`/`stock`/`status` and writes `stock`; the full product shape stays
/// owned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
    pub status: String,
}

impl CatalogProduct {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Matches a cart line reference by numeric id or slug.
    pub fn matches(&self, product_id: Option<i64>, slug: Option<&str>) -> bool {
        if let Some(id) = product_id {
            if id == self.id {
                return true;
            }
        }
        if let Some(slug) = slug {
            if slug.eq_ignore_ascii_case(&self.slug) {
                return true;
            }
        }
        false
    }
}

/// A promo code row from the external catalog service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub percent: Decimal,
    pub active: bool,
}

/// What fulfillment actually accomplished for an order; persisted on the
/// order record before any `paid` transition.
#[derive(Debug, Clone)]
pub struct FulfillmentOutcome {
    pub customer_email: EmailStatus,
    pub admin_email: EmailStatus,
    pub stock_updated: bool,
}

/// Stock write-back for one product after fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub product_id: i64,
    pub stock: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn email_status_round_trips_through_column_encoding() {
        for status in [
            EmailStatus::Sent,
            EmailStatus::Skipped,
            EmailStatus::Error("relay timed out".into()),
        ] {
            let encoded = status.to_column_value();
            assert_eq!(EmailStatus::from_column_value(&encoded), status);
        }
    }

    #[test]
    fn product_matches_by_id_or_slug() {
        let product = CatalogProduct {
            id: 7,
            slug: "bpc-157-5mg".into(),
            name: "BPC-157 5mg".into(),
            price: dec!(70.99),
            stock: 12,
            status: "active".into(),
        };

        assert!(product.matches(Some(7), None));
        assert!(product.matches(None, Some("BPC-157-5MG")));
        assert!(!product.matches(Some(8), Some("tb-500")));
    }
}
