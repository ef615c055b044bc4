//! Promo code verification against the catalog's promo list.

use crate::errors::ServiceError;
use crate::models::PromoCode;
use crate::services::catalog::CatalogClient;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct PromotionService {
    catalog: Arc<dyn CatalogClient>,
}

impl PromotionService {
    pub fn new(catalog: Arc<dyn CatalogClient>) -> Self {
        Self { catalog }
    }

    /// Verifies a promo code and returns its discount percentage. Unknown
    /// and inactive codes are both reported as not found; callers learn
    /// nothing about which.
    #[instrument(skip(self))]
    pub async fn verify_code(&self, code: &str) -> Result<Decimal, ServiceError> {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::ValidationError(
                "Promo code is required".to_string(),
            ));
        }

        let promos = self.catalog.fetch_promo_codes().await?;
        promos
            .into_iter()
            .find(|p| p.active && p.code.eq_ignore_ascii_case(trimmed))
            .map(|p| p.percent)
            .ok_or_else(|| ServiceError::NotFound("Unknown promo code".to_string()))
    }

    /// Creates or replaces a promo code through the catalog writer (admin
    /// surface).
    pub async fn upsert_code(&self, promo: &PromoCode) -> Result<(), ServiceError> {
        self.catalog.upsert_promo_code(promo).await
    }

    pub async fn list_codes(&self) -> Result<Vec<PromoCode>, ServiceError> {
        self.catalog.fetch_promo_codes().await
    }
}
