//! Client for the external spreadsheet-backed catalog service: product
//! stock/price reads, promo code reads, and stock write-back. The checkout
//! core always fetches a fresh snapshot per request; there is deliberately
//! no caching layer in front of stock.

use crate::errors::ServiceError;
use crate::models::{CatalogProduct, PromoCode, StockUpdate};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;
use tracing::instrument;

/// Narrow interface over the catalog collaborator. Implementations must be
/// cheap to clone behind an `Arc` and safe to call concurrently.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches the full product snapshot (price, stock, status).
    async fn fetch_products(&self) -> Result<Vec<CatalogProduct>, ServiceError>;

    /// Writes updated stock counts back to the catalog.
    async fn write_stock(&self, updates: &[StockUpdate]) -> Result<(), ServiceError>;

    /// Fetches the promo code list.
    async fn fetch_promo_codes(&self) -> Result<Vec<PromoCode>, ServiceError>;

    /// Creates or replaces a promo code (admin surface).
    async fn upsert_promo_code(&self, promo: &PromoCode) -> Result<(), ServiceError>;
}

/// HTTP implementation against the catalog service's REST facade.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::CatalogError(format!("client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    #[instrument(skip(self))]
    async fn fetch_products(&self) -> Result<Vec<CatalogProduct>, ServiceError> {
        let response = self
            .client
            .get(self.url("products"))
            .send()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("product fetch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::CatalogError(format!("product fetch failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("product decode failed: {}", e)))
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn write_stock(&self, updates: &[StockUpdate]) -> Result<(), ServiceError> {
        self.client
            .put(self.url("products/stock"))
            .json(updates)
            .send()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("stock write failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::CatalogError(format!("stock write failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_promo_codes(&self) -> Result<Vec<PromoCode>, ServiceError> {
        let response = self
            .client
            .get(self.url("promo-codes"))
            .send()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("promo fetch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::CatalogError(format!("promo fetch failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("promo decode failed: {}", e)))
    }

    #[instrument(skip(self, promo), fields(code = %promo.code))]
    async fn upsert_promo_code(&self, promo: &PromoCode) -> Result<(), ServiceError> {
        self.client
            .post(self.url("promo-codes"))
            .json(promo)
            .send()
            .await
            .map_err(|e| ServiceError::CatalogError(format!("promo write failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::CatalogError(format!("promo write failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory catalog used by tests and by development deployments without a
/// configured catalog service.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<Vec<CatalogProduct>>,
    promos: RwLock<Vec<PromoCode>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: Vec<CatalogProduct>) -> Self {
        Self {
            products: RwLock::new(products),
            ..Self::default()
        }
    }

    pub fn add_product(&self, product: CatalogProduct) {
        self.products
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(product);
    }

    /// Makes subsequent stock writes fail, to exercise the retry path.
    pub fn fail_stock_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn set_promos(&self, promos: Vec<PromoCode>) {
        *self.promos.write().unwrap_or_else(|e| e.into_inner()) = promos;
    }

    pub fn product_stock(&self, product_id: i64) -> Option<i64> {
        self.products
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.id == product_id)
            .map(|p| p.stock)
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn fetch_products(&self) -> Result<Vec<CatalogProduct>, ServiceError> {
        Ok(self
            .products
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn write_stock(&self, updates: &[StockUpdate]) -> Result<(), ServiceError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(ServiceError::CatalogError(
                "stock write rejected".to_string(),
            ));
        }
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        for update in updates {
            if let Some(product) = products.iter_mut().find(|p| p.id == update.product_id) {
                product.stock = update.stock;
            }
        }
        Ok(())
    }

    async fn fetch_promo_codes(&self) -> Result<Vec<PromoCode>, ServiceError> {
        Ok(self
            .promos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn upsert_promo_code(&self, promo: &PromoCode) -> Result<(), ServiceError> {
        let mut promos = self.promos.write().unwrap_or_else(|e| e.into_inner());
        match promos.iter_mut().find(|p| p.code == promo.code) {
            Some(existing) => *existing = promo.clone(),
            None => promos.push(promo.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_product() -> CatalogProduct {
        CatalogProduct {
            id: 1,
            slug: "bpc-157".into(),
            name: "BPC-157 5mg".into(),
            price: dec!(70.99),
            stock: 10,
            status: "active".into(),
        }
    }

    #[tokio::test]
    async fn in_memory_catalog_applies_stock_writes() {
        let catalog = InMemoryCatalog::with_products(vec![sample_product()]);

        catalog
            .write_stock(&[StockUpdate {
                product_id: 1,
                stock: 7,
            }])
            .await
            .unwrap();

        assert_eq!(catalog.product_stock(1), Some(7));
        let products = catalog.fetch_products().await.unwrap();
        assert_eq!(products[0].stock, 7);
    }

    #[tokio::test]
    async fn in_memory_catalog_upserts_promos() {
        let catalog = InMemoryCatalog::new();
        let promo = PromoCode {
            code: "SPRING10".into(),
            percent: dec!(10),
            active: true,
        };

        catalog.upsert_promo_code(&promo).await.unwrap();
        catalog
            .upsert_promo_code(&PromoCode {
                percent: dec!(15),
                ..promo.clone()
            })
            .await
            .unwrap();

        let promos = catalog.fetch_promo_codes().await.unwrap();
        assert_eq!(promos.len(), 1);
        assert_eq!(promos[0].percent, dec!(15));
    }
}
