//! Checkout payload validation: postal/region rules, customer field checks,
//! and stock availability against a fresh catalog snapshot. Checks run in a
//! fixed order and the first failure wins.

use crate::errors::ServiceError;
use crate::models::{Address, CatalogProduct};
use once_cell::sync::Lazy;
use regex::Regex;

/// Canadian postal code: letter-digit-letter, optional space, digit-letter-digit.
static POSTAL_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]\d[A-Za-z] ?\d[A-Za-z]\d$").expect("postal regex"));

/// Minimal `local@domain.tld` shape; full RFC parsing is not the goal.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

/// Quebec forward-sortation prefixes; shipping there is blocked.
const BLOCKED_POSTAL_PREFIXES: [char; 3] = ['G', 'H', 'J'];

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;
const MAX_STREET_LEN: usize = 500;
const MAX_CITY_LEN: usize = 100;
const MAX_POSTAL_LEN: usize = 20;
const MAX_NOTES_LEN: usize = 2000;
const MAX_LINE_QUANTITY: i64 = 1000;

/// Customer contact fields as submitted at checkout.
#[derive(Debug, Clone)]
pub struct CustomerFields<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub notes: Option<&'a str>,
}

/// One cart line reference prior to catalog resolution.
#[derive(Debug, Clone)]
pub struct LineRef<'a> {
    pub product_id: Option<i64>,
    pub slug: Option<&'a str>,
    pub name: &'a str,
    pub quantity: i64,
}

fn validation_error(msg: impl Into<String>) -> ServiceError {
    ServiceError::ValidationError(msg.into())
}

/// Validates postal code format and the shipping-region block.
pub fn validate_postal_code(postal_code: &str) -> Result<(), ServiceError> {
    let trimmed = postal_code.trim();
    if !POSTAL_CODE_RE.is_match(trimmed) {
        return Err(validation_error(
            "Postal code must be a valid Canadian postal code (e.g. V6B 1A1)",
        ));
    }

    let first = trimmed
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or_default();
    if BLOCKED_POSTAL_PREFIXES.contains(&first) {
        return Err(validation_error(
            "We are unable to ship orders to addresses in Quebec",
        ));
    }

    Ok(())
}

fn validate_address(address: &Address, label: &str) -> Result<(), ServiceError> {
    if address.street.trim().is_empty() {
        return Err(validation_error(format!("{} street address is required", label)));
    }
    if address.street.len() > MAX_STREET_LEN {
        return Err(validation_error(format!("{} street address is too long", label)));
    }
    if let Some(street2) = &address.street2 {
        if street2.len() > MAX_STREET_LEN {
            return Err(validation_error(format!("{} address line 2 is too long", label)));
        }
    }
    if address.city.trim().is_empty() || address.city.len() > MAX_CITY_LEN {
        return Err(validation_error(format!("{} city is required", label)));
    }
    if address.province.trim().is_empty() || address.province.len() > MAX_CITY_LEN {
        return Err(validation_error(format!("{} province is required", label)));
    }
    if address.postal_code.trim().is_empty() || address.postal_code.len() > MAX_POSTAL_LEN {
        return Err(validation_error(format!("{} postal code is required", label)));
    }
    Ok(())
}

fn validate_customer(customer: &CustomerFields<'_>) -> Result<(), ServiceError> {
    if customer.first_name.trim().is_empty() || customer.first_name.len() > MAX_NAME_LEN {
        return Err(validation_error("First name is required"));
    }
    if customer.last_name.trim().is_empty() || customer.last_name.len() > MAX_NAME_LEN {
        return Err(validation_error("Last name is required"));
    }
    if customer.email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(customer.email.trim()) {
        return Err(validation_error("A valid email address is required"));
    }
    if let Some(notes) = customer.notes {
        if notes.len() > MAX_NOTES_LEN {
            return Err(validation_error("Order notes are too long"));
        }
    }
    Ok(())
}

/// Checks every cart line against the catalog snapshot. The snapshot must be
/// freshly fetched for the request; stock changes are business-critical, so
/// correctness wins over latency here.
pub fn validate_stock(
    lines: &[LineRef<'_>],
    catalog: &[CatalogProduct],
) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(validation_error("Your cart is empty"));
    }

    for line in lines {
        if line.quantity < 1 || line.quantity > MAX_LINE_QUANTITY {
            return Err(validation_error(format!(
                "Invalid quantity for {}",
                line.name
            )));
        }

        let product = catalog
            .iter()
            .find(|p| p.matches(line.product_id, line.slug));

        let product = match product {
            Some(p) if p.is_active() => p,
            _ => {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} is not available",
                    line.name
                )))
            }
        };

        if line.quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} in stock",
                product.stock.max(0),
                product.name
            )));
        }
    }

    Ok(())
}

/// Runs the full fail-fast check sequence in its fixed order: postal
/// format/region, differing shipping address, customer fields, stock.
pub fn validate_checkout(
    customer: &CustomerFields<'_>,
    billing: &Address,
    shipping: Option<&Address>,
    lines: &[LineRef<'_>],
    catalog: &[CatalogProduct],
) -> Result<(), ServiceError> {
    let shipping_postal = shipping
        .map(|a| a.postal_code.as_str())
        .unwrap_or(billing.postal_code.as_str());
    validate_postal_code(shipping_postal)?;

    if let Some(shipping) = shipping {
        validate_address(shipping, "Shipping")?;
    }

    validate_address(billing, "Billing")?;
    validate_customer(customer)?;
    validate_stock(lines, catalog)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn product(id: i64, slug: &str, stock: i64) -> CatalogProduct {
        CatalogProduct {
            id,
            slug: slug.to_string(),
            name: slug.to_string(),
            price: dec!(49.99),
            stock,
            status: "active".to_string(),
        }
    }

    #[test_case("V6B 1A1" => true; "formatted with space")]
    #[test_case("v6b1a1" => true; "lowercase without space")]
    #[test_case("K1A0B1" => true; "ottawa compact")]
    #[test_case("123456" => false; "digits only")]
    #[test_case("V6B1A" => false; "truncated")]
    #[test_case("" => false; "empty")]
    fn postal_format(code: &str) -> bool {
        validate_postal_code(code).is_ok()
    }

    #[test]
    fn quebec_postal_codes_are_blocked_even_when_well_formed() {
        for code in ["H2X 1Y6", "G1R 4S9", "j7v8p2"] {
            let err = validate_postal_code(code).unwrap_err();
            assert_matches!(err, ServiceError::ValidationError(msg) => {
                assert!(msg.contains("Quebec"), "unexpected message: {}", msg);
            });
        }
    }

    #[test]
    fn stock_check_resolves_by_id_or_slug() {
        let catalog = vec![product(1, "bpc-157", 4), product(2, "tb-500", 0)];

        let ok = vec![LineRef {
            product_id: None,
            slug: Some("bpc-157"),
            name: "BPC-157",
            quantity: 4,
        }];
        assert!(validate_stock(&ok, &catalog).is_ok());

        let too_many = vec![LineRef {
            product_id: Some(1),
            slug: None,
            name: "BPC-157",
            quantity: 5,
        }];
        let err = validate_stock(&too_many, &catalog).unwrap_err();
        assert_matches!(err, ServiceError::InsufficientStock(msg) => {
            assert!(msg.contains("Only 4"), "unexpected message: {}", msg);
        });

        let unknown = vec![LineRef {
            product_id: Some(99),
            slug: None,
            name: "Mystery",
            quantity: 1,
        }];
        assert_matches!(
            validate_stock(&unknown, &catalog).unwrap_err(),
            ServiceError::InsufficientStock(_)
        );
    }

    #[test]
    fn inactive_products_read_as_unavailable() {
        let mut discontinued = product(3, "old-batch", 10);
        discontinued.status = "archived".to_string();

        let lines = vec![LineRef {
            product_id: Some(3),
            slug: None,
            name: "Old Batch",
            quantity: 1,
        }];
        assert_matches!(
            validate_stock(&lines, &[discontinued]).unwrap_err(),
            ServiceError::InsufficientStock(_)
        );
    }

    #[test]
    fn customer_email_shape_is_enforced() {
        let billing = Address {
            street: "12 Water St".into(),
            street2: None,
            city: "Vancouver".into(),
            province: "BC".into(),
            postal_code: "V6B 1A1".into(),
            country: "CA".into(),
        };
        let catalog = vec![product(1, "bpc-157", 10)];
        let lines = vec![LineRef {
            product_id: Some(1),
            slug: None,
            name: "BPC-157",
            quantity: 1,
        }];

        let bad_email = CustomerFields {
            first_name: "Ada",
            last_name: "Hill",
            email: "not-an-email",
            notes: None,
        };
        assert_matches!(
            validate_checkout(&bad_email, &billing, None, &lines, &catalog).unwrap_err(),
            ServiceError::ValidationError(_)
        );

        let good = CustomerFields {
            email: "ada@example.com",
            ..bad_email
        };
        assert!(validate_checkout(&good, &billing, None, &lines, &catalog).is_ok());
    }

    #[test]
    fn shipping_postal_takes_precedence_over_billing() {
        let billing = Address {
            street: "12 Water St".into(),
            street2: None,
            city: "Vancouver".into(),
            province: "BC".into(),
            postal_code: "V6B 1A1".into(),
            country: "CA".into(),
        };
        let shipping_quebec = Address {
            street: "8 Rue Principale".into(),
            street2: None,
            city: "Montreal".into(),
            province: "QC".into(),
            postal_code: "H2X 1Y6".into(),
            country: "CA".into(),
        };
        let customer = CustomerFields {
            first_name: "Ada",
            last_name: "Hill",
            email: "ada@example.com",
            notes: None,
        };
        let catalog = vec![product(1, "bpc-157", 10)];
        let lines = vec![LineRef {
            product_id: Some(1),
            slug: None,
            name: "BPC-157",
            quantity: 1,
        }];

        assert!(validate_checkout(
            &customer,
            &billing,
            Some(&shipping_quebec),
            &lines,
            &catalog
        )
        .is_err());
    }
}
