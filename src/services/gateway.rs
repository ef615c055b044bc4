//! Adapter for the hosted card-payment gateway: encrypted redirect-URL
//! construction and the three-stage verification gate for asynchronous
//! payment postbacks.
//!
//! The cipher parameters are fixed constants, not configuration, because
//! they must match the gateway's documented contract exactly.

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use axum::http::HeaderMap;
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument, warn};
use url::Url;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// PBKDF2-SHA256 iteration count fixed by the gateway contract.
const KEY_DERIVATION_ITERATIONS: u32 = 10_000;
const DERIVED_KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;

const MAX_DESCRIPTION_LEN: usize = 255;
const MAX_COUNTRY_LEN: usize = 2;

/// Keywords the gateway uses for an approved payment, case-insensitive.
const APPROVAL_KEYWORDS: [&str; 3] = ["approved", "success", "completed"];

/// Candidate signature header names across gateway configurations.
const SIGNATURE_HEADERS: [&str; 3] = ["x-gateway-signature", "x-signature", "x-webhook-signature"];

/// Accepted difference between the posted amount and the stored total.
const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

/// Acknowledgment codes of the gateway's XML response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Success = 100,
    UnauthorizedIp = 101,
    MalformedRequest = 102,
    BadSignature = 103,
    ProcessingFailure = 104,
    NotApproved = 105,
}

/// A rejected postback, carrying the code and message for the XML envelope.
#[derive(Debug, Clone)]
pub struct PostbackRejection {
    pub code: AckCode,
    pub message: String,
}

impl PostbackRejection {
    fn new(code: AckCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Fields consumed from a verified postback body.
#[derive(Debug, Clone)]
pub struct PostbackFields {
    pub session: String,
    pub status: Option<String>,
    pub amount: Option<Decimal>,
}

/// Parameters for one hosted-payment redirect.
#[derive(Debug, Clone)]
pub struct RedirectParams {
    pub order_number: String,
    pub amount: Decimal,
    pub description: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub street: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
}

pub struct GatewayAdapter {
    config: GatewayConfig,
    missing_secret_warned: AtomicBool,
}

impl GatewayAdapter {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            missing_secret_warned: AtomicBool::new(false),
        }
    }

    /// Builds the hosted-payment redirect URL.
    ///
    /// The order/customer fields are assembled into a full URL string, and
    /// that entire string is encrypted (PBKDF2-SHA256 key derivation,
    /// AES-256-CBC, fresh random salt and IV) into a single opaque parameter
    /// on the externally-known gateway base URL. Identical input produces a
    /// different ciphertext on every call; callers must not cache by
    /// parameter equality.
    #[instrument(skip(self, params), fields(order_number = %params.order_number))]
    pub fn build_payment_redirect_url(
        &self,
        params: &RedirectParams,
    ) -> Result<String, ServiceError> {
        let site_id = self
            .config
            .site_id
            .as_deref()
            .ok_or_else(|| ServiceError::GatewayError("gateway site id not configured".into()))?;
        let encryption_key = self.config.encryption_key.as_deref().ok_or_else(|| {
            ServiceError::GatewayError("gateway encryption key not configured".into())
        })?;

        let mut amount = params.amount.round_dp(2);
        amount.rescale(2);

        let description: String = params.description.chars().take(MAX_DESCRIPTION_LEN).collect();
        let country: String = params
            .country
            .chars()
            .take(MAX_COUNTRY_LEN)
            .collect::<String>()
            .to_uppercase();
        let postal_code = params.postal_code.replace(' ', "");

        let mut inner = Url::parse(&self.config.base_url)
            .map_err(|e| ServiceError::GatewayError(format!("bad gateway base url: {}", e)))?;
        inner
            .query_pairs_mut()
            .append_pair("site", site_id)
            .append_pair("session", &params.order_number)
            .append_pair("amount", &amount.to_string())
            .append_pair("description", &description)
            .append_pair("first_name", &params.first_name)
            .append_pair("last_name", &params.last_name)
            .append_pair("email", &params.email)
            .append_pair("street", &params.street)
            .append_pair("city", &params.city)
            .append_pair("province", &params.province)
            .append_pair("postal", &postal_code)
            .append_pair("country", &country);

        if let Some(postback_url) = &self.config.postback_url {
            inner.query_pairs_mut().append_pair("notify", postback_url);
        }

        let blob = encrypt_request(inner.as_str().as_bytes(), encryption_key);

        let mut redirect = Url::parse(&self.config.base_url)
            .map_err(|e| ServiceError::GatewayError(format!("bad gateway base url: {}", e)))?;
        redirect
            .query_pairs_mut()
            .append_pair("site", site_id)
            .append_pair("req", &blob);

        Ok(redirect.into())
    }

    /// The three-stage inbound gate, applied strictly in order: source IP
    /// allow-list, HMAC signature, body parse.
    #[instrument(skip(self, raw_body, headers))]
    pub fn verify_inbound_request(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        source_ip: Option<&str>,
    ) -> Result<PostbackFields, PostbackRejection> {
        // Stage 1: source IP.
        let allowed = self.config.allowed_ips();
        match source_ip {
            Some(ip) if allowed.iter().any(|a| a.as_str() == ip) => {}
            other => {
                warn!(source_ip = ?other, "postback from unauthorized source");
                return Err(PostbackRejection::new(
                    AckCode::UnauthorizedIp,
                    "Unauthorized source address",
                ));
            }
        }

        // Stage 2: signature, when a secret is configured.
        if let Some(secret) = &self.config.postback_hmac_secret {
            if !self.verify_signature(raw_body, headers, secret) {
                warn!("postback signature verification failed");
                return Err(PostbackRejection::new(
                    AckCode::BadSignature,
                    "Invalid signature",
                ));
            }
        } else if !self.missing_secret_warned.swap(true, Ordering::Relaxed) {
            // Deliberate trust fallback for constrained environments.
            warn!("postback HMAC secret not configured; signature verification disabled");
        }

        // Stage 3: body parse.
        let map = parse_postback_body(raw_body).ok_or_else(|| {
            PostbackRejection::new(AckCode::MalformedRequest, "Unparseable request body")
        })?;

        let session = value_as_string(map.get("session")).ok_or_else(|| {
            PostbackRejection::new(AckCode::MalformedRequest, "Missing session")
        })?;

        let status = value_as_string(map.get("status")).or_else(|| value_as_string(map.get("result")));
        let amount = map.get("amount").and_then(parse_amount);

        Ok(PostbackFields {
            session,
            status,
            amount,
        })
    }

    /// Checks the approval keyword on a parsed postback.
    pub fn check_approval(&self, fields: &PostbackFields) -> Result<(), PostbackRejection> {
        let status = fields.status.as_deref().unwrap_or_default();
        let approved = APPROVAL_KEYWORDS
            .iter()
            .any(|kw| status.eq_ignore_ascii_case(kw));
        if approved {
            Ok(())
        } else {
            info!(status = %status, session = %fields.session, "payment not approved");
            Err(PostbackRejection::new(
                AckCode::NotApproved,
                "Payment not approved",
            ))
        }
    }

    /// Reconciles the posted amount against the stored order total within a
    /// 1-cent tolerance; a mismatch means tampering or a gateway rounding
    /// discrepancy and the order must not be marked paid.
    pub fn reconcile_amount(
        &self,
        fields: &PostbackFields,
        order_total: Decimal,
    ) -> Result<(), PostbackRejection> {
        let amount = fields.amount.ok_or_else(|| {
            PostbackRejection::new(AckCode::MalformedRequest, "Missing amount")
        })?;

        if (amount - order_total).abs() > AMOUNT_TOLERANCE {
            warn!(
                session = %fields.session,
                posted = %amount,
                stored = %order_total,
                "postback amount mismatch"
            );
            return Err(PostbackRejection::new(
                AckCode::MalformedRequest,
                "Amount mismatch",
            ));
        }
        Ok(())
    }

    fn verify_signature(&self, raw_body: &[u8], headers: &HeaderMap, secret: &str) -> bool {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(raw_body);
        let expected = mac.finalize().into_bytes();

        for header_name in SIGNATURE_HEADERS {
            let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            let value = value.trim();

            if let Ok(decoded) = hex::decode(value) {
                if constant_time_eq(&decoded, &expected) {
                    return true;
                }
            }
            if let Ok(decoded) = BASE64_STANDARD.decode(value) {
                if constant_time_eq(&decoded, &expected) {
                    return true;
                }
            }
        }
        false
    }
}

/// Encrypts the assembled request URL: `salt || iv || ciphertext`, base64url.
fn encrypt_request(plaintext: &[u8], encryption_key: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let mut key = [0u8; DERIVED_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        encryption_key.as_bytes(),
        &salt,
        KEY_DERIVATION_ITERATIONS,
        &mut key,
    );

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    URL_SAFE_NO_PAD.encode(blob)
}

/// Parses the postback body: JSON object first, then form-encoded pairs
/// where one value may itself be an embedded JSON object, then flat
/// key/value pairs.
fn parse_postback_body(raw: &[u8]) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_slice(raw) {
        return Some(map);
    }

    let text = std::str::from_utf8(raw).ok()?;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(text.as_bytes())
        .into_owned()
        .collect();
    if pairs.is_empty() {
        return None;
    }

    for (_, value) in &pairs {
        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
                return Some(map);
            }
        }
    }

    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key, Value::String(value));
    }
    Some(map)
}

fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an amount value, tolerating the underscore-as-decimal-separator
/// some gateway encodings produce.
fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let normalized = s.trim().replace('_', ".");
            Decimal::from_str(&normalized).ok()
        }
        _ => None,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Renders the fixed XML acknowledgment envelope the gateway expects. The
/// HTTP status is always 200; success or failure travels in `stat`.
pub fn xml_ack(code: AckCode, message: &str) -> String {
    let stat = if code == AckCode::Success { "ok" } else { "fail" };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rsp stat=\"{}\"><code>{}</code><message>{}</message></rsp>",
        stat,
        code as u16,
        xml_escape(message)
    )
}

fn xml_escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&apos;".to_string(),
            other => other.to_string(),
        })
        .collect()
}
