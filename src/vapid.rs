// VAPID, RFC 8292: https://datatracker.ietf.org/doc/html/rfc8292
// Push services accept an ES256 JWT whose `aud` is the origin of the subscription endpoint.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fs, io};

use base64::{engine::general_purpose, Engine};
use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, EcKeyRef, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Private};
use openssl::sha::sha256;
use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;

const TOKEN_LIFETIME_S: u64 = 60 * 60 * 12;
const TOKEN_REFRESH_RATE_S: u64 = 60 * 50; // Reissue well before the push service rejects it

pub struct VapidKey {
    key: EcKey<Private>,
    public_key: String,
    subject: String,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

struct CachedToken {
    token: String,
    issued_at: u64,
}

impl VapidKey {
    pub fn from_pem_file(path: impl AsRef<Path>, subject: &str) -> Result<VapidKey, VapidError> {
        let private_key_bytes = fs::read(path)?;
        VapidKey::from_pem(&private_key_bytes, subject)
    }

    pub fn from_pem(private_key_bytes: &[u8], subject: &str) -> Result<VapidKey, VapidError> {
        let key = EcKey::private_key_from_pem(private_key_bytes)
            .map_err(|_| VapidError::BadPrivateKey)?;
        if key.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
            return Err(VapidError::BadPrivateKey);
        }
        VapidKey::with_key(key, subject)
    }

    /// A throwaway key pair, for development relays and tests.
    pub fn generate(subject: &str) -> Result<VapidKey, VapidError> {
        let group = p256_group()?;
        let key = EcKey::generate(&group)?;
        VapidKey::with_key(key, subject)
    }

    fn with_key(key: EcKey<Private>, subject: &str) -> Result<VapidKey, VapidError> {
        let public_key = general_purpose::URL_SAFE_NO_PAD.encode(public_key_bytes(&key)?);
        Ok(VapidKey {
            key,
            public_key,
            subject: subject.to_string(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Base64url uncompressed public point, the browser's `applicationServerKey`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Value of the `Authorization` header for a push to `endpoint`.
    pub fn authorization(&self, endpoint: &str) -> Result<String, VapidError> {
        let audience = audience(endpoint)?;
        let token = self.token_for(&audience)?;
        Ok(format!("vapid t={}, k={}", token, self.public_key))
    }

    fn token_for(&self, audience: &str) -> Result<String, VapidError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut tokens = self.tokens.lock();
        if let Some(cached) = tokens.get(audience) {
            if now.saturating_sub(cached.issued_at) < TOKEN_REFRESH_RATE_S {
                return Ok(cached.token.clone());
            }
        }

        let jwt_header = VapidKey::generate_jwt_header();
        let jwt_claims = self.generate_jwt_claims(audience, now);
        let jwt_signed = self.generate_jwt_signed(&jwt_header, &jwt_claims)?;
        let token = format!("{jwt_header}.{jwt_claims}.{jwt_signed}");
        tokens.insert(
            audience.to_string(),
            CachedToken {
                token: token.clone(),
                issued_at: now,
            },
        );
        Ok(token)
    }

    fn generate_jwt_header() -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(r#"{"typ":"JWT","alg":"ES256"}"#)
    }

    fn generate_jwt_claims(&self, audience: &str, now: u64) -> String {
        let claims = json!({
            "aud": audience,
            "exp": now + TOKEN_LIFETIME_S,
            "sub": self.subject,
        });
        general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
    }

    /// ES256 wants the raw `r || s` pair, not the DER signature.
    fn generate_jwt_signed(&self, header: &str, claims: &str) -> Result<String, VapidError> {
        let digest = sha256(format!("{header}.{claims}").as_bytes());
        let signature = EcdsaSig::sign(&digest, &self.key).map_err(VapidError::BadSignature)?;
        let mut raw = signature.r().to_vec_padded(32)?;
        raw.extend(signature.s().to_vec_padded(32)?);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(raw))
    }
}

pub(crate) fn p256_group() -> Result<EcGroup, ErrorStack> {
    EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
}

pub(crate) fn public_key_bytes<T: HasPublic>(key: &EcKeyRef<T>) -> Result<Vec<u8>, ErrorStack> {
    let mut ctx = BigNumContext::new()?;
    key.public_key()
        .to_bytes(key.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
}

pub fn audience(endpoint: &str) -> Result<String, VapidError> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|_| VapidError::BadEndpoint(endpoint.to_string()))?;
    if !url.has_host() {
        return Err(VapidError::BadEndpoint(endpoint.to_string()));
    }
    Ok(url.origin().ascii_serialization())
}

#[derive(Debug, Error)]
pub enum VapidError {
    #[error("failed to read VAPID key: {0}")]
    IO(#[from] io::Error),
    #[error("VAPID key is not a P-256 private key")]
    BadPrivateKey,
    #[error("signing failed: {0}")]
    BadSignature(#[from] ErrorStack),
    #[error("not a push endpoint: {0}")]
    BadEndpoint(String),
}
