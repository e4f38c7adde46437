// Web Push delivery: payloads are encrypted per RFC 8291 (aes128gcm, RFC 8188)
// and posted to the subscription endpoint with a VAPID authorization.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use log::debug;
use openssl::bn::BigNumContext;
use openssl::derive::Deriver;
use openssl::ec::{EcKey, EcPoint};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rand::rand_bytes;
use openssl::sign::Signer;
use openssl::symm::{encrypt_aead, Cipher};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::short_endpoint;
use crate::models::PushSubscription;
use crate::vapid::{p256_group, public_key_bytes, VapidError, VapidKey};

pub const RECORD_SIZE: u32 = 4096;
const TAG_LEN: usize = 16;
const PADDING_DELIMITER: u8 = 0x02;
pub const MAX_PAYLOAD: usize = RECORD_SIZE as usize - TAG_LEN - 1;
const DEFAULT_TTL_S: u32 = 60 * 60 * 24;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service no longer knows this subscription.
    #[error("subscription gone ({0})")]
    Gone(u16),
    #[error("push service rejected delivery ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("push service unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("encryption failed: {0}")]
    Crypto(#[from] ErrorStack),
    #[error(transparent)]
    Vapid(#[from] VapidError),
    #[error("subscription key `{0}` is malformed")]
    BadKey(&'static str),
    #[error("payload of {0} bytes does not fit one record")]
    TooLarge(usize),
}

/// Sends one payload to one subscription.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<(), DeliveryError>;
}

pub struct WebPushDelivery {
    vapid: Arc<VapidKey>,
    client: reqwest::Client,
    ttl: u32,
}

impl WebPushDelivery {
    /// `client` should carry a timeout; see [`crate::config::http_client`].
    pub fn new(vapid: Arc<VapidKey>, client: reqwest::Client) -> Self {
        Self {
            vapid,
            client,
            ttl: DEFAULT_TTL_S,
        }
    }
}

#[async_trait]
impl PushDelivery for WebPushDelivery {
    async fn deliver(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<(), DeliveryError> {
        let body = encrypt_payload(subscription, payload)?;
        let authorization = self.vapid.authorization(&subscription.endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert("ttl", HeaderValue::from(self.ttl));
        headers.insert("urgency", HeaderValue::from_static("high"));
        headers.insert("content-encoding", HeaderValue::from_static("aes128gcm"));
        headers.insert("content-type", HeaderValue::from_static("application/octet-stream"));
        headers.insert(
            "authorization",
            HeaderValue::from_str(&authorization).map_err(|_| DeliveryError::BadKey("vapid"))?,
        );

        let res = self
            .client
            .post(&subscription.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = res.status();
        debug!(
            "webpush:: {} answered {}",
            short_endpoint(&subscription.endpoint),
            status
        );
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Err(DeliveryError::Gone(status.as_u16()))
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
                reason: res.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Encrypts `plaintext` for `subscription` under a fresh sender key and salt.
pub fn encrypt_payload(subscription: &PushSubscription, plaintext: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let group = p256_group()?;
    let sender_key = EcKey::generate(&group)?;
    let mut salt = [0u8; 16];
    rand_bytes(&mut salt)?;
    encrypt_with(subscription, plaintext, sender_key, &salt)
}

/// Single-record aes128gcm body: `salt | rs | idlen | keyid | ciphertext`.
pub(crate) fn encrypt_with(
    subscription: &PushSubscription,
    plaintext: &[u8],
    sender_key: EcKey<Private>,
    salt: &[u8; 16],
) -> Result<Vec<u8>, DeliveryError> {
    if plaintext.len() > MAX_PAYLOAD {
        return Err(DeliveryError::TooLarge(plaintext.len()));
    }
    let receiver_public = decode_key(&subscription.keys.p256dh, "p256dh")?;
    let auth_secret = decode_key(&subscription.keys.auth, "auth")?;

    let group = p256_group()?;
    let mut ctx = BigNumContext::new()?;
    let point = EcPoint::from_bytes(&group, &receiver_public, &mut ctx)
        .map_err(|_| DeliveryError::BadKey("p256dh"))?;
    let receiver = PKey::from_ec_key(EcKey::from_public_key(&group, &point)?)?;

    let sender_public = public_key_bytes(&sender_key)?;
    let sender = PKey::from_ec_key(sender_key)?;
    let mut deriver = Deriver::new(&sender)?;
    deriver.set_peer(&receiver)?;
    let shared_secret = deriver.derive_to_vec()?;

    let (cek, nonce) = content_keys(&shared_secret, &auth_secret, &receiver_public, &sender_public, salt)?;

    let mut record = plaintext.to_vec();
    record.push(PADDING_DELIMITER);
    let mut tag = [0u8; TAG_LEN];
    let ciphertext = encrypt_aead(Cipher::aes_128_gcm(), &cek, Some(&nonce), &[], &record, &mut tag)?;

    let mut body = Vec::with_capacity(21 + sender_public.len() + ciphertext.len() + TAG_LEN);
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(sender_public.len() as u8);
    body.extend_from_slice(&sender_public);
    body.extend_from_slice(&ciphertext);
    body.extend_from_slice(&tag);
    Ok(body)
}

/// Content encryption key and nonce. Both sides of the exchange derive the
/// same pair from the ECDH secret, the auth secret and the two public keys.
pub(crate) fn content_keys(
    shared_secret: &[u8],
    auth_secret: &[u8],
    receiver_public: &[u8],
    sender_public: &[u8],
    salt: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), ErrorStack> {
    let mut key_info = b"WebPush: info\0".to_vec();
    key_info.extend_from_slice(receiver_public);
    key_info.extend_from_slice(sender_public);
    key_info.push(1);

    let prk_key = hmac_sha256(auth_secret, shared_secret)?;
    let ikm = hmac_sha256(&prk_key, &key_info)?;
    let prk = hmac_sha256(salt, &ikm)?;

    let mut cek = hmac_sha256(&prk, b"Content-Encoding: aes128gcm\0\x01")?;
    cek.truncate(16);
    let mut nonce = hmac_sha256(&prk, b"Content-Encoding: nonce\0\x01")?;
    nonce.truncate(12);
    Ok((cek, nonce))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(data)?;
    signer.sign_to_vec()
}

fn decode_key(value: &str, name: &'static str) -> Result<Vec<u8>, DeliveryError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| DeliveryError::BadKey(name))
}
