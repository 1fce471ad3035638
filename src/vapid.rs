//! VAPID (RFC 8292) tokens: an ES256 JWT scoped to the push service origin.

use axum::http::Uri;
use chrono::Utc;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::rngs::OsRng;
use serde::Serialize;

use crate::{
    codec::{decode_b64url, encode_b64url},
    error::PushError,
    keys::PUBLIC_KEY_LEN,
};

pub const PRIVATE_KEY_LEN: usize = 32;
pub const RAW_SIGNATURE_LEN: usize = 64;
pub const TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Serialize)]
struct JwtHeader {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

#[derive(Clone)]
pub struct VapidKeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub subject: String,
}

impl std::fmt::Debug for VapidKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeyPair")
            .field("public_key", &encode_b64url(&self.public_key))
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl VapidKeyPair {
    /// Loads a configured key pair and checks that both halves belong together.
    pub fn from_base64(public_key: &str, private_key: &str, subject: &str) -> Result<Self, PushError> {
        let public_key = decode_b64url(public_key)
            .map_err(|err| PushError::Configuration(format!("VAPID_PUBLIC_KEY: {err}")))?;
        let private_key = decode_b64url(private_key)
            .map_err(|err| PushError::Configuration(format!("VAPID_PRIVATE_KEY: {err}")))?;

        if public_key.len() != PUBLIC_KEY_LEN || public_key[0] != 0x04 {
            return Err(PushError::Configuration(format!(
                "VAPID_PUBLIC_KEY must decode to a {PUBLIC_KEY_LEN}-byte uncompressed point"
            )));
        }
        if subject.trim().is_empty() {
            return Err(PushError::Configuration("VAPID_SUBJECT must not be empty".to_string()));
        }

        let keys = Self {
            public_key,
            private_key,
            subject: subject.trim().to_string(),
        };
        let signer = VapidSigner::new(&keys)
            .map_err(|err| PushError::Configuration(format!("VAPID_PRIVATE_KEY: {err}")))?;
        if signer.derived_public_key() != keys.public_key {
            return Err(PushError::Configuration(
                "VAPID_PUBLIC_KEY does not match VAPID_PRIVATE_KEY".to_string(),
            ));
        }

        Ok(keys)
    }

    pub fn generate(subject: &str) -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();

        Self {
            public_key,
            private_key: signing_key.to_bytes().to_vec(),
            subject: subject.to_string(),
        }
    }

    pub fn public_key_b64(&self) -> String {
        encode_b64url(&self.public_key)
    }
}

/// Signed token plus the key that verifies it, ready for the request headers.
#[derive(Debug, Clone)]
pub struct VapidToken {
    pub token: String,
    pub public_key_b64: String,
}

impl VapidToken {
    pub fn authorization(&self) -> String {
        format!("vapid t={}, k={}", self.token, self.public_key_b64)
    }
}

pub struct VapidSigner {
    signing_key: SigningKey,
    public_key_b64: String,
    subject: String,
}

impl VapidSigner {
    pub fn new(keys: &VapidKeyPair) -> Result<Self, PushError> {
        if keys.private_key.len() != PRIVATE_KEY_LEN {
            return Err(PushError::Signature(format!(
                "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                keys.private_key.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&keys.private_key)
            .map_err(|_| PushError::Signature("private key is not a valid P-256 scalar".to_string()))?;

        Ok(Self {
            signing_key,
            public_key_b64: keys.public_key_b64(),
            subject: keys.subject.clone(),
        })
    }

    fn derived_public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn sign(&self, endpoint: &str) -> Result<VapidToken, PushError> {
        let aud = audience(endpoint)?;
        let exp = Utc::now().timestamp() + TOKEN_TTL_SECS;

        let header = serde_json::to_vec(&JwtHeader {
            typ: "JWT",
            alg: "ES256",
        })
        .map_err(|err| PushError::Signature(err.to_string()))?;
        let claims = serde_json::to_vec(&Claims {
            aud: &aud,
            exp,
            sub: &self.subject,
        })
        .map_err(|err| PushError::Signature(err.to_string()))?;

        let signing_input = format!("{}.{}", encode_b64url(&header), encode_b64url(&claims));
        let signature: Signature = self
            .signing_key
            .try_sign(signing_input.as_bytes())
            .map_err(|err| PushError::Signature(err.to_string()))?;
        let raw = normalize_signature(&signature.to_bytes())?;

        Ok(VapidToken {
            token: format!("{signing_input}.{}", encode_b64url(&raw)),
            public_key_b64: self.public_key_b64.clone(),
        })
    }
}

/// Push services only accept the fixed-width `r || s` form, never DER.
pub fn normalize_signature(bytes: &[u8]) -> Result<[u8; RAW_SIGNATURE_LEN], PushError> {
    let signature = Signature::from_der(bytes)
        .or_else(|_| Signature::from_slice(bytes))
        .map_err(|_| PushError::Signature("unrecognized ECDSA signature encoding".to_string()))?;

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    raw.copy_from_slice(&signature.to_bytes());
    Ok(raw)
}

pub fn audience(endpoint: &str) -> Result<String, PushError> {
    let uri: Uri = endpoint
        .trim()
        .parse()
        .map_err(|_| PushError::Signature("invalid endpoint url".to_string()))?;
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| PushError::Signature("endpoint scheme missing".to_string()))?;
    let host = uri
        .host()
        .ok_or_else(|| PushError::Signature("endpoint host missing".to_string()))?;

    Ok(match uri.port_u16() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}
