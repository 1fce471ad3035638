//! Per-recipient key agreement for the legacy `aesgcm` content encoding.
//!
//! Every call generates a fresh ephemeral P-256 key pair and a fresh salt, runs
//! ECDH against the subscriber's `p256dh` key and stretches the result with
//! HKDF-SHA256 into a 16-byte content-encryption key and a 12-byte nonce.

use hkdf::Hkdf;
use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::error::PushError;

pub const PUBLIC_KEY_LEN: usize = 65;
pub const AUTH_SECRET_LEN: usize = 16;
pub const SALT_LEN: usize = 16;
pub const CEK_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;
const AUTH_INFO: &[u8] = b"Content-Encoding: auth\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aesgcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKeys {
    pub cek: [u8; CEK_LEN],
    pub nonce: [u8; NONCE_LEN],
}

#[derive(Debug, Clone)]
pub struct DerivedKeys {
    pub content: ContentKeys,
    pub salt: [u8; SALT_LEN],
    pub ephemeral_public_key: [u8; PUBLIC_KEY_LEN],
}

/// Checks the shape of subscriber key material without touching the curve.
pub fn validate_recipient_keys(public_key: &[u8], auth_secret: &[u8]) -> Result<(), PushError> {
    if public_key.len() != PUBLIC_KEY_LEN {
        return Err(PushError::InvalidKey(format!(
            "p256dh must be {PUBLIC_KEY_LEN} bytes, got {}",
            public_key.len()
        )));
    }
    if public_key[0] != UNCOMPRESSED_POINT_TAG {
        return Err(PushError::InvalidKey(
            "p256dh must be an uncompressed point (0x04 prefix)".to_string(),
        ));
    }
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(PushError::InvalidKey(format!(
            "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
            auth_secret.len()
        )));
    }
    Ok(())
}

pub fn derive_keys(client_public_key: &[u8], auth_secret: &[u8]) -> Result<DerivedKeys, PushError> {
    validate_recipient_keys(client_public_key, auth_secret)?;

    let recipient = PublicKey::from_sec1_bytes(client_public_key)
        .map_err(|_| PushError::InvalidKey("p256dh is not a valid P-256 point".to_string()))?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public_key = encode_public_key(&ephemeral.public_key())?;
    let shared = ephemeral.diffie_hellman(&recipient);

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let content = derive_content_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        &salt,
        client_public_key,
        &ephemeral_public_key,
    )?;

    Ok(DerivedKeys {
        content,
        salt,
        ephemeral_public_key,
    })
}

/// Deterministic half of the derivation, shared by sender and receiver.
pub fn derive_content_keys(
    shared_secret: &[u8],
    auth_secret: &[u8],
    salt: &[u8],
    client_public_key: &[u8],
    server_public_key: &[u8],
) -> Result<ContentKeys, PushError> {
    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(AUTH_INFO, &mut ikm)
        .map_err(|_| PushError::Encryption("auth secret expansion failed".to_string()))?;

    let context = key_context(client_public_key, server_public_key);
    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);

    let mut cek = [0u8; CEK_LEN];
    hk.expand_multi_info(&[CEK_INFO, context.as_slice()], &mut cek)
        .map_err(|_| PushError::Encryption("content key expansion failed".to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    hk.expand_multi_info(&[NONCE_INFO, context.as_slice()], &mut nonce)
        .map_err(|_| PushError::Encryption("nonce expansion failed".to_string()))?;

    Ok(ContentKeys { cek, nonce })
}

// 0x00 || len(client) || client || len(server) || server, lengths as u16 big-endian
fn key_context(client_public_key: &[u8], server_public_key: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(5 + client_public_key.len() + server_public_key.len());
    context.push(0);
    context.extend_from_slice(&(client_public_key.len() as u16).to_be_bytes());
    context.extend_from_slice(client_public_key);
    context.extend_from_slice(&(server_public_key.len() as u16).to_be_bytes());
    context.extend_from_slice(server_public_key);
    context
}

pub fn encode_public_key(key: &PublicKey) -> Result<[u8; PUBLIC_KEY_LEN], PushError> {
    key.to_encoded_point(false)
        .as_bytes()
        .try_into()
        .map_err(|_| PushError::Encryption("unexpected encoded point length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;

    fn recipient() -> (SecretKey, [u8; PUBLIC_KEY_LEN]) {
        let secret = SecretKey::random(&mut OsRng);
        let public = encode_public_key(&secret.public_key()).unwrap();
        (secret, public)
    }

    #[test]
    fn rejects_short_public_key() {
        let err = derive_keys(&[0x04; 64], &[1u8; 16]).unwrap_err();
        assert!(matches!(err, PushError::InvalidKey(_)));
    }

    #[test]
    fn rejects_compressed_prefix() {
        let (_, mut public) = recipient();
        public[0] = 0x03;
        let err = derive_keys(&public, &[1u8; 16]).unwrap_err();
        assert!(matches!(err, PushError::InvalidKey(_)));
    }

    #[test]
    fn rejects_wrong_auth_length() {
        let (_, public) = recipient();
        let err = derive_keys(&public, &[1u8; 15]).unwrap_err();
        assert!(matches!(err, PushError::InvalidKey(_)));
    }

    #[test]
    fn rejects_point_off_curve() {
        let mut bogus = [0xabu8; PUBLIC_KEY_LEN];
        bogus[0] = 0x04;
        let err = derive_keys(&bogus, &[1u8; 16]).unwrap_err();
        assert!(matches!(err, PushError::InvalidKey(_)));
    }

    #[test]
    fn context_layout() {
        let client = [0x04u8; PUBLIC_KEY_LEN];
        let server = [0x05u8; PUBLIC_KEY_LEN];
        let context = key_context(&client, &server);

        let mut expected = vec![0x00, 0x00, 0x41];
        expected.extend_from_slice(&client);
        expected.extend_from_slice(&[0x00, 0x41]);
        expected.extend_from_slice(&server);

        assert_eq!(context.len(), 135);
        assert_eq!(context, expected);
    }

    #[test]
    fn recipient_derives_the_same_keys() {
        let (secret, public) = recipient();
        let auth = [7u8; AUTH_SECRET_LEN];
        let derived = derive_keys(&public, &auth).unwrap();

        let ephemeral = PublicKey::from_sec1_bytes(&derived.ephemeral_public_key).unwrap();
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
        let replayed = derive_content_keys(
            shared.raw_secret_bytes().as_slice(),
            &auth,
            &derived.salt,
            &public,
            &derived.ephemeral_public_key,
        )
        .unwrap();

        assert_eq!(replayed, derived.content);
    }

    #[test]
    fn each_call_uses_fresh_salt_and_ephemeral_key() {
        let (_, public) = recipient();
        let auth = [7u8; AUTH_SECRET_LEN];
        let first = derive_keys(&public, &auth).unwrap();
        let second = derive_keys(&public, &auth).unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ephemeral_public_key, second.ephemeral_public_key);
        assert_ne!(first.content, second.content);
    }
}
