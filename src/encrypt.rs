use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};

use crate::{
    error::PushError,
    keys::{derive_keys, PUBLIC_KEY_LEN, SALT_LEN},
};

// aesgcm framing: two-byte big-endian padding length, always zero here.
const PADDING_PREFIX: [u8; 2] = [0x00, 0x00];

#[derive(Debug, Clone)]
pub struct EncryptionResult {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub ephemeral_public_key: [u8; PUBLIC_KEY_LEN],
}

pub fn encrypt_payload(
    payload: &[u8],
    client_public_key: &[u8],
    auth_secret: &[u8],
) -> Result<EncryptionResult, PushError> {
    let keys = derive_keys(client_public_key, auth_secret)?;

    let mut padded = Vec::with_capacity(PADDING_PREFIX.len() + payload.len());
    padded.extend_from_slice(&PADDING_PREFIX);
    padded.extend_from_slice(payload);

    let cipher = Aes128Gcm::new_from_slice(&keys.content.cek)
        .map_err(|_| PushError::Encryption("invalid content key length".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&keys.content.nonce), padded.as_slice())
        .map_err(|_| PushError::Encryption("AES-GCM encryption failed".to_string()))?;

    Ok(EncryptionResult {
        ciphertext,
        salt: keys.salt,
        ephemeral_public_key: keys.ephemeral_public_key,
    })
}

/// Receiver side of [`encrypt_payload`], used to check what actually went on the wire.
#[cfg(test)]
pub(crate) fn decrypt_payload(
    ciphertext: &[u8],
    recipient: &p256::SecretKey,
    auth_secret: &[u8],
    salt: &[u8],
    ephemeral_public_key: &[u8],
) -> Result<Vec<u8>, PushError> {
    use crate::keys::{derive_content_keys, encode_public_key};

    let sender = p256::PublicKey::from_sec1_bytes(ephemeral_public_key)
        .map_err(|_| PushError::InvalidKey("bad ephemeral key".to_string()))?;
    let shared = p256::ecdh::diffie_hellman(recipient.to_nonzero_scalar(), sender.as_affine());
    let client_public_key = encode_public_key(&recipient.public_key())?;
    let keys = derive_content_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        salt,
        &client_public_key,
        ephemeral_public_key,
    )?;

    let cipher = Aes128Gcm::new_from_slice(&keys.cek)
        .map_err(|_| PushError::Encryption("invalid content key length".to_string()))?;
    let padded = cipher
        .decrypt(Nonce::from_slice(&keys.nonce), ciphertext)
        .map_err(|_| PushError::Encryption("AES-GCM decryption failed".to_string()))?;

    let pad_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    Ok(padded[2 + pad_len..].to_vec())
}
