//! Message encryption using AES-256-CBC with an HMAC-SHA256 tag.
//!
//! Output format: `hex(iv) ":" hex(ciphertext || tag)`. A fresh 16-byte IV is
//! drawn for every call so equal plaintexts never produce equal ciphertexts.
//! The stored identity key is split with HKDF into an encryption subkey and a
//! MAC subkey; the tag covers `iv || ciphertext` and is checked before any
//! padding is inspected, so a wrong key is always reported as
//! [`CryptoError::DecryptionFailed`].

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use unme_shared::constants::MESSAGE_UNAVAILABLE;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::key::{EncryptionKey, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;
const TAG_SIZE: usize = 32;
const SEPARATOR: char = ':';
const ENC_KEY_INFO: &[u8] = b"unme-message-enc-v1";
const MAC_KEY_INFO: &[u8] = b"unme-message-mac-v1";

struct SubKeys {
    enc: Zeroizing<[u8; KEY_SIZE]>,
    mac: Zeroizing<[u8; KEY_SIZE]>,
}

fn derive_subkeys(key: &EncryptionKey) -> Result<SubKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
    let mut enc = Zeroizing::new([0u8; KEY_SIZE]);
    let mut mac = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(ENC_KEY_INFO, enc.as_mut())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    hk.expand(MAC_KEY_INFO, mac.as_mut())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(SubKeys { enc, mac })
}

fn new_mac(mac_key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}

/// Encrypt UTF-8 text under `key`.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<String, CryptoError> {
    let keys = derive_subkeys(key)?;

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut body = Aes256CbcEnc::new_from_slices(keys.enc.as_ref(), &iv)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let tag = new_mac(keys.mac.as_ref(), &iv, &body)?.finalize().into_bytes();
    body.extend_from_slice(&tag);

    Ok(format!("{}{SEPARATOR}{}", hex::encode(iv), hex::encode(body)))
}

/// Decrypt a string produced by [`encrypt`].
pub fn decrypt(encoded: &str, key: &EncryptionKey) -> Result<String, CryptoError> {
    let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
    if parts.len() != 2 {
        return Err(CryptoError::MalformedCiphertext(format!(
            "expected 2 parts, got {}",
            parts.len()
        )));
    }

    let iv = hex::decode(parts[0])
        .map_err(|e| CryptoError::MalformedCiphertext(format!("iv is not hex: {e}")))?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedCiphertext(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }

    let body = hex::decode(parts[1])
        .map_err(|e| CryptoError::MalformedCiphertext(format!("ciphertext is not hex: {e}")))?;
    if body.len() < BLOCK_SIZE + TAG_SIZE || (body.len() - TAG_SIZE) % BLOCK_SIZE != 0 {
        return Err(CryptoError::MalformedCiphertext(format!(
            "ciphertext has invalid length {}",
            body.len()
        )));
    }
    let (ciphertext, tag) = body.split_at(body.len() - TAG_SIZE);

    let keys = derive_subkeys(key)?;
    new_mac(keys.mac.as_ref(), &iv, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".into()))?;

    let plaintext = Aes256CbcDec::new_from_slices(keys.enc.as_ref(), &iv)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("invalid padding".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".into()))
}

/// Decrypt for display: on any failure returns the "message unavailable"
/// placeholder and `false`, logging the cause.
pub fn decrypt_or_placeholder(encoded: &str, key: &EncryptionKey) -> (String, bool) {
    match decrypt(encoded, key) {
        Ok(text) => (text, true),
        Err(e) => {
            tracing::warn!(error = %e, "failed to decrypt message");
            (MESSAGE_UNAVAILABLE.to_string(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes([0x11; 32])
    }

    #[test]
    fn decrypt_roundtrip() {
        let encoded = encrypt("hello", &key()).unwrap();
        assert_eq!(decrypt(&encoded, &key()).unwrap(), "hello");
    }

    #[test]
    fn roundtrip_various_plaintexts() {
        let samples = [
            "",
            "a",
            "exactly sixteen!",
            "multi\nline\ttext",
            "emoji 🔐 and ünïcödé",
            "colon:inside:plaintext",
        ];
        for p in samples {
            let encoded = encrypt(p, &key()).unwrap();
            assert_eq!(decrypt(&encoded, &key()).unwrap(), p, "plaintext {p:?}");
        }
    }

    #[test]
    fn large_plaintext_roundtrip() {
        let text = "x".repeat(100_000);
        let encoded = encrypt(&text, &key()).unwrap();
        assert_eq!(decrypt(&encoded, &key()).unwrap(), text);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let a = encrypt("hello", &key()).unwrap();
        let b = encrypt("hello", &key()).unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&a, &key()).unwrap(), "hello");
        assert_eq!(decrypt(&b, &key()).unwrap(), "hello");
    }

    #[test]
    fn output_is_hex_iv_colon_hex_body() {
        let encoded = encrypt("hello", &key()).unwrap();
        let (iv, body) = encoded.split_once(':').unwrap();
        assert_eq!(iv.len(), IV_SIZE * 2);
        assert!(iv.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
        // one padded block plus the tag
        assert_eq!(body.len(), (BLOCK_SIZE + TAG_SIZE) * 2);
    }

    #[test]
    fn wrong_key_fails_with_decryption_failed() {
        let encoded = encrypt("secret", &key()).unwrap();
        for _ in 0..32 {
            let other = EncryptionKey::generate();
            let result = decrypt(&encoded, &other);
            assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let encoded = encrypt("secret", &key()).unwrap();
        let (iv, body) = encoded.split_once(':').unwrap();
        let mut bytes = hex::decode(body).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{iv}:{}", hex::encode(bytes));
        assert!(matches!(
            decrypt(&tampered, &key()),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampered_iv_fails() {
        let encoded = encrypt("secret", &key()).unwrap();
        let (iv, body) = encoded.split_once(':').unwrap();
        let mut iv_bytes = hex::decode(iv).unwrap();
        iv_bytes[3] ^= 0x80;
        let tampered = format!("{}:{body}", hex::encode(iv_bytes));
        assert!(matches!(
            decrypt(&tampered, &key()),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn missing_separator_is_malformed() {
        let result = decrypt("deadbeef", &key());
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext(_))));
    }

    #[test]
    fn extra_separator_is_malformed() {
        let encoded = encrypt("hello", &key()).unwrap();
        let result = decrypt(&format!("{encoded}:00"), &key());
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext(_))));
    }

    #[test]
    fn non_hex_parts_are_malformed() {
        let result = decrypt("not-hex:also-not-hex", &key());
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext(_))));
    }

    #[test]
    fn short_iv_is_malformed() {
        let encoded = encrypt("hello", &key()).unwrap();
        let (_, body) = encoded.split_once(':').unwrap();
        let result = decrypt(&format!("abcd:{body}"), &key());
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext(_))));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let iv = hex::encode([0u8; IV_SIZE]);
        let result = decrypt(&format!("{iv}:00112233"), &key());
        assert!(matches!(result, Err(CryptoError::MalformedCiphertext(_))));
    }

    #[test]
    fn placeholder_on_failure() {
        let encoded = encrypt("hello", &key()).unwrap();
        let (text, ok) = decrypt_or_placeholder(&encoded, &EncryptionKey::generate());
        assert!(!ok);
        assert_eq!(text, MESSAGE_UNAVAILABLE);

        let (text, ok) = decrypt_or_placeholder(&encoded, &key());
        assert!(ok);
        assert_eq!(text, "hello");
    }
}
