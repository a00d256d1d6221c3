use base64::Engine;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, RsaPublicKey};

use super::{Error, Result};

pub const ENCRYPTED_PASSWORD_PREFIX: &str = "__RSA__";

/// PKCS#1 v1.5 padding takes 11 bytes of every block.
const PKCS1_V15_OVERHEAD: usize = 11;

/// Accepts both `BEGIN PUBLIC KEY` (SPKI) and `BEGIN RSA PUBLIC KEY` (PKCS#1) PEM.
fn load_public_key(public_key_pem: &str) -> Result<RsaPublicKey> {
    let pem = public_key_pem.trim();
    match RsaPublicKey::from_public_key_pem(pem) {
        Ok(key) => Ok(key),
        Err(spki_err) => RsaPublicKey::from_pkcs1_pem(pem).map_err(|_| Error::KeyFormat(spki_err)),
    }
}

/// Base64 of the PKCS#1 v1.5 encryption of `password` under `public_key_pem`.
pub fn encrypt_password(password: &str, public_key_pem: &str) -> Result<String> {
    let rsa_pub_key = load_public_key(public_key_pem)?;
    let max_len = rsa_pub_key.size().saturating_sub(PKCS1_V15_OVERHEAD);
    if password.len() > max_len {
        return Err(Error::PayloadTooLarge { len: password.len(), max: max_len });
    }
    let mut rng = rand::rngs::OsRng;
    let encrypted_password = rsa_pub_key.encrypt(&mut rng, rsa::Pkcs1v15Encrypt, password.as_bytes())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(encrypted_password))
}

/// Prefixes the marker the login endpoint expects. Idempotent.
pub fn wrap_password(cipher_text: &str) -> String {
    if cipher_text.starts_with(ENCRYPTED_PASSWORD_PREFIX) {
        cipher_text.to_string()
    } else {
        format!("{}{}", ENCRYPTED_PASSWORD_PREFIX, cipher_text)
    }
}

/// `wrap_password(encrypt_password(..))`, the value of the `password` form field.
pub fn process_password(password: &str, public_key_pem: &str) -> Result<String> {
    encrypt_password(password, public_key_pem).map(|cipher| wrap_password(&cipher))
}

#[cfg(test)]
pub(crate) mod tests {
    use rsa::RsaPrivateKey;

    use super::*;

    pub(crate) const TEST_PUB_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQC9t16RqQWUE/J1IyOfoNHc4r/h
6RPnXcWTJ4IbhQVUsEqMMm65F0hiytAgozXmVw68yPJywbpblDrx9zl1wdRcdHCo
UvmPdr9/oCQtpQyVc7BXZIN6wJlD6MTeMeni+N0toNPxfXjiAawjNHGZZuT8wQpN
EMwsVyJ/lonXaVdGZwIDAQAB
-----END PUBLIC KEY-----";

    #[test]
    fn ciphertext_is_one_key_block() {
        let cipher = encrypt_password("hunter2", TEST_PUB_KEY).unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(&cipher).unwrap();
        assert_eq!(raw.len(), 128);
    }

    #[test]
    fn encryption_is_randomized() {
        let a = encrypt_password("hunter2", TEST_PUB_KEY).unwrap();
        let b = encrypt_password("hunter2", TEST_PUB_KEY).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrapped_cipher_carries_marker_once() {
        let wrapped = process_password("p@ssw0rd", TEST_PUB_KEY).unwrap();
        assert!(wrapped.starts_with(ENCRYPTED_PASSWORD_PREFIX));
        assert_eq!(wrapped.matches(ENCRYPTED_PASSWORD_PREFIX).count(), 1);
        assert_eq!(wrap_password(&wrapped), wrapped);
    }

    #[test]
    fn longest_allowed_password_fits() {
        let password = "a".repeat(117);
        assert!(encrypt_password(&password, TEST_PUB_KEY).is_ok());
    }

    #[test]
    fn oversized_password_is_rejected() {
        let password = "a".repeat(118);
        assert!(matches!(
            encrypt_password(&password, TEST_PUB_KEY),
            Err(Error::PayloadTooLarge { len: 118, max: 117 })
        ));
    }

    #[test]
    fn malformed_pem_is_a_key_format_error() {
        assert!(matches!(encrypt_password("x", "not a key"), Err(Error::KeyFormat(_))));
    }

    #[test]
    fn pkcs1_pem_is_accepted_and_decryptable() {
        use rsa::pkcs1::EncodeRsaPublicKey;

        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let pem = private_key.to_public_key().to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();
        let cipher = encrypt_password("round", &pem).unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(cipher).unwrap();
        let plain = private_key.decrypt(rsa::Pkcs1v15Encrypt, &raw).unwrap();
        assert_eq!(plain, b"round");
    }
}
