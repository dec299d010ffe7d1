//! Read-only support for messages written by earlier app releases: OpenSSL
//! "salted" payloads, base64("Salted__" ‖ salt ‖ AES-256-CBC ciphertext),
//! keyed from a passphrase with the MD5 `EVP_BytesToKey` derivation.
//!
//! New content is never written in this format.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use data_encoding::BASE64;
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use super::crypto::DecryptionFailed;

const SALTED_MAGIC: &[u8; 8] = b"Salted__";
const SALT_SIZE: usize = 8;
const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const BLOCK_SIZE: usize = 16;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Whether `ciphertext` carries the salted header. Cheap, no key work.
pub fn is_salted_payload(ciphertext: &str) -> bool {
    // base64 of "Salted__"
    ciphertext.trim_start().starts_with("U2FsdGVkX1")
}

/// Decrypt a salted payload with `passphrase`.
pub fn decrypt_salted_message(
    ciphertext: &str,
    passphrase: &str,
) -> std::result::Result<String, DecryptionFailed> {
    let raw = BASE64
        .decode(ciphertext.trim().as_bytes())
        .map_err(|_| DecryptionFailed)?;
    if raw.len() < SALTED_MAGIC.len() + SALT_SIZE || &raw[..SALTED_MAGIC.len()] != SALTED_MAGIC {
        return Err(DecryptionFailed);
    }

    let (salt, body) = raw[SALTED_MAGIC.len()..].split_at(SALT_SIZE);
    if body.is_empty() || body.len() % BLOCK_SIZE != 0 {
        return Err(DecryptionFailed);
    }

    let material = evp_bytes_to_key(passphrase.as_bytes(), salt);
    let (key, iv) = material.split_at(KEY_SIZE);
    let plaintext = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| DecryptionFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| DecryptionFailed)
}

/// OpenSSL `EVP_BytesToKey` with MD5 and one iteration:
/// D_i = MD5(D_{i-1} ‖ passphrase ‖ salt), concatenated into key ‖ iv.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE + IV_SIZE]> {
    let mut out = Zeroizing::new([0u8; KEY_SIZE + IV_SIZE]);
    let mut previous: Option<[u8; 16]> = None;
    let mut filled = 0;

    while filled < out.len() {
        let mut hasher = Md5::new();
        if let Some(block) = &previous {
            hasher.update(block);
        }
        hasher.update(passphrase);
        hasher.update(salt);
        let digest: [u8; 16] = hasher.finalize().into();

        let take = (out.len() - filled).min(digest.len());
        out[filled..filled + take].copy_from_slice(&digest[..take]);
        filled += take;
        previous = Some(digest);
    }
    out
}
