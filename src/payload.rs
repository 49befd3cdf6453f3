//! Payload framing.
//!
//! An encrypted share is stored as one blob:
//!
//! ```text
//! [ iv (IV_LEN bytes) ][ ciphertext + GCM tag ]
//! ```
//!
//! The blob is kept in the external blob store as standard base64 with no
//! line wrapping.

use base64::{engine::general_purpose, Engine as _};

use crate::crypto::IV_LEN;
use crate::error::VaultError;

/// An IV and ciphertext pair split out of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Concatenate `iv` and `ciphertext` into one blob.
pub fn encode(iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(iv);
    blob.extend_from_slice(ciphertext);
    blob
}

/// Split a blob at `IV_LEN`.
///
/// Fails with `InvalidPayload` when the blob is shorter than `IV_LEN + 1`:
/// there must be at least one ciphertext byte.
pub fn decode(blob: &[u8]) -> Result<EncryptedPayload, VaultError> {
    if blob.len() < IV_LEN + 1 {
        return Err(VaultError::InvalidPayload);
    }
    let (iv, ciphertext) = blob.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| VaultError::InvalidPayload)?;
    Ok(EncryptedPayload {
        iv,
        ciphertext: ciphertext.to_vec(),
    })
}

/// Render a blob in its stored text form.
pub fn to_text(blob: &[u8]) -> String {
    general_purpose::STANDARD.encode(blob)
}

/// Parse the stored text form back into a blob.
pub fn from_text(text: &str) -> Result<Vec<u8>, VaultError> {
    general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|_| VaultError::InvalidPayload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let iv = [9u8; IV_LEN];
        let blob = encode(&iv, b"ct");
        assert_eq!(&blob[..IV_LEN], &iv);
        assert_eq!(&blob[IV_LEN..], b"ct");
    }

    #[test]
    fn test_decode_splits_at_iv_len() {
        let iv = [1u8; IV_LEN];
        let decoded = decode(&encode(&iv, &[0xAB, 0xCD, 0xEF])).unwrap();
        assert_eq!(decoded.iv, iv);
        assert_eq!(decoded.ciphertext, vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_length_guard() {
        for len in 0..=IV_LEN {
            assert!(
                matches!(decode(&vec![0u8; len]), Err(VaultError::InvalidPayload)),
                "blob of {} bytes was accepted",
                len
            );
        }
        assert!(decode(&[0u8; IV_LEN + 1]).is_ok());
    }

    #[test]
    fn test_text_form_rejects_garbage() {
        assert!(matches!(from_text("not base64 !!"), Err(VaultError::InvalidPayload)));
        let blob = encode(&[2u8; IV_LEN], b"x");
        assert_eq!(from_text(&to_text(&blob)).unwrap(), blob);
    }
}
