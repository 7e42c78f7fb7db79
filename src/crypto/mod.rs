/// Encoding and hashing helpers shared by the protocol modules
pub mod account_key;

pub use account_key::AccountKey;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::{AcmeError, Result};

/// URL-safe base64 without padding, the encoding used everywhere in the
/// ACME wire protocol.
pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe base64 without padding.
pub fn b64url_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| AcmeError::crypto(format!("base64url decode: {}", e)))
}

/// SHA-256 digest
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Encode DER bytes as a single PEM block with the given label.
pub fn to_pem(label: &str, der: &[u8]) -> String {
    pem::encode(&pem::Pem::new(label.to_string(), der.to_vec()))
}

/// Parse one PEM block, checking the label.
pub fn from_pem(data: &str, expected_label: &str) -> Result<Vec<u8>> {
    let block =
        pem::parse(data).map_err(|e| AcmeError::crypto(format!("PEM parse: {}", e)))?;
    if block.tag() != expected_label {
        return Err(AcmeError::crypto(format!(
            "expected PEM label '{}', got '{}'",
            expected_label,
            block.tag()
        )));
    }
    Ok(block.contents().to_vec())
}

/// Parse every CERTIFICATE block out of a PEM bundle.
pub fn certs_from_pem(data: &str) -> Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(data.as_bytes())
        .map_err(|e| AcmeError::crypto(format!("PEM parse: {}", e)))?;
    Ok(blocks
        .into_iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(|b| b.contents().to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64url_roundtrip() {
        let data = b"\xfb\xff\xfe hello";
        let encoded = b64url(data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            hex::encode(sha256(b"test data")),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_pem_roundtrip() {
        let pem_text = to_pem("CERTIFICATE", b"not a real cert");
        assert!(pem_text.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(from_pem(&pem_text, "CERTIFICATE").unwrap(), b"not a real cert");
        assert!(from_pem(&pem_text, "PRIVATE KEY").is_err());
    }

    #[test]
    fn test_certs_from_pem_picks_certificates() {
        let bundle = format!(
            "{}{}",
            to_pem("CERTIFICATE", b"leaf"),
            to_pem("PRIVATE KEY", b"key")
        );
        let certs = certs_from_pem(&bundle).unwrap();
        assert_eq!(certs, vec![b"leaf".to_vec()]);
    }
}
