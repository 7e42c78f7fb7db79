/// ACME account key: ECDSA P-256, signing JWS requests as ES256
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use zeroize::Zeroizing;

use crate::crypto::{b64url, from_pem, to_pem};
use crate::error::{AcmeError, Result};
use crate::protocol::Jwk;

const PEM_LABEL: &str = "PRIVATE KEY";

/// The private key identifying one CA account.
///
/// The PKCS#8 document is kept alongside the parsed key so the key can
/// be persisted; it is zeroized when the key is dropped.
pub struct AccountKey {
    pkcs8: Zeroizing<Vec<u8>>,
    key: EcdsaKeyPair,
    rng: SystemRandom,
}

impl AccountKey {
    /// Generate a fresh P-256 key.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| AcmeError::crypto("account key generation failed"))?;
        Self::from_pkcs8(Zeroizing::new(pkcs8.as_ref().to_vec()), rng)
    }

    /// Load a key from its persisted PKCS#8 PEM form.
    pub fn from_pkcs8_pem(pem_text: &str) -> Result<Self> {
        let der = Zeroizing::new(from_pem(pem_text, PEM_LABEL)?);
        Self::from_pkcs8(der, SystemRandom::new())
    }

    fn from_pkcs8(pkcs8: Zeroizing<Vec<u8>>, rng: SystemRandom) -> Result<Self> {
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|_| AcmeError::crypto("account key is not a valid P-256 PKCS#8 document"))?;
        Ok(Self { pkcs8, key, rng })
    }

    /// Serialize to PKCS#8 PEM for persistence.
    pub fn to_pkcs8_pem(&self) -> String {
        to_pem(PEM_LABEL, &self.pkcs8)
    }

    /// JWS algorithm identifier for this key type.
    pub fn alg(&self) -> &'static str {
        "ES256"
    }

    /// Sign a JWS signing input, returning the raw `r || s` signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .key
            .sign(&self.rng, message)
            .map_err(|_| AcmeError::crypto("JWS signing failed"))?;
        Ok(sig.as_ref().to_vec())
    }

    /// Public key as a JWK.
    pub fn jwk(&self) -> Result<Jwk> {
        let point = self.key.public_key().as_ref();
        // Uncompressed SEC1 point: 0x04 || x || y
        if point.len() != 65 || point[0] != 0x04 {
            return Err(AcmeError::crypto("unexpected P-256 public key encoding"));
        }
        Ok(Jwk::ec_p256(b64url(&point[1..33]), b64url(&point[33..65])))
    }

    /// RFC 7638 thumbprint of the public key, base64url encoded.
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint())
    }

    /// Key authorization for a challenge token:
    /// `token "." base64url(sha256(canonical JWK))`.
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        Ok(format!("{}.{}", token, self.thumbprint()?))
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey").field("alg", &self.alg()).finish_non_exhaustive()
    }
}
