/// JSON Web Key representation for account public keys
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::crypto::{b64url, sha256};

/// EC public key in JWK form, the only key type used for accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type, always "EC"
    pub kty: String,
    /// Curve, always "P-256"
    pub crv: String,
    /// X coordinate, base64url
    pub x: String,
    /// Y coordinate, base64url
    pub y: String,
}

impl Jwk {
    /// Build a P-256 JWK from base64url-encoded coordinates.
    pub fn ec_p256(x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: x.into(),
            y: y.into(),
        }
    }

    /// RFC 7638 thumbprint: SHA-256 over the canonical JSON of the
    /// required members in lexicographic order, base64url encoded.
    pub fn thumbprint(&self) -> String {
        // serde_json orders map keys lexicographically, which is exactly
        // the canonical member order crv, kty, x, y.
        let canonical = json!({
            "crv": self.crv,
            "kty": self.kty,
            "x": self.x,
            "y": self.y,
        })
        .to_string();
        b64url(&sha256(canonical.as_bytes()))
    }

    /// Convert to a JSON value for embedding in a protected JWS header.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
