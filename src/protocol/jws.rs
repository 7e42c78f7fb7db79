/// Flattened JWS signing for ACME requests
use serde::Serialize;
use serde_json::Value;

use crate::crypto::{AccountKey, b64url};
use crate::error::Result;
use crate::protocol::Jwk;

/// Protected header of one signed request.
///
/// Carries exactly one of `jwk` (before an account URL is known) or
/// `kid` (the account URL, afterwards).
#[derive(Debug, Serialize)]
struct Protected<'a> {
    alg: &'a str,
    nonce: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

/// Flattened JWS JSON serialization, the body of every signed POST.
#[derive(Debug, Serialize)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Sign `payload` for `url` with the account key.
///
/// `payload = None` produces the empty-string payload used for
/// POST-as-GET style requests. The returned string is the complete
/// request body.
pub fn sign(
    key: &AccountKey,
    url: &str,
    nonce: &str,
    kid: Option<&str>,
    payload: Option<&Value>,
) -> Result<String> {
    let protected = Protected {
        alg: key.alg(),
        nonce,
        url,
        jwk: if kid.is_none() { Some(key.jwk()?) } else { None },
        kid,
    };

    let protected_b64 = b64url(serde_json::to_string(&protected)?.as_bytes());
    let payload_b64 = match payload {
        Some(value) => b64url(value.to_string().as_bytes()),
        None => String::new(),
    };

    let signing_input = format!("{}.{}", protected_b64, payload_b64);
    let signature = key.sign(signing_input.as_bytes())?;

    let jws = FlattenedJws {
        protected: protected_b64,
        payload: payload_b64,
        signature: b64url(&signature),
    };
    Ok(serde_json::to_string(&jws)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::b64url_decode;
    use serde_json::json;

    fn decode_part(body: &Value, part: &str) -> Value {
        let raw = b64url_decode(body[part].as_str().unwrap()).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn test_sign_with_jwk() {
        let key = AccountKey::generate().unwrap();
        let payload = json!({"resource": "new-reg", "contact": ["mailto:o@a.test"]});
        let body: Value = serde_json::from_str(
            &sign(&key, "https://ca.test/new-reg", "nonce-1", None, Some(&payload)).unwrap(),
        )
        .unwrap();

        let protected = decode_part(&body, "protected");
        assert_eq!(protected["alg"], "ES256");
        assert_eq!(protected["nonce"], "nonce-1");
        assert_eq!(protected["url"], "https://ca.test/new-reg");
        assert_eq!(protected["jwk"]["kty"], "EC");
        assert!(protected.get("kid").is_none());

        assert_eq!(decode_part(&body, "payload"), payload);
        // raw P-256 signature is 64 bytes
        assert_eq!(b64url_decode(body["signature"].as_str().unwrap()).unwrap().len(), 64);
    }

    #[test]
    fn test_sign_with_kid() {
        let key = AccountKey::generate().unwrap();
        let body: Value = serde_json::from_str(
            &sign(
                &key,
                "https://ca.test/acct/1",
                "nonce-2",
                Some("https://ca.test/acct/1"),
                Some(&json!({"resource": "reg"})),
            )
            .unwrap(),
        )
        .unwrap();

        let protected = decode_part(&body, "protected");
        assert_eq!(protected["kid"], "https://ca.test/acct/1");
        assert!(protected.get("jwk").is_none());
    }

    #[test]
    fn test_empty_payload_encodes_as_empty_string() {
        let key = AccountKey::generate().unwrap();
        let body: Value = serde_json::from_str(
            &sign(&key, "https://ca.test/authz/1", "nonce-3", Some("kid"), None).unwrap(),
        )
        .unwrap();
        assert_eq!(body["payload"], "");
    }
}
