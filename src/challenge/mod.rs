/// Challenge selection and response publication
use rcgen::{CertificateParams, CustomExtension, DnType, KeyPair};

use crate::authz::{Authorization, Challenge};
use crate::config::DriveConfig;
use crate::crypto::{AccountKey, b64url, sha256};
use crate::error::{AcmeError, Result};
use crate::store::{Group, Store};
use crate::types::ChallengeType;

/// A challenge response written to the store, ready to be signalled.
#[derive(Debug, Clone)]
pub struct PublishedChallenge {
    /// The challenge that was answered
    pub challenge: Challenge,
    /// Store name (in the challenges group) holding the artifacts
    pub dir: String,
    /// The computed key authorization
    pub key_authorization: String,
}

/// Pick the challenge to answer: the first type in driver preference
/// order that is both offered by the authorization and enabled in the
/// configuration.
pub fn select<'c>(authz: &'c Authorization, config: &DriveConfig) -> Result<&'c Challenge> {
    for kind in config.challenge_types() {
        if let Some(challenge) = authz.challenges.iter().find(|c| c.kind == kind.as_str()) {
            return Ok(challenge);
        }
    }
    let offered: Vec<&str> = authz.challenges.iter().map(|c| c.kind.as_str()).collect();
    Err(AcmeError::unsupported(format!(
        "no usable challenge for {}: CA offers [{}]",
        authz.domain,
        offered.join(", ")
    )))
}

/// Publish the response artifact for a challenge and return the
/// challenge directory recorded for later purge.
///
/// Layout in the challenges group:
/// - `http-01/<domain>/<token>`: raw key authorization bytes
/// - `tls-alpn-01/<domain>/{cert.pem,key.pem}`
/// - `tls-sni/<domain>/{cert.pem,key.pem}`
/// - `dns-01/<domain>/<domain>.dns`: base64url(sha256(key authorization))
pub async fn publish(
    store: &dyn Store,
    key: &AccountKey,
    domain: &str,
    challenge: &Challenge,
) -> Result<PublishedChallenge> {
    let kind: ChallengeType = challenge
        .kind
        .parse()
        .map_err(|_| AcmeError::unsupported(format!("challenge type {}", challenge.kind)))?;
    let key_authorization = key.key_authorization(&challenge.token)?;

    let dir = match kind {
        ChallengeType::Http01 => {
            let dir = format!("http-01/{}", domain);
            store
                .save(Group::Challenges, &dir, &challenge.token, key_authorization.as_bytes(), false)
                .await?;
            dir
        }
        ChallengeType::Dns01 => {
            // The record value is consumed by an external DNS publisher
            let record = b64url(&sha256(key_authorization.as_bytes()));
            let dir = format!("dns-01/{}", domain);
            store
                .save(Group::Challenges, &dir, &format!("{}.dns", domain), record.as_bytes(), false)
                .await?;
            dir
        }
        ChallengeType::TlsSni01 => {
            let digest = hex::encode(sha256(key_authorization.as_bytes()));
            let san = format!("{}.{}.acme.invalid", &digest[..32], &digest[32..64]);
            let dir = format!("tls-sni/{}", domain);
            save_self_signed(store, &dir, vec![san], None).await?;
            dir
        }
        ChallengeType::TlsAlpn01 => {
            let digest = sha256(key_authorization.as_bytes());
            let dir = format!("tls-alpn-01/{}", domain);
            save_self_signed(
                store,
                &dir,
                vec![domain.to_string()],
                Some(CustomExtension::new_acme_identifier(&digest)),
            )
            .await?;
            dir
        }
    };

    tracing::info!("published {} response for {} under {}", kind, domain, dir);
    Ok(PublishedChallenge {
        challenge: challenge.clone(),
        dir,
        key_authorization,
    })
}

/// Generate a throwaway self-signed certificate for the TLS challenge
/// variants and persist cert and key into the challenge directory.
async fn save_self_signed(
    store: &dyn Store,
    dir: &str,
    sans: Vec<String>,
    extension: Option<CustomExtension>,
) -> Result<()> {
    let cn = sans[0].clone();
    let key_pair =
        KeyPair::generate().map_err(|e| AcmeError::crypto(format!("challenge key: {}", e)))?;
    let mut params = CertificateParams::new(sans)
        .map_err(|e| AcmeError::crypto(format!("challenge cert params: {}", e)))?;
    params.distinguished_name.push(DnType::CommonName, cn);
    if let Some(ext) = extension {
        params.custom_extensions.push(ext);
    }
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| AcmeError::crypto(format!("challenge cert: {}", e)))?;

    store.save(Group::Challenges, dir, "cert.pem", cert.pem().as_bytes(), false).await?;
    store
        .save(Group::Challenges, dir, "key.pem", key_pair.serialize_pem().as_bytes(), false)
        .await
}
