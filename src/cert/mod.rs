/// Certificate finalization: domain key, CSR, issuance polling, chain retrieval
use rcgen::{CertificateParams, DnType, KeyPair, RsaKeySize};
use serde_json::json;
use x509_parser::prelude::*;

use crate::account::AccountSession;
use crate::client::{AcmeClient, CaResponse};
use crate::crypto::{b64url, certs_from_pem, to_pem};
use crate::error::{AcmeError, Result};
use crate::store::{Group, Store, aspect};
use crate::types::{CancelToken, KeySpec, ManagedDomain};

const PKIX_CERT: &str = "application/pkix-cert";

/// Load the domain private key, generating and persisting it on first
/// use. The key is created exactly once and reused across renewals.
pub async fn setup_key(store: &dyn Store, md: &ManagedDomain) -> Result<KeyPair> {
    match store.load(Group::Domains, &md.name, aspect::PKEY).await {
        Ok(raw) => {
            let pem_text = String::from_utf8(raw)
                .map_err(|_| AcmeError::storage(format!("{}: domain key is not UTF-8", md.name)))?;
            KeyPair::from_pem(&pem_text)
                .map_err(|e| AcmeError::crypto(format!("{}: domain key: {}", md.name, e)))
        }
        Err(e) if e.is_not_found() => {
            tracing::debug!("{}: generating domain key {:?}", md.name, md.pkey_spec);
            let key = generate_key(md.pkey_spec)?;
            store
                .save(Group::Domains, &md.name, aspect::PKEY, key.serialize_pem().as_bytes(), true)
                .await?;
            Ok(key)
        }
        Err(e) => Err(e),
    }
}

fn generate_key(spec: KeySpec) -> Result<KeyPair> {
    let key = match spec {
        KeySpec::Rsa { bits } => {
            let size = match bits {
                2048 => RsaKeySize::_2048,
                3072 => RsaKeySize::_3072,
                4096 => RsaKeySize::_4096,
                other => {
                    return Err(AcmeError::crypto(format!("unsupported RSA key size {}", other)));
                }
            };
            KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, size)
        }
        KeySpec::P256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
    };
    key.map_err(|e| AcmeError::crypto(format!("domain key generation: {}", e)))
}

/// Build the CSR for all names of the managed domain and return its DER
/// in base64url. The first name becomes the CN; SAN order follows the
/// record.
pub fn create_csr(md: &ManagedDomain, key: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::new(md.domains.clone())
        .map_err(|e| AcmeError::crypto(format!("{}: CSR params: {}", md.name, e)))?;
    params
        .distinguished_name
        .push(DnType::CommonName, md.domains[0].clone());
    let csr = params
        .serialize_request(key)
        .map_err(|e| AcmeError::crypto(format!("{}: CSR: {}", md.name, e)))?;
    Ok(b64url(csr.der().as_ref()))
}

/// Submit the CSR to the CA's issuance endpoint.
///
/// Stores the returned certificate location on the managed domain; when
/// the CA delivers the certificate in the same response, its DER is
/// returned so polling can be skipped.
pub async fn submit_csr(
    client: &AcmeClient,
    session: &AccountSession,
    md: &mut ManagedDomain,
    csr_b64: &str,
    cancel: &CancelToken,
) -> Result<Option<Vec<u8>>> {
    let directory = client.directory().await?;
    let csr = csr_b64.to_string();
    let response = client
        .post_signed(&directory.new_cert, &session.key, Some(session.kid()), cancel, || {
            Ok(Some(json!({"resource": "new-cert", "csr": csr})))
        })
        .await?;

    let location = response.location().ok_or_else(|| {
        AcmeError::malformed(format!("{}: certificate created without a Location", md.name))
    })?;
    md.cert_url = Some(location);

    leaf_from_response(&response)
}

/// One poll of the certificate location. `None` means the CA accepted
/// the request but has not issued yet.
pub async fn fetch_once(
    client: &AcmeClient,
    cert_url: &str,
    cancel: &CancelToken,
) -> Result<Option<Vec<u8>>> {
    let response = client.get(cert_url, cancel).await?;
    leaf_from_response(&response)
}

/// Extract a leaf certificate from a CA response body, DER or PEM.
fn leaf_from_response(response: &CaResponse) -> Result<Option<Vec<u8>>> {
    if response.body.is_empty() {
        return Ok(None);
    }
    let content_type = response.content_type().unwrap_or_default();
    if content_type.starts_with(PKIX_CERT) {
        return Ok(Some(response.body.clone()));
    }
    if response.body.starts_with(b"-----BEGIN") {
        let text = String::from_utf8(response.body.clone())
            .map_err(|_| AcmeError::malformed("certificate body is not UTF-8"))?;
        let mut certs = certs_from_pem(&text)?;
        if certs.is_empty() {
            return Err(AcmeError::malformed("certificate body carries no CERTIFICATE block"));
        }
        return Ok(Some(certs.remove(0)));
    }
    // JSON status documents while processing
    Ok(None)
}

/// DNS names in the certificate's subjectAltName extension.
pub fn san_names(leaf_der: &[u8]) -> Result<Vec<String>> {
    let (_, cert) = X509Certificate::from_der(leaf_der)
        .map_err(|e| AcmeError::malformed(format!("certificate parse: {}", e)))?;
    let names = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|gn| match gn {
                    GeneralName::DNSName(name) => Some(name.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(names)
}

/// Whether the certificate covers exactly the managed domain's names.
pub fn covers_domains(leaf_der: &[u8], domains: &[String]) -> Result<bool> {
    let mut sans = san_names(leaf_der)?;
    let mut expected: Vec<String> = domains.iter().map(|d| d.to_ascii_lowercase()).collect();
    sans = sans.into_iter().map(|d| d.to_ascii_lowercase()).collect();
    sans.sort();
    sans.dedup();
    expected.sort();
    expected.dedup();
    Ok(sans == expected)
}

/// CA-Issuers URL from the Authority Information Access extension.
pub fn issuer_url(leaf_der: &[u8]) -> Result<Option<String>> {
    let (_, cert) = X509Certificate::from_der(leaf_der)
        .map_err(|e| AcmeError::malformed(format!("certificate parse: {}", e)))?;
    for ext in cert.extensions() {
        if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
            for desc in &aia.accessdescs {
                // id-ad-caIssuers
                if desc.access_method.to_id_string() == "1.3.6.1.5.5.7.48.2"
                    && let GeneralName::URI(uri) = &desc.access_location
                {
                    return Ok(Some(uri.to_string()));
                }
            }
        }
    }
    Ok(None)
}

/// Download the issuer chain and normalize it to PEM.
pub async fn fetch_chain(
    client: &AcmeClient,
    issuer_url: &str,
    cancel: &CancelToken,
) -> Result<String> {
    let response = client.get(issuer_url, cancel).await?;
    if response.body.is_empty() {
        return Err(AcmeError::malformed(format!("empty chain from {}", issuer_url)));
    }
    if response.body.starts_with(b"-----BEGIN") {
        String::from_utf8(response.body)
            .map_err(|_| AcmeError::malformed("chain body is not UTF-8"))
    } else {
        Ok(to_pem("CERTIFICATE", &response.body))
    }
}

/// Persist the leaf certificate for a managed domain.
pub async fn save_cert(store: &dyn Store, md_name: &str, leaf_der: &[u8]) -> Result<()> {
    let pem_text = to_pem("CERTIFICATE", leaf_der);
    store.save(Group::Domains, md_name, aspect::CERT, pem_text.as_bytes(), false).await
}

/// Persist the issuer chain for a managed domain.
pub async fn save_chain(store: &dyn Store, md_name: &str, chain_pem: &str) -> Result<()> {
    store.save(Group::Domains, md_name, aspect::CHAIN, chain_pem.as_bytes(), false).await
}

/// Whether a certificate is already persisted for this name.
pub async fn cert_present(store: &dyn Store, md_name: &str) -> Result<bool> {
    match store.load(Group::Domains, md_name, aspect::CERT).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
