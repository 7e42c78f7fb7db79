use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use certdrive::crypto::b64url_decode;

/// A mock CA speaking the directory-discovered, `resource`-tagged
/// dialect the driver expects. The directory and the nonce endpoint are
/// mounted at start; scenario-specific endpoints are added per test.
pub struct MockCa {
    pub server: MockServer,
    nonce_heads: Arc<AtomicUsize>,
}

impl MockCa {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let nonce_heads = Arc::new(AtomicUsize::new(0));

        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/dir"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "new-reg": format!("{}/acme/new-reg", uri),
                "new-authz": format!("{}/acme/new-authz", uri),
                "new-cert": format!("{}/acme/new-cert", uri),
                "revoke-cert": format!("{}/acme/revoke-cert", uri),
                "new-nonce": format!("{}/acme/nonce", uri),
            })))
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/acme/nonce"))
            .respond_with(NonceResponder {
                counter: nonce_heads.clone(),
            })
            .mount(&server)
            .await;

        Self {
            server,
            nonce_heads,
        }
    }

    pub fn dir_url(&self) -> String {
        format!("{}/dir", self.server.uri())
    }

    /// How many nonces were fetched via HEAD
    pub fn nonce_heads(&self) -> usize {
        self.nonce_heads.load(Ordering::SeqCst)
    }

    /// Registration endpoint answering 201 with the given account path.
    pub async fn mount_new_reg(&self, account_path: &str) {
        Mock::given(method("POST"))
            .and(path("/acme/new-reg"))
            .respond_with(
                ok_with_nonce(201)
                    .insert_header("Location", format!("{}{}", self.server.uri(), account_path).as_str())
                    .set_body_json(json!({"id": 1, "status": "valid"})),
            )
            .mount(&self.server)
            .await;
    }

    /// Account URL answering signed no-op updates with 200.
    pub async fn mount_account_ok(&self, account_path: &str) {
        Mock::given(method("POST"))
            .and(path(account_path))
            .respond_with(ok_with_nonce(200).set_body_json(json!({"id": 1, "status": "valid"})))
            .mount(&self.server)
            .await;
    }

    /// new-authz creating one authorization resource.
    pub async fn mount_new_authz(&self, authz_path: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path("/acme/new-authz"))
            .respond_with(
                ok_with_nonce(201)
                    .insert_header("Location", format!("{}{}", self.server.uri(), authz_path).as_str())
                    .set_body_json(body),
            )
            .mount(&self.server)
            .await;
    }

    /// Challenge readiness endpoint answering 202.
    pub async fn mount_challenge(&self, chal_path: &str) {
        Mock::given(method("POST"))
            .and(path(chal_path))
            .respond_with(ok_with_nonce(202).set_body_json(json!({"status": "pending"})))
            .mount(&self.server)
            .await;
    }

    /// Authorization polling endpoint walking through the given bodies,
    /// the last one repeating.
    pub async fn mount_authz_poll(&self, authz_path: &str, bodies: Vec<Value>) {
        let responses = bodies
            .into_iter()
            .map(|b| ResponseTemplate::new(200).set_body_json(b))
            .collect();
        Mock::given(method("GET"))
            .and(path(authz_path))
            .respond_with(Sequence::new(responses))
            .mount(&self.server)
            .await;
    }

    /// Issuance endpoint answering 201 with the certificate inline.
    pub async fn mount_new_cert(&self, cert_path: &str, leaf_der: Vec<u8>) {
        Mock::given(method("POST"))
            .and(path("/acme/new-cert"))
            .respond_with(
                ok_with_nonce(201)
                    .insert_header("Location", format!("{}{}", self.server.uri(), cert_path).as_str())
                    .set_body_raw(leaf_der, "application/pkix-cert"),
            )
            .mount(&self.server)
            .await;
    }

    /// Issuance endpoint answering with a problem document.
    pub async fn mount_new_cert_problem(&self, problem_type: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path("/acme/new-cert"))
            .respond_with(problem_with_nonce(status, problem_type))
            .mount(&self.server)
            .await;
    }

    /// All requests seen so far for a method/path pair.
    pub async fn requests(&self, method_name: &str, req_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.to_string() == method_name && r.url.path() == req_path)
            .collect()
    }
}

/// Serves a fresh nonce on every HEAD.
struct NonceResponder {
    counter: Arc<AtomicUsize>,
}

impl Respond for NonceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).insert_header("Replay-Nonce", format!("head-nonce-{}", n).as_str())
    }
}

/// Walks through a list of responses, repeating the last one.
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    position: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            position: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let i = self.position.fetch_add(1, Ordering::SeqCst);
        self.responses[i.min(self.responses.len() - 1)].clone()
    }
}

/// 2xx template carrying a Replay-Nonce, like every real CA response.
pub fn ok_with_nonce(status: u16) -> ResponseTemplate {
    ResponseTemplate::new(status).insert_header("Replay-Nonce", next_nonce().as_str())
}

/// Problem document template, also carrying a Replay-Nonce.
pub fn problem_with_nonce(status: u16, problem_type: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("Replay-Nonce", next_nonce().as_str())
        .set_body_raw(
            json!({"type": problem_type, "detail": "mock problem"}).to_string(),
            "application/problem+json",
        )
}

fn next_nonce() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("resp-nonce-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Authorization resource body in the CA's wire form.
pub fn authz_body(server_uri: &str, domain: &str, status: &str, chal_type: &str, token: &str) -> Value {
    json!({
        "identifier": {"type": "dns", "value": domain},
        "status": status,
        "expires": "2036-01-01T00:00:00Z",
        "challenges": [{
            "type": chal_type,
            "token": token,
            "uri": format!("{}/acme/chal/1", server_uri),
        }],
    })
}

/// Self-signed DER certificate covering the given names.
pub fn leaf_cert(domains: &[&str]) -> Vec<u8> {
    let key = rcgen::KeyPair::generate().unwrap();
    let params =
        rcgen::CertificateParams::new(domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
            .unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

/// Decode the protected header of a signed request body.
pub fn protected_header(request: &Request) -> Value {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let raw = b64url_decode(body["protected"].as_str().unwrap()).unwrap();
    serde_json::from_slice(&raw).unwrap()
}

/// Decode the payload of a signed request body.
pub fn signed_payload(request: &Request) -> Value {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let payload = body["payload"].as_str().unwrap();
    if payload.is_empty() {
        return Value::Null;
    }
    let raw = b64url_decode(payload).unwrap();
    serde_json::from_slice(&raw).unwrap()
}
