/// The ACME driver: takes a managed domain from "never contacted the CA"
/// to "certificate persisted", idempotently across restarts.
use std::sync::Arc;

use tokio::time::Instant;

use crate::account::{AccountManager, AccountSession};
use crate::authz::{AuthzManager, AuthzSet, AuthzStatus};
use crate::cert;
use crate::challenge::{self, PublishedChallenge};
use crate::client::AcmeClient;
use crate::config::DriveConfig;
use crate::error::{AcmeError, Result};
use crate::order::Order;
use crate::registry::MdRegistry;
use crate::store::Store;
use crate::types::{CancelToken, DriveState, ManagedDomain, PROTO_ACME};

/// Drives managed domains against their CA.
///
/// Every phase is safe to re-enter: partial progress lives in the store,
/// the account is re-validated per run, authorizations are refreshed on
/// entry, and a known certificate location is polled before anything is
/// re-requested.
pub struct AcmeDriver {
    store: Arc<dyn Store>,
    config: DriveConfig,
}

impl AcmeDriver {
    /// Create a driver over the given store
    pub fn new(store: Arc<dyn Store>, config: DriveConfig) -> Self {
        Self { store, config }
    }

    /// Drive one managed domain to completion.
    pub async fn run(&self, md_name: &str, cancel: &CancelToken) -> Result<DriveState> {
        let registry = MdRegistry::new(self.store.clone());
        let md = registry.get(md_name).await?;
        if md.ca_proto != PROTO_ACME {
            return Err(AcmeError::unsupported(format!(
                "{}: protocol {} is not driven by this crate",
                md.name, md.ca_proto
            )));
        }

        tracing::info!("{}: driving {} against {}", md.name, md.ca_proto, md.ca_url);
        let client = AcmeClient::new(&md.ca_url, &self.config);
        let mut run = DriveRun {
            config: &self.config,
            store: self.store.as_ref(),
            registry: &registry,
            client,
            cancel,
            md,
            phase: "ACME setup",
        };

        match run.drive().await {
            Ok(state) => {
                tracing::info!("{}: drive complete, state {}", md_name, state);
                Ok(state)
            }
            Err(e) => {
                tracing::error!("{}: drive failed in phase '{}': {}", md_name, run.phase, e);
                Err(e)
            }
        }
    }
}

/// Record reaching a phase boundary on the persisted domain record.
async fn advance_state(
    md: &mut ManagedDomain,
    registry: &MdRegistry,
    state: DriveState,
) -> Result<()> {
    if md.state != state {
        md.state = state;
        registry.update(md).await?;
    }
    Ok(())
}

/// State of one run, threaded through the phases.
struct DriveRun<'a> {
    config: &'a DriveConfig,
    store: &'a dyn Store,
    registry: &'a MdRegistry,
    client: AcmeClient,
    cancel: &'a CancelToken,
    md: ManagedDomain,
    phase: &'static str,
}

impl DriveRun<'_> {
    async fn drive(&mut self) -> Result<DriveState> {
        self.phase = "ACME setup";
        self.client.setup(self.cancel).await?;

        // A certificate persisted earlier means a previous run finished
        // its protocol work; nothing to re-request.
        if cert::cert_present(self.store, &self.md.name).await? {
            advance_state(&mut self.md, self.registry, DriveState::Certified).await?;
            return Ok(DriveState::Certified);
        }

        self.phase = "choose account";
        let account_mgr = AccountManager::new(&self.client, self.store, self.cancel);
        let recorded_account = self.md.ca_account.clone();
        let mut session = account_mgr.select(&mut self.md).await?;
        if recorded_account != self.md.ca_account {
            self.registry.update(&self.md).await?;
        }
        advance_state(&mut self.md, self.registry, DriveState::Registered).await?;

        // ToS may change during the lifetime of an account; requests for
        // new authorizations are denied until the account agrees.
        self.phase = "check agreement";
        account_mgr
            .check_agreement(&mut session, self.md.ca_agreement.as_deref())
            .await?;
        advance_state(&mut self.md, self.registry, DriveState::TosAccepted).await?;

        // A known certificate location from an earlier run: try it once.
        // A 404 means the CA no longer recognizes the order; forget the
        // location and drive the full flow again.
        if let Some(cert_url) = self.md.cert_url.clone() {
            self.phase = "poll certificate";
            match cert::fetch_once(&self.client, &cert_url, self.cancel).await {
                Ok(Some(leaf)) => return self.finish_with_cert(leaf).await,
                Ok(None) => {}
                Err(e) if e.is_not_found() => {
                    tracing::info!("{}: CA forgot {}, re-submitting", self.md.name, cert_url);
                    self.md.cert_url = None;
                    self.registry.update(&self.md).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let (mut order, mut authz_set) = self.check_authz(&mut session).await?;
        self.start_challenges(&session, &mut authz_set, &mut order).await?;
        self.monitor_challenges(&mut authz_set).await?;
        advance_state(&mut self.md, self.registry, DriveState::Validated).await?;

        self.phase = "setup cert pkey";
        let domain_key = cert::setup_key(self.store, &self.md).await?;

        self.phase = "setup csr";
        let csr = cert::create_csr(&self.md, &domain_key)?;

        self.phase = "submit csr";
        let inline =
            cert::submit_csr(&self.client, &session, &mut self.md, &csr, self.cancel).await?;
        self.registry.update(&self.md).await?;

        let leaf = match inline {
            Some(leaf) => leaf,
            None => self.poll_certificate().await?,
        };
        self.finish_with_cert(leaf).await
    }

    /// Refresh or create the authorization for every DNS name, keeping
    /// the persisted set and order in step.
    async fn check_authz(
        &mut self,
        session: &mut AccountSession,
    ) -> Result<(Order, AuthzSet)> {
        self.phase = "check authz";
        let authz_mgr = AuthzManager::new(&self.client, self.cancel);
        let mut order = Order::load(self.store, &self.md.name).await?.unwrap_or_default();
        let mut authz_set = AuthzSet::load(self.store, &self.md.name)
            .await?
            .unwrap_or_else(|| AuthzSet::new(&session.account.id));
        // The set may predate an account switch
        authz_set.account = session.account.id.clone();

        for domain in self.md.domains.clone() {
            let mut changed = false;

            let mut stale_url = None;
            if let Some(authz) = authz_set.get_mut(&domain) {
                let unusable = match authz_mgr.refresh(authz).await {
                    Ok(()) => authz.is_unusable(),
                    Err(e) if e.is_not_found() => true,
                    Err(e) => return Err(e),
                };
                if unusable {
                    stale_url = Some(authz.url.clone());
                }
            }
            if let Some(url) = stale_url {
                tracing::info!(
                    "{}: authorization for {} is unusable, requesting a new one",
                    self.md.name,
                    domain
                );
                order.remove_authz(&url);
                authz_set.remove(&domain);
                changed = true;
            }

            if let Some(authz) = authz_set.get(&domain) {
                order.add_authz(&authz.url);
            } else {
                let authz = authz_mgr.register(session, &domain).await?;
                order.add_authz(&authz.url);
                authz_set.put(authz);
                changed = true;
            }

            if changed {
                authz_set.save(self.store, &self.md.name).await?;
            }
        }

        // The order is on disk before any response is published or
        // signalled, so a restart finds every URL it needs.
        order.save(self.store, &self.md.name).await?;
        Ok((order, authz_set))
    }

    /// Publish challenge responses for all pending authorizations, then
    /// signal readiness. Publication of every name completes before the
    /// first readiness POST so the CA finds all responses in place.
    async fn start_challenges(
        &mut self,
        session: &AccountSession,
        authz_set: &mut AuthzSet,
        order: &mut Order,
    ) -> Result<()> {
        self.phase = "start challenges";
        let authz_mgr = AuthzManager::new(&self.client, self.cancel);
        let mut to_signal: Vec<PublishedChallenge> = Vec::new();

        for authz in authz_set.authzs.iter_mut() {
            match authz.status {
                AuthzStatus::Valid => continue,
                AuthzStatus::Pending => {
                    let chosen = challenge::select(authz, self.config)?.clone();
                    let published =
                        challenge::publish(self.store, &session.key, &authz.domain, &chosen)
                            .await?;
                    authz.challenge_dir = Some(published.dir.clone());
                    order.add_challenge_dir(&published.dir);
                    to_signal.push(published);
                }
                status => {
                    return Err(AcmeError::unauthorized(format!(
                        "{}: unexpected authorization state {} at {}",
                        authz.domain, status, authz.url
                    )));
                }
            }
        }

        authz_set.save(self.store, &self.md.name).await?;
        order.save(self.store, &self.md.name).await?;
        advance_state(&mut self.md, self.registry, DriveState::Challenged).await?;

        for published in &to_signal {
            authz_mgr
                .signal_ready(session, &published.challenge, &published.key_authorization)
                .await?;
        }
        Ok(())
    }

    /// Poll the authorizations until all are valid, one turns terminal,
    /// or the monitor timeout elapses.
    async fn monitor_challenges(&mut self, authz_set: &mut AuthzSet) -> Result<()> {
        self.phase = "monitor challenges";
        let authz_mgr = AuthzManager::new(&self.client, self.cancel);
        let timeout = self.config.authz_monitor_timeout();
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            self.cancel.check()?;
            let mut all_valid = true;

            for authz in authz_set.authzs.iter_mut() {
                authz_mgr.refresh(authz).await?;
                match authz.status {
                    AuthzStatus::Valid => {}
                    AuthzStatus::Pending => all_valid = false,
                    status => {
                        self.md.state = DriveState::Denied;
                        self.registry.update(&self.md).await?;
                        return Err(AcmeError::unauthorized(format!(
                            "{}: authorization {} at {}",
                            authz.domain, status, authz.url
                        )));
                    }
                }
            }
            authz_set.save(self.store, &self.md.name).await?;

            if all_valid {
                tracing::info!("{}: all domain authorizations valid", self.md.name);
                return Ok(());
            }

            let delay = self.config.retry.delay(attempt);
            if start.elapsed() + delay >= timeout {
                return Err(AcmeError::timeout(format!(
                    "{}: authorizations still pending after {:?}",
                    self.md.name,
                    start.elapsed()
                )));
            }
            tracing::debug!("{}: authorizations pending, retry in {:?}", self.md.name, delay);
            self.cancel.check()?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Poll the certificate location until the CA hands out the leaf.
    async fn poll_certificate(&mut self) -> Result<Vec<u8>> {
        self.phase = "poll certificate";
        let cert_url = self.md.cert_url.clone().ok_or_else(|| {
            AcmeError::malformed(format!("{}: no certificate location", self.md.name))
        })?;

        let timeout = self.config.cert_poll_timeout();
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            self.cancel.check()?;
            if let Some(leaf) = cert::fetch_once(&self.client, &cert_url, self.cancel).await? {
                return Ok(leaf);
            }
            let delay = self.config.retry.delay(attempt);
            if start.elapsed() + delay >= timeout {
                return Err(AcmeError::timeout(format!(
                    "{}: no certificate at {} after {:?}",
                    self.md.name,
                    cert_url,
                    start.elapsed()
                )));
            }
            tracing::debug!("{}: certificate pending, retry in {:?}", self.md.name, delay);
            self.cancel.check()?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Persist leaf and chain, clean up challenge artifacts, mark the
    /// domain certified.
    async fn finish_with_cert(&mut self, leaf: Vec<u8>) -> Result<DriveState> {
        if !cert::covers_domains(&leaf, &self.md.domains)? {
            tracing::warn!(
                "{}: certificate SAN set differs from configured names {:?}",
                self.md.name,
                self.md.domains
            );
        }
        cert::save_cert(self.store, &self.md.name, &leaf).await?;

        match cert::issuer_url(&leaf)? {
            Some(url) => {
                self.phase = "retrieve chain";
                let chain = cert::fetch_chain(&self.client, &url, self.cancel).await?;
                cert::save_chain(self.store, &self.md.name, &chain).await?;
            }
            None => {
                tracing::info!(
                    "{}: certificate names no issuer URL, chain not retrieved",
                    self.md.name
                );
            }
        }

        Order::purge(self.store, &self.md.name).await?;
        advance_state(&mut self.md, self.registry, DriveState::Certified).await?;
        self.phase = "completed";
        tracing::info!("{}: certificate obtained", self.md.name);
        Ok(DriveState::Certified)
    }
}
