//! REST device agent for the switch management API.
//!
//! One [`ApiAgent`] is one authenticated session against one device: log in,
//! read, mutate, drop. The bearer token and the port-id resolution table
//! live only as long as the agent.
//!
//! # Port identifiers
//!
//! The API addresses ports by a numeric handle that is not the chassis
//! number on every firmware. [`ApiAgent::resolve_physical_port`] maps a
//! chassis number to a handle by scanning the interface names returned by the
//! last port-stats fetch. When no record names the port, it falls back to
//! `handle == chassis number`, which can misdirect a change on firmware that
//! numbers ports differently and does not print interface names.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, trace, warn};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::PollSettings;
use crate::error::{ConnectError, MutationError, MutationStep};
use crate::fleet::{Credentials, DEFAULT_CHASSIS_PREFIX, DEFAULT_PORT_COUNT};
use crate::parse;

pub mod models;
pub mod transport;

pub use models::{DeviceInfo, PortConfig, PortStatRecord, VlanMembership};
pub use transport::{TlsMode, TransportConfig};

use models::{
    DeviceInfoEnvelope, LoginCredentials, LoginRequest, LoginResponse, PortConfigEnvelope,
    PortConfigUpdate, PortStatsEnvelope, VlanEnvelope, VlanMembershipEnvelope,
};

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 256;

/// Port count implied by a model string; unmatched models get 48.
pub fn derive_port_count(model: &str) -> u32 {
    parse::port_count_for_model(model)
}

/// What a completed `set_vlan` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetVlanOutcome {
    pub api_id: u32,
    /// PVID read in step one; `None` when the device reported none.
    pub previous_pvid: Option<u16>,
}

pub struct ApiAgent {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<Credentials>,
    token: Option<SecretString>,
    chassis_prefix: String,
    expected_ports: u32,
    stats_batch: usize,
    stats_margin: u32,
    poe_settle: Duration,
    last_stats: Vec<PortStatRecord>,
    stats_fetched: bool,
}

impl ApiAgent {
    pub fn new(
        host: &str,
        credentials: Arc<Credentials>,
        transport: &TransportConfig,
        settings: &PollSettings,
    ) -> Result<Self, ConnectError> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: transport.base_url(host, settings.api_port),
            credentials,
            token: None,
            chassis_prefix: DEFAULT_CHASSIS_PREFIX.to_string(),
            expected_ports: DEFAULT_PORT_COUNT,
            stats_batch: settings.port_stats_batch.max(1),
            stats_margin: settings.port_stats_margin,
            poe_settle: settings.poe_settle(),
            last_stats: Vec::new(),
            stats_fetched: false,
        })
    }

    pub fn with_chassis_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chassis_prefix = prefix.into();
        self
    }

    /// Port count used when a mutation has to fetch port stats itself.
    pub fn with_expected_ports(mut self, count: u32) -> Self {
        self.expected_ports = count;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Records from the most recent [`Self::get_port_stats`] call.
    pub fn last_stats(&self) -> &[PortStatRecord] {
        &self.last_stats
    }

    /// Logs in and keeps the bearer token. Any failure yields `false`.
    pub async fn login(&mut self) -> bool {
        match self.try_login().await {
            Ok(()) => true,
            Err(err) => {
                warn!("login to {} failed: {err}", self.base_url);
                false
            }
        }
    }

    async fn try_login(&mut self) -> Result<(), ConnectError> {
        let body = LoginRequest {
            login: LoginCredentials {
                username: &self.credentials.username,
                password: self.credentials.password.expose_secret(),
            },
        };
        let response = self
            .http
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await?;
        let text = check_status(response).await?;
        let parsed: LoginResponse = decode(&text)?;
        let token = parsed
            .login
            .and_then(|l| l.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConnectError::Auth("login response carried no token".to_string()))?;
        self.token = Some(SecretString::from(token));
        debug!("logged in to {}", self.base_url);
        Ok(())
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, ConnectError> {
        let envelope: DeviceInfoEnvelope = self.get("/device_info").await?;
        Ok(envelope.device_info)
    }

    /// Fetches stats for handles `1..=expected + margin`, a batch at a time.
    ///
    /// Handles that fail or return nothing are left out; this call itself
    /// never fails.
    pub async fn get_port_stats(&mut self, expected: u32) -> Vec<PortStatRecord> {
        let last_id = expected.saturating_add(self.stats_margin);
        let ids: Vec<u32> = (1..=last_id).collect();
        let mut records = Vec::new();
        let mut failures = 0usize;
        for batch in ids.chunks(self.stats_batch) {
            let results = join_all(batch.iter().map(|id| self.get_port_stat(*id))).await;
            for (id, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => trace!("no stats record for port {id}"),
                    Err(err) => {
                        failures += 1;
                        trace!("port {id} stats failed: {err}");
                    }
                }
            }
        }
        records.sort_by_key(|r| r.port_id);
        records.dedup_by_key(|r| r.port_id);
        debug!(
            "{}: {} port records, {} failed requests",
            self.base_url,
            records.len(),
            failures
        );
        self.last_stats = records.clone();
        self.stats_fetched = true;
        records
    }

    async fn get_port_stat(&self, id: u32) -> Result<Option<PortStatRecord>, ConnectError> {
        let envelope: PortStatsEnvelope = self.get(&format!("/sw_portstats?portid={id}")).await?;
        let mut records = envelope.ports.into_vec();
        if records.is_empty() {
            return Ok(None);
        }
        let pos = records.iter().position(|r| r.port_id == id).unwrap_or(0);
        Ok(Some(records.swap_remove(pos)))
    }

    /// Name of one VLAN; `None` when the device does not know it.
    pub async fn get_vlan_name(&self, vlan: u16) -> Result<Option<String>, ConnectError> {
        let envelope: VlanEnvelope = self.get(&format!("/swcfg_vlan?vlanid={vlan}")).await?;
        Ok(envelope
            .vlans
            .into_vec()
            .into_iter()
            .find(|v| v.vlan_id == vlan)
            .map(|v| v.name)
            .filter(|name| !name.is_empty()))
    }

    pub async fn get_port_config(&self, api_id: u32) -> Result<PortConfig, ConnectError> {
        let envelope: PortConfigEnvelope = self.get(&format!("/swcfg_port?portid={api_id}")).await?;
        Ok(envelope.config)
    }

    pub async fn set_port_config(&self, api_id: u32, config: PortConfig) -> Result<(), ConnectError> {
        self.post(
            &format!("/swcfg_port?portid={api_id}"),
            &PortConfigUpdate { config },
        )
        .await
    }

    pub async fn get_vlan_membership(&self, vlan: u16) -> Result<VlanMembership, ConnectError> {
        let envelope: VlanMembershipEnvelope = self
            .get(&format!("/swcfg_vlan_membership?vlanid={vlan}"))
            .await?;
        Ok(envelope.membership)
    }

    pub async fn set_vlan_membership(&self, membership: VlanMembership) -> Result<(), ConnectError> {
        let path = format!("/swcfg_vlan_membership?vlanid={}", membership.vlan_id);
        self.post(&path, &VlanMembershipEnvelope { membership }).await
    }

    /// Maps a chassis number to the API handle for this session.
    pub fn resolve_physical_port(&self, logical: u32) -> u32 {
        let label = format!("{}{}", self.chassis_prefix, logical);
        if let Some(record) = self
            .last_stats
            .iter()
            .find(|r| label_matches(&r.interface_name, &label))
        {
            trace!("port {label} resolved to api id {}", record.port_id);
            return record.port_id;
        }
        warn!(
            "{}: no interface named {label}, assuming api id {logical}",
            self.base_url
        );
        logical
    }

    async fn ensure_port_stats(&mut self) {
        if !self.stats_fetched {
            self.get_port_stats(self.expected_ports).await;
        }
    }

    /// Moves a port to `vlan` untagged and sets its PVID.
    ///
    /// Steps run in order and stop at the first failure; nothing is rolled
    /// back, so the returned error names the step the device stopped at.
    pub async fn set_vlan(&mut self, logical: u32, vlan: u16) -> Result<SetVlanOutcome, MutationError> {
        self.ensure_port_stats().await;
        let api_id = self.resolve_physical_port(logical);

        let current = self
            .get_port_config(api_id)
            .await
            .map_err(|e| MutationError::new(MutationStep::ReadCurrentPvid, e))?;
        let previous = current.port_vlan_id;

        let mut target = self
            .get_vlan_membership(vlan)
            .await
            .map_err(|e| MutationError::new(MutationStep::AddMembership, e))?;
        if target.add_untagged(api_id) {
            self.set_vlan_membership(target)
                .await
                .map_err(|e| MutationError::new(MutationStep::AddMembership, e))?;
        }

        let pvid = PortConfig {
            port_vlan_id: Some(vlan),
            poe_enable: None,
        };
        self.set_port_config(api_id, pvid)
            .await
            .map_err(|e| MutationError::new(MutationStep::WritePvid, e))?;

        if let Some(old) = previous.filter(|old| *old != 0 && *old != vlan) {
            let mut old_membership = self
                .get_vlan_membership(old)
                .await
                .map_err(|e| MutationError::new(MutationStep::RemoveOldMembership, e))?;
            if old_membership.remove(api_id) {
                self.set_vlan_membership(old_membership)
                    .await
                    .map_err(|e| MutationError::new(MutationStep::RemoveOldMembership, e))?;
            }
        }

        info!(
            "{}: port {logical} (api id {api_id}) moved to vlan {vlan}",
            self.base_url
        );
        Ok(SetVlanOutcome {
            api_id,
            previous_pvid: previous,
        })
    }

    /// Disables PoE, waits for the settle delay, enables it again.
    pub async fn cycle_poe(&mut self, logical: u32) -> Result<u32, MutationError> {
        self.ensure_port_stats().await;
        let api_id = self.resolve_physical_port(logical);

        self.set_port_config(api_id, poe(false))
            .await
            .map_err(|e| MutationError::new(MutationStep::PoeDisable, e))?;
        tokio::time::sleep(self.poe_settle).await;
        self.set_port_config(api_id, poe(true))
            .await
            .map_err(|e| MutationError::new(MutationStep::PoeEnable, e))?;

        info!("{}: power cycled port {logical} (api id {api_id})", self.base_url);
        Ok(api_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ConnectError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ConnectError::Auth("not logged in".to_string()))?;
        Ok(self
            .http
            .request(method, self.url(path))
            .bearer_auth(token.expose_secret()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConnectError> {
        let response = self.authorized(Method::GET, path)?.send().await?;
        let text = check_status(response).await?;
        decode(&text)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ConnectError> {
        let response = self.authorized(Method::POST, path)?.json(body).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

fn poe(enabled: bool) -> PortConfig {
    PortConfig {
        port_vlan_id: None,
        poe_enable: Some(enabled),
    }
}

/// Maps non-success statuses onto the error taxonomy and returns the body.
async fn check_status(response: reqwest::Response) -> Result<String, ConnectError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ConnectError::Auth(format!("HTTP {}: {body}", status.as_u16())));
    }
    Err(ConnectError::ApiStatus {
        status: status.as_u16(),
        body,
    })
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ConnectError> {
    serde_json::from_str(text).map_err(|e| ConnectError::Payload(e.to_string()))
}

/// Whether `name` contains `label` as a whole port label.
///
/// `1/0/1` matches `1/0/1` and `Gi 1/0/1` but not `1/0/12` or `11/0/1`.
pub fn label_matches(name: &str, label: &str) -> bool {
    if label.is_empty() {
        return false;
    }
    name.match_indices(label).any(|(start, _)| {
        let before = name[..start].chars().next_back();
        let after = name[start + label.len()..].chars().next();
        let clean_before = before.is_none_or(|c| !c.is_ascii_digit() && c != '/');
        let clean_after = after.is_none_or(|c| !c.is_ascii_digit() && c != '/');
        clean_before && clean_after
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_matching_respects_boundaries() {
        assert!(label_matches("1/0/1", "1/0/1"));
        assert!(label_matches("Gi 1/0/1", "1/0/1"));
        assert!(label_matches("1/0/1 (uplink)", "1/0/1"));
        assert!(!label_matches("1/0/12", "1/0/1"));
        assert!(!label_matches("11/0/1", "1/0/1"));
        assert!(!label_matches("2/1/0/1", "1/0/1"));
        assert!(!label_matches("", "1/0/1"));
    }

    #[test]
    fn port_count_follows_model_table() {
        assert_eq!(derive_port_count("M4300-96X"), 96);
        assert_eq!(derive_port_count("M4250-10G2F"), 48);
    }
}
