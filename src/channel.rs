//! Device channels: the two ways this crate reads and changes a switch.
//!
//! [`ApiChannel`] talks to the HTTPS management API through an
//! [`ApiAgent`]. [`InteractiveChannel`] drives the CLI over SSH with the
//! session automaton. Both implement [`DeviceChannel`], and
//! [`FleetChannels`] picks one per device from its fleet entry.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::TcpStream;

use crate::api::{ApiAgent, PortStatRecord, TransportConfig, derive_port_count, label_matches};
use crate::automaton::{Automaton, BLOCK_SLOT, CaptureSet, Script};
use crate::config::PollSettings;
use crate::error::{CommandError, ConnectError};
use crate::fleet::{ChannelKind, Credentials, Device};
use crate::model::{DeviceSnapshot, Port, SystemInfo, VlanMap};
use crate::parse;
use crate::session::{
    self, ConnectionSecurityOptions, SessionEvent, SessionRecorder, SshShell, TranscriptLog,
};
use crate::templates;

/// What one fetch learned about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReading {
    pub system: SystemInfo,
    pub derived_port_count: u32,
    /// Ports the device reported, keyed by chassis number.
    pub ports: BTreeMap<u32, Port>,
    /// VLAN names learned this time; the poller only adds ids it lacks.
    pub vlan_names: VlanMap,
}

/// Inputs for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub device: &'a Device,
    pub address: &'a str,
    /// The device's current cache entry.
    pub prior: &'a DeviceSnapshot,
}

/// Where a configuration change goes.
#[derive(Debug, Clone, Copy)]
pub struct ConfigTarget<'a> {
    pub device: &'a Device,
    pub address: &'a str,
    pub port_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    SetVlan { port: u32, vlan: u16 },
    CyclePoe { port: u32 },
    /// Raw CLI lines, run as one block on the interactive channel.
    RawBlock(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOutcome {
    VlanSet {
        api_id: Option<u32>,
        previous_pvid: Option<u16>,
    },
    PoeCycled {
        api_id: Option<u32>,
    },
    /// Echo of a configuration block; the CLI gives no per-line status.
    BlockApplied { output: String },
}

/// One way of reaching a device.
pub trait DeviceChannel: Send + Sync {
    /// Whether `address` accepts connections on this channel's service port.
    fn probe(&self, device: &Device, address: &str) -> impl Future<Output = bool> + Send;

    fn fetch_snapshot(
        &self,
        ctx: FetchContext<'_>,
    ) -> impl Future<Output = Result<DeviceReading, ConnectError>> + Send;

    fn apply_config(
        &self,
        target: ConfigTarget<'_>,
        change: &ConfigChange,
    ) -> impl Future<Output = Result<ConfigOutcome, CommandError>> + Send;
}

/// TCP connect check with a hard timeout.
pub async fn tcp_probe(address: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!("probe {address}:{port} refused: {err}");
            false
        }
        Err(_) => {
            debug!("probe {address}:{port} timed out");
            false
        }
    }
}

// ── REST ────────────────────────────────────────────────────────────

pub struct ApiChannel {
    credentials: Arc<Credentials>,
    transport: TransportConfig,
    settings: PollSettings,
}

impl ApiChannel {
    pub fn new(credentials: Arc<Credentials>, settings: PollSettings) -> Self {
        let transport = TransportConfig::default().with_timeout(settings.request_timeout());
        Self {
            credentials,
            transport,
            settings,
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    fn agent(&self, device: &Device, address: &str) -> Result<ApiAgent, ConnectError> {
        Ok(ApiAgent::new(
            address,
            Arc::clone(&self.credentials),
            &self.transport,
            &self.settings,
        )?
        .with_chassis_prefix(device.chassis_prefix.clone()))
    }

    async fn logged_in(&self, device: &Device, address: &str) -> Result<ApiAgent, CommandError> {
        let mut agent = self.agent(device, address)?;
        if !agent.login().await {
            return Err(CommandError::LoginFailed(device.name.clone()));
        }
        Ok(agent)
    }
}

/// Chassis number for a stats record, or `None` when the record is not one
/// of this unit's front-panel ports.
///
/// A named record must carry the device's own label for that number, the
/// same rule [`ApiAgent::resolve_physical_port`] uses, so `2/0/1` or `0/3/1`
/// never stands in for `1/0/1`. Unnamed records fall back to the API id.
fn record_logical_id(device: &Device, record: &PortStatRecord) -> Option<u32> {
    let name = record.interface_name.trim();
    if name.is_empty() {
        return Some(record.port_id);
    }
    let last = name.split_whitespace().last()?;
    if !last.contains('/') {
        return None;
    }
    let id = parse::chassis_number(last)?;
    label_matches(name, &device.port_label(id)).then_some(id)
}

/// Turns port-stat records into ports for chassis numbers `1..=count`.
pub fn ports_from_stats(device: &Device, records: &[PortStatRecord], count: u32) -> BTreeMap<u32, Port> {
    let mut ports = BTreeMap::new();
    for record in records {
        let Some(id) = record_logical_id(device, record).filter(|id| (1..=count).contains(id))
        else {
            continue;
        };
        ports.entry(id).or_insert_with(|| Port {
            logical_id: id,
            label: device.port_label(id),
            api_id: Some(record.port_id),
            link_up: record.link_up,
            poe_enabled: record.poe_enabled,
            vlan_id: record.pvid.or(Some(1)),
            description: record.description.clone(),
            speed_label: record.speed.clone(),
        });
    }
    ports
}

impl DeviceChannel for ApiChannel {
    async fn probe(&self, _device: &Device, address: &str) -> bool {
        tcp_probe(address, self.settings.api_port, self.settings.probe_timeout()).await
    }

    async fn fetch_snapshot(&self, ctx: FetchContext<'_>) -> Result<DeviceReading, ConnectError> {
        let mut agent = self.agent(ctx.device, ctx.address)?;
        if !agent.login().await {
            return Err(ConnectError::Auth(format!("login to {} failed", ctx.device.name)));
        }
        let info = agent.get_device_info().await?;
        let count = derive_port_count(&info.model);
        let records = agent.get_port_stats(count).await;
        if records.is_empty() {
            return Err(ConnectError::Transport(format!(
                "{} returned no port statistics",
                ctx.device.name
            )));
        }
        let ports = ports_from_stats(ctx.device, &records, count);

        let unknown: BTreeSet<u16> = ports
            .values()
            .filter_map(|p| p.vlan_id)
            .filter(|id| !ctx.prior.vlan_map.contains_key(id))
            .collect();
        let mut vlan_names = VlanMap::new();
        for vlan in unknown {
            match agent.get_vlan_name(vlan).await {
                Ok(Some(name)) => {
                    vlan_names.insert(vlan, name);
                }
                Ok(None) => debug!("{}: vlan {vlan} has no name", ctx.device.name),
                Err(err) => debug!("{}: vlan {vlan} name lookup failed: {err}", ctx.device.name),
            }
        }

        let nonempty = |s: String| Some(s).filter(|s| !s.trim().is_empty());
        Ok(DeviceReading {
            system: SystemInfo {
                system_name: nonempty(info.name).or_else(|| Some(ctx.prior.system_name.clone())),
                system_model: nonempty(info.model),
            },
            derived_port_count: count,
            ports,
            vlan_names,
        })
    }

    async fn apply_config(
        &self,
        target: ConfigTarget<'_>,
        change: &ConfigChange,
    ) -> Result<ConfigOutcome, CommandError> {
        let device = target.device;
        match change {
            ConfigChange::SetVlan { port, vlan } => {
                let mut agent = self
                    .logged_in(device, target.address)
                    .await?
                    .with_expected_ports(target.port_count);
                let outcome = agent.set_vlan(*port, *vlan).await.map_err(|source| {
                    CommandError::PartialMutation {
                        device: device.name.clone(),
                        source,
                    }
                })?;
                Ok(ConfigOutcome::VlanSet {
                    api_id: Some(outcome.api_id),
                    previous_pvid: outcome.previous_pvid,
                })
            }
            ConfigChange::CyclePoe { port } => {
                let mut agent = self
                    .logged_in(device, target.address)
                    .await?
                    .with_expected_ports(target.port_count);
                let api_id = agent.cycle_poe(*port).await.map_err(|source| {
                    CommandError::PartialMutation {
                        device: device.name.clone(),
                        source,
                    }
                })?;
                Ok(ConfigOutcome::PoeCycled {
                    api_id: Some(api_id),
                })
            }
            ConfigChange::RawBlock(_) => Err(CommandError::Unsupported("raw cli blocks")),
        }
    }
}

// ── Interactive CLI ─────────────────────────────────────────────────

pub struct InteractiveChannel {
    credentials: Arc<Credentials>,
    security: ConnectionSecurityOptions,
    settings: PollSettings,
    transcripts: Option<TranscriptLog>,
}

impl InteractiveChannel {
    pub fn new(credentials: Arc<Credentials>, settings: PollSettings) -> Self {
        Self {
            credentials,
            security: ConnectionSecurityOptions::default(),
            settings,
            transcripts: None,
        }
    }

    pub fn with_security(mut self, security: ConnectionSecurityOptions) -> Self {
        self.security = security;
        self
    }

    /// Keeps the latest session per device in `transcripts`; useful for
    /// capturing fixtures.
    pub fn with_transcripts(mut self, transcripts: TranscriptLog) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    async fn open(
        &self,
        address: &str,
        idle: Duration,
        recorder: Option<&SessionRecorder>,
    ) -> Result<SshShell, ConnectError> {
        let shell = SshShell::connect(
            address,
            self.settings.ssh_port,
            &self.credentials,
            &self.security,
            idle,
        )
        .await?;
        if let Some(recorder) = recorder {
            let _ = recorder.record_event(SessionEvent::Connected {
                device_addr: shell.device_addr().to_string(),
            });
        }
        Ok(shell)
    }

    fn keep_transcript(&self, shell: &SshShell, recorder: Option<SessionRecorder>) {
        let (Some(log), Some(recorder)) = (&self.transcripts, recorder) else {
            return;
        };
        if let Err(err) = log.store(shell.device_addr(), recorder) {
            debug!("{}: transcript dropped: {err}", shell.device_addr());
        }
    }

    async fn run_block(&self, address: &str, block: String) -> Result<String, ConnectError> {
        let idle = self.settings.config_idle_timeout();
        let recorder = self.transcripts.as_ref().map(TranscriptLog::session);
        let mut shell = self.open(address, idle, recorder.as_ref()).await?;
        let result = session::drive(
            &mut shell,
            Automaton::new(Script::ConfigBlock(block)),
            &self.credentials,
            idle,
            recorder.as_ref(),
        )
        .await;
        self.keep_transcript(&shell, recorder);
        Ok(result?.into_captures().get(BLOCK_SLOT).to_string())
    }
}

/// Builds a reading from the five captured CLI tables.
pub fn reading_from_captures(
    device: &Device,
    prior: &DeviceSnapshot,
    captures: &CaptureSet,
) -> DeviceReading {
    let prior_system = SystemInfo {
        system_name: Some(prior.system_name.clone()),
        system_model: Some(prior.system_model.clone()),
    };
    let system = parse::parse_sysinfo(captures.get(templates::SLOT_SYSINFO), &prior_system);

    let statuses = parse::parse_port_status(captures.get(templates::SLOT_STATUS_ALL));
    let known = match captures_model(captures) {
        Some(model) => parse::port_count_for_model(&model),
        None => prior.derived_port_count,
    };
    let count = parse::accept_port_signal(parse::max_port_id(&statuses), known);

    let poe = parse::parse_poe(captures.get(templates::SLOT_POE));
    let pvids = parse::parse_vlan_ports(captures.get(templates::SLOT_VLAN_PORT_ALL));
    let vlan_names = parse::parse_vlan_names(captures.get(templates::SLOT_VLAN));

    let mut ports = BTreeMap::new();
    for status in statuses {
        let id = status.logical_id;
        if !(1..=count).contains(&id) {
            continue;
        }
        ports.entry(id).or_insert_with(|| Port {
            logical_id: id,
            label: status.label.clone(),
            api_id: None,
            link_up: status.link_up,
            poe_enabled: poe.get(&id).copied().unwrap_or(false),
            vlan_id: pvids.get(&id).copied().or(status.pvid).or(Some(1)),
            description: String::new(),
            speed_label: status.speed_label.clone(),
        });
    }
    if ports.is_empty() {
        debug!("{}: no port rows in status capture", device.name);
    }

    DeviceReading {
        system,
        derived_port_count: count,
        ports,
        vlan_names,
    }
}

fn captures_model(captures: &CaptureSet) -> Option<String> {
    parse::parse_sysinfo(captures.get(templates::SLOT_SYSINFO), &SystemInfo::default()).system_model
}

impl DeviceChannel for InteractiveChannel {
    async fn probe(&self, _device: &Device, address: &str) -> bool {
        tcp_probe(address, self.settings.ssh_port, self.settings.probe_timeout()).await
    }

    async fn fetch_snapshot(&self, ctx: FetchContext<'_>) -> Result<DeviceReading, ConnectError> {
        let idle = self.settings.read_idle_timeout();
        let recorder = self.transcripts.as_ref().map(TranscriptLog::session);
        let mut shell = self.open(ctx.address, idle, recorder.as_ref()).await?;
        let result = session::run_script(
            &mut shell,
            templates::poll_script(),
            &self.credentials,
            idle,
            recorder.as_ref(),
        )
        .await;
        self.keep_transcript(&shell, recorder);
        Ok(reading_from_captures(ctx.device, ctx.prior, &result?))
    }

    async fn apply_config(
        &self,
        target: ConfigTarget<'_>,
        change: &ConfigChange,
    ) -> Result<ConfigOutcome, CommandError> {
        let device = target.device;
        match change {
            ConfigChange::SetVlan { port, vlan } => {
                let block = templates::set_vlan_block(&device.port_label(*port), *vlan);
                self.run_block(target.address, block).await?;
                Ok(ConfigOutcome::VlanSet {
                    api_id: None,
                    previous_pvid: None,
                })
            }
            ConfigChange::CyclePoe { port } => {
                let label = device.port_label(*port);
                self.run_block(target.address, templates::poe_disable_block(&label))
                    .await?;
                tokio::time::sleep(self.settings.poe_settle()).await;
                self.run_block(target.address, templates::poe_enable_block(&label))
                    .await?;
                Ok(ConfigOutcome::PoeCycled { api_id: None })
            }
            ConfigChange::RawBlock(block) => {
                let block = templates::normalize_raw_block(block)
                    .ok_or(CommandError::Unsupported("empty command blocks"))?;
                let output = self.run_block(target.address, block).await?;
                Ok(ConfigOutcome::BlockApplied { output })
            }
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Routes each device to the channel its fleet entry names.
///
/// Polling follows [`Device::channel`]. VLAN and PoE changes always go to
/// the REST agent; raw blocks always go to the CLI.
pub struct FleetChannels {
    pub api: ApiChannel,
    pub interactive: InteractiveChannel,
}

impl FleetChannels {
    pub fn new(credentials: Arc<Credentials>, settings: PollSettings) -> Self {
        Self {
            api: ApiChannel::new(Arc::clone(&credentials), settings.clone()),
            interactive: InteractiveChannel::new(credentials, settings),
        }
    }
}

impl DeviceChannel for FleetChannels {
    async fn probe(&self, device: &Device, address: &str) -> bool {
        match device.channel {
            ChannelKind::Api => self.api.probe(device, address).await,
            ChannelKind::Interactive => self.interactive.probe(device, address).await,
        }
    }

    async fn fetch_snapshot(&self, ctx: FetchContext<'_>) -> Result<DeviceReading, ConnectError> {
        match ctx.device.channel {
            ChannelKind::Api => self.api.fetch_snapshot(ctx).await,
            ChannelKind::Interactive => self.interactive.fetch_snapshot(ctx).await,
        }
    }

    async fn apply_config(
        &self,
        target: ConfigTarget<'_>,
        change: &ConfigChange,
    ) -> Result<ConfigOutcome, CommandError> {
        match change {
            ConfigChange::RawBlock(_) => self.interactive.apply_config(target, change).await,
            _ => {
                if target.device.channel == ChannelKind::Interactive {
                    warn!(
                        "{}: sending {change:?} through the management api",
                        target.device.name
                    );
                }
                self.api.apply_config(target, change).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{SLOT_POE, SLOT_STATUS_ALL, SLOT_SYSINFO, SLOT_VLAN, SLOT_VLAN_PORT_ALL};

    fn record(port_id: u32, name: &str, pvid: Option<u16>) -> PortStatRecord {
        PortStatRecord {
            port_id,
            interface_name: name.to_string(),
            description: String::new(),
            link_up: true,
            speed: "1000".to_string(),
            pvid,
            poe_enabled: false,
        }
    }

    #[test]
    fn stats_records_map_to_chassis_numbers() {
        let device = Device::new("sw", "10.0.0.1");
        let records = vec![
            record(1001, "1/0/1", Some(10)),
            record(1002, "1/0/2", None),
            record(2001, "lag 1", Some(1)),
            record(7, "", Some(20)),
            record(1099, "1/0/99", Some(1)),
        ];
        let ports = ports_from_stats(&device, &records, 48);

        assert_eq!(ports.keys().copied().collect::<Vec<_>>(), vec![1, 2, 7]);
        assert_eq!(ports[&1].api_id, Some(1001));
        assert_eq!(ports[&1].vlan_id, Some(10));
        assert_eq!(ports[&2].vlan_id, Some(1));
        assert_eq!(ports[&7].label, "1/0/7");
    }

    #[test]
    fn other_units_never_stand_in_for_a_missing_port() {
        let device = Device::new("sw", "10.0.0.1");
        // Port 1's own request failed; the margin brought in foreign rows.
        let mut foreign = record(49, "2/0/1", Some(99));
        foreign.link_up = true;
        let records = vec![
            record(2, "1/0/2", Some(10)),
            foreign,
            record(50, "0/3/1", Some(98)),
        ];

        let ports = ports_from_stats(&device, &records, 48);

        assert_eq!(ports.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!(!ports.contains_key(&1));
    }

    #[test]
    fn stats_records_honour_the_chassis_prefix() {
        let mut device = Device::new("sw", "10.0.0.1");
        device.chassis_prefix = "0/".to_string();
        let records = vec![record(1, "0/1", Some(1)), record(30, "1/0/2", Some(1))];

        let ports = ports_from_stats(&device, &records, 24);

        assert_eq!(ports.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(ports[&1].label, "0/1");
    }

    #[test]
    fn model_count_keeps_uplink_ports() {
        let device = Device::new("sw", "10.0.0.1");
        let records: Vec<_> = (1..=28)
            .map(|id| record(id, &format!("1/0/{id}"), Some(1)))
            .collect();

        let ports = ports_from_stats(&device, &records, derive_port_count("M4300-28G"));

        assert_eq!(ports.len(), 28);
        assert_eq!(ports[&26].label, "1/0/26");
        assert_eq!(ports[&26].api_id, Some(26));
    }

    #[tokio::test]
    async fn interactive_probe_checks_the_ssh_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let settings = PollSettings {
            ssh_port: listener.local_addr().expect("addr").port(),
            ..PollSettings::default()
        };
        let channel = InteractiveChannel::new(Arc::new(Credentials::new("admin", "pw")), settings)
            .with_security(ConnectionSecurityOptions::balanced())
            .with_transcripts(TranscriptLog::default());
        let device = Device::new("sw", "127.0.0.1").with_channel(ChannelKind::Interactive);

        assert!(channel.probe(&device, "127.0.0.1").await);
        drop(listener);
        assert!(!channel.probe(&device, "127.0.0.1").await);
    }

    fn captures(slots: &[(&str, &str)]) -> CaptureSet {
        let steps = slots
            .iter()
            .map(|(slot, _)| crate::automaton::CaptureStep::new(*slot, "cmd"))
            .collect();
        let mut fsm = Automaton::new(Script::Capture(steps));
        fsm.feed("(sw) #");
        fsm.feed("(sw) #");
        for (_, text) in slots {
            fsm.feed(text);
            fsm.feed("\r\n(sw) #");
        }
        fsm.into_captures()
    }

    #[test]
    fn cli_captures_merge_into_one_reading() {
        let device = Device::new("sw", "10.0.0.1").with_port_count_hint(48);
        let prior = DeviceSnapshot::pending(&device);
        let captures = captures(&[
            (SLOT_SYSINFO, "System Name.... edge-1\r\nMachine Model.... M4300-28G\r\n"),
            (
                SLOT_STATUS_ALL,
                "1/0/1  Enable  Auto  1000 Full  Up\r\n1/0/2  Enable  Auto  Down\r\n",
            ),
            (SLOT_POE, "1/0/1  Enable  On\r\n"),
            (SLOT_VLAN, "1   Default   Default\r\n10   Camera_Net   Static\r\n"),
            (SLOT_VLAN_PORT_ALL, "1/0/1  10  Admit All\r\n"),
        ]);

        let reading = reading_from_captures(&device, &prior, &captures);

        assert_eq!(reading.system.system_name.as_deref(), Some("edge-1"));
        assert_eq!(reading.derived_port_count, 28);
        assert!(reading.ports[&1].link_up && reading.ports[&1].poe_enabled);
        assert_eq!(reading.ports[&1].vlan_id, Some(10));
        assert_eq!(reading.ports[&2].vlan_id, Some(1));
        assert!(!reading.ports[&2].poe_enabled);
        assert_eq!(reading.vlan_names[&10], "Camera_Net");
    }
}
