// Per-client band steering statistics

//! Statistics
//!
//! Each client keeps counters and a bounded event log per local interface
//! it was seen on. Events past the bound are dropped and the last slot is
//! turned into an `OVERRUN` marker. Counters keep counting regardless.
//!
//! Reports are built per group on a fixed interval and the stats are
//! cleared once handed to the sink.

use crate::ieee80211::{AssocReqInfo, BandCaps, RrmCaps};
use crate::types::{Band, Channel, MacAddr};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Event log bound per client per interface
pub const MAX_EVENT_CNT: usize = 60;

/// Above this many bits per second a station counts as active
pub const BITRATE_THRESHOLD: u64 = 2000;

/// Interval traffic counters are sampled over
pub const BITRATE_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Bitrate-derived activity over one sampling interval
pub fn is_active(rx_bytes: u64, tx_bytes: u64) -> bool {
    let bits = rx_bytes.saturating_add(tx_bytes).saturating_mul(8);
    bits / BITRATE_STATS_INTERVAL.as_secs() > BITRATE_THRESHOLD
}

/// Capability snapshot taken from an association request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub btm: bool,
    pub rrm: bool,
    pub band_caps: BandCaps,
    pub max_chwidth_mhz: u32,
    pub max_streams: u8,
    pub phy_mode: &'static str,
    pub max_txpower_dbm: Option<i8>,
    pub static_smps: bool,
    pub mu_mimo: bool,
    pub rrm_caps: RrmCaps,
}

impl Capabilities {
    pub fn from_assoc(info: &AssocReqInfo) -> Self {
        Self {
            btm: info.wnm_bss_trans,
            rrm: info.rrm_caps.is_some(),
            band_caps: info.band_caps(),
            max_chwidth_mhz: info.max_chwidth_mhz,
            max_streams: info.max_streams,
            phy_mode: info.phy_mode(),
            max_txpower_dbm: info.max_txpower_dbm,
            static_smps: info.is_static_smps,
            mu_mimo: info.is_mu_mimo_supported,
            rrm_caps: info.rrm_caps.unwrap_or_default(),
        }
    }
}

/// Which policy a BTM kick came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickSource {
    Force,
    Steering,
    Sticky,
}

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsEvent {
    Probe { snr: u32, bcast: bool, blocked: bool },
    Connect,
    Disconnect,
    ClientCapabilities(Box<Capabilities>),
    Backoff { enabled: bool, period_secs: u32 },
    BandSteeringAttempt,
    Activity { active: bool },
    ClientBtm,
    ClientBtmRetry,
    ClientBsBtm,
    ClientBsBtmRetry,
    ClientStickyBtm,
    ClientStickyBtmRetry,
    ClientSteeringStarted,
    ClientSteeringExpired,
    ClientSteeringFailed,
    Overrun,
}

impl StatsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StatsEvent::Probe { .. } => "PROBE",
            StatsEvent::Connect => "CONNECT",
            StatsEvent::Disconnect => "DISCONNECT",
            StatsEvent::ClientCapabilities(_) => "CLIENT_CAPABILITIES",
            StatsEvent::Backoff { .. } => "BACKOFF",
            StatsEvent::BandSteeringAttempt => "BAND_STEERING_ATTEMPT",
            StatsEvent::Activity { .. } => "ACTIVITY",
            StatsEvent::ClientBtm => "CLIENT_BTM",
            StatsEvent::ClientBtmRetry => "CLIENT_BTM_RETRY",
            StatsEvent::ClientBsBtm => "CLIENT_BS_BTM",
            StatsEvent::ClientBsBtmRetry => "CLIENT_BS_BTM_RETRY",
            StatsEvent::ClientStickyBtm => "CLIENT_STICKY_BTM",
            StatsEvent::ClientStickyBtmRetry => "CLIENT_STICKY_BTM_RETRY",
            StatsEvent::ClientSteeringStarted => "CLIENT_STEERING_STARTED",
            StatsEvent::ClientSteeringExpired => "CLIENT_STEERING_EXPIRED",
            StatsEvent::ClientSteeringFailed => "CLIENT_STEERING_FAILED",
            StatsEvent::Overrun => "OVERRUN",
        }
    }
}

impl fmt::Display for StatsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub timestamp_ms: u64,
    pub event: StatsEvent,
}

/// Counters and events of one client on one interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VifStats {
    pub connected: bool,
    pub rejects: u32,
    pub connects: u32,
    pub disconnects: u32,
    pub activity_changes: u32,
    pub steering_success_cnt: u32,
    pub steering_fail_cnt: u32,
    pub steering_kick_cnt: u32,
    pub sticky_kick_cnt: u32,
    pub probe_bcast_cnt: u32,
    pub probe_bcast_blocked: u32,
    pub probe_direct_cnt: u32,
    pub probe_direct_blocked: u32,
    pub events: Vec<EventRecord>,
}

impl VifStats {
    /// Append an event unless the log is full. The last free slot takes
    /// the overrun marker instead.
    fn push_event(&mut self, event: StatsEvent, now: Duration) -> bool {
        let timestamp_ms = now.as_millis() as u64;
        if self.events.len() >= MAX_EVENT_CNT {
            log::debug!("Stats: event limit reached, dropping {}", event);
            return false;
        }
        if self.events.len() + 1 == MAX_EVENT_CNT {
            log::warn!("Stats: event limit reached, adding OVERRUN");
            self.events.push(EventRecord {
                timestamp_ms,
                event: StatsEvent::Overrun,
            });
            return false;
        }
        self.events.push(EventRecord { timestamp_ms, event });
        true
    }
}

/// All interface stats of one client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    vifs: BTreeMap<String, VifStats>,
}

impl ClientStats {
    pub fn get(&self, vif_name: &str) -> Option<&VifStats> {
        self.vifs.get(vif_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VifStats)> {
        self.vifs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vifs.is_empty()
    }

    pub fn clear(&mut self) {
        self.vifs.clear();
    }

    fn vif(&mut self, vif_name: &str) -> &mut VifStats {
        self.vifs.entry(vif_name.to_string()).or_default()
    }

    pub fn record_probe(&mut self, vif_name: &str, bcast: bool, blocked: bool, snr: u32, now: Duration) {
        let s = self.vif(vif_name);
        if blocked {
            s.rejects += 1;
        }
        match (bcast, blocked) {
            (true, false) => s.probe_bcast_cnt += 1,
            (true, true) => {
                s.probe_bcast_cnt += 1;
                s.probe_bcast_blocked += 1;
            }
            (false, false) => s.probe_direct_cnt += 1,
            (false, true) => {
                s.probe_direct_cnt += 1;
                s.probe_direct_blocked += 1;
            }
        }
        s.push_event(StatsEvent::Probe { snr, bcast, blocked }, now);
    }

    pub fn record_connect(&mut self, vif_name: &str, now: Duration) {
        let s = self.vif(vif_name);
        s.connects += 1;
        s.connected = true;
        s.push_event(StatsEvent::Connect, now);
    }

    pub fn record_disconnect(&mut self, vif_name: &str, now: Duration) {
        let s = self.vif(vif_name);
        s.disconnects += 1;
        s.connected = false;
        s.push_event(StatsEvent::Disconnect, now);
    }

    pub fn record_btm(&mut self, vif_name: &str, source: KickSource, retry: bool, now: Duration) {
        let s = self.vif(vif_name);
        let event = match (source, retry) {
            (KickSource::Force, false) => StatsEvent::ClientBtm,
            (KickSource::Force, true) => StatsEvent::ClientBtmRetry,
            (KickSource::Steering, false) => StatsEvent::ClientBsBtm,
            (KickSource::Steering, true) => StatsEvent::ClientBsBtmRetry,
            (KickSource::Sticky, false) => StatsEvent::ClientStickyBtm,
            (KickSource::Sticky, true) => StatsEvent::ClientStickyBtmRetry,
        };
        match source {
            KickSource::Steering => s.steering_kick_cnt += 1,
            KickSource::Sticky => s.sticky_kick_cnt += 1,
            KickSource::Force => {}
        }
        s.push_event(event, now);
    }

    pub fn record_capabilities(&mut self, vif_name: &str, caps: Capabilities, now: Duration) {
        self.vif(vif_name)
            .push_event(StatsEvent::ClientCapabilities(Box::new(caps)), now);
    }

    pub fn record_backoff(&mut self, vif_name: &str, enabled: bool, period_secs: u32, now: Duration) {
        self.vif(vif_name)
            .push_event(StatsEvent::Backoff { enabled, period_secs }, now);
    }

    pub fn record_steering_attempt(&mut self, vif_name: &str, now: Duration) {
        self.vif(vif_name)
            .push_event(StatsEvent::BandSteeringAttempt, now);
    }

    pub fn record_activity(&mut self, vif_name: &str, active: bool, now: Duration) {
        let s = self.vif(vif_name);
        s.activity_changes += 1;
        s.push_event(StatsEvent::Activity { active }, now);
    }

    pub fn record_client_steering(&mut self, vif_name: &str, event: StatsEvent, now: Duration) {
        let s = self.vif(vif_name);
        match event {
            StatsEvent::ClientSteeringExpired => s.steering_success_cnt += 1,
            StatsEvent::ClientSteeringFailed => s.steering_fail_cnt += 1,
            _ => {}
        }
        s.push_event(event, now);
    }
}

/// Radio a report band record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioType {
    Band2G,
    Band5G,
    Band5GL,
    Band5GU,
    Band6G,
}

impl RadioType {
    pub fn from_channel(channel: &Channel) -> Option<RadioType> {
        let freq = channel.control_freq_mhz;
        match channel.band()? {
            Band::Band2G => Some(RadioType::Band2G),
            Band::Band5G => match freq {
                5180..=5480 => Some(RadioType::Band5GL),
                5500..=5885 => Some(RadioType::Band5GU),
                _ => Some(RadioType::Band5G),
            },
            Band::Band6G => Some(RadioType::Band6G),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RadioType::Band2G => "2G",
            RadioType::Band5G => "5G",
            RadioType::Band5GL => "5GL",
            RadioType::Band5GU => "5GU",
            RadioType::Band6G => "6G",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandReport {
    pub vif_name: String,
    pub radio_type: RadioType,
    pub stats: VifStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub addr: MacAddr,
    pub bands: Vec<BandReport>,
}

/// One report batch, built per group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group_id: String,
    pub timestamp_ms: u64,
    pub clients: Vec<ClientReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_counters() {
        let mut stats = ClientStats::default();
        stats.record_probe("home-ap-24", true, false, 30, Duration::ZERO);
        stats.record_probe("home-ap-24", false, false, 30, Duration::ZERO);
        stats.record_probe("home-ap-24", false, true, 30, Duration::ZERO);

        let s = stats.get("home-ap-24").cloned().unwrap_or_default();
        assert_eq!(s.probe_bcast_cnt, 1);
        assert_eq!(s.probe_direct_cnt, 2);
        assert_eq!(s.probe_direct_blocked, 1);
        assert_eq!(s.rejects, 1);
        assert_eq!(s.events.len(), 3);
        assert!(s.events.iter().all(|e| e.event.name() == "PROBE"));
    }

    #[test]
    fn test_event_cap_ends_with_overrun() {
        let mut stats = ClientStats::default();
        for _ in 0..(MAX_EVENT_CNT + 10) {
            stats.record_probe("home-ap-50", true, false, 40, Duration::from_secs(1));
        }

        let s = stats.get("home-ap-50").cloned().unwrap_or_default();
        assert_eq!(s.events.len(), MAX_EVENT_CNT);
        assert_eq!(s.events[MAX_EVENT_CNT - 2].event.name(), "PROBE");
        assert_eq!(s.events[MAX_EVENT_CNT - 1].event, StatsEvent::Overrun);
        // Counters are not capped
        assert_eq!(s.probe_bcast_cnt as usize, MAX_EVENT_CNT + 10);
    }

    #[test]
    fn test_btm_events_and_kick_counters() {
        let mut stats = ClientStats::default();
        stats.record_btm("home-ap-24", KickSource::Steering, false, Duration::ZERO);
        stats.record_btm("home-ap-24", KickSource::Steering, true, Duration::ZERO);
        stats.record_btm("home-ap-24", KickSource::Sticky, false, Duration::ZERO);
        stats.record_btm("home-ap-24", KickSource::Force, true, Duration::ZERO);

        let s = stats.get("home-ap-24").cloned().unwrap_or_default();
        let names: Vec<&str> = s.events.iter().map(|e| e.event.name()).collect();
        assert_eq!(
            names,
            vec![
                "CLIENT_BS_BTM",
                "CLIENT_BS_BTM_RETRY",
                "CLIENT_STICKY_BTM",
                "CLIENT_BTM_RETRY"
            ]
        );
        assert_eq!(s.steering_kick_cnt, 2);
        assert_eq!(s.sticky_kick_cnt, 1);
    }

    #[test]
    fn test_activity_threshold() {
        // 2000 bit/s over 10 s is 2500 bytes; the threshold is exclusive
        assert!(!is_active(2500, 0));
        assert!(is_active(1300, 1300));
        assert!(!is_active(0, 0));
    }

    #[test]
    fn test_radio_type_from_channel() {
        assert_eq!(RadioType::from_channel(&Channel::new_20mhz(2437)), Some(RadioType::Band2G));
        assert_eq!(RadioType::from_channel(&Channel::new_20mhz(5180)), Some(RadioType::Band5GL));
        assert_eq!(RadioType::from_channel(&Channel::new_20mhz(5745)), Some(RadioType::Band5GU));
        assert_eq!(RadioType::from_channel(&Channel::new_20mhz(5955)), Some(RadioType::Band6G));
    }
}
