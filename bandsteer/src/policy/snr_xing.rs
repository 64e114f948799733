// SNR crossing policy

//! SNR threshold crossing policy
//!
//! Watches the SNR samples of one link and reacts when they cross a
//! threshold:
//!
//! - `Hwm`: crossing upwards means the station is close enough to be
//!   moved to a better band.
//! - `Lwm`: crossing downwards means the station is sticking to a weak
//!   link. Crossing back up cancels a pending kick.
//! - `BottomLwm`: like `Lwm`, but only for stations that support neither
//!   802.11k beacon reports nor 802.11v BSS transition, which leaves a
//!   deauth as the only way out.
//!
//! `Hwm` and `Lwm` hold back while the link carries traffic above the
//! configured limit. Once enforced the link's BSS is hard-blocked for
//! [`SNR_XING_ENFORCE_PERIOD`].

use super::{LinkEvent, Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::timer::Timer;
use crate::types::MacAddr;
use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Duration;

/// How long a crossing stays enforced
pub const SNR_XING_ENFORCE_PERIOD: Duration = Duration::from_secs(5);

/// SNR samples kept
const SNR_HISTORY: usize = 3;

/// Data volume samples needed before traffic is judged
const DELTA_HISTORY: usize = 2;

/// Traffic gate for HWM/LWM modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRxLimit {
    pub active: bool,
    /// Link counts as idle below this many bytes per sample
    pub delta_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnrXingMode {
    Hwm(TxRxLimit),
    Lwm(TxRxLimit),
    BottomLwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnrXingConfig {
    pub bssid: MacAddr,
    pub threshold_snr: u32,
    pub mode: SnrXingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XingChange {
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxRxState {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy)]
struct LinkCaps {
    bssid: MacAddr,
    wnm_bss_trans: bool,
    rrm_bcn_act_meas: bool,
}

pub struct SnrXingPolicy {
    kind: PolicyKind,
    sta: MacAddr,
    config: Option<SnrXingConfig>,
    links: Vec<LinkCaps>,
    snr: VecDeque<u32>,
    delta_bytes: VecDeque<u64>,
    enforce: Timer,
    enforce_pending: bool,
}

impl SnrXingPolicy {
    pub fn new(kind: PolicyKind, sta: MacAddr) -> Self {
        Self {
            kind,
            sta,
            config: None,
            links: Vec::new(),
            snr: VecDeque::with_capacity(SNR_HISTORY),
            delta_bytes: VecDeque::with_capacity(DELTA_HISTORY),
            enforce: Timer::new(),
            enforce_pending: false,
        }
    }

    pub fn config(&self) -> Option<&SnrXingConfig> {
        self.config.as_ref()
    }

    pub fn is_enforcing(&self) -> bool {
        self.enforce.is_armed()
    }

    pub fn set_config(&mut self, config: Option<SnrXingConfig>, m: &mut dyn PolicyMediator) {
        if self.config == config {
            return;
        }
        log::debug!("Policy {}: config {:?} -> {:?}", self.kind, self.config, config);
        self.reset(m);
        self.config = config;
        m.schedule_stack_recalc();
    }

    fn reset(&mut self, m: &mut dyn PolicyMediator) {
        if self.enforce.is_armed() {
            self.enforce.disarm();
            m.dismiss_executor(self.kind);
        }
        self.enforce_pending = false;
        self.snr.clear();
        self.delta_bytes.clear();
    }

    fn watched_link(&self) -> Option<&LinkCaps> {
        let config = self.config.as_ref()?;
        self.links.iter().find(|l| l.bssid == config.bssid)
    }

    fn xing_change(&self, threshold: u32) -> XingChange {
        let n = self.snr.len();
        if n < 2 {
            return XingChange::None;
        }
        let (prev, cur) = (self.snr[n - 2], self.snr[n - 1]);
        if prev < threshold && cur >= threshold {
            XingChange::Up
        } else if prev >= threshold && cur < threshold {
            XingChange::Down
        } else {
            XingChange::None
        }
    }

    fn txrx_state(&self, mode: SnrXingMode) -> TxRxState {
        let limit = match mode {
            SnrXingMode::Hwm(limit) | SnrXingMode::Lwm(limit) => limit,
            SnrXingMode::BottomLwm => return TxRxState::Idle,
        };
        if !limit.active {
            return TxRxState::Idle;
        }
        if self.delta_bytes.len() < DELTA_HISTORY {
            return TxRxState::Active;
        }
        match self.delta_bytes.back() {
            Some(delta) if *delta < limit.delta_bytes => TxRxState::Idle,
            _ => TxRxState::Active,
        }
    }

    fn evaluate(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = self.config else {
            return;
        };
        let Some(link) = self.watched_link().copied() else {
            return;
        };
        if self.enforce.is_armed() {
            return;
        }

        if config.mode == SnrXingMode::BottomLwm && (link.rrm_bcn_act_meas || link.wnm_bss_trans)
        {
            log::trace!(
                "Policy {}: sta {} supports 11k/11v, bottom lwm does not apply",
                self.kind,
                self.sta
            );
            return;
        }

        match (config.mode, self.xing_change(config.threshold_snr)) {
            (SnrXingMode::Hwm(_), XingChange::Up) => self.enforce_pending = true,
            (SnrXingMode::Lwm(_) | SnrXingMode::BottomLwm, XingChange::Down) => {
                self.enforce_pending = true
            }
            (SnrXingMode::Lwm(_) | SnrXingMode::BottomLwm, XingChange::Up) => {
                self.enforce_pending = false
            }
            _ => {}
        }

        if !matches!(config.mode, SnrXingMode::BottomLwm)
            && self.txrx_state(config.mode) == TxRxState::Active
        {
            log::trace!("Policy {}: sta {} link active, holding back", self.kind, self.sta);
            return;
        }

        if !self.enforce_pending {
            return;
        }
        self.enforce_pending = false;

        if !m.trigger_executor(self.kind) {
            log::debug!("Policy {}: sta {} trigger suppressed", self.kind, self.sta);
            return;
        }
        log::info!(
            "Policy {}: sta {} crossed {} dB on {}, enforcing",
            self.kind,
            self.sta,
            config.threshold_snr,
            config.bssid
        );
        self.enforce.arm_at(now + SNR_XING_ENFORCE_PERIOD);
        m.schedule_stack_recalc();
    }
}

impl Policy for SnrXingPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = self.config else {
            return;
        };
        if !self.enforce.is_armed() || self.watched_link().is_none() {
            return;
        }

        let blocked = config.bssid;
        let blockable = list.lookup(&blocked).is_some_and(|c| {
            matches!(c.preference(), Preference::None | Preference::HardBlocked)
        });
        let alternatives = list.iter().any(|c| {
            *c.bssid() != blocked
                && matches!(c.preference(), Preference::None | Preference::Available)
        });
        if !blockable || !alternatives {
            log::info!(
                "Policy {}: sta {} cannot be moved off {}, dropping enforcement",
                self.kind,
                self.sta,
                blocked
            );
            self.enforce.disarm();
            m.dismiss_executor(self.kind);
            return;
        }

        for c in list.iter_mut() {
            if c.preference() != Preference::None {
                continue;
            }
            if *c.bssid() == blocked {
                c.set_preference(Preference::HardBlocked);
            } else {
                c.set_preference(Preference::Available);
            }
        }
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        if self.enforce.fire(now) {
            log::debug!("Policy {}: sta {} enforce period over", self.kind, self.sta);
            m.dismiss_executor(self.kind);
            m.schedule_stack_recalc();
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.enforce.deadline()
    }

    fn on_sta_connected(&mut self, link: &LinkEvent, now: Duration, m: &mut dyn PolicyMediator) {
        self.links.retain(|l| l.bssid != link.bssid);
        self.links.push(LinkCaps {
            bssid: link.bssid,
            wnm_bss_trans: link.assoc.is_some_and(|a| a.wnm_bss_trans),
            rrm_bcn_act_meas: link.assoc.is_some_and(|a| a.rrm_neighbor_bcn_act_meas()),
        });
        if self.config.is_some_and(|c| c.bssid == link.bssid) {
            self.evaluate(now, m);
        }
    }

    fn on_sta_disconnected(&mut self, link: &LinkEvent, _now: Duration, m: &mut dyn PolicyMediator) {
        self.links.retain(|l| l.bssid != link.bssid);
        if self.config.is_some_and(|c| c.bssid == link.bssid) {
            self.reset(m);
            m.schedule_stack_recalc();
        }
    }

    fn on_snr(&mut self, bssid: &MacAddr, snr: u32, now: Duration, m: &mut dyn PolicyMediator) {
        if !self.config.is_some_and(|c| c.bssid == *bssid) {
            return;
        }
        if self.snr.len() == SNR_HISTORY {
            self.snr.pop_front();
        }
        self.snr.push_back(snr);
        self.evaluate(now, m);
    }

    fn on_data_vol(
        &mut self,
        bssid: &MacAddr,
        delta_bytes: u64,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        if !self.config.is_some_and(|c| c.bssid == *bssid) {
            return;
        }
        if self.delta_bytes.len() == DELTA_HISTORY {
            self.delta_bytes.pop_front();
        }
        self.delta_bytes.push_back(delta_bytes);
        self.evaluate(now, m);
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    {}: config: {:?} snr: {:?} delta: {:?} pending: {} enforce: {:?}",
            self.kind,
            self.config,
            self.snr,
            self.delta_bytes,
            self.enforce_pending,
            self.enforce.remaining(now)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ieee80211::{AssocReqInfo, RrmCaps};
    use crate::policy::testing::*;

    const IDLE_LIMIT: TxRxLimit = TxRxLimit {
        active: true,
        delta_bytes: 250,
    };

    fn policy(mode: SnrXingMode, m: &mut RecordingMediator) -> SnrXingPolicy {
        let mut p = SnrXingPolicy::new(PolicyKind::Lwm2g, STA);
        p.set_config(
            Some(SnrXingConfig {
                bssid: mac(1),
                threshold_snr: 20,
                mode,
            }),
            m,
        );
        p
    }

    fn connect(p: &mut SnrXingPolicy, m: &mut RecordingMediator, assoc: Option<&AssocReqInfo>) {
        let link = LinkEvent {
            bssid: mac(1),
            vif_name: "home-ap-24",
            assoc,
        };
        p.on_sta_connected(&link, Duration::ZERO, m);
    }

    #[test]
    fn test_lwm_down_crossing_enforces_when_idle() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::Lwm(IDLE_LIMIT), &mut m);
        connect(&mut p, &mut m, None);

        // Idle traffic
        p.on_data_vol(&mac(1), 10, Duration::ZERO, &mut m);
        p.on_data_vol(&mac(1), 10, Duration::ZERO, &mut m);

        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());
        p.on_snr(&mac(1), 15, Duration::from_secs(1), &mut m);
        assert_eq!(m.triggered, vec![PolicyKind::Lwm2g]);
        assert!(p.is_enforcing());

        let mut list = candidates(&[1, 2]);
        p.recalc(&mut list, Duration::from_secs(1), &mut m);
        assert_eq!(pref(&list, 1), Preference::HardBlocked);
        assert_eq!(pref(&list, 2), Preference::Available);

        // Enforcement ends after the period
        p.on_timer(Duration::from_secs(6), &mut m);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::Lwm2g]);
    }

    #[test]
    fn test_lwm_waits_for_traffic_to_settle() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::Lwm(IDLE_LIMIT), &mut m);
        connect(&mut p, &mut m, None);

        // Not enough data volume samples: treated as active
        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 15, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());

        // Busy link
        p.on_data_vol(&mac(1), 5000, Duration::ZERO, &mut m);
        p.on_data_vol(&mac(1), 5000, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());

        // Goes idle: the pending crossing is enforced
        p.on_data_vol(&mac(1), 0, Duration::ZERO, &mut m);
        assert_eq!(m.triggered, vec![PolicyKind::Lwm2g]);
    }

    #[test]
    fn test_lwm_up_crossing_cancels_pending() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::Lwm(IDLE_LIMIT), &mut m);
        connect(&mut p, &mut m, None);

        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 15, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 22, Duration::ZERO, &mut m);

        p.on_data_vol(&mac(1), 0, Duration::ZERO, &mut m);
        p.on_data_vol(&mac(1), 0, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());
    }

    #[test]
    fn test_hwm_up_crossing() {
        let mut m = RecordingMediator::default();
        let inactive = TxRxLimit {
            active: false,
            delta_bytes: 0,
        };
        let mut p = policy(SnrXingMode::Hwm(inactive), &mut m);
        connect(&mut p, &mut m, None);

        p.on_snr(&mac(1), 15, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 30, Duration::ZERO, &mut m);
        assert_eq!(m.triggered, vec![PolicyKind::Lwm2g]);
    }

    #[test]
    fn test_bottom_lwm_skips_capable_stations() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::BottomLwm, &mut m);
        let assoc = AssocReqInfo {
            wnm_bss_trans: true,
            ..Default::default()
        };
        connect(&mut p, &mut m, Some(&assoc));

        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 5, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());

        // Legacy station on the same link gets kicked
        let legacy = AssocReqInfo {
            rrm_caps: Some(RrmCaps::default()),
            ..Default::default()
        };
        connect(&mut p, &mut m, Some(&legacy));
        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 5, Duration::ZERO, &mut m);
        assert_eq!(m.triggered, vec![PolicyKind::Lwm2g]);
    }

    #[test]
    fn test_samples_for_other_bss_are_ignored() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::BottomLwm, &mut m);
        connect(&mut p, &mut m, None);

        p.on_snr(&mac(2), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(2), 5, Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());
    }

    #[test]
    fn test_enforcement_dropped_without_alternatives() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::BottomLwm, &mut m);
        connect(&mut p, &mut m, None);
        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 5, Duration::ZERO, &mut m);
        assert!(p.is_enforcing());

        let mut list = candidates(&[1]);
        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::None);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::Lwm2g]);
    }

    #[test]
    fn test_disconnect_resets_enforcement() {
        let mut m = RecordingMediator::default();
        let mut p = policy(SnrXingMode::BottomLwm, &mut m);
        connect(&mut p, &mut m, None);
        p.on_snr(&mac(1), 25, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 5, Duration::ZERO, &mut m);

        let link = LinkEvent {
            bssid: mac(1),
            vif_name: "home-ap-24",
            assoc: None,
        };
        p.on_sta_disconnected(&link, Duration::ZERO, &mut m);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::Lwm2g]);
    }
}
