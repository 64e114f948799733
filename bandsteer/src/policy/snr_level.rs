// SNR level policy

//! SNR level policy
//!
//! Moves a station off a set of "from" BSSes while its SNR sits on the
//! wrong side of a threshold, offering a set of "to" BSSes instead. Used
//! for the 2.4 GHz high-water mark: a station close enough to the AP is
//! pushed to a co-located 5/6 GHz BSS.
//!
//! The policy cycles through four states:
//!
//! - `Idle`: waiting for the conditions to hold
//! - `Enforce`: from-BSSes hard-blocked for [`SNR_LEVEL_ENFORCE_PERIOD`]
//! - `Settling`: enforcement over, checking where the station went
//! - `Backoff`: the station came back, wait before trying again. The wait
//!   doubles each round and resets once `Idle` lasts
//!   [`SNR_LEVEL_BACKOFF_AGEOUT`].

use super::{LinkEvent, Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::timer::{earliest, Timer};
use crate::types::MacAddr;
use std::fmt::Write;
use std::time::Duration;

/// How long from-BSSes stay blocked
pub const SNR_LEVEL_ENFORCE_PERIOD: Duration = Duration::from_secs(5);

/// Base backoff after a failed attempt
pub const SNR_LEVEL_BACKOFF_PERIOD: Duration = Duration::from_secs(60);

/// Idle time after which the backoff exponent is forgotten
pub const SNR_LEVEL_BACKOFF_AGEOUT: Duration = Duration::from_secs(30);

/// Backoff growth factor
const BACKOFF_EXP_BASE: u32 = 2;

/// Cap on the backoff exponent
const BACKOFF_MAX_POW: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnrLevelMode {
    BlockFromBssidsWhenAbove,
    BlockFromBssidsWhenBelow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnrLevelConfig {
    pub mode: SnrLevelMode,
    pub threshold_snr: u32,
    /// Only act while the link moves fewer bytes per sample than this
    pub threshold_bytes: Option<u64>,
    pub from_bssids: Vec<MacAddr>,
    pub to_bssids: Vec<MacAddr>,
}

/// Policy states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Idle,
    Enforce,
    Settling,
    Backoff,
}

#[derive(Debug, Clone, Copy)]
enum LevelCommand {
    Evaluate,
    EnforceExpired,
    BackoffExpired,
    ConfigRemoved,
}

#[derive(Debug, Clone, Copy)]
struct LinkSample {
    bssid: MacAddr,
    snr: Option<u32>,
    bytes: Option<u64>,
}

pub struct SnrLevelPolicy {
    kind: PolicyKind,
    sta: MacAddr,
    config: Option<SnrLevelConfig>,
    state: LevelState,
    links: Vec<LinkSample>,
    enforce: Timer,
    backoff: Timer,
    ageout: Timer,
    backoff_pow: u32,
}

impl SnrLevelPolicy {
    pub fn new(kind: PolicyKind, sta: MacAddr) -> Self {
        Self {
            kind,
            sta,
            config: None,
            state: LevelState::Idle,
            links: Vec::new(),
            enforce: Timer::new(),
            backoff: Timer::new(),
            ageout: Timer::new(),
            backoff_pow: 0,
        }
    }

    pub fn state(&self) -> LevelState {
        self.state
    }

    pub fn config(&self) -> Option<&SnrLevelConfig> {
        self.config.as_ref()
    }

    pub fn set_config(
        &mut self,
        config: Option<SnrLevelConfig>,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        if self.config == config {
            return;
        }
        log::debug!("Policy {}: config {:?} -> {:?}", self.kind, self.config, config);
        let removed = config.is_none();
        self.config = config;
        if removed {
            self.handle_command(LevelCommand::ConfigRemoved, now, m);
        } else {
            self.handle_command(LevelCommand::Evaluate, now, m);
        }
        m.schedule_stack_recalc();
    }

    fn should_enforce(&self) -> bool {
        let Some(config) = &self.config else {
            return false;
        };
        let [link] = self.links.as_slice() else {
            return false;
        };
        if !config.from_bssids.contains(&link.bssid) || config.to_bssids.is_empty() {
            return false;
        }
        let Some(snr) = link.snr else {
            return false;
        };
        let snr_ok = match config.mode {
            SnrLevelMode::BlockFromBssidsWhenAbove => snr > config.threshold_snr,
            SnrLevelMode::BlockFromBssidsWhenBelow => snr < config.threshold_snr,
        };
        let bytes_ok = match config.threshold_bytes {
            Some(limit) => link.bytes.unwrap_or(0) < limit,
            None => true,
        };
        snr_ok && bytes_ok
    }

    fn settle(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = &self.config else {
            self.state = LevelState::Idle;
            return;
        };
        if self.links.is_empty() {
            // Still roaming
            return;
        }

        if self.links.iter().any(|l| config.to_bssids.contains(&l.bssid)) {
            log::info!("Policy {}: sta {} moved to a preferred bss", self.kind, self.sta);
            self.state = LevelState::Idle;
            self.ageout.arm_at(now + SNR_LEVEL_BACKOFF_AGEOUT);
        } else {
            let factor = BACKOFF_EXP_BASE.pow(self.backoff_pow);
            let period = SNR_LEVEL_BACKOFF_PERIOD * factor;
            log::info!(
                "Policy {}: sta {} stayed, backing off for {}s",
                self.kind,
                self.sta,
                period.as_secs()
            );
            self.state = LevelState::Backoff;
            self.ageout.disarm();
            self.backoff.arm_at(now + period);
            self.backoff_pow = (self.backoff_pow + 1).min(BACKOFF_MAX_POW);
        }
        m.schedule_stack_recalc();
    }

    fn handle_command(&mut self, cmd: LevelCommand, now: Duration, m: &mut dyn PolicyMediator) {
        log::trace!("Policy {}: state {:?}, command {:?}", self.kind, self.state, cmd);

        match (self.state, cmd) {
            (LevelState::Idle, LevelCommand::Evaluate) => {
                if !self.should_enforce() {
                    return;
                }
                if !m.trigger_executor(self.kind) {
                    log::debug!("Policy {}: sta {} trigger suppressed", self.kind, self.sta);
                    return;
                }
                log::info!("Policy {}: sta {} enforcing", self.kind, self.sta);
                self.state = LevelState::Enforce;
                self.ageout.disarm();
                self.enforce.arm_at(now + SNR_LEVEL_ENFORCE_PERIOD);
                m.schedule_stack_recalc();
            }

            (LevelState::Enforce, LevelCommand::EnforceExpired) => {
                m.dismiss_executor(self.kind);
                self.state = LevelState::Settling;
                self.settle(now, m);
            }

            (LevelState::Settling, LevelCommand::Evaluate) => {
                self.settle(now, m);
            }

            (LevelState::Backoff, LevelCommand::BackoffExpired) => {
                log::debug!("Policy {}: sta {} backoff over", self.kind, self.sta);
                self.state = LevelState::Idle;
                self.ageout.arm_at(now + SNR_LEVEL_BACKOFF_AGEOUT);
                m.schedule_stack_recalc();
                self.handle_command(LevelCommand::Evaluate, now, m);
            }

            (state, LevelCommand::ConfigRemoved) => {
                if state == LevelState::Enforce {
                    m.dismiss_executor(self.kind);
                }
                self.state = LevelState::Idle;
                self.enforce.disarm();
                self.backoff.disarm();
                self.ageout.disarm();
                self.backoff_pow = 0;
            }

            _ => {}
        }
    }

    fn link_mut(&mut self, bssid: &MacAddr) -> Option<&mut LinkSample> {
        self.links.iter_mut().find(|l| l.bssid == *bssid)
    }
}

impl Policy for SnrLevelPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn recalc(&mut self, list: &mut CandidateList, now: Duration, m: &mut dyn PolicyMediator) {
        if self.state != LevelState::Enforce {
            return;
        }
        let Some(config) = &self.config else {
            return;
        };

        let reachable = list.iter().any(|c| {
            config.to_bssids.contains(c.bssid())
                && matches!(c.preference(), Preference::None | Preference::Available)
        });
        if !reachable {
            log::info!(
                "Policy {}: sta {} has no reachable preferred bss, stopping",
                self.kind,
                self.sta
            );
            self.enforce.disarm();
            m.dismiss_executor(self.kind);
            self.state = LevelState::Idle;
            self.ageout.arm_at(now + SNR_LEVEL_BACKOFF_AGEOUT);
            return;
        }

        for c in list.iter_mut() {
            if c.preference() != Preference::None {
                continue;
            }
            if config.from_bssids.contains(c.bssid()) {
                c.set_preference(Preference::HardBlocked);
            } else if config.to_bssids.contains(c.bssid()) {
                c.set_preference(Preference::Available);
            }
        }
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        if self.enforce.fire(now) {
            self.handle_command(LevelCommand::EnforceExpired, now, m);
        }
        if self.backoff.fire(now) {
            self.handle_command(LevelCommand::BackoffExpired, now, m);
        }
        if self.ageout.fire(now) {
            log::debug!("Policy {}: sta {} backoff exponent reset", self.kind, self.sta);
            self.backoff_pow = 0;
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        earliest(
            earliest(self.enforce.deadline(), self.backoff.deadline()),
            self.ageout.deadline(),
        )
    }

    fn on_sta_connected(&mut self, link: &LinkEvent, now: Duration, m: &mut dyn PolicyMediator) {
        self.links.retain(|l| l.bssid != link.bssid);
        self.links.push(LinkSample {
            bssid: link.bssid,
            snr: None,
            bytes: None,
        });
        self.handle_command(LevelCommand::Evaluate, now, m);
    }

    fn on_sta_disconnected(&mut self, link: &LinkEvent, now: Duration, m: &mut dyn PolicyMediator) {
        self.links.retain(|l| l.bssid != link.bssid);
        self.handle_command(LevelCommand::Evaluate, now, m);
    }

    fn on_snr(&mut self, bssid: &MacAddr, snr: u32, now: Duration, m: &mut dyn PolicyMediator) {
        let Some(link) = self.link_mut(bssid) else {
            return;
        };
        link.snr = Some(snr);
        self.handle_command(LevelCommand::Evaluate, now, m);
    }

    fn on_data_vol(
        &mut self,
        bssid: &MacAddr,
        delta_bytes: u64,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        let Some(link) = self.link_mut(bssid) else {
            return;
        };
        link.bytes = Some(delta_bytes);
        self.handle_command(LevelCommand::Evaluate, now, m);
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    {}: state: {:?} pow: {} links: {:?} config: {:?} deadline: {:?}",
            self.kind,
            self.state,
            self.backoff_pow,
            self.links,
            self.config,
            self.next_deadline().map(|at| at.saturating_sub(now))
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::*;

    fn config() -> SnrLevelConfig {
        SnrLevelConfig {
            mode: SnrLevelMode::BlockFromBssidsWhenAbove,
            threshold_snr: 30,
            threshold_bytes: Some(2000),
            from_bssids: vec![mac(1)],
            to_bssids: vec![mac(2)],
        }
    }

    fn link(id: u8) -> LinkEvent<'static> {
        LinkEvent {
            bssid: mac(id),
            vif_name: "home-ap-24",
            assoc: None,
        }
    }

    fn enforcing_policy(m: &mut RecordingMediator) -> SnrLevelPolicy {
        let mut p = SnrLevelPolicy::new(PolicyKind::Hwm2g, STA);
        p.set_config(Some(config()), Duration::ZERO, m);
        p.on_sta_connected(&link(1), Duration::ZERO, m);
        p.on_snr(&mac(1), 40, Duration::ZERO, m);
        p
    }

    #[test]
    fn test_enforce_when_above_threshold() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);
        assert_eq!(p.state(), LevelState::Enforce);
        assert_eq!(m.triggered, vec![PolicyKind::Hwm2g]);

        let mut list = candidates(&[1, 2, 3]);
        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::HardBlocked);
        assert_eq!(pref(&list, 2), Preference::Available);
        assert_eq!(pref(&list, 3), Preference::None);
    }

    #[test]
    fn test_busy_link_is_left_alone() {
        let mut m = RecordingMediator::default();
        let mut p = SnrLevelPolicy::new(PolicyKind::Hwm2g, STA);
        p.set_config(Some(config()), Duration::ZERO, &mut m);
        p.on_sta_connected(&link(1), Duration::ZERO, &mut m);
        p.on_data_vol(&mac(1), 5000, Duration::ZERO, &mut m);
        p.on_snr(&mac(1), 40, Duration::ZERO, &mut m);
        assert_eq!(p.state(), LevelState::Idle);

        // Below threshold is left alone too
        p.on_snr(&mac(1), 20, Duration::ZERO, &mut m);
        p.on_data_vol(&mac(1), 0, Duration::ZERO, &mut m);
        assert_eq!(p.state(), LevelState::Idle);
        assert!(m.triggered.is_empty());
    }

    #[test]
    fn test_successful_move_returns_to_idle() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);

        p.on_sta_disconnected(&link(1), Duration::from_secs(1), &mut m);
        p.on_sta_connected(&link(2), Duration::from_secs(2), &mut m);

        p.on_timer(Duration::from_secs(5), &mut m);
        assert_eq!(p.state(), LevelState::Idle);
        assert_eq!(m.dismissed, vec![PolicyKind::Hwm2g]);
    }

    #[test]
    fn test_staying_leads_to_exponential_backoff() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);

        // Enforce expires while still on the from bss
        p.on_timer(Duration::from_secs(5), &mut m);
        assert_eq!(p.state(), LevelState::Backoff);
        assert_eq!(p.next_deadline(), Some(Duration::from_secs(65)));

        // Backoff over: conditions still hold, enforce again
        p.on_timer(Duration::from_secs(65), &mut m);
        assert_eq!(p.state(), LevelState::Enforce);

        // Second failure doubles the backoff
        p.on_timer(Duration::from_secs(70), &mut m);
        assert_eq!(p.state(), LevelState::Backoff);
        assert_eq!(p.next_deadline(), Some(Duration::from_secs(70 + 120)));
    }

    #[test]
    fn test_settling_waits_while_roaming() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);
        p.on_sta_disconnected(&link(1), Duration::from_secs(1), &mut m);

        p.on_timer(Duration::from_secs(5), &mut m);
        assert_eq!(p.state(), LevelState::Settling);

        // Came back to the 2.4 GHz bss
        p.on_sta_connected(&link(1), Duration::from_secs(8), &mut m);
        assert_eq!(p.state(), LevelState::Backoff);
    }

    #[test]
    fn test_config_removal_resets() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);
        p.set_config(None, Duration::ZERO, &mut m);
        assert_eq!(p.state(), LevelState::Idle);
        assert_eq!(p.next_deadline(), None);
        assert_eq!(m.dismissed, vec![PolicyKind::Hwm2g]);
    }

    #[test]
    fn test_unreachable_target_stops_enforcement() {
        let mut m = RecordingMediator::default();
        let mut p = enforcing_policy(&mut m);

        let mut list = candidates(&[1, 2]);
        list.lookup_mut(&mac(2))
            .unwrap()
            .set_preference(Preference::OutOfScope);
        p.recalc(&mut list, Duration::ZERO, &mut m);

        assert_eq!(p.state(), LevelState::Idle);
        assert_eq!(pref(&list, 1), Preference::None);
        assert_eq!(m.dismissed, vec![PolicyKind::Hwm2g]);
    }
}
