// Pre-association policy

//! Pre-association band steering policy
//!
//! Keeps a disconnected station from joining one BSS (usually the 2.4 GHz
//! one) so it picks a better band instead. Probe requests to the blocked
//! BSS are counted or timed; once the station has been rejected long
//! enough the policy backs off and lets it in. Backoff grows exponentially
//! with the number of times the station ended up connecting during
//! backoff anyway.

use super::{LinkEvent, Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::timer::{earliest, Timer};
use crate::types::{MacAddr, ProbeReq};
use std::fmt::Write;
use std::time::Duration;

/// Window in which a station that got through on auth must connect
pub const AUTH_BYPASS_PERIOD: Duration = Duration::from_secs(5);

/// Cap on the backoff exponent
const BACKOFF_MAX_EXP: u32 = 10;

/// When to give up rejecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCondition {
    /// Back off after `reject_limit` probes; the count resets after
    /// `reject_timeout` without probes
    Counter {
        reject_limit: u32,
        reject_timeout: Duration,
    },
    /// Back off `reject_timeout` after the first probe
    Timer { reject_timeout: Duration },
}

/// Extra reason to back off early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffCondition {
    None,
    /// A probe this weak means the station has nowhere better to go
    ThresholdSnr(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreAssocConfig {
    pub bssid: MacAddr,
    pub backoff_timeout_secs: u32,
    pub backoff_exp_base: u32,
    pub reject_condition: RejectCondition,
    pub backoff_condition: BackoffCondition,
    pub immediate_backoff_on_auth_req: bool,
}

impl PreAssocConfig {
    fn backoff_period(&self, connect_cnt: u32) -> Duration {
        let exp = connect_cnt.min(BACKOFF_MAX_EXP);
        let factor = u64::from(self.backoff_exp_base).saturating_pow(exp);
        Duration::from_secs(u64::from(self.backoff_timeout_secs).saturating_mul(factor))
    }
}

pub struct PreAssocPolicy {
    kind: PolicyKind,
    sta: MacAddr,
    config: Option<PreAssocConfig>,
    // Survives resets
    backoff_connect_cnt: u32,
    active_link_cnt: u32,
    auth_bypass_fail_cnt: u32,
    // Cleared on reset
    reject_cnt: u32,
    reject: Timer,
    backoff: Timer,
    auth_bypass: Timer,
}

impl PreAssocPolicy {
    pub fn new(kind: PolicyKind, sta: MacAddr) -> Self {
        Self {
            kind,
            sta,
            config: None,
            backoff_connect_cnt: 0,
            active_link_cnt: 0,
            auth_bypass_fail_cnt: 0,
            reject_cnt: 0,
            reject: Timer::new(),
            backoff: Timer::new(),
            auth_bypass: Timer::new(),
        }
    }

    pub fn config(&self) -> Option<&PreAssocConfig> {
        self.config.as_ref()
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff.is_armed()
    }

    pub fn is_rejecting(&self) -> bool {
        self.reject.is_armed()
    }

    pub fn auth_bypass_fail_cnt(&self) -> u32 {
        self.auth_bypass_fail_cnt
    }

    pub fn set_config(&mut self, config: Option<PreAssocConfig>, m: &mut dyn PolicyMediator) {
        if self.config == config {
            return;
        }
        log::debug!("Policy {}: config {:?} -> {:?}", self.kind, self.config, config);
        self.reset_volatile(m);
        self.config = config;
        m.schedule_stack_recalc();
    }

    fn reset_volatile(&mut self, m: &mut dyn PolicyMediator) {
        if self.backoff.is_armed() {
            m.notify_backoff(self.kind, false, 0);
        }
        if self.reject.is_armed() {
            m.dismiss_executor(self.kind);
        }
        self.reject_cnt = 0;
        self.reject.disarm();
        self.backoff.disarm();
        self.auth_bypass.disarm();
    }

    fn start_backoff(&mut self, config: &PreAssocConfig, now: Duration, m: &mut dyn PolicyMediator) {
        let period = config.backoff_period(self.backoff_connect_cnt);
        log::info!(
            "Policy {}: sta {} backing off for {}s",
            self.kind,
            self.sta,
            period.as_secs()
        );
        self.backoff.arm_at(now + period);
        let secs = u32::try_from(period.as_secs()).unwrap_or(u32::MAX);
        m.notify_backoff(self.kind, true, secs);
        m.schedule_stack_recalc();
    }

    fn reject_probe(
        &mut self,
        config: &PreAssocConfig,
        vif_name: &str,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        match config.reject_condition {
            RejectCondition::Counter {
                reject_limit,
                reject_timeout,
            } => {
                self.reject_cnt += 1;
                if self.reject_cnt >= reject_limit {
                    log::debug!(
                        "Policy {}: sta {} reached {} rejects",
                        self.kind,
                        self.sta,
                        self.reject_cnt
                    );
                    self.reject.disarm();
                    m.dismiss_executor(self.kind);
                    self.start_backoff(config, now, m);
                    return;
                }
                self.reject.arm_at(now + reject_timeout);
            }
            RejectCondition::Timer { reject_timeout } => {
                if !self.reject.is_armed() {
                    self.reject.arm_at(now + reject_timeout);
                }
            }
        }
        m.notify_steering_attempt(self.kind, vif_name);
        m.trigger_executor(self.kind);
    }
}

impl Policy for PreAssocPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = self.config else {
            return;
        };
        let Some(candidate) = list.lookup_mut(&config.bssid) else {
            log::debug!(
                "Policy {}: sta {} bss {} is not a candidate",
                self.kind,
                self.sta,
                config.bssid
            );
            return;
        };
        if candidate.preference() != Preference::None {
            self.reset_volatile(m);
            return;
        }

        if self.backoff.is_armed() {
            candidate.set_preference(Preference::Available);
        } else {
            candidate.set_preference(Preference::SoftBlocked);
        }
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = self.config else {
            return;
        };
        if self.reject.fire(now) {
            log::debug!("Policy {}: sta {} reject period over", self.kind, self.sta);
            self.start_backoff(&config, now, m);
            m.dismiss_executor(self.kind);
        }
        if self.backoff.fire(now) {
            log::info!("Policy {}: sta {} backoff over", self.kind, self.sta);
            m.notify_backoff(self.kind, false, 0);
            self.reset_volatile(m);
            m.schedule_stack_recalc();
        }
        if self.auth_bypass.fire(now) {
            self.auth_bypass_fail_cnt += 1;
            log::warn!(
                "Policy {}: sta {} did not connect after auth bypass ({} times)",
                self.kind,
                self.sta,
                self.auth_bypass_fail_cnt
            );
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        earliest(
            earliest(self.reject.deadline(), self.backoff.deadline()),
            self.auth_bypass.deadline(),
        )
    }

    fn on_sta_connected(&mut self, link: &LinkEvent, _now: Duration, m: &mut dyn PolicyMediator) {
        self.active_link_cnt += 1;
        let Some(config) = self.config else {
            return;
        };
        if link.bssid == config.bssid && self.backoff.is_armed() {
            self.backoff_connect_cnt += 1;
            log::info!(
                "Policy {}: sta {} connected during backoff ({} times)",
                self.kind,
                self.sta,
                self.backoff_connect_cnt
            );
        }
        self.reset_volatile(m);
        m.schedule_stack_recalc();
    }

    fn on_sta_disconnected(&mut self, _link: &LinkEvent, _now: Duration, m: &mut dyn PolicyMediator) {
        self.active_link_cnt = self.active_link_cnt.saturating_sub(1);
        if self.config.is_some() && self.active_link_cnt == 0 {
            m.schedule_stack_recalc();
        }
    }

    fn on_probe_req(
        &mut self,
        bssid: &MacAddr,
        vif_name: &str,
        probe: &ProbeReq,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        let Some(config) = self.config else {
            return;
        };
        if probe.sta_addr != self.sta || *bssid != config.bssid {
            return;
        }
        if self.active_link_cnt > 0 || self.backoff.is_armed() {
            return;
        }

        self.reject_probe(&config, vif_name, now, m);

        if let BackoffCondition::ThresholdSnr(threshold) = config.backoff_condition {
            if self.reject.is_armed() && probe.snr < threshold {
                log::debug!(
                    "Policy {}: sta {} probe snr {} below {}, backing off",
                    self.kind,
                    self.sta,
                    probe.snr,
                    threshold
                );
                self.reject.disarm();
                m.dismiss_executor(self.kind);
                self.start_backoff(&config, now, m);
            }
        }
    }

    fn on_auth_req(&mut self, bssid: &MacAddr, now: Duration, m: &mut dyn PolicyMediator) {
        let Some(config) = self.config else {
            return;
        };
        if !config.immediate_backoff_on_auth_req || *bssid != config.bssid {
            return;
        }
        if self.active_link_cnt > 0 || self.backoff.is_armed() {
            return;
        }

        if self.reject.is_armed() {
            self.reject.disarm();
        } else {
            m.trigger_executor(self.kind);
        }
        m.dismiss_executor(self.kind);
        self.start_backoff(&config, now, m);
        self.auth_bypass.arm_at(now + AUTH_BYPASS_PERIOD);
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    {}: config: {:?} links: {} rejects: {} backoff_connects: {} \
             auth_bypass_fails: {} reject: {:?} backoff: {:?}",
            self.kind,
            self.config,
            self.active_link_cnt,
            self.reject_cnt,
            self.backoff_connect_cnt,
            self.auth_bypass_fail_cnt,
            self.reject.remaining(now),
            self.backoff.remaining(now)
        );
    }
}
