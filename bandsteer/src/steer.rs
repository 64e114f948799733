// Per-station steering instance

//! Station steering
//!
//! A [`SteerSta`] ties together what one station needs to be steered:
//! its candidate list, its policy stack and its executor. It also owns the
//! active-policy arbitration: at most one policy drives the executor at a
//! time, and only a policy earlier in the stack can take over from the
//! active one.
//!
//! Work happens in two phases so the caller can react to policy notices
//! in between:
//! 1. [`SteerSta::recalc`] fires policy timers, re-runs the stack and the
//!    assessor if needed.
//! 2. [`SteerSta::execute`] fires action timers and calls the executor if
//!    the candidate list changed or an action asked to be called again.

use crate::assessor::CandidateAssessor;
use crate::candidate::{CandidateList, Preference};
use crate::executor::{ActionContext, ActionKind, ActionMediator, Driver, Executor, VifDirectory};
use crate::ieee80211::AssocReqInfo;
use crate::policy::{LinkEvent, PolicyKind, PolicyMediator, PolicyStack};
use crate::timer::earliest;
use crate::types::{BtmResponse, Link, MacAddr, ProbeReq};
use std::fmt::Write;
use std::time::Duration;

/// Upper bound on stack re-runs within one recalc
const STACK_RECALC_MAX_ROUNDS: usize = 4;

/// Something the owner of a station should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaNotice {
    Triggered(PolicyKind),
    Dismissed(PolicyKind),
    Backoff {
        policy: PolicyKind,
        enabled: bool,
        period_secs: u32,
    },
    SteeringAttempt {
        policy: PolicyKind,
        vif_name: String,
    },
    ActionBusy(ActionKind),
    ActionDataSent(ActionKind),
    ActionIdle(ActionKind),
}

/// Radio state the executor needs, supplied by the owner on each call
pub struct ExecEnv<'a> {
    pub vifs: &'a dyn VifDirectory,
    pub btm_supported: bool,
    pub disassoc_imminent: bool,
    pub deauth_delay: Duration,
    pub btm_rate_limit: Duration,
    pub btm_max_neighbors: usize,
}

/// Borrow of the station state policies and actions may touch
struct StaMediator<'a> {
    addr: MacAddr,
    active: &'a mut Option<PolicyKind>,
    stack_recalc: &'a mut bool,
    executor_call: &'a mut bool,
    notices: &'a mut Vec<StaNotice>,
}

impl PolicyMediator for StaMediator<'_> {
    fn schedule_stack_recalc(&mut self) {
        *self.stack_recalc = true;
    }

    fn trigger_executor(&mut self, policy: PolicyKind) -> bool {
        if !policy.drives_executor() {
            log::debug!(
                "Sta {}: {} unexpectedly triggered executor, ignoring",
                self.addr,
                policy
            );
            return false;
        }
        if let Some(active) = *self.active {
            if active == policy {
                return true;
            }
            if !policy.outranks(active) {
                log::info!(
                    "Sta {}: executor trigger by {} suppressed, {} is active",
                    self.addr,
                    policy,
                    active
                );
                return false;
            }
            log::info!("Sta {}: {} takes executor over from {}", self.addr, policy, active);
        }

        log::info!("Sta {}: executor triggered by {}", self.addr, policy);
        *self.active = Some(policy);
        *self.executor_call = true;
        self.notices.push(StaNotice::Triggered(policy));
        true
    }

    fn dismiss_executor(&mut self, policy: PolicyKind) {
        if *self.active != Some(policy) {
            log::debug!("Sta {}: ignoring dismiss from inactive {}", self.addr, policy);
            return;
        }
        log::info!("Sta {}: executor dismissed by {}", self.addr, policy);
        *self.active = None;
        *self.executor_call = true;
        self.notices.push(StaNotice::Dismissed(policy));
    }

    fn notify_backoff(&mut self, policy: PolicyKind, enabled: bool, period_secs: u32) {
        self.notices.push(StaNotice::Backoff {
            policy,
            enabled,
            period_secs,
        });
    }

    fn notify_steering_attempt(&mut self, policy: PolicyKind, vif_name: &str) {
        self.notices.push(StaNotice::SteeringAttempt {
            policy,
            vif_name: vif_name.to_string(),
        });
    }
}

impl ActionMediator for StaMediator<'_> {
    fn sched_recall(&mut self, _action: ActionKind) {
        *self.executor_call = true;
    }

    fn notify_going_busy(&mut self, action: ActionKind) {
        self.notices.push(StaNotice::ActionBusy(action));
    }

    fn notify_data_sent(&mut self, action: ActionKind) {
        self.notices.push(StaNotice::ActionDataSent(action));
    }

    fn notify_going_idle(&mut self, action: ActionKind) {
        self.notices.push(StaNotice::ActionIdle(action));
    }
}

pub struct SteerSta {
    addr: MacAddr,
    candidates: CandidateList,
    prev_candidates: Vec<(MacAddr, Preference, u32)>,
    policies: PolicyStack,
    executor: Executor,
    links: Vec<Link>,
    active_policy: Option<PolicyKind>,
    stack_recalc_pending: bool,
    executor_call_pending: bool,
    notices: Vec<StaNotice>,
}

/// Split borrow of a station into its stack, its list and a mediator
macro_rules! mediator {
    ($self:ident) => {
        StaMediator {
            addr: $self.addr,
            active: &mut $self.active_policy,
            stack_recalc: &mut $self.stack_recalc_pending,
            executor_call: &mut $self.executor_call_pending,
            notices: &mut $self.notices,
        }
    };
}

impl SteerSta {
    pub fn new(addr: MacAddr) -> Self {
        Self {
            addr,
            candidates: CandidateList::new(),
            prev_candidates: Vec::new(),
            policies: PolicyStack::new(addr),
            executor: Executor::new(addr),
            links: Vec::new(),
            active_policy: None,
            stack_recalc_pending: true,
            executor_call_pending: false,
            notices: Vec::new(),
        }
    }

    pub fn addr(&self) -> &MacAddr {
        &self.addr
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn active_policy(&self) -> Option<PolicyKind> {
        self.active_policy
    }

    pub fn policies(&self) -> &PolicyStack {
        &self.policies
    }

    /// True while a recalc or executor call is outstanding
    pub fn needs_work(&self) -> bool {
        self.stack_recalc_pending || self.executor_call_pending
    }

    pub fn schedule_recalc(&mut self) {
        self.stack_recalc_pending = true;
    }

    pub fn take_notices(&mut self) -> Vec<StaNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Update policies through their setters
    pub fn configure<R>(&mut self, f: impl FnOnce(&mut PolicyStack, &mut dyn PolicyMediator) -> R) -> R {
        let mut m = mediator!(self);
        f(&mut self.policies, &mut m)
    }

    /// Replace the set of candidate BSSIDs
    pub fn set_candidates(&mut self, bssids: &[MacAddr]) {
        let before: Vec<MacAddr> = self.candidates.iter().map(|c| *c.bssid()).collect();
        self.candidates.sync(bssids);
        if !self.candidates.iter().map(|c| c.bssid()).eq(before.iter()) {
            self.stack_recalc_pending = true;
        }
    }

    pub fn sta_connected(&mut self, link: Link, assoc: Option<&AssocReqInfo>, now: Duration) {
        if self.links.iter().any(|l| l.bssid == link.bssid) {
            return;
        }
        log::info!("Sta {}: connected to {} on {}", self.addr, link.bssid, link.vif_name);
        let event = LinkEvent {
            bssid: link.bssid,
            vif_name: &link.vif_name,
            assoc,
        };
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_sta_connected(&event, now, &mut m);
        }
        self.links.push(link);
        self.stack_recalc_pending = true;
        self.executor_call_pending = true;
    }

    pub fn sta_disconnected(&mut self, bssid: &MacAddr, now: Duration) {
        let Some(pos) = self.links.iter().position(|l| l.bssid == *bssid) else {
            return;
        };
        let link = self.links.remove(pos);
        log::info!("Sta {}: disconnected from {} on {}", self.addr, link.bssid, link.vif_name);
        let event = LinkEvent {
            bssid: link.bssid,
            vif_name: &link.vif_name,
            assoc: None,
        };
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_sta_disconnected(&event, now, &mut m);
        }
        self.stack_recalc_pending = true;
        self.executor_call_pending = true;
    }

    pub fn probe_req(&mut self, bssid: &MacAddr, vif_name: &str, probe: &ProbeReq, now: Duration) {
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_probe_req(bssid, vif_name, probe, now, &mut m);
        }
    }

    pub fn auth_req(&mut self, bssid: &MacAddr, now: Duration) {
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_auth_req(bssid, now, &mut m);
        }
    }

    pub fn snr(&mut self, bssid: &MacAddr, snr: u32, now: Duration) {
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_snr(bssid, snr, now, &mut m);
        }
    }

    pub fn data_vol(&mut self, bssid: &MacAddr, delta_bytes: u64, now: Duration) {
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_data_vol(bssid, delta_bytes, now, &mut m);
        }
    }

    pub fn btm_response(&mut self, bssid: &MacAddr, resp: &BtmResponse, now: Duration) {
        let mut m = mediator!(self);
        for policy in self.policies.iter_mut() {
            policy.on_btm_response(bssid, resp, now, &mut m);
        }
        self.executor.btm_response(&mut m);
    }

    /// Issue the one-shot force kick
    pub fn force_kick(&mut self, now: Duration) {
        let mut m = mediator!(self);
        self.policies.force_kick.issue(now, &mut m);
    }

    /// Phase one: policy timers, stack and assessor
    pub fn recalc(&mut self, now: Duration, assessor: &dyn CandidateAssessor) {
        {
            let mut m = mediator!(self);
            self.policies.on_timer(now, &mut m);
        }

        let mut rounds = 0;
        let mut assessed = true;
        while self.stack_recalc_pending {
            if rounds == STACK_RECALC_MAX_ROUNDS {
                log::warn!("Sta {}: policy stack does not settle", self.addr);
                self.stack_recalc_pending = false;
                break;
            }
            rounds += 1;
            self.stack_recalc_pending = false;
            let mut m = mediator!(self);
            self.policies.recalc(&mut self.candidates, now, &mut m);
            assessed = assessor.assess(&self.addr, &mut self.candidates);
        }
        if !assessed {
            log::debug!("Sta {}: candidates not assessed, leaving executor alone", self.addr);
            return;
        }

        let snapshot: Vec<(MacAddr, Preference, u32)> = self
            .candidates
            .iter()
            .map(|c| (*c.bssid(), c.preference(), c.metric()))
            .collect();
        if snapshot != self.prev_candidates {
            for (bssid, pref, metric) in &snapshot {
                log::debug!("Sta {}: candidate {} {} metric {}", self.addr, bssid, pref, metric);
            }
            self.prev_candidates = snapshot;
            self.executor_call_pending = true;
        }
    }

    /// Phase two: action timers and the executor
    pub fn execute(&mut self, now: Duration, env: &ExecEnv, driver: &mut dyn Driver) {
        let mut m = mediator!(self);
        self.executor.on_timer(now, &mut m);
        if !*m.executor_call {
            return;
        }
        *m.executor_call = false;

        let ctx = ActionContext {
            sta: self.addr,
            now,
            links: &self.links,
            vifs: env.vifs,
            btm_supported: env.btm_supported,
            disassoc_imminent: env.disassoc_imminent,
            deauth_delay: env.deauth_delay,
            btm_rate_limit: env.btm_rate_limit,
            btm_max_neighbors: env.btm_max_neighbors,
        };
        if self.executor.call(&self.candidates, &ctx, driver, &mut m) {
            log::trace!("Sta {}: executor done", self.addr);
        }
    }

    /// A local interface reported new info
    pub fn vif_changed(&mut self, now: Duration, env: &ExecEnv) {
        let mut m = mediator!(self);
        let ctx = ActionContext {
            sta: self.addr,
            now,
            links: &self.links,
            vifs: env.vifs,
            btm_supported: env.btm_supported,
            disassoc_imminent: env.disassoc_imminent,
            deauth_delay: env.deauth_delay,
            btm_rate_limit: env.btm_rate_limit,
            btm_max_neighbors: env.btm_max_neighbors,
        };
        self.executor.vif_changed(&self.candidates, &ctx, &mut m);
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        earliest(self.policies.next_deadline(), self.executor.next_deadline())
    }

    pub fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "  sta {}: active policy: {:?} links: {}",
            self.addr,
            self.active_policy,
            self.links
                .iter()
                .map(|l| format!("{}@{}", l.bssid, l.vif_name))
                .collect::<Vec<_>>()
                .join(",")
        );
        for c in self.candidates.iter() {
            let _ = writeln!(
                out,
                "    candidate {}: {} metric {}",
                c.bssid(),
                c.preference(),
                c.metric()
            );
        }
        self.policies.dump(out, now);
        self.executor.dump(out, now);
    }
}
