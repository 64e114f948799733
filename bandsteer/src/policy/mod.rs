// Policy stack

//! Steering policies
//!
//! A policy is an independent rule that writes preferences into a
//! station's candidate list. Policies run in a fixed order; each one only
//! touches candidates still at [`Preference::None`], so an earlier policy
//! always wins over a later one. Whatever is still undecided after the
//! last policy becomes [`Preference::Available`].
//!
//! Policies never talk to each other or to the executor directly. They go
//! through a [`PolicyMediator`], which arbitrates which policy may drive
//! the executor at a time.
//!
//! [`Preference::None`]: crate::candidate::Preference::None
//! [`Preference::Available`]: crate::candidate::Preference::Available

pub mod bss_filter;
pub mod btm_response;
pub mod chan_cap;
pub mod force_kick;
pub mod pre_assoc;
pub mod snr_level;
pub mod snr_xing;

use crate::candidate::{CandidateList, Preference};
use crate::ieee80211::AssocReqInfo;
use crate::timer::earliest;
use crate::types::{BtmResponse, MacAddr, ProbeReq};
use bss_filter::BssFilterPolicy;
use btm_response::BtmResponsePolicy;
use chan_cap::ChanCapPolicy;
use force_kick::ForceKickPolicy;
use pre_assoc::PreAssocPolicy;
use snr_level::SnrLevelPolicy;
use snr_xing::SnrXingPolicy;
use std::fmt;
use std::time::Duration;

/// Identity of each policy slot, in stack order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    BssFilter,
    ChanCap,
    DeferVifDownDeny,
    DeferVifDownAllow,
    CsKickFilter,
    CsAllowFilter,
    ForceKick,
    CsDenyFilter,
    Lwm2g,
    Lwm5g,
    Lwm6g,
    Hwm2g,
    BottomLwm2g,
    PreAssoc2g,
    BtmResponse,
}

impl PolicyKind {
    /// Every policy, first one evaluated first
    pub const STACK: [PolicyKind; 15] = [
        PolicyKind::BssFilter,
        PolicyKind::ChanCap,
        PolicyKind::DeferVifDownDeny,
        PolicyKind::DeferVifDownAllow,
        PolicyKind::CsKickFilter,
        PolicyKind::CsAllowFilter,
        PolicyKind::ForceKick,
        PolicyKind::CsDenyFilter,
        PolicyKind::Lwm2g,
        PolicyKind::Lwm5g,
        PolicyKind::Lwm6g,
        PolicyKind::Hwm2g,
        PolicyKind::BottomLwm2g,
        PolicyKind::PreAssoc2g,
        PolicyKind::BtmResponse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::BssFilter => "bss_filter",
            PolicyKind::ChanCap => "chan_cap",
            PolicyKind::DeferVifDownDeny => "defer_vif_down_deny",
            PolicyKind::DeferVifDownAllow => "defer_vif_down_allow",
            PolicyKind::CsKickFilter => "cs_kick_filter",
            PolicyKind::CsAllowFilter => "cs_allow_filter",
            PolicyKind::ForceKick => "force_kick",
            PolicyKind::CsDenyFilter => "cs_deny_filter",
            PolicyKind::Lwm2g => "lwm_2g",
            PolicyKind::Lwm5g => "lwm_5g",
            PolicyKind::Lwm6g => "lwm_6g",
            PolicyKind::Hwm2g => "hwm_2g",
            PolicyKind::BottomLwm2g => "bottom_lwm_2g",
            PolicyKind::PreAssoc2g => "pre_assoc_2g",
            PolicyKind::BtmResponse => "btm_response",
        }
    }

    /// Policies earlier in the stack are more important
    pub fn outranks(self, other: PolicyKind) -> bool {
        self < other
    }

    /// Policies allowed to drive the executor at all
    pub fn drives_executor(self) -> bool {
        matches!(
            self,
            PolicyKind::ForceKick
                | PolicyKind::Lwm2g
                | PolicyKind::Lwm5g
                | PolicyKind::Lwm6g
                | PolicyKind::Hwm2g
                | PolicyKind::BottomLwm2g
        )
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel from a policy to its owning station
pub trait PolicyMediator {
    /// Ask for the whole stack to be re-evaluated
    fn schedule_stack_recalc(&mut self);
    /// Ask to drive the executor. Refused (false) when a more important
    /// policy is already driving it.
    fn trigger_executor(&mut self, policy: PolicyKind) -> bool;
    /// Release the executor. Ignored unless `policy` is the active one.
    fn dismiss_executor(&mut self, policy: PolicyKind);
    fn notify_backoff(&mut self, policy: PolicyKind, enabled: bool, period_secs: u32);
    fn notify_steering_attempt(&mut self, policy: PolicyKind, vif_name: &str);
}

/// A station link as seen by the policies
#[derive(Debug, Clone, Copy)]
pub struct LinkEvent<'a> {
    pub bssid: MacAddr,
    pub vif_name: &'a str,
    pub assoc: Option<&'a AssocReqInfo>,
}

/// A steering rule
pub trait Policy {
    fn kind(&self) -> PolicyKind;

    /// Write preferences for undecided candidates
    fn recalc(&mut self, list: &mut CandidateList, now: Duration, m: &mut dyn PolicyMediator);

    /// Fire timers whose deadline passed
    fn on_timer(&mut self, _now: Duration, _m: &mut dyn PolicyMediator) {}

    fn next_deadline(&self) -> Option<Duration> {
        None
    }

    fn on_sta_connected(&mut self, _link: &LinkEvent, _now: Duration, _m: &mut dyn PolicyMediator) {
    }

    fn on_sta_disconnected(
        &mut self,
        _link: &LinkEvent,
        _now: Duration,
        _m: &mut dyn PolicyMediator,
    ) {
    }

    fn on_probe_req(
        &mut self,
        _bssid: &MacAddr,
        _vif_name: &str,
        _probe: &ProbeReq,
        _now: Duration,
        _m: &mut dyn PolicyMediator,
    ) {
    }

    fn on_auth_req(&mut self, _bssid: &MacAddr, _now: Duration, _m: &mut dyn PolicyMediator) {}

    fn on_snr(&mut self, _bssid: &MacAddr, _snr: u32, _now: Duration, _m: &mut dyn PolicyMediator) {
    }

    /// Bytes exchanged on a link since the previous report
    fn on_data_vol(
        &mut self,
        _bssid: &MacAddr,
        _delta_bytes: u64,
        _now: Duration,
        _m: &mut dyn PolicyMediator,
    ) {
    }

    fn on_btm_response(
        &mut self,
        _bssid: &MacAddr,
        _resp: &BtmResponse,
        _now: Duration,
        _m: &mut dyn PolicyMediator,
    ) {
    }

    /// Append a human readable state description
    fn dump(&self, out: &mut String, now: Duration);
}

/// The ordered set of policies of one station
pub struct PolicyStack {
    pub bss_filter: BssFilterPolicy,
    pub chan_cap: ChanCapPolicy,
    pub defer_vif_down_deny: BssFilterPolicy,
    pub defer_vif_down_allow: BssFilterPolicy,
    pub cs_kick_filter: BssFilterPolicy,
    pub cs_allow_filter: BssFilterPolicy,
    pub force_kick: ForceKickPolicy,
    pub cs_deny_filter: BssFilterPolicy,
    pub lwm_2g: SnrXingPolicy,
    pub lwm_5g: SnrXingPolicy,
    pub lwm_6g: SnrXingPolicy,
    pub hwm_2g: SnrLevelPolicy,
    pub bottom_lwm_2g: SnrXingPolicy,
    pub pre_assoc_2g: PreAssocPolicy,
    pub btm_response: BtmResponsePolicy,
}

impl PolicyStack {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            bss_filter: BssFilterPolicy::new(PolicyKind::BssFilter),
            chan_cap: ChanCapPolicy::new(),
            defer_vif_down_deny: BssFilterPolicy::new(PolicyKind::DeferVifDownDeny),
            defer_vif_down_allow: BssFilterPolicy::new(PolicyKind::DeferVifDownAllow),
            cs_kick_filter: BssFilterPolicy::new(PolicyKind::CsKickFilter),
            cs_allow_filter: BssFilterPolicy::new(PolicyKind::CsAllowFilter),
            force_kick: ForceKickPolicy::new(sta),
            cs_deny_filter: BssFilterPolicy::new(PolicyKind::CsDenyFilter),
            lwm_2g: SnrXingPolicy::new(PolicyKind::Lwm2g, sta),
            lwm_5g: SnrXingPolicy::new(PolicyKind::Lwm5g, sta),
            lwm_6g: SnrXingPolicy::new(PolicyKind::Lwm6g, sta),
            hwm_2g: SnrLevelPolicy::new(PolicyKind::Hwm2g, sta),
            bottom_lwm_2g: SnrXingPolicy::new(PolicyKind::BottomLwm2g, sta),
            pre_assoc_2g: PreAssocPolicy::new(PolicyKind::PreAssoc2g, sta),
            btm_response: BtmResponsePolicy::new(sta),
        }
    }

    /// Policies in evaluation order
    pub fn iter_mut(&mut self) -> [&mut dyn Policy; 15] {
        [
            &mut self.bss_filter,
            &mut self.chan_cap,
            &mut self.defer_vif_down_deny,
            &mut self.defer_vif_down_allow,
            &mut self.cs_kick_filter,
            &mut self.cs_allow_filter,
            &mut self.force_kick,
            &mut self.cs_deny_filter,
            &mut self.lwm_2g,
            &mut self.lwm_5g,
            &mut self.lwm_6g,
            &mut self.hwm_2g,
            &mut self.bottom_lwm_2g,
            &mut self.pre_assoc_2g,
            &mut self.btm_response,
        ]
    }

    pub fn iter(&self) -> [&dyn Policy; 15] {
        [
            &self.bss_filter,
            &self.chan_cap,
            &self.defer_vif_down_deny,
            &self.defer_vif_down_allow,
            &self.cs_kick_filter,
            &self.cs_allow_filter,
            &self.force_kick,
            &self.cs_deny_filter,
            &self.lwm_2g,
            &self.lwm_5g,
            &self.lwm_6g,
            &self.hwm_2g,
            &self.bottom_lwm_2g,
            &self.pre_assoc_2g,
            &self.btm_response,
        ]
    }

    /// Recompute every candidate's preference from scratch
    pub fn recalc(&mut self, list: &mut CandidateList, now: Duration, m: &mut dyn PolicyMediator) {
        list.clear_preferences();
        for policy in self.iter_mut() {
            policy.recalc(list, now, m);
        }
        list.fill_undecided(Preference::Available);
    }

    /// Fire due timers of every policy
    pub fn on_timer(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        for policy in self.iter_mut() {
            if policy.next_deadline().is_some_and(|at| at <= now) {
                policy.on_timer(now, m);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.iter()
            .iter()
            .fold(None, |acc, p| earliest(acc, p.next_deadline()))
    }

    pub fn dump(&self, out: &mut String, now: Duration) {
        for policy in self.iter() {
            policy.dump(out, now);
        }
    }
}
