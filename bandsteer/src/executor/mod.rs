// Executor and outbound driver interface

//! Executor
//!
//! Turns a station's candidate list into actions on the radio. Actions run
//! in a fixed order (ACL, BTM, deauth). Each call walks the actions and
//! stops at the first one that still has work in flight, so a later
//! action never races an earlier one: a deauth is never sent while the ACL
//! is still being synced or before a BTM request had its chance.
//!
//! Actions report progress through an [`ActionMediator`], and talk to the
//! radio through a [`Driver`].

pub mod acl;
pub mod btm;
pub mod deauth;

use crate::candidate::CandidateList;
use crate::timer::earliest;
use crate::types::{AclPolicy, Link, MacAddr, VifInfo};
use acl::AclAction;
use btm::BtmAction;
use deauth::DeauthAction;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by outbound driver primitives
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("interface {0} not found")]
    UnknownVif(String),
    #[error("driver busy")]
    Busy,
    #[error("driver request failed: {0}")]
    Failed(String),
}

/// One entry of a BTM request candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtmNeighbor {
    pub bssid: MacAddr,
    /// Higher is more preferred
    pub preference: u8,
}

/// A BSS Transition Management request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtmRequest {
    pub sta: MacAddr,
    pub vif_name: String,
    pub neighbors: Vec<BtmNeighbor>,
    pub disassoc_imminent: bool,
    pub abridged: bool,
}

/// An 802.11k beacon report request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconReportRequest {
    pub sta: MacAddr,
    pub vif_name: String,
    pub op_class: u8,
    pub channel: u8,
    pub ssid: String,
}

/// Outbound radio primitives
pub trait Driver {
    /// Replace the ACL of an AP interface
    fn apply_acl(
        &mut self,
        vif_name: &str,
        policy: AclPolicy,
        acl: &[MacAddr],
    ) -> Result<(), DriverError>;
    fn submit_btm(&mut self, req: &BtmRequest) -> Result<(), DriverError>;
    fn deauth(&mut self, vif_name: &str, sta: &MacAddr, reason: u16) -> Result<(), DriverError>;
    fn request_beacon_report(&mut self, req: &BeaconReportRequest) -> Result<(), DriverError>;
}

/// Lookup of local interfaces by BSSID
pub trait VifDirectory {
    fn vif_by_bssid(&self, bssid: &MacAddr) -> Option<&VifInfo>;
}

impl VifDirectory for BTreeMap<String, VifInfo> {
    fn vif_by_bssid(&self, bssid: &MacAddr) -> Option<&VifInfo> {
        self.values().find(|v| v.mac_addr == *bssid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Acl,
    Btm,
    Deauth,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Acl => "acl",
            ActionKind::Btm => "btm",
            ActionKind::Deauth => "deauth",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel from an action to its owning station
pub trait ActionMediator {
    /// Ask for the executor to be called again
    fn sched_recall(&mut self, action: ActionKind);
    fn notify_going_busy(&mut self, action: ActionKind);
    fn notify_data_sent(&mut self, action: ActionKind);
    fn notify_going_idle(&mut self, action: ActionKind);
}

/// Everything an action needs to know about the station and the radio
pub struct ActionContext<'a> {
    pub sta: MacAddr,
    pub now: Duration,
    pub links: &'a [Link],
    pub vifs: &'a dyn VifDirectory,
    pub btm_supported: bool,
    pub disassoc_imminent: bool,
    pub deauth_delay: Duration,
    pub btm_rate_limit: Duration,
    pub btm_max_neighbors: usize,
}

impl ActionContext<'_> {
    pub fn link_bssids(&self) -> Vec<MacAddr> {
        self.links.iter().map(|l| l.bssid).collect()
    }
}

/// One step of the executor
pub trait ExecutorAction {
    fn kind(&self) -> ActionKind;

    /// Drive the action towards the candidate list. Returns true when
    /// nothing is in flight and the next action may run.
    fn call(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        driver: &mut dyn Driver,
        m: &mut dyn ActionMediator,
    ) -> bool;

    fn on_timer(&mut self, _now: Duration, _m: &mut dyn ActionMediator) {}

    fn next_deadline(&self) -> Option<Duration> {
        None
    }

    fn dump(&self, out: &mut String, now: Duration);
}

/// Ordered actions of one station
pub struct Executor {
    acl: AclAction,
    btm: BtmAction,
    deauth: DeauthAction,
}

impl Executor {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            acl: AclAction::new(sta),
            btm: BtmAction::new(sta),
            deauth: DeauthAction::new(sta),
        }
    }

    fn actions_mut(&mut self) -> [&mut dyn ExecutorAction; 3] {
        [&mut self.acl, &mut self.btm, &mut self.deauth]
    }

    fn actions(&self) -> [&dyn ExecutorAction; 3] {
        [&self.acl, &self.btm, &self.deauth]
    }

    /// Run actions in order until one is busy. Returns true when all
    /// actions are done.
    pub fn call(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        driver: &mut dyn Driver,
        m: &mut dyn ActionMediator,
    ) -> bool {
        for action in self.actions_mut() {
            if !action.call(list, ctx, driver, m) {
                log::trace!("Sta {}: executor waiting on {}", ctx.sta, action.kind());
                return false;
            }
        }
        true
    }

    pub fn on_timer(&mut self, now: Duration, m: &mut dyn ActionMediator) {
        for action in self.actions_mut() {
            if action.next_deadline().is_some_and(|at| at <= now) {
                action.on_timer(now, m);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.actions()
            .iter()
            .fold(None, |acc, a| earliest(acc, a.next_deadline()))
    }

    /// A local interface changed; the ACL action may be waiting on it
    pub fn vif_changed(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        m: &mut dyn ActionMediator,
    ) {
        self.acl.vif_changed(list, ctx, m);
    }

    /// A BTM response arrived for this station
    pub fn btm_response(&mut self, m: &mut dyn ActionMediator) {
        self.btm.response_received(m);
    }

    pub fn dump(&self, out: &mut String, now: Duration) {
        for action in self.actions() {
            action.dump(out, now);
        }
    }
}
