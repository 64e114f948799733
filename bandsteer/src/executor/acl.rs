// ACL executor action

//! ACL action
//!
//! Keeps the ACL of every local AP interface in line with the station's
//! candidate list: soft- and hard-blocked candidates must keep the
//! station out, available candidates must let it in. Only entries the
//! action itself changed are ever reverted, so an operator's deny entry
//! stays and an allow list never gains a station it did not have. While
//! a change is in flight the action reports busy; it clears once the
//! driver reports interface info matching the wanted state.

use super::{ActionContext, ActionKind, ActionMediator, Driver, ExecutorAction};
use crate::candidate::{CandidateList, Preference};
use crate::timer::Timer;
use crate::types::{AclPolicy, MacAddr, VifInfo};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

/// Retry period after a failed ACL update
pub const ACL_RETRY_PERIOD: Duration = Duration::from_secs(1);

/// Wanted ACL state for a preference, if the preference has an opinion
fn want_blocked(pref: Preference) -> Option<bool> {
    match pref {
        Preference::SoftBlocked | Preference::HardBlocked => Some(true),
        Preference::Available => Some(false),
        Preference::None | Preference::OutOfScope => None,
    }
}

/// A change the action made to one interface's ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclEdit {
    /// Station added to a deny list; `was_open` if the interface had no
    /// ACL policy before
    DenyAdded { was_open: bool },
    /// Station removed from an allow list
    AllowRemoved,
}

/// ACL update for one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclChange {
    pub policy: AclPolicy,
    pub acl: Vec<MacAddr>,
    /// What the action owns on this interface once the change lands
    pub edit: Option<AclEdit>,
}

/// New ACL for `vif` with `sta` blocked or unblocked, given what the
/// action previously changed there. Returns `None` when there is nothing
/// to do or nothing the action is allowed to undo.
pub fn mutate_acl(
    vif: &VifInfo,
    sta: &MacAddr,
    blocked: bool,
    edit: Option<AclEdit>,
) -> Option<AclChange> {
    let mut acl = vif.acl.clone();
    let listed = acl.contains(sta);

    if blocked {
        return match vif.acl_policy {
            AclPolicy::None => {
                acl.push(*sta);
                Some(AclChange {
                    policy: AclPolicy::DenyList,
                    acl,
                    edit: Some(AclEdit::DenyAdded { was_open: true }),
                })
            }
            AclPolicy::DenyList if !listed => {
                acl.push(*sta);
                Some(AclChange {
                    policy: AclPolicy::DenyList,
                    acl,
                    edit: Some(AclEdit::DenyAdded { was_open: false }),
                })
            }
            AclPolicy::AllowList if listed => {
                acl.retain(|a| a != sta);
                Some(AclChange {
                    policy: AclPolicy::AllowList,
                    acl,
                    edit: Some(AclEdit::AllowRemoved),
                })
            }
            AclPolicy::DenyList | AclPolicy::AllowList => None,
        };
    }

    match (edit, vif.acl_policy) {
        (Some(AclEdit::DenyAdded { was_open }), AclPolicy::DenyList) if listed => {
            acl.retain(|a| a != sta);
            let policy = if was_open && acl.is_empty() {
                AclPolicy::None
            } else {
                AclPolicy::DenyList
            };
            Some(AclChange { policy, acl, edit: None })
        }
        (Some(AclEdit::AllowRemoved), AclPolicy::AllowList) if !listed => {
            acl.push(*sta);
            Some(AclChange {
                policy: AclPolicy::AllowList,
                acl,
                edit: None,
            })
        }
        _ => None,
    }
}

pub struct AclAction {
    sta: MacAddr,
    syncing: bool,
    retry: Timer,
    /// Interfaces whose ACL the action changed, by name
    edits: BTreeMap<String, AclEdit>,
}

impl AclAction {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            syncing: false,
            retry: Timer::new(),
            edits: BTreeMap::new(),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn edit(&self, vif_name: &str) -> Option<AclEdit> {
        self.edits.get(vif_name).copied()
    }

    /// Local AP interfaces whose ACL still needs a change
    fn out_of_sync<'a>(
        &self,
        list: &CandidateList,
        ctx: &'a ActionContext,
    ) -> Vec<(&'a VifInfo, bool, AclChange)> {
        list.iter()
            .filter_map(|c| {
                let want = want_blocked(c.preference())?;
                let vif = ctx.vifs.vif_by_bssid(c.bssid())?;
                if !vif.is_active_ap() {
                    return None;
                }
                let change = mutate_acl(vif, &self.sta, want, self.edit(&vif.vif_name))?;
                Some((vif, want, change))
            })
            .collect()
    }

    /// Forget edits that have been undone, or that the operator took over
    fn prune_edits(&mut self, list: &CandidateList, ctx: &ActionContext) {
        for c in list.iter() {
            if want_blocked(c.preference()) != Some(false) {
                continue;
            }
            let Some(vif) = ctx.vifs.vif_by_bssid(c.bssid()) else {
                continue;
            };
            let edit = self.edit(&vif.vif_name);
            if edit.is_some() && mutate_acl(vif, &self.sta, false, edit).is_none() {
                self.edits.remove(&vif.vif_name);
            }
        }
    }

    /// Called when a local interface reports new info
    pub fn vif_changed(&mut self, list: &CandidateList, ctx: &ActionContext, m: &mut dyn ActionMediator) {
        if self.syncing && self.out_of_sync(list, ctx).is_empty() {
            log::debug!("Sta {}: acl in sync", self.sta);
            m.sched_recall(ActionKind::Acl);
        }
    }
}

impl ExecutorAction for AclAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Acl
    }

    fn call(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        driver: &mut dyn Driver,
        _m: &mut dyn ActionMediator,
    ) -> bool {
        self.prune_edits(list, ctx);

        let pending = self.out_of_sync(list, ctx);
        if pending.is_empty() {
            self.syncing = false;
            self.retry.disarm();
            return true;
        }
        if self.retry.is_armed() {
            return false;
        }

        for (vif, blocked, change) in pending {
            log::info!(
                "Sta {}: {} on {} (acl policy {:?})",
                self.sta,
                if blocked { "blocking" } else { "unblocking" },
                vif.vif_name,
                change.policy
            );
            if let Err(e) = driver.apply_acl(&vif.vif_name, change.policy, &change.acl) {
                log::warn!("Sta {}: failed to update acl on {}: {}", self.sta, vif.vif_name, e);
                self.retry.arm_at(ctx.now + ACL_RETRY_PERIOD);
                continue;
            }
            // Unblock edits are dropped once the driver echoes them
            if let Some(edit) = change.edit {
                self.edits.insert(vif.vif_name.clone(), edit);
            }
        }

        self.syncing = true;
        false
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn ActionMediator) {
        if self.retry.fire(now) {
            m.sched_recall(ActionKind::Acl);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.retry.deadline()
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    acl: syncing: {} retry: {:?} edits: {:?}",
            self.syncing,
            self.retry.remaining(now),
            self.edits
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::*;

    #[test]
    fn test_mutate_acl() {
        let mut vif = ap("home-ap-24", 1);

        // No policy: blocking switches to a deny list
        assert_eq!(
            mutate_acl(&vif, &STA, true, None),
            Some(AclChange {
                policy: AclPolicy::DenyList,
                acl: vec![STA],
                edit: Some(AclEdit::DenyAdded { was_open: true }),
            })
        );
        assert_eq!(mutate_acl(&vif, &STA, false, None), None);

        // Our own deny entry is undone, back to no policy
        vif.acl_policy = AclPolicy::DenyList;
        vif.acl = vec![STA];
        assert_eq!(mutate_acl(&vif, &STA, true, None), None);
        assert_eq!(
            mutate_acl(&vif, &STA, false, Some(AclEdit::DenyAdded { was_open: true })),
            Some(AclChange {
                policy: AclPolicy::None,
                acl: vec![],
                edit: None,
            })
        );

        // Operator deny entry stays
        assert_eq!(mutate_acl(&vif, &STA, false, None), None);

        // Allow list: blocking removes the station, unblocking only restores it
        vif.acl_policy = AclPolicy::AllowList;
        vif.acl = vec![STA, mac(7)];
        assert_eq!(
            mutate_acl(&vif, &STA, true, None),
            Some(AclChange {
                policy: AclPolicy::AllowList,
                acl: vec![mac(7)],
                edit: Some(AclEdit::AllowRemoved),
            })
        );
        vif.acl = vec![mac(7)];
        assert_eq!(mutate_acl(&vif, &STA, true, None), None);
        assert_eq!(
            mutate_acl(&vif, &STA, false, Some(AclEdit::AllowRemoved)),
            Some(AclChange {
                policy: AclPolicy::AllowList,
                acl: vec![mac(7), STA],
                edit: None,
            })
        );

        // Never added to an allow list the operator left it off
        assert_eq!(mutate_acl(&vif, &STA, false, None), None);
    }

    #[test]
    fn test_operator_deny_is_kept() {
        let mut action = AclAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let mut denied = ap("home-ap-24", 1);
        denied.acl_policy = AclPolicy::DenyList;
        denied.acl = vec![STA];
        let mut allowed = ap("home-ap-50", 2);
        allowed.acl_policy = AclPolicy::AllowList;
        allowed.acl = vec![mac(7)];
        let vifs = vifs(vec![denied, allowed]);
        let links = [link(1, "home-ap-24")];
        let l = list(&[(1, Preference::Available, 0), (2, Preference::Available, 0)]);

        // Nothing the action may change: done right away
        assert!(action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert!(!action.is_syncing());
        assert!(driver.take().is_empty());
    }

    #[test]
    fn test_block_then_unblock_restores_acl() {
        let mut action = AclAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let mut vif = ap("home-ap-24", 1);
        vif.acl_policy = AclPolicy::DenyList;
        vif.acl = vec![mac(7)];
        let mut vifs = vifs(vec![vif, ap("home-ap-50", 2)]);
        let links = [link(1, "home-ap-24")];

        let blocked = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);
        assert!(!action.call(&blocked, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(
            driver.take(),
            vec![DriverCall::Acl {
                vif_name: "home-ap-24".to_string(),
                policy: AclPolicy::DenyList,
                acl: vec![mac(7), STA],
            }]
        );
        assert_eq!(action.edit("home-ap-24"), Some(AclEdit::DenyAdded { was_open: false }));
        if let Some(v) = vifs.get_mut("home-ap-24") {
            v.acl = vec![mac(7), STA];
        }
        assert!(action.call(&blocked, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));

        // Unblocking removes only our entry
        let open = list(&[(1, Preference::Available, 0), (2, Preference::Available, 0)]);
        assert!(!action.call(&open, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(
            driver.take(),
            vec![DriverCall::Acl {
                vif_name: "home-ap-24".to_string(),
                policy: AclPolicy::DenyList,
                acl: vec![mac(7)],
            }]
        );

        // Driver echo: edit forgotten, action done
        if let Some(v) = vifs.get_mut("home-ap-24") {
            v.acl = vec![mac(7)];
        }
        assert!(action.call(&open, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(action.edit("home-ap-24"), None);
        assert!(driver.take().is_empty());
    }

    #[test]
    fn test_acl_sync_cycle() {
        let mut action = AclAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let mut vifs = vifs(vec![ap("home-ap-24", 1), ap("home-ap-50", 2)]);
        let links = [link(1, "home-ap-24")];
        let l = list(&[(1, Preference::SoftBlocked, 0), (2, Preference::Available, 0)]);

        // Out of sync: push the deny list and wait
        let done = action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m);
        assert!(!done);
        assert!(action.is_syncing());
        assert_eq!(
            driver.take(),
            vec![DriverCall::Acl {
                vif_name: "home-ap-24".to_string(),
                policy: AclPolicy::DenyList,
                acl: vec![STA],
            }]
        );

        // Driver echoes the new ACL: recall is scheduled
        if let Some(v) = vifs.get_mut("home-ap-24") {
            v.acl_policy = AclPolicy::DenyList;
            v.acl = vec![STA];
        }
        action.vif_changed(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut m);
        assert_eq!(m.recalls, vec![ActionKind::Acl]);

        // In sync now
        let done = action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m);
        assert!(done);
        assert!(!action.is_syncing());
        assert!(driver.take().is_empty());
    }

    #[test]
    fn test_acl_retry_after_driver_failure() {
        let mut action = AclAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let vifs = vifs(vec![ap("home-ap-24", 1), ap("home-ap-50", 2)]);
        let links = [link(1, "home-ap-24")];
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);

        driver.fail.set(true);
        assert!(!action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(action.next_deadline(), Some(ACL_RETRY_PERIOD));

        // Retry fires and asks for a recall
        action.on_timer(ACL_RETRY_PERIOD, &mut m);
        assert_eq!(m.recalls, vec![ActionKind::Acl]);

        driver.fail.set(false);
        assert!(!action.call(&l, &ctx(ACL_RETRY_PERIOD, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(driver.take().len(), 1);
    }

    #[test]
    fn test_disabled_and_remote_bsses_are_ignored() {
        let mut action = AclAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let mut down = ap("home-ap-24", 1);
        down.enabled = false;
        let vifs = vifs(vec![down]);
        let links = [link(1, "home-ap-24")];
        // mac(9) is a neighbor, not a local vif
        let l = list(&[(1, Preference::HardBlocked, 0), (9, Preference::HardBlocked, 0)]);

        assert!(action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert!(driver.take().is_empty());
    }
}
