// BSS filter policy

//! BSS filter policy
//!
//! Marks a fixed set of BSSIDs with one preference and everything else
//! with another. The same policy type backs several stack slots (group
//! scoping, deferred vif shutdown, client steering allow/deny, directed
//! kicks), distinguished by their [`PolicyKind`].

use super::{Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::types::MacAddr;
use std::fmt::Write;
use std::time::Duration;

/// Filter configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BssFilterConfig {
    /// Preference for listed BSSIDs; `None` leaves them undecided
    pub included_preference: Option<Preference>,
    /// Preference for all other BSSIDs; `None` leaves them undecided
    pub excluded_preference: Option<Preference>,
    pub bssids: Vec<MacAddr>,
}

pub struct BssFilterPolicy {
    kind: PolicyKind,
    config: Option<BssFilterConfig>,
}

impl BssFilterPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        Self { kind, config: None }
    }

    pub fn config(&self) -> Option<&BssFilterConfig> {
        self.config.as_ref()
    }

    /// Replace the configuration; a change schedules a stack recalc
    pub fn set_config(&mut self, config: Option<BssFilterConfig>, m: &mut dyn PolicyMediator) {
        if self.config == config {
            return;
        }
        log::debug!("Policy {}: config {:?} -> {:?}", self.kind, self.config, config);
        self.config = config;
        m.schedule_stack_recalc();
    }
}

impl Policy for BssFilterPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, _m: &mut dyn PolicyMediator) {
        let Some(config) = &self.config else {
            return;
        };

        for c in list.iter_mut() {
            if c.preference() != Preference::None {
                continue;
            }
            let pref = if config.bssids.contains(c.bssid()) {
                config.included_preference
            } else {
                config.excluded_preference
            };
            if let Some(pref) = pref {
                c.set_preference(pref);
            }
        }
    }

    fn dump(&self, out: &mut String, _now: Duration) {
        let _ = writeln!(out, "    {}: {:?}", self.kind, self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::*;

    #[test]
    fn test_unconfigured_is_a_no_op() {
        let mut p = BssFilterPolicy::new(PolicyKind::BssFilter);
        let mut m = RecordingMediator::default();
        let mut list = candidates(&[1]);

        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::None);
    }

    #[test]
    fn test_included_and_excluded() {
        let mut p = BssFilterPolicy::new(PolicyKind::CsAllowFilter);
        let mut m = RecordingMediator::default();
        let mut list = candidates(&[1, 2, 3]);

        p.set_config(
            Some(BssFilterConfig {
                included_preference: Some(Preference::Available),
                excluded_preference: None,
                bssids: vec![mac(2)],
            }),
            &mut m,
        );
        assert_eq!(m.recalcs, 1);

        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::None);
        assert_eq!(pref(&list, 2), Preference::Available);
        assert_eq!(pref(&list, 3), Preference::None);
    }

    #[test]
    fn test_decided_candidates_are_untouched() {
        let mut p = BssFilterPolicy::new(PolicyKind::CsDenyFilter);
        let mut m = RecordingMediator::default();
        let mut list = candidates(&[1, 2]);
        list.lookup_mut(&mac(1))
            .unwrap()
            .set_preference(Preference::HardBlocked);

        p.set_config(
            Some(BssFilterConfig {
                included_preference: Some(Preference::SoftBlocked),
                excluded_preference: Some(Preference::SoftBlocked),
                bssids: vec![],
            }),
            &mut m,
        );
        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::HardBlocked);
        assert_eq!(pref(&list, 2), Preference::SoftBlocked);
    }

    #[test]
    fn test_same_config_does_not_reschedule() {
        let mut p = BssFilterPolicy::new(PolicyKind::BssFilter);
        let mut m = RecordingMediator::default();
        let config = BssFilterConfig {
            included_preference: None,
            excluded_preference: Some(Preference::OutOfScope),
            bssids: vec![mac(1)],
        };

        p.set_config(Some(config.clone()), &mut m);
        p.set_config(Some(config), &mut m);
        assert_eq!(m.recalcs, 1);

        p.set_config(None, &mut m);
        assert_eq!(m.recalcs, 2);
        assert!(p.config().is_none());
    }
}
