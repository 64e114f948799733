// Force kick policy

//! Force kick policy
//!
//! A one-shot request to move the station off its current BSS. While
//! enforced the serving BSS is hard-blocked and every other undecided
//! candidate is available. Enforcement ends after
//! [`FORCE_KICK_ENFORCE_PERIOD`], on disconnect, or as soon as there is
//! nowhere else to go.

use super::{LinkEvent, Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::timer::Timer;
use crate::types::MacAddr;
use std::fmt::Write;
use std::time::Duration;

/// How long a force kick stays enforced
pub const FORCE_KICK_ENFORCE_PERIOD: Duration = Duration::from_secs(20);

pub struct ForceKickPolicy {
    sta: MacAddr,
    link: Option<MacAddr>,
    configured: bool,
    enforce: Timer,
}

impl ForceKickPolicy {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            link: None,
            configured: false,
            enforce: Timer::new(),
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.configured && self.enforce.is_armed()
    }

    /// Apply a one-shot force kick
    pub fn issue(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        if self.link.is_none() {
            log::info!("Sta {}: force kick requested while disconnected, ignoring", self.sta);
            self.reset(m);
            return;
        }

        if !m.trigger_executor(PolicyKind::ForceKick) {
            log::info!("Sta {}: force kick suppressed by a more important policy", self.sta);
            self.reset(m);
            return;
        }

        log::info!("Sta {}: force kick enforced", self.sta);
        self.configured = true;
        self.enforce.arm_at(now + FORCE_KICK_ENFORCE_PERIOD);
        m.schedule_stack_recalc();
    }

    fn reset(&mut self, m: &mut dyn PolicyMediator) {
        if self.enforce.is_armed() {
            self.enforce.disarm();
            m.dismiss_executor(PolicyKind::ForceKick);
        }
        if self.configured {
            self.configured = false;
            m.schedule_stack_recalc();
        }
    }
}

impl Policy for ForceKickPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ForceKick
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, m: &mut dyn PolicyMediator) {
        if !self.is_enforcing() {
            return;
        }
        let Some(blocked) = self.link else {
            self.reset(m);
            return;
        };

        let blockable = list.lookup(&blocked).is_some_and(|c| {
            matches!(c.preference(), Preference::None | Preference::SoftBlocked)
        });
        let alternatives = list.iter().any(|c| {
            *c.bssid() != blocked
                && matches!(c.preference(), Preference::None | Preference::Available)
        });
        if !blockable || !alternatives {
            log::info!(
                "Sta {}: force kick from {} not possible (blockable: {}, alternatives: {})",
                self.sta,
                blocked,
                blockable,
                alternatives
            );
            self.reset(m);
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
            log::info!("Sta {}: force kick enforce period expired", self.sta);
            self.configured = false;
            m.dismiss_executor(PolicyKind::ForceKick);
            m.schedule_stack_recalc();
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.enforce.deadline()
    }

    fn on_sta_connected(&mut self, link: &LinkEvent, _now: Duration, _m: &mut dyn PolicyMediator) {
        self.link = Some(link.bssid);
    }

    fn on_sta_disconnected(&mut self, link: &LinkEvent, _now: Duration, m: &mut dyn PolicyMediator) {
        if self.link != Some(link.bssid) {
            return;
        }
        self.link = None;
        self.reset(m);
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    force_kick: link: {:?} enforcing: {} remaining: {:?}",
            self.link,
            self.is_enforcing(),
            self.enforce.remaining(now)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::*;

    fn connected(p: &mut ForceKickPolicy, m: &mut RecordingMediator, id: u8) {
        let link = LinkEvent {
            bssid: mac(id),
            vif_name: "home-ap-24",
            assoc: None,
        };
        p.on_sta_connected(&link, Duration::ZERO, m);
    }

    #[test]
    fn test_force_kick_blocks_serving_bss() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator::default();
        connected(&mut p, &mut m, 1);

        p.issue(Duration::ZERO, &mut m);
        assert_eq!(m.triggered, vec![PolicyKind::ForceKick]);
        assert!(p.is_enforcing());

        let mut list = candidates(&[1, 2, 3]);
        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 1), Preference::HardBlocked);
        assert_eq!(pref(&list, 2), Preference::Available);
        assert_eq!(pref(&list, 3), Preference::Available);
    }

    #[test]
    fn test_force_kick_without_link_is_ignored() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator::default();

        p.issue(Duration::ZERO, &mut m);
        assert!(m.triggered.is_empty());
        assert!(!p.is_enforcing());
    }

    #[test]
    fn test_force_kick_needs_alternative() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator::default();
        connected(&mut p, &mut m, 1);
        p.issue(Duration::ZERO, &mut m);

        // Only alternative is already hard blocked by an earlier policy
        let mut list = candidates(&[1, 2]);
        list.lookup_mut(&mac(2))
            .unwrap()
            .set_preference(Preference::HardBlocked);
        p.recalc(&mut list, Duration::ZERO, &mut m);

        assert_eq!(pref(&list, 1), Preference::None);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::ForceKick]);
    }

    #[test]
    fn test_enforce_period_expires() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator::default();
        connected(&mut p, &mut m, 1);
        p.issue(Duration::from_secs(1), &mut m);
        assert_eq!(p.next_deadline(), Some(Duration::from_secs(21)));

        p.on_timer(Duration::from_secs(20), &mut m);
        assert!(p.is_enforcing());

        p.on_timer(Duration::from_secs(21), &mut m);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::ForceKick]);
    }

    #[test]
    fn test_disconnect_resets() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator::default();
        connected(&mut p, &mut m, 1);
        p.issue(Duration::ZERO, &mut m);

        let link = LinkEvent {
            bssid: mac(1),
            vif_name: "home-ap-24",
            assoc: None,
        };
        p.on_sta_disconnected(&link, Duration::ZERO, &mut m);
        assert!(!p.is_enforcing());
        assert_eq!(m.dismissed, vec![PolicyKind::ForceKick]);
    }

    #[test]
    fn test_refused_trigger_does_not_enforce() {
        let mut p = ForceKickPolicy::new(STA);
        let mut m = RecordingMediator {
            refuse: true,
            ..Default::default()
        };
        connected(&mut p, &mut m, 1);
        p.issue(Duration::ZERO, &mut m);
        assert!(!p.is_enforcing());
        assert!(m.dismissed.is_empty());
    }
}
