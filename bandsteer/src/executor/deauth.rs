// Deauth executor action

//! Deauth action
//!
//! Last resort when a kick is needed. The deauthentication is held back
//! for a delay so a BTM request gets a chance first, and is cancelled if
//! the kick condition clears in the meantime.

use super::{ActionContext, ActionKind, ActionMediator, Driver, ExecutorAction};
use crate::candidate::{kick_decision, CandidateList};
use crate::timer::Timer;
use crate::types::MacAddr;
use std::fmt::Write;
use std::time::Duration;

/// IEEE 802.11 reason code 1: unspecified reason
pub const DEAUTH_REASON_UNSPECIFIED: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeauthState {
    Idle,
    Delaying,
    Due,
}

pub struct DeauthAction {
    sta: MacAddr,
    state: DeauthState,
    delay: Timer,
}

impl DeauthAction {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            state: DeauthState::Idle,
            delay: Timer::new(),
        }
    }

    pub fn state(&self) -> DeauthState {
        self.state
    }

    fn issue(&mut self, ctx: &ActionContext, driver: &mut dyn Driver, m: &mut dyn ActionMediator) {
        for link in ctx.links {
            log::info!("Sta {}: deauth on {}", self.sta, link.vif_name);
            match driver.deauth(&link.vif_name, &self.sta, DEAUTH_REASON_UNSPECIFIED) {
                Ok(()) => m.notify_data_sent(ActionKind::Deauth),
                Err(e) => log::warn!("Sta {}: failed to deauth on {}: {}", self.sta, link.vif_name, e),
            }
        }
        self.state = DeauthState::Idle;
        m.notify_going_idle(ActionKind::Deauth);
    }
}

impl ExecutorAction for DeauthAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Deauth
    }

    fn call(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        driver: &mut dyn Driver,
        m: &mut dyn ActionMediator,
    ) -> bool {
        if !kick_decision(list, &ctx.link_bssids()).is_kick() {
            if self.state != DeauthState::Idle {
                log::debug!("Sta {}: deauth cancelled", self.sta);
                self.delay.disarm();
                self.state = DeauthState::Idle;
                m.notify_going_idle(ActionKind::Deauth);
            }
            return true;
        }

        match self.state {
            DeauthState::Idle => {
                m.notify_going_busy(ActionKind::Deauth);
                if ctx.deauth_delay.is_zero() {
                    self.issue(ctx, driver, m);
                    return true;
                }
                log::debug!(
                    "Sta {}: deauth in {}s",
                    self.sta,
                    ctx.deauth_delay.as_secs()
                );
                self.delay.arm_at(ctx.now + ctx.deauth_delay);
                self.state = DeauthState::Delaying;
                false
            }
            DeauthState::Delaying => false,
            DeauthState::Due => {
                self.issue(ctx, driver, m);
                true
            }
        }
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn ActionMediator) {
        if self.delay.fire(now) && self.state == DeauthState::Delaying {
            self.state = DeauthState::Due;
            m.sched_recall(ActionKind::Deauth);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.delay.deadline()
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    deauth: {:?} remaining: {:?}",
            self.state,
            self.delay.remaining(now)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Preference;
    use crate::executor::testing::*;

    #[test]
    fn test_deauth_after_delay() {
        let mut action = DeauthAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let vifs = vifs(vec![]);
        let links = [link(1, "home-ap-24")];
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);

        assert!(!action.call(&l, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(action.state(), DeauthState::Delaying);
        assert!(driver.take().is_empty());

        // Not yet due
        action.on_timer(Duration::from_secs(9), &mut m);
        assert_eq!(action.state(), DeauthState::Delaying);

        action.on_timer(Duration::from_secs(10), &mut m);
        assert_eq!(action.state(), DeauthState::Due);
        assert_eq!(m.recalls, vec![ActionKind::Deauth]);

        assert!(action.call(&l, &ctx(Duration::from_secs(10), &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(
            driver.take(),
            vec![DriverCall::Deauth {
                vif_name: "home-ap-24".to_string(),
                sta: STA,
                reason: DEAUTH_REASON_UNSPECIFIED,
            }]
        );
        assert_eq!(action.state(), DeauthState::Idle);
    }

    #[test]
    fn test_deauth_immediate_without_btm() {
        let mut action = DeauthAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let vifs = vifs(vec![]);
        let links = [link(1, "home-ap-24")];
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);

        // No BTM support means no delay
        assert!(action.call(&l, &ctx(Duration::ZERO, &links, &vifs, false), &mut driver, &mut m));
        assert_eq!(driver.take().len(), 1);
    }

    #[test]
    fn test_deauth_cancelled_when_kick_clears() {
        let mut action = DeauthAction::new(STA);
        let mut driver = MockDriver::new();
        let mut m = RecordingActionMediator::default();
        let vifs = vifs(vec![]);
        let links = [link(1, "home-ap-24")];
        let kick = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);
        let settled = list(&[(1, Preference::Available, 0), (2, Preference::SoftBlocked, 0)]);

        action.call(&kick, &ctx(Duration::ZERO, &links, &vifs, true), &mut driver, &mut m);
        assert!(action.call(&settled, &ctx(Duration::from_secs(2), &links, &vifs, true), &mut driver, &mut m));
        assert_eq!(action.state(), DeauthState::Idle);
        assert_eq!(action.next_deadline(), None);
        assert_eq!(m.idle, vec![ActionKind::Deauth]);
        assert!(driver.take().is_empty());
    }
}
