// Client-initiated steering

//! Client steering
//!
//! A controller can ask for a station to be kept on a local band (`home`)
//! or pushed off every local BSS (`away`) for an enforcement period.
//! Steering is expressed as a pair of BSS filters on the station's policy
//! stack; this module decides which filters apply and which state to
//! report back.

use super::entities::{CsBand, CsMode};
use crate::candidate::Preference;
use crate::policy::bss_filter::BssFilterConfig;
use crate::timer::Timer;
use crate::types::{Band, Channel, MacAddr};
use std::fmt;
use std::time::Duration;

/// Client steering state reported back to configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsState {
    Init,
    None,
    Steering,
    Expired,
    Failed,
}

impl CsState {
    pub fn as_str(self) -> &'static str {
        match self {
            CsState::Init => "init",
            CsState::None => "none",
            CsState::Steering => "steering",
            CsState::Expired => "expired",
            CsState::Failed => "failed",
        }
    }
}

impl fmt::Display for CsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter configs to apply and the state to report, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsUpdate {
    pub allow: Option<BssFilterConfig>,
    pub deny: Option<BssFilterConfig>,
    pub report: Option<CsState>,
}

impl CsUpdate {
    fn cleared(report: Option<CsState>) -> Self {
        Self {
            allow: None,
            deny: None,
            report,
        }
    }
}

fn is_5gl(c: &Channel) -> bool {
    (5180..5500).contains(&c.control_freq_mhz)
}

fn is_5gu(c: &Channel) -> bool {
    (5500..=5885).contains(&c.control_freq_mhz)
}

fn band_matches(band: CsBand, c: &Channel) -> bool {
    match band {
        CsBand::Band2G => c.band() == Some(Band::Band2G),
        CsBand::Band5G => c.band() == Some(Band::Band5G),
        CsBand::Band5GL => c.band() == Some(Band::Band5G) && is_5gl(c),
        CsBand::Band5GU => c.band() == Some(Band::Band5G) && is_5gu(c),
        CsBand::Band6G => c.band() == Some(Band::Band6G),
    }
}

/// Inputs of one client steering evaluation
pub struct CsInput<'a> {
    pub mode: Option<CsMode>,
    pub band: Option<CsBand>,
    pub enforce_period_secs: Option<u32>,
    /// Local BSSes of the station's group
    pub local_bsses: &'a [(MacAddr, Option<Channel>)],
}

pub struct ClientSteering {
    sta: MacAddr,
    timer: Timer,
}

impl ClientSteering {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            timer: Timer::new(),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timer.deadline()
    }

    /// Evaluate after the client's steering mode changed. `None` leaves
    /// the current filters in place.
    pub fn recalc(&mut self, input: &CsInput, now: Duration) -> Option<CsUpdate> {
        match input.mode.unwrap_or(CsMode::Off) {
            CsMode::Off => Some(self.stop()),
            CsMode::Home => self.start_inbound(input, now),
            CsMode::Away => self.start_outbound(input, now),
        }
    }

    /// Enforcement period is over
    pub fn on_timer(&mut self, now: Duration) -> Option<CsUpdate> {
        if !self.timer.fire(now) {
            return None;
        }
        log::info!("Sta {}: client steering timer expired", self.sta);
        Some(CsUpdate::cleared(Some(CsState::Expired)))
    }

    /// Drop any steering in progress without reporting
    pub fn clear(&mut self) -> CsUpdate {
        self.timer.disarm();
        CsUpdate::cleared(None)
    }

    fn stop(&mut self) -> CsUpdate {
        let was_in_progress = self.in_progress();
        self.timer.disarm();
        log::info!("Sta {}: stopped client steering", self.sta);
        // An expired steering already reported its state
        CsUpdate::cleared(was_in_progress.then_some(CsState::None))
    }

    fn start_inbound(&mut self, input: &CsInput, now: Duration) -> Option<CsUpdate> {
        if self.in_progress() {
            log::warn!(
                "Sta {}: cannot start inbound client steering, steering already in progress",
                self.sta
            );
            return None;
        }
        let Some(band) = input.band else {
            log::warn!("Sta {}: cannot start inbound client steering, undefined band", self.sta);
            return None;
        };
        let Some(period) = input.enforce_period_secs else {
            log::warn!(
                "Sta {}: cannot start inbound client steering, no enforce period",
                self.sta
            );
            return None;
        };

        let bssids: Vec<MacAddr> = input
            .local_bsses
            .iter()
            .filter(|(_, c)| c.as_ref().is_some_and(|c| band_matches(band, c)))
            .map(|(bssid, _)| *bssid)
            .collect();
        if bssids.is_empty() {
            log::warn!(
                "Sta {}: cannot start inbound client steering, no {} bss found",
                self.sta,
                band
            );
            return Some(CsUpdate::cleared(Some(CsState::Failed)));
        }

        self.timer.arm_at(now + Duration::from_secs(u64::from(period)));
        log::info!("Sta {}: started inbound client steering to {}", self.sta, band);
        Some(CsUpdate {
            allow: Some(BssFilterConfig {
                included_preference: Some(Preference::Available),
                excluded_preference: None,
                bssids: bssids.clone(),
            }),
            deny: Some(BssFilterConfig {
                included_preference: None,
                excluded_preference: Some(Preference::SoftBlocked),
                bssids,
            }),
            report: Some(CsState::Steering),
        })
    }

    fn start_outbound(&mut self, input: &CsInput, now: Duration) -> Option<CsUpdate> {
        if self.in_progress() {
            log::warn!(
                "Sta {}: cannot start outbound client steering, steering already in progress",
                self.sta
            );
            return None;
        }
        let Some(period) = input.enforce_period_secs else {
            log::warn!(
                "Sta {}: cannot start outbound client steering, no enforce period",
                self.sta
            );
            return None;
        };

        self.timer.arm_at(now + Duration::from_secs(u64::from(period)));
        log::info!("Sta {}: started outbound client steering", self.sta);
        Some(CsUpdate {
            allow: None,
            deny: Some(BssFilterConfig {
                included_preference: Some(Preference::SoftBlocked),
                excluded_preference: None,
                bssids: input.local_bsses.iter().map(|(bssid, _)| *bssid).collect(),
            }),
            report: Some(CsState::Steering),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::{mac, STA};

    fn bsses() -> Vec<(MacAddr, Option<Channel>)> {
        vec![
            (mac(1), Some(Channel::new_20mhz(2412))),
            (mac(2), Some(Channel::new_20mhz(5180))),
            (mac(3), Some(Channel::new_20mhz(5745))),
        ]
    }

    fn input(mode: CsMode, band: Option<CsBand>, bsses: &[(MacAddr, Option<Channel>)]) -> CsInput<'_> {
        CsInput {
            mode: Some(mode),
            band,
            enforce_period_secs: Some(30),
            local_bsses: bsses,
        }
    }

    #[test]
    fn test_home_allows_requested_band() {
        let mut cs = ClientSteering::new(STA);
        let bsses = bsses();

        let update = cs.recalc(&input(CsMode::Home, Some(CsBand::Band5GU), &bsses), Duration::ZERO);
        let Some(update) = update else {
            panic!("expected an update");
        };
        assert_eq!(update.report, Some(CsState::Steering));
        assert_eq!(update.allow.map(|c| c.bssids), Some(vec![mac(3)]));
        assert_eq!(
            update.deny.map(|c| c.excluded_preference),
            Some(Some(Preference::SoftBlocked))
        );
        assert_eq!(cs.next_deadline(), Some(Duration::from_secs(30)));

        // Already in progress: nothing to do
        assert_eq!(cs.recalc(&input(CsMode::Home, Some(CsBand::Band2G), &bsses), Duration::ZERO), None);
    }

    #[test]
    fn test_home_without_matching_bss_fails() {
        let mut cs = ClientSteering::new(STA);
        let bsses = bsses();
        let update = cs.recalc(&input(CsMode::Home, Some(CsBand::Band6G), &bsses), Duration::ZERO);
        assert_eq!(update.and_then(|u| u.report), Some(CsState::Failed));
        assert!(!cs.in_progress());
    }

    #[test]
    fn test_away_then_expiry() {
        let mut cs = ClientSteering::new(STA);
        let bsses = bsses();
        let update = cs.recalc(&input(CsMode::Away, None, &bsses), Duration::ZERO);
        let deny = update.and_then(|u| u.deny).map(|c| c.bssids);
        assert_eq!(deny, Some(vec![mac(1), mac(2), mac(3)]));

        assert_eq!(cs.on_timer(Duration::from_secs(29)), None);
        let expired = cs.on_timer(Duration::from_secs(30));
        assert_eq!(expired.and_then(|u| u.report), Some(CsState::Expired));

        // Turning it off after expiry reports nothing new
        let off = cs.recalc(&input(CsMode::Off, None, &bsses), Duration::from_secs(31));
        assert_eq!(off.map(|u| u.report), Some(None));
    }

    #[test]
    fn test_off_while_steering_reports_none() {
        let mut cs = ClientSteering::new(STA);
        let bsses = bsses();
        cs.recalc(&input(CsMode::Away, None, &bsses), Duration::ZERO);
        let off = cs.recalc(&input(CsMode::Off, None, &bsses), Duration::from_secs(1));
        assert_eq!(off.and_then(|u| u.report), Some(CsState::None));
        assert!(!cs.in_progress());
    }
}
