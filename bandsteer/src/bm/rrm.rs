// Post-connect RRM scan

//! RRM scan
//!
//! After a station connects it may be asked for beacon reports on the
//! group's other-band BSSes, so the assessor has measurements to work
//! with. Requests go out one at a time: the first a little after connect,
//! the rest spaced by a short delay.

use crate::executor::{BeaconReportRequest, Driver};
use crate::timer::Timer;
use crate::types::MacAddr;
use std::collections::VecDeque;
use std::time::Duration;

/// Delay between connect and the first request
pub const RRM_AFTER_CONNECT_DELAY: Duration = Duration::from_secs(5);

/// Delay between consecutive requests
pub const RRM_REQUEST_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrmTarget {
    pub op_class: u8,
    pub channel: u8,
}

pub struct RrmScan {
    sta: MacAddr,
    vif_name: String,
    ssid: String,
    queue: VecDeque<RrmTarget>,
    timer: Timer,
    /// Set once the scan was started on the current link
    done: bool,
}

impl RrmScan {
    pub fn new(sta: MacAddr, vif_name: &str, ssid: &str) -> Self {
        Self {
            sta,
            vif_name: vif_name.to_string(),
            ssid: ssid.to_string(),
            queue: VecDeque::new(),
            timer: Timer::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue requests for `targets` and arm the first one
    pub fn start(&mut self, targets: Vec<RrmTarget>, now: Duration) {
        self.done = true;
        self.queue.clear();
        for t in targets {
            if !self.queue.contains(&t) {
                self.queue.push_back(t);
            }
        }
        if self.queue.is_empty() {
            log::debug!("Sta {}: no rrm targets on {}", self.sta, self.vif_name);
            return;
        }
        log::debug!(
            "Sta {}: {} rrm request(s) queued on {}",
            self.sta,
            self.queue.len(),
            self.vif_name
        );
        self.timer.arm_at(now + RRM_AFTER_CONNECT_DELAY);
    }

    pub fn on_timer(&mut self, now: Duration, driver: &mut dyn Driver) {
        if !self.timer.fire(now) {
            return;
        }
        let Some(target) = self.queue.pop_front() else {
            return;
        };
        let req = BeaconReportRequest {
            sta: self.sta,
            vif_name: self.vif_name.clone(),
            op_class: target.op_class,
            channel: target.channel,
            ssid: self.ssid.clone(),
        };
        match driver.request_beacon_report(&req) {
            Ok(()) => log::info!(
                "Sta {}: beacon report request on {} for op class {} channel {}",
                self.sta,
                self.vif_name,
                req.op_class,
                req.channel
            ),
            Err(e) => log::warn!("Sta {}: failed to request beacon report: {}", self.sta, e),
        }
        if !self.queue.is_empty() {
            self.timer.arm_at(now + RRM_REQUEST_DELAY);
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timer.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{DriverCall, MockDriver, STA};

    #[test]
    fn test_requests_are_spaced() {
        let mut scan = RrmScan::new(STA, "home-ap-24", "home");
        let mut driver = MockDriver::new();
        scan.start(
            vec![
                RrmTarget { op_class: 115, channel: 36 },
                RrmTarget { op_class: 115, channel: 36 },
                RrmTarget { op_class: 131, channel: 5 },
            ],
            Duration::ZERO,
        );
        // Duplicates collapse
        assert_eq!(scan.pending(), 2);
        assert_eq!(scan.next_deadline(), Some(RRM_AFTER_CONNECT_DELAY));

        scan.on_timer(Duration::from_secs(4), &mut driver);
        assert!(driver.take().is_empty());

        scan.on_timer(Duration::from_secs(5), &mut driver);
        let calls = driver.take();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], DriverCall::BeaconReport(r) if r.channel == 36 && r.ssid == "home"));
        assert_eq!(scan.next_deadline(), Some(Duration::from_secs(6)));

        scan.on_timer(Duration::from_secs(6), &mut driver);
        assert_eq!(driver.take().len(), 1);
        assert_eq!(scan.next_deadline(), None);
    }

    #[test]
    fn test_empty_scan_stays_idle() {
        let mut scan = RrmScan::new(STA, "home-ap-24", "home");
        scan.start(Vec::new(), Duration::ZERO);
        assert!(scan.is_done());
        assert_eq!(scan.next_deadline(), None);
    }
}
