//! Daily reconciliation of the device clock against the host clock.

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, info, warn};

use crate::device::{release, DeviceError, HeatPumpConnector, HeatPumpSession};

/// Minute-of-day trigger: hour 0, minute 0.
const TRIGGER_HOUR: u32 = 0;
const TRIGGER_MINUTE: u32 = 0;

/// Compares the device clock to the host clock once per day and corrects
/// drift. Runs out-of-band from the poll cycle on the same scheduler tick.
pub struct ClockReconciler<C> {
    connector: Arc<C>,
    last_run: Option<NaiveDate>,
    host_clock: fn() -> NaiveDateTime,
}

impl<C: HeatPumpConnector> ClockReconciler<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self::with_host_clock(connector, || Local::now().naive_local())
    }

    /// Use an explicit host clock source instead of the wall clock.
    pub fn with_host_clock(connector: Arc<C>, host_clock: fn() -> NaiveDateTime) -> Self {
        Self {
            connector,
            last_run: None,
            host_clock,
        }
    }

    /// Whether the reconciliation should fire at `now`. Records the trigger
    /// day, so multiple ticks within the trigger minute fire exactly once.
    pub fn due(&mut self, now: NaiveDateTime) -> bool {
        if now.hour() != TRIGGER_HOUR || now.minute() != TRIGGER_MINUTE {
            return false;
        }
        let today = now.date();
        if self.last_run == Some(today) {
            return false;
        }
        self.last_run = Some(today);
        true
    }

    /// Run the clock check if the trigger minute has been reached.
    ///
    /// Device errors are logged and swallowed; this path never terminates
    /// the process.
    pub async fn reconcile_if_due(&mut self, now: NaiveDateTime) {
        if !self.due(now) {
            return;
        }
        if let Err(err) = self.reconcile().await {
            warn!(error = %err, "device clock reconciliation failed");
        }
    }

    async fn reconcile(&self) -> Result<(), DeviceError> {
        let mut session = self.connector.open().await?;

        let result = async {
            session.login().await?;

            let (device_time, _weekday) = session.get_date_time().await?;

            // Sampled after the device round-trip, so session setup latency
            // does not count as drift.
            let host_now = (self.host_clock)();
            let host_now = host_now.with_nanosecond(0).unwrap_or(host_now);
            debug!(device = %device_time, host = %host_now, "clock comparison");

            let drift = device_time - host_now;

            if drift.is_zero() {
                info!("device clock matches host clock");
            } else {
                let total = drift.num_seconds().unsigned_abs();
                let direction = if drift.num_seconds() < 0 {
                    "behind"
                } else {
                    "ahead of"
                };
                warn!(
                    minutes = total / 60,
                    seconds = total % 60,
                    "device clock is {} the host clock",
                    direction
                );

                session.set_date_time_now().await?;
                info!("set device clock to current host time");
            }

            Ok(())
        }
        .await;

        release(session).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialConnector;
    use chrono::NaiveDate;

    fn reconciler() -> ClockReconciler<SerialConnector> {
        // The connector is never opened by `due`.
        ClockReconciler::new(Arc::new(SerialConnector::new(
            "/dev/null",
            115200,
            std::time::Duration::from_millis(10),
            0,
        )))
    }

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn test_due_only_at_midnight_minute() {
        let mut clock = reconciler();
        assert!(!clock.due(at(2024, 3, 1, 0, 1)));
        assert!(!clock.due(at(2024, 3, 1, 12, 0)));
        assert!(clock.due(at(2024, 3, 1, 0, 0)));
    }

    #[test]
    fn test_due_at_most_once_per_day() {
        let mut clock = reconciler();
        // The loop tick can fire more than once within the trigger minute.
        assert!(clock.due(at(2024, 3, 1, 0, 0)));
        assert!(!clock.due(at(2024, 3, 1, 0, 0)));
        assert!(!clock.due(at(2024, 3, 1, 0, 0)));
        // Next calendar day fires again.
        assert!(clock.due(at(2024, 3, 2, 0, 0)));
    }
}
