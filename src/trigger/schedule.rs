// src/trigger/schedule.rs

//! Calendar schedules for `Cron` triggers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::{PipedagError, Result};
use crate::trigger::FireReason;
use crate::trigger::supervisor::SupervisorHandle;

/// A parsed cron expression.
///
/// Accepts the classic 5-field form (`min hour dom mon dow`) as well as the
/// 6/7-field form with seconds (and optional year) understood by the `cron`
/// crate. A 5-field expression fires at second zero.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalised = normalise(expression);
        let schedule =
            Schedule::from_str(&normalised).map_err(|e| PipedagError::InvalidSchedule {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as written by the user.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Next fire time once `last_fired` has fired.
    ///
    /// A timer can wake before the wall clock reaches the fire time; counting
    /// from `last_fired` in that case keeps the same time from firing twice.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let from = last_fired.map_or(now, |last| now.max(last));
        self.next_after(from)
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }
}

fn normalise(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Sleep until each fire time of `schedule` and fire the pipeline behind
/// `handle`. Stops when the schedule is exhausted or the supervisor is gone.
pub fn spawn_cron_ticker(schedule: CronSchedule, handle: SupervisorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pipeline = handle.pipeline().to_string();
        info!(pipeline = %pipeline, cron = %schedule.expression(), "cron ticker started");

        let mut last_fired = None;
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_fire(now, last_fired) else {
                info!(pipeline = %pipeline, "cron schedule has no further fire times");
                break;
            };

            debug!(pipeline = %pipeline, next = %next, "waiting for next scheduled fire");
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            last_fired = Some(next);

            if handle.fire(FireReason::Schedule).is_err() {
                debug!(pipeline = %pipeline, "supervisor gone; stopping cron ticker");
                break;
            }
        }
    })
}
