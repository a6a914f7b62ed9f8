//! Scheduling of automatic backups.
//!
//! The scheduler only answers timing questions; the surrounding application
//! decides when to poll it and runs the backup itself.

use chrono::{DateTime, Duration, Utc};

use crate::config::BackupConfig;

/// Tracks when the next automatic backup should run.
pub struct BackupScheduler {
    config: BackupConfig,
    last_run: Option<DateTime<Utc>>,
}

impl BackupScheduler {
    pub fn new(config: BackupConfig) -> Self {
        Self {
            config,
            last_run: None,
        }
    }

    /// Scheduler seeded with the newest stored backup's creation time.
    pub fn with_last_run(config: BackupConfig, last_run: DateTime<Utc>) -> Self {
        Self {
            config,
            last_run: Some(last_run),
        }
    }

    /// When the next automatic backup should run.
    ///
    /// `None` while automatic backups are disabled; a scheduler with no
    /// history is due immediately.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        if !self.config.enabled {
            return None;
        }
        let interval = Duration::hours(self.config.interval_hours as i64);
        Some(match self.last_run {
            None => Utc::now(),
            Some(last) => last + interval,
        })
    }

    /// Whether an automatic backup should run now.
    pub fn is_due(&self) -> bool {
        match self.next_run() {
            Some(next) => next <= Utc::now(),
            None => false,
        }
    }

    /// Time remaining until the next run.
    ///
    /// `None` when disabled or already due.
    pub fn time_until_due(&self) -> Option<Duration> {
        let next = self.next_run()?;
        let now = Utc::now();
        if next > now {
            Some(next - now)
        } else {
            None
        }
    }

    /// Record a completed automatic backup.
    pub fn mark_completed(&mut self) {
        self.last_run = Some(Utc::now());
    }

    pub fn set_last_run(&mut self, time: DateTime<Utc>) {
        self.last_run = Some(time);
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }
}
