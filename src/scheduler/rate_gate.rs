//! Per-destination throughput limiting
//!
//! A destination is admitted when both hold:
//!
//! 1. its effective cadence (override, else global) has elapsed since its
//!    last logged delivery, and
//! 2. fewer than its daily cap deliveries were logged in the trailing 24 hours.
//!
//! Denials are skip decisions, never errors.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::models::PeerId;
use crate::storage::DistributionState;

/// Daily cap applied when a destination has no override
pub const DEFAULT_DAILY_CAP: u32 = 48;

/// Verdict for one destination at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,

    /// Cadence has not elapsed yet
    CadencePending { ready_at: DateTime<Utc> },

    /// Trailing 24h count reached the cap
    DailyCapReached { sent: usize, cap: u32 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Short label used for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::CadencePending { .. } => "cadence",
            Self::DailyCapReached { .. } => "daily_cap",
        }
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admitted => write!(f, "ready"),
            Self::CadencePending { ready_at } => {
                write!(f, "next at {}", ready_at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            Self::DailyCapReached { sent, cap } => write!(f, "daily cap reached ({sent}/{cap})"),
        }
    }
}

/// Cadence and daily-cap gate
#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    default_daily_cap: u32,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_CAP)
    }
}

impl RateGate {
    pub fn new(default_daily_cap: u32) -> Self {
        Self {
            default_daily_cap: default_daily_cap.max(1),
        }
    }

    pub fn default_daily_cap(&self) -> u32 {
        self.default_daily_cap
    }

    /// Evaluate a destination against the logged activity
    pub fn check(&self, state: &DistributionState, destination: PeerId, now: DateTime<Utc>) -> Admission {
        let cadence = Duration::minutes(i64::from(state.effective_cadence(destination)));
        if let Some(last) = state.last_sent(destination) {
            let ready_at = last + cadence;
            if now < ready_at {
                return Admission::CadencePending { ready_at };
            }
        }

        let cap = state.daily_cap(destination, self.default_daily_cap);
        let sent = state.sends_since(destination, now - Duration::hours(24));
        if sent >= cap as usize {
            return Admission::DailyCapReached { sent, cap };
        }

        Admission::Admitted
    }

    pub fn admit(&self, state: &DistributionState, destination: PeerId, now: DateTime<Utc>) -> bool {
        self.check(state, destination, now).is_admitted()
    }
}
