// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Step to club support point conversion.
//!
//! The server stays authoritative for totals; these helpers only drive local
//! previews and messages.

use std::num::NonZeroU64;

/// Steps per milestone bonus.
const MILESTONE_STEPS: u64 = 10_000;
/// Bonus points per milestone reached.
const MILESTONE_BONUS: u64 = 5;

/// Converts steps to points with a fixed ratio.
#[derive(Debug, Clone, Copy)]
pub struct PointCalculator {
    ratio: NonZeroU64,
    max_daily_steps: u64,
}

impl PointCalculator {
    pub fn new(ratio: NonZeroU64, max_daily_steps: u64) -> Self {
        Self {
            ratio,
            max_daily_steps,
        }
    }

    pub fn ratio(&self) -> u64 {
        self.ratio.get()
    }

    /// `floor(steps / ratio)`. Callers clamp `steps` first.
    pub fn points(&self, steps: u64) -> u64 {
        steps / self.ratio.get()
    }

    /// Clamp a raw reading into `[0, max_daily_steps]`.
    pub fn clamp(&self, raw_steps: u64) -> u64 {
        raw_steps.min(self.max_daily_steps)
    }

    pub fn within_daily_limit(&self, steps: u64) -> bool {
        steps <= self.max_daily_steps
    }

    /// Steps still needed to earn the next point.
    pub fn steps_for_next_point(&self, steps: u64) -> u64 {
        self.ratio.get() - steps % self.ratio.get()
    }

    /// Extra points: 10% of the base points on weekends, plus a fixed bonus
    /// for each full 10,000 steps.
    pub fn bonus_points(&self, steps: u64, is_weekend: bool) -> u64 {
        let weekend = if is_weekend {
            self.points(steps) / 10
        } else {
            0
        };
        weekend + (steps / MILESTONE_STEPS) * MILESTONE_BONUS
    }

    /// Encouragement shown after a sync.
    pub fn contribution_message(points: u64) -> String {
        match points {
            0 => "Every step counts! Keep walking for your club!".to_string(),
            p if p >= 10 => format!("Amazing! You've earned {} points for your club!", p),
            p if p >= 5 => format!("Great job! {} points added to your club's total!", p),
            p => format!("Nice work! {} points contributed to your club!", p),
        }
    }
}

impl Default for PointCalculator {
    fn default() -> Self {
        Self::new(
            NonZeroU64::new(crate::config::DEFAULT_STEPS_TO_POINTS_RATIO)
                .unwrap_or(NonZeroU64::MIN),
            crate::config::DEFAULT_MAX_DAILY_STEPS,
        )
    }
}
