/*
 * This file is part of Hyperfan.
 *
 * Copyright (C) 2025 Hyperfan contributors
 *
 * Hyperfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Hyperfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Hyperfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::time::{Duration, Instant};

/// Repeating timer polled by the owner's loop. It never sleeps itself, so
/// callers decide what "now" is.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    interval: Duration,
    next_due: Instant,
}

impl Timer {
    /// First expiry is one interval after `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self { interval, next_due: now + interval }
    }

    /// Fires on the first poll.
    pub fn immediate(interval: Duration, now: Instant) -> Self {
        Self { interval, next_due: now }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Re-arm if due. Returns whether the timer fired.
    pub fn fire(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        // Missed ticks are dropped, not replayed
        self.next_due = now + self.interval;
        true
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}
