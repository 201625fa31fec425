//! Shared game clock.
//!
//! The server sends its clock in microseconds, pushed forward by half the
//! measured lag so the value is roughly current on arrival. Receivers keep a
//! short window of `(sent, received)` pairs and derive a rate and offset from
//! it; a window that disagrees too much with a new sample is thrown away.

use std::collections::VecDeque;

use crate::message::NetMessage;
use crate::pack::Unpacker;

pub const MAX_LAG_SECS: f64 = 10.0;
pub const WINDOW_LEN: usize = 20;
pub const MAX_DRIFT_US: i64 = 5_000_000;
pub const MIN_RATE: f64 = 0.5;
pub const MAX_RATE: f64 = 2.0;

/// Packs `now_us` plus half of `lag_secs`, clamped to `[0, 10]` seconds, as
/// two `u32` halves, high half first.
pub fn pack_game_time(message: &mut NetMessage, now_us: i64, lag_secs: f64) {
    let lag = if lag_secs.is_finite() {
        lag_secs.clamp(0.0, MAX_LAG_SECS)
    } else {
        0.0
    };
    let net_time = now_us.saturating_add((lag * 0.5 * 1.0e6) as i64) as u64;
    message.pack_u32((net_time >> 32) as u32);
    message.pack_u32(net_time as u32);
}

pub fn unpack_game_time(reader: &mut Unpacker<'_>) -> i64 {
    let msb = reader.unpack_u32() as u64;
    let lsb = reader.unpack_u32() as u64;
    ((msb << 32) | lsb) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeRecord {
    net_us: i64,
    local_us: i64,
}

#[derive(Debug, Clone)]
pub struct GameClock {
    records: VecDeque<TimeRecord>,
    rate: f64,
    resets: u64,
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GameClock {
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(WINDOW_LEN),
            rate: 1.0,
            resets: 0,
        }
    }

    pub fn is_synced(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn records(&self) -> usize {
        self.records.len()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.rate = 1.0;
    }

    /// Game time at a local instant, or the local time itself before the
    /// first sample.
    pub fn game_time_at(&self, local_us: i64) -> i64 {
        match self.records.back() {
            Some(last) => {
                let elapsed = local_us.saturating_sub(last.local_us) as f64;
                last.net_us.saturating_add((elapsed * self.rate) as i64)
            }
            None => local_us,
        }
    }

    pub fn update(&mut self, net_us: i64, local_us: i64) {
        if self.is_synced() {
            let drift = self.game_time_at(local_us).abs_diff(net_us);
            if drift > MAX_DRIFT_US.unsigned_abs() {
                log::debug!("game clock drifted {drift}us, resetting");
                self.reset();
                self.resets += 1;
            }
        }

        if self.records.len() == WINDOW_LEN {
            self.records.pop_front();
        }
        self.records.push_back(TimeRecord { net_us, local_us });
        self.recompute_rate();
    }

    fn recompute_rate(&mut self) {
        let (Some(first), Some(last)) = (self.records.front(), self.records.back()) else {
            return;
        };
        let local_span = last.local_us.saturating_sub(first.local_us);
        if local_span <= 0 {
            return;
        }

        let rate = (last.net_us as f64 - first.net_us as f64) / local_span as f64;
        if (MIN_RATE..=MAX_RATE).contains(&rate) {
            self.rate = rate;
        } else {
            log::debug!("game clock rate {rate:.3} out of range, resetting");
            let last = *last;
            self.reset();
            self.resets += 1;
            self.records.push_back(last);
        }
    }
}
