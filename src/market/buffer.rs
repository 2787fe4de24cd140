//! Sliding candle buffer for the live driver.
//!
//! Exchanges re-send the currently forming bar on every poll; the buffer
//! upserts on matching timestamp so the forming bar converges to its final
//! values, and evicts from the front once capacity is reached.

use std::collections::VecDeque;

use super::Candle;

/// Bounded, timestamp-ordered candle window with upsert semantics.
#[derive(Debug)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert or replace a candle.
    ///
    /// Equal timestamp replaces in place; a newer timestamp appends (evicting
    /// the oldest at capacity); an older-than-tail timestamp is ignored, so a
    /// delayed poll response cannot re-order the window.
    pub fn upsert(&mut self, candle: Candle) {
        let tail_ts = self.candles.back().map(|c| c.timestamp);
        match tail_ts {
            None => self.candles.push_back(candle),
            Some(ts) if candle.timestamp == ts => {
                *self.candles.back_mut().expect("non-empty buffer") = candle;
            }
            Some(ts) if candle.timestamp > ts => {
                if self.candles.len() == self.capacity {
                    self.candles.pop_front();
                }
                self.candles.push_back(candle);
            }
            Some(_) => {
                // Out-of-order candle older than the tail. If it matches an
                // existing bar, refresh it; otherwise drop it.
                if let Some(slot) = self
                    .candles
                    .iter_mut()
                    .find(|c| c.timestamp == candle.timestamp)
                {
                    *slot = candle;
                }
            }
        }
    }

    /// Bulk upsert, oldest first.
    pub fn extend(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.upsert(candle);
        }
    }

    /// Contiguous snapshot of the window, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// Candles fully closed at `now_ms`, oldest first.
    #[must_use]
    pub fn closed_at(&self, now_ms: i64) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.is_closed_at(now_ms))
            .cloned()
            .collect()
    }

    /// Most recent candle closed at `now_ms`.
    #[must_use]
    pub fn last_closed_at(&self, now_ms: i64) -> Option<&Candle> {
        self.candles.iter().rev().find(|c| c.is_closed_at(now_ms))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Timeframe;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, close: rust_decimal::Decimal) -> Candle {
        Candle {
            timestamp: ts,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            taker_buy_volume: None,
        }
    }

    #[test]
    fn upsert_replaces_matching_timestamp() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert(candle(60_000, dec!(100)));
        buf.upsert(candle(60_000, dec!(101)));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.snapshot()[0].close, dec!(101));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut buf = CandleBuffer::new(3);
        for i in 0..5 {
            buf.upsert(candle(i * 60_000, dec!(1)));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot()[0].timestamp, 2 * 60_000);
    }

    #[test]
    fn stale_candle_does_not_reorder() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert(candle(120_000, dec!(2)));
        buf.upsert(candle(60_000, dec!(1)));
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].timestamp, 120_000);
    }

    #[test]
    fn stale_candle_refreshes_existing_bar() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert(candle(60_000, dec!(1)));
        buf.upsert(candle(120_000, dec!(2)));
        buf.upsert(candle(60_000, dec!(9)));
        let snap = buf.snapshot();
        assert_eq!(snap[0].close, dec!(9));
        assert_eq!(snap[1].close, dec!(2));
    }

    #[test]
    fn closed_filter_excludes_forming_bar() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert(candle(0, dec!(1)));
        buf.upsert(candle(60_000, dec!(2)));
        // at t=60s only the first 1m bar has closed
        let closed = buf.closed_at(60_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].timestamp, 0);
        assert_eq!(buf.last_closed_at(120_000).unwrap().timestamp, 60_000);
    }
}
