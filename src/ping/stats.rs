//! Per-session ping statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Counters and round-trip-time aggregates for one ping session.
///
/// Counters only ever grow; `rtt_min`/`rtt_max` tighten monotonically and
/// `rtt_avg` is recomputed on every reply. Callers receive clones via
/// [`snapshot`](Self::snapshot), never a live reference, so readers cannot
/// observe partial updates. `lost + received + errors == sent` holds once
/// [`finalize`](Self::finalize) has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingStats {
    pub destination: Ipv4Addr,
    pub sent: u32,
    pub received: u32,
    pub lost: u32,
    pub errors: u32,

    /// Minimum RTT, set on the first reply
    #[serde(with = "opt_duration_micros")]
    pub rtt_min: Option<Duration>,
    #[serde(with = "duration_micros")]
    pub rtt_max: Duration,
    #[serde(with = "duration_micros")]
    pub rtt_sum: Duration,
    #[serde(with = "duration_micros")]
    pub rtt_avg: Duration,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl PingStats {
    pub fn new(destination: Ipv4Addr) -> Self {
        Self {
            destination,
            sent: 0,
            received: 0,
            lost: 0,
            errors: 0,
            rtt_min: None,
            rtt_max: Duration::ZERO,
            rtt_sum: Duration::ZERO,
            rtt_avg: Duration::ZERO,
            started_at: Utc::now(),
            ended_at: None,
            active: true,
        }
    }

    pub fn record_sent(&mut self) {
        self.sent = self.sent.saturating_add(1);
    }

    /// Record a matched reply and fold its RTT into min/max/sum/avg.
    pub fn record_reply(&mut self, rtt: Duration) {
        self.received = self.received.saturating_add(1);
        self.rtt_sum = self.rtt_sum.saturating_add(rtt);

        self.rtt_min = Some(match self.rtt_min {
            Some(min) if min <= rtt => min,
            _ => rtt,
        });
        if rtt > self.rtt_max {
            self.rtt_max = rtt;
        }
        self.rtt_avg = self.rtt_sum / self.received;
    }

    /// Record an inbound error message correlated to one of our requests.
    pub fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    /// Record a request whose deadline elapsed without a reply.
    pub fn record_lost(&mut self) {
        self.lost = self.lost.saturating_add(1);
    }

    /// Stamp the end time and clear the active flag.
    pub fn finalize(&mut self) {
        self.ended_at = Some(Utc::now());
        self.active = false;
    }

    /// Immutable copy for callers.
    pub fn snapshot(&self) -> PingStats {
        self.clone()
    }

    /// Loss percentage over everything sent.
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - (self.received as f64 / self.sent as f64)) * 100.0
        }
    }
}

impl fmt::Display for PingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ping statistics ---", self.destination)?;
        write!(
            f,
            "{} packets transmitted, {} received, {} errors, {:.1}% packet loss",
            self.sent,
            self.received,
            self.errors,
            self.loss_pct()
        )?;
        if let Some(min) = self.rtt_min {
            write!(
                f,
                "\nrtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
                min.as_secs_f64() * 1000.0,
                self.rtt_avg.as_secs_f64() * 1000.0,
                self.rtt_max.as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }
}

/// Serde helper for Duration as microseconds
mod duration_micros {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_micros() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

/// Serde helper for Option<Duration> as microseconds
mod opt_duration_micros {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_micros() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = Option::<u64>::deserialize(deserializer)?;
        Ok(micros.map(Duration::from_micros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 1)
    }

    #[test]
    fn test_initial_state() {
        let stats = PingStats::new(dest());
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.rtt_min, None);
        assert_eq!(stats.rtt_max, Duration::ZERO);
        assert!(stats.active);
        assert!(stats.ended_at.is_none());
    }

    #[test]
    fn test_rtt_aggregates() {
        let mut stats = PingStats::new(dest());
        stats.record_sent();
        stats.record_reply(Duration::from_millis(10));
        stats.record_sent();
        stats.record_reply(Duration::from_millis(30));
        stats.record_sent();
        stats.record_reply(Duration::from_millis(20));

        assert_eq!(stats.rtt_min, Some(Duration::from_millis(10)));
        assert_eq!(stats.rtt_max, Duration::from_millis(30));
        assert_eq!(stats.rtt_sum, Duration::from_millis(60));
        assert_eq!(stats.rtt_avg, Duration::from_millis(20));
        assert!(stats.rtt_min.unwrap() <= stats.rtt_avg);
        assert!(stats.rtt_avg <= stats.rtt_max);
    }

    #[test]
    fn test_min_never_rises_max_never_falls() {
        let mut stats = PingStats::new(dest());
        stats.record_reply(Duration::from_millis(20));
        stats.record_reply(Duration::from_millis(50));
        stats.record_reply(Duration::from_millis(35));

        assert_eq!(stats.rtt_min, Some(Duration::from_millis(20)));
        assert_eq!(stats.rtt_max, Duration::from_millis(50));
    }

    #[test]
    fn test_accounting_invariant_after_finalize() {
        let mut stats = PingStats::new(dest());
        for _ in 0..6 {
            stats.record_sent();
        }
        stats.record_reply(Duration::from_millis(5));
        stats.record_reply(Duration::from_millis(6));
        stats.record_reply(Duration::from_millis(7));
        stats.record_error();
        stats.record_lost();
        stats.record_lost();
        stats.finalize();

        assert_eq!(stats.lost + stats.received + stats.errors, stats.sent);
        assert!(!stats.active);
        assert!(stats.ended_at.is_some());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut stats = PingStats::new(dest());
        stats.record_sent();
        let snap = stats.snapshot();
        stats.record_sent();

        assert_eq!(snap.sent, 1);
        assert_eq!(stats.sent, 2);
    }

    #[test]
    fn test_loss_pct() {
        let mut stats = PingStats::new(dest());
        assert_eq!(stats.loss_pct(), 0.0);

        for _ in 0..4 {
            stats.record_sent();
        }
        stats.record_reply(Duration::from_millis(1));
        stats.record_reply(Duration::from_millis(1));
        stats.record_reply(Duration::from_millis(1));
        stats.record_lost();
        assert!((stats.loss_pct() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut stats = PingStats::new(dest());
        stats.record_sent();
        stats.record_reply(Duration::from_millis(12));
        stats.finalize();

        let json = serde_json::to_string(&stats).unwrap();
        let restored: PingStats = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.destination, stats.destination);
        assert_eq!(restored.received, 1);
        assert_eq!(restored.rtt_min, Some(Duration::from_millis(12)));
        assert!(!restored.active);
    }

    #[test]
    fn test_display_without_replies_omits_rtt_line() {
        let mut stats = PingStats::new(dest());
        stats.record_sent();
        stats.record_lost();
        let text = stats.to_string();
        assert!(text.contains("1 packets transmitted"));
        assert!(!text.contains("rtt min"));
    }
}
