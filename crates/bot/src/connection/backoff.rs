//! Reconnect policy: per-cause delays and the exponential fallback.

use std::time::Duration;

use herald_transport::DisconnectReason;

/// Attempts before the supervisor wipes credentials and cools off.
pub const MAX_ATTEMPTS: u32 = 10;
/// Cool-off after exhausting the attempt budget.
pub const EXHAUSTED_WAIT: Duration = Duration::from_secs(3 * 60);
/// Library connect deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
/// Library keep-alive cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const EXP_BASE: Duration = Duration::from_secs(3);
const EXP_CAP: Duration = Duration::from_secs(45);

/// Reconnect delay for a classified close.
pub fn delay_for(reason: DisconnectReason) -> Duration {
    let ms = match reason {
        DisconnectReason::BadSession => 15_000,
        DisconnectReason::ConnectionClosed => 10_000,
        DisconnectReason::ConnectionLost => 15_000,
        DisconnectReason::ConnectionReplaced => 60_000,
        DisconnectReason::LoggedOut => 20_000,
        DisconnectReason::RestartRequired => 10_000,
        DisconnectReason::TimedOut => 20_000,
        DisconnectReason::Unknown => 15_000,
    };
    Duration::from_millis(ms)
}

/// Exponential backoff for connect attempts that fail before the library
/// reports a close reason: 3 s base, ×1.5 per attempt, capped at 45 s.
pub fn exponential(attempt: u32) -> Duration {
    let mut delay = EXP_BASE.as_secs_f64();
    for _ in 1..attempt {
        delay *= 1.5;
        if delay >= EXP_CAP.as_secs_f64() {
            return EXP_CAP;
        }
    }
    Duration::from_secs_f64(delay.min(EXP_CAP.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_table() {
        assert_eq!(delay_for(DisconnectReason::BadSession), Duration::from_secs(15));
        assert_eq!(delay_for(DisconnectReason::ConnectionClosed), Duration::from_secs(10));
        assert_eq!(delay_for(DisconnectReason::ConnectionReplaced), Duration::from_secs(60));
        assert_eq!(delay_for(DisconnectReason::LoggedOut), Duration::from_secs(20));
        assert_eq!(delay_for(DisconnectReason::Unknown), Duration::from_secs(15));
    }

    #[test]
    fn exponential_grows_and_caps() {
        assert_eq!(exponential(1), Duration::from_secs(3));
        assert_eq!(exponential(2), Duration::from_secs_f64(4.5));
        assert!(exponential(3) > exponential(2));
        assert_eq!(exponential(20), Duration::from_secs(45));
    }
}
