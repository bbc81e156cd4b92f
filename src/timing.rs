//! Wall-clock stamping for packets in flight.
//!
//! Every packet handed to a viewer, a recorder, or the archive carries the UTC
//! instant it was stamped at rather than any RTP-local timestamp: RTP clocks
//! are per-source and do not survive an RTSP reconnect, but fan-out, rollover,
//! and playback pacing all need a shared wall-clock axis.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stamp `time` onto a packet-shaped value at the current instant.
pub fn now() -> SystemTime {
    SystemTime::now()
}

/// Microseconds since the Unix epoch, saturating to zero for times before it.
pub fn to_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}

/// Inverse of [`to_micros`].
pub fn from_micros(micros: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros)
}

/// Truncate an instant to the start of its containing minute (UTC).
///
/// This is the corrected replacement for the nanosecond-based truncation seen
/// in one archive branch: truncating by `Nanosecond()` leaves the seconds
/// component untouched and does not land on a minute boundary at all.
pub fn truncate_to_minute(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let minute_start = secs - (secs % 60);
    UNIX_EPOCH + Duration::from_secs(minute_start)
}

/// Decimal (non-zero-padded) Y/M/D/H/Min path components for the minute
/// containing `time`, matching the archive's on-disk folder layout.
pub fn minute_path_components(time: SystemTime) -> (i32, u32, u32, u32, u32) {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64;
    civil_from_unix(secs)
}

/// Days-from-epoch civil calendar conversion (Howard Hinnant's algorithm),
/// used to avoid pulling in a full datetime crate for a handful of folder
/// names.
fn civil_from_unix(unix_secs: i64) -> (i32, u32, u32, u32, u32) {
    let days = unix_secs.div_euclid(86_400);
    let rem = unix_secs.rem_euclid(86_400);
    let hour = (rem / 3600) as u32;
    let minute = ((rem % 3600) / 60) as u32;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };

    (y as i32, m, d, hour, minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip() {
        let t = UNIX_EPOCH + Duration::from_micros(1_700_000_123_456);
        assert_eq!(from_micros(to_micros(t)), t);
    }

    #[test]
    fn truncate_zeroes_seconds_and_subseconds() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_075, 500_000_000);
        let truncated = truncate_to_minute(t);
        let secs = truncated.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs % 60, 0);
        assert!(truncated <= t);
    }

    #[test]
    fn minute_path_components_match_known_instant() {
        // 2023-11-14 22:13:20 UTC == 1_700_000_000
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(minute_path_components(t), (2023, 11, 14, 22, 13));
    }
}
