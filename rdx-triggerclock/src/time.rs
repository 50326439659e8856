//! The time domain: trigger values and the absolute-time codec.
//!
//! Absolute times are signed offsets from a fixed epoch,
//! 2000-01-01T00:00:00Z, split into whole seconds and a nanosecond remainder
//! in `[0, 1e9)`. Instants before the epoch carry negative seconds with a
//! positive remainder, so `-0.5s` is `(-1, 500_000_000)`.

use crate::common::EventSource;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp of the absolute-time epoch, 2000-01-01T00:00:00Z.
pub const EPOCH_UNIX_SECONDS: i64 = 946_684_800;

/// Nanoseconds in one second.
pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A point on the shared epoch-relative clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbsoluteTime {
    /// Whole seconds since the epoch. Negative before the epoch.
    pub seconds: i64,
    /// Nanosecond remainder, always in `[0, 1e9)` once normalized.
    pub nanoseconds: u32,
}

impl AbsoluteTime {
    /// Creates an absolute time, carrying any whole seconds held in
    /// `nanoseconds` over into `seconds`.
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        let carry = i64::from(nanoseconds / NANOS_PER_SECOND);
        Self {
            seconds: seconds.saturating_add(carry),
            nanoseconds: nanoseconds % NANOS_PER_SECOND,
        }
    }
}

/// The point an event-based trigger counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountOrigin {
    /// Count forward from the next occurrence: target is `count + n`.
    Next,
    /// Count from the previous occurrence: target is `count + n - 1`.
    Previous,
    /// The most recent occurrence; `n` is ignored.
    Current,
}

/// Fires `count` occurrences of `source` away from `origin`, then waits a
/// further `time_shift_ns` nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventBasedTime {
    pub source: EventSource,
    pub origin: CountOrigin,
    pub count: u64,
    /// Delay after the matching occurrence, in nanoseconds.
    #[serde(default)]
    pub time_shift_ns: i64,
}

/// Describes when a scheduled callback should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// As soon as the timer worker is free.
    Immediate,
    /// At a specific point on the epoch-relative clock.
    Absolute(AbsoluteTime),
    /// On a counted occurrence of an external event source.
    EventBased(EventBasedTime),
}

impl Trigger {
    pub fn immediate() -> Self {
        Trigger::Immediate
    }

    pub fn absolute(seconds: i64, nanoseconds: u32) -> Self {
        Trigger::Absolute(AbsoluteTime::new(seconds, nanoseconds))
    }

    /// An absolute trigger for a wall-clock instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Trigger::Absolute(to_absolute(instant))
    }

    pub fn event_based(
        source: EventSource,
        origin: CountOrigin,
        count: u64,
        time_shift_ns: i64,
    ) -> Self {
        Trigger::EventBased(EventBasedTime {
            source,
            origin,
            count,
            time_shift_ns,
        })
    }
}

/// Encodes a wall-clock instant as an offset from the epoch.
pub fn to_absolute(instant: DateTime<Utc>) -> AbsoluteTime {
    // `timestamp` floors towards negative infinity, so the remainder is
    // already non-negative for pre-epoch instants. Leap-second instants
    // report a remainder past 1e9 and fold into the next second.
    AbsoluteTime::new(
        instant.timestamp() - EPOCH_UNIX_SECONDS,
        instant.timestamp_subsec_nanos(),
    )
}

/// Decodes an epoch offset back into a wall-clock instant.
///
/// Offsets beyond the range chrono can represent saturate to
/// [`DateTime::<Utc>::MIN_UTC`] or [`DateTime::<Utc>::MAX_UTC`].
pub fn from_absolute(time: AbsoluteTime) -> DateTime<Utc> {
    let time = AbsoluteTime::new(time.seconds, time.nanoseconds);
    time.seconds
        .checked_add(EPOCH_UNIX_SECONDS)
        .and_then(|secs| DateTime::from_timestamp(secs, time.nanoseconds))
        .unwrap_or_else(|| saturated(time.seconds))
}

/// Shifts an instant by a signed number of nanoseconds, saturating at the
/// edges of the representable range.
pub fn shift_by_nanos(instant: DateTime<Utc>, nanos: i64) -> DateTime<Utc> {
    instant
        .checked_add_signed(TimeDelta::nanoseconds(nanos))
        .unwrap_or_else(|| saturated(nanos))
}

fn saturated(direction: i64) -> DateTime<Utc> {
    if direction < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epoch_encodes_as_zero() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_absolute(epoch), AbsoluteTime::new(0, 0));
        assert_eq!(from_absolute(AbsoluteTime::new(0, 0)), epoch);
    }

    #[test]
    fn pre_epoch_instants_keep_a_positive_remainder() {
        let instant = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap()
            + TimeDelta::milliseconds(500);
        let encoded = to_absolute(instant);
        assert_eq!(encoded.seconds, -1);
        assert_eq!(encoded.nanoseconds, 500_000_000);
        assert_eq!(from_absolute(encoded), instant);
    }

    #[test]
    fn instants_round_trip_to_the_nanosecond() {
        let instants = [
            Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(1987, 6, 5, 4, 3, 2).unwrap() + TimeDelta::nanoseconds(1),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
                + TimeDelta::nanoseconds(999_999_999),
            Utc::now(),
        ];
        for instant in instants {
            assert_eq!(from_absolute(to_absolute(instant)), instant);
        }
    }

    #[test]
    fn overlong_nanoseconds_carry_into_seconds() {
        let time = AbsoluteTime::new(10, 2_500_000_000);
        assert_eq!(time, AbsoluteTime { seconds: 12, nanoseconds: 500_000_000 });
    }

    #[test]
    fn out_of_range_offsets_saturate() {
        assert_eq!(from_absolute(AbsoluteTime::new(i64::MAX, 0)), DateTime::<Utc>::MAX_UTC);
        assert_eq!(from_absolute(AbsoluteTime::new(i64::MIN, 0)), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn shifting_moves_in_both_directions() {
        let base = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(shift_by_nanos(base, 1_500), base + TimeDelta::nanoseconds(1_500));
        assert_eq!(shift_by_nanos(base, -1_500), base - TimeDelta::nanoseconds(1_500));
    }
}
