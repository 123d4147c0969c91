use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc, Weekday};

/// The counseling office runs on Philippine time. Manila has no DST, so a
/// fixed offset is sufficient.
pub const MANILA_UTC_OFFSET_SECS: i32 = 8 * 3600;

pub fn manila_offset() -> FixedOffset {
    FixedOffset::east_opt(MANILA_UTC_OFFSET_SECS).expect("static Manila offset")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    NotOnHour,
    Weekend,
    OutsideWorkingHours,
}

impl SlotError {
    pub fn code(self) -> &'static str {
        match self {
            SlotError::NotOnHour => "not_on_hour",
            SlotError::Weekend => "weekend",
            SlotError::OutsideWorkingHours => "outside_working_hours",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SlotError::NotOnHour => "appointments start exactly on the hour",
            SlotError::Weekend => "appointments are not available on weekends",
            SlotError::OutsideWorkingHours => {
                "appointments are available 8:00-11:00, 13:00-18:00 and 20:00-21:00"
            }
        }
    }
}

pub fn parse_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Decide whether a candidate instant is a legal booking slot.
///
/// All calendar checks run in Manila local time. Open hour bands are
/// 8-11, 13-18 and 20-21 inclusive; hour 21 is bookable on every path.
pub fn validate_slot(candidate: DateTime<FixedOffset>) -> Result<(), SlotError> {
    let local = candidate.with_timezone(&manila_offset());
    if local.minute() != 0 || local.second() != 0 {
        return Err(SlotError::NotOnHour);
    }
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(SlotError::Weekend);
    }
    if !matches!(local.hour(), 8..=11 | 13..=18 | 20..=21) {
        return Err(SlotError::OutsideWorkingHours);
    }
    Ok(())
}

/// Canonical storage key for a slot. Two requests for the same wall-clock
/// slot must produce byte-identical keys regardless of the offset they were
/// submitted with; the unique index on appointments(date_time) relies on it.
pub fn slot_key(candidate: DateTime<FixedOffset>) -> String {
    candidate
        .with_timezone(&Utc)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Cutoff for the stale-appointment sweep: pending appointments whose slot
/// is at or before `now - 1h` are closed. Returned in slot-key format so the
/// comparison against stored keys is a plain string compare.
pub fn stale_cutoff(now: DateTime<Utc>) -> String {
    (now - Duration::hours(1))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}
