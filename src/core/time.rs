use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn elapsed_millis(started: OffsetDateTime, finished: OffsetDateTime) -> u64 {
    let millis = (finished - started).whole_milliseconds();
    u64::try_from(millis).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Duration, PrimitiveDateTime, Time, UtcOffset};

    #[test]
    fn format_offset_preserves_offset() {
        let date = Date::from_calendar_date(2025, time::Month::January, 2).unwrap();
        let time = Time::from_hms(10, 20, 30).unwrap();
        let utc = PrimitiveDateTime::new(date, time).assume_utc();
        let offset = UtcOffset::from_hms(3, 0, 0).unwrap();
        let shifted = utc.to_offset(offset);
        assert_eq!(format_offset(shifted), "2025-01-02T13:20:30+03:00");
    }

    #[test]
    fn elapsed_millis_clamps_negative_spans() {
        let now = now_utc();
        assert_eq!(elapsed_millis(now, now + Duration::milliseconds(1500)), 1500);
        assert_eq!(elapsed_millis(now + Duration::seconds(1), now), 0);
    }
}
