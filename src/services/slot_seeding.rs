use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

use crate::db::models::format_label;

/// Labels for `days` business days (Mon-Fri) starting at `from`, one per hour in `hours`.
pub fn business_day_labels(from: NaiveDate, days: u32, hours: &[u32]) -> Vec<String> {
    let mut labels = Vec::with_capacity(days as usize * hours.len());
    let mut date = from;
    let mut remaining = days;

    while remaining > 0 {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            for hour in hours {
                if let Some(time) = NaiveTime::from_hms_opt(*hour, 0, 0) {
                    labels.push(format_label(date.and_time(time)));
                }
            }
            remaining -= 1;
        }
        date += Duration::days(1);
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekends_are_skipped() {
        // 2030-10-11 is a Friday.
        let from = NaiveDate::from_ymd_opt(2030, 10, 11).unwrap();
        let labels = business_day_labels(from, 2, &[10, 14]);
        assert_eq!(
            labels,
            vec![
                "11.10.2030, 10:00",
                "11.10.2030, 14:00",
                "14.10.2030, 10:00",
                "14.10.2030, 14:00",
            ]
        );
    }

    #[test]
    fn zero_days_yields_nothing() {
        let from = NaiveDate::from_ymd_opt(2030, 10, 11).unwrap();
        assert!(business_day_labels(from, 0, &[10]).is_empty());
    }
}
