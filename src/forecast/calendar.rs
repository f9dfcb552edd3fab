use chrono::{Datelike, NaiveDate};

/// First day of `date`'s month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Number of days in `date`'s month.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

/// Last day of `date`'s month.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    date.with_day(days_in_month(date)).unwrap_or(date)
}

/// Every day of `date`'s month, in order.
pub fn month_days(date: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    month_start(date)
        .iter_days()
        .take(days_in_month(date) as usize)
}
