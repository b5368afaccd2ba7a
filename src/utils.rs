use crate::error::{Result, RollupError};
use crate::schema::YearMonth;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(RollupError::InvalidFilter(format!(
            "month {} must be between 1 and 12",
            month
        )));
    }
    Ok(())
}

/// Months left in the calendar year after `month` (December leaves none).
pub fn months_remaining(month: u32) -> u32 {
    12u32.saturating_sub(month)
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn ratio_or_zero(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

/// Parses a period string in the format "YYYY-MM".
pub fn parse_period_string(period: &str) -> Result<YearMonth> {
    let start_str = format!("{}-01", period.trim());
    let date = NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        RollupError::DateError(format!(
            "Invalid period format: {}. Expected YYYY-MM",
            period
        ))
    })?;

    Ok(YearMonth::from_date(date))
}

pub fn year_month_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}
