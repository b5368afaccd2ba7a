use crate::error::{Result, RollupError};
use crate::schema::{
    Amount, Category, CompensationRecord, RevenueRecord, SourceRecord, YearMonth,
};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A payroll line as it arrives from either payroll source. The two sources
/// name the unit column differently, hence the aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRow {
    #[serde(alias = "department", alias = "unit", alias = "location_name")]
    pub unit_name: Option<String>,
    pub year: i32,
    pub month: u32,
    #[serde(alias = "total_income", alias = "salary")]
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueRow {
    #[serde(alias = "department", alias = "unit", alias = "location_name")]
    pub unit_name: Option<String>,
    pub year: i32,
    pub month: u32,
    #[serde(default, alias = "target_amount")]
    pub target: Option<Amount>,
    #[serde(default, alias = "actual_amount", alias = "reported")]
    pub actual: Option<Amount>,
    #[serde(default, alias = "block")]
    pub revenue_block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub records: Vec<SourceRecord>,
    pub skipped: Vec<SkippedRow>,
}

impl IngestReport {
    fn skip(&mut self, index: usize, err: RollupError) {
        warn!("Skipping source row #{}: {}", index, err);
        self.skipped.push(SkippedRow {
            index,
            reason: err.to_string(),
        });
    }

    pub fn extend(&mut self, other: IngestReport) {
        self.records.extend(other.records);
        self.skipped.extend(other.skipped);
    }
}

impl Amount {
    /// Coerces the amount to a decimal, stripping thousands separators and
    /// whitespace from textual amounts.
    pub fn to_decimal(&self) -> std::result::Result<Decimal, String> {
        match self {
            Amount::Number(value) => Ok(*value),
            Amount::Text(raw) => parse_amount(raw),
        }
    }
}

pub fn parse_amount(raw: &str) -> std::result::Result<Decimal, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err("empty amount".to_string());
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|e| e.to_string())
}

/// Coerces an amount belonging to `unit`, mapping failures to
/// [`RollupError::NumericParse`].
pub fn coerce_amount(unit: &str, amount: &Amount) -> Result<Decimal> {
    amount.to_decimal().map_err(|reason| RollupError::NumericParse {
        unit: unit.to_string(),
        raw: match amount {
            Amount::Number(n) => n.to_string(),
            Amount::Text(t) => t.clone(),
        },
        reason,
    })
}

/// A missing amount is absent data, never a reported zero.
fn coerce_required(unit: &str, amount: Option<&Amount>, field: &str) -> Result<Decimal> {
    match amount {
        Some(amount) => coerce_amount(unit, amount),
        None => Err(RollupError::NumericParse {
            unit: unit.to_string(),
            raw: String::new(),
            reason: format!("missing {} amount", field),
        }),
    }
}

fn require_unit_name(name: &Option<String>) -> Result<String> {
    match name {
        Some(n) if !n.trim().is_empty() => Ok(n.clone()),
        Some(n) => Err(RollupError::InvalidKey(n.clone())),
        None => Err(RollupError::InvalidKey(String::new())),
    }
}

pub fn convert_payroll_rows(rows: &[PayrollRow], category: Category) -> IngestReport {
    let mut report = IngestReport::default();

    for (index, row) in rows.iter().enumerate() {
        let converted = require_unit_name(&row.unit_name).and_then(|unit_key| {
            let period = YearMonth::new(row.year, row.month)?;
            let amount = coerce_amount(&unit_key, &row.amount)?;
            Ok(CompensationRecord {
                unit_key,
                period,
                category,
                amount: Amount::Number(amount),
            })
        });

        match converted {
            Ok(record) => report.records.push(SourceRecord::Compensation(record)),
            Err(e) => report.skip(index, e),
        }
    }

    debug!(
        "Converted {} {:?} payroll rows ({} skipped)",
        report.records.len(),
        category,
        report.skipped.len()
    );

    report
}

pub fn convert_revenue_rows(rows: &[RevenueRow]) -> IngestReport {
    let mut report = IngestReport::default();

    for (index, row) in rows.iter().enumerate() {
        let converted = require_unit_name(&row.unit_name).and_then(|unit_key| {
            let period = YearMonth::new(row.year, row.month)?;
            let target = coerce_required(&unit_key, row.target.as_ref(), "target")?;
            let actual = coerce_required(&unit_key, row.actual.as_ref(), "actual")?;
            let revenue_block = row
                .revenue_block
                .as_ref()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty());

            Ok(RevenueRecord {
                unit_key,
                period,
                target_amount: Amount::Number(target),
                actual_amount: Amount::Number(actual),
                revenue_block,
            })
        });

        match converted {
            Ok(record) => report.records.push(SourceRecord::Revenue(record)),
            Err(e) => report.skip(index, e),
        }
    }

    debug!(
        "Converted {} revenue rows ({} skipped)",
        report.records.len(),
        report.skipped.len()
    );

    report
}

/// Converts the three source collections into one record sequence.
pub fn ingest_sources(
    full_time: &[PayrollRow],
    part_time: &[PayrollRow],
    revenue: &[RevenueRow],
) -> IngestReport {
    let mut report = convert_payroll_rows(full_time, Category::FullTime);
    report.extend(convert_payroll_rows(part_time, Category::PartTime));
    report.extend(convert_revenue_rows(revenue));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payroll(name: Option<&str>, month: u32, amount: Amount) -> PayrollRow {
        PayrollRow {
            unit_name: name.map(|n| n.to_string()),
            year: 2025,
            month,
            amount,
        }
    }

    #[test]
    fn test_parse_amount_strips_separators() {
        assert_eq!(parse_amount("1,200,000").unwrap(), dec!(1200000));
        assert_eq!(parse_amount(" 8 000 000 ").unwrap(), dec!(8000000));
        assert_eq!(parse_amount("1,234.50").unwrap(), dec!(1234.50));
        assert_eq!(parse_amount("-2,500").unwrap(), dec!(-2500));
        assert_eq!(parse_amount("1.5e3").unwrap(), dec!(1500));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount("").is_err());
        assert!(parse_amount("n/a").is_err());
        assert!(parse_amount("12abc").is_err());
    }

    #[test]
    fn test_convert_payroll_rows_skips_bad_rows() {
        let rows = vec![
            payroll(Some("Unit A"), 1, Amount::from("1,000,000")),
            payroll(Some("Unit A"), 1, Amount::from("oops")),
            payroll(None, 1, Amount::Number(dec!(10))),
            payroll(Some("   "), 1, Amount::Number(dec!(10))),
            payroll(Some("Unit B"), 13, Amount::Number(dec!(10))),
        ];

        let report = convert_payroll_rows(&rows, Category::FullTime);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped.len(), 4);
        assert_eq!(
            report.skipped.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );

        match &report.records[0] {
            SourceRecord::Compensation(r) => {
                assert_eq!(r.amount, Amount::Number(dec!(1000000)));
                assert_eq!(r.category, Category::FullTime);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_convert_revenue_rows_skips_missing_amounts() {
        let row = |target: Option<Amount>, actual: Option<Amount>| RevenueRow {
            unit_name: Some("Unit A".to_string()),
            year: 2025,
            month: 2,
            target,
            actual,
            revenue_block: Some("  ".to_string()),
        };
        let rows = vec![
            row(Some(Amount::from("10,000,000")), None),
            row(None, Some(Amount::from("500"))),
            row(Some(Amount::from("10,000,000")), Some(Amount::Number(Decimal::ZERO))),
        ];

        let report = convert_revenue_rows(&rows);
        assert_eq!(
            report.skipped.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(report.skipped[0].reason.contains("missing actual"));
        assert!(report.skipped[1].reason.contains("missing target"));

        match &report.records[..] {
            [SourceRecord::Revenue(r)] => {
                assert_eq!(r.target_amount, Amount::Number(dec!(10000000)));
                assert_eq!(r.actual_amount, Amount::Number(Decimal::ZERO));
                assert_eq!(r.revenue_block, None);
            }
            other => panic!("unexpected records {:?}", other),
        }
    }

    #[test]
    fn test_rows_deserialize_from_source_column_names() {
        let json = r#"[{"department": "Unit A", "year": 2025, "month": 3, "total_income": "2,000"}]"#;
        let rows: Vec<PayrollRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows[0].unit_name.as_deref(), Some("Unit A"));

        let report = convert_payroll_rows(&rows, Category::PartTime);
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_ingest_sources_merges_all_collections() {
        let ft = vec![payroll(Some("A"), 1, Amount::Number(dec!(1)))];
        let pt = vec![payroll(Some("A"), 1, Amount::Number(dec!(2)))];
        let rev = vec![RevenueRow {
            unit_name: Some("A".to_string()),
            year: 2025,
            month: 1,
            target: Some(Amount::Number(dec!(4))),
            actual: Some(Amount::Number(dec!(3))),
            revenue_block: None,
        }];

        let report = ingest_sources(&ft, &pt, &rev);
        assert_eq!(report.records.len(), 3);
        assert!(report.skipped.is_empty());
    }
}
