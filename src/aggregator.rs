use crate::error::{Result, RollupError};
use crate::ingestion::coerce_amount;
use crate::normalizer::KeyNormalizer;
use crate::schema::{PeriodKind, SourceRecord, UnitPeriodTotal, YearMonth};
use crate::utils::validate_month;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type UnitTotals = BTreeMap<String, UnitPeriodTotal>;

/// Filter parameters for one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationQuery {
    pub year: i32,
    pub month: Option<u32>,
    pub period_kind: PeriodKind,
    /// Explicit month selection. When set it replaces the `month` bound.
    #[serde(default)]
    pub months: Option<BTreeSet<u32>>,
    /// Normalized unit keys to keep. `None` keeps every unit.
    #[serde(default)]
    pub units: Option<BTreeSet<String>>,
}

impl AggregationQuery {
    pub fn month(year: i32, month: u32) -> Self {
        Self {
            year,
            month: Some(month),
            period_kind: PeriodKind::Month,
            months: None,
            units: None,
        }
    }

    pub fn cumulative(year: i32, month: Option<u32>) -> Self {
        Self {
            year,
            month,
            period_kind: PeriodKind::Cumulative,
            months: None,
            units: None,
        }
    }

    pub fn with_months(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        self.months = Some(months.into_iter().collect());
        self
    }

    pub fn with_units(mut self, units: impl IntoIterator<Item = String>) -> Self {
        self.units = Some(units.into_iter().collect());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(month) = self.month {
            validate_month(month)?;
        }
        if let Some(months) = &self.months {
            if months.is_empty() {
                return Err(RollupError::InvalidFilter(
                    "month selection is empty".to_string(),
                ));
            }
            for month in months {
                validate_month(*month)?;
            }
        }
        if self.period_kind == PeriodKind::Month && self.month.is_none() && self.months.is_none() {
            return Err(RollupError::InvalidFilter(
                "month mode requires a month".to_string(),
            ));
        }
        Ok(())
    }

    fn includes_period(&self, period: YearMonth) -> bool {
        if period.year != self.year {
            return false;
        }
        if let Some(months) = &self.months {
            return months.contains(&period.month);
        }
        match (self.period_kind, self.month) {
            (PeriodKind::Month, Some(month)) => period.month == month,
            (PeriodKind::Cumulative, Some(month)) => period.month <= month,
            (_, None) => true,
        }
    }

    fn includes_unit(&self, key: &str) -> bool {
        self.units.as_ref().map_or(true, |units| units.contains(key))
    }
}

pub struct RecordAggregator<'a> {
    normalizer: &'a KeyNormalizer,
}

impl<'a> RecordAggregator<'a> {
    pub fn new(normalizer: &'a KeyNormalizer) -> Self {
        Self { normalizer }
    }

    /// Sums records into per-unit totals for the query's period.
    ///
    /// Records with an unusable unit name or an unparseable amount are skipped
    /// with a warning; the rest of the aggregation continues. Units without any
    /// contributing record are absent from the result.
    pub fn aggregate(&self, records: &[SourceRecord], query: &AggregationQuery) -> Result<UnitTotals> {
        query.validate()?;

        let mut totals: UnitTotals = BTreeMap::new();
        let mut skipped = 0usize;

        for record in records {
            if !query.includes_period(record.period()) {
                continue;
            }

            let key = match self.normalizer.normalize(record.unit_key()) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Dropping record for period {}: {}", record.period(), e);
                    skipped += 1;
                    continue;
                }
            };

            if !query.includes_unit(&key) {
                continue;
            }

            match self.accumulate(&mut totals, key, record, query.period_kind) {
                Ok(()) => {}
                Err(e) => {
                    warn!("Skipping record for period {}: {}", record.period(), e);
                    skipped += 1;
                }
            }
        }

        debug!(
            "Aggregated {} units for {} {:?} (month {:?}, {} records skipped)",
            totals.len(),
            query.year,
            query.period_kind,
            query.month,
            skipped
        );

        Ok(totals)
    }

    fn accumulate(
        &self,
        totals: &mut UnitTotals,
        key: String,
        record: &SourceRecord,
        period_kind: PeriodKind,
    ) -> Result<()> {
        match record {
            SourceRecord::Compensation(r) => {
                let amount = coerce_amount(&key, &r.amount)?;
                totals
                    .entry(key.clone())
                    .or_insert_with(|| UnitPeriodTotal::empty(key, period_kind))
                    .add_salary(r.category, amount);
            }
            SourceRecord::Revenue(r) => {
                let target = coerce_amount(&key, &r.target_amount)?;
                let actual = coerce_amount(&key, &r.actual_amount)?;

                // Months without reported revenue stay out of the cumulative base.
                if period_kind == PeriodKind::Cumulative && actual <= Decimal::ZERO {
                    return Ok(());
                }

                totals
                    .entry(key.clone())
                    .or_insert_with(|| UnitPeriodTotal::empty(key, period_kind))
                    .add_revenue(r.period.month, target, actual, r.revenue_block.as_deref());
            }
        }
        Ok(())
    }
}

/// Convenience wrapper around [`RecordAggregator::aggregate`].
pub fn aggregate(
    records: &[SourceRecord],
    normalizer: &KeyNormalizer,
    year: i32,
    month: Option<u32>,
    period_kind: PeriodKind,
) -> Result<UnitTotals> {
    let query = AggregationQuery {
        year,
        month,
        period_kind,
        months: None,
        units: None,
    };
    RecordAggregator::new(normalizer).aggregate(records, &query)
}
