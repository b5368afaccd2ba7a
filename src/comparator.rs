use crate::aggregator::UnitTotals;
use crate::schema::UnitPeriodTotal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Relative change between two figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChangeRatio {
    Value(Decimal),
    PosInfinity,
    NegInfinity,
    /// One side was missing; not the same as no change.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub change: ChangeRatio,
    pub direction: Option<Direction>,
}

impl Comparison {
    pub fn unknown() -> Self {
        Self {
            change: ChangeRatio::Unknown,
            direction: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.change == ChangeRatio::Unknown
    }
}

pub fn compare(current: Decimal, previous: Decimal) -> Comparison {
    if previous.is_zero() {
        let (change, direction) = if current.is_zero() {
            (ChangeRatio::Value(Decimal::ZERO), Direction::Flat)
        } else if current > Decimal::ZERO {
            (ChangeRatio::PosInfinity, Direction::Up)
        } else {
            (ChangeRatio::NegInfinity, Direction::Down)
        };
        return Comparison {
            change,
            direction: Some(direction),
        };
    }

    let ratio = (current - previous) / previous.abs();
    let direction = if ratio > Decimal::ZERO {
        Direction::Up
    } else if ratio < Decimal::ZERO {
        Direction::Down
    } else {
        Direction::Flat
    };

    Comparison {
        change: ChangeRatio::Value(ratio),
        direction: Some(direction),
    }
}

pub fn compare_optional(current: Option<Decimal>, previous: Option<Decimal>) -> Comparison {
    match (current, previous) {
        (Some(c), Some(p)) => compare(c, p),
        _ => Comparison::unknown(),
    }
}

/// Year-over-year (or month-over-cumulative) comparison of one unit's figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitComparison {
    pub unit_key: String,
    pub ft_salary: Comparison,
    pub pt_salary: Comparison,
    pub total_salary: Comparison,
    pub total_revenue: Comparison,
}

impl UnitComparison {
    pub fn between(
        unit_key: impl Into<String>,
        current: Option<&UnitPeriodTotal>,
        previous: Option<&UnitPeriodTotal>,
    ) -> Self {
        let field = |pick: fn(&UnitPeriodTotal) -> Decimal| {
            compare_optional(current.map(pick), previous.map(pick))
        };

        Self {
            unit_key: unit_key.into(),
            ft_salary: field(|t| t.ft_salary),
            pt_salary: field(|t| t.pt_salary),
            total_salary: field(|t| t.total_salary),
            total_revenue: field(|t| t.total_revenue),
        }
    }
}

/// Compares every unit present in either map. A unit missing on one side
/// compares as unknown.
pub fn compare_units(current: &UnitTotals, previous: &UnitTotals) -> BTreeMap<String, UnitComparison> {
    let keys: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();
    keys.into_iter()
        .map(|key| {
            (
                key.clone(),
                UnitComparison::between(key.as_str(), current.get(key), previous.get(key)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Category, PeriodKind};
    use rust_decimal_macros::dec;

    #[test]
    fn test_compare_zero_baselines() {
        assert_eq!(
            compare(dec!(0), dec!(0)),
            Comparison {
                change: ChangeRatio::Value(Decimal::ZERO),
                direction: Some(Direction::Flat)
            }
        );
        assert_eq!(
            compare(dec!(100), dec!(0)),
            Comparison {
                change: ChangeRatio::PosInfinity,
                direction: Some(Direction::Up)
            }
        );
        assert_eq!(
            compare(dec!(-5), dec!(0)),
            Comparison {
                change: ChangeRatio::NegInfinity,
                direction: Some(Direction::Down)
            }
        );
    }

    #[test]
    fn test_compare_relative_change() {
        let up = compare(dec!(150), dec!(100));
        assert_eq!(up.change, ChangeRatio::Value(dec!(0.5)));
        assert_eq!(up.direction, Some(Direction::Up));

        // A drop to zero from a non-zero base is a finite -100%.
        let gone = compare(dec!(0), dec!(100));
        assert_eq!(gone.change, ChangeRatio::Value(dec!(-1)));
        assert_eq!(gone.direction, Some(Direction::Down));

        let same = compare(dec!(42), dec!(42));
        assert_eq!(same.direction, Some(Direction::Flat));

        // Negative base: improvement from -100 to -50 is up.
        let recovering = compare(dec!(-50), dec!(-100));
        assert_eq!(recovering.change, ChangeRatio::Value(dec!(0.5)));
        assert_eq!(recovering.direction, Some(Direction::Up));
    }

    #[test]
    fn test_missing_side_is_unknown_not_zero() {
        let c = compare_optional(None, Some(dec!(100)));
        assert!(c.is_unknown());
        assert_eq!(c.direction, None);
        assert!(compare_optional(Some(dec!(0)), None).is_unknown());
        assert_ne!(compare_optional(Some(dec!(0)), Some(dec!(0))), Comparison::unknown());
    }

    #[test]
    fn test_compare_units_covers_both_years() {
        let mut current = UnitTotals::new();
        let mut a = UnitPeriodTotal::empty("a", PeriodKind::Month);
        a.add_salary(Category::FullTime, dec!(120));
        current.insert("a".into(), a);

        let mut previous = UnitTotals::new();
        let mut a_prev = UnitPeriodTotal::empty("a", PeriodKind::Month);
        a_prev.add_salary(Category::FullTime, dec!(100));
        previous.insert("a".into(), a_prev);
        previous.insert("b".into(), UnitPeriodTotal::empty("b", PeriodKind::Month));

        let table = compare_units(&current, &previous);
        assert_eq!(table.len(), 2);
        assert_eq!(table["a"].ft_salary.change, ChangeRatio::Value(dec!(0.2)));
        assert_eq!(
            table["a"].pt_salary.change,
            ChangeRatio::Value(Decimal::ZERO)
        );
        assert!(table["b"].total_salary.is_unknown());
    }

    #[test]
    fn test_change_ratio_serialization() {
        let json = serde_json::to_string(&ChangeRatio::PosInfinity).unwrap();
        assert_eq!(json, r#"{"kind":"pos_infinity"}"#);
    }
}
