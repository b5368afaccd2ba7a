//! # Payroll Rollup
//!
//! Reconciles salary and revenue records from several differently-shaped
//! sources, rolls them up through an organizational hierarchy and evaluates
//! every unit against a salary-to-revenue policy.
//!
//! ## Core Concepts
//!
//! - **Unit key**: the normalized name every source is joined on
//! - **Month / Cumulative totals**: one calendar month, or year to date counting
//!   only months in which the unit reported revenue
//! - **Rollup**: post-order sums through the org tree, each unit drawn once
//! - **Compliance**: salary/revenue ratio against an allowed cap, with per-unit
//!   target overrides
//! - **Comparison**: year-over-year change with explicit infinity and unknown
//!   outcomes
//!
//! ## Example
//!
//! ```rust,ignore
//! use payroll_rollup::*;
//!
//! let policy = CompliancePolicy::from_config(&PolicyConfig::from_path("policy.json")?)?;
//! let ingested = ingest_sources(&full_time_rows, &part_time_rows, &revenue_rows);
//!
//! let input = RollupInput::new(ingested.records).with_tree(tree);
//! let report = process_rollup(&input, &policy, &RollupQuery::from_period("2025-03")?)?;
//!
//! for result in &report.results {
//!     println!("{}: {}", result.unit_key, result.salary_revenue_ratio);
//! }
//! ```

pub mod aggregator;
pub mod comparator;
pub mod compliance;
pub mod error;
pub mod hierarchy;
pub mod ingestion;
pub mod integrity;
pub mod normalizer;
pub mod overrides;
pub mod schema;
pub mod utils;

pub use aggregator::{aggregate, AggregationQuery, RecordAggregator, UnitTotals};
pub use comparator::{
    compare, compare_optional, compare_units, ChangeRatio, Comparison, Direction, UnitComparison,
};
pub use compliance::{
    completion_tier, permitted_salary_fund, remaining_monthly_fund, CompliancePolicy,
    CompliancePolicyEvaluator,
};
pub use error::{Result, RollupError};
pub use hierarchy::{FlatOrgUnit, HierarchyRollup, OrgNode, OrgTree, RollupNode};
pub use ingestion::*;
pub use integrity::{verify_rollup, RollupIntegrity, VerificationResult};
pub use normalizer::KeyNormalizer;
pub use overrides::{OverrideRule, OverrideTable, TargetLedger};
pub use schema::*;
pub use utils::*;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the engine works on, already fetched by the caller.
#[derive(Debug, Clone, Default)]
pub struct RollupInput {
    pub records: Vec<SourceRecord>,
    /// Prior-year records. `None` means they could not be fetched, and every
    /// year-over-year comparison is then unknown.
    pub prior_records: Option<Vec<SourceRecord>>,
    pub tree: Option<OrgTree>,
}

impl RollupInput {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            prior_records: None,
            tree: None,
        }
    }

    pub fn with_prior_records(mut self, records: Vec<SourceRecord>) -> Self {
        self.prior_records = Some(records);
        self
    }

    pub fn with_tree(mut self, tree: OrgTree) -> Self {
        self.tree = Some(tree);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupQuery {
    pub year: i32,
    pub month: u32,
    /// Unit names to restrict the report to. Normalized before use.
    #[serde(default)]
    pub units: Option<Vec<String>>,
}

impl RollupQuery {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        validate_month(month)?;
        Ok(Self {
            year,
            month,
            units: None,
        })
    }

    /// Parses a `"YYYY-MM"` reporting period.
    pub fn from_period(period: &str) -> Result<Self> {
        let ym = parse_period_string(period)?;
        Self::new(ym.year, ym.month)
    }

    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.units = Some(units);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupReport {
    pub period: YearMonth,
    pub month_totals: UnitTotals,
    pub cumulative_totals: UnitTotals,
    pub results: Vec<ComplianceResult>,
    /// Current month against the same month one year earlier.
    pub comparisons: BTreeMap<String, UnitComparison>,
    /// Current cumulative totals against the prior year's cumulative totals.
    pub cumulative_comparisons: BTreeMap<String, UnitComparison>,
    pub tree: Option<RollupNode>,
    pub cumulative_tree: Option<RollupNode>,
    pub verification: Option<VerificationResult>,
}

impl RollupReport {
    pub fn result_for(&self, unit_key: &str) -> Option<&ComplianceResult> {
        self.results.iter().find(|r| r.unit_key == unit_key)
    }
}

pub struct RollupProcessor;

impl RollupProcessor {
    pub fn process(
        input: &RollupInput,
        policy: &CompliancePolicy,
        query: &RollupQuery,
    ) -> Result<RollupReport> {
        let period = YearMonth::new(query.year, query.month)?;
        info!(
            "Processing rollup for {} over {} records (prior year: {}, tree: {})",
            period,
            input.records.len(),
            input
                .prior_records
                .as_ref()
                .map_or("missing".to_string(), |r| format!("{} records", r.len())),
            input.tree.is_some()
        );

        let normalizer = policy.normalizer();
        let units = match &query.units {
            Some(names) => Some(
                names
                    .iter()
                    .map(|n| normalizer.normalize(n))
                    .collect::<Result<BTreeSet<String>>>()?,
            ),
            None => None,
        };

        let aggregator = RecordAggregator::new(normalizer);
        let queries = |year: i32| {
            let mut month = AggregationQuery::month(year, query.month);
            let mut cumulative = AggregationQuery::cumulative(year, Some(query.month));
            if let Some(selected) = &units {
                month = month.with_units(selected.iter().cloned());
                cumulative = cumulative.with_units(selected.iter().cloned());
            }
            (month, cumulative)
        };

        let (month_query, cumulative_query) = queries(query.year);
        let month_leaves = aggregator.aggregate(&input.records, &month_query)?;
        let cumulative_leaves = aggregator.aggregate(&input.records, &cumulative_query)?;

        let (prior_month_leaves, prior_cumulative_leaves) = match &input.prior_records {
            Some(prior) => {
                let (month_query, cumulative_query) = queries(query.year - 1);
                (
                    aggregator.aggregate(prior, &month_query)?,
                    aggregator.aggregate(prior, &cumulative_query)?,
                )
            }
            None => (UnitTotals::new(), UnitTotals::new()),
        };

        // Residual targets are measured against every unit, not the selection.
        let ledger = match &units {
            Some(_) => TargetLedger::from_totals(
                &aggregator.aggregate(&input.records, &AggregationQuery::month(query.year, query.month))?,
            ),
            None => TargetLedger::from_totals(&month_leaves),
        };
        debug!(
            "System target {} across all units",
            ledger.system_target
        );

        let rollup = HierarchyRollup::new(normalizer, policy.exclusions());
        let roll = |leaves: &UnitTotals| -> Option<RollupNode> {
            input
                .tree
                .as_ref()
                .and_then(|tree| rollup.rollup_tree(tree.root(), leaves))
        };

        let tree = roll(&month_leaves);
        let cumulative_tree = roll(&cumulative_leaves);

        let verification = match &tree {
            Some(root) => Some(RollupIntegrity::new(&month_leaves).verify(root)?),
            None => None,
        };
        if let Some(v) = &verification {
            debug!(
                "Rollup verified: {} nodes, {} units drawn",
                v.nodes_checked,
                v.drawn_keys.len()
            );
        }

        let month_totals = with_rollups(&month_leaves, tree.as_ref());
        let cumulative_totals = with_rollups(&cumulative_leaves, cumulative_tree.as_ref());
        let prior_month_totals = with_rollups(&prior_month_leaves, roll(&prior_month_leaves).as_ref());
        let prior_cumulative_totals =
            with_rollups(&prior_cumulative_leaves, roll(&prior_cumulative_leaves).as_ref());

        let evaluator = CompliancePolicyEvaluator::new(policy).as_of_month(query.month)?;
        let results = evaluator.evaluate_all(&month_totals, &cumulative_totals, &ledger);

        let reportable = |mut table: BTreeMap<String, UnitComparison>| {
            table.retain(|key, _| !policy.is_denylisted(key));
            table
        };
        let comparisons = reportable(compare_units(&month_totals, &prior_month_totals));
        let cumulative_comparisons =
            reportable(compare_units(&cumulative_totals, &prior_cumulative_totals));

        info!(
            "Rollup for {} produced {} compliance rows",
            period,
            results.len()
        );

        Ok(RollupReport {
            period,
            month_totals,
            cumulative_totals,
            results,
            comparisons,
            cumulative_comparisons,
            tree,
            cumulative_tree,
            verification,
        })
    }
}

/// Leaf totals with every rolled-up tree node layered on top; a node's
/// rolled-up figures replace the unit's own figures.
fn with_rollups(leaves: &UnitTotals, tree: Option<&RollupNode>) -> UnitTotals {
    let mut totals = leaves.clone();
    if let Some(root) = tree {
        totals.extend(root.flatten());
    }
    totals
}

pub fn process_rollup(
    input: &RollupInput,
    policy: &CompliancePolicy,
    query: &RollupQuery,
) -> Result<RollupReport> {
    RollupProcessor::process(input, policy, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn salary(unit: &str, year: i32, month: u32, category: Category, amount: Decimal) -> SourceRecord {
        SourceRecord::Compensation(CompensationRecord {
            unit_key: unit.to_string(),
            period: YearMonth::new(year, month).unwrap(),
            category,
            amount: Amount::Number(amount),
        })
    }

    fn revenue(unit: &str, year: i32, month: u32, target: Decimal, actual: Decimal) -> SourceRecord {
        SourceRecord::Revenue(RevenueRecord {
            unit_key: unit.to_string(),
            period: YearMonth::new(year, month).unwrap(),
            target_amount: Amount::Number(target),
            actual_amount: Amount::Number(actual),
            revenue_block: None,
        })
    }

    fn policy() -> CompliancePolicy {
        let config = PolicyConfig {
            allowed_ratio_cap: Some(dec!(0.15)),
            overrides: Some(BTreeMap::new()),
            ..Default::default()
        };
        CompliancePolicy::from_config(&config).unwrap()
    }

    #[test]
    fn test_process_without_tree() {
        let records = vec![
            salary("Unit A", 2025, 3, Category::FullTime, dec!(1000000)),
            salary("unit a", 2025, 3, Category::PartTime, dec!(200000)),
            revenue("UNIT A", 2025, 3, dec!(10000000), dec!(8000000)),
        ];
        let input = RollupInput::new(records);
        let query = RollupQuery::new(2025, 3).unwrap();

        let report = process_rollup(&input, &policy(), &query).unwrap();
        assert_eq!(report.results.len(), 1);
        let result = report.result_for("unit a").unwrap();
        assert_eq!(result.completion_ratio, dec!(0.8));
        assert_eq!(result.salary_revenue_ratio, dec!(0.15));
        assert_eq!(result.excess_fund, Decimal::ZERO);
        assert!(report.tree.is_none());
        assert!(report.verification.is_none());

        // No prior-year data: unknown, never zero.
        assert!(report.comparisons["unit a"].total_salary.is_unknown());
    }

    #[test]
    fn test_process_with_tree_and_prior_year() {
        let records = vec![
            salary("Clinic One", 2025, 2, Category::FullTime, dec!(100)),
            revenue("Clinic One", 2025, 2, dec!(1000), dec!(1000)),
            salary("Clinic Two", 2025, 2, Category::FullTime, dec!(50)),
            revenue("Clinic Two", 2025, 2, dec!(500), dec!(0)),
        ];
        let prior = vec![salary("Clinic One", 2024, 2, Category::FullTime, dec!(80))];

        let tree = OrgTree::from_root(OrgNode::new("root", "Group").with_children(vec![
            OrgNode::new("c1", "Clinic One"),
            OrgNode::new("c2", "Clinic Two"),
        ]))
        .unwrap();

        let input = RollupInput::new(records)
            .with_prior_records(prior)
            .with_tree(tree);
        let report = process_rollup(&input, &policy(), &RollupQuery::from_period("2025-02").unwrap()).unwrap();

        let group = report.month_totals.get("group").unwrap();
        assert_eq!(group.total_salary, dec!(150));
        assert_eq!(report.verification.as_ref().unwrap().drawn_keys.len(), 2);
        assert!(report.result_for("group").is_some());

        let one = &report.comparisons["clinic one"];
        assert_eq!(one.total_salary.change, ChangeRatio::Value(dec!(0.25)));
        assert!(report.comparisons["clinic two"].total_salary.is_unknown());

        // Cumulative revenue base excludes the month without revenue.
        let cumulative_group = report.cumulative_totals.get("group").unwrap();
        assert_eq!(cumulative_group.target_revenue, dec!(1000));
        assert_eq!(cumulative_group.total_salary, dec!(150));
    }

    fn residual_policy(denylist: Vec<String>) -> CompliancePolicy {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "KHDN".to_string(),
            OverrideRule::ResidualTarget {
                carve_out_block: "DVTV".to_string(),
            },
        );
        let config = PolicyConfig {
            allowed_ratio_cap: Some(dec!(0.15)),
            overrides: Some(overrides),
            denylist,
            ..Default::default()
        };
        CompliancePolicy::from_config(&config).unwrap()
    }

    fn tagged_revenue(unit: &str, target: Decimal, block: Option<&str>) -> SourceRecord {
        SourceRecord::Revenue(RevenueRecord {
            unit_key: unit.to_string(),
            period: YearMonth::new(2025, 4).unwrap(),
            target_amount: Amount::Number(target),
            actual_amount: Amount::Number(dec!(5)),
            revenue_block: block.map(|b| b.to_string()),
        })
    }

    #[test]
    fn test_unit_selection_keeps_system_target() {
        let records = vec![
            tagged_revenue("A", dec!(1000), Some("DVTV")),
            tagged_revenue("B", dec!(3000), None),
            tagged_revenue("KHDN", dec!(10), None),
        ];
        let input = RollupInput::new(records);
        let policy = residual_policy(vec![]);
        let query = RollupQuery::new(2025, 4).unwrap();

        let all = process_rollup(&input, &policy, &query).unwrap();
        let selected = process_rollup(
            &input,
            &policy,
            &query.clone().with_units(vec!["KHDN".to_string()]),
        )
        .unwrap();

        let expected = dec!(4010) - dec!(1000);
        assert_eq!(all.result_for("khdn").unwrap().target_revenue_adjusted, expected);
        assert_eq!(selected.results.len(), 1);
        assert_eq!(
            selected.result_for("khdn").unwrap().target_revenue_adjusted,
            expected
        );
        assert_eq!(
            selected.result_for("khdn").unwrap().completion_ratio,
            all.result_for("khdn").unwrap().completion_ratio
        );
    }

    #[test]
    fn test_denylisted_units_left_out_of_comparisons() {
        let records = vec![
            salary("Holding", 2025, 4, Category::FullTime, dec!(10)),
            salary("A", 2025, 4, Category::FullTime, dec!(10)),
        ];
        let prior = vec![salary("Holding", 2024, 4, Category::FullTime, dec!(5))];
        let input = RollupInput::new(records).with_prior_records(prior);
        let policy = residual_policy(vec!["Holding".to_string()]);

        let report = process_rollup(&input, &policy, &RollupQuery::new(2025, 4).unwrap()).unwrap();
        assert!(report.result_for("holding").is_none());
        assert!(!report.comparisons.contains_key("holding"));
        assert!(!report.cumulative_comparisons.contains_key("holding"));
        assert!(report.comparisons.contains_key("a"));
    }

    #[test]
    fn test_query_validation() {
        assert!(RollupQuery::new(2025, 0).is_err());
        assert!(RollupQuery::from_period("2025-13").is_err());
        assert_eq!(RollupQuery::from_period("2024-11").unwrap().month, 11);
    }

    #[test]
    fn test_unit_selection_is_normalized() {
        let records = vec![
            salary("A", 2025, 1, Category::FullTime, dec!(10)),
            salary("B", 2025, 1, Category::FullTime, dec!(20)),
        ];
        let query = RollupQuery::new(2025, 1)
            .unwrap()
            .with_units(vec!["  a ".to_string()]);

        let report = process_rollup(&RollupInput::new(records), &policy(), &query).unwrap();
        assert_eq!(report.month_totals.len(), 1);
        assert!(report.month_totals.contains_key("a"));
    }
}
