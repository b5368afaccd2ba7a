//! Salary-to-revenue policy evaluation.
//!
//! A [`CompliancePolicy`] is the validated form of a [`PolicyConfig`]: the cap
//! is checked, and every unit name it mentions is normalized once so lookups
//! during evaluation are plain key comparisons.

use crate::aggregator::UnitTotals;
use crate::error::{Result, RollupError};
use crate::normalizer::KeyNormalizer;
use crate::overrides::{OverrideTable, TargetLedger};
use crate::schema::{ComplianceResult, FundPlan, PolicyConfig, UnitPeriodTotal};
use crate::utils::{months_remaining, ratio_or_zero, validate_month};
use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};

const TIER_FLOOR: Decimal = dec!(0.70);
const TIER_BONUS_FROM: Decimal = dec!(0.95);
const TIER_BONUS: Decimal = dec!(0.05);
const TIER_CEILING: Decimal = dec!(1.30);

#[derive(Debug, Clone)]
pub struct CompliancePolicy {
    pub allowed_ratio_cap: Decimal,
    pub overrides: OverrideTable,
    denylist: BTreeSet<String>,
    exclusions: BTreeSet<String>,
    fund_plans: BTreeMap<String, FundPlan>,
    normalizer: KeyNormalizer,
}

impl CompliancePolicy {
    /// Validates a loaded configuration. The cap and the override table must
    /// both be present; neither is ever defaulted.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let cap = config
            .allowed_ratio_cap
            .ok_or(RollupError::MissingPolicyConfig("allowed_ratio_cap"))?;
        let raw_overrides = config
            .overrides
            .as_ref()
            .ok_or(RollupError::MissingPolicyConfig("overrides"))?;

        if cap <= Decimal::ZERO || cap > Decimal::ONE {
            return Err(RollupError::InvalidPolicy(format!(
                "allowed_ratio_cap must be in (0, 1], got {}",
                cap
            )));
        }

        let normalizer = KeyNormalizer::with_aliases(&config.aliases)?;
        let overrides = OverrideTable::from_config(raw_overrides, &normalizer)?;

        let denylist = normalize_all(&config.denylist, &normalizer)?;
        let exclusions = normalize_all(&config.exclusions, &normalizer)?;

        let mut fund_plans = BTreeMap::new();
        for (name, plan) in &config.fund_plans {
            fund_plans.insert(normalizer.normalize(name)?, plan.clone());
        }

        debug!(
            "Loaded policy: cap {}, {} overrides, {} denylisted, {} excluded, {} aliases",
            cap,
            overrides.len(),
            denylist.len(),
            exclusions.len(),
            normalizer.alias_count()
        );

        Ok(Self {
            allowed_ratio_cap: cap,
            overrides,
            denylist,
            exclusions,
            fund_plans,
            normalizer,
        })
    }

    pub fn normalizer(&self) -> &KeyNormalizer {
        &self.normalizer
    }

    /// Normalized names excluded from hierarchy rollups.
    pub fn exclusions(&self) -> &BTreeSet<String> {
        &self.exclusions
    }

    pub fn is_denylisted(&self, unit_key: &str) -> bool {
        self.denylist.contains(unit_key)
    }

    pub fn fund_plan(&self, unit_key: &str) -> Option<&FundPlan> {
        self.fund_plans.get(unit_key)
    }
}

fn normalize_all(names: &[String], normalizer: &KeyNormalizer) -> Result<BTreeSet<String>> {
    names.iter().map(|n| normalizer.normalize(n)).collect()
}

/// Multiplier applied to the standard fund for a given completion ratio.
///
/// Below 70% the unit keeps a 70% floor; between 70% and 95% the ratio itself
/// applies; from 95% it earns five extra points, capped at 130%.
pub fn completion_tier(completion_ratio: Decimal) -> Decimal {
    if completion_ratio < TIER_FLOOR {
        TIER_FLOOR
    } else if completion_ratio < TIER_BONUS_FROM {
        completion_ratio
    } else {
        (completion_ratio + TIER_BONUS).min(TIER_CEILING)
    }
}

pub fn permitted_salary_fund(standard_fund: Decimal, completion_ratio: Decimal) -> Decimal {
    if standard_fund <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    standard_fund * completion_tier(completion_ratio)
}

/// What is left of the yearly hard fund, spread over the months after
/// `month`. `None` once the year has no months left.
pub fn remaining_monthly_fund(hard_fund: Decimal, spent: Decimal, month: u32) -> Option<Decimal> {
    match months_remaining(month) {
        0 => None,
        left => Some((hard_fund - spent) / Decimal::from(left)),
    }
}

pub struct CompliancePolicyEvaluator<'a> {
    policy: &'a CompliancePolicy,
    as_of_month: Option<u32>,
}

impl<'a> CompliancePolicyEvaluator<'a> {
    pub fn new(policy: &'a CompliancePolicy) -> Self {
        Self {
            policy,
            as_of_month: None,
        }
    }

    /// Sets the reporting month used to spread remaining hard funds.
    pub fn as_of_month(mut self, month: u32) -> Result<Self> {
        validate_month(month)?;
        self.as_of_month = Some(month);
        Ok(self)
    }

    pub fn evaluate(
        &self,
        total: &UnitPeriodTotal,
        cumulative: Option<&UnitPeriodTotal>,
        ledger: &TargetLedger,
    ) -> ComplianceResult {
        let cap = self.policy.allowed_ratio_cap;

        let target_revenue_adjusted =
            self.policy
                .overrides
                .adjusted_target(&total.unit_key, total.target_revenue, ledger);

        let completion_ratio = ratio_or_zero(total.total_revenue, target_revenue_adjusted);
        let salary_revenue_ratio = ratio_or_zero(total.total_salary, total.total_revenue);

        let (cumulative_salary, cumulative_salary_revenue_ratio, cumulative_completion_ratio) =
            match cumulative {
                Some(c) => (
                    c.total_salary,
                    ratio_or_zero(c.total_salary, c.total_revenue),
                    ratio_or_zero(c.total_revenue, c.target_revenue),
                ),
                None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            };

        let allowed_hard_fund = if cumulative_salary_revenue_ratio <= cap {
            cumulative_salary
        } else {
            cumulative_salary * cap / cumulative_salary_revenue_ratio
        };

        let allowed_fund = total.total_revenue * cap;
        let excess_fund = (total.total_salary - allowed_fund).max(Decimal::ZERO);
        let excess_ratio = if salary_revenue_ratio > Decimal::ZERO {
            salary_revenue_ratio - cap
        } else {
            Decimal::ZERO
        };

        let plan = self.policy.fund_plan(&total.unit_key);
        let permitted = plan.map(|p| permitted_salary_fund(p.standard_fund, completion_ratio));
        let remaining = match (plan, self.as_of_month) {
            (Some(p), Some(month)) => remaining_monthly_fund(p.hard_fund, cumulative_salary, month),
            _ => None,
        };

        ComplianceResult {
            unit_key: total.unit_key.clone(),
            completion_ratio,
            salary_revenue_ratio,
            cumulative_salary_revenue_ratio,
            cumulative_completion_ratio,
            allowed_ratio: cap,
            allowed_fund,
            excess_fund,
            excess_ratio,
            allowed_hard_fund,
            target_revenue_adjusted,
            permitted_salary_fund: permitted,
            remaining_monthly_fund: remaining,
        }
    }

    /// Evaluates every reportable unit in `totals`, pairing each with its
    /// cumulative totals when present. Inactive and denylisted units are left
    /// out.
    pub fn evaluate_all(
        &self,
        totals: &UnitTotals,
        cumulative: &UnitTotals,
        ledger: &TargetLedger,
    ) -> Vec<ComplianceResult> {
        let mut dropped = 0;
        let results: Vec<ComplianceResult> = totals
            .iter()
            .filter(|(key, total)| {
                let keep = !total.is_inactive() && !self.policy.is_denylisted(key);
                if !keep {
                    dropped += 1;
                }
                keep
            })
            .map(|(key, total)| self.evaluate(total, cumulative.get(key), ledger))
            .collect();

        debug!(
            "Evaluated {} units ({} inactive or denylisted)",
            results.len(),
            dropped
        );
        results
    }
}
