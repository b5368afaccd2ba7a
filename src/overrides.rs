use crate::aggregator::UnitTotals;
use crate::error::Result;
use crate::normalizer::KeyNormalizer;
use log::debug;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named exception to the default "use your own target" rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OverrideRule {
    /// The unit's target is the whole system target minus every target tagged
    /// with one revenue block.
    ResidualTarget {
        #[schemars(
            description = "Revenue block whose targets are carved out of the system-wide target (e.g. 'DVTV')."
        )]
        carve_out_block: String,
    },

    /// Replace the unit's target with a fixed figure.
    FixedTarget {
        #[schemars(description = "The target to use instead of the unit's nominal target.")]
        value: Decimal,
    },

    /// Multiply the unit's nominal target (e.g. 0.5 for a half-year unit).
    ScaleTarget { factor: Decimal },
}

impl OverrideRule {
    pub fn apply(&self, nominal_target: Decimal, ledger: &TargetLedger) -> Decimal {
        match self {
            OverrideRule::ResidualTarget { carve_out_block } => {
                ledger.system_target - ledger.block_target(carve_out_block)
            }
            OverrideRule::FixedTarget { value } => *value,
            OverrideRule::ScaleTarget { factor } => nominal_target * *factor,
        }
    }
}

/// System-wide target figures that residual overrides are computed against.
///
/// Built from the leaf-level aggregation so that rolled-up parents do not
/// inflate the system total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetLedger {
    pub system_target: Decimal,
    pub block_targets: BTreeMap<String, Decimal>,
}

impl TargetLedger {
    pub fn from_totals(totals: &UnitTotals) -> Self {
        let mut ledger = TargetLedger::default();
        for total in totals.values() {
            ledger.system_target += total.target_revenue;
            for (block, target) in &total.block_targets {
                *ledger.block_targets.entry(block.clone()).or_default() += *target;
            }
        }
        ledger
    }

    /// Sum of targets tagged `block`, zero when nothing carries the tag.
    pub fn block_target(&self, block: &str) -> Decimal {
        self.block_targets
            .get(block)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Override rules keyed by normalized unit key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideTable {
    rules: BTreeMap<String, OverrideRule>,
}

impl OverrideTable {
    /// Normalizes every configured unit name. Two names folding onto the same
    /// key keep the later rule.
    pub fn from_config(
        raw: &BTreeMap<String, OverrideRule>,
        normalizer: &KeyNormalizer,
    ) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for (name, rule) in raw {
            let key = normalizer.normalize(name)?;
            if rules.insert(key.clone(), rule.clone()).is_some() {
                debug!("Override for '{}' replaced by a later entry", key);
            }
        }
        Ok(Self { rules })
    }

    pub fn get(&self, unit_key: &str) -> Option<&OverrideRule> {
        self.rules.get(unit_key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The target used for `unit_key`: its override applied, else `nominal_target`.
    pub fn adjusted_target(
        &self,
        unit_key: &str,
        nominal_target: Decimal,
        ledger: &TargetLedger,
    ) -> Decimal {
        match self.rules.get(unit_key) {
            Some(rule) => rule.apply(nominal_target, ledger),
            None => nominal_target,
        }
    }
}
