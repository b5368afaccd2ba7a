use crate::error::Result;
use crate::overrides::OverrideRule;
use crate::utils::{validate_month, year_month_of};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        validate_month(month)?;
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        let (year, month) = year_month_of(date);
        Self { year, month }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Category {
    #[schemars(description = "Salary paid to full-time staff")]
    FullTime,

    #[schemars(description = "Salary paid to part-time and contract staff")]
    PartTime,
}

/// A monetary amount as delivered by a source: either already numeric or a
/// locale-formatted string such as `"1,250,000"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Amount {
    Number(Decimal),
    Text(String),
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::Number(value)
    }
}

impl From<&str> for Amount {
    fn from(value: &str) -> Self {
        Amount::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub unit_key: String,
    pub period: YearMonth,
    pub category: Category,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub unit_key: String,
    pub period: YearMonth,
    pub target_amount: Amount,
    pub actual_amount: Amount,
    /// Optional classification of the revenue line (e.g. a business block).
    #[serde(default)]
    pub revenue_block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceRecord {
    Compensation(CompensationRecord),
    Revenue(RevenueRecord),
}

impl SourceRecord {
    pub fn unit_key(&self) -> &str {
        match self {
            SourceRecord::Compensation(r) => &r.unit_key,
            SourceRecord::Revenue(r) => &r.unit_key,
        }
    }

    pub fn period(&self) -> YearMonth {
        match self {
            SourceRecord::Compensation(r) => r.period,
            SourceRecord::Revenue(r) => r.period,
        }
    }
}

impl From<CompensationRecord> for SourceRecord {
    fn from(record: CompensationRecord) -> Self {
        SourceRecord::Compensation(record)
    }
}

impl From<RevenueRecord> for SourceRecord {
    fn from(record: RevenueRecord) -> Self {
        SourceRecord::Revenue(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum PeriodKind {
    /// Exactly one calendar month.
    Month,
    /// Year to date, restricted to months with reported revenue.
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPeriodTotal {
    pub unit_key: String,
    pub period_kind: PeriodKind,
    pub ft_salary: Decimal,
    pub pt_salary: Decimal,
    pub total_salary: Decimal,
    pub total_revenue: Decimal,
    pub target_revenue: Decimal,
    /// Target revenue broken down by revenue block. Untagged targets are not listed.
    #[serde(default)]
    pub block_targets: BTreeMap<String, Decimal>,
    /// Months in which the unit reported actual revenue above zero.
    #[serde(default)]
    pub active_months: BTreeSet<u32>,
}

impl UnitPeriodTotal {
    pub fn empty(unit_key: impl Into<String>, period_kind: PeriodKind) -> Self {
        Self {
            unit_key: unit_key.into(),
            period_kind,
            ft_salary: Decimal::ZERO,
            pt_salary: Decimal::ZERO,
            total_salary: Decimal::ZERO,
            total_revenue: Decimal::ZERO,
            target_revenue: Decimal::ZERO,
            block_targets: BTreeMap::new(),
            active_months: BTreeSet::new(),
        }
    }

    pub fn add_salary(&mut self, category: Category, amount: Decimal) {
        match category {
            Category::FullTime => self.ft_salary += amount,
            Category::PartTime => self.pt_salary += amount,
        }
        self.total_salary += amount;
    }

    pub fn add_revenue(
        &mut self,
        month: u32,
        target: Decimal,
        actual: Decimal,
        block: Option<&str>,
    ) {
        self.target_revenue += target;
        self.total_revenue += actual;
        if let Some(block) = block {
            *self.block_targets.entry(block.to_string()).or_default() += target;
        }
        if actual > Decimal::ZERO {
            self.active_months.insert(month);
        }
    }

    /// Adds every numeric component of `other` into `self`.
    pub fn absorb(&mut self, other: &UnitPeriodTotal) {
        self.ft_salary += other.ft_salary;
        self.pt_salary += other.pt_salary;
        self.total_salary += other.total_salary;
        self.total_revenue += other.total_revenue;
        self.target_revenue += other.target_revenue;
        for (block, target) in &other.block_targets {
            *self.block_targets.entry(block.clone()).or_default() += *target;
        }
        self.active_months.extend(other.active_months.iter().copied());
    }

    /// True when neither salary nor revenue was reported.
    pub fn is_inactive(&self) -> bool {
        self.total_salary.is_zero() && self.total_revenue.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub unit_key: String,
    pub completion_ratio: Decimal,
    pub salary_revenue_ratio: Decimal,
    pub cumulative_salary_revenue_ratio: Decimal,
    pub cumulative_completion_ratio: Decimal,
    pub allowed_ratio: Decimal,
    pub allowed_fund: Decimal,
    pub excess_fund: Decimal,
    pub excess_ratio: Decimal,
    /// Cumulative salary the unit would be entitled to at exactly the cap.
    pub allowed_hard_fund: Decimal,
    pub target_revenue_adjusted: Decimal,
    pub permitted_salary_fund: Option<Decimal>,
    pub remaining_monthly_fund: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FundPlan {
    #[schemars(description = "Standard (baseline) salary fund for the period, before completion tiering")]
    pub standard_fund: Decimal,

    #[schemars(description = "Hard salary fund for the whole year, used to spread what remains over the remaining months")]
    pub hard_fund: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PolicyConfig {
    #[schemars(
        description = "Maximum allowed salary-to-revenue ratio as a fraction (0.15 = 15%). Required."
    )]
    pub allowed_ratio_cap: Option<Decimal>,

    #[schemars(
        description = "Per-unit target override rules keyed by unit name. Required; use an empty object when no unit is overridden."
    )]
    pub overrides: Option<BTreeMap<String, OverrideRule>>,

    #[serde(default)]
    #[schemars(
        description = "Holding or umbrella entities that must never appear as individually evaluated rows."
    )]
    pub denylist: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Unit names excluded from hierarchy rollups.")]
    pub exclusions: Vec<String>,

    #[serde(default)]
    #[schemars(
        description = "Alternate spellings or merged locations mapped to their canonical unit name."
    )]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    #[schemars(description = "Optional per-unit salary fund plans keyed by unit name.")]
    pub fund_plans: BTreeMap<String, FundPlan>,
}

impl PolicyConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PolicyConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
