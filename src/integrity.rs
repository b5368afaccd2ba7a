use crate::aggregator::UnitTotals;
use crate::error::{Result, RollupError};
use crate::hierarchy::RollupNode;
use crate::schema::UnitPeriodTotal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub nodes_checked: usize,
    /// Unit keys whose own totals entered the rollup, each exactly once.
    pub drawn_keys: BTreeSet<String>,
    pub root_salary: Decimal,
    pub root_revenue: Decimal,
}

/// Checks a rolled-up tree against the aggregated unit totals it was built
/// from. All comparisons are exact.
pub struct RollupIntegrity<'a> {
    totals: &'a UnitTotals,
}

impl<'a> RollupIntegrity<'a> {
    pub fn new(totals: &'a UnitTotals) -> Self {
        Self { totals }
    }

    pub fn verify(&self, root: &RollupNode) -> Result<VerificationResult> {
        let mut drawn = BTreeSet::new();
        let mut nodes_checked = 0;
        self.check_node(root, &mut drawn, &mut nodes_checked)?;

        let mut expected = UnitPeriodTotal::empty(root.unit_key.clone(), root.total.period_kind);
        for key in &drawn {
            if let Some(total) = self.totals.get(key) {
                expected.absorb(total);
            }
        }
        compare_sums(&root.id, &root.total, &expected)?;

        Ok(VerificationResult {
            nodes_checked,
            drawn_keys: drawn,
            root_salary: root.total.total_salary,
            root_revenue: root.total.total_revenue,
        })
    }

    fn check_node(
        &self,
        node: &RollupNode,
        drawn: &mut BTreeSet<String>,
        nodes_checked: &mut usize,
    ) -> Result<()> {
        *nodes_checked += 1;

        let mut expected = UnitPeriodTotal::empty(node.unit_key.clone(), node.total.period_kind);
        if let Some(key) = &node.direct_key {
            if !drawn.insert(key.clone()) {
                return Err(RollupError::IntegrityViolation {
                    node: node.id.clone(),
                    rolled_up: format!("'{}' a second time", key),
                    expected: "each unit drawn once".to_string(),
                });
            }
            let direct = self.totals.get(key).ok_or_else(|| RollupError::IntegrityViolation {
                node: node.id.clone(),
                rolled_up: format!("unknown unit '{}'", key),
                expected: "an aggregated unit".to_string(),
            })?;
            expected.absorb(direct);
        }

        for child in &node.children {
            self.check_node(child, drawn, nodes_checked)?;
            expected.absorb(&child.total);
        }

        compare_sums(&node.id, &node.total, &expected)
    }
}

fn compare_sums(node: &str, actual: &UnitPeriodTotal, expected: &UnitPeriodTotal) -> Result<()> {
    let pairs = [
        ("salary", actual.total_salary, expected.total_salary),
        ("ft salary", actual.ft_salary, expected.ft_salary),
        ("pt salary", actual.pt_salary, expected.pt_salary),
        ("revenue", actual.total_revenue, expected.total_revenue),
        ("target", actual.target_revenue, expected.target_revenue),
    ];

    for (label, rolled_up, sum) in pairs {
        if rolled_up != sum {
            return Err(RollupError::IntegrityViolation {
                node: node.to_string(),
                rolled_up: format!("{} {}", label, rolled_up),
                expected: sum.to_string(),
            });
        }
    }
    Ok(())
}

pub fn verify_rollup(root: &RollupNode, totals: &UnitTotals) -> Result<VerificationResult> {
    RollupIntegrity::new(totals).verify(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyRollup, OrgNode};
    use crate::normalizer::KeyNormalizer;
    use crate::schema::{Category, PeriodKind};
    use rust_decimal_macros::dec;

    fn total(key: &str, salary: Decimal, revenue: Decimal) -> UnitPeriodTotal {
        let mut t = UnitPeriodTotal::empty(key, PeriodKind::Month);
        t.add_salary(Category::FullTime, salary);
        t.add_revenue(1, revenue, revenue, None);
        t
    }

    fn sample() -> (OrgNode, UnitTotals) {
        let tree = OrgNode::new("root", "Group").with_children(vec![
            OrgNode::new("a", "A").with_children(vec![OrgNode::new("a1", "Shared")]),
            OrgNode::new("b", "B").with_children(vec![OrgNode::new("b1", "Shared")]),
        ]);
        let mut totals = UnitTotals::new();
        totals.insert("a".into(), total("a", dec!(10), dec!(100)));
        totals.insert("shared".into(), total("shared", dec!(5), dec!(50)));
        totals.insert("b".into(), total("b", dec!(1), dec!(20)));
        (tree, totals)
    }

    #[test]
    fn test_verify_consistent_rollup() {
        let (tree, totals) = sample();
        let normalizer = KeyNormalizer::new();
        let rolled = HierarchyRollup::new(&normalizer, Vec::<String>::new())
            .rollup_tree(&tree, &totals)
            .unwrap();

        let result = verify_rollup(&rolled, &totals).unwrap();
        assert_eq!(result.root_salary, dec!(16));
        assert_eq!(result.root_revenue, dec!(170));
        assert_eq!(result.drawn_keys.len(), 3);
        assert_eq!(result.nodes_checked, 4);
    }

    #[test]
    fn test_verify_detects_tampered_total() {
        let (tree, totals) = sample();
        let normalizer = KeyNormalizer::new();
        let mut rolled = HierarchyRollup::new(&normalizer, Vec::<String>::new())
            .rollup_tree(&tree, &totals)
            .unwrap();
        rolled.total.total_salary += dec!(1);

        assert!(matches!(
            verify_rollup(&rolled, &totals),
            Err(RollupError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn test_verify_detects_double_draw() {
        let (_, totals) = sample();
        let leaf = |id: &str| RollupNode {
            id: id.to_string(),
            name: "Shared".to_string(),
            unit_key: "shared".to_string(),
            direct_key: Some("shared".to_string()),
            total: totals["shared"].clone(),
            children: vec![],
        };
        let mut root_total = UnitPeriodTotal::empty("group", PeriodKind::Month);
        root_total.absorb(&totals["shared"]);
        root_total.absorb(&totals["shared"]);
        let root = RollupNode {
            id: "root".to_string(),
            name: "Group".to_string(),
            unit_key: "group".to_string(),
            direct_key: None,
            total: root_total,
            children: vec![leaf("x"), leaf("y")],
        };

        let err = verify_rollup(&root, &totals).unwrap_err();
        assert!(err.to_string().contains("a second time"));
    }
}
