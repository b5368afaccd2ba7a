use crate::aggregator::UnitTotals;
use crate::error::{Result, RollupError};
use crate::normalizer::KeyNormalizer;
use crate::schema::{PeriodKind, UnitPeriodTotal};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of the organizational hierarchy as stored: a node and the id of
/// its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatOrgUnit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Id of the single ancestor this node is allowed to roll up into.
    #[serde(default)]
    pub dynamic_anchor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<OrgNode>,
    #[serde(default)]
    pub dynamic_anchor: Option<String>,
}

impl OrgNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            children: Vec::new(),
            dynamic_anchor: None,
        }
    }

    pub fn with_children(mut self, children: Vec<OrgNode>) -> Self {
        self.children = children;
        self
    }

    /// Marks the node as a dynamic child of ancestor `anchor_id`.
    pub fn anchored_to(mut self, anchor_id: impl Into<String>) -> Self {
        self.dynamic_anchor = Some(anchor_id.into());
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic_anchor.is_some()
    }

    pub fn find(&self, id: &str) -> Option<&OrgNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut OrgNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a OrgNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// A validated organizational tree: unique ids, a single root, and every
/// dynamic node anchored to one of its own ancestors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgTree {
    root: OrgNode,
}

impl OrgTree {
    pub fn from_root(root: OrgNode) -> Result<Self> {
        validate_node_ids(&root)?;
        validate_dynamic_anchors(&root, &mut Vec::new())?;
        Ok(Self { root })
    }

    /// Builds the tree from stored parent-pointer rows.
    ///
    /// Fails with [`RollupError::CyclicHierarchy`] when some rows can never be
    /// reached from the root because their parent chain loops.
    pub fn from_flat_units(units: &[FlatOrgUnit]) -> Result<Self> {
        let mut by_id: BTreeMap<&str, &FlatOrgUnit> = BTreeMap::new();
        for unit in units {
            if by_id.insert(unit.id.as_str(), unit).is_some() {
                return Err(RollupError::DuplicateNodeId(unit.id.clone()));
            }
        }

        let mut children: BTreeMap<&str, Vec<&FlatOrgUnit>> = BTreeMap::new();
        let mut roots = Vec::new();
        for unit in units {
            match &unit.parent_id {
                Some(parent) => {
                    if !by_id.contains_key(parent.as_str()) {
                        return Err(RollupError::UnknownParent {
                            node: unit.id.clone(),
                            parent: parent.clone(),
                        });
                    }
                    children.entry(parent.as_str()).or_default().push(unit);
                }
                None => roots.push(unit),
            }
        }

        let root_unit = match roots.as_slice() {
            [single] => *single,
            [] => {
                return match units.first() {
                    Some(unit) => Err(RollupError::CyclicHierarchy(unit.name.clone())),
                    None => Err(RollupError::RootNotFound("hierarchy is empty".to_string())),
                }
            }
            many => {
                return Err(RollupError::RootNotFound(format!(
                    "expected a single top-level unit, found {}",
                    many.len()
                )))
            }
        };

        let mut reached = BTreeSet::new();
        let root = build_subtree(root_unit, &children, &mut reached);

        // Every unit has a known parent, so anything unreached sits on a loop.
        if let Some(stray) = units.iter().find(|u| !reached.contains(u.id.as_str())) {
            return Err(RollupError::CyclicHierarchy(stray.name.clone()));
        }

        debug!("Built organizational tree with {} nodes", reached.len());
        Self::from_root(root)
    }

    pub fn root(&self) -> &OrgNode {
        &self.root
    }

    pub fn find(&self, id: &str) -> Option<&OrgNode> {
        self.root.find(id)
    }

    /// Attaches `required` under ancestor `anchor_id` as dynamic children,
    /// skipping any whose name already exists anywhere in that ancestor's
    /// subtree. Returns how many nodes were attached.
    pub fn attach_dynamic_children(
        &mut self,
        anchor_id: &str,
        required: Vec<OrgNode>,
        normalizer: &KeyNormalizer,
    ) -> Result<usize> {
        let mut existing_ids = BTreeSet::new();
        self.root.visit(&mut |n| {
            existing_ids.insert(n.id.clone());
        });

        let anchor = self
            .root
            .find_mut(anchor_id)
            .ok_or_else(|| RollupError::RootNotFound(format!("anchor '{}'", anchor_id)))?;

        let mut present = BTreeSet::new();
        anchor.visit(&mut |n| {
            if let Ok(key) = normalizer.normalize(&n.name) {
                present.insert(key);
            }
        });

        let mut attached = 0;
        for node in required {
            let key = normalizer.normalize(&node.name)?;
            if present.contains(&key) {
                continue;
            }
            if !existing_ids.insert(node.id.clone()) {
                return Err(RollupError::DuplicateNodeId(node.id));
            }
            present.insert(key);
            anchor.children.push(node.anchored_to(anchor_id));
            attached += 1;
        }

        if attached > 0 {
            debug!("Attached {} dynamic children under '{}'", attached, anchor_id);
        }
        Ok(attached)
    }
}

fn build_subtree<'a>(
    unit: &'a FlatOrgUnit,
    children: &BTreeMap<&str, Vec<&'a FlatOrgUnit>>,
    reached: &mut BTreeSet<&'a str>,
) -> OrgNode {
    reached.insert(unit.id.as_str());
    let kids = children
        .get(unit.id.as_str())
        .map(|list| {
            list.iter()
                .map(|child| build_subtree(child, children, reached))
                .collect()
        })
        .unwrap_or_default();

    OrgNode {
        id: unit.id.clone(),
        name: unit.name.clone(),
        children: kids,
        dynamic_anchor: unit.dynamic_anchor.clone(),
    }
}

fn validate_node_ids(root: &OrgNode) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut duplicate = None;
    root.visit(&mut |n| {
        if !seen.insert(n.id.as_str()) && duplicate.is_none() {
            duplicate = Some(n.id.clone());
        }
    });
    match duplicate {
        Some(id) => Err(RollupError::DuplicateNodeId(id)),
        None => Ok(()),
    }
}

fn validate_dynamic_anchors<'a>(node: &'a OrgNode, ancestors: &mut Vec<&'a str>) -> Result<()> {
    if let Some(anchor) = &node.dynamic_anchor {
        if !ancestors.contains(&anchor.as_str()) {
            return Err(RollupError::InvalidDynamicAnchor {
                node: node.id.clone(),
                anchor: anchor.clone(),
            });
        }
    }
    ancestors.push(node.id.as_str());
    for child in &node.children {
        validate_dynamic_anchors(child, ancestors)?;
    }
    ancestors.pop();
    Ok(())
}

/// Rolled-up totals for one node, with the rolled-up children that
/// contributed to it. Nodes without data are pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupNode {
    pub id: String,
    pub name: String,
    pub unit_key: String,
    /// The unit key whose own totals this node drew, if any.
    pub direct_key: Option<String>,
    pub total: UnitPeriodTotal,
    pub children: Vec<RollupNode>,
}

impl RollupNode {
    pub fn find(&self, id: &str) -> Option<&RollupNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Flattens the rolled-up totals keyed by unit key, first occurrence wins.
    pub fn flatten(&self) -> UnitTotals {
        let mut out = BTreeMap::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut UnitTotals) {
        out.entry(self.unit_key.clone())
            .or_insert_with(|| self.total.clone());
        for child in &self.children {
            child.collect_into(out);
        }
    }
}

pub struct HierarchyRollup<'a> {
    normalizer: &'a KeyNormalizer,
    exclusions: BTreeSet<String>,
}

impl<'a> HierarchyRollup<'a> {
    pub fn new<I, S>(normalizer: &'a KeyNormalizer, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exclusions = exclusions
            .into_iter()
            .filter_map(|name| normalizer.normalize(name.as_ref()).ok())
            .collect();
        Self {
            normalizer,
            exclusions,
        }
    }

    /// Total for `node` and all its eligible descendants, or `None` when
    /// nothing under it reported data.
    ///
    /// `node` is the anchor of the walk: it is evaluated even if its name is
    /// excluded (its own totals are then left out, its children are not).
    pub fn rollup(&self, node: &OrgNode, totals: &UnitTotals) -> Option<UnitPeriodTotal> {
        self.rollup_tree(node, totals).map(|r| r.total)
    }

    pub fn rollup_tree(&self, node: &OrgNode, totals: &UnitTotals) -> Option<RollupNode> {
        let mut dynamic_keys = BTreeSet::new();
        node.visit(&mut |n| {
            if n.is_dynamic() {
                if let Ok(key) = self.normalizer.normalize(&n.name) {
                    dynamic_keys.insert(key);
                }
            }
        });

        let period_kind = totals
            .values()
            .next()
            .map(|t| t.period_kind)
            .unwrap_or(PeriodKind::Month);

        let mut walk = Walk {
            rollup: self,
            totals,
            period_kind,
            dynamic_keys,
            claimed: BTreeSet::new(),
            path: Vec::new(),
        };
        walk.visit(node, true)
    }
}

struct Walk<'r, 't> {
    rollup: &'r HierarchyRollup<'r>,
    totals: &'t UnitTotals,
    period_kind: PeriodKind,
    dynamic_keys: BTreeSet<String>,
    claimed: BTreeSet<String>,
    path: Vec<String>,
}

impl Walk<'_, '_> {
    fn visit(&mut self, node: &OrgNode, is_anchor: bool) -> Option<RollupNode> {
        let key = match self.rollup.normalizer.normalize(&node.name) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Node '{}' has no usable name: {}", node.id, e);
                None
            }
        };

        let excluded = key
            .as_ref()
            .map_or(false, |k| self.rollup.exclusions.contains(k));
        if excluded && !is_anchor {
            return None;
        }

        let mut accumulated: Option<UnitPeriodTotal> = None;
        let mut direct_key = None;

        if let Some(k) = key.as_ref().filter(|_| !excluded) {
            // A key owned by a dynamic node is drawn only by that node.
            let owner_allowed = node.is_dynamic() || !self.dynamic_keys.contains(k);
            if owner_allowed {
                if let Some(direct) = self.totals.get(k) {
                    if self.claimed.insert(k.clone()) {
                        accumulated = Some(direct.clone());
                        direct_key = Some(k.clone());
                    } else {
                        warn!(
                            "Unit '{}' appears more than once in the hierarchy; node '{}' skipped its totals",
                            k, node.id
                        );
                    }
                }
            }
        }

        let unit_key = key.unwrap_or_else(|| node.name.clone());

        self.path.push(node.id.clone());
        let mut children = Vec::new();
        for child in &node.children {
            if let Some(anchor) = &child.dynamic_anchor {
                if !self.path.contains(anchor) {
                    debug!(
                        "Skipping dynamic node '{}' outside its anchor '{}'",
                        child.id, anchor
                    );
                    continue;
                }
            }

            if let Some(rolled) = self.visit(child, false) {
                accumulated
                    .get_or_insert_with(|| UnitPeriodTotal::empty(unit_key.clone(), self.period_kind))
                    .absorb(&rolled.total);
                children.push(rolled);
            }
        }
        self.path.pop();

        accumulated.map(|mut total| {
            total.unit_key = unit_key.clone();
            RollupNode {
                id: node.id.clone(),
                name: node.name.clone(),
                unit_key,
                direct_key,
                total,
                children,
            }
        })
    }
}
