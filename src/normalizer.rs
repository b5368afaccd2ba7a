//! Canonical unit keys.
//!
//! Full-time payroll, part-time payroll and revenue sources each name the same
//! organizational unit slightly differently (case, stray whitespace, alternate
//! spellings). Every source goes through [`KeyNormalizer::normalize`] before any
//! join or group-by so that all three agree on one key per unit.

use crate::error::{Result, RollupError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    aliases: BTreeMap<String, String>,
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a normalizer that also folds alternate names into a canonical
    /// unit. Both sides of every alias are canonicalized first; aliases that
    /// canonicalize to an empty key are rejected.
    pub fn with_aliases<I, K, V>(aliases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = BTreeMap::new();
        for (alias, canonical) in aliases {
            let alias = canonicalize(alias.as_ref())?;
            let canonical = canonicalize(canonical.as_ref())?;
            if alias != canonical {
                table.insert(alias, canonical);
            }
        }
        Ok(Self { aliases: table })
    }

    /// Returns the join key for `raw_name`.
    ///
    /// Fails with [`RollupError::InvalidKey`] for empty or whitespace-only
    /// names; those records must be dropped, never folded into a default unit.
    pub fn normalize(&self, raw_name: &str) -> Result<String> {
        let key = canonicalize(raw_name)?;
        match self.aliases.get(&key) {
            Some(canonical) => Ok(canonical.clone()),
            None => Ok(key),
        }
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

fn canonicalize(raw_name: &str) -> Result<String> {
    let collapsed = raw_name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        return Err(RollupError::InvalidKey(raw_name.to_string()));
    }

    Ok(collapsed)
}
