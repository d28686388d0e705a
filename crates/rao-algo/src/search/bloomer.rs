//! Child-combination generation for one search-tree depth.

use crate::params::RaoParameters;
use crate::perimeter::{OptimizationPerimeter, PerimeterKind};
use crate::search::stable_hash;
use rao_core::{ActionId, Crac};
use std::collections::BTreeMap;

/// Produces the action combinations a leaf may add at the next depth.
///
/// Candidates are the perimeter's available network actions not yet applied
/// and compatible with everything applied so far, plus the configured
/// predefined combinations. Curative usage limits prune combinations that
/// would overshoot the global or per-operator activation budget.
///
/// The output order is deterministic: predefined combinations first, then
/// larger combinations, then ascending stable hash.
pub struct Bloomer<'a> {
    crac: &'a Crac,
    perimeter: &'a OptimizationPerimeter,
    params: &'a RaoParameters,
}

impl<'a> Bloomer<'a> {
    pub fn new(crac: &'a Crac, perimeter: &'a OptimizationPerimeter, params: &'a RaoParameters) -> Self {
        Bloomer {
            crac,
            perimeter,
            params,
        }
    }

    fn is_applicable(&self, combination: &[ActionId], applied: &[ActionId]) -> bool {
        combination.iter().all(|&id| {
            self.perimeter.network_actions.contains(&id)
                && !applied.contains(&id)
                && self.crac.network_action(id).is_compatible_with(applied)
                && self
                    .crac
                    .network_action(id)
                    .is_compatible_with(combination)
        })
    }

    fn within_usage_limits(&self, combination: &[ActionId], applied: &[ActionId]) -> bool {
        if self.perimeter.kind != PerimeterKind::Curative {
            return true;
        }
        let limits = &self.params.ra_limits;
        if let Some(max) = limits.max_curative_ra {
            if applied.len() + combination.len() > max {
                return false;
            }
        }
        if !limits.max_curative_ra_per_operator.is_empty() {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for &id in applied.iter().chain(combination) {
                if let Some(op) = self.crac.network_action(id).operator.as_deref() {
                    *counts.entry(op).or_default() += 1;
                }
            }
            for (operator, count) in counts {
                if let Some(&max) = limits.max_curative_ra_per_operator.get(operator) {
                    if count > max {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Combinations to branch on below a leaf that already applied `applied`.
    pub fn bloom(&self, applied: &[ActionId]) -> Vec<Vec<ActionId>> {
        let mut predefined: Vec<Vec<ActionId>> = self
            .params
            .tree
            .predefined_combinations
            .iter()
            .filter(|combo| combo.len() > 1)
            .filter(|combo| self.is_applicable(combo, applied))
            .filter(|combo| self.within_usage_limits(combo, applied))
            .cloned()
            .collect();
        predefined.sort_by_key(|combo| (std::cmp::Reverse(combo.len()), stable_hash(combo)));

        let mut singletons: Vec<Vec<ActionId>> = self
            .perimeter
            .network_actions
            .iter()
            .map(|&id| vec![id])
            .filter(|combo| self.is_applicable(combo, applied))
            .filter(|combo| self.within_usage_limits(combo, applied))
            .collect();
        singletons.sort_by_key(|combo| stable_hash(combo));

        predefined.extend(singletons);
        predefined
    }
}
