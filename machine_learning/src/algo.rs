//! The optimization-algorithm collaborator.
//!
//! The synchronization protocol decides *when* an update is accepted,
//! aggregated and applied; the arithmetic of those two operations lives
//! here, behind a configuration object that round-trips the wire so every
//! process of a tree works from the same rule.

use serde::{Deserialize, Serialize};

use crate::{
    Result, Weights,
    weights::check_same_shape,
};

/// How an update is derived from a pair of weight snapshots and how it is
/// folded back into the weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    /// `update = new - old`, `weights += update`.
    DeltaSum,
    /// Like `DeltaSum`, but the applied update is scaled by `factor`.
    ScaledDeltaSum { factor: f32 },
}

/// Algorithm configuration shared by every process of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algo {
    pub rule: UpdateRule,
    /// Whether a master applies the aggregated update before forwarding it
    /// to its parent and fanning weights back out, or after.
    pub apply_before_forward: bool,
    /// A root master validates every this many completed time steps.
    pub validate_every: u64,
}

impl Algo {
    /// Derives an update from the weights before and after a training step.
    pub fn compute_update(&self, old: &Weights, new: &Weights) -> Result<Weights> {
        check_same_shape("update operands", old, new)?;
        Ok(old.iter().zip(new).map(|(o, n)| n - o).collect())
    }

    /// Folds `update` into `weights` according to the configured rule.
    pub fn apply_update(&self, weights: &mut Weights, update: &Weights) -> Result<()> {
        check_same_shape("applied update", weights, update)?;
        let factor = match self.rule {
            UpdateRule::DeltaSum => 1.0,
            UpdateRule::ScaledDeltaSum { factor } => factor,
        };
        for (w, u) in weights.iter_mut().zip(update) {
            if factor == 1.0 {
                *w += u;
            } else {
                w.zip_mut_with(u, |w, u| *w += factor * u);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn algo(rule: UpdateRule) -> Algo {
        Algo {
            rule,
            apply_before_forward: true,
            validate_every: 1,
        }
    }

    #[test]
    fn delta_sum_round_trips() {
        let algo = algo(UpdateRule::DeltaSum);
        let old = vec![arr1(&[1.0, 2.0]).into_dyn()];
        let new = vec![arr1(&[1.5, 1.0]).into_dyn()];

        let update = algo.compute_update(&old, &new).unwrap();
        assert_eq!(update[0], arr1(&[0.5, -1.0]).into_dyn());

        let mut weights = old.clone();
        algo.apply_update(&mut weights, &update).unwrap();
        assert_eq!(weights, new);
    }

    #[test]
    fn scaled_delta_sum_scales_on_apply() {
        let algo = algo(UpdateRule::ScaledDeltaSum { factor: 0.5 });
        let mut weights = vec![arr1(&[0.0]).into_dyn()];
        let update = vec![arr1(&[2.0]).into_dyn()];

        algo.apply_update(&mut weights, &update).unwrap();
        assert_eq!(weights[0], arr1(&[1.0]).into_dyn());
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let algo = algo(UpdateRule::DeltaSum);
        let a = vec![arr1(&[1.0]).into_dyn()];
        let b = vec![arr1(&[1.0, 2.0]).into_dyn()];
        assert!(algo.compute_update(&a, &b).is_err());
    }

    #[test]
    fn config_round_trips_as_json() {
        let algo = algo(UpdateRule::ScaledDeltaSum { factor: 0.1 });
        let bytes = serde_json::to_vec(&algo).unwrap();
        let back: Algo = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, algo);
    }
}
