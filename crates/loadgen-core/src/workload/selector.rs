//! Weighted operation selection.

use rand::Rng;

use crate::config::WorkloadSpec;
use crate::operation::Operation;

/// Picks the next operation: cumulative-weight draw when weights are
/// configured, uniform over the operation set otherwise.
#[derive(Debug, Clone)]
pub struct OperationSelector {
    operations: Vec<Operation>,
    cumulative: Option<Vec<f64>>,
}

impl OperationSelector {
    pub fn from_spec(spec: &WorkloadSpec) -> Self {
        let effective = spec.effective_operations();
        match spec.weights() {
            Some(weights) => {
                // Only weighted operations are candidates; keep the configured order.
                let pairs: Vec<(Operation, f64)> = effective
                    .iter()
                    .filter_map(|op| weights.get(op).map(|w| (*op, *w)))
                    .collect();
                Self::weighted(pairs)
            }
            None => Self::uniform(effective),
        }
    }

    pub fn uniform(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            cumulative: None,
        }
    }

    pub fn weighted(pairs: Vec<(Operation, f64)>) -> Self {
        let total: f64 = pairs.iter().map(|(_, w)| w).sum();

        // Calculate cumulative distribution
        let mut cumulative = Vec::with_capacity(pairs.len());
        let mut sum = 0.0;
        for (_, w) in &pairs {
            sum += w / total;
            cumulative.push(sum);
        }

        Self {
            operations: pairs.into_iter().map(|(op, _)| op).collect(),
            cumulative: Some(cumulative),
        }
    }

    /// Operations this selector can return.
    pub fn candidates(&self) -> &[Operation] {
        &self.operations
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Operation {
        match &self.cumulative {
            Some(cumulative) => {
                let r: f64 = rng.gen();
                let index = cumulative
                    .iter()
                    .position(|&cum| r < cum)
                    .unwrap_or(self.operations.len() - 1);
                self.operations[index]
            }
            None => self.operations[rng.gen_range(0..self.operations.len())],
        }
    }
}
