use ndarray::{Array2, ArrayView3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Predictor, PredictorError, flatten_samples, flatten_window};
use crate::windowing::TrainingSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf(f32),
    Split {
        feature: usize,
        threshold: f32,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn eval(&self, inputs: &[f32]) -> f32 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if inputs[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ForestModel {
    inputs: usize,
    trees: Vec<Node>,
}

impl ForestModel {
    /// Every split must address an input inside the window width.
    fn validate(&self) -> Result<(), PredictorError> {
        let mut stack: Vec<&Node> = self.trees.iter().collect();
        while let Some(node) = stack.pop() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= self.inputs {
                    return Err(PredictorError::MalformedArtifact(format!(
                        "split on input {} of {}",
                        feature, self.inputs
                    )));
                }
                stack.push(left);
                stack.push(right);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub trees: usize,
    pub max_depth: usize,
    pub min_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 30,
            max_depth: 8,
            min_leaf: 5,
            seed: 42,
        }
    }
}

/// Bagged regression trees. Each tree sees a bootstrap sample and tries a
/// random `sqrt(inputs)` subset of inputs at every split.
#[derive(Debug, Clone, Default)]
pub struct ForestPredictor {
    params: ForestParams,
    model: Option<ForestModel>,
}

impl ForestPredictor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            model: None,
        }
    }
}

struct Grower<'a> {
    x: &'a Array2<f32>,
    y: &'a [f32],
    params: ForestParams,
    subset: usize,
}

impl Grower<'_> {
    fn mean(&self, rows: &[usize]) -> f32 {
        rows.iter().map(|&r| self.y[r]).sum::<f32>() / rows.len() as f32
    }

    fn grow(&self, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> Node {
        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_leaf {
            return Node::Leaf(self.mean(rows));
        }

        let candidates = index::sample(rng, self.x.ncols(), self.subset).into_vec();
        let Some((feature, threshold)) = self.best_split(rows, &candidates) else {
            return Node::Leaf(self.mean(rows));
        };

        let x = self.x;
        rows.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
        let cut = rows.partition_point(|&r| x[[r, feature]] <= threshold);
        let (left, right) = rows.split_at_mut(cut);
        Node::Split {
            feature,
            threshold,
            left: Box::new(self.grow(left, depth + 1, rng)),
            right: Box::new(self.grow(right, depth + 1, rng)),
        }
    }

    // Lowest summed squared error over candidate features; thresholds sit
    // halfway between distinct neighbouring values.
    fn best_split(&self, rows: &[usize], candidates: &[usize]) -> Option<(usize, f32)> {
        let n = rows.len();
        let min_leaf = self.params.min_leaf;
        let total: f32 = rows.iter().map(|&r| self.y[r]).sum();
        let total_sq: f32 = rows.iter().map(|&r| self.y[r] * self.y[r]).sum();
        let parent_sse = total_sq - total * total / n as f32;

        let mut best: Option<(usize, f32, f32)> = None;
        let mut sorted = rows.to_vec();
        for &feature in candidates {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let (mut sum_l, mut sq_l) = (0.0f32, 0.0f32);
            for i in 0..n - 1 {
                let yi = self.y[sorted[i]];
                sum_l += yi;
                sq_l += yi * yi;
                let (nl, nr) = (i + 1, n - i - 1);
                if nl < min_leaf || nr < min_leaf {
                    continue;
                }
                let (lo, hi) = (self.x[[sorted[i], feature]], self.x[[sorted[i + 1], feature]]);
                if lo == hi {
                    continue;
                }
                let (sum_r, sq_r) = (total - sum_l, total_sq - sq_l);
                let sse = (sq_l - sum_l * sum_l / nl as f32) + (sq_r - sum_r * sum_r / nr as f32);
                if sse < parent_sse && best.is_none_or(|(_, _, b)| sse < b) {
                    best = Some((feature, (lo + hi) / 2.0, sse));
                }
            }
        }
        best.map(|(f, t, _)| (f, t))
    }
}

impl Predictor for ForestPredictor {
    fn name(&self) -> &'static str {
        "forest"
    }

    fn train(&mut self, set: &TrainingSet) -> Result<(), PredictorError> {
        if set.is_empty() {
            return Err(PredictorError::EmptyTrainingSet);
        }
        let x = flatten_samples(set.x.view());
        let y = set.y.to_vec();
        let (n, d) = x.dim();
        let grower = Grower {
            x: &x,
            y: &y,
            params: self.params,
            subset: ((d as f64).sqrt().round() as usize).clamp(1, d),
        };

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let trees = (0..self.params.trees)
            .map(|_| {
                let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grower.grow(&mut rows, 0, &mut rng)
            })
            .collect();

        debug!(
            "Forest predictor fit: {} trees on {} samples x {} inputs",
            self.params.trees, n, d
        );
        self.model = Some(ForestModel { inputs: d, trees });
        Ok(())
    }

    fn predict(&self, window: ArrayView3<f32>) -> Result<f32, PredictorError> {
        let model = self
            .model
            .as_ref()
            .ok_or(PredictorError::NotTrained(self.name()))?;
        let inputs = flatten_window(window, model.inputs)?;
        if model.trees.is_empty() {
            return Err(PredictorError::NotTrained(self.name()));
        }
        Ok(model.trees.iter().map(|t| t.eval(&inputs)).sum::<f32>() / model.trees.len() as f32)
    }

    fn is_trained(&self) -> bool {
        self.model.as_ref().is_some_and(|m| !m.trees.is_empty())
    }

    fn to_artifact(&self) -> Result<Option<Vec<u8>>, PredictorError> {
        match &self.model {
            Some(model) => Ok(Some(serde_json::to_vec(model)?)),
            None => Ok(None),
        }
    }

    fn load_artifact(&mut self, bytes: &[u8]) -> Result<(), PredictorError> {
        let model: ForestModel = serde_json::from_slice(bytes)?;
        model.validate()?;
        self.model = Some(model);
        Ok(())
    }
}
