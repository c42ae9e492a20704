//! Random search over the booster hyperparameters.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::gbtree::BoosterParams;

/// Prior for one real-valued hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dist {
    /// `round(uniform(low, high) / q) * q`
    QUniform { low: f64, high: f64, q: f64 },
    /// `exp(uniform(low, high))`
    LogUniform { low: f64, high: f64 },
}

impl Dist {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Dist::QUniform { low, high, q } => (rng.random_range(low..high) / q).round() * q,
            Dist::LogUniform { low, high } => rng.random_range(low..high).exp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    pub max_depth: Dist,
    pub learning_rate: Dist,
    pub reg_alpha: Dist,
    pub reg_lambda: Dist,
    pub min_child_weight: Dist,
    pub objective: String,
    pub seed: u64,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            max_depth: Dist::QUniform { low: 4.0, high: 100.0, q: 1.0 },
            learning_rate: Dist::LogUniform { low: -3.0, high: 0.0 },
            reg_alpha: Dist::LogUniform { low: -5.0, high: -1.0 },
            reg_lambda: Dist::LogUniform { low: -6.0, high: -1.0 },
            min_child_weight: Dist::LogUniform { low: -1.0, high: 3.0 },
            objective: "reg:linear".to_string(),
            seed: 42,
        }
    }
}

impl SearchSpace {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> BoosterParams {
        BoosterParams {
            max_depth: self.max_depth.sample(rng).max(1.0) as usize,
            learning_rate: self.learning_rate.sample(rng),
            reg_alpha: self.reg_alpha.sample(rng),
            reg_lambda: self.reg_lambda.sample(rng),
            min_child_weight: self.min_child_weight.sample(rng),
            objective: self.objective.clone(),
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub params: BoosterParams,
    pub loss: f64,
}

/// Evaluate `max_evals` sampled configurations one after another and return
/// the one with the lowest loss. `None` when no trial ran. A `NaN` loss
/// never wins over a number.
pub fn fmin<F, E>(space: &SearchSpace, max_evals: usize, seed: u64, mut objective: F) -> Result<Option<Trial>, E>
where
    F: FnMut(&BoosterParams) -> Result<f64, E>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<Trial> = None;

    for i in 0..max_evals {
        let params = space.sample(&mut rng);
        let loss = objective(&params)?;
        tracing::info!(trial = i, loss, max_depth = params.max_depth, learning_rate = params.learning_rate, "trial finished");

        let better = match &best {
            None => true,
            Some(b) => loss < b.loss || (b.loss.is_nan() && !loss.is_nan()),
        };
        if better {
            best = Some(Trial { params, loss });
        }
    }
    Ok(best)
}
