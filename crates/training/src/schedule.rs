/// Step learning-rate decay: multiply by `gamma` every `step_size` steps.
///
/// `step` advances first and then reports the rate, so the `k`-th call
/// (1-based) yields `base_lr * gamma^floor(k / step_size)`.
#[derive(Debug, Clone)]
pub struct StepDecay {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    steps: usize,
}

impl StepDecay {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            steps: 0,
        }
    }

    pub fn step(&mut self) -> f64 {
        self.steps += 1;
        self.lr()
    }

    pub fn lr(&self) -> f64 {
        let decays = (self.steps / self.step_size) as i32;
        self.base_lr * self.gamma.powi(decays)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}
