//! Episode boundaries of a rollout window.
use abode_candle_rnn::RnnStateEncoder;
use abode_core::{seq::SequenceDescriptor, AbodeError};
use anyhow::Result;
use candle_core::Tensor;
use ndarray::Array2;

/// Done flags of the current rollout window of `N` environments.
///
/// The window also remembers, for each environment, whether its episode was
/// still running when the window started. Together they give the mask of every
/// record: `false` where an episode starts, so the recurrent state must not be
/// carried into it.
#[derive(Debug, Clone)]
pub struct RolloutWindow {
    start_masks: Vec<bool>,
    dones: Vec<Vec<bool>>,
}

impl RolloutWindow {
    /// Creates the first window. Every episode starts with it.
    pub fn new(n_envs: usize) -> Self {
        Self {
            start_masks: vec![false; n_envs],
            dones: vec![],
        }
    }

    /// Number of environments.
    pub fn num_envs(&self) -> usize {
        self.start_masks.len()
    }

    /// Number of steps recorded in the window.
    pub fn len(&self) -> usize {
        self.dones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dones.is_empty()
    }

    /// Records the done flags of a step.
    pub fn push(&mut self, dones: &[bool]) -> Result<(), AbodeError> {
        if dones.len() != self.num_envs() {
            return Err(AbodeError::ConfigurationError(format!(
                "Got {} done flags for {} environments",
                dones.len(),
                self.num_envs()
            )));
        }
        self.dones.push(dones.to_vec());
        Ok(())
    }

    /// Masks of the next step, one per environment.
    pub fn step_masks(&self) -> Vec<bool> {
        match self.dones.last() {
            Some(dones) => dones.iter().map(|d| !d).collect(),
            None => self.start_masks.clone(),
        }
    }

    /// `(T, N)` done matrix.
    pub fn dones(&self) -> Array2<bool> {
        let (n_steps, n_envs) = (self.len(), self.num_envs());
        Array2::from_shape_fn((n_steps, n_envs), |(t, n)| self.dones[t][n])
    }

    /// `(T * N)` masks in `(t, n)` order.
    pub fn masks(&self) -> Vec<bool> {
        let mut masks = self.start_masks.clone();
        for dones in self.dones.iter().take(self.len().saturating_sub(1)) {
            masks.extend(dones.iter().map(|d| !d));
        }
        masks.truncate(self.len() * self.num_envs());
        masks
    }

    /// Packing of the window.
    pub fn descriptor(&self) -> Result<SequenceDescriptor, AbodeError> {
        SequenceDescriptor::from_dones(self.dones().view())
    }

    /// Runs `encoder` over the `(T * N, input)` rows of the window, starting from
    /// the `(layers, N, hidden)` state carried from the previous window.
    pub fn forward(
        &self,
        encoder: &RnnStateEncoder,
        x: &Tensor,
        hidden: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let masks = self.masks();
        match self.len() {
            1 => encoder.forward(x, hidden, &masks, None),
            _ => {
                let info = self.descriptor()?;
                encoder.forward(x, hidden, &masks, Some(&info))
            }
        }
    }

    /// Starts the next window.
    pub fn advance(&mut self) {
        self.start_masks = self.step_masks();
        self.dones.clear();
    }

    /// Drops the environment at `index`, following a pause of the controller.
    pub fn remove(&mut self, index: usize) -> Result<(), AbodeError> {
        if index >= self.num_envs() {
            return Err(AbodeError::UsageError(format!(
                "Index {} out of range for {} environments",
                index,
                self.num_envs()
            )));
        }
        self.start_masks.remove(index);
        for dones in self.dones.iter_mut() {
            dones.remove(index);
        }
        Ok(())
    }
}
