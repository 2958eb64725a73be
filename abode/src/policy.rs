use abode_candle_rnn::RnnStateEncoder;
use abode_core::{AbodeError, Env};
use anyhow::Result;
use candle_core::{Device, Tensor};

/// A policy with a recurrent state, acting on a batch of environments.
pub trait RecurrentPolicy<E: Env> {
    /// Zero state for `n_envs` environments.
    fn initial_hidden(&self, n_envs: usize) -> Result<Tensor>;

    /// Returns one action per observation and the next hidden state.
    ///
    /// `masks[n]` is `false` if the episode of environment `n` starts with
    /// `obs[n]`.
    fn act(&mut self, obs: &[E::Obs], hidden: &Tensor, masks: &[bool]) -> Result<(Vec<E::Act>, Tensor)>;
}

/// A [`RecurrentPolicy`] running a [`RnnStateEncoder`] between two conversions.
///
/// `features` turns an observation into the input row of the encoder and
/// `action` turns an output row into an action.
pub struct EncoderPolicy<E: Env> {
    encoder: RnnStateEncoder,
    features: Box<dyn Fn(&E::Obs) -> Vec<f32>>,
    action: Box<dyn Fn(&[f32]) -> E::Act>,
    device: Device,
}

impl<E: Env> EncoderPolicy<E> {
    pub fn new(
        encoder: RnnStateEncoder,
        features: impl Fn(&E::Obs) -> Vec<f32> + 'static,
        action: impl Fn(&[f32]) -> E::Act + 'static,
        device: Device,
    ) -> Self {
        Self {
            encoder,
            features: Box::new(features),
            action: Box::new(action),
            device,
        }
    }

    pub fn encoder(&self) -> &RnnStateEncoder {
        &self.encoder
    }

    /// Stacks the features of `obs` into a `(N, input)` tensor.
    pub fn features(&self, obs: &[E::Obs]) -> Result<Tensor> {
        let rows = obs.iter().map(|o| (self.features)(o)).collect::<Vec<_>>();
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != dim) {
            return Err(AbodeError::ConfigurationError(
                "Observations have features of different sizes".to_string(),
            )
            .into());
        }
        let data = rows.into_iter().flatten().collect::<Vec<_>>();
        Ok(Tensor::from_vec(data, (obs.len(), dim), &self.device)?)
    }
}

impl<E: Env> RecurrentPolicy<E> for EncoderPolicy<E> {
    fn initial_hidden(&self, n_envs: usize) -> Result<Tensor> {
        self.encoder.zero_hidden(n_envs, &self.device)
    }

    fn act(&mut self, obs: &[E::Obs], hidden: &Tensor, masks: &[bool]) -> Result<(Vec<E::Act>, Tensor)> {
        if obs.is_empty() {
            return Ok((vec![], hidden.clone()));
        }
        let x = self.features(obs)?;
        let (y, hidden) = self.encoder.forward(&x, hidden, masks, None)?;
        let acts = y
            .to_vec2::<f32>()?
            .iter()
            .map(|row| (self.action)(row.as_slice()))
            .collect();
        Ok((acts, hidden))
    }
}
