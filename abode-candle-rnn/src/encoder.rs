use crate::{
    core::{CoreFactory, RecurrentCore},
    router::{build_rnn_inputs, build_rnn_out_from_seq, mask_hidden_states},
    RnnConfig,
};
use abode_core::{seq::SequenceDescriptor, AbodeError, Registry};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use log::{debug, trace};

/// Runs a [`RecurrentCore`] over either a single step or a rollout window.
///
/// In a rollout window the rows of `x` are `(t, n)` records of `T` steps over
/// `N` environments. The window is split into episode segments, and every
/// segment starts from the carried state of its environment only if its episode
/// started before the window.
pub struct RnnStateEncoder {
    core: Box<dyn RecurrentCore>,
}

impl RnnStateEncoder {
    pub fn new(core: Box<dyn RecurrentCore>) -> Self {
        Self { core }
    }

    /// Builds the core named by `config.rnn_type` in `registry`.
    pub fn build(config: &RnnConfig, registry: &Registry<CoreFactory>, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let factory = registry.get(&config.rnn_type)?;
        debug!("Build {} encoder: {:?}", config.rnn_type, config);
        Ok(Self::new(factory(config, vb)?))
    }

    /// The underlying core.
    pub fn core(&self) -> &dyn RecurrentCore {
        self.core.as_ref()
    }

    pub fn num_recurrent_layers(&self) -> usize {
        self.core.num_recurrent_layers()
    }

    pub fn hidden_size(&self) -> usize {
        self.core.hidden_size()
    }

    /// Zero state for `n_envs` environments.
    pub fn zero_hidden(&self, n_envs: usize, device: &Device) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (self.num_recurrent_layers(), n_envs, self.hidden_size()),
            DType::F32,
            device,
        )?)
    }

    /// Advances the hidden state over `x`.
    ///
    /// * `x` - Either `(N, input)` for a single step, or `(T * N, input)` for a
    ///   window.
    /// * `hidden` - `(num_recurrent_layers, N, hidden_size)` state.
    /// * `masks` - One flag per row of `x`, `false` where an episode starts.
    /// * `info` - Packing of the window, must be `None` for a single step.
    ///
    /// A single step is detected by `x` having as many rows as `hidden` has
    /// environments. Returns the output rows in the order of `x` and the next
    /// hidden state.
    pub fn forward(
        &self,
        x: &Tensor,
        hidden: &Tensor,
        masks: &[bool],
        info: Option<&SequenceDescriptor>,
    ) -> Result<(Tensor, Tensor)> {
        let (n_layers, n_envs, _) = hidden.dims3()?;
        if n_layers != self.num_recurrent_layers() {
            return Err(AbodeError::UsageError(format!(
                "Hidden state has {} layers, the core has {}",
                n_layers,
                self.num_recurrent_layers()
            ))
            .into());
        }

        if x.dim(0)? == n_envs {
            if info.is_some() {
                return Err(AbodeError::UsageError(
                    "A sequence descriptor was given for a single step".to_string(),
                )
                .into());
            }
            self.single_forward(x, hidden, masks)
        } else {
            let info = info.ok_or_else(|| {
                AbodeError::UsageError("A rollout window requires a sequence descriptor".to_string())
            })?;
            self.seq_forward(x, hidden, masks, info)
        }
    }

    fn single_forward(&self, x: &Tensor, hidden: &Tensor, masks: &[bool]) -> Result<(Tensor, Tensor)> {
        let hidden = mask_hidden_states(hidden, masks)?;
        self.core.step(x, &hidden)
    }

    fn seq_forward(
        &self,
        x: &Tensor,
        hidden: &Tensor,
        masks: &[bool],
        info: &SequenceDescriptor,
    ) -> Result<(Tensor, Tensor)> {
        trace!(
            "Encode {} rows as {} sequences, max length {}",
            info.len(),
            info.num_sequences(),
            info.max_length()
        );
        let (packed, states) = build_rnn_inputs(x, hidden, masks, info)?;
        let (out, states) = self.core.forward_packed(&packed, &states)?;
        build_rnn_out_from_seq(&out, &states, info)
    }
}
