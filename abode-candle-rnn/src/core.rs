//! Recurrent cores run by [`RnnStateEncoder`](crate::RnnStateEncoder).
use crate::{router::PackedSequence, RnnConfig};
use abode_core::{AbodeError, Registry};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{
    rnn::{gru, lstm, GRUConfig, GRUState, LSTMConfig, LSTMState, GRU, LSTM, RNN},
    VarBuilder,
};

/// A recurrent network advancing a batch of hidden states one timestep at a time.
///
/// The hidden state is a `(num_recurrent_layers, batch, hidden_size)` tensor.
pub trait RecurrentCore {
    /// Number of rows of the hidden state.
    fn num_recurrent_layers(&self) -> usize;

    /// Size of the hidden state of a layer.
    fn hidden_size(&self) -> usize;

    /// Advances every element of the batch by one timestep.
    ///
    /// * `x` - `(batch, input)` inputs.
    /// * `hidden` - `(num_recurrent_layers, batch, hidden_size)` state.
    ///
    /// Returns the `(batch, output)` output and the next state.
    fn step(&self, x: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Runs the core over packed sequences.
    ///
    /// At depth `d` the first `batch_sizes[d]` sequences are advanced; the others
    /// have ended and keep their final state. `hidden` holds one state per
    /// sequence.
    fn forward_packed(
        &self,
        x: &PackedSequence,
        hidden: &Tensor,
    ) -> Result<(PackedSequence, Tensor)> {
        if x.batch_sizes.is_empty() {
            return Ok((x.clone(), hidden.clone()));
        }

        let n_seqs = hidden.dim(1)?;
        let mut h = hidden.clone();
        let mut outputs = Vec::with_capacity(x.batch_sizes.len());
        let mut offset = 0;

        for &n_active in x.batch_sizes.iter() {
            let input = x.data.narrow(0, offset, n_active)?;
            let (y, h_active) = self.step(&input, &h.narrow(1, 0, n_active)?)?;
            h = match n_active < n_seqs {
                true => Tensor::cat(&[&h_active, &h.narrow(1, n_active, n_seqs - n_active)?], 1)?,
                false => h_active,
            };
            outputs.push(y);
            offset += n_active;
        }

        let packed = PackedSequence {
            data: Tensor::cat(&outputs, 0)?,
            batch_sizes: x.batch_sizes.clone(),
        };
        Ok((packed, h))
    }
}

/// A core returning its input and state unchanged.
pub struct IdentityCore {
    num_layers: usize,
    hidden_size: usize,
}

impl IdentityCore {
    pub fn new(num_layers: usize, hidden_size: usize) -> Self {
        Self {
            num_layers,
            hidden_size,
        }
    }
}

impl RecurrentCore for IdentityCore {
    fn num_recurrent_layers(&self) -> usize {
        self.num_layers
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((x.clone(), hidden.clone()))
    }
}

fn layer_input_size(config: &RnnConfig, layer: usize) -> usize {
    match layer {
        0 => config.input_size,
        _ => config.hidden_size,
    }
}

/// Stacked GRU layers.
pub struct GruCore {
    layers: Vec<GRU>,
    hidden_size: usize,
}

impl GruCore {
    /// Creates the layers, with parameters under `layer{i}` in `vb`.
    pub fn build(config: &RnnConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_layers)
            .map(|i| {
                gru(
                    layer_input_size(config, i),
                    config.hidden_size,
                    GRUConfig::default(),
                    vb.pp(format!("layer{}", i)),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            hidden_size: config.hidden_size,
        })
    }
}

impl RecurrentCore for GruCore {
    fn num_recurrent_layers(&self) -> usize {
        self.layers.len()
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut input = x.clone();
        let mut hs = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let state = GRUState {
                h: hidden.get(i)?.contiguous()?,
            };
            let state = layer.step(&input, &state)?;
            input = state.h.clone();
            hs.push(state.h);
        }
        Ok((input, Tensor::stack(&hs, 0)?))
    }
}

/// Stacked LSTM layers.
///
/// The hidden state holds the `h` of every layer followed by the `c` of every
/// layer, `2 * num_layers` rows in total.
pub struct LstmCore {
    layers: Vec<LSTM>,
    hidden_size: usize,
}

impl LstmCore {
    /// Creates the layers, with parameters under `layer{i}` in `vb`.
    pub fn build(config: &RnnConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_layers)
            .map(|i| {
                lstm(
                    layer_input_size(config, i),
                    config.hidden_size,
                    LSTMConfig::default(),
                    vb.pp(format!("layer{}", i)),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            hidden_size: config.hidden_size,
        })
    }
}

impl RecurrentCore for LstmCore {
    fn num_recurrent_layers(&self) -> usize {
        2 * self.layers.len()
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        let n = self.layers.len();
        let mut input = x.clone();
        let mut hs = Vec::with_capacity(n);
        let mut cs = Vec::with_capacity(n);
        for (i, layer) in self.layers.iter().enumerate() {
            let state = LSTMState {
                h: hidden.get(i)?.contiguous()?,
                c: hidden.get(n + i)?.contiguous()?,
            };
            let state = layer.step(&input, &state)?;
            input = state.h.clone();
            hs.push(state.h);
            cs.push(state.c);
        }
        hs.extend(cs);
        Ok((input, Tensor::stack(&hs, 0)?))
    }
}

/// Factory building a core from its configuration.
pub type CoreFactory = for<'a> fn(&RnnConfig, VarBuilder<'a>) -> Result<Box<dyn RecurrentCore>>;

fn build_gru(config: &RnnConfig, vb: VarBuilder) -> Result<Box<dyn RecurrentCore>> {
    Ok(Box::new(GruCore::build(config, vb)?))
}

fn build_lstm(config: &RnnConfig, vb: VarBuilder) -> Result<Box<dyn RecurrentCore>> {
    Ok(Box::new(LstmCore::build(config, vb)?))
}

/// Returns a case-insensitive registry with `"gru"` and `"lstm"`.
pub fn default_core_registry() -> Result<Registry<CoreFactory>, AbodeError> {
    let mut registry: Registry<CoreFactory> = Registry::case_insensitive("rnn type");
    registry.register("gru", build_gru)?;
    registry.register("lstm", build_lstm)?;
    Ok(registry)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_lstm_state_layout() -> Result<()> {
        let config = RnnConfig::default().input_size(3).hidden_size(4).num_layers(2);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let core = LstmCore::build(&config, vb)?;
        assert_eq!(core.num_recurrent_layers(), 4);

        let x = Tensor::randn(0f32, 1f32, (5, 3), &Device::Cpu)?;
        let hidden = Tensor::zeros((4, 5, 4), DType::F32, &Device::Cpu)?;
        let (y, hidden) = core.step(&x, &hidden)?;
        assert_eq!(y.dims(), &[5, 4]);
        assert_eq!(hidden.dims(), &[4, 5, 4]);
        // The output is the `h` of the top layer.
        let top = hidden.get(1)?;
        assert_eq!(y.to_vec2::<f32>()?, top.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_registry_lookup() -> Result<()> {
        let mut registry = default_core_registry()?;
        assert_eq!(registry.names(), vec!["gru", "lstm"]);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = RnnConfig::default().input_size(2).hidden_size(3).num_layers(3);
        let core = (registry.get("GRU")?)(&config, vb)?;
        assert_eq!(core.num_recurrent_layers(), 3);
        assert_eq!(core.hidden_size(), 3);

        let err = registry.get("transformer").err().unwrap();
        assert!(err.is_configuration());

        // Built-in names cannot be taken over.
        let err = registry.register("Lstm", build_gru).unwrap_err();
        assert!(err.is_configuration());
        Ok(())
    }
}
