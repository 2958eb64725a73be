//! Configuration of [`RnnStateEncoder`](crate::RnnStateEncoder).
use abode_core::AbodeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RnnStateEncoder`](crate::RnnStateEncoder).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RnnConfig {
    /// Name of the core in the core registry, case-insensitive.
    pub rnn_type: String,

    /// Size of the input features.
    pub input_size: usize,

    /// Size of the hidden state of a layer.
    pub hidden_size: usize,

    /// Number of stacked layers.
    pub num_layers: usize,
}

impl Default for RnnConfig {
    fn default() -> Self {
        Self {
            rnn_type: "GRU".to_string(),
            input_size: 32,
            hidden_size: 32,
            num_layers: 1,
        }
    }
}

impl RnnConfig {
    /// Sets the core name.
    pub fn rnn_type(mut self, v: impl Into<String>) -> Self {
        self.rnn_type = v.into();
        self
    }

    /// Sets the input size.
    pub fn input_size(mut self, v: usize) -> Self {
        self.input_size = v;
        self
    }

    /// Sets the hidden size.
    pub fn hidden_size(mut self, v: usize) -> Self {
        self.hidden_size = v;
        self
    }

    /// Sets the number of layers.
    pub fn num_layers(mut self, v: usize) -> Self {
        self.num_layers = v;
        self
    }

    /// Checks that all sizes are positive.
    pub fn validate(&self) -> Result<(), AbodeError> {
        if self.input_size == 0 || self.hidden_size == 0 || self.num_layers == 0 {
            return Err(AbodeError::ConfigurationError(format!(
                "RNN sizes must be positive: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Constructs [`RnnConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RnnConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_rnn_config() -> Result<()> {
        let config = RnnConfig::default()
            .rnn_type("LSTM")
            .input_size(8)
            .hidden_size(16)
            .num_layers(2);

        let dir = TempDir::new("rnn_config")?;
        let path = dir.path().join("rnn_config.yaml");
        config.save(&path)?;
        let config_ = RnnConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(RnnConfig::default().validate().is_ok());
        assert!(RnnConfig::default().num_layers(0).validate().is_err());
    }
}
