use crate::{Error, Result};
use std::{fs::File, io::Write, path::Path};

/// Hyperparameters read from a Hugging Face BERT `config.json`.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
}

impl SourceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        serde_json::from_str(&text).map_err(Error::json(path))
    }
}

/// What the target framework assumes for any field `config.json` leaves out.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TargetDefaults {
    pub dim_model: usize,
    pub dim_ff: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub vocab_size: usize,
}

pub const BERT_DEFAULTS: TargetDefaults = TargetDefaults {
    dim_model: 768,
    dim_ff: 3072,
    num_heads: 12,
    num_layers: 12,
    vocab_size: 119547,
};

impl Default for TargetDefaults {
    #[inline]
    fn default() -> Self {
        BERT_DEFAULTS
    }
}

impl TargetDefaults {
    /// Fields absent from the file keep their built-in value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        serde_json::from_str(&text).map_err(Error::json(path))
    }
}

/// `dim_head` plus every field that differs from [`TargetDefaults`].
#[derive(serde::Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    pub dim_head: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_model: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_ff: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_heads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_layers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<usize>,
}

impl ConfigDelta {
    /// `dim_head` truncates when the width is not a multiple of the head count.
    pub fn new(source: &SourceConfig, defaults: &TargetDefaults) -> Result<Self> {
        #[inline]
        fn differ(value: usize, default: usize) -> Option<usize> {
            (value != default).then_some(value)
        }

        Ok(Self {
            dim_head: source
                .hidden_size
                .checked_div(source.num_attention_heads)
                .ok_or(Error::ZeroHeads)?,
            dim_model: differ(source.hidden_size, defaults.dim_model),
            dim_ff: differ(source.intermediate_size, defaults.dim_ff),
            num_heads: differ(source.num_attention_heads, defaults.num_heads),
            num_layers: differ(source.num_hidden_layers, defaults.num_layers),
            vocab_size: differ(source.vocab_size, defaults.vocab_size),
        })
    }
}

pub fn write_config(delta: &ConfigDelta, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut json = serde_json::to_string(delta).map_err(Error::json(path))?;
    json.push('\n');
    File::create(path)
        .and_then(|mut file| file.write_all(json.as_bytes()))
        .map_err(Error::io(path))
}
