mod local;

use crate::{config::SourceConfig, vocab::Vocabulary, weights::Checkpoint, Result};

pub use local::LocalRegistry;

/// Where pretrained tokenizers, configs and checkpoints come from.
pub trait Registry {
    fn vocabulary(&self, id: &str) -> Result<Vocabulary>;
    fn config(&self, id: &str) -> Result<SourceConfig>;
    /// Checkpoint holding the plain encoder.
    fn encoder(&self, id: &str) -> Result<Checkpoint>;
    /// Checkpoint holding the encoder with its masked-LM head.
    fn lm_head(&self, id: &str) -> Result<Checkpoint>;
}
