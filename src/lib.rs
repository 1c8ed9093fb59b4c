mod config;
mod convert;
mod error;
pub mod log;
mod registry;
mod remap;
mod vocab;
mod weights;

pub use config::{write_config, ConfigDelta, SourceConfig, TargetDefaults, BERT_DEFAULTS};
pub use convert::{Converted, Converter, Layout, Report, IDENTIFIERS};
pub use error::{Error, Result};
pub use registry::{LocalRegistry, Registry};
pub use remap::{
    key_count, plan, remap, LayerRef, Origin, Planned, Rename, EMBEDDINGS, LAYER, LM_HEAD, TAIL,
};
pub use vocab::{export_vocab, Vocabulary};
pub use weights::{Checkpoint, StateDict, TargetMapping};
