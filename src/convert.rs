use crate::{
    config::{write_config, ConfigDelta, TargetDefaults},
    registry::Registry,
    remap::remap,
    vocab::export_vocab,
    weights::StateDict,
    Result,
};
use std::path::{Path, PathBuf};

/// Checkpoints converted when none are named.
pub const IDENTIFIERS: [&str; 6] = [
    "bert-base-uncased",
    "bert-large-uncased",
    "bert-base-cased",
    "bert-large-cased",
    "bert-base-multilingual-cased",
    "bert-base-chinese",
];

/// `<root>/configs/<identifier>/` and the files written there.
#[derive(Clone, Debug)]
pub struct Layout(PathBuf);

impl Layout {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    #[inline]
    pub fn dir(&self, id: &str) -> PathBuf {
        self.0.join("configs").join(id)
    }

    #[inline]
    pub fn vocab(&self, id: &str) -> PathBuf {
        self.dir(id).join("vocab.txt")
    }

    #[inline]
    pub fn config(&self, id: &str) -> PathBuf {
        self.dir(id).join("config.json")
    }

    #[inline]
    pub fn weights(&self, id: &str) -> PathBuf {
        self.dir(id).join("pytorch_model.pt")
    }
}

/// Files written for one identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Converted {
    pub vocab: Option<PathBuf>,
    pub config: PathBuf,
    pub weights: PathBuf,
    pub delta: ConfigDelta,
    pub tensors: usize,
}

#[derive(Debug)]
pub struct Report {
    pub id: String,
    pub result: Result<Converted>,
}

pub struct Converter<R> {
    registry: R,
    layout: Layout,
    defaults: TargetDefaults,
    skip_vocab: bool,
}

impl<R: Registry> Converter<R> {
    pub fn new(registry: R, output: impl Into<PathBuf>, defaults: TargetDefaults) -> Self {
        Self {
            registry,
            layout: Layout::new(output),
            defaults,
            skip_vocab: false,
        }
    }

    #[inline]
    pub fn skip_vocab(mut self, skip: bool) -> Self {
        self.skip_vocab = skip;
        self
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Vocabulary, config delta, then weights. Files written before a failure stay.
    pub fn convert(&self, id: &str) -> Result<Converted> {
        let dir = self.layout.dir(id);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::debug!("ignored: cannot create {}: {e}", dir.display());
        }

        let vocab = if self.skip_vocab {
            None
        } else {
            let path = self.layout.vocab(id);
            let vocab = self.registry.vocabulary(id)?;
            export_vocab(&vocab, &path)?;
            log::info!("{id}: {} tokens -> {}", vocab.vocab_size(), path.display());
            Some(path)
        };

        let source = self.registry.config(id)?;
        let delta = ConfigDelta::new(&source, &self.defaults)?;
        let config = self.layout.config(id);
        write_config(&delta, &config)?;
        log::info!("{id}: config -> {}", config.display());

        let weights = self.layout.weights(id);
        let tensors = self.convert_weights(id, source.num_hidden_layers, &weights)?;
        log::info!("{id}: {tensors} tensors -> {}", weights.display());

        Ok(Converted {
            vocab,
            config,
            weights,
            delta,
            tensors,
        })
    }

    fn convert_weights(&self, id: &str, n_layers: usize, path: &Path) -> Result<usize> {
        let encoder = self.registry.encoder(id)?;
        let lm_head = self.registry.lm_head(id)?;
        let encoder = StateDict::encoder(&encoder)?;
        let lm_head = StateDict::lm_head(&lm_head)?;
        log::debug!(
            "{id}: {} encoder and {} LM-head source tensors",
            encoder.len(),
            lm_head.len()
        );

        let mapping = remap(&encoder, &lm_head, n_layers)?;
        mapping.save(path)?;
        Ok(mapping.len())
    }

    /// Converts each identifier in turn. With `fail_fast` the first failure ends the batch.
    pub fn convert_all<'s>(
        &self,
        ids: impl IntoIterator<Item = &'s str>,
        fail_fast: bool,
    ) -> Vec<Report> {
        let mut reports = Vec::new();
        for id in ids {
            log::info!("converting {id}");
            let result = self.convert(id);
            let failed = result.is_err();
            reports.push(Report {
                id: id.to_string(),
                result,
            });
            if failed && fail_fast {
                break;
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SourceConfig, vocab::Vocabulary, weights::Checkpoint, Error};

    /// Knows every identifier but has no checkpoints.
    struct ConfigOnly;

    impl Registry for ConfigOnly {
        fn vocabulary(&self, _: &str) -> Result<Vocabulary> {
            Ok(Vocabulary::new([("[PAD]".to_string(), 0)].into()))
        }

        fn config(&self, _: &str) -> Result<SourceConfig> {
            Ok(SourceConfig {
                hidden_size: 128,
                intermediate_size: 512,
                num_attention_heads: 2,
                num_hidden_layers: 2,
                vocab_size: 30522,
            })
        }

        fn encoder(&self, id: &str) -> Result<Checkpoint> {
            Err(Error::MissingSource {
                id: id.to_string(),
                what: "encoder checkpoint",
            })
        }

        fn lm_head(&self, id: &str) -> Result<Checkpoint> {
            self.encoder(id)
        }
    }

    #[test]
    fn test_layout() {
        let layout = Layout::new("/out");
        assert_eq!(
            layout.weights("bert-base-chinese"),
            Path::new("/out/configs/bert-base-chinese/pytorch_model.pt")
        );
    }

    #[test]
    fn test_failure_leaves_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Converter::new(ConfigOnly, dir.path(), TargetDefaults::default());
        assert!(matches!(
            converter.convert("bert-base-uncased"),
            Err(Error::MissingSource { .. })
        ));
        let layout = converter.layout();
        assert!(layout.vocab("bert-base-uncased").is_file());
        assert!(layout.config("bert-base-uncased").is_file());
        assert!(!layout.weights("bert-base-uncased").exists());
    }

    #[test]
    fn test_unwritable_output_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("configs"), "").unwrap();
        let converter = Converter::new(ConfigOnly, dir.path(), TargetDefaults::default());
        assert!(matches!(
            converter.convert("bert-base-uncased"),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_convert_all_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        let converter =
            Converter::new(ConfigOnly, dir.path(), TargetDefaults::default()).skip_vocab(true);

        let reports = converter.convert_all(IDENTIFIERS, false);
        assert_eq!(reports.len(), IDENTIFIERS.len());
        assert!(reports.iter().all(|r| r.result.is_err()));
        assert!(!converter.layout().vocab("bert-base-cased").exists());

        let reports = converter.convert_all(IDENTIFIERS, true);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, "bert-base-uncased");
    }
}
