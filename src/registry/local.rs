use super::Registry;
use crate::{config::SourceConfig, vocab::Vocabulary, weights::Checkpoint, Error, Result};
use std::path::PathBuf;

/// Hugging Face snapshots laid out as `<root>/<identifier>/`.
#[derive(Clone, Debug)]
pub struct LocalRegistry(PathBuf);

impl LocalRegistry {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    fn find(&self, id: &str, candidates: &[&str], what: &'static str) -> Result<PathBuf> {
        let dir = self.0.join(id);
        candidates
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::MissingSource {
                id: id.to_string(),
                what,
            })
    }
}

impl Registry for LocalRegistry {
    fn vocabulary(&self, id: &str) -> Result<Vocabulary> {
        let path = self.find(id, &["tokenizer.json", "vocab.txt"], "vocabulary")?;
        log::debug!("vocabulary of {id} from {}", path.display());
        match path.extension() {
            Some(ext) if ext == "json" => Vocabulary::from_tokenizer_json(&path),
            _ => Vocabulary::from_vocab_txt(&path),
        }
    }

    fn config(&self, id: &str) -> Result<SourceConfig> {
        SourceConfig::load(self.find(id, &["config.json"], "config")?)
    }

    fn encoder(&self, id: &str) -> Result<Checkpoint> {
        Checkpoint::open(self.find(id, &["model.safetensors"], "encoder checkpoint")?)
    }

    fn lm_head(&self, id: &str) -> Result<Checkpoint> {
        Checkpoint::open(self.find(
            id,
            &["lm_head.safetensors", "model.safetensors"],
            "LM-head checkpoint",
        )?)
    }
}

#[test]
fn test_local_registry() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("bert-tiny");
    std::fs::create_dir(&snapshot).unwrap();
    std::fs::write(snapshot.join("vocab.txt"), "[PAD]\n[UNK]\n").unwrap();
    std::fs::write(
        snapshot.join("model.safetensors"),
        crate::weights::synthetic(&["bert.pooler.dense.weight"]),
    )
    .unwrap();

    let registry = LocalRegistry::new(dir.path());
    assert_eq!(registry.vocabulary("bert-tiny").unwrap().vocab_size(), 2);
    assert_eq!(
        registry.lm_head("bert-tiny").unwrap().path(),
        snapshot.join("model.safetensors")
    );
    assert!(matches!(
        registry.config("bert-tiny"),
        Err(Error::MissingSource { what: "config", .. })
    ));
    assert!(matches!(
        registry.encoder("bert-huge"),
        Err(Error::MissingSource { .. })
    ));

    std::fs::write(
        snapshot.join("tokenizer.json"),
        r#"{"model":{"vocab":{"[PAD]":0}}}"#,
    )
    .unwrap();
    assert_eq!(registry.vocabulary("bert-tiny").unwrap().vocab_size(), 1);
}
