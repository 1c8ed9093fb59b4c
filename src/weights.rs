use crate::{Error, Result};
use memmap2::Mmap;
use safetensors::{tensor::TensorView, SafeTensors};
use std::{
    collections::HashMap,
    fs::File,
    ops::Deref,
    path::{Path, PathBuf},
};

/// Raw bytes of a safetensors checkpoint, mapped from disk or held in memory.
pub struct Checkpoint {
    path: PathBuf,
    bytes: Bytes,
}

enum Bytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Bytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(vec) => vec,
        }
    }
}

impl Checkpoint {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(Error::io(&path))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(Error::io(&path))?;
        Ok(Self {
            path,
            bytes: Bytes::Mapped(mmap),
        })
    }

    /// `path` only labels errors.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes: Bytes::Owned(bytes),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tensors(&self) -> Result<Vec<(String, TensorView<'_>)>> {
        SafeTensors::deserialize(&self.bytes)
            .map(|st| st.tensors())
            .map_err(|source| Error::SafeTensors {
                path: self.path.clone(),
                source,
            })
    }
}

/// Source parameter mapping: dotted name to a view into checkpoint bytes.
#[derive(Clone, Debug, Default)]
pub struct StateDict<'a>(HashMap<String, TensorView<'a>>);

impl<'a> StateDict<'a> {
    /// The plain encoder: `bert.` is stripped and the `cls.` head is dropped.
    pub fn encoder(checkpoint: &'a Checkpoint) -> Result<Self> {
        Ok(checkpoint
            .tensors()?
            .into_iter()
            .filter(|(name, _)| !name.starts_with("cls."))
            .map(|(name, tensor)| match name.strip_prefix("bert.") {
                Some(stripped) => (stripped.to_string(), tensor),
                None => (name, tensor),
            })
            .collect())
    }

    /// The encoder with its LM head, names untouched.
    /// The decoder is tied to the word embeddings when the file omits it.
    pub fn lm_head(checkpoint: &'a Checkpoint) -> Result<Self> {
        let mut dict = checkpoint.tensors()?.into_iter().collect::<Self>();
        dict.tie(
            "cls.predictions.decoder.weight",
            &[
                "bert.embeddings.word_embeddings.weight",
                "embeddings.word_embeddings.weight",
            ],
        );
        dict.tie("cls.predictions.decoder.bias", &["cls.predictions.bias"]);
        Ok(dict)
    }

    fn tie(&mut self, key: &str, candidates: &[&str]) {
        if self.0.contains_key(key) {
            return;
        }
        if let Some(tensor) = candidates.iter().find_map(|c| self.0.get(*c)).cloned() {
            log::debug!("tied `{key}` to an existing tensor");
            self.0.insert(key.to_string(), tensor);
        }
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&TensorView<'a>> {
        self.0.get(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<TensorView<'a>> {
        self.0.remove(key)
    }
}

impl<'a> FromIterator<(String, TensorView<'a>)> for StateDict<'a> {
    fn from_iter<T: IntoIterator<Item = (String, TensorView<'a>)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, tensor)| (canonical_name(name), tensor))
                .collect(),
        )
    }
}

/// Old checkpoints name LayerNorm parameters `gamma`/`beta`.
fn canonical_name(name: String) -> String {
    if let Some(prefix) = name.strip_suffix("LayerNorm.gamma") {
        format!("{prefix}LayerNorm.weight")
    } else if let Some(prefix) = name.strip_suffix("LayerNorm.beta") {
        format!("{prefix}LayerNorm.bias")
    } else {
        name
    }
}

/// Renamed parameters in insertion order.
#[derive(Clone, Debug, Default)]
pub struct TargetMapping<'a>(Vec<(String, TensorView<'a>)>);

impl<'a> TargetMapping<'a> {
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    #[inline]
    pub(crate) fn push(&mut self, name: String, tensor: TensorView<'a>) {
        self.0.push((name, tensor));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TensorView<'a>> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorView<'a>)> + '_ {
        self.0.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Writes a safetensors file, whatever the extension of `path`; `torch.load` cannot read it.
    /// Safetensors stores tensors sorted by dtype and name, so the insertion order is not kept on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
        safetensors::serialize_to_file(self.iter(), &Some(metadata), path).map_err(|source| {
            Error::SafeTensors {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Serializes one `[1]`-shaped f32 tensor per name, holding its index as a sentinel.
#[cfg(test)]
pub(crate) fn synthetic(names: &[&str]) -> Vec<u8> {
    use safetensors::Dtype;
    let data = (0..names.len())
        .map(|i| (i as f32).to_le_bytes())
        .collect::<Vec<_>>();
    let views = names
        .iter()
        .zip(&data)
        .map(|(name, bytes)| (*name, TensorView::new(Dtype::F32, vec![1], bytes).unwrap()))
        .collect::<Vec<_>>();
    safetensors::serialize(views, &None).unwrap()
}

#[cfg(test)]
pub(crate) fn sentinel(tensor: &TensorView) -> f32 {
    f32::from_le_bytes(tensor.data().try_into().unwrap())
}

#[test]
fn test_encoder_view() {
    let checkpoint = Checkpoint::from_bytes(
        "mem",
        synthetic(&[
            "bert.embeddings.LayerNorm.gamma",
            "bert.embeddings.LayerNorm.beta",
            "pooler.dense.weight",
            "cls.predictions.bias",
        ]),
    );
    let dict = StateDict::encoder(&checkpoint).unwrap();
    assert_eq!(dict.len(), 3);
    assert_eq!(sentinel(dict.get("embeddings.LayerNorm.weight").unwrap()), 0.);
    assert_eq!(sentinel(dict.get("embeddings.LayerNorm.bias").unwrap()), 1.);
    assert_eq!(sentinel(dict.get("pooler.dense.weight").unwrap()), 2.);
    assert!(dict.get("cls.predictions.bias").is_none());
}

#[test]
fn test_lm_head_ties_decoder() {
    let checkpoint = Checkpoint::from_bytes(
        "mem",
        synthetic(&[
            "bert.embeddings.word_embeddings.weight",
            "cls.predictions.bias",
            "cls.predictions.transform.LayerNorm.gamma",
        ]),
    );
    let dict = StateDict::lm_head(&checkpoint).unwrap();
    assert_eq!(sentinel(dict.get("cls.predictions.decoder.weight").unwrap()), 0.);
    assert_eq!(sentinel(dict.get("cls.predictions.decoder.bias").unwrap()), 1.);
    assert!(dict
        .get("cls.predictions.transform.LayerNorm.weight")
        .is_some());
}

#[test]
fn test_lm_head_keeps_explicit_decoder() {
    let checkpoint = Checkpoint::from_bytes(
        "mem",
        synthetic(&[
            "bert.embeddings.word_embeddings.weight",
            "cls.predictions.decoder.weight",
        ]),
    );
    let dict = StateDict::lm_head(&checkpoint).unwrap();
    assert_eq!(sentinel(dict.get("cls.predictions.decoder.weight").unwrap()), 1.);
    assert!(dict.get("cls.predictions.decoder.bias").is_none());
}

#[test]
fn test_malformed_checkpoint() {
    let checkpoint = Checkpoint::from_bytes("broken.safetensors", vec![1, 2, 3]);
    assert!(matches!(
        StateDict::encoder(&checkpoint),
        Err(Error::SafeTensors { .. })
    ));
}

#[test]
fn test_save_writes_safetensors() {
    let checkpoint = Checkpoint::from_bytes("mem", synthetic(&["b", "a"]));
    let dict = StateDict::encoder(&checkpoint).unwrap();
    let mut mapping = TargetMapping::with_capacity(2);
    mapping.push("z.weight".to_string(), dict.get("b").unwrap().clone());
    mapping.push("y.weight".to_string(), dict.get("a").unwrap().clone());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pytorch_model.pt");
    mapping.save(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (_, metadata) = SafeTensors::read_metadata(&bytes).unwrap();
    assert_eq!(
        metadata.metadata().as_ref().and_then(|m| m.get("format")),
        Some(&"pt".to_string())
    );
    let written = SafeTensors::deserialize(&bytes).unwrap();
    assert_eq!(sentinel(&written.tensor("z.weight").unwrap()), 0.);
    assert_eq!(sentinel(&written.tensor("y.weight").unwrap()), 1.);
}
