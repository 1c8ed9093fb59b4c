use crate::{Error, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Token-to-id mapping of a tokenizer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vocabulary(HashMap<String, u32>);

impl Vocabulary {
    #[inline]
    pub fn new(tokens: HashMap<String, u32>) -> Self {
        Self(tokens)
    }

    /// Reads `model.vocab` of a fast-tokenizer `tokenizer.json`.
    pub fn from_tokenizer_json(path: impl AsRef<Path>) -> Result<Self> {
        #[derive(serde::Deserialize)]
        struct TokenizerJson {
            model: Model,
        }
        #[derive(serde::Deserialize)]
        struct Model {
            vocab: HashMap<String, u32>,
        }

        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        let json = serde_json::from_str::<TokenizerJson>(&text).map_err(Error::json(path))?;
        Ok(Self(json.model.vocab))
    }

    /// Reads a WordPiece `vocab.txt`; the id of a token is its line index.
    /// A repeated token keeps its last id and no longer counts twice.
    pub fn from_vocab_txt(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        Ok(Self::parse_vocab_txt(&text))
    }

    fn parse_vocab_txt(text: &str) -> Self {
        Self(
            text.lines()
                .enumerate()
                .map(|(i, token)| (token.to_string(), i as u32))
                .collect(),
        )
    }

    /// Number of distinct tokens.
    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.0.len()
    }

    /// Tokens ordered by id; ids nobody claims are empty.
    pub fn lines(&self) -> Result<Vec<&str>> {
        let size = self.vocab_size();
        let mut lines = vec![""; size];
        for (token, &id) in &self.0 {
            match lines.get_mut(id as usize) {
                Some(line) => *line = token.as_str(),
                None => {
                    return Err(Error::TokenOutOfRange {
                        token: token.clone(),
                        id,
                        size,
                    })
                }
            }
        }
        Ok(lines)
    }
}

/// Writes `vocab_size` newline-terminated lines, line `i` holding token `i`.
pub fn export_vocab(vocab: &Vocabulary, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let lines = vocab.lines()?;
    let mut file = BufWriter::new(File::create(path).map_err(Error::io(path))?);
    lines
        .iter()
        .try_for_each(|line| writeln!(file, "{line}"))
        .and_then(|()| file.flush())
        .map_err(Error::io(path))
}
