//! Renaming of Hugging Face BERT parameters into the target layout.
//!
//! Every renamed tensor is described by one [`Rename`] row. Rows that mention
//! `{i}` are repeated for each encoder layer. The source scheme attaches a
//! LayerNorm to the block it follows, while the target attaches it to the
//! block it precedes, so the pre-attention norm of layer `i` is read from
//! layer `i - 1` and the final norm from the last layer.

use crate::{weights::StateDict, weights::TargetMapping, Error, Result};
use std::fmt;

/// Which source mapping a tensor is read from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Origin {
    Encoder,
    LmHead,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoder => f.write_str("encoder"),
            Self::LmHead => f.write_str("LM-head"),
        }
    }
}

/// Which layer `{i}` in the source template resolves to, for target layer `i`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayerRef {
    /// The source name has no layer index.
    Fixed,
    Same,
    /// `i - 1`, or the `fallback` name at `i == 0`.
    Previous { fallback: &'static str },
    /// The last encoder layer.
    Last,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rename {
    pub origin: Origin,
    pub source: &'static str,
    pub target: &'static str,
    pub layer: LayerRef,
}

const fn encoder(source: &'static str, target: &'static str, layer: LayerRef) -> Rename {
    Rename {
        origin: Origin::Encoder,
        source,
        target,
        layer,
    }
}

const fn lm_head(source: &'static str, target: &'static str) -> Rename {
    Rename {
        origin: Origin::LmHead,
        source,
        target,
        layer: LayerRef::Fixed,
    }
}

use LayerRef::{Fixed, Last, Previous, Same};

pub const EMBEDDINGS: &[Rename] = &[
    encoder("embeddings.word_embeddings.weight", "input_embedding.weight", Fixed),
    encoder("embeddings.position_embeddings.weight", "position_embedding.weight", Fixed),
    encoder("embeddings.token_type_embeddings.weight", "token_type_embedding.weight", Fixed),
];

#[rustfmt::skip]
pub const LAYER: &[Rename] = &[
    encoder("encoder.layer.{i}.output.LayerNorm.weight",           "encoder.layers.{i}.self_att.layernorm_before_attention.weight", Previous { fallback: "embeddings.LayerNorm.weight" }),
    encoder("encoder.layer.{i}.output.LayerNorm.bias",             "encoder.layers.{i}.self_att.layernorm_before_attention.bias",   Previous { fallback: "embeddings.LayerNorm.bias" }),
    encoder("encoder.layer.{i}.attention.self.query.weight",       "encoder.layers.{i}.self_att.self_attention.project_q.weight",   Same),
    encoder("encoder.layer.{i}.attention.self.query.bias",         "encoder.layers.{i}.self_att.self_attention.project_q.bias",     Same),
    encoder("encoder.layer.{i}.attention.self.key.weight",         "encoder.layers.{i}.self_att.self_attention.project_k.weight",   Same),
    encoder("encoder.layer.{i}.attention.self.key.bias",           "encoder.layers.{i}.self_att.self_attention.project_k.bias",     Same),
    encoder("encoder.layer.{i}.attention.self.value.weight",       "encoder.layers.{i}.self_att.self_attention.project_v.weight",   Same),
    encoder("encoder.layer.{i}.attention.self.value.bias",         "encoder.layers.{i}.self_att.self_attention.project_v.bias",     Same),
    encoder("encoder.layer.{i}.attention.output.dense.weight",     "encoder.layers.{i}.self_att.self_attention.attention_out.weight", Same),
    encoder("encoder.layer.{i}.attention.output.dense.bias",       "encoder.layers.{i}.self_att.self_attention.attention_out.bias", Same),
    encoder("encoder.layer.{i}.attention.output.LayerNorm.weight", "encoder.layers.{i}.ffn.layernorm_before_ffn.weight",            Same),
    encoder("encoder.layer.{i}.attention.output.LayerNorm.bias",   "encoder.layers.{i}.ffn.layernorm_before_ffn.bias",              Same),
    encoder("encoder.layer.{i}.intermediate.dense.weight",         "encoder.layers.{i}.ffn.ffn.w_in.w.weight",                      Same),
    encoder("encoder.layer.{i}.intermediate.dense.bias",           "encoder.layers.{i}.ffn.ffn.w_in.w.bias",                        Same),
    encoder("encoder.layer.{i}.output.dense.weight",               "encoder.layers.{i}.ffn.ffn.w_out.weight",                       Same),
    encoder("encoder.layer.{i}.output.dense.bias",                 "encoder.layers.{i}.ffn.ffn.w_out.bias",                         Same),
];

pub const TAIL: &[Rename] = &[
    encoder("encoder.layer.{i}.output.LayerNorm.weight", "encoder.output_layernorm.weight", Last),
    encoder("encoder.layer.{i}.output.LayerNorm.bias", "encoder.output_layernorm.bias", Last),
    encoder("pooler.dense.weight", "pooler.dense.weight", Fixed),
    encoder("pooler.dense.bias", "pooler.dense.bias", Fixed),
];

pub const LM_HEAD: &[Rename] = &[
    lm_head("cls.predictions.transform.dense.weight", "lm_head.dense.weight"),
    lm_head("cls.predictions.transform.dense.bias", "lm_head.dense.bias"),
    lm_head("cls.predictions.transform.LayerNorm.weight", "lm_head.layer_norm.weight"),
    lm_head("cls.predictions.transform.LayerNorm.bias", "lm_head.layer_norm.bias"),
    lm_head("cls.predictions.decoder.weight", "lm_head.decoder.weight"),
    lm_head("cls.predictions.decoder.bias", "lm_head.decoder.bias"),
];

const PLACEHOLDER: &str = "{i}";

/// One concrete source-to-target key pair.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Planned {
    pub origin: Origin,
    pub source: String,
    pub target: String,
}

impl Rename {
    fn resolve(&self, layer: usize, n_layers: usize) -> Planned {
        let source = match self.layer {
            Fixed => self.source.to_string(),
            Same => self.source.replace(PLACEHOLDER, &layer.to_string()),
            Previous { fallback } if layer == 0 => fallback.to_string(),
            Previous { .. } => self.source.replace(PLACEHOLDER, &(layer - 1).to_string()),
            Last => self.source.replace(PLACEHOLDER, &(n_layers - 1).to_string()),
        };
        Planned {
            origin: self.origin,
            source,
            target: self.target.replace(PLACEHOLDER, &layer.to_string()),
        }
    }
}

/// Number of target keys for an encoder of `n_layers` layers.
#[inline]
pub const fn key_count(n_layers: usize) -> usize {
    EMBEDDINGS.len() + LAYER.len() * n_layers + TAIL.len() + LM_HEAD.len()
}

/// Expands the rename table for `n_layers` layers, in output order.
pub fn plan(n_layers: usize) -> Result<Vec<Planned>> {
    if n_layers == 0 {
        return Err(Error::NoLayers);
    }
    let mut ans = Vec::with_capacity(key_count(n_layers));
    ans.extend(EMBEDDINGS.iter().map(|r| r.resolve(0, n_layers)));
    for i in 0..n_layers {
        ans.extend(LAYER.iter().map(|r| r.resolve(i, n_layers)));
    }
    ans.extend(TAIL.iter().map(|r| r.resolve(0, n_layers)));
    ans.extend(LM_HEAD.iter().map(|r| r.resolve(0, n_layers)));
    Ok(ans)
}

/// Builds the target mapping. Tensors are shared with the sources, not copied.
/// Any planned key missing from its source fails the whole mapping.
pub fn remap<'a>(
    encoder: &StateDict<'a>,
    lm_head: &StateDict<'a>,
    n_layers: usize,
) -> Result<TargetMapping<'a>> {
    let plan = plan(n_layers)?;
    log::debug!("{} tensors planned for {n_layers} layers", plan.len());

    let mut ans = TargetMapping::with_capacity(plan.len());
    for Planned {
        origin,
        source,
        target,
    } in plan
    {
        let dict = match origin {
            Origin::Encoder => encoder,
            Origin::LmHead => lm_head,
        };
        match dict.get(&source) {
            Some(tensor) => ans.push(target, tensor.clone()),
            None => return Err(Error::MissingKey { origin, key: source }),
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{sentinel, synthetic, Checkpoint};
    use std::collections::HashSet;

    fn source_names(n_layers: usize) -> Vec<String> {
        let mut names = vec![
            "embeddings.word_embeddings.weight".to_string(),
            "embeddings.position_embeddings.weight".to_string(),
            "embeddings.token_type_embeddings.weight".to_string(),
            "embeddings.LayerNorm.weight".to_string(),
            "embeddings.LayerNorm.bias".to_string(),
        ];
        for i in 0..n_layers {
            for suffix in [
                "attention.self.query",
                "attention.self.key",
                "attention.self.value",
                "attention.output.dense",
                "attention.output.LayerNorm",
                "intermediate.dense",
                "output.dense",
                "output.LayerNorm",
            ] {
                names.push(format!("encoder.layer.{i}.{suffix}.weight"));
                names.push(format!("encoder.layer.{i}.{suffix}.bias"));
            }
        }
        names.push("pooler.dense.weight".to_string());
        names.push("pooler.dense.bias".to_string());
        names
    }

    const HEAD_NAMES: [&str; 6] = [
        "cls.predictions.transform.dense.weight",
        "cls.predictions.transform.dense.bias",
        "cls.predictions.transform.LayerNorm.weight",
        "cls.predictions.transform.LayerNorm.bias",
        "cls.predictions.decoder.weight",
        "cls.predictions.decoder.bias",
    ];

    fn checkpoints(n_layers: usize) -> (Checkpoint, Checkpoint, Vec<String>) {
        let names = source_names(n_layers);
        let encoder = synthetic(&names.iter().map(String::as_str).collect::<Vec<_>>());
        let head = synthetic(&HEAD_NAMES);
        (
            Checkpoint::from_bytes("encoder", encoder),
            Checkpoint::from_bytes("lm_head", head),
            names,
        )
    }

    fn index_of(names: &[String], name: &str) -> f32 {
        names.iter().position(|n| n == name).unwrap() as f32
    }

    #[test]
    fn test_table_sizes() {
        assert_eq!(EMBEDDINGS.len(), 3);
        assert_eq!(LAYER.len(), 16);
        assert_eq!(TAIL.len(), 4);
        assert_eq!(LM_HEAD.len(), 6);
        assert_eq!(key_count(2), 45);
    }

    #[test]
    fn test_layer_rows_are_templated() {
        for row in LAYER {
            assert!(row.target.contains(PLACEHOLDER), "{}", row.target);
            assert!(row.source.contains(PLACEHOLDER), "{}", row.source);
        }
        for row in EMBEDDINGS.iter().chain(TAIL).chain(LM_HEAD) {
            assert!(!row.target.contains(PLACEHOLDER), "{}", row.target);
        }
    }

    #[test]
    fn test_plan_is_exhaustive() {
        for n_layers in 1..=4 {
            let plan = plan(n_layers).unwrap();
            assert_eq!(plan.len(), key_count(n_layers));

            let targets = plan.iter().map(|p| &p.target).collect::<HashSet<_>>();
            assert_eq!(targets.len(), plan.len());

            // every encoder tensor is read, including both ends of the norm chain
            let encoder_sources = plan
                .iter()
                .filter(|p| p.origin == Origin::Encoder)
                .map(|p| p.source.clone())
                .collect::<HashSet<_>>();
            let expected = source_names(n_layers).into_iter().collect::<HashSet<_>>();
            assert_eq!(encoder_sources, expected);
        }
    }

    #[test]
    fn test_plan_shifts_norms() {
        let plan = plan(3).unwrap();
        let source_of = |target: &str| {
            plan.iter()
                .find(|p| p.target == target)
                .map(|p| p.source.as_str())
                .unwrap()
        };
        assert_eq!(
            source_of("encoder.layers.0.self_att.layernorm_before_attention.weight"),
            "embeddings.LayerNorm.weight"
        );
        assert_eq!(
            source_of("encoder.layers.2.self_att.layernorm_before_attention.bias"),
            "encoder.layer.1.output.LayerNorm.bias"
        );
        assert_eq!(
            source_of("encoder.layers.2.ffn.layernorm_before_ffn.weight"),
            "encoder.layer.2.attention.output.LayerNorm.weight"
        );
        assert_eq!(
            source_of("encoder.layers.1.self_att.self_attention.project_k.bias"),
            "encoder.layer.1.attention.self.key.bias"
        );
        assert_eq!(
            source_of("encoder.output_layernorm.weight"),
            "encoder.layer.2.output.LayerNorm.weight"
        );
    }

    #[test]
    fn test_no_layers() {
        assert!(matches!(plan(0), Err(Error::NoLayers)));
    }

    #[test]
    fn test_remap_single_layer() {
        let (encoder, head, names) = checkpoints(1);
        let encoder = StateDict::encoder(&encoder).unwrap();
        let head = StateDict::lm_head(&head).unwrap();
        let mapping = remap(&encoder, &head, 1).unwrap();
        assert_eq!(mapping.len(), key_count(1));

        let value = |name: &str| sentinel(mapping.get(name).unwrap());
        assert_eq!(
            value("encoder.layers.0.self_att.layernorm_before_attention.weight"),
            index_of(&names, "embeddings.LayerNorm.weight")
        );
        assert_eq!(
            value("encoder.output_layernorm.bias"),
            index_of(&names, "encoder.layer.0.output.LayerNorm.bias")
        );
    }

    #[test]
    fn test_remap_two_layers() {
        let (encoder, head, names) = checkpoints(2);
        let encoder = StateDict::encoder(&encoder).unwrap();
        let head = StateDict::lm_head(&head).unwrap();
        let mapping = remap(&encoder, &head, 2).unwrap();
        assert_eq!(mapping.len(), 3 + 2 * 16 + 4 + 6);

        for (p, (name, tensor)) in plan(2).unwrap().iter().zip(mapping.iter()) {
            assert_eq!(p.target, name);
            let expected = match p.origin {
                Origin::Encoder => index_of(&names, &p.source),
                Origin::LmHead => HEAD_NAMES.iter().position(|n| *n == p.source).unwrap() as f32,
            };
            assert_eq!(sentinel(tensor), expected, "{name}");
        }

        let value = |name: &str| sentinel(mapping.get(name).unwrap());
        assert_eq!(
            value("encoder.layers.1.self_att.layernorm_before_attention.weight"),
            index_of(&names, "encoder.layer.0.output.LayerNorm.weight")
        );
        assert_eq!(
            value("encoder.output_layernorm.weight"),
            index_of(&names, "encoder.layer.1.output.LayerNorm.weight")
        );
        assert_eq!(value("lm_head.decoder.bias"), 5.);
    }

    #[test]
    fn test_missing_key_fails() {
        let (encoder, head, _) = checkpoints(2);
        let mut encoder = StateDict::encoder(&encoder).unwrap();
        let head = StateDict::lm_head(&head).unwrap();
        encoder.remove("pooler.dense.weight").unwrap();
        match remap(&encoder, &head, 2) {
            Err(Error::MissingKey { origin, key }) => {
                assert_eq!(origin, Origin::Encoder);
                assert_eq!(key, "pooler.dense.weight");
            }
            _ => panic!("expected a missing key"),
        }
    }

    #[test]
    fn test_missing_head_key_fails() {
        let (encoder, head, _) = checkpoints(1);
        let encoder = StateDict::encoder(&encoder).unwrap();
        let mut head = StateDict::lm_head(&head).unwrap();
        head.remove("cls.predictions.transform.dense.bias").unwrap();
        assert!(matches!(
            remap(&encoder, &head, 1),
            Err(Error::MissingKey {
                origin: Origin::LmHead,
                ..
            })
        ));
    }

    #[test]
    fn test_layer_count_beyond_source_fails() {
        let (encoder, head, _) = checkpoints(1);
        let encoder = StateDict::encoder(&encoder).unwrap();
        let head = StateDict::lm_head(&head).unwrap();
        assert!(matches!(
            remap(&encoder, &head, 2),
            Err(Error::MissingKey { .. })
        ));
    }
}
