//! Token selection over a copied logits row.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::token::LlamaToken;

/// User-facing sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Logit divisor; `<= 0` selects greedy decoding.
    #[serde(default = "default_temp")]
    pub temperature: f32,
    /// Keep only the `k` most likely tokens; 0 disables.
    #[serde(default)]
    pub top_k: usize,
    /// Nucleus cutoff; values outside `(0, 1)` disable.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// RNG seed; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_temp() -> f32 {
    1.0
}
fn default_top_p() -> f32 {
    1.0
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temp(),
            top_k: 0,
            top_p: default_top_p(),
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Self::default()
        }
    }

    /// Build a ready-to-use [`Sampler`].
    pub fn into_sampler(self) -> Sampler {
        Sampler::new(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: LlamaToken,
    score: f32,
}

/// Temperature → top-k → softmax → top-p → weighted draw.
pub struct Sampler {
    params: SamplingParams,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    /// Pick the next token from one row of logits (index = token id).
    pub fn sample(&mut self, logits: &[f32]) -> LlamaToken {
        if logits.is_empty() {
            return 0;
        }
        if self.params.temperature <= 0.0 {
            return argmax(logits);
        }

        let candidates = self.candidates(logits);
        let r: f32 = self.rng.gen_range(0.0..1.0);
        let mut acc = 0.0;
        for c in &candidates {
            acc += c.score;
            if r <= acc {
                return c.id;
            }
        }
        // Rounding left a sliver past the last bucket.
        candidates.first().map_or_else(|| argmax(logits), |c| c.id)
    }

    /// Surviving candidates with normalized probabilities, most likely first.
    fn candidates(&self, logits: &[f32]) -> Vec<Candidate> {
        let temp = self.params.temperature.max(1e-6);
        let mut cands: Vec<Candidate> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| Candidate {
                id: i as LlamaToken,
                score: if l.is_nan() { f32::NEG_INFINITY } else { l / temp },
            })
            .collect();

        let k = self.params.top_k;
        if k > 0 && k < cands.len() {
            cands.select_nth_unstable_by(k - 1, by_score_desc);
            cands.truncate(k);
        }
        cands.sort_unstable_by(by_score_desc);

        softmax(&mut cands);

        let p = self.params.top_p;
        if p > 0.0 && p < 1.0 {
            let mut acc = 0.0;
            let mut cutoff = cands.len();
            for (i, c) in cands.iter().enumerate() {
                acc += c.score;
                if acc >= p {
                    cutoff = i + 1;
                    break;
                }
            }
            cands.truncate(cutoff.max(1));
            normalize(&mut cands);
        }
        cands
    }
}

fn by_score_desc(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn argmax(logits: &[f32]) -> LlamaToken {
    logits
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_nan())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(i, _)| i as LlamaToken)
}

/// Expects `cands` sorted descending.
fn softmax(cands: &mut [Candidate]) {
    let Some(max) = cands.first().map(|c| c.score) else {
        return;
    };
    if max == f32::NEG_INFINITY {
        // Every score is -inf; fall back to uniform.
        let u = 1.0 / cands.len() as f32;
        cands.iter_mut().for_each(|c| c.score = u);
        return;
    }
    if max == f32::INFINITY {
        // Infinite scores take all of the mass.
        for c in cands.iter_mut() {
            c.score = if c.score == f32::INFINITY { 1.0 } else { 0.0 };
        }
        normalize(cands);
        return;
    }
    for c in cands.iter_mut() {
        c.score = (c.score - max).exp();
    }
    normalize(cands);
}

fn normalize(cands: &mut [Candidate]) {
    let sum: f32 = cands.iter().map(|c| c.score).sum();
    if sum > 0.0 {
        cands.iter_mut().for_each(|c| c.score /= sum);
    }
}
