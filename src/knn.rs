use std::collections::BTreeMap;

use crate::{Embedding, Error, Label};

/// Neighbours consulted per prediction.
pub const DEFAULT_NEIGHBORS: usize = 3;

/// Classifier output: the winning label plus the confidence of every label
/// the classifier has seen so far. Labels that received no votes appear
/// with 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub confidences: BTreeMap<Label, f32>,
}

impl Prediction {
    /// Confidence for a label, 0.0 when the classifier has never seen it.
    pub fn confidence(&self, label: &Label) -> f32 {
        self.confidences.get(label).copied().unwrap_or(0.0)
    }
}

/// Online example store and predictor.
pub trait Classifier: Send {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), Error>;
    fn predict(&self, embedding: &Embedding) -> Result<Prediction, Error>;
    fn counts(&self) -> BTreeMap<Label, usize>;
}

/// K-nearest-neighbour classifier over unit-normalized embeddings.
/// Similarity is the dot product; the winner is a majority vote over the
/// top k with best-similarity as the tiebreak; confidence is the share of
/// the k votes.
pub struct Knn {
    k: usize,
    examples: Vec<(Vec<f32>, Label)>,
}

impl Knn {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            examples: Vec::new(),
        }
    }
}

impl Default for Knn {
    fn default() -> Self {
        Self::new(DEFAULT_NEIGHBORS)
    }
}

fn normalize(embedding: &Embedding) -> Result<Vec<f32>, Error> {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return Err(Error::Classifier("embedding has zero magnitude".into()));
    }
    Ok(embedding.iter().map(|v| v / norm).collect())
}

impl Classifier for Knn {
    fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), Error> {
        let unit = normalize(&embedding)?;
        self.examples.push((unit, label));
        Ok(())
    }

    fn predict(&self, embedding: &Embedding) -> Result<Prediction, Error> {
        if self.examples.is_empty() {
            return Err(Error::Classifier("no examples trained yet".into()));
        }
        let unit = normalize(embedding)?;

        // Score the query against every stored example, best first.
        let mut scored: Vec<(f32, &Label)> = self
            .examples
            .iter()
            .map(|(example, label)| {
                let dot: f32 = example.iter().zip(unit.iter()).map(|(a, b)| a * b).sum();
                (dot, label)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // Vote over the top k, keeping the best similarity per label for
        // tie-breaking.
        let k = self.k.min(scored.len());
        let mut votes: BTreeMap<&Label, (usize, f32)> = BTreeMap::new();
        for &(sim, label) in &scored[..k] {
            let entry = votes.entry(label).or_insert((0, f32::MIN));
            entry.0 += 1;
            entry.1 = entry.1.max(sim);
        }

        let mut winner: Option<(Label, usize, f32)> = None;
        for (label, &(count, best)) in &votes {
            let better = match &winner {
                None => true,
                Some((_, top_count, top_best)) => (count, best) > (*top_count, *top_best),
            };
            if better {
                winner = Some(((*label).clone(), count, best));
            }
        }
        let (label, _, _) = winner.ok_or_else(|| Error::Classifier("no votes cast".into()))?;

        // Report a confidence for every label ever trained so consumers can
        // ask about classes that received no votes.
        let mut confidences: BTreeMap<Label, f32> = BTreeMap::new();
        for (_, example_label) in &self.examples {
            confidences.entry(example_label.clone()).or_insert(0.0);
        }
        for (voted, &(count, _)) in &votes {
            confidences.insert((*voted).clone(), count as f32 / k as f32);
        }

        Ok(Prediction { label, confidences })
    }

    fn counts(&self) -> BTreeMap<Label, usize> {
        let mut out = BTreeMap::new();
        for (_, label) in &self.examples {
            *out.entry(label.clone()).or_insert(0) += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EMBEDDING_DIM;

    fn basis(index: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[index] = 1.0;
        Embedding::from_slice(&values).unwrap()
    }

    fn mix(a: usize, b: usize, weight: f32) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[a] = weight;
        values[b] = 1.0 - weight;
        Embedding::from_slice(&values).unwrap()
    }

    fn touch() -> Label {
        Label::new("touch")
    }

    fn no_touch() -> Label {
        Label::new("no_touch")
    }

    #[test]
    fn unanimous_neighbours_give_full_confidence() {
        let mut knn = Knn::default();
        for _ in 0..3 {
            knn.add_example(basis(0), touch()).unwrap();
            knn.add_example(basis(1), no_touch()).unwrap();
        }

        let prediction = knn.predict(&basis(0)).unwrap();
        assert_eq!(prediction.label, touch());
        assert_eq!(prediction.confidence(&touch()), 1.0);
        assert_eq!(prediction.confidence(&no_touch()), 0.0);
        // The losing label is still present in the map.
        assert!(prediction.confidences.contains_key(&no_touch()));
    }

    #[test]
    fn majority_vote_splits_confidence() {
        let mut knn = Knn::default();
        knn.add_example(basis(0), touch()).unwrap();
        knn.add_example(mix(0, 2, 0.9), touch()).unwrap();
        knn.add_example(basis(1), no_touch()).unwrap();

        // Query near basis 0: two touch neighbours, one no_touch.
        let prediction = knn.predict(&mix(0, 2, 0.95)).unwrap();
        assert_eq!(prediction.label, touch());
        let confidence = prediction.confidence(&touch());
        assert!((confidence - 2.0 / 3.0).abs() < 1e-6);
        let other = prediction.confidence(&no_touch());
        assert!((other - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn tie_breaks_on_best_similarity() {
        let mut knn = Knn::new(2);
        knn.add_example(basis(0), touch()).unwrap();
        knn.add_example(basis(1), no_touch()).unwrap();

        // One vote each; touch is closer to the query.
        let prediction = knn.predict(&mix(0, 1, 0.8)).unwrap();
        assert_eq!(prediction.label, touch());
    }

    #[test]
    fn unknown_label_has_zero_confidence() {
        let mut knn = Knn::default();
        knn.add_example(basis(1), no_touch()).unwrap();

        let prediction = knn.predict(&basis(0)).unwrap();
        assert_eq!(prediction.label, no_touch());
        // touch was never trained: absent from the map, confidence 0.0.
        assert_eq!(prediction.confidence(&touch()), 0.0);
        assert!(!prediction.confidences.contains_key(&touch()));
    }

    #[test]
    fn predict_without_examples_is_an_error() {
        let knn = Knn::default();
        assert!(matches!(
            knn.predict(&basis(0)),
            Err(Error::Classifier(_))
        ));
    }

    #[test]
    fn zero_magnitude_embeddings_rejected() {
        let mut knn = Knn::default();
        let zero = Embedding::default();

        assert!(matches!(
            knn.add_example(zero.clone(), touch()),
            Err(Error::Classifier(_))
        ));
        knn.add_example(basis(0), touch()).unwrap();
        assert!(matches!(knn.predict(&zero), Err(Error::Classifier(_))));
    }

    #[test]
    fn counts_tally_examples_per_label() {
        let mut knn = Knn::default();
        knn.add_example(basis(0), touch()).unwrap();
        knn.add_example(basis(0), touch()).unwrap();
        knn.add_example(basis(1), no_touch()).unwrap();

        let counts = knn.counts();
        assert_eq!(counts.get(&touch()), Some(&2));
        assert_eq!(counts.get(&no_touch()), Some(&1));
    }

    #[test]
    fn fewer_examples_than_k_still_predicts() {
        let mut knn = Knn::default();
        knn.add_example(basis(0), touch()).unwrap();

        let prediction = knn.predict(&basis(0)).unwrap();
        assert_eq!(prediction.label, touch());
        assert_eq!(prediction.confidence(&touch()), 1.0);
    }
}
