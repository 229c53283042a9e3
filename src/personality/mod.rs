//! Survey answers to trait vector.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// The five trait scores. The range is whatever the scorer produces, no
/// normalization is applied.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityVector {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
}

impl PersonalityVector {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.openness,
            self.conscientiousness,
            self.extraversion,
            self.agreeableness,
            self.neuroticism,
        ]
    }

    pub fn from_array(values: [f64; 5]) -> Self {
        let [openness, conscientiousness, extraversion, agreeableness, neuroticism] = values;
        Self {
            openness,
            conscientiousness,
            extraversion,
            agreeableness,
            neuroticism,
        }
    }
}

pub trait PersonalityScorer: Send + Sync {
    fn score(&self, answers: &[f64]) -> Result<PersonalityVector>;
}

/// Question `i` is keyed to trait `i % 5` and each trait is the mean of its
/// answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedScorer;

impl PersonalityScorer for KeyedScorer {
    fn score(&self, answers: &[f64]) -> Result<PersonalityVector> {
        if let Some(bad) = answers.iter().find(|a| !a.is_finite()) {
            bail!("answer {} is not a finite number", bad);
        }

        let mut sums = [0.0; 5];
        let mut counts = [0usize; 5];
        for (i, answer) in answers.iter().enumerate() {
            sums[i % 5] += answer;
            counts[i % 5] += 1;
        }

        let mut means = [0.0; 5];
        for trait_index in 0..5 {
            if counts[trait_index] > 0 {
                means[trait_index] = sums[trait_index] / counts[trait_index] as f64;
            }
        }
        Ok(PersonalityVector::from_array(means))
    }
}
