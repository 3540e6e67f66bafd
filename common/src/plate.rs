use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::config::PlatesConfig;

/// Outcome of checking one recognized string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Exact member of the known-plate set.
    Match,
    /// Not known, but shaped like a plate (`LL NN LL NNNN` by default).
    NewValid,
    /// Anything else, including the empty string from a failed read.
    Noise,
}

/// Known-plate set plus the plate format check.
///
/// The set is seeded from configuration on every start and grows as new
/// well-formed plates are confirmed with [`PlateValidator::learn`]. It is
/// never written back anywhere, so a restart forgets learned plates.
#[derive(Debug, Clone)]
pub struct PlateValidator {
    known: HashSet<String>,
    format: Regex,
}

impl PlateValidator {
    pub fn new<I, S>(seed: I, format: &str) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            known: seed.into_iter().map(Into::into).collect(),
            format: Regex::new(format)?,
        })
    }

    pub fn from_config(config: &PlatesConfig) -> Result<Self, regex::Error> {
        Self::new(config.known.iter().cloned(), &config.format)
    }

    /// Membership first, then format. Comparison is exact: no case folding,
    /// no whitespace normalisation.
    pub fn classify(&self, text: &str) -> Classification {
        let class = if self.known.contains(text) {
            Classification::Match
        } else if self.format.is_match(text) {
            Classification::NewValid
        } else {
            Classification::Noise
        };
        debug!(text, ?class, "classified recognition");
        class
    }

    /// Adds a plate to the known set. Returns `false` if it was already there.
    pub fn learn(&mut self, plate: &str) -> bool {
        self.known.insert(plate.to_string())
    }

    pub fn is_known(&self, plate: &str) -> bool {
        self.known.contains(plate)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
