//! Pluggable string transformers applied to field data.
//!
//! Both the ISO 2709 reader and the key/value adapter accept a transformer
//! that rewrites every data value before it is emitted. This is where
//! character-set anomalies are corrected (Unicode normalization, stray
//! legacy characters) without touching the decoder itself.
//!
//! # Examples
//!
//! ```
//! use marckv::transformer::{Chain, NormalizationForm, StringTransformer, UnicodeNormalizer};
//!
//! let chain = Chain::new()
//!     .then(UnicodeNormalizer::new(NormalizationForm::Nfkc))
//!     .then(|s: &str| s.trim().to_string());
//!
//! assert_eq!(chain.transform(" ﬁle "), "file");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Rewrites one data value.
///
/// Transformers are shared with the decoding thread only, but are required
/// to be `Send + Sync` so a configured reader can be moved to a worker thread.
pub trait StringTransformer: Send + Sync {
    /// Transform a value.
    fn transform(&self, value: &str) -> String;
}

impl<F> StringTransformer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn transform(&self, value: &str) -> String {
        self(value)
    }
}

/// Returns the value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl StringTransformer for Identity {
    fn transform(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Unicode normalization forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationForm {
    /// Canonical composition.
    #[default]
    Nfc,
    /// Canonical decomposition.
    Nfd,
    /// Compatibility composition.
    Nfkc,
    /// Compatibility decomposition.
    Nfkd,
}

/// Normalizes values to a Unicode normalization form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeNormalizer {
    form: NormalizationForm,
}

impl UnicodeNormalizer {
    /// Create a normalizer for the given form.
    #[must_use]
    pub fn new(form: NormalizationForm) -> Self {
        UnicodeNormalizer { form }
    }
}

impl StringTransformer for UnicodeNormalizer {
    fn transform(&self, value: &str) -> String {
        match self.form {
            NormalizationForm::Nfc => value.nfc().collect(),
            NormalizationForm::Nfd => value.nfd().collect(),
            NormalizationForm::Nfkc => value.nfkc().collect(),
            NormalizationForm::Nfkd => value.nfkd().collect(),
        }
    }
}

/// Applies several transformers in order.
#[derive(Default)]
pub struct Chain {
    steps: Vec<Box<dyn StringTransformer>>,
}

impl Chain {
    /// Create an empty chain, which behaves like [`Identity`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transformer.
    #[must_use]
    pub fn then(mut self, step: impl StringTransformer + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Number of transformers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("steps", &self.steps.len()).finish()
    }
}

impl StringTransformer for Chain {
    fn transform(&self, value: &str) -> String {
        let mut out = value.to_string();
        for step in &self.steps {
            out = step.transform(&out);
        }
        out
    }
}

/// Remove characters that are not allowed in XML 1.0 documents.
///
/// Returns `None` if the value was already clean.
#[must_use]
pub fn scrub_xml10(value: &str) -> Option<String> {
    if value.chars().all(is_xml10_char) {
        return None;
    }
    Some(value.chars().filter(|&c| is_xml10_char(c)).collect())
}

fn is_xml10_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}
