//! Error policy for malformed records.
//!
//! A framing error in one record either aborts the whole stream or is
//! downgraded to skipping that record. [`ErrorPolicy`] captures the choice
//! made by the `fatal_errors` / `silent_errors` settings, and
//! [`RecoveryContext`] keeps track of what was skipped.

use crate::error::{MarcError, Result};
use log::warn;

/// How the reader reacts to framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the error and stop decoding the stream.
    Fatal,
    /// Log a warning, skip the record, keep decoding (default).
    #[default]
    Warn,
    /// Skip the record without logging.
    Silent,
}

impl ErrorPolicy {
    /// Derive the policy from the two configuration flags.
    ///
    /// `fatal_errors` wins over `silent_errors`.
    #[must_use]
    pub fn from_flags(fatal_errors: bool, silent_errors: bool) -> Self {
        match (fatal_errors, silent_errors) {
            (true, _) => ErrorPolicy::Fatal,
            (false, true) => ErrorPolicy::Silent,
            (false, false) => ErrorPolicy::Warn,
        }
    }
}

/// Keeps the outcome of error handling across a stream.
#[derive(Debug, Default)]
pub struct RecoveryContext {
    /// Current policy
    pub policy: ErrorPolicy,
    /// Number of records skipped because of framing errors
    pub skipped: usize,
    /// Messages for every recovery, in stream order
    pub messages: Vec<String>,
}

impl RecoveryContext {
    /// Create a new recovery context with the given policy
    #[must_use]
    pub fn new(policy: ErrorPolicy) -> Self {
        RecoveryContext {
            policy,
            skipped: 0,
            messages: Vec::new(),
        }
    }

    /// Apply the policy to an error met while decoding record number `record`.
    ///
    /// # Errors
    ///
    /// Returns the error unchanged under [`ErrorPolicy::Fatal`], and for
    /// I/O errors under every policy: a broken stream cannot be skipped past.
    pub fn recover(&mut self, error: MarcError, record: usize) -> Result<()> {
        if self.policy == ErrorPolicy::Fatal || !error.is_framing_error() {
            return Err(error);
        }
        let message = format!("record {record}: {error}");
        if self.policy == ErrorPolicy::Warn {
            warn!("skipping malformed {message}");
        }
        self.skipped += 1;
        self.messages.push(message);
        Ok(())
    }

    /// Returns true if any record was skipped.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.skipped > 0
    }
}
