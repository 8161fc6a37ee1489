//! Capability parameters
//!
//! A parameter is a typed identifier that a node provides or looks for. Its
//! textual form is `I-<concept>` for inputs and `O-<concept>` for outputs; the
//! concept part is what the taxonomy reasons about.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shortest valid textual form: a polarity prefix plus one concept character
const MIN_ENCODED_LEN: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Invalid parameter id {id:?}: expected I-<concept> or O-<concept>")]
    InvalidParameter { id: String },
}

/// Direction of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarity {
    Input,
    Output,
}

/// A capability parameter. Immutable once built; compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parameter {
    Input(String),
    Output(String),
}

impl Parameter {
    pub fn input(concept: impl Into<String>) -> Self {
        Parameter::Input(concept.into())
    }

    pub fn output(concept: impl Into<String>) -> Self {
        Parameter::Output(concept.into())
    }

    /// Taxonomy concept this parameter refers to
    pub fn concept(&self) -> &str {
        match self {
            Parameter::Input(c) | Parameter::Output(c) => c,
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Parameter::Input(_) => Polarity::Input,
            Parameter::Output(_) => Polarity::Output,
        }
    }

    pub fn same_polarity(&self, other: &Parameter) -> bool {
        self.polarity() == other.polarity()
    }

    /// Same polarity, different concept
    pub fn with_concept(&self, concept: impl Into<String>) -> Parameter {
        match self {
            Parameter::Input(_) => Parameter::Input(concept.into()),
            Parameter::Output(_) => Parameter::Output(concept.into()),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Input(c) => write!(f, "I-{}", c),
            Parameter::Output(c) => write!(f, "O-{}", c),
        }
    }
}

impl FromStr for Parameter {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParameterError::InvalidParameter { id: s.to_string() };

        if s.len() < MIN_ENCODED_LEN {
            return Err(invalid());
        }

        if let Some(concept) = s.strip_prefix("I-") {
            Ok(Parameter::input(concept))
        } else if let Some(concept) = s.strip_prefix("O-") {
            Ok(Parameter::output(concept))
        } else {
            Err(invalid())
        }
    }
}
