//! Cycle labels, verdicts and the registry key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ground-truth class of a tightening cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Acceptable tightening (class 0)
    Ok,
    /// Defective tightening (class 1)
    NotOk,
}

impl Label {
    /// Numeric class used by the classifiers.
    pub const fn class(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::NotOk => 1,
        }
    }

    /// Inverse of [`Label::class`]. Anything other than 0 or 1 is rejected.
    pub const fn from_class(class: u8) -> Option<Self> {
        match class {
            0 => Some(Self::Ok),
            1 => Some(Self::NotOk),
            _ => None,
        }
    }

    /// Target value for logistic loss.
    pub const fn target(self) -> f64 {
        match self {
            Self::Ok => 0.0,
            Self::NotOk => 1.0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::NotOk => write!(f, "NOT OK"),
        }
    }
}

/// Latest verdict held by the cycle accumulator.
///
/// `Pending` means no verdict yet and renders as the empty string, `Error`
/// means inference was attempted and failed. Consumers rely on the two
/// being distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    #[default]
    Pending,
    Ok,
    NotOk,
    Error,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Ok => "OK",
            Self::NotOk => "NOT OK",
            Self::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(Self::Pending),
            "OK" => Some(Self::Ok),
            "NOT OK" => Some(Self::NotOk),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn is_defect(self) -> bool {
        matches!(self, Self::NotOk)
    }
}

impl From<Label> for Verdict {
    fn from(label: Label) -> Self {
        match label {
            Label::Ok => Self::Ok,
            Label::NotOk => Self::NotOk,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Verdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown prediction value '{raw}'")))
    }
}

/// Identifies one trained (ensemble, scaler) pair.
///
/// `model_name` is the artifact stem inside the folder (e.g. `ensemble_100`),
/// `window_size` selects the scaler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryKey {
    pub model_folder: String,
    pub model_name: String,
    pub window_size: usize,
}

impl RegistryKey {
    pub fn new(model_folder: impl Into<String>, model_name: impl Into<String>, window_size: usize) -> Self {
        Self {
            model_folder: model_folder.into(),
            model_name: model_name.into(),
            window_size,
        }
    }

    /// Key of the ensemble the training sweep writes for `window_size`.
    pub fn ensemble(model_folder: impl Into<String>, window_size: usize) -> Self {
        Self::new(model_folder, ensemble_tag(window_size), window_size)
    }

    /// Reject keys that cannot name a file inside the models directory.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("window_size must be a positive integer".to_string());
        }
        for (field, value) in [("model_folder", &self.model_folder), ("model_name", &self.model_name)] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
            if value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(format!("{field} '{value}' is not a plain name"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.model_folder, self.model_name, self.window_size)
    }
}

/// Artifact stem used for the ensemble of one window size.
pub fn ensemble_tag(window_size: usize) -> String {
    format!("ensemble_{window_size}")
}

/// Window size encoded in a model name: the integer after the last `_`.
pub fn window_size_from_model_name(model_name: &str) -> Option<usize> {
    model_name
        .rsplit_once('_')
        .and_then(|(_, suffix)| suffix.parse::<usize>().ok())
        .filter(|ws| *ws > 0)
}
