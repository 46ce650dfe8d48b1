use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cascadia_core::Error;

/// Cascade chains deeper than this abort the operation.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Requested enforcement strategy for referential actions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyChoice {
    /// Native when the store enforces foreign-key actions, emulated otherwise.
    #[default]
    Auto,
    Native,
    Emulated,
}

impl FromStr for StrategyChoice {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyChoice::Auto),
            "native" => Ok(StrategyChoice::Native),
            "emulated" => Ok(StrategyChoice::Emulated),
            _ => Err(Error::Configuration(format!(
                "unknown strategy '{value}' (expected auto, native or emulated)"
            ))),
        }
    }
}

/// Options that control how a session enforces referential actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub strategy: StrategyChoice,
    pub max_cascade_depth: usize,
}

impl SessionConfig {
    pub fn with_strategy(mut self, strategy: StrategyChoice) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}
