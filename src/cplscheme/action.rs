//! Actions the solver must perform before the next advance

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Save solver state at the start of a time window
    WriteCheckpoint,
    /// Restore solver state to the start of the current time window
    ReadCheckpoint,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::WriteCheckpoint, Action::ReadCheckpoint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteCheckpoint => "write-iteration-checkpoint",
            Self::ReadCheckpoint => "read-iteration-checkpoint",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::WriteCheckpoint => 0b01,
            Self::ReadCheckpoint => 0b10,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}

/// Set of pending actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet(u8);

impl ActionSet {
    pub fn require(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    /// Removes `action`, returning whether it was pending
    pub fn clear(&mut self, action: Action) -> bool {
        let was_pending = self.contains(action);
        self.0 &= !action.bit();
        was_pending
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.contains(*a))
    }
}
