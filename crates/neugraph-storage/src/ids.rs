//! ID types for the storage layer

use crate::error::StorageError;

use core::fmt;
use core::str::FromStr;
use std::borrow::Borrow;

/// Unique string naming a simulated node across the input and output files
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name of a time-series quantity recorded per node (e.g. `V`, `spike_state`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableName(String);

impl VariableName {
    /// Create a new variable name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for VariableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VariableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for VariableName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Side of a simulation trace: stimulus fed in, or state recorded out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Input traces (stimuli)
    Input,
    /// Output traces (recorded state)
    Output,
}

impl Direction {
    /// Both directions, inputs first
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Canonical lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    /// Slot index for per-direction arrays
    pub(crate) const fn index(&self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Direction::Input),
            "output" | "out" => Ok(Direction::Output),
            _ => Err(StorageError::UnsupportedDirection {
                direction: s.to_string(),
            }),
        }
    }
}

/// Access mode a trace file is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpenMode {
    /// `"r"`
    #[default]
    ReadOnly,
    /// `"r+"`
    ReadWrite,
}

impl OpenMode {
    /// Mode string as accepted by [`FromStr`]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OpenMode::ReadOnly => "r",
            OpenMode::ReadWrite => "r+",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "r" => Ok(OpenMode::ReadOnly),
            "r+" => Ok(OpenMode::ReadWrite),
            _ => Err(StorageError::UnsupportedMode {
                mode: s.to_string(),
            }),
        }
    }
}

#[cfg(feature = "serde")]
mod serde_impls {
    use super::*;
    use serde::{Deserialize, Serialize};

    impl Serialize for NodeId {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for NodeId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let id = String::deserialize(deserializer)?;
            Ok(NodeId::new(id))
        }
    }

    impl Serialize for VariableName {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for VariableName {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let name = String::deserialize(deserializer)?;
            Ok(VariableName::new(name))
        }
    }

    impl Serialize for Direction {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.as_str().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Direction {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            raw.parse().map_err(serde::de::Error::custom)
        }
    }
}
