//! Placement literals

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical location of a value in the federated topology.
///
/// `Unplaced` is the placement of plain values and compiled functions that
/// have not been moved to a party; it keys the leaf's local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Server,
    Clients,
    Unplaced,
}

impl Placement {
    /// Uppercase name used in compact type signatures
    pub fn uri(&self) -> &'static str {
        match self {
            Placement::Server => "SERVER",
            Placement::Clients => "CLIENTS",
            Placement::Unplaced => "UNPLACED",
        }
    }

    /// Whether values may be federated at this placement
    pub fn is_federated(&self) -> bool {
        !matches!(self, Placement::Unplaced)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}
