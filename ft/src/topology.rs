//! Executor tree shapes and their construction

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::composing::ComposingNode;
use crate::eager::EagerExecutor;
use crate::executor::ExecutorRef;
use crate::leaf::LeafCoordinator;

/// Shape of one tier of an executor tree
///
/// ```yaml
/// composing:
///   - leaf: 2
///   - composing:
///       - leaf: 1
///       - leaf: 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierSpec {
    /// Leaf coordinator with this many clients
    Leaf(usize),
    /// Composing node over these children, in order
    Composing(Vec<TierSpec>),
}

impl TierSpec {
    /// Uniform tree: the last entry is the number of clients per leaf, each
    /// earlier entry the number of children per composing tier
    pub fn uniform(fanout: &[usize]) -> Option<TierSpec> {
        debug!(?fanout, "TierSpec::uniform: called");
        let (clients, tiers) = fanout.split_last()?;
        let mut spec = TierSpec::Leaf(*clients);
        for children in tiers.iter().rev() {
            spec = TierSpec::Composing(vec![spec; *children]);
        }
        Some(spec)
    }

    pub fn num_clients(&self) -> usize {
        match self {
            TierSpec::Leaf(clients) => *clients,
            TierSpec::Composing(children) => children.iter().map(TierSpec::num_clients).sum(),
        }
    }

    /// Number of tiers from this one down to the deepest leaf
    pub fn depth(&self) -> usize {
        match self {
            TierSpec::Leaf(_) => 1,
            TierSpec::Composing(children) => 1 + children.iter().map(TierSpec::depth).max().unwrap_or(0),
        }
    }

    /// Reject composing tiers without children
    pub fn validate(&self) -> Result<()> {
        match self {
            TierSpec::Leaf(_) => Ok(()),
            TierSpec::Composing(children) if children.is_empty() => {
                Err(eyre!("composing tier must have at least one child"))
            }
            TierSpec::Composing(children) => children.iter().try_for_each(TierSpec::validate),
        }
    }

    /// Build the executor tree over fresh eager backends
    pub fn build(&self) -> ExecutorRef {
        match self {
            TierSpec::Leaf(clients) => Arc::new(LeafCoordinator::eager(*clients)),
            TierSpec::Composing(children) => {
                let children = children.iter().map(TierSpec::build).collect();
                Arc::new(ComposingNode::new(Arc::new(EagerExecutor::new()), children))
            }
        }
    }

    /// Validate and build the tree rooted here
    pub fn build_root(&self) -> Result<ExecutorRef> {
        self.validate()?;
        info!(
            clients = self.num_clients(),
            depth = self.depth(),
            "TierSpec::build_root: building executor tree"
        );
        Ok(self.build())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            TierSpec::Leaf(clients) => writeln!(f, "{}leaf ({} clients)", pad, clients),
            TierSpec::Composing(children) => {
                writeln!(f, "{}composing ({} clients)", pad, self.num_clients())?;
                children.iter().try_for_each(|child| child.render(f, indent + 1))
            }
        }
    }
}

impl fmt::Display for TierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}
