//! Program files: a computation plus an optional argument

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::computation::Computation;
use crate::data::Data;
use crate::executor::ExecutorRef;
use crate::resolver::ReferenceResolver;
use crate::types::Type;

/// A computation to evaluate on an executor tree
///
/// ```yaml
/// computation:
///   lambda:
///     parameter_name: x
///     parameter_type: {federated: {member: {tensor: float32}, placement: clients}}
///     result:
///       call:
///         function: {intrinsic: federated_mean}
///         argument: {reference: x}
/// argument:
///   value: {list: [{float32: 1.0}, {float32: 2.0}]}
///   type: {federated: {member: {tensor: float32}, placement: clients}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub computation: Computation,
    #[serde(default)]
    pub argument: Option<ProgramArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramArgument {
    pub value: Data,
    #[serde(rename = "type")]
    pub type_signature: Type,
}

impl Program {
    pub fn new(computation: Computation) -> Self {
        Self {
            computation,
            argument: None,
        }
    }

    pub fn with_argument(mut self, value: Data, type_signature: Type) -> Self {
        self.argument = Some(ProgramArgument { value, type_signature });
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        crate::yaml::from_str(content).context("Failed to parse program")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "Program::load: called");
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read program file {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    /// Evaluate on the tree rooted at `root`
    pub async fn run(&self, root: ExecutorRef) -> crate::Result<Data> {
        let argument = self
            .argument
            .as_ref()
            .map(|argument| (argument.value.clone(), argument.type_signature.clone()));
        ReferenceResolver::new(root).invoke(&self.computation, argument).await
    }
}
