use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};

use waypoint_checkpoint::prelude::Checkpoint;
use waypoint_core::error::{GraphError, Result};

use crate::breakpoint::CompileConfig;
use crate::constants::{END, START};
use crate::edge::Edge;
use crate::node::NodeFn;
use crate::registry::ChannelRegistry;

/// An immutable, validated execution plan.
///
/// Created by `StateGraph::compile()`. Execution entry points (`invoke`,
/// `resume`, `stream`) and the time-travel helpers are methods on this type.
pub struct CompiledStateGraph {
    pub(crate) nodes: HashMap<String, NodeFn>,
    pub(crate) node_order: Vec<String>,
    pub(crate) edges: HashMap<String, Vec<Edge>>,
    pub(crate) registry: ChannelRegistry,
    pub(crate) breakpoints: CompileConfig,
}

impl CompiledStateGraph {
    /// Node names in declaration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.node_order.iter().map(String::as_str).collect()
    }

    pub fn node(&self, name: &str) -> Option<&NodeFn> {
        self.nodes.get(name)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Outgoing edges of a node or of `START`.
    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn breakpoints(&self) -> &CompileConfig {
        &self.breakpoints
    }

    pub(crate) fn position(&self, node: &str) -> usize {
        self.node_order
            .iter()
            .position(|n| n == node)
            .unwrap_or(usize::MAX)
    }

    /// Deduplicate and sort by declaration order.
    pub(crate) fn in_declaration_order<'a, I>(&self, nodes: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let unique: BTreeSet<(usize, &String)> =
            nodes.into_iter().map(|n| (self.position(n), n)).collect();
        unique.into_iter().map(|(_, n)| n.clone()).collect()
    }

    /// The next frontier after `sources` ran, evaluated on `state`.
    ///
    /// Targets of all sources are unioned. `END` only finishes the thread
    /// when nothing else was selected; a source without edges contributes
    /// nothing.
    pub(crate) fn next_frontier(
        &self,
        sources: &[String],
        state: &Map<String, Value>,
    ) -> Result<Vec<String>> {
        let view = Value::Object(state.clone());
        let mut targets = Vec::new();
        for source in sources {
            for edge in self.edges_from(source) {
                let target = edge.resolve(source, &view)?;
                if target != END {
                    targets.push(target);
                }
            }
        }
        Ok(self.in_declaration_order(&targets))
    }

    pub(crate) fn entry_frontier(&self, state: &Map<String, Value>) -> Result<Vec<String>> {
        self.next_frontier(&[START.to_string()], state)
    }

    /// Fail with `StaleCheckpoint` if the checkpoint names a node this plan
    /// does not have.
    pub(crate) fn ensure_known<'a, I>(&self, checkpoint: &Checkpoint, nodes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for node in nodes {
            if !self.has_node(node) {
                return Err(GraphError::StaleCheckpoint {
                    thread_id: checkpoint.thread_id.clone(),
                    sequence: checkpoint.sequence,
                    node: node.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompiledStateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStateGraph")
            .field("nodes", &self.node_order)
            .field("channels", &self.registry.keys().collect::<Vec<_>>())
            .field("breakpoints", &self.breakpoints)
            .finish()
    }
}
