use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;

use waypoint_core::error::{GraphError, Result};

use crate::breakpoint::CompileConfig;
use crate::channel::{AggregateOp, ChannelSpec};
use crate::compiled::CompiledStateGraph;
use crate::constants::{END, START, is_reserved};
use crate::edge::{ConditionalEdge, Edge};
use crate::node::NodeFn;
use crate::registry::ChannelRegistry;

/// Builder for a state graph.
///
/// Declare channels, nodes and edges, then call `compile()` to validate
/// the topology and freeze it into a `CompiledStateGraph`. Node declaration
/// order is significant: it fixes the order in which concurrent writes are
/// merged.
#[derive(Debug, Default)]
pub struct StateGraph {
    channels: Vec<(String, ChannelSpec)>,
    nodes: HashMap<String, NodeFn>,
    node_order: Vec<String>,
    edges: Vec<(String, Edge)>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a state channel. Duplicate keys are reported by `compile`.
    pub fn add_channel(&mut self, key: impl Into<String>, spec: ChannelSpec) -> &mut Self {
        self.channels.push((key.into(), spec));
        self
    }

    pub fn add_last_value_channel(&mut self, key: impl Into<String>, default: Value) -> &mut Self {
        self.add_channel(key, ChannelSpec::LastValue { default })
    }

    pub fn add_append_channel(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_channel(key, ChannelSpec::Append)
    }

    pub fn add_binary_operator_channel(
        &mut self,
        key: impl Into<String>,
        default: Value,
        op: AggregateOp,
    ) -> &mut Self {
        self.add_channel(key, ChannelSpec::BinaryOperator { default, op })
    }

    /// A channel folded by an arbitrary `(current, incoming) -> merged` closure.
    pub fn add_reducer_channel<F>(
        &mut self,
        key: impl Into<String>,
        default: Value,
        reducer: F,
    ) -> &mut Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.add_channel(key, ChannelSpec::reducer(default, reducer))
    }

    pub fn add_ephemeral_channel(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_channel(key, ChannelSpec::Ephemeral)
    }

    pub fn add_topic_channel(&mut self, key: impl Into<String>, accumulate: bool) -> &mut Self {
        self.add_channel(key, ChannelSpec::Topic { accumulate })
    }

    /// Add a node. Names are unique and may not be `START` or `END`.
    pub fn add_node(&mut self, node: NodeFn) -> Result<&mut Self> {
        let name = node.name().to_string();
        if is_reserved(&name) {
            return Err(GraphError::InvalidGraph(format!(
                "Cannot add node with reserved name '{name}'"
            ))
            .into());
        }
        if self.nodes.contains_key(&name) {
            return Err(GraphError::InvalidGraph(format!("Duplicate node name: '{name}'")).into());
        }
        self.node_order.push(name.clone());
        self.nodes.insert(name, node);
        Ok(self)
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), Edge::to(to)));
        self
    }

    /// Route from `from` to whichever of `allowed` the routing function picks.
    pub fn add_conditional_edges<F, I, S>(
        &mut self,
        from: impl Into<String>,
        route_fn: F,
        allowed: I,
    ) -> &mut Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges.push((
            from.into(),
            Edge::Conditional(ConditionalEdge::new(route_fn, allowed)),
        ));
        self
    }

    /// Shorthand for `add_edge(START, node)`.
    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Shorthand for `add_edge(node, END)`.
    pub fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.add_edge(node, END)
    }

    pub fn compile(self) -> Result<CompiledStateGraph> {
        self.compile_with(CompileConfig::default())
    }

    /// Validate the graph and freeze it, with static breakpoints.
    pub fn compile_with(self, config: CompileConfig) -> Result<CompiledStateGraph> {
        let mut registry = ChannelRegistry::new();
        for (key, spec) in &self.channels {
            registry.register(key.clone(), spec.clone())?;
        }

        let edges = self.validate_edges()?;
        self.validate_reachability(&edges)?;

        for name in &self.node_order {
            if let Some(writes) = self.nodes[name].writes() {
                registry.check_keys(writes, name)?;
            }
            if !edges.contains_key(name) {
                tracing::warn!(node = %name, "node has no outgoing edges; the thread finishes after it");
            }
        }

        for name in config.interrupt_before.iter().chain(&config.interrupt_after) {
            if !self.nodes.contains_key(name) {
                return Err(GraphError::InvalidGraph(format!(
                    "Breakpoint set on unknown node '{name}'"
                ))
                .into());
            }
        }

        Ok(CompiledStateGraph {
            nodes: self.nodes,
            node_order: self.node_order,
            edges,
            registry,
            breakpoints: config,
        })
    }

    /// Check every endpoint and group edges by source.
    fn validate_edges(&self) -> Result<HashMap<String, Vec<Edge>>> {
        let mut grouped: HashMap<String, Vec<Edge>> = HashMap::new();
        for (from, edge) in &self.edges {
            if from == END {
                return Err(GraphError::InvalidGraph("END cannot have outgoing edges".into()).into());
            }
            if from != START && !self.nodes.contains_key(from) {
                return Err(GraphError::InvalidGraph(format!(
                    "Unknown node '{from}' referenced as edge source"
                ))
                .into());
            }
            let targets = edge.possible_targets();
            if targets.is_empty() {
                return Err(GraphError::InvalidGraph(format!(
                    "Conditional edge from '{from}' allows no targets"
                ))
                .into());
            }
            for target in targets {
                if target == START {
                    return Err(GraphError::InvalidGraph(format!(
                        "Edge from '{from}' targets START"
                    ))
                    .into());
                }
                if target != END && !self.nodes.contains_key(target) {
                    return Err(GraphError::InvalidGraph(format!(
                        "Unknown node '{target}' referenced as target of '{from}'"
                    ))
                    .into());
                }
            }
            grouped.entry(from.clone()).or_default().push(edge.clone());
        }
        if !grouped.contains_key(START) {
            return Err(GraphError::InvalidGraph(
                "START has no outgoing edge; call set_entry_point or add_edge(START, ..)".into(),
            )
            .into());
        }
        Ok(grouped)
    }

    /// Every node must be reachable from START through static targets or
    /// conditional allow-lists (cycles are fine).
    fn validate_reachability(&self, edges: &HashMap<String, Vec<Edge>>) -> Result<()> {
        let mut visited: HashSet<&str> = HashSet::from([START]);
        let mut queue: VecDeque<&str> = VecDeque::from([START]);
        while let Some(current) = queue.pop_front() {
            for edge in edges.get(current).into_iter().flatten() {
                for next in edge.possible_targets() {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        match self.node_order.iter().find(|n| !visited.contains(n.as_str())) {
            Some(name) => Err(GraphError::InvalidGraph(format!(
                "Node '{name}' is not reachable from START"
            ))
            .into()),
            None => Ok(()),
        }
    }
}
