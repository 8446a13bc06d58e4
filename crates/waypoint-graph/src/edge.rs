use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use waypoint_core::error::{GraphError, Result};

type RouteFn = dyn Fn(&Value) -> String + Send + Sync;

/// Routes to one of a closed set of targets based on state.
///
/// The routing function returns a target name; anything outside `allowed`
/// is a routing error rather than a silent fallthrough.
#[derive(Clone)]
pub struct ConditionalEdge {
    route_fn: Arc<RouteFn>,
    allowed: Vec<String>,
}

impl ConditionalEdge {
    pub fn new<F, I, S>(route_fn: F, allowed: I) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            route_fn: Arc::new(route_fn),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Run the routing function and check the result against the allow-list.
    pub fn route(&self, from: &str, state: &Value) -> Result<String> {
        let target = (self.route_fn)(state);
        if self.allowed.iter().any(|t| *t == target) {
            Ok(target)
        } else {
            Err(GraphError::Routing {
                node: from.to_string(),
                target,
                allowed: self.allowed.clone(),
            }
            .into())
        }
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

/// An outgoing edge of a node (or of `START`).
#[derive(Clone, Debug)]
pub enum Edge {
    /// Always taken.
    Static { to: String },
    /// Target chosen from state after the source node's super-step.
    Conditional(ConditionalEdge),
}

impl Edge {
    pub fn to(target: impl Into<String>) -> Self {
        Edge::Static { to: target.into() }
    }

    /// Every target this edge could ever produce.
    pub fn possible_targets(&self) -> Vec<&str> {
        match self {
            Edge::Static { to } => vec![to.as_str()],
            Edge::Conditional(edge) => edge.allowed().iter().map(String::as_str).collect(),
        }
    }

    pub fn resolve(&self, from: &str, state: &Value) -> Result<String> {
        match self {
            Edge::Static { to } => Ok(to.clone()),
            Edge::Conditional(edge) => edge.route(from, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::error::WaypointError;

    fn by_length() -> ConditionalEdge {
        ConditionalEdge::new(
            |state: &Value| {
                let len = state["input"].as_str().map(str::len).unwrap_or(0);
                let target = if len > 20 { "technical" } else { "general" };
                target.to_string()
            },
            ["technical", "general"],
        )
    }

    #[test]
    fn static_edge_always_resolves() {
        let edge = Edge::to("b");
        assert_eq!(edge.resolve("a", &json!({})).unwrap(), "b");
        assert_eq!(edge.possible_targets(), vec!["b"]);
    }

    #[test]
    fn conditional_edge_routes_on_state() {
        let edge = Edge::Conditional(by_length());
        assert_eq!(
            edge.resolve("classify", &json!({"input": "short text"})).unwrap(),
            "general"
        );
        assert_eq!(
            edge.resolve("classify", &json!({"input": "a considerably longer question"}))
                .unwrap(),
            "technical"
        );
        assert_eq!(edge.possible_targets(), vec!["technical", "general"]);
    }

    #[test]
    fn target_outside_allow_list_fails_closed() {
        let edge = ConditionalEdge::new(|_: &Value| "nowhere".to_string(), ["a", "b"]);
        let err = edge.route("router", &json!({})).unwrap_err();
        match err {
            WaypointError::Graph(GraphError::Routing {
                node,
                target,
                allowed,
            }) => {
                assert_eq!(node, "router");
                assert_eq!(target, "nowhere");
                assert_eq!(allowed, vec!["a", "b"]);
            }
            other => panic!("expected routing error, got {other:?}"),
        }
    }
}
