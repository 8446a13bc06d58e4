use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use waypoint_checkpoint::prelude::InterruptKind;

type BreakCondition = dyn Fn(&Value) -> bool + Send + Sync;

/// Options fixed at compile time.
///
/// Static breakpoints pause a thread before a node's super-step runs
/// (`interrupt_before`) or after it has been merged and checkpointed
/// (`interrupt_after`). Resuming a breakpoint continues the thread; the
/// resume value is ignored.
#[derive(Clone, Default)]
pub struct CompileConfig {
    pub interrupt_before: Vec<String>,
    pub interrupt_after: Vec<String>,
    /// Breakpoints only fire when this returns `true` for the current state.
    pub condition: Option<Arc<BreakCondition>>,
}

impl CompileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    pub fn has_breakpoints(&self) -> bool {
        !self.interrupt_before.is_empty() || !self.interrupt_after.is_empty()
    }

    /// The first of `nodes` with a breakpoint of `kind` that fires on `state`.
    pub(crate) fn triggered<'a>(
        &self,
        kind: InterruptKind,
        nodes: &'a [String],
        state: &Value,
    ) -> Option<&'a str> {
        let list = match kind {
            InterruptKind::Before => &self.interrupt_before,
            InterruptKind::After => &self.interrupt_after,
            InterruptKind::Node => return None,
        };
        let node = nodes.iter().find(|n| list.contains(*n))?;
        match &self.condition {
            Some(cond) if !cond(state) => None,
            _ => Some(node.as_str()),
        }
    }
}

impl fmt::Debug for CompileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileConfig")
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("condition", &self.condition.as_ref().map(|_| ".."))
            .finish()
    }
}
