/// Sentinel node name for the graph entry point.
pub const START: &str = "__start__";

/// Sentinel node name for the graph exit point.
pub const END: &str = "__end__";

pub(crate) fn is_reserved(name: &str) -> bool {
    name == START || name == END
}
