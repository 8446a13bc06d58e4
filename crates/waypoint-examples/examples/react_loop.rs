//! An agent loop: a scripted "model" decides between calling a tool and
//! answering, and the graph routes accordingly until it answers.
//!
//! ```bash
//! RUST_LOG=waypoint=debug cargo run --example react_loop -p waypoint-examples
//! ```

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_stream::StreamExt;

use waypoint_core::collaborator::{Collaborator, ScriptedCollaborator};
use waypoint_graph::prelude::*;

fn build(model: Arc<dyn Collaborator>) -> Result<CompiledStateGraph> {
    let mut g = StateGraph::new();
    g.add_append_channel("messages")
        .add_last_value_channel("pending_tool", json!(null))
        .add_binary_operator_channel("tool_calls", json!(0), AggregateOp::Sum);

    g.add_node(NodeFn::new("agent", move |state: Value, ctx: NodeContext| {
        let model = model.clone();
        async move {
            let reply = model.invoke(state["messages"].clone()).await?;
            if let Some(text) = reply["answer"].as_str() {
                for word in text.split_inclusive(' ') {
                    ctx.emit_token(word).await;
                }
            }
            Ok::<_, WaypointError>(json!({
                "messages": {"role": "assistant", "content": reply.clone()},
                "pending_tool": reply.get("tool").cloned().unwrap_or(Value::Null),
            }))
        }
    }))?;

    g.add_node(NodeFn::new("tools", |state: Value, _ctx| async move {
        let call = &state["pending_tool"];
        let result = match call["name"].as_str() {
            Some("search") => json!(format!(
                "3 results for '{}'",
                call["query"].as_str().unwrap_or("")
            )),
            Some("calculator") => json!(42),
            _ => json!("unknown tool"),
        };
        Ok(json!({
            "messages": {"role": "tool", "content": result},
            "tool_calls": 1,
        }))
    }))?;

    g.add_edge(START, "agent");
    g.add_conditional_edges(
        "agent",
        |state: &Value| {
            let target = if state["pending_tool"].is_null() { END } else { "tools" };
            target.to_string()
        },
        ["tools", END],
    );
    g.add_edge("tools", "agent");
    g.compile()
}

#[tokio::main]
async fn main() -> Result<()> {
    waypoint_examples::init_tracing();

    let model = Arc::new(ScriptedCollaborator::new(vec![
        json!({"tool": {"name": "search", "query": "rust async runtimes"}}),
        json!({"tool": {"name": "calculator", "expression": "6 * 7"}}),
        json!({"answer": "Tokio is the most widely used runtime, and the answer is 42."}),
    ]));
    let graph = Arc::new(build(model.clone())?);
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    let config = RunConfig::default()
        .with_thread_id("react-1")
        .with_recursion_limit(10);

    let mut events = graph.stream(
        StreamInput::Input(json!({"messages": [{"role": "user", "content": "Which runtime?"}]})),
        config,
        store,
        vec![StreamMode::Delta, StreamMode::Tokens],
    );
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Updates { node, update, .. } => println!("[{node}] {update}"),
            StreamEvent::Token { chunk, .. } => print!("{chunk}"),
            StreamEvent::Complete { state, .. } => {
                println!("\n\ntool calls: {}", state["tool_calls"]);
                println!("model calls: {}", model.call_count());
            }
            StreamEvent::Error { message } => eprintln!("run failed: {message}"),
            other => println!("{other:?}"),
        }
    }
    Ok(())
}
