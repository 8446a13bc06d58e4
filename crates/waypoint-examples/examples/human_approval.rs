//! Human-in-the-loop: a reviewer node suspends the thread until someone
//! approves or rejects the draft. The decision comes from the first CLI
//! argument (`approve` by default). A fork of the suspended thread takes
//! the opposite decision to show that branches are independent.
//!
//! ```bash
//! cargo run --example human_approval -p waypoint-examples -- reject
//! ```

use serde_json::{Value, json};

use waypoint_graph::prelude::*;

fn build() -> Result<CompiledStateGraph> {
    let mut g = StateGraph::new();
    g.add_last_value_channel("draft", json!(""))
        .add_last_value_channel("status", json!("pending"))
        .add_append_channel("audit");

    g.add_node(NodeFn::new("write", |state: Value, _ctx| async move {
        let topic = state["draft"].as_str().unwrap_or("release notes");
        Ok(json!({
            "draft": format!("Draft: {topic}"),
            "audit": "drafted",
        }))
    }))?;
    g.add_node(NodeFn::new("review", |state: Value, ctx: NodeContext| async move {
        let decision = ctx.interrupt(json!({
            "question": "need-approval",
            "draft": state["draft"],
        }))?;
        let status = if decision == json!("approve") { "approved" } else { "rejected" };
        Ok::<_, WaypointError>(json!({
            "status": status,
            "audit": format!("reviewed: {decision}"),
        }))
    }))?;
    g.add_node(NodeFn::new("publish", |_state: Value, _ctx| async move {
        Ok(json!({"status": "published", "audit": "published"}))
    }))?;

    g.add_edge(START, "write").add_edge("write", "review");
    g.add_conditional_edges(
        "review",
        |state: &Value| {
            let target = if state["status"] == json!("approved") { "publish" } else { END };
            target.to_string()
        },
        ["publish", END],
    );
    g.add_edge("publish", END);
    g.compile()
}

#[tokio::main]
async fn main() -> Result<()> {
    waypoint_examples::init_tracing();

    let decision = std::env::args().nth(1).unwrap_or_else(|| "approve".into());
    let opposite = if decision == "approve" { "reject" } else { "approve" };

    let graph = build()?;
    let store = MemoryCheckpointStore::new();
    let config = RunConfig::default().with_thread_id("approval-1");

    let out = graph
        .invoke(json!({"draft": "v1.2 release notes"}), &config, &store)
        .await?;
    let Some(interrupt) = out.interrupt().cloned() else {
        println!("finished without review: {}", out.state());
        return Ok(());
    };
    println!(
        "suspended at '{}' (checkpoint {}): {}",
        interrupt.node, interrupt.sequence, interrupt.payload
    );

    let branch = graph
        .fork(&config, &store, interrupt.sequence, Value::Null)
        .await?;
    let branch_config = RunConfig::default().with_thread_id(branch.as_str());

    let main_out = graph.resume(json!(decision), &config, &store).await?;
    let branch_out = graph
        .resume(json!(opposite), &branch_config, &store)
        .await?;

    println!("\n{decision}: {}", main_out.state());
    println!("{opposite} (fork {branch}): {}", branch_out.state());
    Ok(())
}
