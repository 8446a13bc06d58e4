//! A two-node pipeline persisted to SQLite.
//!
//! Runs `START -> double -> increment -> END` on `{n: 5}`, streams the
//! state after every super-step, then prints the thread's checkpoints.
//!
//! ```bash
//! cargo run --example linear_pipeline -p waypoint-examples
//! ```

use serde_json::{Value, json};
use tokio::sync::mpsc;

use waypoint_graph::prelude::*;

fn build() -> Result<CompiledStateGraph> {
    let mut g = StateGraph::new();
    g.add_last_value_channel("n", json!(0));
    g.add_node(NodeFn::new("double", |state: Value, _ctx| async move {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({"n": n * 2}))
    }))?;
    g.add_node(NodeFn::new("increment", |state: Value, _ctx| async move {
        let n = state["n"].as_i64().unwrap_or(0);
        Ok(json!({"n": n + 1}))
    }))?;
    g.add_edge(START, "double")
        .add_edge("double", "increment")
        .add_edge("increment", END);
    g.compile()
}

#[tokio::main]
async fn main() -> Result<()> {
    waypoint_examples::init_tracing();

    let dir = tempfile::tempdir().map_err(|e| WaypointError::Other(e.to_string()))?;
    let db_path = dir.path().join("checkpoints.db");
    let store = SqliteCheckpointStore::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "opened checkpoint store");
    let graph = build()?;
    let config = RunConfig::default().with_thread_id("pipeline-1");

    let (tx, mut rx) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Values { step, state, .. } => println!("step {step}: {state}"),
                StreamEvent::Complete { state, sequence } => {
                    println!("complete at checkpoint {sequence}: {state}")
                }
                other => println!("{other:?}"),
            }
        }
    });

    graph
        .invoke_with_streaming(json!({"n": 5}), &config, &store, &[StreamMode::FullState], tx)
        .await?;
    printer
        .await
        .map_err(|e| WaypointError::Other(e.to_string()))?;

    println!("\nhistory:");
    for snapshot in graph.get_state_history(&config, &store).await? {
        println!(
            "  #{} {:?} writes={:?} next={:?} state={}",
            snapshot.sequence,
            snapshot.metadata.source,
            snapshot.metadata.writes,
            snapshot.next_nodes,
            snapshot.state
        );
    }
    Ok(())
}
