use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use waypoint_checkpoint::prelude::{
    Checkpoint, CheckpointConfigExt, CheckpointMetadata, CheckpointSource, CheckpointStore,
    GraphOutput, Interrupt, InterruptKind, PendingInterrupt, PendingWrite,
};
use waypoint_core::config::RunConfig;
use waypoint_core::error::{GraphError, Result, WaypointError};
use waypoint_core::stream::StreamMode;

use crate::compiled::CompiledStateGraph;
use crate::constants::START;
use crate::context::NodeContext;
use crate::stream::{StreamEvent, StreamInput, StreamSink};

const STREAM_BUFFER: usize = 64;

/// Everything one `invoke`/`resume` call threads through the loop.
struct Call<'a> {
    thread_id: String,
    config: &'a RunConfig,
    store: &'a dyn CheckpointStore,
    sink: &'a StreamSink,
}

/// The nodes of one super-step.
struct StepPlan {
    /// Node name and the resume values its `interrupt` calls replay.
    runs: Vec<(String, Vec<Value>)>,
    /// Updates of nodes in the same super-step that finished before it was
    /// suspended.
    pending: Vec<PendingWrite>,
}

impl StepPlan {
    fn fresh(frontier: Vec<String>) -> Self {
        Self {
            runs: frontier.into_iter().map(|node| (node, Vec::new())).collect(),
            pending: Vec::new(),
        }
    }
}

enum NodeOutcome {
    Update(Value),
    Suspended(Value),
    Failed(WaypointError),
}

impl CompiledStateGraph {
    /// Run a thread until it completes or suspends.
    ///
    /// On a new thread `input` is merged onto channel defaults. On a
    /// finished thread it starts a new turn through the reducers. A `null`
    /// input continues a thread whose frontier is non-empty, which is how a
    /// failed super-step is retried. Invoking a suspended thread is an
    /// interrupt-protocol error.
    pub async fn invoke(
        &self,
        input: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<GraphOutput> {
        self.start(input, config, store, &StreamSink::default())
            .await
    }

    /// Answer the thread's pending interrupt and keep running.
    pub async fn resume(
        &self,
        value: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
    ) -> Result<GraphOutput> {
        self.answer(value, config, store, &StreamSink::default())
            .await
    }

    /// `invoke`, forwarding events of the selected modes to `tx`. The last
    /// event sent is always `Complete`, `Interrupted` or `Error`.
    pub async fn invoke_with_streaming(
        &self,
        input: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        modes: &[StreamMode],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<GraphOutput> {
        let sink = StreamSink::new(tx, modes);
        let result = self.start(input, config, store, &sink).await;
        sink.finish(&result).await;
        result
    }

    /// `resume`, forwarding events like `invoke_with_streaming`.
    pub async fn resume_with_streaming(
        &self,
        value: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        modes: &[StreamMode],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<GraphOutput> {
        let sink = StreamSink::new(tx, modes);
        let result = self.answer(value, config, store, &sink).await;
        sink.finish(&result).await;
        result
    }

    /// Run on a background task and return its events as a stream.
    pub fn stream(
        self: Arc<Self>,
        input: StreamInput,
        config: RunConfig,
        store: Arc<dyn CheckpointStore>,
        modes: Vec<StreamMode>,
    ) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let result = match input {
                StreamInput::Input(value) => {
                    self.invoke_with_streaming(value, &config, store.as_ref(), &modes, tx)
                        .await
                }
                StreamInput::Resume(value) => {
                    self.resume_with_streaming(value, &config, store.as_ref(), &modes, tx)
                        .await
                }
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "streamed run ended with an error");
            }
        });
        ReceiverStream::new(rx)
    }

    async fn start(
        &self,
        input: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        sink: &StreamSink,
    ) -> Result<GraphOutput> {
        let call = Call {
            thread_id: config.require_thread_id()?,
            config,
            store,
            sink,
        };

        let checkpoint = match store.get_latest(&call.thread_id).await? {
            None => {
                let state = self.registry.initialize(&input_fields(input)?)?;
                let next = self.entry_frontier(&state)?;
                let first = Checkpoint::new(
                    &call.thread_id,
                    0,
                    state,
                    next,
                    CheckpointMetadata::new(CheckpointSource::Input, 0)
                        .with_writes(vec![START.to_string()])
                        .with_run(config),
                );
                store.put(first.clone()).await?;
                tracing::info!(
                    thread_id = %call.thread_id,
                    run_id = %config.run_id,
                    "thread started"
                );
                first
            }
            Some(latest) => {
                if let Some(pending) = &latest.interrupt {
                    return Err(GraphError::InterruptProtocol(format!(
                        "thread '{}' is suspended at node '{}' (checkpoint {}); resume it instead",
                        call.thread_id, pending.node, latest.sequence
                    ))
                    .into());
                }
                if input.is_null() && !latest.next_nodes.is_empty() {
                    self.ensure_known(&latest, &latest.next_nodes)?;
                    tracing::info!(
                        thread_id = %call.thread_id,
                        sequence = latest.sequence,
                        "continuing thread"
                    );
                    latest
                } else {
                    let fields = Value::Object(input_fields(input)?);
                    let state = self
                        .registry
                        .merge(&latest.state, &[(START.to_string(), fields)])?;
                    let next = self.entry_frontier(&state)?;
                    let turn = Checkpoint::new(
                        &call.thread_id,
                        latest.sequence + 1,
                        state,
                        next,
                        CheckpointMetadata::new(CheckpointSource::Input, latest.metadata.step)
                            .with_writes(vec![START.to_string()])
                            .with_run(config),
                    );
                    store.put(turn.clone()).await?;
                    tracing::info!(
                        thread_id = %call.thread_id,
                        sequence = turn.sequence,
                        "new turn"
                    );
                    turn
                }
            }
        };

        self.run_loop(checkpoint, None, false, &call).await
    }

    async fn answer(
        &self,
        value: Value,
        config: &RunConfig,
        store: &dyn CheckpointStore,
        sink: &StreamSink,
    ) -> Result<GraphOutput> {
        let call = Call {
            thread_id: config.require_thread_id()?,
            config,
            store,
            sink,
        };

        let latest = store
            .get_latest(&call.thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(call.thread_id.clone()))?;
        let Some(pending) = latest.interrupt.clone() else {
            return Err(GraphError::InterruptProtocol(format!(
                "thread '{}' has no pending interrupt (checkpoint {})",
                call.thread_id, latest.sequence
            ))
            .into());
        };
        self.ensure_known(
            &latest,
            std::iter::once(&pending.node)
                .chain(pending.writes.iter().map(|write| &write.node))
                .chain(&latest.next_nodes),
        )?;
        tracing::info!(
            thread_id = %call.thread_id,
            node = %pending.node,
            kind = ?pending.kind,
            "resuming thread"
        );

        match pending.kind {
            InterruptKind::Node => {
                let mut resume_values = pending.resume_values;
                resume_values.push(value);
                let plan = StepPlan {
                    runs: vec![(pending.node, resume_values)],
                    pending: pending.writes,
                };
                self.run_loop(latest, Some(plan), false, &call).await
            }
            InterruptKind::Before => self.run_loop(latest, None, true, &call).await,
            InterruptKind::After if latest.next_nodes.is_empty() => {
                // Nothing left to run: record that the breakpoint was passed.
                let cleared = Checkpoint::new(
                    &call.thread_id,
                    latest.sequence + 1,
                    latest.state.clone(),
                    Vec::new(),
                    CheckpointMetadata::new(CheckpointSource::Loop, latest.metadata.step)
                        .with_run(config),
                );
                store.put(cleared.clone()).await?;
                self.run_loop(cleared, None, false, &call).await
            }
            InterruptKind::After => self.run_loop(latest, None, false, &call).await,
        }
    }

    /// Drive super-steps from `checkpoint` until the frontier is empty or a
    /// step suspends. `first` runs before anything scheduled on the frontier.
    async fn run_loop(
        &self,
        mut checkpoint: Checkpoint,
        mut first: Option<StepPlan>,
        mut skip_before: bool,
        call: &Call<'_>,
    ) -> Result<GraphOutput> {
        let mut steps = 0;
        loop {
            let plan = match first.take() {
                Some(plan) => Some(plan),
                None => {
                    if checkpoint.next_nodes.is_empty() {
                        tracing::info!(
                            thread_id = %call.thread_id,
                            sequence = checkpoint.sequence,
                            "thread complete"
                        );
                        return Ok(GraphOutput::Complete {
                            state: checkpoint.state_value(),
                            sequence: checkpoint.sequence,
                        });
                    }
                    if steps >= call.config.recursion_limit {
                        tracing::warn!(
                            thread_id = %call.thread_id,
                            limit = call.config.recursion_limit,
                            "recursion limit reached"
                        );
                        return Err(GraphError::RecursionLimit {
                            limit: call.config.recursion_limit,
                        }
                        .into());
                    }

                    let frontier = self.in_declaration_order(&checkpoint.next_nodes);
                    self.ensure_known(&checkpoint, &frontier)?;

                    if !skip_before {
                        let breakpoint = self
                            .breakpoints
                            .triggered(InterruptKind::Before, &frontier, &checkpoint.state_value())
                            .map(str::to_string);
                        if let Some(node) = breakpoint {
                            let paused = Checkpoint::new(
                                &call.thread_id,
                                checkpoint.sequence + 1,
                                checkpoint.state.clone(),
                                frontier,
                                CheckpointMetadata::new(
                                    CheckpointSource::Interrupt,
                                    checkpoint.metadata.step,
                                )
                                .with_run(call.config),
                            )
                            .with_interrupt(PendingInterrupt::breakpoint(
                                InterruptKind::Before,
                                node,
                            ));
                            call.store.put(paused.clone()).await?;
                            checkpoint = paused;
                            None
                        } else {
                            Some(StepPlan::fresh(frontier))
                        }
                    } else {
                        skip_before = false;
                        Some(StepPlan::fresh(frontier))
                    }
                }
            };

            if let Some(plan) = plan {
                let span = tracing::info_span!(
                    "super_step",
                    thread_id = %call.thread_id,
                    run_id = %call.config.run_id,
                    sequence = checkpoint.sequence,
                );
                checkpoint = self
                    .super_step(&checkpoint, plan, call)
                    .instrument(span)
                    .await?;
                steps += 1;
            }

            if let Some(interrupt) = checkpoint.to_interrupt() {
                return Ok(suspended(interrupt, &checkpoint));
            }
        }
    }

    /// Run one super-step on top of `checkpoint` and persist its result.
    ///
    /// Nothing is written if any node fails: the error carries the sequence
    /// of the last durable checkpoint, which is still the thread's head.
    ///
    /// A suspended step keeps the checkpoint's state as it was, so the
    /// re-entered node reads the same input on resume. Finished siblings
    /// are parked as pending writes and merged, in declaration order, with
    /// the resumed node's update in a single `merge`.
    async fn super_step(
        &self,
        checkpoint: &Checkpoint,
        plan: StepPlan,
        call: &Call<'_>,
    ) -> Result<Checkpoint> {
        let step = checkpoint.metadata.step;
        let state = checkpoint.state_value();

        let outcomes = join_all(plan.runs.iter().map(|(node, resume_values)| {
            self.run_node(node, resume_values.clone(), &state, checkpoint.sequence, step, call)
        }))
        .await;

        let mut ran: Vec<PendingWrite> = Vec::new();
        let mut suspension: Option<(String, Value)> = None;
        for ((node, _), outcome) in plan.runs.iter().zip(outcomes) {
            match outcome {
                NodeOutcome::Update(update) => ran.push(PendingWrite::new(node.clone(), update)),
                NodeOutcome::Suspended(payload) => {
                    if let Some((first, _)) = &suspension {
                        return Err(GraphError::InterruptProtocol(format!(
                            "nodes '{first}' and '{node}' both suspended in one super-step"
                        ))
                        .into());
                    }
                    suspension = Some((node.clone(), payload));
                }
                NodeOutcome::Failed(e) => return Err(e),
            }
        }

        let mut writes: Vec<PendingWrite> = plan.pending.into_iter().chain(ran.clone()).collect();
        writes.sort_by_key(|write| self.position(&write.node));
        let sequence = checkpoint.sequence + 1;
        let suspended = suspension.is_some();

        let next = match suspension {
            Some((node, payload)) => {
                let mut pending = PendingInterrupt::node(&node, payload);
                pending.resume_values = plan
                    .runs
                    .iter()
                    .find(|(name, _)| *name == node)
                    .map(|(_, values)| values.clone())
                    .unwrap_or_default();
                pending.writes = writes;
                Checkpoint::new(
                    &call.thread_id,
                    sequence,
                    checkpoint.state.clone(),
                    vec![node],
                    CheckpointMetadata::new(CheckpointSource::Interrupt, step)
                        .with_run(call.config),
                )
                .with_interrupt(pending)
            }
            None => {
                let updates: Vec<(String, Value)> = writes
                    .iter()
                    .map(|write| (write.node.clone(), write.update.clone()))
                    .collect();
                let merged = self.registry.merge(&checkpoint.state, &updates)?;
                let finished: Vec<String> = writes.into_iter().map(|write| write.node).collect();
                let frontier = self.next_frontier(&finished, &merged)?;
                let breakpoint = self
                    .breakpoints
                    .triggered(
                        InterruptKind::After,
                        &finished,
                        &Value::Object(merged.clone()),
                    )
                    .map(|node| PendingInterrupt::breakpoint(InterruptKind::After, node));
                let source = match breakpoint {
                    Some(_) => CheckpointSource::Interrupt,
                    None => CheckpointSource::Loop,
                };
                let mut done = Checkpoint::new(
                    &call.thread_id,
                    sequence,
                    merged,
                    frontier,
                    CheckpointMetadata::new(source, step + 1)
                        .with_writes(finished)
                        .with_run(call.config),
                );
                done.interrupt = breakpoint;
                done
            }
        };

        call.store.put(next.clone()).await?;
        tracing::debug!(
            sequence,
            suspended,
            next = ?next.next_nodes,
            "checkpoint written"
        );

        let emitted_step = next.metadata.step;
        for write in ran {
            call.sink
                .emit(StreamEvent::Updates {
                    step: emitted_step,
                    node: write.node,
                    update: write.update,
                })
                .await;
        }
        if !suspended {
            call.sink
                .emit(StreamEvent::Values {
                    step: emitted_step,
                    sequence,
                    state: next.state_value(),
                })
                .await;
        }

        Ok(next)
    }

    async fn run_node(
        &self,
        name: &str,
        resume_values: Vec<Value>,
        state: &Value,
        sequence: u64,
        step: usize,
        call: &Call<'_>,
    ) -> NodeOutcome {
        let Some(node) = self.nodes.get(name) else {
            return NodeOutcome::Failed(
                GraphError::InvalidGraph(format!("node '{name}' not found during execution"))
                    .into(),
            );
        };
        let ctx = NodeContext::for_step(
            name,
            step,
            call.config.clone(),
            resume_values,
            call.sink.clone(),
        );

        call.sink
            .emit(StreamEvent::NodeStart {
                node: name.to_string(),
                step,
            })
            .await;
        tracing::debug!(node = name, step, "running node");
        let result = node.invoke(state.clone(), ctx.clone()).await;
        call.sink
            .emit(StreamEvent::NodeEnd {
                node: name.to_string(),
                step,
            })
            .await;

        let suspension = match ctx.take_suspension() {
            Ok(suspension) => suspension,
            Err(e) => return NodeOutcome::Failed(e),
        };
        match (result, suspension) {
            (Err(e), _) if e.is_interrupt_protocol() => NodeOutcome::Failed(e),
            (_, Some(payload)) => NodeOutcome::Suspended(payload),
            (Ok(update), None) => NodeOutcome::Update(update),
            (Err(e), None) => {
                tracing::warn!(node = name, sequence, error = %e, "node failed");
                NodeOutcome::Failed(
                    GraphError::NodeExecution {
                        node: name.to_string(),
                        sequence,
                        source: Box::new(e),
                    }
                    .into(),
                )
            }
        }
    }
}

/// Caller input as channel overrides. `null` means "no input".
fn input_fields(input: Value) -> Result<Map<String, Value>> {
    match input {
        Value::Null => Ok(Map::new()),
        Value::Object(fields) => Ok(fields),
        other => Err(GraphError::Channel(format!(
            "graph input must be a JSON object, got {other}"
        ))
        .into()),
    }
}

fn suspended(interrupt: Interrupt, checkpoint: &Checkpoint) -> GraphOutput {
    tracing::info!(
        thread_id = %interrupt.thread_id,
        sequence = interrupt.sequence,
        node = %interrupt.node,
        kind = ?interrupt.kind,
        "thread suspended"
    );
    GraphOutput::Interrupted {
        interrupt,
        state: checkpoint.state_value(),
    }
}
