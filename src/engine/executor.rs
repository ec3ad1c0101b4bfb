//! Workflow interpreter.
//!
//! The engine walks the graph depth-first from the trigger, one handler at a
//! time. Children are dispatched according to the parent handler's
//! [`ControlFlow`] class. Failures are routed to an error-handler node wired
//! directly below the failing node, or abort the run.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use super::context::ExecutionContext;
use crate::config::EngineConfig;
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result, StructuralError, WorkflowFailure};
use crate::metrics;
use crate::nodes::{missing_required_field, ControlFlow, Node, NodeContext, NodeRegistry};
use crate::storage::{ExecutionSink, LogLevel, RunPatch};
use crate::workflow::{validate, Edge, ExecutionGraph, Node as WorkflowNode, WorkflowDefinition};

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_id: String,
    pub duration_ms: u64,
    pub nodes_executed: usize,
}

/// What every visit of one run needs to see.
struct RunScope<'a> {
    graph: &'a ExecutionGraph,
    workflow_name: &'a str,
    run_id: Option<String>,
}

/// Workflow interpreter.
///
/// One engine runs one workflow at a time and owns the run's
/// [`ExecutionContext`] and its circuit breakers. Breakers survive across
/// runs of the same engine; the context is replaced at the start of each run.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    config: Arc<EngineConfig>,
    sink: Option<Arc<dyn ExecutionSink>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    user_id: Option<String>,
    subworkflow_depth: usize,
    breakers: CircuitBreakerRegistry,
    context: ExecutionContext,
}

impl Engine {
    /// Create an engine with default limits.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        let config = Arc::new(EngineConfig::default());
        Self {
            registry,
            breakers: CircuitBreakerRegistry::with_config((&config.circuit_breaker).into()),
            config,
            sink: None,
            credentials: None,
            user_id: None,
            subworkflow_depth: 0,
            context: ExecutionContext::default(),
        }
    }

    /// Use the given limits. Resets the breakers to the configured defaults.
    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.breakers = CircuitBreakerRegistry::with_config((&config.circuit_breaker).into());
        self.config = config;
        self
    }

    /// Override the breaker defaults (finer-grained than the config file).
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = CircuitBreakerRegistry::with_config(config);
        self
    }

    /// Report run progress to a sink.
    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// User on whose behalf handlers fetch credentials.
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Nesting level when this engine runs a sub-workflow.
    pub fn with_subworkflow_depth(mut self, depth: usize) -> Self {
        self.subworkflow_depth = depth;
        self
    }

    /// State of the current (or most recent) run.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Breaker state for a resource key.
    pub fn breaker_state(&self, resource_key: &str) -> CircuitState {
        self.breakers.state(resource_key)
    }

    /// Run a bare node/edge list.
    pub async fn run_graph(
        &mut self,
        name: &str,
        nodes: &[WorkflowNode],
        edges: &[Edge],
        trigger_input: Value,
    ) -> std::result::Result<ExecutionResult, WorkflowFailure> {
        let workflow = WorkflowDefinition {
            name: name.to_string(),
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
            ..WorkflowDefinition::default()
        };
        self.run(&workflow, trigger_input).await
    }

    /// Execute a workflow from its trigger.
    ///
    /// Structural problems fail the run before any node executes.
    #[instrument(
        name = "workflow.run",
        skip(self, workflow, trigger_input),
        fields(
            workflow_name = %workflow.name,
            depth = self.subworkflow_depth,
            execution_id = tracing::field::Empty,
        )
    )]
    pub async fn run(
        &mut self,
        workflow: &WorkflowDefinition,
        trigger_input: Value,
    ) -> std::result::Result<ExecutionResult, WorkflowFailure> {
        let started = Instant::now();

        let run_id = match &self.sink {
            Some(sink) => match sink.create_run(&workflow.name, &trigger_input).await {
                Ok(id) => Some(id),
                Err(e) => {
                    self.context = ExecutionContext::new(Uuid::new_v4().to_string());
                    return Err(self.fail(None, e, started).await);
                }
            },
            None => None,
        };

        let execution_id = run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Span::current().record("execution_id", execution_id.as_str());
        self.context =
            ExecutionContext::new(&execution_id).with_variables(workflow.variables.clone());

        let prepared = validate(&workflow.nodes, &workflow.edges, &self.config).and_then(
            |diagnostics| {
                ExecutionGraph::build(&workflow.nodes, &workflow.edges)
                    .map(|graph| (diagnostics, graph))
            },
        );
        let (diagnostics, graph) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(run_id.as_deref(), e.into(), started).await),
        };
        for warning in &diagnostics.warnings {
            warn!(workflow_name = %workflow.name, "{}", warning);
        }

        let scope = RunScope {
            graph: &graph,
            workflow_name: &workflow.name,
            run_id,
        };
        info!(
            "Starting execution {} of workflow '{}'",
            execution_id, workflow.name
        );
        self.log(&scope, None, LogLevel::Info, "Run started", None)
            .await;

        let Some(trigger) = diagnostics.triggers.first() else {
            let e = Error::from(StructuralError::NoTrigger);
            return Err(self.fail(scope.run_id.as_deref(), e, started).await);
        };
        if let Err(e) = self.visit(&scope, trigger, trigger_input).await {
            return Err(self.fail(scope.run_id.as_deref(), e, started).await);
        }

        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let nodes_executed = self.context.nodes_executed;

        if let (Some(sink), Some(run_id)) = (&self.sink, &scope.run_id) {
            if let Err(e) = sink
                .update_run(run_id, RunPatch::completed(nodes_executed, duration_ms))
                .await
            {
                warn!("Failed to record completion of run {}: {}", run_id, e);
            }
        }
        metrics::record_run("completed", duration);

        info!(
            "Execution {} completed: {} nodes in {}ms ({} recovered errors)",
            execution_id,
            nodes_executed,
            duration_ms,
            self.context.errors.len()
        );

        Ok(ExecutionResult {
            success: true,
            execution_id,
            duration_ms,
            nodes_executed,
        })
    }

    /// Visit one node and, recursively, the children its control flow selects.
    fn visit<'a>(
        &'a mut self,
        run: &'a RunScope<'a>,
        node_id: &'a str,
        input: Value,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let Some(node) = run.graph.node(node_id) else {
                return Ok(());
            };

            self.context.checkpoint(node_id);

            let Some(handler) = self.registry.resolve(&node.type_tag) else {
                warn!(
                    "No handler for node '{}' of type '{}', skipping it and its children",
                    node_id, node.type_tag
                );
                let message = format!("Unknown node type '{}'", node.type_tag);
                self.log(run, Some(node_id), LogLevel::Warn, &message, None)
                    .await;
                return Ok(());
            };

            let output = match self.invoke(run, node, handler.as_ref(), input).await {
                Ok(output) => output,
                Err(e) => return self.handle_failure(run, node, e).await,
            };

            match handler.control_flow() {
                ControlFlow::Sequential => {
                    for child in flow_children(run.graph, node_id, &self.config) {
                        self.visit(run, child, output.clone()).await?;
                    }
                }
                ControlFlow::Branch => {
                    let condition_met = output
                        .get("conditionMet")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let branch = if condition_met { "true" } else { "false" };
                    debug!("Node '{}' took the '{}' branch", node_id, branch);

                    let selected = flow_children(run.graph, node_id, &self.config)
                        .into_iter()
                        .find(|child| {
                            run.graph
                                .node(child)
                                .and_then(|n| n.branch_tag.as_deref())
                                == Some(branch)
                        });
                    if let Some(child) = selected {
                        self.visit(run, child, output).await?;
                    }
                }
                ControlFlow::Switch => {
                    let matched = output
                        .get("matched")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let case = output.get("case").and_then(Value::as_str);

                    let selected = match (matched, case) {
                        (true, Some(case)) => flow_children(run.graph, node_id, &self.config)
                            .into_iter()
                            .find(|child| {
                                run.graph
                                    .node(child)
                                    .and_then(|n| n.case_tag.as_deref())
                                    == Some(case)
                            }),
                        _ => None,
                    };
                    match selected {
                        Some(child) => {
                            debug!("Node '{}' matched case {:?}", node_id, case);
                            self.visit(run, child, output).await?;
                        }
                        None => debug!("Node '{}' matched no case, path ends", node_id),
                    }
                }
                ControlFlow::Loop => {
                    let max_depth = self.config.max_loop_depth;
                    if self.context.loop_depth() >= max_depth {
                        let e = Error::LoopDepthExceeded {
                            node_id: node_id.to_string(),
                            max_depth,
                        };
                        return self.handle_failure(run, node, e).await;
                    }
                    self.run_loop(run, node_id, &output).await?;
                }
            }

            Ok(())
        }
        .boxed()
    }

    /// Validate config, call the handler (through a breaker if it names a
    /// resource), and record the output.
    async fn invoke(
        &mut self,
        run: &RunScope<'_>,
        node: &WorkflowNode,
        handler: &dyn Node,
        input: Value,
    ) -> Result<Value> {
        if let Some(field) = missing_required_field(&node.config, handler.required_fields()) {
            return Err(Error::ConfigValidation {
                node_id: node.id.clone(),
                field: field.to_string(),
            });
        }

        info!("Executing node '{}' [{}]", node.id, node.type_tag);

        let ctx = self.node_context(run, node, input);
        let node_start = Instant::now();
        let outcome = match handler.resource_key(&node.config, &ctx) {
            Some(key) => {
                self.breakers
                    .execute(&key, handler.execute(&node.config, &ctx))
                    .await
            }
            None => handler.execute(&node.config, &ctx).await,
        };

        let status = match &outcome {
            Ok(_) => "success",
            Err(Error::CircuitOpen(_)) => "circuit_open",
            Err(_) => "failed",
        };
        metrics::record_node_execution(&node.type_tag, status, node_start.elapsed());

        let result = outcome?;
        debug!(node_id = %node.id, metadata = %result.metadata, "Node returned");
        self.context.complete(&node.id, result.data.clone());

        if let (Some(sink), Some(run_id)) = (&self.sink, &run.run_id) {
            if let Err(e) = sink
                .update_run(
                    run_id,
                    RunPatch::progress(self.context.nodes_executed, &node.id),
                )
                .await
            {
                warn!("Failed to record progress of run {}: {}", run_id, e);
            }
        }
        self.log(
            run,
            Some(&node.id),
            LogLevel::Info,
            "Node completed",
            Some(&result.data),
        )
        .await;

        Ok(result.data)
    }

    /// Record a node failure and hand it to a directly wired error handler.
    async fn handle_failure(
        &mut self,
        run: &RunScope<'_>,
        node: &WorkflowNode,
        error: Error,
    ) -> Result<()> {
        let message = error.to_string();
        self.context.record_error(&node.id, &message);
        self.log(
            run,
            Some(&node.id),
            LogLevel::Error,
            &message,
            Some(&json!({ "code": error.code() })),
        )
        .await;

        let recovery = run
            .graph
            .children(&node.id)
            .iter()
            .map(String::as_str)
            .find(|child| {
                run.graph
                    .node(child)
                    .map(|n| self.config.is_error_handler(&n.type_tag))
                    .unwrap_or(false)
            });

        match recovery {
            Some(handler_id) => {
                warn!(
                    "Node '{}' failed, routing to error handler '{}': {}",
                    node.id, handler_id, message
                );
                let input = json!({
                    "error": message,
                    "failedNode": node.id,
                    "code": error.code(),
                });
                self.visit(run, handler_id, input).await
            }
            None => {
                error!("Node '{}' failed: {}", node.id, message);
                Err(error)
            }
        }
    }

    /// Re-run every child of a loop node once per iteration.
    async fn run_loop(&mut self, run: &RunScope<'_>, node_id: &str, output: &Value) -> Result<()> {
        let iterations = output
            .get("iterations")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let items = output.get("items").and_then(Value::as_array);
        let children = flow_children(run.graph, node_id, &self.config);

        debug!(
            "Loop '{}' running {} iterations over {} children",
            node_id,
            iterations,
            children.len()
        );

        self.context.push_loop(node_id, iterations);
        let mut outcome = Ok(());
        'iterations: for i in 0..iterations {
            self.context.set_iteration(i + 1);
            let input = iteration_input(output, i, iterations, items.and_then(|it| it.get(i)));
            for child in &children {
                if let Err(e) = self.visit(run, child, input.clone()).await {
                    outcome = Err(e);
                    break 'iterations;
                }
            }
        }
        self.context.pop_loop();
        outcome
    }

    fn node_context(&self, run: &RunScope<'_>, node: &WorkflowNode, input: Value) -> NodeContext {
        let variables: Map<String, Value> = self
            .context
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut ctx = NodeContext::new(&self.context.execution_id, run.workflow_name)
            .with_node_id(&node.id)
            .with_input(input)
            .with_variables(Value::Object(variables))
            .with_config(self.config.clone())
            .with_registry(self.registry.clone());
        ctx.node_outputs = self.context.outputs.clone();
        ctx.user_id = self.user_id.clone();
        ctx.subworkflow_depth = self.subworkflow_depth;
        if let Some(credentials) = &self.credentials {
            ctx = ctx.with_credentials(credentials.clone());
        }
        ctx
    }

    /// Append a run log line. Sink failures never fail the run.
    async fn log(
        &self,
        run: &RunScope<'_>,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Option<&Value>,
    ) {
        let (Some(sink), Some(run_id)) = (&self.sink, &run.run_id) else {
            return;
        };
        if let Err(e) = sink.append_log(run_id, node_id, level, message, data).await {
            warn!("Failed to append log for run {}: {}", run_id, e);
        }
    }

    /// Close out a failed run.
    async fn fail(&mut self, run_id: Option<&str>, error: Error, started: Instant) -> WorkflowFailure {
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let last_checkpoint = self.context.last_completed.clone();
        let nodes_executed = self.context.nodes_executed;

        error!(
            "Execution {} failed after {} nodes: {}",
            self.context.execution_id, nodes_executed, error
        );

        if let (Some(sink), Some(run_id)) = (&self.sink, run_id) {
            let patch = RunPatch::failed(
                error.to_string(),
                last_checkpoint.clone(),
                nodes_executed,
                duration_ms,
            );
            if let Err(e) = sink.update_run(run_id, patch).await {
                warn!("Failed to record failure of run {}: {}", run_id, e);
            }
        }
        metrics::record_run("failed", duration);

        WorkflowFailure {
            execution_id: self.context.execution_id.clone(),
            error,
            errors: self.context.errors.clone(),
            last_checkpoint,
            nodes_executed,
            duration_ms,
        }
    }
}

/// Children that take part in normal dispatch. Error handlers only run when
/// their parent fails.
fn flow_children<'g>(graph: &'g ExecutionGraph, node_id: &str, config: &EngineConfig) -> Vec<&'g str> {
    graph
        .children(node_id)
        .iter()
        .map(String::as_str)
        .filter(|child| {
            graph
                .node(child)
                .map(|n| !config.is_error_handler(&n.type_tag))
                .unwrap_or(false)
        })
        .collect()
}

/// Input for one loop iteration: the loop's output plus iteration markers.
fn iteration_input(output: &Value, index: usize, iterations: usize, item: Option<&Value>) -> Value {
    let mut map = match output {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    map.insert("currentIteration".to_string(), json!(index + 1));
    map.insert("isLastIteration".to_string(), json!(index + 1 == iterations));
    if let Some(item) = item {
        map.insert("item".to_string(), item.clone());
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeResult;
    use crate::storage::{MemorySink, RunStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every invocation as `(node_id, input)`.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl Recorder {
        fn ids(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| id.clone())
                .collect()
        }

        fn inputs(&self, node_id: &str) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == node_id)
                .map(|(_, input)| input.clone())
                .collect()
        }
    }

    /// Echoes `{ node, input }` and records the call.
    struct RecordingNode {
        recorder: Recorder,
    }

    #[async_trait]
    impl Node for RecordingNode {
        fn node_type(&self) -> &str {
            "record"
        }

        async fn execute(&self, _config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
            self.recorder
                .calls
                .lock()
                .unwrap()
                .push((ctx.node_id.clone(), ctx.input.clone()));
            Ok(NodeResult::new(json!({
                "success": true,
                "node": ctx.node_id,
                "input": ctx.input,
            })))
        }
    }

    /// Always fails, optionally against a breaker-protected resource.
    struct AlwaysFailNode;

    #[async_trait]
    impl Node for AlwaysFailNode {
        fn node_type(&self) -> &str {
            "always_fail"
        }

        fn resource_key(&self, config: &Value, _ctx: &NodeContext) -> Option<String> {
            config.get("service").and_then(Value::as_str).map(str::to_string)
        }

        async fn execute(&self, _config: &Value, _ctx: &NodeContext) -> Result<NodeResult> {
            Err(Error::Node("Always fails".to_string()))
        }
    }

    fn engine() -> (Engine, Recorder) {
        let recorder = Recorder::default();
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(RecordingNode {
            recorder: recorder.clone(),
        }));
        registry.register(Arc::new(AlwaysFailNode));
        (Engine::new(Arc::new(registry)), recorder)
    }

    fn node(id: &str, type_tag: &str) -> WorkflowNode {
        WorkflowNode::new(id, type_tag)
    }

    #[tokio::test]
    async fn test_chain_passes_previous_output() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("a", "record"),
            node("b", "record"),
        ];
        let edges = vec![Edge::new("start", "a"), Edge::new("a", "b")];

        let result = engine
            .run_graph("chain", &nodes, &edges, json!({"order": 1}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.nodes_executed, 3);
        assert_eq!(recorder.inputs("a"), vec![json!({"order": 1})]);
        assert_eq!(
            recorder.inputs("b"),
            vec![engine.context().get_output("a").cloned().unwrap()]
        );
        assert_eq!(engine.context().last_completed.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_fan_out_is_sequential_in_edge_order() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("x", "record"),
            node("y", "record"),
            node("x2", "record"),
        ];
        let edges = vec![
            Edge::new("start", "y"),
            Edge::new("start", "x"),
            Edge::new("y", "x2"),
        ];

        engine.run_graph("fan", &nodes, &edges, json!({})).await.unwrap();
        assert_eq!(recorder.ids(), vec!["y", "x2", "x"]);
    }

    #[tokio::test]
    async fn test_branch_selects_tagged_child() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("check", "if_else").with_config(json!({
                "value1": 5, "operator": "greater_than", "value2": 3
            })),
            node("yes", "record").with_branch("true"),
            node("no", "record").with_branch("false"),
        ];
        let edges = vec![
            Edge::new("start", "check"),
            Edge::new("check", "no"),
            Edge::new("check", "yes"),
        ];

        engine.run_graph("branch", &nodes, &edges, json!({})).await.unwrap();
        assert_eq!(recorder.ids(), vec!["yes"]);
    }

    #[tokio::test]
    async fn test_switch_selects_case_child_or_dead_ends() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("route", "switch").with_config(json!({
                "value": "{{input.kind}}", "cases": ["refund", "order"]
            })),
            node("refunds", "record").with_case("refund"),
            node("orders", "record").with_case("order"),
        ];
        let edges = vec![
            Edge::new("start", "route"),
            Edge::new("route", "refunds"),
            Edge::new("route", "orders"),
        ];

        engine
            .run_graph("switch", &nodes, &edges, json!({"kind": "order"}))
            .await
            .unwrap();
        assert_eq!(recorder.ids(), vec!["orders"]);

        let result = engine
            .run_graph("switch", &nodes, &edges, json!({"kind": "other"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(recorder.ids(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_loop_iteration_order_and_markers() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("repeat", "loop").with_config(json!({"iterations": 3})),
            node("c1", "record"),
            node("c2", "record"),
        ];
        let edges = vec![
            Edge::new("start", "repeat"),
            Edge::new("repeat", "c1"),
            Edge::new("repeat", "c2"),
        ];

        engine.run_graph("loop", &nodes, &edges, json!({})).await.unwrap();

        assert_eq!(recorder.ids(), vec!["c1", "c2", "c1", "c2", "c1", "c2"]);
        let inputs = recorder.inputs("c1");
        assert_eq!(inputs[0]["currentIteration"], 1);
        assert_eq!(inputs[0]["isLastIteration"], false);
        assert_eq!(inputs[2]["currentIteration"], 3);
        assert_eq!(inputs[2]["isLastIteration"], true);
        assert!(engine.context().loop_stack.is_empty());
    }

    #[tokio::test]
    async fn test_loop_over_items_exposes_item() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("each", "loop").with_config(json!({"items": "{{input.rows}}"})),
            node("row", "record"),
        ];
        let edges = vec![Edge::new("start", "each"), Edge::new("each", "row")];

        engine
            .run_graph("items", &nodes, &edges, json!({"rows": ["a", "b"]}))
            .await
            .unwrap();

        let items: Vec<Value> = recorder
            .inputs("row")
            .into_iter()
            .map(|input| input["item"].clone())
            .collect();
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_loop_depth_exceeded_runs_no_iterations() {
        let (engine, recorder) = engine();
        let config = EngineConfig {
            max_loop_depth: 1,
            ..EngineConfig::default()
        };
        let mut engine = engine.with_config(Arc::new(config));
        let nodes = vec![
            node("start", "manual_trigger"),
            node("outer", "loop").with_config(json!({"iterations": 2})),
            node("inner", "loop").with_config(json!({"iterations": 2})),
            node("body", "record"),
        ];
        let edges = vec![
            Edge::new("start", "outer"),
            Edge::new("outer", "inner"),
            Edge::new("inner", "body"),
        ];

        let failure = engine
            .run_graph("nested", &nodes, &edges, json!({}))
            .await
            .unwrap_err();

        assert_eq!(failure.code(), "LOOP_DEPTH_EXCEEDED");
        assert!(recorder.ids().is_empty());
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].node_id, "inner");
        assert!(engine.context().loop_stack.is_empty());
    }

    fn nested_loops(depth: usize) -> (Vec<WorkflowNode>, Vec<Edge>) {
        let mut nodes = vec![node("start", "manual_trigger")];
        let mut edges = Vec::new();
        let mut parent = "start".to_string();
        for level in 1..=depth {
            let id = format!("l{}", level);
            nodes.push(node(&id, "loop").with_config(json!({"iterations": 1})));
            edges.push(Edge::new(parent.as_str(), id.as_str()));
            parent = id;
        }
        nodes.push(node("body", "record"));
        edges.push(Edge::new(parent.as_str(), "body"));
        (nodes, edges)
    }

    #[tokio::test]
    async fn test_default_loop_depth_allows_five_levels() {
        let (mut engine, recorder) = engine();
        let (nodes, edges) = nested_loops(5);

        let result = engine
            .run_graph("five", &nodes, &edges, json!({}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(recorder.ids(), vec!["body"]);
        assert!(engine.context().loop_stack.is_empty());
    }

    #[tokio::test]
    async fn test_sixth_nested_loop_exceeds_default_depth() {
        let (mut engine, recorder) = engine();
        let (nodes, edges) = nested_loops(6);

        let failure = engine
            .run_graph("six", &nodes, &edges, json!({}))
            .await
            .unwrap_err();

        assert_eq!(failure.code(), "LOOP_DEPTH_EXCEEDED");
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].node_id, "l6");
        assert!(recorder.ids().is_empty());
        assert!(engine.context().loop_stack.is_empty());
    }

    #[tokio::test]
    async fn test_templated_webhook_targets_keep_separate_breakers() {
        let (engine, _) = engine();
        let mut engine = engine.with_breaker_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(600),
        });
        let nodes = vec![
            node("start", "manual_trigger"),
            node("notify", "webhook").with_config(json!({"url": "{{input.url}}"})),
        ];
        let edges = vec![Edge::new("start", "notify")];
        // nothing listens on these loopback ports
        let bad = "http://127.0.0.1:1/bad";
        let other = "http://127.0.0.1:2/other";

        let failure = engine
            .run_graph("hooks", &nodes, &edges, json!({ "url": bad }))
            .await
            .unwrap_err();
        assert_eq!(failure.code(), "HTTP_ERROR");
        assert_eq!(
            engine.breaker_state(&format!("webhook:{}", bad)),
            CircuitState::Open
        );

        let failure = engine
            .run_graph("hooks", &nodes, &edges, json!({ "url": other }))
            .await
            .unwrap_err();
        assert_eq!(failure.code(), "HTTP_ERROR");

        let failure = engine
            .run_graph("hooks", &nodes, &edges, json!({ "url": bad }))
            .await
            .unwrap_err();
        assert_eq!(failure.code(), "CIRCUIT_OPEN");
    }

    #[tokio::test]
    async fn test_missing_credentials_do_not_open_host_breaker() {
        let (engine, _) = engine();
        let mut engine = engine.with_breaker_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(600),
        });
        let nodes = vec![
            node("start", "manual_trigger"),
            node("fetch", "http_request").with_config(json!({
                "url": "https://api.example.com/orders",
                "credential": "crm"
            })),
        ];
        let edges = vec![Edge::new("start", "fetch")];

        for _ in 0..3 {
            let failure = engine
                .run_graph("crm", &nodes, &edges, json!({}))
                .await
                .unwrap_err();
            assert_eq!(failure.code(), "CREDENTIAL_ERROR");
        }
        assert_eq!(engine.breaker_state("http:api.example.com"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_error_handler_recovers_failure() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("boom", "always_fail"),
            node("next", "record"),
            node("recover", "error_handler"),
            node("after", "record"),
        ];
        let edges = vec![
            Edge::new("start", "boom"),
            Edge::new("boom", "next"),
            Edge::new("boom", "recover"),
            Edge::new("recover", "after"),
        ];

        let result = engine
            .run_graph("recover", &nodes, &edges, json!({}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(engine.context().errors.len(), 1);
        assert_eq!(engine.context().errors[0].node_id, "boom");
        assert_eq!(recorder.ids(), vec!["after"]);
        let recovered = recorder.inputs("after").remove(0);
        assert_eq!(recovered["failedNode"], "boom");
        assert_eq!(recovered["handled"], true);
    }

    #[tokio::test]
    async fn test_unhandled_failure_aborts_run() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("a", "record"),
            node("boom", "always_fail"),
            node("never", "record"),
        ];
        let edges = vec![
            Edge::new("start", "a"),
            Edge::new("a", "boom"),
            Edge::new("boom", "never"),
        ];

        let failure = engine
            .run_graph("abort", &nodes, &edges, json!({}))
            .await
            .unwrap_err();

        assert_eq!(failure.nodes_executed, 2);
        assert_eq!(failure.last_checkpoint.as_deref(), Some("a"));
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.code(), "NODE_ERROR");
        assert_eq!(recorder.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_missing_trigger_never_walks() {
        let (mut engine, recorder) = engine();
        let nodes = vec![node("a", "record")];

        let failure = engine.run_graph("none", &nodes, &[], json!({})).await.unwrap_err();
        assert_eq!(failure.code(), "STRUCTURAL_ERROR");
        assert_eq!(failure.nodes_executed, 0);
        assert!(recorder.ids().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_fails_before_execution() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("a", "record"),
            node("b", "record"),
        ];
        let edges = vec![
            Edge::new("start", "a"),
            Edge::new("a", "b"),
            Edge::new("b", "a"),
        ];

        let failure = engine.run_graph("cycle", &nodes, &edges, json!({})).await.unwrap_err();
        assert!(matches!(failure.error, Error::Structural(_)));
        assert!(recorder.ids().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_skips_subtree() {
        let (mut engine, recorder) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("mystery", "quantum_teleport"),
            node("below", "record"),
            node("sibling", "record"),
        ];
        let edges = vec![
            Edge::new("start", "mystery"),
            Edge::new("mystery", "below"),
            Edge::new("start", "sibling"),
        ];

        let result = engine.run_graph("skip", &nodes, &edges, json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(recorder.ids(), vec!["sibling"]);
        assert!(engine.context().checkpoints.contains_key("mystery"));
    }

    #[tokio::test]
    async fn test_config_validation_before_handler() {
        let (mut engine, _) = engine();
        let nodes = vec![
            node("start", "manual_trigger"),
            node("fetch", "http_request"),
        ];
        let edges = vec![Edge::new("start", "fetch")];

        let failure = engine.run_graph("cfg", &nodes, &edges, json!({})).await.unwrap_err();
        assert_eq!(failure.code(), "CONFIG_VALIDATION_ERROR");
        assert_eq!(failure.nodes_executed, 1);
        assert!(engine.context().get_output("fetch").is_none());
    }

    #[tokio::test]
    async fn test_breaker_opens_and_short_circuits() {
        let (engine, _) = engine();
        let mut engine = engine.with_breaker_config(CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
        });
        let nodes = vec![
            node("start", "manual_trigger"),
            node("call", "always_fail").with_config(json!({"service": "svc:flaky"})),
        ];
        let edges = vec![Edge::new("start", "call")];

        for _ in 0..2 {
            let failure = engine.run_graph("cb", &nodes, &edges, json!({})).await.unwrap_err();
            assert_eq!(failure.code(), "NODE_ERROR");
        }
        assert_eq!(engine.breaker_state("svc:flaky"), CircuitState::Open);

        let failure = engine.run_graph("cb", &nodes, &edges, json!({})).await.unwrap_err();
        assert_eq!(failure.code(), "CIRCUIT_OPEN");
        assert!(failure.error.is_transient());
    }

    #[tokio::test]
    async fn test_sink_receives_run_lifecycle() {
        let (engine, _) = engine();
        let sink = Arc::new(MemorySink::new());
        let mut engine = engine.with_sink(sink.clone());
        let nodes = vec![node("start", "manual_trigger"), node("a", "record")];
        let edges = vec![Edge::new("start", "a")];

        let result = engine.run_graph("sink", &nodes, &edges, json!({})).await.unwrap();

        let run = sink.get_run(&result.execution_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.nodes_executed, 2);
        assert_eq!(run.last_checkpoint.as_deref(), Some("a"));
        // run started + one line per node
        assert_eq!(sink.logs(&result.execution_id).await.len(), 3);
    }

    #[test]
    fn test_iteration_input_wraps_scalars() {
        let input = iteration_input(&json!(7), 0, 1, None);
        assert_eq!(input, json!({"data": 7, "currentIteration": 1, "isLastIteration": true}));
    }
}
