// Job Graph
// Immutable step/decision graph with status-labelled transitions

use crate::decision::JobExecutionDecider;
use crate::error::{BatchError, BatchResult};
use crate::listener::JobExecutionListener;
use crate::parameters::{JobParameters, JobParametersIncrementer};
use crate::status::FlowStatus;
use crate::step::Step;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// No start node was declared
    MissingStart,
    /// A transition or `from` names a node that does not exist
    UnknownNode,
    /// Two different nodes share a name
    DuplicateNode,
    /// A cycle made only of decision nodes
    DecisionCycle,
    /// Builder calls in an invalid order
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn missing_start(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::MissingStart,
        }
    }

    pub fn unknown_node(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownNode,
        }
    }

    pub fn duplicate_node(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::DuplicateNode,
        }
    }

    pub fn decision_cycle(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::DecisionCycle,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }
}

/// Builds a step from the run parameters when its node is reached
pub type StepFactory = Arc<dyn Fn(&JobParameters) -> BatchResult<Step> + Send + Sync>;

pub enum StepDefinition {
    Ready(Arc<Step>),
    /// Built per execution; the step must carry the node's name
    JobScoped { name: String, factory: StepFactory },
}

impl StepDefinition {
    /// The step to run for this execution
    pub fn resolve(&self, parameters: &JobParameters) -> BatchResult<Arc<Step>> {
        match self {
            Self::Ready(step) => Ok(Arc::clone(step)),
            Self::JobScoped { name, factory } => {
                let step = factory(parameters)?;
                if step.name() != name {
                    return Err(BatchError::configuration(format!(
                        "job-scoped node '{}' built a step named '{}'",
                        name,
                        step.name()
                    )));
                }
                Ok(Arc::new(step))
            }
        }
    }
}

pub enum Node {
    Step(StepDefinition),
    Decision(Arc<dyn JobExecutionDecider>),
}

/// Where a transition leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    /// End the job COMPLETED
    End,
    /// End the job FAILED
    Fail,
    /// End the job STOPPED; a restart resumes at the named node
    Stop { restart_at: String },
}

/// Immutable job definition
pub struct Job {
    name: String,
    start: String,
    nodes: HashMap<String, Node>,
    transitions: HashMap<(String, FlowStatus), Target>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
    restartable: bool,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn listeners(&self) -> &[Arc<dyn JobExecutionListener>] {
        &self.listeners
    }

    pub fn incrementer(&self) -> Option<&Arc<dyn JobParametersIncrementer>> {
        self.incrementer.as_ref()
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    /// Edge to follow from `node` for `status`
    ///
    /// Exact label first, then the FAILED or COMPLETED default; `None` means
    /// the node is terminal for this status.
    pub fn route(&self, node: &str, status: &FlowStatus) -> Option<&Target> {
        self.transitions
            .get(&(node.to_string(), status.clone()))
            .or_else(|| {
                let fallback = status.default_route();
                if &fallback == status {
                    None
                } else {
                    self.transitions.get(&(node.to_string(), fallback))
                }
            })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&String> = self.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &nodes)
            .field("transitions", &self.transitions.len())
            .field("restartable", &self.restartable)
            .finish()
    }
}

/// Fluent builder for [`Job`]
///
/// ```ignore
/// Job::builder("userJob")
///     .start(save_users)
///     .next(level_up)
///     .decision("dateDecider", JobParametersDecider::new("date"))
///     .on("CONTINUE").to(order_statistics)
///     .from("dateDecider").on("COMPLETED").end()
///     .build()?;
/// ```
pub struct JobBuilder {
    name: String,
    start: Option<String>,
    nodes: HashMap<String, Node>,
    transitions: HashMap<(String, FlowStatus), Target>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
    restartable: bool,
    current: Option<String>,
    pending: Option<FlowStatus>,
    error: Option<GraphError>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            listeners: Vec::new(),
            incrementer: None,
            restartable: true,
            current: None,
            pending: None,
            error: None,
        }
    }

    pub fn incrementer<I>(mut self, incrementer: I) -> Self
    where
        I: JobParametersIncrementer + 'static,
    {
        self.incrementer = Some(Arc::new(incrementer));
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: JobExecutionListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Declare the first node
    pub fn start(mut self, step: Step) -> Self {
        if self.start.is_some() {
            self.fail_with(GraphError::invalid_structure(format!(
                "job '{}' already has a start node",
                self.name
            )));
            return self;
        }
        let name = step.name().to_string();
        self.add_node(name.clone(), Node::Step(StepDefinition::Ready(Arc::new(step))));
        self.start = Some(name.clone());
        self.current = Some(name);
        self
    }

    /// Declare a first node built from the run parameters
    pub fn start_job_scoped<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&JobParameters) -> BatchResult<Step> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.start.is_some() {
            self.fail_with(GraphError::invalid_structure(format!(
                "job '{}' already has a start node",
                self.name
            )));
            return self;
        }
        let definition = StepDefinition::JobScoped {
            name: name.clone(),
            factory: Arc::new(factory),
        };
        self.add_node(name.clone(), Node::Step(definition));
        self.start = Some(name.clone());
        self.current = Some(name);
        self
    }

    /// Continue from the current node to `step`
    pub fn next(mut self, step: Step) -> Self {
        let name = step.name().to_string();
        self.add_node(name.clone(), Node::Step(StepDefinition::Ready(Arc::new(step))));
        self.link(name);
        self
    }

    /// Continue to a step built from the run parameters when it is reached
    pub fn next_job_scoped<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&JobParameters) -> BatchResult<Step> + Send + Sync + 'static,
    {
        let name = name.into();
        let definition = StepDefinition::JobScoped {
            name: name.clone(),
            factory: Arc::new(factory),
        };
        self.add_node(name.clone(), Node::Step(definition));
        self.link(name);
        self
    }

    /// Continue to a decision node
    pub fn decision<D>(mut self, name: impl Into<String>, decider: D) -> Self
    where
        D: JobExecutionDecider + 'static,
    {
        let name = name.into();
        self.add_node(name.clone(), Node::Decision(Arc::new(decider)));
        self.link(name);
        self
    }

    /// Label of the next transition out of the current node
    pub fn on(mut self, label: impl Into<FlowStatus>) -> Self {
        if self.current.is_none() {
            self.fail_with(GraphError::invalid_structure("on() called before any node"));
        }
        self.pending = Some(label.into());
        self
    }

    /// Same as [`next`](Self::next); reads better after [`on`](Self::on)
    pub fn to(self, step: Step) -> Self {
        self.next(step)
    }

    /// Transition to a node declared elsewhere in the builder
    pub fn to_node(mut self, name: impl Into<String>) -> Self {
        self.link(name.into());
        self
    }

    /// Select an existing node as the source of the following transitions
    pub fn from(mut self, name: impl Into<String>) -> Self {
        self.current = Some(name.into());
        self.pending = None;
        self
    }

    pub fn end(mut self) -> Self {
        self.terminate(Target::End);
        self
    }

    pub fn fail(mut self) -> Self {
        self.terminate(Target::Fail);
        self
    }

    /// Stop the job here; a restart resumes at `node`
    pub fn stop_and_restart(mut self, node: impl Into<String>) -> Self {
        self.terminate(Target::Stop {
            restart_at: node.into(),
        });
        self
    }

    pub fn build(self) -> Result<Job, BatchError> {
        if let Some(error) = self.error {
            return Err(error.into());
        }

        let start = self.start.ok_or_else(|| {
            GraphError::missing_start(format!("job '{}' has no start node", self.name))
        })?;

        for ((from, label), target) in &self.transitions {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::unknown_node(format!(
                    "transition '{}' leaves unknown node '{}'",
                    label, from
                ))
                .into());
            }
            let to = match target {
                Target::Node(to) => Some(to),
                Target::Stop { restart_at } => Some(restart_at),
                Target::End | Target::Fail => None,
            };
            if let Some(to) = to {
                if !self.nodes.contains_key(to) {
                    return Err(GraphError::unknown_node(format!(
                        "transition '{}' from '{}' targets unknown node '{}'",
                        label, from, to
                    ))
                    .into());
                }
            }
        }

        let job = Job {
            name: self.name,
            start,
            nodes: self.nodes,
            transitions: self.transitions,
            listeners: self.listeners,
            incrementer: self.incrementer,
            restartable: self.restartable,
        };
        detect_decision_cycles(&job)?;
        Ok(job)
    }

    fn add_node(&mut self, name: String, node: Node) {
        if let Some(existing) = self.nodes.get(&name) {
            let same_step = match (existing, &node) {
                (
                    Node::Step(StepDefinition::Ready(a)),
                    Node::Step(StepDefinition::Ready(b)),
                ) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !same_step {
                self.fail_with(GraphError::duplicate_node(format!(
                    "job '{}' declares node '{}' twice",
                    self.name, name
                )));
            }
            return;
        }
        self.nodes.insert(name, node);
    }

    /// Edge from the current node to `to`, labelled by the pending `on()` or COMPLETED
    fn link(&mut self, to: String) {
        match self.current.take() {
            Some(from) => {
                let label = self.pending.take().unwrap_or(FlowStatus::Completed);
                self.transitions.insert((from, label), Target::Node(to.clone()));
            }
            None => self.fail_with(GraphError::invalid_structure(format!(
                "node '{}' added before start()",
                to
            ))),
        }
        self.current = Some(to);
    }

    fn terminate(&mut self, target: Target) {
        match (self.current.clone(), self.pending.take()) {
            (Some(from), Some(label)) => {
                self.transitions.insert((from, label), target);
            }
            _ => self.fail_with(GraphError::invalid_structure(
                "end/fail/stop must follow from(..).on(..)",
            )),
        }
    }

    fn fail_with(&mut self, error: GraphError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

/// Reject cycles that pass only through decision nodes; they could never make progress
fn detect_decision_cycles(job: &Job) -> Result<(), GraphError> {
    let decisions: HashSet<&str> = job
        .nodes
        .iter()
        .filter(|(_, node)| matches!(node, Node::Decision(_)))
        .map(|(name, _)| name.as_str())
        .collect();

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for ((from, _), target) in &job.transitions {
        if let Target::Node(to) = target {
            if decisions.contains(from.as_str()) && decisions.contains(to.as_str()) {
                edges.entry(from.as_str()).or_default().push(to.as_str());
            }
        }
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut names: Vec<&str> = decisions.iter().copied().collect();
    names.sort();

    for name in names {
        if !visited.contains(name) {
            if let Some(cycle) = dfs_cycle(name, &edges, &mut visited, &mut rec_stack) {
                return Err(GraphError::decision_cycle(format!(
                    "decision nodes form a cycle: {}",
                    cycle.join(" -> ")
                )));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    name: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(name);
    rec_stack.insert(name);

    for &next in edges.get(name).into_iter().flatten() {
        if !visited.contains(next) {
            if let Some(mut cycle) = dfs_cycle(next, edges, visited, rec_stack) {
                cycle.insert(0, name.to_string());
                return Some(cycle);
            }
        } else if rec_stack.contains(next) {
            return Some(vec![name.to_string(), next.to_string()]);
        }
    }

    rec_stack.remove(name);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::JobParametersDecider;
    use crate::error::BatchResult;
    use crate::execution::models::{JobExecution, StepExecution};
    use crate::status::RepeatStatus;
    use crate::step::tasklet::{StepScope, Tasklet};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Tasklet for Noop {
        async fn execute(&self, _scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
            Ok(RepeatStatus::Finished)
        }
    }

    fn step(name: &str) -> Step {
        Step::builder(name).tasklet(Noop)
    }

    fn constant(status: &'static str) -> impl JobExecutionDecider {
        move |_: &JobExecution, _: Option<&StepExecution>| -> BatchResult<FlowStatus> {
            Ok(FlowStatus::from(status))
        }
    }

    fn graph_kind(result: Result<Job, BatchError>) -> GraphErrorKind {
        match result {
            Err(BatchError::Graph(e)) => e.kind,
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected graph error"),
        }
    }

    #[test]
    fn test_sequential_routes() {
        let job = Job::builder("helloJob")
            .start(step("a"))
            .next(step("b"))
            .build()
            .unwrap();

        assert_eq!(job.start(), "a");
        assert_eq!(job.route("a", &FlowStatus::Completed), Some(&Target::Node("b".into())));
        // any non-failed status falls back to COMPLETED
        assert_eq!(job.route("a", &FlowStatus::custom("NOOP")), Some(&Target::Node("b".into())));
        // FAILED never falls back to COMPLETED
        assert_eq!(job.route("a", &FlowStatus::Failed), None);
        assert_eq!(job.route("b", &FlowStatus::Completed), None);
    }

    #[test]
    fn test_decision_branches() {
        let job = Job::builder("userJob")
            .start(step("save"))
            .next(step("levelUp"))
            .decision("decider", JobParametersDecider::new("date"))
            .on("CONTINUE")
            .to(step("orderStatistics"))
            .from("decider")
            .on("COMPLETED")
            .end()
            .build()
            .unwrap();

        assert_eq!(
            job.route("decider", &FlowStatus::Continue),
            Some(&Target::Node("orderStatistics".into()))
        );
        assert_eq!(job.route("decider", &FlowStatus::Completed), Some(&Target::End));
        assert!(matches!(job.node("decider"), Some(Node::Decision(_))));
    }

    #[test]
    fn test_failed_edge_and_stop() {
        let job = Job::builder("recoveryJob")
            .start(step("risky"))
            .on("FAILED")
            .to(step("cleanup"))
            .from("risky")
            .on("COMPLETED")
            .stop_and_restart("cleanup")
            .from("cleanup")
            .on("*")
            .fail()
            .build()
            .unwrap();

        assert_eq!(
            job.route("risky", &FlowStatus::Failed),
            Some(&Target::Node("cleanup".into()))
        );
        assert_eq!(
            job.route("risky", &FlowStatus::Completed),
            Some(&Target::Stop { restart_at: "cleanup".into() })
        );
        assert_eq!(job.route("cleanup", &FlowStatus::custom("*")), Some(&Target::Fail));
    }

    #[test]
    fn test_missing_start() {
        assert_eq!(
            graph_kind(Job::builder("empty").build()),
            GraphErrorKind::MissingStart
        );
    }

    #[test]
    fn test_unknown_targets() {
        let result = Job::builder("j")
            .start(step("a"))
            .on("COMPLETED")
            .to_node("ghost")
            .build();
        assert_eq!(graph_kind(result), GraphErrorKind::UnknownNode);

        let result = Job::builder("j")
            .start(step("a"))
            .from("nowhere")
            .on("COMPLETED")
            .end()
            .build();
        assert_eq!(graph_kind(result), GraphErrorKind::UnknownNode);
    }

    #[test]
    fn test_duplicate_node_names() {
        let result = Job::builder("j").start(step("a")).next(step("a")).build();
        assert_eq!(graph_kind(result), GraphErrorKind::DuplicateNode);
    }

    #[test]
    fn test_step_loops_are_allowed_but_decision_loops_are_not() {
        let looping = Job::builder("j")
            .start(step("work"))
            .decision("again", constant("CONTINUE"))
            .on("CONTINUE")
            .to_node("work")
            .from("again")
            .on("COMPLETED")
            .end()
            .build();
        assert!(looping.is_ok());

        let result = Job::builder("j")
            .start(step("work"))
            .decision("d1", constant("X"))
            .decision("d2", constant("Y"))
            .on("Y")
            .to_node("d1")
            .build();
        assert_eq!(graph_kind(result), GraphErrorKind::DecisionCycle);
    }

    #[test]
    fn test_terminal_without_on_is_rejected() {
        let result = Job::builder("j").start(step("a")).end().build();
        assert_eq!(graph_kind(result), GraphErrorKind::InvalidStructure);
    }

    #[test]
    fn test_job_scoped_step_resolves_from_parameters() {
        let job = Job::builder("chunkProcessingJob")
            .start(step("taskBaseStep"))
            .next_job_scoped("chunkBaseStep", |params: &JobParameters| {
                let size = params.get_long("chunkSize").unwrap_or(10);
                let step = Step::builder("chunkBaseStep").tasklet(Noop);
                Ok(if size > 0 { step } else { Step::builder("emptyStep").tasklet(Noop) })
            })
            .build()
            .unwrap();

        let Some(Node::Step(definition)) = job.node("chunkBaseStep") else {
            panic!("expected a step node");
        };

        let params = crate::parameters::JobParametersBuilder::new()
            .add_long("chunkSize", 25)
            .build();
        assert_eq!(definition.resolve(&params).unwrap().name(), "chunkBaseStep");

        // Restart bookkeeping is keyed by node name, so a renamed step is refused
        let params = crate::parameters::JobParametersBuilder::new()
            .add_long("chunkSize", 0)
            .build();
        let err = definition.resolve(&params).unwrap_err();
        assert!(matches!(err, BatchError::Configuration(msg) if msg.contains("emptyStep")));
    }
}
