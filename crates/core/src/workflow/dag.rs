use crate::error::GraphError;
use crate::types::{DependencyMap, ExecutionPlan, NodeStatus, Step, StepId};
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Mutable per-node execution state
#[derive(Debug, Clone)]
struct NodeState {
    status: NodeStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Point-in-time view of one node
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub step: Step,
    pub dependencies: Vec<StepId>,
    pub dependents: Vec<StepId>,
    pub status: NodeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// DAG of pipeline steps.
///
/// Edges point from a dependency to its dependent, so incoming neighbors are
/// a node's dependencies and outgoing neighbors are its dependents. Both
/// directions come from the same edge set, which keeps them mutual inverses.
/// Node status lives behind a lock because node tasks of one level update it
/// concurrently.
pub struct DependencyGraph {
    graph: DiGraph<Step, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
    roots: Vec<NodeIndex>,
    state: RwLock<Vec<NodeState>>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("roots", &self.roots())
            .finish()
    }
}

impl DependencyGraph {
    /// Build a graph from a flat step list and a dependency map
    pub fn build(steps: &[Step], dependencies: &DependencyMap) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(steps.len(), steps.len());
        let mut step_indices = HashMap::with_capacity(steps.len());

        for step in steps {
            if step_indices.contains_key(&step.id) {
                tracing::warn!("Ignoring duplicate step definition: {}", step.id);
                continue;
            }
            let node = graph.add_node(step.clone());
            step_indices.insert(step.id.clone(), node);
        }

        for step_id in dependencies.keys() {
            if !step_indices.contains_key(step_id) {
                return Err(GraphError::UnknownStep(step_id.clone()));
            }
        }

        // Walk steps in list order so edge order, and therefore plan order,
        // does not depend on hash map iteration.
        for step in steps {
            let Some(deps) = dependencies.get(&step.id) else {
                continue;
            };
            let step_idx = step_indices[&step.id];

            for dep_id in deps {
                let dep_idx = step_indices.get(dep_id).ok_or_else(|| {
                    GraphError::DependencyNotFound {
                        step: step.id.clone(),
                        dependency: dep_id.clone(),
                    }
                })?;

                // Edge from dependency to dependent (dep -> step)
                graph.update_edge(*dep_idx, step_idx, ());
            }
        }

        let mut roots = Vec::new();
        let mut state = Vec::with_capacity(graph.node_count());
        for node in graph.node_indices() {
            let is_root = graph
                .neighbors_directed(node, Direction::Incoming)
                .next()
                .is_none();
            if is_root {
                roots.push(node);
            }
            state.push(NodeState {
                status: if is_root {
                    NodeStatus::Ready
                } else {
                    NodeStatus::Pending
                },
                result: None,
                error: None,
            });
        }

        let dag = Self {
            graph,
            step_indices,
            roots,
            state: RwLock::new(state),
        };

        dag.validate_acyclic()?;

        Ok(dag)
    }

    /// Depth-first search over dependent edges, tracking the recursion stack
    pub fn validate_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = vec![false; self.graph.node_count()];
        let mut on_stack = vec![false; self.graph.node_count()];

        for node in self.graph.node_indices() {
            if !visited[node.index()] && self.has_cycle_from(node, &mut visited, &mut on_stack) {
                return Err(GraphError::CycleDetected);
            }
        }

        Ok(())
    }

    fn has_cycle_from(&self, node: NodeIndex, visited: &mut [bool], on_stack: &mut [bool]) -> bool {
        visited[node.index()] = true;
        on_stack[node.index()] = true;

        for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if on_stack[dependent.index()] {
                return true;
            }
            if !visited[dependent.index()] && self.has_cycle_from(dependent, visited, on_stack) {
                return true;
            }
        }

        on_stack[node.index()] = false;
        false
    }

    /// Kahn's algorithm seeded from the roots (dependencies first)
    pub fn topological_order(&self) -> Result<Vec<StepId>, GraphError> {
        let mut remaining: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self.roots.iter().copied().collect();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(node) = queue.pop_front() {
            order.push(self.graph[node].id.clone());

            for dependent in self.neighbors(node, Direction::Outgoing) {
                let count = &mut remaining[dependent.index()];
                *count -= 1;
                if *count == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(GraphError::IncompleteSort {
                sorted: order.len(),
                total: self.graph.node_count(),
            });
        }

        Ok(order)
    }

    /// Group steps into levels by critical-path depth from a root
    pub fn build_execution_plan(&self) -> Result<ExecutionPlan, GraphError> {
        let order = self.topological_order()?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<StepId>> = Vec::new();

        for step_id in order {
            let node = self.index_of(&step_id)?;
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);

            depth.insert(node, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(step_id);
        }

        Ok(ExecutionPlan::new(levels))
    }

    /// Transition a node to `Running`
    pub fn mark_running(&self, step_id: &StepId) -> Result<(), GraphError> {
        let node = self.index_of(step_id)?;
        let mut state = self.state.write();
        state[node.index()].status = NodeStatus::Running;
        Ok(())
    }

    /// Record a result and promote dependents whose dependencies all completed
    pub fn mark_completed(
        &self,
        step_id: &StepId,
        result: serde_json::Value,
    ) -> Result<(), GraphError> {
        let node = self.index_of(step_id)?;
        let mut state = self.state.write();

        state[node.index()].status = NodeStatus::Completed;
        state[node.index()].result = Some(result);

        for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if state[dependent.index()].status != NodeStatus::Pending {
                continue;
            }
            let ready = self
                .graph
                .neighbors_directed(dependent, Direction::Incoming)
                .all(|dep| state[dep.index()].status == NodeStatus::Completed);
            if ready {
                state[dependent.index()].status = NodeStatus::Ready;
            }
        }

        Ok(())
    }

    /// Record a failure and skip every transitive dependent.
    ///
    /// Returns the steps that were newly skipped.
    pub fn mark_failed(
        &self,
        step_id: &StepId,
        error: impl Into<String>,
    ) -> Result<Vec<StepId>, GraphError> {
        let node = self.index_of(step_id)?;
        let mut state = self.state.write();

        state[node.index()].status = NodeStatus::Failed;
        state[node.index()].error = Some(error.into());

        let mut skipped = Vec::new();
        let mut stack: Vec<NodeIndex> = self.neighbors(node, Direction::Outgoing);

        while let Some(dependent) = stack.pop() {
            let entry = &mut state[dependent.index()];
            // Skipped nodes are not revisited; diamonds reach them twice.
            if entry.status.is_terminal() {
                continue;
            }
            entry.status = NodeStatus::Skipped;
            skipped.push(self.graph[dependent].id.clone());
            stack.extend(self.graph.neighbors_directed(dependent, Direction::Outgoing));
        }

        Ok(skipped)
    }

    /// Results of the completed dependencies of a step, keyed by step
    pub fn dependency_results(
        &self,
        step_id: &StepId,
    ) -> Result<HashMap<StepId, serde_json::Value>, GraphError> {
        let node = self.index_of(step_id)?;
        let state = self.state.read();

        Ok(self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .filter_map(|dep| {
                let entry = &state[dep.index()];
                match (&entry.status, &entry.result) {
                    (NodeStatus::Completed, Some(result)) => {
                        Some((self.graph[dep].id.clone(), result.clone()))
                    }
                    _ => None,
                }
            })
            .collect())
    }

    pub fn status(&self, step_id: &StepId) -> Option<NodeStatus> {
        let node = self.step_indices.get(step_id)?;
        Some(self.state.read()[node.index()].status)
    }

    pub fn result(&self, step_id: &StepId) -> Option<serde_json::Value> {
        let node = self.step_indices.get(step_id)?;
        self.state.read()[node.index()].result.clone()
    }

    pub fn error(&self, step_id: &StepId) -> Option<String> {
        let node = self.step_indices.get(step_id)?;
        self.state.read()[node.index()].error.clone()
    }

    /// Status of every node
    pub fn statuses(&self) -> HashMap<StepId, NodeStatus> {
        let state = self.state.read();
        self.graph
            .node_indices()
            .map(|n| (self.graph[n].id.clone(), state[n.index()].status))
            .collect()
    }

    /// Snapshot of a node with its relations and current state
    pub fn node(&self, step_id: &StepId) -> Option<GraphNode> {
        let node = *self.step_indices.get(step_id)?;
        let entry = self.state.read()[node.index()].clone();

        Some(GraphNode {
            step: self.graph[node].clone(),
            dependencies: self.ids(self.neighbors(node, Direction::Incoming)),
            dependents: self.ids(self.neighbors(node, Direction::Outgoing)),
            status: entry.status,
            result: entry.result,
            error: entry.error,
        })
    }

    pub fn step(&self, step_id: &StepId) -> Option<&Step> {
        self.step_indices.get(step_id).map(|n| &self.graph[*n])
    }

    /// Get dependencies for a step
    pub fn dependencies(&self, step_id: &StepId) -> Result<Vec<StepId>, GraphError> {
        let node = self.index_of(step_id)?;
        Ok(self.ids(self.neighbors(node, Direction::Incoming)))
    }

    /// Get steps that depend on the given step
    pub fn dependents(&self, step_id: &StepId) -> Result<Vec<StepId>, GraphError> {
        let node = self.index_of(step_id)?;
        Ok(self.ids(self.neighbors(node, Direction::Outgoing)))
    }

    /// Steps currently in the `Ready` state
    pub fn ready_nodes(&self) -> Vec<StepId> {
        let state = self.state.read();
        self.graph
            .node_indices()
            .filter(|n| state[n.index()].status == NodeStatus::Ready)
            .map(|n| self.graph[n].id.clone())
            .collect()
    }

    /// Steps with no dependencies, in step-list order
    pub fn roots(&self) -> Vec<StepId> {
        self.ids(self.roots.clone())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.step_indices.contains_key(step_id)
    }

    /// Number of nodes in a terminal state
    pub fn finished_count(&self) -> usize {
        self.state
            .read()
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .count()
    }

    fn index_of(&self, step_id: &StepId) -> Result<NodeIndex, GraphError> {
        self.step_indices
            .get(step_id)
            .copied()
            .ok_or_else(|| GraphError::StepNotFound(step_id.clone()))
    }

    /// Neighbors in edge insertion order (petgraph yields newest first)
    fn neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(node, direction).collect();
        neighbors.reverse();
        neighbors
    }

    fn ids(&self, nodes: Vec<NodeIndex>) -> Vec<StepId> {
        nodes.into_iter().map(|n| self.graph[n].id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PipelineId, ToolId};
    use std::collections::HashSet;

    /// Every step reachable from `start` through dependent edges
    fn downstream_of(
        dag: &DependencyGraph,
        start: &StepId,
    ) -> Result<HashSet<StepId>, GraphError> {
        let mut seen = HashSet::new();
        let mut stack = dag.dependents(start)?;

        while let Some(step_id) = stack.pop() {
            if seen.insert(step_id.clone()) {
                stack.extend(dag.dependents(&step_id)?);
            }
        }

        Ok(seen)
    }

    fn create_test_steps(ids: &[&str]) -> Vec<Step> {
        let pipeline_id = PipelineId::new();
        ids.iter()
            .map(|id| Step::new(*id, pipeline_id, ToolId::new("echo")))
            .collect()
    }

    fn deps(entries: &[(&str, &[&str])]) -> DependencyMap {
        entries
            .iter()
            .map(|(step, on)| {
                (
                    StepId::new(*step),
                    on.iter().map(|d| StepId::new(*d)).collect(),
                )
            })
            .collect()
    }

    fn ids(raw: &[&str]) -> Vec<StepId> {
        raw.iter().map(|id| StepId::new(*id)).collect()
    }

    fn diamond() -> DependencyGraph {
        let steps = create_test_steps(&["Start", "P1", "P2", "End"]);
        let dependencies = deps(&[
            ("P1", &["Start"]),
            ("P2", &["Start"]),
            ("End", &["P1", "P2"]),
        ]);
        DependencyGraph::build(&steps, &dependencies).unwrap()
    }

    /// Deterministic pseudo-random DAG: edges only go from lower to higher index
    fn layered_graph(size: usize, seed: u64) -> (Vec<Step>, DependencyMap) {
        let names: Vec<String> = (0..size).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let steps = create_test_steps(&refs);

        let mut state = seed;
        let mut dependencies = DependencyMap::new();
        for i in 1..size {
            for j in 0..i {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                if (state >> 33) % 4 == 0 {
                    dependencies
                        .entry(StepId::new(names[i].clone()))
                        .or_default()
                        .push(StepId::new(names[j].clone()));
                }
            }
        }
        (steps, dependencies)
    }

    #[test]
    fn test_linear_plan() {
        let steps = create_test_steps(&["1", "2", "3"]);
        let dependencies = deps(&[("2", &["1"]), ("3", &["2"])]);

        let dag = DependencyGraph::build(&steps, &dependencies).unwrap();
        let plan = dag.build_execution_plan().unwrap();

        assert_eq!(plan.levels(), &[ids(&["1"]), ids(&["2"]), ids(&["3"])]);
        assert_eq!(dag.topological_order().unwrap(), ids(&["1", "2", "3"]));
    }

    #[test]
    fn test_diamond_plan() {
        let dag = diamond();
        let plan = dag.build_execution_plan().unwrap();

        assert_eq!(
            plan.levels(),
            &[ids(&["Start"]), ids(&["P1", "P2"]), ids(&["End"])]
        );
        assert_eq!(dag.roots(), ids(&["Start"]));
        assert_eq!(dag.status(&StepId::new("Start")), Some(NodeStatus::Ready));
        assert_eq!(dag.status(&StepId::new("End")), Some(NodeStatus::Pending));
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let steps = create_test_steps(&["1", "2"]);
        let dependencies = deps(&[("1", &["2"]), ("2", &["1"])]);

        let result = DependencyGraph::build(&steps, &dependencies);
        assert!(matches!(result, Err(GraphError::CycleDetected)));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let steps = create_test_steps(&["a", "b"]);
        let dependencies = deps(&[("b", &["a"]), ("a", &["a"])]);

        let result = DependencyGraph::build(&steps, &dependencies);
        assert!(matches!(result, Err(GraphError::CycleDetected)));
    }

    #[test]
    fn test_longer_cycle_rejected() {
        let steps = create_test_steps(&["root", "a", "b", "c"]);
        let dependencies = deps(&[("a", &["root", "c"]), ("b", &["a"]), ("c", &["b"])]);

        let result = DependencyGraph::build(&steps, &dependencies);
        assert!(matches!(result, Err(GraphError::CycleDetected)));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let steps = create_test_steps(&["1", "2"]);
        let dependencies = deps(&[("2", &["999"])]);

        let err = DependencyGraph::build(&steps, &dependencies).unwrap_err();
        assert_eq!(
            err,
            GraphError::DependencyNotFound {
                step: StepId::new("2"),
                dependency: StepId::new("999"),
            }
        );
    }

    #[test]
    fn test_unknown_step_key_rejected() {
        let steps = create_test_steps(&["1"]);
        let dependencies = deps(&[("ghost", &["1"])]);

        let err = DependencyGraph::build(&steps, &dependencies).unwrap_err();
        assert_eq!(err, GraphError::UnknownStep(StepId::new("ghost")));
    }

    #[test]
    fn test_empty_graph() {
        let dag = DependencyGraph::build(&[], &DependencyMap::new()).unwrap();

        assert!(dag.is_empty());
        assert!(dag.topological_order().unwrap().is_empty());
        assert!(dag.build_execution_plan().unwrap().is_empty());
    }

    #[test]
    fn test_relations_are_mutual_inverses() {
        let dag = diamond();

        for id in ["Start", "P1", "P2", "End"] {
            let id = StepId::new(id);
            for dep in dag.dependencies(&id).unwrap() {
                assert!(dag.dependents(&dep).unwrap().contains(&id));
            }
            for dependent in dag.dependents(&id).unwrap() {
                assert!(dag.dependencies(&dependent).unwrap().contains(&id));
            }
        }

        let end = dag.node(&StepId::new("End")).unwrap();
        assert_eq!(end.dependencies, ids(&["P1", "P2"]));
        assert!(end.dependents.is_empty());
    }

    #[test]
    fn test_duplicate_dependency_edges_collapse() {
        let steps = create_test_steps(&["a", "b"]);
        let dependencies = deps(&[("b", &["a", "a"])]);

        let dag = DependencyGraph::build(&steps, &dependencies).unwrap();
        assert_eq!(dag.dependencies(&StepId::new("b")).unwrap(), ids(&["a"]));
        assert_eq!(dag.topological_order().unwrap().len(), 2);
    }

    #[test]
    fn test_topological_order_is_complete() {
        for seed in 0..20 {
            let (steps, dependencies) = layered_graph(15, seed);
            let dag = DependencyGraph::build(&steps, &dependencies).unwrap();
            let order = dag.topological_order().unwrap();

            assert_eq!(order.len(), steps.len());
            let position: HashMap<&StepId, usize> =
                order.iter().enumerate().map(|(i, id)| (id, i)).collect();
            assert_eq!(position.len(), steps.len());

            for (step, on) in &dependencies {
                for dep in on {
                    assert!(position[dep] < position[step]);
                }
            }
        }
    }

    #[test]
    fn test_levels_exceed_dependency_levels() {
        for seed in 0..20 {
            let (steps, dependencies) = layered_graph(15, seed);
            let dag = DependencyGraph::build(&steps, &dependencies).unwrap();
            let plan = dag.build_execution_plan().unwrap();

            assert_eq!(plan.total_steps(), steps.len());

            for step in &steps {
                let level = plan.level_of(&step.id).unwrap();
                let step_deps = dag.dependencies(&step.id).unwrap();
                if step_deps.is_empty() {
                    assert_eq!(level, 0);
                } else {
                    for dep in step_deps {
                        assert!(plan.level_of(&dep).unwrap() < level);
                    }
                    // Critical-path depth: some dependency sits right below
                    let max_dep = dag
                        .dependencies(&step.id)
                        .unwrap()
                        .iter()
                        .map(|d| plan.level_of(d).unwrap())
                        .max()
                        .unwrap();
                    assert_eq!(level, max_dep + 1);
                }
            }
        }
    }

    #[test]
    fn test_mark_completed_promotes_ready_dependents() {
        let dag = diamond();

        dag.mark_completed(&StepId::new("Start"), serde_json::json!(1))
            .unwrap();
        assert_eq!(dag.status(&StepId::new("P1")), Some(NodeStatus::Ready));
        assert_eq!(dag.status(&StepId::new("P2")), Some(NodeStatus::Ready));

        dag.mark_completed(&StepId::new("P1"), serde_json::json!(2))
            .unwrap();
        // End still waits on P2
        assert_eq!(dag.status(&StepId::new("End")), Some(NodeStatus::Pending));

        dag.mark_completed(&StepId::new("P2"), serde_json::json!(3))
            .unwrap();
        assert_eq!(dag.status(&StepId::new("End")), Some(NodeStatus::Ready));
        assert_eq!(dag.ready_nodes(), ids(&["End"]));

        let inputs = dag.dependency_results(&StepId::new("End")).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[&StepId::new("P2")], serde_json::json!(3));
    }

    #[test]
    fn test_mark_failed_skips_diamond_downstream_once() {
        let dag = diamond();

        let skipped = dag.mark_failed(&StepId::new("Start"), "boom").unwrap();

        assert_eq!(skipped.len(), 3);
        for id in ["P1", "P2", "End"] {
            assert_eq!(dag.status(&StepId::new(id)), Some(NodeStatus::Skipped));
        }
        assert_eq!(dag.status(&StepId::new("Start")), Some(NodeStatus::Failed));
        assert_eq!(dag.error(&StepId::new("Start")).as_deref(), Some("boom"));
    }

    #[test]
    fn test_failure_cascade_reaches_exactly_downstream() {
        for seed in 0..20 {
            let (steps, dependencies) = layered_graph(12, seed);
            let dag = DependencyGraph::build(&steps, &dependencies).unwrap();
            let failed = StepId::new("s3");

            let expected = downstream_of(&dag, &failed).unwrap();
            dag.mark_failed(&failed, "failed").unwrap();

            for (id, status) in dag.statuses() {
                if id == failed {
                    assert_eq!(status, NodeStatus::Failed);
                } else if expected.contains(&id) {
                    assert_eq!(status, NodeStatus::Skipped, "{id} should be skipped");
                } else {
                    assert_ne!(status, NodeStatus::Skipped, "{id} should not be skipped");
                }
            }
        }
    }

    #[test]
    fn test_unknown_step_lookups() {
        let dag = diamond();
        let ghost = StepId::new("ghost");

        assert!(dag.status(&ghost).is_none());
        assert!(matches!(
            dag.mark_completed(&ghost, serde_json::Value::Null),
            Err(GraphError::StepNotFound(_))
        ));
    }
}
