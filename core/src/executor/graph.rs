use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::ExecutorError;
use crate::executor::types::TaskLike;

/// Task dependency graph (DAG)
///
/// Ids listed as external belong to an earlier run: dependencies on them are
/// already resolved edges and never become nodes.
#[derive(Debug, Clone)]
pub struct TaskGraph<T: TaskLike> {
    /// Task nodes: task_id -> Task
    pub nodes: HashMap<String, T>,

    /// Dependency edges: task_id -> list of dependencies
    pub edges: HashMap<String, Vec<String>>,

    /// Reverse edges: task_id -> list of tasks that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,

    external: HashSet<String>,

    /// Original insertion order (for stable sorting)
    insertion_order: Vec<String>,
    position: HashMap<String, usize>,
}

impl<T: TaskLike> TaskGraph<T> {
    /// Construct task graph from task list
    pub fn from_tasks(tasks: &[T]) -> Result<Self, ExecutorError> {
        Self::from_tasks_with_external(tasks, std::iter::empty::<String>())
    }

    pub fn from_tasks_with_external<I, S>(tasks: &[T], external: I) -> Result<Self, ExecutorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let external: HashSet<String> = external.into_iter().map(Into::into).collect();
        let mut nodes = HashMap::new();
        let mut edges = HashMap::new();
        let mut insertion_order = Vec::with_capacity(tasks.len());
        let mut position = HashMap::new();

        for task in tasks {
            let task_id = task.id().to_string();
            if nodes.contains_key(&task_id) || external.contains(&task_id) {
                return Err(ExecutorError::DuplicateTaskId(task_id));
            }

            position.insert(task_id.clone(), insertion_order.len());
            insertion_order.push(task_id.clone());
            edges.insert(task_id.clone(), task.dependencies().to_vec());
            nodes.insert(task_id, task.clone());
        }

        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();
        for task_id in &insertion_order {
            for dep in &edges[task_id] {
                if nodes.contains_key(dep) {
                    reverse_edges
                        .entry(dep.clone())
                        .or_default()
                        .push(task_id.clone());
                }
            }
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
            external,
            insertion_order,
            position,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn task(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn is_external(&self, id: &str) -> bool {
        self.external.contains(id)
    }

    /// Task ids in batch order.
    pub fn task_ids(&self) -> &[String] {
        &self.insertion_order
    }

    /// Validate dependency relationships: every dependency resolves and no cycle exists.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        for task_id in &self.insertion_order {
            for dep in &self.edges[task_id] {
                if !self.nodes.contains_key(dep) && !self.external.contains(dep) {
                    return Err(ExecutorError::DependencyNotFound {
                        task_id: task_id.clone(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        self.waves().map(|_| ())
    }

    /// Groups tasks into waves with Kahn's algorithm.
    ///
    /// A task lands in the first wave after all of its in-run dependencies.
    /// Within a wave tasks keep batch order, so the result is a pure function
    /// of the graph. O(V + E).
    pub fn waves(&self) -> Result<Vec<Vec<String>>, ExecutorError> {
        let mut in_degree: HashMap<&str, usize> = self
            .insertion_order
            .iter()
            .map(|id| {
                let internal = self.edges[id]
                    .iter()
                    .filter(|dep| self.nodes.contains_key(*dep))
                    .count();
                (id.as_str(), internal)
            })
            .collect();

        let mut waves: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = self
            .insertion_order
            .iter()
            .filter(|id| in_degree[id.as_str()] == 0)
            .cloned()
            .collect();
        let mut processed = 0;

        while !current.is_empty() {
            processed += current.len();

            let mut next = Vec::new();
            for task_id in &current {
                if let Some(dependents) = self.reverse_edges.get(task_id) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                            *degree -= 1;
                            if *degree == 0 {
                                next.push(dependent.clone());
                            }
                        }
                    }
                }
            }
            next.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));

            waves.push(std::mem::replace(&mut current, next));
        }

        if processed != self.nodes.len() {
            let remaining: Vec<&String> = self
                .insertion_order
                .iter()
                .filter(|id| in_degree[id.as_str()] > 0)
                .collect();
            let cycle = self
                .minimal_cycle(&remaining)
                .unwrap_or_else(|| remaining.iter().map(|s| s.to_string()).collect());
            return Err(ExecutorError::CircularDependency(cycle));
        }

        Ok(waves)
    }

    /// Shortest cycle through the unresolved nodes; ties go to the node that
    /// comes first in the batch.
    fn minimal_cycle(&self, remaining: &[&String]) -> Option<Vec<String>> {
        let mut best: Option<Vec<String>> = None;
        for start in remaining {
            if let Some(cycle) = self.shortest_cycle_from(start) {
                if best.as_ref().map_or(true, |b| cycle.len() < b.len()) {
                    best = Some(cycle);
                }
            }
        }
        best
    }

    /// BFS along dependency edges from `start` back to itself.
    fn shortest_cycle_from(&self, start: &str) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            for dep in self.edges.get(node).into_iter().flatten() {
                if dep == start {
                    let mut path = vec![node.to_string()];
                    let mut cursor = node;
                    while cursor != start {
                        cursor = *parent.get(cursor)?;
                        path.push(cursor.to_string());
                    }
                    path.reverse();
                    return Some(path);
                }
                if self.nodes.contains_key(dep) && !parent.contains_key(dep.as_str()) {
                    parent.insert(dep.as_str(), node);
                    queue.push_back(dep.as_str());
                }
            }
        }
        None
    }
}
