//! C4: the task DAG and its priority-aware topological sort.
//!
//! Arena-indexed (`Vec<Task>` plus `u32` index edges) rather than the
//! original's parent-weak/child-strong pointer graph, per spec.md's Design
//! Notes — this sidesteps Rust's aversion to cyclic ownership and makes
//! cycle detection a simple count comparison instead of a pointer walk.

use anyhow::{bail, Context, Result};
use recodex_worker_base::{JobMetadata, Task, TaskIndex, TaskMetadata};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

pub struct Dag {
    pub tasks: Vec<Task>,
}

impl Dag {
    /// Builds the arena from a job's task list, resolving `dependencies`
    /// (YAML `task_id` strings) into parent/child index edges. Errors if a
    /// dependency names a task that isn't in this job (invariant i).
    pub fn build(meta: &JobMetadata) -> Result<Self> {
        let mut index_of: HashMap<&str, TaskIndex> = HashMap::new();
        for (i, t) in meta.tasks.iter().enumerate() {
            index_of.insert(t.task_id.as_str(), i as TaskIndex);
        }

        let mut tasks: Vec<Task> = meta
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| Task {
                index: i as TaskIndex,
                meta: t.clone(),
                parents: Vec::new(),
                children: Vec::new(),
                executable: true,
            })
            .collect();

        for (i, t) in meta.tasks.iter().enumerate() {
            for dep in &t.dependencies {
                let parent_idx = *index_of
                    .get(dep.as_str())
                    .with_context(|| format!("task {:?} depends on unknown task {dep:?}", t.task_id))?;
                tasks[i].parents.push(parent_idx);
                tasks[parent_idx as usize].children.push(i as TaskIndex);
            }
        }

        Ok(Self { tasks })
    }

    pub fn meta(&self, index: TaskIndex) -> &TaskMetadata {
        &self.tasks[index as usize].meta
    }
}

/// Kahn's algorithm with a priority-queue frontier ordered by descending
/// `priority`, ties broken by ascending `id` (spec.md property 2; `id`
/// here is the arena index, which tracks YAML declaration order).
///
/// Returns every reachable task exactly once (spec.md property 1); when
/// the visited count falls short of the task count, the remainder forms at
/// least one cycle.
pub fn topological_sort(dag: &Dag) -> Result<Vec<TaskIndex>> {
    let n = dag.tasks.len();
    let mut indegree: Vec<usize> = dag.tasks.iter().map(|t| t.parents.len()).collect();

    let mut frontier: BinaryHeap<(i64, Reverse<TaskIndex>)> = BinaryHeap::new();
    for task in &dag.tasks {
        if indegree[task.index as usize] == 0 {
            frontier.push((task.meta.priority, Reverse(task.index)));
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some((_, Reverse(index))) = frontier.pop() {
        order.push(index);
        for &child in &dag.tasks[index as usize].children {
            indegree[child as usize] -= 1;
            if indegree[child as usize] == 0 {
                frontier.push((dag.tasks[child as usize].meta.priority, Reverse(child)));
            }
        }
    }

    if order.len() != n {
        bail!("Cycle in tasks dependencies detected");
    }
    Ok(order)
}

/// Marks every task reachable from `from` (exclusive) as non-executable,
/// the skip-propagation step of the job runtime (spec.md property 3).
pub fn mark_descendants_non_executable(dag: &mut Dag, from: TaskIndex) {
    let mut stack: Vec<TaskIndex> = dag.tasks[from as usize].children.clone();
    while let Some(index) = stack.pop() {
        let task = &mut dag.tasks[index as usize];
        if !task.executable {
            continue;
        }
        task.executable = false;
        stack.extend(task.children.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recodex_worker_base::TaskType;

    fn task(id: &str, priority: i64, deps: &[&str]) -> TaskMetadata {
        TaskMetadata {
            task_id: id.to_string(),
            priority,
            fatal_failure: false,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            test_id: None,
            task_type: TaskType::Execution,
            binary: "true".to_string(),
            cmd_args: vec![],
            sandbox: None,
        }
    }

    fn job(tasks: Vec<TaskMetadata>) -> JobMetadata {
        JobMetadata {
            job_id: "job".to_string(),
            file_server_url: "http://fileserver.example".to_string(),
            log: false,
            hw_groups: vec!["default".to_string()],
            tasks,
        }
    }

    #[test]
    fn linear_chain_preserves_edge_order() {
        let meta = job(vec![task("a", 0, &[]), task("b", 0, &["a"]), task("c", 0, &["b"])]);
        let dag = Dag::build(&meta).unwrap();
        let order = topological_sort(&dag).unwrap();
        let ids: Vec<&str> = order
            .iter()
            .map(|&i| dag.meta(i).task_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn priority_breaks_ties_among_ready_tasks() {
        let meta = job(vec![task("low", 1, &[]), task("high", 9, &[]), task("mid", 5, &[])]);
        let dag = Dag::build(&meta).unwrap();
        let order = topological_sort(&dag).unwrap();
        let ids: Vec<&str> = order
            .iter()
            .map(|&i| dag.meta(i).task_id.as_str())
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_breaks_tie_by_ascending_id() {
        let meta = job(vec![task("a", 5, &[]), task("b", 5, &[])]);
        let dag = Dag::build(&meta).unwrap();
        let order = topological_sort(&dag).unwrap();
        let ids: Vec<&str> = order
            .iter()
            .map(|&i| dag.meta(i).task_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let meta = job(vec![task("a", 0, &["b"]), task("b", 0, &["a"])]);
        let dag = Dag::build(&meta).unwrap();
        let err = topological_sort(&dag).unwrap_err();
        assert!(err.to_string().contains("Cycle in tasks dependencies detected"));
    }

    #[test]
    fn unknown_dependency_is_rejected_at_build_time() {
        let meta = job(vec![task("a", 0, &["missing"])]);
        assert!(Dag::build(&meta).is_err());
    }

    #[test]
    fn skip_propagation_marks_only_descendants() {
        let meta = job(vec![
            task("a", 9, &[]),
            task("b", 5, &["a"]),
            task("c", 1, &["b"]),
        ]);
        let mut dag = Dag::build(&meta).unwrap();
        mark_descendants_non_executable(&mut dag, 1);
        assert!(dag.tasks[0].executable);
        assert!(dag.tasks[1].executable);
        assert!(!dag.tasks[2].executable);
    }
}
