//! Pipeline graph - validated, immutable DAG of steps

use crate::core::{
    error::DefinitionError,
    parameter::ParameterRegistry,
    run::Run,
    state::StepState,
    step::{Step, StepKind},
};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// A pipeline definition after validation.
///
/// Shared read-only between every run created from it.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    parameters: ParameterRegistry,

    /// Steps in declaration order
    steps: Vec<Step>,

    /// Step name -> position in `steps`
    index: HashMap<String, usize>,

    /// Step name -> steps it waits on
    dependencies: HashMap<String, BTreeSet<String>>,

    /// Step name -> steps waiting on it
    dependents: HashMap<String, BTreeSet<String>>,

    /// Branch member -> conditional step gating it
    branch_owner: HashMap<String, String>,

    /// Topological order, ties broken by declaration order
    order: Vec<String>,
}

impl PipelineGraph {
    /// Validate steps and derive the dependency relation
    pub fn construct(
        name: impl Into<String>,
        parameters: ParameterRegistry,
        steps: Vec<Step>,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();

        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStep(step.name.clone()));
            }
        }

        let branch_owner = Self::collect_branches(&steps, &index)?;

        for step in &steps {
            Self::validate_step(step, &steps, &index, &parameters)?;
        }

        let mut dependencies: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();
        for step in &steps {
            let mut deps: BTreeSet<String> = step
                .referenced_steps()
                .into_iter()
                .map(str::to_string)
                .collect();
            if let Some(owner) = branch_owner.get(&step.name) {
                deps.insert(owner.clone());
            }
            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(step.name.clone());
            }
            dependencies.insert(step.name.clone(), deps);
        }

        let order = Self::topological_sort(&steps, &index, &dependencies)?;

        Ok(PipelineGraph {
            name,
            parameters,
            steps,
            index,
            dependencies,
            dependents,
            branch_owner,
            order,
        })
    }

    fn collect_branches(
        steps: &[Step],
        index: &HashMap<String, usize>,
    ) -> Result<HashMap<String, String>, DefinitionError> {
        let mut owners: HashMap<String, String> = HashMap::new();

        for step in steps {
            let StepKind::Conditional(conditional) = &step.kind else {
                continue;
            };
            for member in conditional.members() {
                if *member == step.name {
                    return Err(DefinitionError::InvalidStep {
                        step: step.name.clone(),
                        reason: "a conditional step cannot gate itself".to_string(),
                    });
                }
                if !index.contains_key(member) {
                    return Err(DefinitionError::UnknownReference {
                        step: step.name.clone(),
                        target: member.clone(),
                    });
                }
                if let Some(first) = owners.get(member) {
                    return Err(DefinitionError::BranchConflict {
                        step: member.clone(),
                        first: first.clone(),
                        second: step.name.clone(),
                    });
                }
                owners.insert(member.clone(), step.name.clone());
            }
        }

        Ok(owners)
    }

    fn validate_step(
        step: &Step,
        steps: &[Step],
        index: &HashMap<String, usize>,
        parameters: &ParameterRegistry,
    ) -> Result<(), DefinitionError> {
        for parameter in step.parameters_used() {
            if !parameters.contains(parameter) {
                return Err(DefinitionError::UnknownParameter {
                    step: step.name.clone(),
                    parameter: parameter.to_string(),
                });
            }
        }

        for target in &step.depends_on {
            if !index.contains_key(target) {
                return Err(DefinitionError::UnknownReference {
                    step: step.name.clone(),
                    target: target.clone(),
                });
            }
        }

        for reference in step.references() {
            let producer = index
                .get(&reference.step)
                .map(|&i| &steps[i])
                .ok_or_else(|| DefinitionError::UnknownReference {
                    step: step.name.clone(),
                    target: reference.step.clone(),
                })?;

            if let Some(file) = &reference.property_file {
                if producer.property_file(file).is_none() {
                    return Err(DefinitionError::UnknownPropertyFile {
                        step: step.name.clone(),
                        target: reference.step.clone(),
                        property_file: file.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Kahn's algorithm; ready steps are taken in declaration order
    fn topological_sort(
        steps: &[Step],
        index: &HashMap<String, usize>,
        dependencies: &HashMap<String, BTreeSet<String>>,
    ) -> Result<Vec<String>, DefinitionError> {
        let mut in_degree: Vec<usize> = steps
            .iter()
            .map(|s| dependencies.get(&s.name).map_or(0, BTreeSet::len))
            .collect();

        let mut waiting: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for step in steps {
            for dep in dependencies.get(&step.name).into_iter().flatten() {
                waiting[index[dep]].push(index[&step.name]);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(steps.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(steps[i].name.clone());
            for &next in &waiting[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < steps.len() {
            let sorted: HashSet<&str> = order.iter().map(String::as_str).collect();
            return Err(DefinitionError::Cycle {
                steps: Self::find_cycle(steps, dependencies, &sorted),
            });
        }

        Ok(order)
    }

    /// Walk unsorted dependencies until a step repeats.
    ///
    /// Every step left over by Kahn's algorithm still waits on another
    /// leftover step, so the walk always closes a loop.
    fn find_cycle(
        steps: &[Step],
        dependencies: &HashMap<String, BTreeSet<String>>,
        sorted: &HashSet<&str>,
    ) -> Vec<String> {
        let Some(start) = steps.iter().find(|s| !sorted.contains(s.name.as_str())) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut current = start.name.as_str();

        loop {
            if let Some(&pos) = seen.get(current) {
                // Path follows "depends on" edges; report in execution order
                let mut cycle: Vec<String> = path[pos..].iter().rev().map(|s| s.to_string()).collect();
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return cycle;
            }
            seen.insert(current, path.len());
            path.push(current);

            match dependencies
                .get(current)
                .and_then(|deps| deps.iter().find(|d| !sorted.contains(d.as_str())))
            {
                Some(next) => current = next.as_str(),
                None => return path.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Direct dependencies of a step
    pub fn dependencies(&self, step: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(step)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Steps that directly depend on `step`
    pub fn dependents(&self, step: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(step)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every step `step` transitively depends on
    pub fn ancestors(&self, step: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependencies(step).collect();
        while let Some(current) = stack.pop() {
            if found.insert(current.to_string()) {
                stack.extend(self.dependencies(current));
            }
        }
        found
    }

    /// Every step transitively depending on `step`
    pub fn descendants(&self, step: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(step).collect();
        while let Some(current) = stack.pop() {
            if found.insert(current.to_string()) {
                stack.extend(self.dependents(current));
            }
        }
        found
    }

    /// Conditional step whose branch contains `step`
    pub fn branch_owner(&self, step: &str) -> Option<&str> {
        self.branch_owner.get(step).map(String::as_str)
    }

    /// Fresh run with every step pending and parameters at their defaults
    pub fn new_run(&self) -> Run {
        Run::new(&self.name, &self.parameters, self.order.iter())
    }

    /// Batches of steps that can run in parallel, given the run's current state.
    ///
    /// Batch 0 holds every pending step whose dependencies have all
    /// succeeded. Later batches assume that earlier batches and currently
    /// running steps succeed. Steps downstream of a failed, skipped or
    /// cancelled step never appear.
    pub fn to_execution_plan(&self, run: &Run) -> Vec<Vec<String>> {
        let mut blocked: HashSet<String> = HashSet::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut running: Vec<&str> = Vec::new();

        for name in &self.order {
            match run.state(name) {
                Some(StepState::Succeeded { .. }) => {
                    done.insert(name.as_str());
                }
                Some(StepState::Running { .. }) => running.push(name.as_str()),
                Some(StepState::Pending) => {}
                _ => {
                    blocked.insert(name.clone());
                    blocked.extend(self.descendants(name));
                }
            }
        }

        let mut remaining: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| matches!(run.state(name), Some(StepState::Pending)))
            .filter(|name| !blocked.contains(*name))
            .collect();

        let mut plan: Vec<Vec<String>> = Vec::new();
        while !remaining.is_empty() {
            let (batch, rest): (Vec<&str>, Vec<&str>) = remaining
                .into_iter()
                .partition(|name| self.dependencies(name).all(|dep| done.contains(dep)));

            if plan.is_empty() {
                // Nothing is runnable yet, but in-flight steps unblock the rest
                if batch.is_empty() && running.is_empty() {
                    break;
                }
                done.extend(running.iter().copied());
            } else if batch.is_empty() {
                break;
            }

            done.extend(batch.iter().copied());
            plan.push(batch.into_iter().map(str::to_string).collect());
            remaining = rest;
        }

        plan
    }

    /// Steps runnable right now
    pub fn next_batch(&self, run: &Run) -> Vec<String> {
        self.to_execution_plan(run)
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}
