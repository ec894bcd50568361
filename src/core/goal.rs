//! Goals: named desired world-state fragments with priorities.

use std::fmt;

use crate::core::state::WorldState;

/// A desired state the agent wants to reach.
#[derive(Debug, Clone)]
pub struct Goal {
    name: String,
    description: String,
    desired: WorldState,
    priority: f64,
}

impl Goal {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        desired: WorldState,
        priority: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            desired,
            priority,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn desired(&self) -> &WorldState {
        &self.desired
    }

    /// Higher is preferred when selecting among competing goals.
    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn is_satisfied(&self, current: &WorldState) -> bool {
        current.matches(&self.desired)
    }

    /// Count of desired keys not yet satisfied by `current`.
    pub fn distance(&self, current: &WorldState) -> usize {
        current.distance(&self.desired)
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Goal[{}: {}, desired={}, priority={:.2}]",
            self.name, self.description, self.desired, self.priority
        )
    }
}

/// An ordered collection of goals the agent might pursue.
///
/// Ties in priority or distance resolve by insertion order.
#[derive(Debug, Clone, Default)]
pub struct GoalSet {
    goals: Vec<Goal>,
}

impl GoalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, goal: Goal) {
        self.goals.push(goal);
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn highest_priority(&self) -> Option<&Goal> {
        let mut best: Option<&Goal> = None;
        for goal in &self.goals {
            match best {
                Some(current) if goal.priority <= current.priority => {}
                _ => best = Some(goal),
            }
        }
        best
    }

    /// The goal closest to being satisfied from `current`.
    pub fn most_achievable(&self, current: &WorldState) -> Option<&Goal> {
        let mut best: Option<(&Goal, usize)> = None;
        for goal in &self.goals {
            let distance = goal.distance(current);
            match best {
                Some((_, min)) if distance >= min => {}
                _ => best = Some((goal, distance)),
            }
        }
        best.map(|(goal, _)| goal)
    }

    pub fn satisfied(&self, current: &WorldState) -> Vec<&Goal> {
        self.goals
            .iter()
            .filter(|goal| goal.is_satisfied(current))
            .collect()
    }

    pub fn unsatisfied(&self, current: &WorldState) -> Vec<&Goal> {
        self.goals
            .iter()
            .filter(|goal| !goal.is_satisfied(current))
            .collect()
    }
}
