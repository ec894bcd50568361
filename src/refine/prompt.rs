//! Refinement prompt rendering.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{context, Environment};

use crate::core::goal::Goal;
use crate::core::state::WorldState;

const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("refine", REFINE_TEMPLATE)
        .expect("refinement template should be valid");
    env
});

/// Render the decomposition prompt for `goal` against `current`.
pub fn render_refinement(goal: &Goal, current: &WorldState) -> Result<String> {
    let template = ENV.get_template("refine")?;
    let rendered = template.render(context! {
        state => current.stringify(),
        goal_name => goal.name(),
        goal_description => goal.description(),
        desired_state => goal.desired().stringify(),
    })?;
    Ok(rendered)
}
