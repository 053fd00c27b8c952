//! A point mass on a plane that must reach a goal while avoiding a hazard disc.

use anyhow::{bail, ensure, Result};
use fsrl_core::{
    environment::EnvironmentRegistry, seeded_rng, ConfigMap, Configurable, Environment,
    RenderMode, Seedable, Transition, DEFAULT_SEED,
};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

pub const ENV_ID: &str = "PointGoal-v0";
pub const MODULE: &str = "point_goal";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointGoalSettings {
    pub goal: [f64; 2],
    pub goal_radius: f64,
    pub hazard: [f64; 2],
    pub hazard_radius: f64,
    pub max_speed: f64,
    pub max_steps: usize,
}

impl Default for PointGoalSettings {
    fn default() -> Self {
        Self {
            goal: [1.0, 1.0],
            goal_radius: 0.3,
            hazard: [0.5, 0.5],
            hazard_radius: 0.2,
            max_speed: 0.1,
            max_steps: 200,
        }
    }
}

pub struct PointGoal {
    settings: PointGoalSettings,
    rng: StdRng,
    position: [f64; 2],
    steps: usize,
}

impl PointGoal {
    pub fn new() -> Self {
        Self {
            settings: PointGoalSettings::default(),
            rng: seeded_rng(DEFAULT_SEED),
            position: [0.0, 0.0],
            steps: 0,
        }
    }

    fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    fn observation(&self) -> Vec<f64> {
        let [gx, gy] = self.settings.goal;
        let [hx, hy] = self.settings.hazard;
        let [x, y] = self.position;
        vec![x, y, gx - x, gy - y, hx - x, hy - y]
    }
}

impl Environment for PointGoal {
    fn id(&self) -> &str {
        ENV_ID
    }

    fn action_dim(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Result<Vec<f64>> {
        self.position = [self.rng.gen_range(-0.1..0.1), self.rng.gen_range(-0.1..0.1)];
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &[f64]) -> Result<Transition> {
        ensure!(
            action.len() == 2,
            "{ENV_ID} expects a 2-dimensional action, got {}",
            action.len()
        );
        let before = Self::distance(self.position, self.settings.goal);
        let limit = self.settings.max_speed;
        for (coord, delta) in self.position.iter_mut().zip(action) {
            *coord += delta.clamp(-limit, limit);
        }
        self.steps += 1;

        let after = Self::distance(self.position, self.settings.goal);
        let in_hazard =
            Self::distance(self.position, self.settings.hazard) < self.settings.hazard_radius;
        let reached = after < self.settings.goal_radius;

        Ok(Transition {
            observation: self.observation(),
            reward: before - after + if reached { 1.0 } else { 0.0 },
            cost: if in_hazard { 1.0 } else { 0.0 },
            terminated: reached,
            truncated: self.steps >= self.settings.max_steps,
        })
    }

    fn configurable(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }

    fn seedable(&mut self) -> Option<&mut dyn Seedable> {
        Some(self)
    }
}

impl Configurable for PointGoal {
    fn configure(&mut self, config: &ConfigMap) -> Result<()> {
        let settings: PointGoalSettings =
            serde_json::from_value(serde_json::Value::Object(config.clone()))?;
        if settings.goal_radius <= 0.0 || settings.max_speed <= 0.0 || settings.max_steps == 0 {
            bail!("goal_radius, max_speed and max_steps must be positive");
        }
        self.settings = settings;
        Ok(())
    }
}

impl Seedable for PointGoal {
    fn reseed(&mut self, seed: u64) -> Result<()> {
        self.rng = seeded_rng(seed);
        Ok(())
    }
}

fn make(render_mode: Option<RenderMode>) -> Result<Box<dyn Environment>> {
    if let Some(mode) = render_mode {
        if mode != RenderMode::Ansi {
            bail!("{ENV_ID} only renders as ansi, got {mode:?}");
        }
    }
    Ok(Box::new(PointGoal::new()))
}

/// Registration hook run when a configuration imports [`MODULE`].
pub fn register(registry: &mut EnvironmentRegistry) {
    registry.register(ENV_ID, make);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn moves_toward_goal_and_terminates() {
        let mut env = PointGoal::new();
        env.configure(json!({"goal": [0.0, 0.3], "hazard": [5.0, 5.0]}).as_object().unwrap())
            .unwrap();
        env.reset().unwrap();

        let mut last = Transition::default();
        for _ in 0..10 {
            last = env.step(&[0.0, 0.1]).unwrap();
            if last.done() {
                break;
            }
        }
        assert!(last.terminated);
        assert!(last.reward > 0.0);
        assert_eq!(last.cost, 0.0);
    }

    #[test]
    fn hazard_produces_cost() {
        let mut env = PointGoal::new();
        env.configure(json!({"hazard": [0.0, 0.0], "hazard_radius": 1.0}).as_object().unwrap())
            .unwrap();
        env.reset().unwrap();
        assert_eq!(env.step(&[0.0, 0.0]).unwrap().cost, 1.0);
    }

    #[test]
    fn rejects_unknown_settings() {
        let mut env = PointGoal::new();
        assert!(env.configure(json!({"gravity": 9.8}).as_object().unwrap()).is_err());
        assert!(env.configure(json!({"max_steps": 0}).as_object().unwrap()).is_err());
        assert!(env.step(&[1.0]).is_err());
    }

    #[test]
    fn reseeding_repeats_start_positions() {
        let mut env = PointGoal::new();
        env.reseed(4).unwrap();
        let first = env.reset().unwrap();
        env.reseed(4).unwrap();
        assert_eq!(env.reset().unwrap(), first);
    }
}
