mod point_goal;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use fsrl_core::{
    auto_name_validated, deterministic_kernels_enabled, get_cfg_value, init_logging, load_config_and_model, load_environment,
    load_or_init, mp4_to_gif, seed_all, ConfigMap, ConfigSchema, Determinism,
    EnvironmentRegistry, ExperimentArgs, ExperimentMode, NameOptions,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

const FULL_EPISODES: usize = 20;
const TEST_EPISODES: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RunConfig {
    task: String,
    seed: u64,
    cost_limit: f64,
    episodes: usize,
    action_noise: f64,
    logdir: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task: point_goal::ENV_ID.to_string(),
            seed: fsrl_core::DEFAULT_SEED,
            cost_limit: 10.0,
            episodes: FULL_EPISODES,
            action_noise: 0.1,
            logdir: "logs".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct EpisodeStats {
    reward: f64,
    cost: f64,
    length: usize,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    name: String,
    seed: u64,
    mode: &'static str,
    episodes: Vec<EpisodeStats>,
    mean_reward: f64,
    mean_cost: f64,
    within_cost_limit: bool,
    determinism: Determinism,
    deterministic_kernels: bool,
}

#[derive(Debug, PartialEq)]
struct Rollout {
    episodes: Vec<EpisodeStats>,
    determinism: Determinism,
}

fn main() -> Result<()> {
    let args = ExperimentArgs::parse_from_env()?;
    if args.help_requested() {
        print_usage();
        return Ok(());
    }
    init_logging();

    let run_dir = args
        .logdir()
        .cloned()
        .unwrap_or_else(|| PathBuf::from(RunConfig::default().logdir));
    let mut config: RunConfig = load_or_init(&run_dir.join("run.json"), RunConfig::default)?;
    if let Some(seed) = args.seed_override() {
        config.seed = seed;
    }

    let name = run_name(&config)?;
    info!("running {} in {} mode", name, args.mode().label());

    let mut registry = EnvironmentRegistry::new();
    registry.register_module(point_goal::MODULE, point_goal::register);
    let env_source: ConfigMap = match args.env_config() {
        Some(path) => fsrl_core::read_json_config(path)?,
        None => default_env_config(),
    };

    let episodes = args.mode().select(config.episodes, TEST_EPISODES);
    let run = rollout(&mut registry, &env_source, &config, episodes)?;
    if args.mode() == ExperimentMode::Test {
        let replay = rollout(&mut registry, &env_source, &config, episodes)?;
        if replay.episodes != run.episodes {
            return Err(anyhow!("rollouts with seed {} are not reproducible", config.seed));
        }
        info!("reproducibility check passed for seed {}", config.seed);
    }

    let summary = summarize(&name, &config, args.mode(), run);
    info!(
        "mean reward {:.3}, mean cost {:.3} (limit {})",
        summary.mean_reward, summary.mean_cost, config.cost_limit
    );
    if !summary.within_cost_limit {
        warn!("mean episode cost exceeds the cost limit");
    }

    let out_dir = run_dir.join(&name);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create run directory {}", out_dir.display()))?;
    let summary_path = out_dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("failed to write summary to {}", summary_path.display()))?;

    if let Some(resume) = args.resume() {
        inspect_checkpoint(resume, args.best(), args.epoch())?;
    }
    if let Some(video) = args.video() {
        let gif = out_dir.join("rollout.gif");
        mp4_to_gif(video, &gif)
            .with_context(|| format!("failed to convert {}", video.display()))?;
        info!("saved animation to {}", gif.display());
    }

    Ok(())
}

fn print_usage() {
    println!(
        "Usage: cargo run -p fsrl-experiment-point-goal -- [--mode full|test] [--seed N] \
         [--env env.json] [--logdir DIR] [--resume RUN_DIR [--best] [--epoch N]] [--video clip.mp4]"
    );
}

fn default_env_config() -> ConfigMap {
    let value = json!({
        "id": point_goal::ENV_ID,
        "import_module": point_goal::MODULE,
        "goal_radius": 0.3,
        "max_steps": 100,
    });
    match value {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    }
}

fn as_map(config: &RunConfig) -> Result<Value> {
    Ok(serde_json::to_value(config)?)
}

fn run_name(config: &RunConfig) -> Result<String> {
    let default = as_map(&RunConfig::default())?;
    let current = as_map(config)?;
    let defaults = default
        .as_object()
        .ok_or_else(|| anyhow!("run config must serialize to a mapping"))?;
    let schema = ConfigSchema::from_defaults(defaults);

    let default = schema.validate(&default)?;
    let current = schema.validate(&current)?;
    let options = NameOptions::default().with_suffix(format!("seed{}", config.seed));
    Ok(auto_name_validated(&default, &current, &options.skip("seed")))
}

fn rollout(
    registry: &mut EnvironmentRegistry,
    env_config: &ConfigMap,
    config: &RunConfig,
    episodes: usize,
) -> Result<Rollout> {
    let mut loaded = load_environment(registry, env_config.clone(), None)?;
    let env = &mut loaded.env;
    let report = seed_all(config.seed, env.seedable());
    let determinism = report.sources.determinism;
    if determinism != Determinism::reproducible() || !deterministic_kernels_enabled() {
        warn!("seed {} does not pin every source of nondeterminism", config.seed);
    }
    info!(
        "seeded with {}: benchmark autotune {}, deterministic kernels {}",
        config.seed, determinism.benchmark_autotune, determinism.deterministic_kernels
    );
    let mut general = report.sources.general;

    let mut stats = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        let mut observation = env.reset()?;
        let mut episode = EpisodeStats {
            reward: 0.0,
            cost: 0.0,
            length: 0,
        };
        loop {
            // head straight for the goal, jittered by the run's noise level
            let heading = observation.get(2..4).ok_or_else(|| {
                anyhow!(
                    "{} observations have {} entries, expected at least 4",
                    env.id(),
                    observation.len()
                )
            })?;
            let action: Vec<f64> = heading
                .iter()
                .map(|d| d + general.gen_range(-1.0f64..=1.0) * config.action_noise)
                .collect();
            let transition = env.step(&action)?;
            episode.reward += transition.reward;
            episode.cost += transition.cost;
            episode.length += 1;
            if transition.done() {
                break;
            }
            observation = transition.observation;
        }
        stats.push(episode);
    }
    Ok(Rollout {
        episodes: stats,
        determinism,
    })
}

fn summarize(
    name: &str,
    config: &RunConfig,
    mode: ExperimentMode,
    run: Rollout,
) -> RunSummary {
    let Rollout {
        episodes,
        determinism,
    } = run;
    let count = episodes.len().max(1) as f64;
    let mean_reward = episodes.iter().map(|e| e.reward).sum::<f64>() / count;
    let mean_cost = episodes.iter().map(|e| e.cost).sum::<f64>() / count;
    RunSummary {
        name: name.to_string(),
        seed: config.seed,
        mode: mode.label(),
        episodes,
        mean_reward,
        mean_cost,
        within_cost_limit: mean_cost <= config.cost_limit,
        determinism,
        deterministic_kernels: deterministic_kernels_enabled(),
    }
}

fn inspect_checkpoint(run_dir: &Path, best: bool, epoch: Option<u64>) -> Result<()> {
    let (saved, model) = load_config_and_model(run_dir, best, epoch)?;
    let saved = saved.as_object().cloned().unwrap_or_default();
    info!(
        "checkpoint of {} (cost limit {}): {} tensors, {} parameters",
        get_cfg_value(&saved, "task"),
        get_cfg_value(&saved, "cost_limit"),
        model.tensors.len(),
        model.parameter_count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsrl_core::{Environment, Transition};

    #[test]
    fn default_run_is_named_after_its_seed() {
        let name = run_name(&RunConfig::default()).unwrap();
        assert!(name.starts_with("seed1029-"), "{name}");
    }

    #[test]
    fn changed_cost_limit_shows_up_in_name() {
        let config = RunConfig {
            cost_limit: 5.0,
            seed: 3,
            ..RunConfig::default()
        };
        let name = run_name(&config).unwrap();
        assert!(name.starts_with("cost5.0_seed3-"), "{name}");
    }

    #[test]
    fn rollouts_are_reproducible_for_a_seed() {
        let mut registry = EnvironmentRegistry::new();
        registry.register_module(point_goal::MODULE, point_goal::register);
        let config = RunConfig::default();

        let first = rollout(&mut registry, &default_env_config(), &config, 2).unwrap();
        let second = rollout(&mut registry, &default_env_config(), &config, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.episodes.len(), 2);
        assert!(first.episodes.iter().all(|e| e.length > 0));
        assert_eq!(first.determinism, Determinism::reproducible());
    }

    struct Blind;

    impl Environment for Blind {
        fn id(&self) -> &str {
            "Blind-v0"
        }

        fn action_dim(&self) -> usize {
            2
        }

        fn reset(&mut self) -> Result<Vec<f64>> {
            Ok(vec![0.0, 0.0])
        }

        fn step(&mut self, _action: &[f64]) -> Result<Transition> {
            Ok(Transition {
                terminated: true,
                ..Transition::default()
            })
        }
    }

    #[test]
    fn short_observations_fail_the_rollout() {
        let mut registry = EnvironmentRegistry::new();
        registry.register("Blind-v0", |_| Ok(Box::new(Blind) as Box<dyn Environment>));
        let mut env_config = ConfigMap::new();
        env_config.insert("id".to_string(), json!("Blind-v0"));

        let err = rollout(&mut registry, &env_config, &RunConfig::default(), 1).unwrap_err();
        assert!(err.to_string().contains("Blind-v0 observations have 2 entries"), "{err}");
    }

    #[test]
    fn summary_averages_episodes() {
        let episodes = vec![
            EpisodeStats { reward: 1.0, cost: 0.0, length: 5 },
            EpisodeStats { reward: 3.0, cost: 30.0, length: 7 },
        ];
        let run = Rollout {
            episodes,
            determinism: Determinism::reproducible(),
        };
        let summary = summarize("run", &RunConfig::default(), ExperimentMode::Test, run);
        assert_eq!(summary.mean_reward, 2.0);
        assert_eq!(summary.mean_cost, 15.0);
        assert!(!summary.within_cost_limit);
        assert!(!summary.determinism.benchmark_autotune);

        let written = serde_json::to_value(&summary).unwrap();
        assert_eq!(written["determinism"]["deterministic_kernels"], json!(true));
    }
}
