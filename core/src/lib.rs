pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod error;
pub mod experiment;
pub mod naming;
pub mod rng;
pub mod visualization;

pub use checkpoint::{load_config_and_model, CheckpointSelector, HostTensor, ModelState};
pub use config::{
    get_cfg_value, load_or_init, mapping_dims, read_json_config, read_yaml_config, ConfigMap,
    ConfigSchema, FieldKind, ValidatedConfig,
};
pub use environment::{
    load_environment, Configurable, EnvSource, Environment, EnvironmentRegistry,
    LoadedEnvironment, RenderMode, Transition,
};
pub use error::{Error, Result};
pub use experiment::{ExperimentArgs, ExperimentMode};
pub use naming::{auto_name, auto_name_validated, to_string, NameOptions};
pub use rng::{
    deterministic_kernels_enabled, seed_all, seeded_rng, Determinism, SeedReport, SeedSources,
    Seedable, DEFAULT_SEED,
};
pub use visualization::{encode_gif, mp4_to_gif, GifOptions};

/// Install the `tracing` subscriber used by experiment binaries.
///
/// `RUST_LOG` overrides the default `info` level for the harness crates.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fsrl_core=info,point_goal_smoke=info")),
        )
        .with_target(false)
        .try_init();
}
