//! Environment construction from a configuration description.
//!
//! Environments are supplied by other crates. They register a factory under an
//! identifier, either directly or through a named module hook that a
//! configuration can ask for with its `import_module` key.
//!
//! ```json
//! {"id": "PointGoal-v0", "import_module": "point_goal", "goal_radius": 0.3}
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    config::{read_json_config, ConfigMap},
    rng::Seedable,
    Error, Result,
};

pub const ID_KEY: &str = "id";
pub const IMPORT_MODULE_KEY: &str = "import_module";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Human,
    RgbArray,
    Ansi,
}

/// Result of one environment step. `cost` is the constraint signal of safe RL tasks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transition {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub cost: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl Transition {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A simulated task instance.
///
/// Optional capabilities default to `None`; an environment that supports one
/// overrides the matching accessor.
pub trait Environment {
    fn id(&self) -> &str;

    fn action_dim(&self) -> usize;

    /// Start a new episode and return the first observation.
    fn reset(&mut self) -> anyhow::Result<Vec<f64>>;

    fn step(&mut self, action: &[f64]) -> anyhow::Result<Transition>;

    fn configurable(&mut self) -> Option<&mut dyn Configurable> {
        None
    }

    fn seedable(&mut self) -> Option<&mut dyn Seedable> {
        None
    }
}

/// Post-construction configuration of an environment.
pub trait Configurable {
    fn configure(&mut self, config: &ConfigMap) -> anyhow::Result<()>;
}

pub type EnvironmentFactory =
    Box<dyn Fn(Option<RenderMode>) -> anyhow::Result<Box<dyn Environment>>>;

pub type ModuleHook = fn(&mut EnvironmentRegistry);

/// Identifier to factory table, plus the module hooks that fill it.
#[derive(Default)]
pub struct EnvironmentRegistry {
    factories: BTreeMap<String, EnvironmentFactory>,
    modules: BTreeMap<String, ModuleHook>,
    imported: BTreeSet<String>,
}

impl fmt::Debug for EnvironmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentRegistry")
            .field("environments", &self.factories.keys().collect::<Vec<_>>())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("imported", &self.imported)
            .finish()
    }
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(Option<RenderMode>) -> anyhow::Result<Box<dyn Environment>> + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    pub fn register_module(&mut self, name: impl Into<String>, hook: ModuleHook) {
        self.modules.insert(name.into(), hook);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Run a module's registration hook. Importing the same module again is a no-op.
    pub fn import_module(&mut self, name: &str) -> Result<()> {
        if self.imported.contains(name) {
            return Ok(());
        }
        let hook = *self
            .modules
            .get(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))?;
        hook(self);
        self.imported.insert(name.to_string());
        Ok(())
    }

    pub fn make(&self, id: &str, render_mode: Option<RenderMode>) -> Result<Box<dyn Environment>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::UnregisteredEnvironment {
                id: id.to_string(),
                import_module: None,
            })?;
        factory(render_mode).map_err(|source| Error::Environment {
            id: id.to_string(),
            source,
        })
    }
}

/// Where an environment configuration comes from.
#[derive(Clone, Debug)]
pub enum EnvSource {
    Config(ConfigMap),
    File(PathBuf),
}

impl From<ConfigMap> for EnvSource {
    fn from(config: ConfigMap) -> Self {
        Self::Config(config)
    }
}

impl From<&Path> for EnvSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for EnvSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl EnvSource {
    pub fn into_config(self) -> Result<ConfigMap> {
        match self {
            Self::Config(config) => Ok(config),
            Self::File(path) => read_json_config(&path),
        }
    }
}

/// A constructed environment together with the module that registered it, so
/// the same configuration can be replayed later.
pub struct LoadedEnvironment {
    pub env: Box<dyn Environment>,
    pub import_module: Option<String>,
    pub configured: bool,
}

impl fmt::Debug for LoadedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedEnvironment")
            .field("id", &self.env.id())
            .field("import_module", &self.import_module)
            .field("configured", &self.configured)
            .finish()
    }
}

/// Load an environment from a configuration mapping or a JSON file holding one.
pub fn load_environment(
    registry: &mut EnvironmentRegistry,
    source: impl Into<EnvSource>,
    render_mode: Option<RenderMode>,
) -> Result<LoadedEnvironment> {
    let config = source.into().into_config()?;

    let import_module = match config.get(IMPORT_MODULE_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) if name.is_empty() => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => {
            return Err(Error::InvalidConfig(format!(
                "{IMPORT_MODULE_KEY} must be a string, found {other}"
            )))
        }
    };
    if let Some(module) = &import_module {
        registry.import_module(module)?;
    }

    let id = match config.get(ID_KEY) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => {
            return Err(Error::InvalidConfig(format!(
                "{ID_KEY} must be a string, found {other}"
            )))
        }
        None => return Err(Error::MissingEnvironmentId),
    };

    let mut env = registry.make(&id, render_mode).map_err(|err| match err {
        Error::UnregisteredEnvironment { id, .. } => {
            info!("import_module {}", import_module.as_deref().unwrap_or("None"));
            Error::UnregisteredEnvironment {
                id,
                import_module: import_module.clone(),
            }
        }
        other => other,
    })?;

    let configured = match env.configurable() {
        Some(target) => {
            let settings: ConfigMap = config
                .iter()
                .filter(|(key, _)| key.as_str() != ID_KEY && key.as_str() != IMPORT_MODULE_KEY)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            target.configure(&settings).map_err(|source| Error::Environment {
                id: id.clone(),
                source,
            })?;
            true
        }
        None => {
            info!("environment {id} does not support configuration");
            false
        }
    };
    if configured {
        env.reset().map(drop).map_err(|source| Error::Environment {
            id: id.clone(),
            source,
        })?;
    }

    Ok(LoadedEnvironment {
        env,
        import_module,
        configured,
    })
}
