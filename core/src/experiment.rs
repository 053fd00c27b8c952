use std::{env, path::PathBuf};

use crate::{rng::DEFAULT_SEED, Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExperimentMode {
    Full,
    Test,
}

impl ExperimentMode {
    pub fn from_str(value: &str) -> Result<Self> {
        match value {
            "full" => Ok(Self::Full),
            "test" => Ok(Self::Test),
            other => Err(Error::InvalidArgument(format!("invalid mode: {other}"))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Test => "test",
        }
    }

    pub fn select<T>(&self, full: T, test: T) -> T {
        match self {
            Self::Full => full,
            Self::Test => test,
        }
    }
}

/// Command line of an experiment binary.
#[derive(Clone, Debug)]
pub struct ExperimentArgs {
    mode: ExperimentMode,
    seed: Option<u64>,
    env_config: Option<PathBuf>,
    logdir: Option<PathBuf>,
    resume: Option<PathBuf>,
    best: bool,
    epoch: Option<u64>,
    video: Option<PathBuf>,
    help_requested: bool,
}

impl ExperimentArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self {
            mode: ExperimentMode::Full,
            seed: None,
            env_config: None,
            logdir: None,
            resume: None,
            best: false,
            epoch: None,
            video: None,
            help_requested: false,
        };
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| {
                inline
                    .clone()
                    .or_else(|| iter.next())
                    .ok_or_else(|| Error::InvalidArgument(format!("expected value after {name}")))
            };

            match flag.as_str() {
                "--mode" | "-m" => parsed.mode = ExperimentMode::from_str(&value(&flag)?)?,
                "--seed" => parsed.seed = Some(parse_number(&flag, &value(&flag)?)?),
                "--env" => parsed.env_config = Some(PathBuf::from(value(&flag)?)),
                "--logdir" => parsed.logdir = Some(PathBuf::from(value(&flag)?)),
                "--resume" => parsed.resume = Some(PathBuf::from(value(&flag)?)),
                "--epoch" => parsed.epoch = Some(parse_number(&flag, &value(&flag)?)?),
                "--video" => parsed.video = Some(PathBuf::from(value(&flag)?)),
                "--best" => parsed.best = true,
                "--help" | "-h" => parsed.help_requested = true,
                _ => return Err(Error::InvalidArgument(format!("unexpected argument: {arg}"))),
            }
        }

        Ok(parsed)
    }

    pub fn help_requested(&self) -> bool {
        self.help_requested
    }

    pub fn mode(&self) -> ExperimentMode {
        self.mode
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    pub fn seed_override(&self) -> Option<u64> {
        self.seed
    }

    pub fn env_config(&self) -> Option<&PathBuf> {
        self.env_config.as_ref()
    }

    pub fn logdir(&self) -> Option<&PathBuf> {
        self.logdir.as_ref()
    }

    pub fn resume(&self) -> Option<&PathBuf> {
        self.resume.as_ref()
    }

    pub fn best(&self) -> bool {
        self.best
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn video(&self) -> Option<&PathBuf> {
        self.video.as_ref()
    }
}

fn parse_number(flag: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{flag} expects a non-negative integer, got {value}")))
}
