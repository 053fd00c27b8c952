use std::{
    env,
    sync::atomic::{AtomicBool, Ordering},
};

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::warn;

/// Seed used when a run does not choose one.
pub const DEFAULT_SEED: u64 = 1029;

/// Environment variable read by the host runtime's hash randomization.
pub const HASH_SEED_ENV: &str = "PYTHONHASHSEED";

static DETERMINISTIC_KERNELS: AtomicBool = AtomicBool::new(false);

const GENERAL_STREAM: u64 = 1;
const ARRAY_STREAM: u64 = 2;
const TENSOR_STREAM: u64 = 3;
const DEVICE_STREAM: u64 = 4;

/// Construct a deterministic RNG from a fixed seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Seed of an independent stream derived from a run seed. Stream 0 is the run seed itself.
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Whether the last [`seed_all`] switched tensor kernels to their reproducible variants.
pub fn deterministic_kernels_enabled() -> bool {
    DETERMINISTIC_KERNELS.load(Ordering::SeqCst)
}

/// Something that can reseed its own randomness.
pub trait Seedable {
    fn reseed(&mut self, seed: u64) -> anyhow::Result<()>;
}

/// Kernel selection switches applied while seeding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Determinism {
    pub benchmark_autotune: bool,
    pub deterministic_kernels: bool,
}

impl Determinism {
    pub fn reproducible() -> Self {
        Self {
            benchmark_autotune: false,
            deterministic_kernels: true,
        }
    }
}

/// Seeded random sources for the subsystems of one run.
///
/// Each subsystem takes its own handle at construction time. The handles draw
/// from distinct streams, none of which equals `seeded_rng(seed)`, so items
/// reseeded with the run seed do not replay a subsystem's draws.
#[derive(Clone, Debug)]
pub struct SeedSources {
    seed: u64,
    pub general: StdRng,
    pub array: StdRng,
    pub tensor: StdRng,
    pub determinism: Determinism,
}

impl SeedSources {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            general: seeded_rng(derive_seed(seed, GENERAL_STREAM)),
            array: seeded_rng(derive_seed(seed, ARRAY_STREAM)),
            tensor: seeded_rng(derive_seed(seed, TENSOR_STREAM)),
            determinism: Determinism::reproducible(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Tensor source for one accelerator device.
    pub fn device(&self, _ordinal: usize) -> StdRng {
        seeded_rng(derive_seed(self.seed, DEVICE_STREAM))
    }

    /// Tensor sources for every device, all seeded identically.
    pub fn all_devices(&self, count: usize) -> Vec<StdRng> {
        (0..count).map(|ordinal| self.device(ordinal)).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeedFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug)]
pub struct SeedReport {
    pub sources: SeedSources,
    pub seeded: usize,
    pub failures: Vec<SeedFailure>,
}

impl SeedReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Seed every random source of the run and each of `others`.
///
/// Writes [`HASH_SEED_ENV`] and enables deterministic kernels process-wide, so
/// concurrent callers must serialize. A failing item is reported and logged but
/// does not stop the remaining items from being seeded.
pub fn seed_all<'a, I>(seed: u64, others: I) -> SeedReport
where
    I: IntoIterator<Item = &'a mut dyn Seedable>,
{
    env::set_var(HASH_SEED_ENV, seed.to_string());
    let sources = SeedSources::new(seed);
    DETERMINISTIC_KERNELS.store(sources.determinism.deterministic_kernels, Ordering::SeqCst);

    let mut seeded = 0;
    let mut failures = Vec::new();
    for (index, item) in others.into_iter().enumerate() {
        match item.reseed(seed) {
            Ok(()) => seeded += 1,
            Err(err) => {
                warn!(index, seed, "failed to seed item: {err:#}");
                failures.push(SeedFailure {
                    index,
                    message: format!("{err:#}"),
                });
            }
        }
    }

    SeedReport {
        sources,
        seeded,
        failures,
    }
}
