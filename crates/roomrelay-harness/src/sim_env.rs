//! Deterministic environment for simulation.
//!
//! Time comes from Tokio's clock, which turmoil (and `tokio::time::pause`)
//! drive virtually. Randomness comes from a seeded ChaCha8 stream shared by
//! all clones, so one seed reproduces the full sequence of session IDs and
//! room codes.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveTime, Timelike};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roomrelay_core::Environment;
use tokio::time::Instant;

/// Seconds in a day, for wrapping the virtual wall clock.
const SECONDS_PER_DAY: u64 = 86_400;

/// Simulation environment with seeded RNG and virtual time.
#[derive(Debug, Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    epoch: Instant,
    start_of_day: u32,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with zero.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed. The wall clock starts at noon.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: Instant::now(),
            start_of_day: 12 * 3600,
        }
    }

    /// Start the virtual wall clock at `time` instead of noon.
    #[must_use]
    pub fn starting_at(mut self, time: NaiveTime) -> Self {
        self.start_of_day = time.num_seconds_from_midnight();
        self
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn local_time(&self) -> NaiveTime {
        let elapsed = Instant::now().saturating_duration_since(self.epoch).as_secs();
        let seconds = (u64::from(self.start_of_day) + elapsed) % SECONDS_PER_DAY;
        NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0).unwrap_or(NaiveTime::MIN)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
