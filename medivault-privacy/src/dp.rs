use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Count queries move by at most one when one record is added or removed.
pub const COUNT_SENSITIVITY: f64 = 1.0;

/// Floor for `1 - 2|u|` so the boundary draw stays finite.
const MAGNITUDE_FLOOR: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum DpError {
    #[error("epsilon must be a finite value > 0")]
    InvalidEpsilon,
    #[error("noise seed must be 32 hex-encoded bytes")]
    InvalidSeed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NoiseConfig {
    /// Hex-encoded 32-byte seed for reproducible runs. OS entropy if omitted.
    #[serde(default)]
    pub seed_hex: Option<String>,
}

impl NoiseConfig {
    pub fn seeded(seed: [u8; 32]) -> Self {
        Self {
            seed_hex: Some(hex::encode(seed)),
        }
    }

    pub fn seed(&self) -> Result<Option<[u8; 32]>, DpError> {
        self.seed_hex
            .as_deref()
            .map(|raw| -> Result<[u8; 32], DpError> {
                let bytes = hex::decode(raw.trim()).map_err(|_| DpError::InvalidSeed)?;
                bytes.try_into().map_err(|_| DpError::InvalidSeed)
            })
            .transpose()
    }
}

pub fn validate_epsilon(epsilon: f64) -> Result<(), DpError> {
    if epsilon.is_finite() && epsilon > 0.0 {
        Ok(())
    } else {
        Err(DpError::InvalidEpsilon)
    }
}

/// Laplace mechanism over a shared random source.
///
/// Draws `u` from `(-0.5, 0.5]`, returns `-sign(u) * ln(1 - 2|u|) * b` with
/// `b = sensitivity / epsilon`. The source sits behind a mutex so one
/// mechanism serves concurrent queries; swap in a seeded generator for
/// reproducible tests.
pub struct LaplaceMechanism<R: RngCore = ChaCha20Rng> {
    rng: Mutex<R>,
}

impl LaplaceMechanism<ChaCha20Rng> {
    pub fn new(seed: [u8; 32]) -> Self {
        Self::with_rng(ChaCha20Rng::from_seed(seed))
    }

    pub fn from_entropy() -> Self {
        let mut seed = [0u8; 32];
        StdRng::from_entropy().fill_bytes(&mut seed);
        Self::new(seed)
    }

    pub fn from_config(config: &NoiseConfig) -> Result<Self, DpError> {
        Ok(match config.seed()? {
            Some(seed) => Self::new(seed),
            None => Self::from_entropy(),
        })
    }
}

impl<R: RngCore> LaplaceMechanism<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// One Laplace(0, 1/epsilon) draw for a sensitivity-1 count.
    pub fn sample(&self, epsilon: f64) -> Result<f64, DpError> {
        validate_epsilon(epsilon)?;
        let scale = COUNT_SENSITIVITY / epsilon;
        // gen::<f64>() is in [0, 1), so u lands in (-0.5, 0.5].
        let u = 0.5 - self.rng.lock().gen::<f64>();
        let magnitude = (1.0 - 2.0 * u.abs()).max(MAGNITUDE_FLOOR);
        Ok(-u.signum() * magnitude.ln() * scale)
    }

    /// Noised count, rounded and clamped at zero.
    pub fn add_noise(&self, true_count: u64, epsilon: f64) -> Result<u64, DpError> {
        let noise = self.sample(epsilon)?;
        let noisy = (true_count as f64 + noise).round().max(0.0);
        Ok(noisy as u64)
    }
}
