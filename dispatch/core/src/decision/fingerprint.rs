//! Situation fingerprints
//!
//! Two observations get the same fingerprint when nothing that matters for a
//! decision has changed: same agent, same grid cell, same open points of
//! interest at the same quantized distances. Peers, energy and state are
//! deliberately left out.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::observation::Observation;

/// Default grid cell size in world units
pub const DEFAULT_GRID_SIZE: u32 = 50;

/// Number of digest bytes kept in a fingerprint
const FINGERPRINT_BYTES: usize = 8;

#[derive(Serialize)]
struct CanonicalKey<'a> {
    agent: &'a str,
    x: i64,
    y: i64,
    points: String,
}

/// How observations are reduced to cache keys
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FingerprintPolicy {
    grid_size: u32,
}

impl FingerprintPolicy {
    /// Quantize to cells of `grid_size` units (0 is treated as 1)
    #[must_use]
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size: grid_size.max(1),
        }
    }

    /// Cell size
    #[must_use]
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Snap `value` down (toward zero) to a multiple of the grid size
    #[must_use]
    pub fn quantize(&self, value: f64) -> i64 {
        let grid = i64::from(self.grid_size);
        (value / f64::from(self.grid_size)) as i64 * grid
    }

    /// 16 hex characters identifying the decision-relevant situation
    #[must_use]
    pub fn fingerprint(&self, observation: &Observation) -> String {
        let mut points: Vec<String> = observation
            .unresolved_points()
            .map(|p| format!("{}:{}", p.id, self.quantize(p.distance)))
            .collect();
        points.sort();

        let key = CanonicalKey {
            agent: &observation.agent_id,
            x: self.quantize(observation.position.0),
            y: self.quantize(observation.position.1),
            points: points.join(","),
        };
        // Serializing a struct of strings and integers cannot fail
        let canonical = serde_json::to_vec(&key).unwrap_or_default();

        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}
