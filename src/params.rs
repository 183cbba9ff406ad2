//! Transform parameters and their live store.
//!
//! The six parameters are replaced as a whole by the configuration channel.
//! `ParameterStore` hands every transform call its own `Copy` snapshot, so a
//! frame is always processed with one consistent parameter set even when an
//! update lands mid-frame.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

pub const DEFAULT_ANGLE: f64 = 0.0;
pub const DEFAULT_SHIFT: u32 = 0;
pub const DEFAULT_EPI_1: i32 = 120;
pub const DEFAULT_EPI_2: i32 = 240;
pub const DEFAULT_EPI_3: i32 = 360;

/// Largest accepted vertical shift in rows.
pub const MAX_SHIFT: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformParameters {
    /// Rotation in degrees, counter-clockwise positive.
    pub angle: f64,
    /// Vertical shift for the "quad1" source.
    pub shift_a: u32,
    /// Vertical shift for every other source.
    pub shift_b: u32,
    /// Reference line rows.
    pub epi_1: i32,
    pub epi_2: i32,
    pub epi_3: i32,
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self {
            angle: DEFAULT_ANGLE,
            shift_a: DEFAULT_SHIFT,
            shift_b: DEFAULT_SHIFT,
            epi_1: DEFAULT_EPI_1,
            epi_2: DEFAULT_EPI_2,
            epi_3: DEFAULT_EPI_3,
        }
    }
}

impl TransformParameters {
    /// Parse a full-replacement update from the configuration channel.
    ///
    /// All six fields are required. Negative shifts, shifts above `MAX_SHIFT`
    /// and non-finite angles are rejected.
    pub fn from_update(payload: &[u8]) -> Result<Self> {
        let params: Self = serde_json::from_slice(payload)
            .map_err(|e| anyhow!("invalid parameter update: {}", e))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.angle.is_finite() {
            return Err(anyhow!("angle must be a finite number of degrees"));
        }
        for (name, shift) in [("shift_a", self.shift_a), ("shift_b", self.shift_b)] {
            if shift > MAX_SHIFT {
                return Err(anyhow!(
                    "{} of {} rows exceeds the {} row limit",
                    name,
                    shift,
                    MAX_SHIFT
                ));
            }
        }
        Ok(())
    }

    pub fn reference_rows(&self) -> [i32; 3] {
        [self.epi_1, self.epi_2, self.epi_3]
    }
}

/// Shared, explicitly owned parameter state.
///
/// Cloning shares the same underlying parameters.
#[derive(Clone, Debug, Default)]
pub struct ParameterStore {
    inner: Arc<RwLock<TransformParameters>>,
}

impl ParameterStore {
    pub fn new(initial: TransformParameters) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Consistent copy of the current parameters.
    pub fn snapshot(&self) -> TransformParameters {
        // The value is plain data; a poisoned lock still holds a whole set.
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace all parameters at once.
    pub fn replace(&self, params: TransformParameters) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = params;
        log::info!("New angle: {}", params.angle);
        log::info!("New shift a: {}", params.shift_a);
        log::info!("New shift b: {}", params.shift_b);
        log::info!(
            "New reference rows: {}, {}, {}",
            params.epi_1,
            params.epi_2,
            params.epi_3
        );
    }
}
