//! Noise handling for the audio front end.
//!
//! Two cooperating mechanisms: a capture-once noise profile (DC offset and
//! ambient floor) subtracted per chunk before transcription, and dynamic
//! energy calibration that raises the effective speech threshold above the
//! measured ambient level.

use crate::audio::rms_energy;
use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Multiplier applied to ambient RMS when calibrating dynamically.
const DYNAMIC_ENERGY_FACTOR: f64 = 1.5;

/// A noise profile captured once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseProfile {
    /// Mean sample value of the ambient capture (DC bias).
    pub dc_offset: f64,
    /// Ambient RMS energy.
    pub noise_rms: f64,
}

impl NoiseProfile {
    /// Measure a profile from ambient chunks.
    pub fn capture(chunks: &[Vec<i16>]) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut energy_sum = 0.0f64;
        for chunk in chunks {
            count += chunk.len();
            sum += chunk.iter().map(|&s| f64::from(s)).sum::<f64>();
            energy_sum += rms_energy(chunk);
        }
        let dc_offset = if count == 0 { 0.0 } else { sum / count as f64 };
        let noise_rms = if chunks.is_empty() {
            0.0
        } else {
            energy_sum / chunks.len() as f64
        };
        Self {
            dc_offset,
            noise_rms,
        }
    }

    /// Subtract the profile from a chunk in place.
    pub fn apply(&self, chunk: &mut [i16]) {
        if self.dc_offset.abs() < f64::EPSILON {
            return;
        }
        let offset = self.dc_offset;
        for sample in chunk.iter_mut() {
            let corrected = f64::from(*sample) - offset;
            *sample = corrected.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        }
    }

    /// Persist the profile as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AssistantError::Stt(format!("profile encode: {e}")))?;
        std::fs::write(path, json)?;
        info!("noise profile saved to {}", path.display());
        Ok(())
    }

    /// Load a previously captured profile.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or unparseable.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AssistantError::Stt(format!("cannot read noise profile: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| AssistantError::Stt(format!("invalid noise profile: {e}")))
    }
}

/// Raise the configured threshold above measured ambient noise.
pub fn calibrated_threshold(configured: f64, ambient_rms: f64) -> f64 {
    configured.max(ambient_rms * DYNAMIC_ENERGY_FACTOR)
}
