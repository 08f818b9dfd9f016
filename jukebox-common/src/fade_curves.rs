//! Fade curve implementations for skip fade-outs
//!
//! Used by the renderer to ramp audio level and visual opacity down before
//! an administrative skip advances the queue.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Fade curve types
///
/// - Linear: Constant rate of change (precise, predictable)
/// - Logarithmic: Fast start, slow finish (natural-sounding fade-out)
/// - SCurve: Smooth acceleration and deceleration
/// - EqualPower: Constant perceived loudness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = 1 - t
    Linear,
    /// v(t) = (1-t)²
    #[default]
    Logarithmic,
    /// v(t) = 0.5 × (1 + cos(π × t))
    SCurve,
    /// v(t) = cos(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-out multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Level multiplier (1.0 at start, 0.0 at end)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        let level = match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        };

        level.clamp(0.0, 1.0)
    }

    /// Parse curve from a settings string
    ///
    /// Accepts 'linear', 'logarithmic', 'cosine'/'s_curve'/'scurve', 'equal_power'.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "logarithmic" => Some(FadeCurve::Logarithmic),
            "cosine" | "s_curve" | "scurve" | "s-curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }
}
