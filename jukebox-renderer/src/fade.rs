//! Skip fade-out
//!
//! Steps the engine's output level down along a [`FadeCurve`]. The fade
//! runs to completion once started.

use crate::engine::MediaEngine;
use crate::error::Result;
use jukebox_common::FadeCurve;
use std::time::Duration;
use tracing::debug;

/// Level updates per fade
pub const FADE_STEPS: u32 = 20;

/// Ramp from full level to silence over `duration`
///
/// A zero duration drops straight to silence.
pub async fn fade_out(
    engine: &dyn MediaEngine,
    curve: FadeCurve,
    duration: Duration,
    steps: u32,
) -> Result<()> {
    let steps = steps.max(1);
    debug!(?curve, ?duration, steps, "Fading out");

    if duration.is_zero() {
        return engine.set_fade_level(0.0).await;
    }

    let step = duration / steps;
    for i in 1..=steps {
        tokio::time::sleep(step).await;
        let level = curve.calculate_fade_out(i as f32 / steps as f32);
        engine.set_fade_level(level).await?;
    }
    Ok(())
}
