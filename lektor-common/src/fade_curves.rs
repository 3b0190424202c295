//! Fade curve implementations for chunk-boundary crossfading
//!
//! The assembler overlaps the tail of one chunk with the head of the next;
//! each curve trades smoothness against loudness dip at the midpoint.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::str::FromStr;

/// Fade curve types for crossfading
///
/// - Linear: constant rate of change, dips ~3 dB at the midpoint
/// - SCurve: smooth acceleration and deceleration
/// - EqualPower: constant perceived loudness across the overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    Linear,
    SCurve,
    EqualPower,
}

impl FadeCurve {
    /// Fade-in multiplier at a normalized position (0.0..=1.0).
    pub fn fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out multiplier at a normalized position (0.0..=1.0).
    pub fn fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::SCurve => 0.5 * (1.0 + (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => ((1.0 - t) * FRAC_PI_2).sin(),
        }
    }
}

impl FromStr for FadeCurve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(FadeCurve::Linear),
            "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" => Ok(FadeCurve::EqualPower),
            other => Err(format!("unknown fade curve: {other}")),
        }
    }
}
