//! Pointer input for hosts without a physical cursor.
//!
//! A [`PointerMotion`] is a deterministic function from frame index to a
//! normalized pointer position in `[-1, 1]` (y up), so offline renders and
//! tests drive the same per-frame update the interactive preview does.

use std::f32::consts::TAU;

use anyhow::{bail, Result};
use glam::Vec2;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PointerMotion {
    Static {
        x: f32,
        y: f32,
    },
    Orbit {
        radius_x: f32,
        radius_y: f32,
        period_frames: u32,
        #[serde(default)]
        phase: f32,
    },
    /// Linear back-and-forth between two points across the whole duration.
    Sweep {
        from: [f32; 2],
        to: [f32; 2],
    },
    Keyframes {
        points: Vec<PointerKeyframe>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointerKeyframe {
    pub frame: u32,
    pub x: f32,
    pub y: f32,
}

impl Default for PointerMotion {
    fn default() -> Self {
        Self::Static { x: 0.0, y: 0.0 }
    }
}

impl PointerMotion {
    pub fn validate(&self) -> Result<()> {
        let finite = |values: &[f32]| values.iter().all(|v| v.is_finite());
        match self {
            Self::Static { x, y } => {
                if !finite(&[*x, *y]) {
                    bail!("static pointer must be finite");
                }
            }
            Self::Orbit {
                radius_x,
                radius_y,
                period_frames,
                phase,
            } => {
                if *period_frames == 0 {
                    bail!("orbit period_frames must be > 0");
                }
                if !finite(&[*radius_x, *radius_y, *phase]) {
                    bail!("orbit radii and phase must be finite");
                }
            }
            Self::Sweep { from, to } => {
                if !finite(&[from[0], from[1], to[0], to[1]]) {
                    bail!("sweep endpoints must be finite");
                }
            }
            Self::Keyframes { points } => {
                if points.is_empty() {
                    bail!("keyframes must contain at least one point");
                }
                for pair in points.windows(2) {
                    if pair[1].frame <= pair[0].frame {
                        bail!(
                            "keyframe frames must be strictly increasing ({} then {})",
                            pair[0].frame,
                            pair[1].frame
                        );
                    }
                }
                if points.iter().any(|p| !finite(&[p.x, p.y])) {
                    bail!("keyframe positions must be finite");
                }
            }
        }
        Ok(())
    }

    /// Pointer for `frame` of a `total_frames` long render, clamped to `[-1, 1]`.
    pub fn position_at(&self, frame: u32, total_frames: u32) -> Vec2 {
        let raw = match self {
            Self::Static { x, y } => Vec2::new(*x, *y),
            Self::Orbit {
                radius_x,
                radius_y,
                period_frames,
                phase,
            } => {
                let turns = (frame % (*period_frames).max(1)) as f32 / (*period_frames).max(1) as f32;
                let angle = turns * TAU + phase;
                Vec2::new(radius_x * angle.cos(), radius_y * angle.sin())
            }
            Self::Sweep { from, to } => {
                let t = ping_pong(frame, total_frames);
                Vec2::from_array(*from).lerp(Vec2::from_array(*to), t)
            }
            Self::Keyframes { points } => keyframe_position(points, frame),
        };
        raw.clamp(Vec2::NEG_ONE, Vec2::ONE)
    }
}

fn ping_pong(frame: u32, total_frames: u32) -> f32 {
    // u64 so the round trip of a u32-long render cannot overflow.
    let span = u64::from(total_frames.saturating_sub(1).max(1));
    let pos = u64::from(frame) % (span * 2);
    let forward = if pos <= span { pos } else { span * 2 - pos };
    (forward as f64 / span as f64) as f32
}

fn keyframe_position(points: &[PointerKeyframe], frame: u32) -> Vec2 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec2::ZERO;
    };
    if frame <= first.frame {
        return Vec2::new(first.x, first.y);
    }
    if frame >= last.frame {
        return Vec2::new(last.x, last.y);
    }

    let next_index = points.partition_point(|p| p.frame <= frame);
    let a = points[next_index - 1];
    let b = points[next_index];
    let t = (frame - a.frame) as f32 / (b.frame - a.frame) as f32;
    Vec2::new(a.x, a.y).lerp(Vec2::new(b.x, b.y), t)
}

/// Normalize a cursor position in window pixels (origin top-left) to
/// `[-1, 1]` with y pointing up.
pub fn normalize_cursor(cursor_px: Vec2, window_px: Vec2) -> Vec2 {
    if window_px.x <= 0.0 || window_px.y <= 0.0 {
        return Vec2::ZERO;
    }
    Vec2::new(
        (cursor_px.x / window_px.x) * 2.0 - 1.0,
        -(cursor_px.y / window_px.y) * 2.0 + 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn static_pointer_is_constant_and_clamped() {
        let motion = PointerMotion::Static { x: 0.25, y: -3.0 };
        assert!(close(motion.position_at(0, 10), Vec2::new(0.25, -1.0)));
        assert!(close(motion.position_at(9, 10), Vec2::new(0.25, -1.0)));
    }

    #[test]
    fn orbit_completes_one_turn_per_period() {
        let motion = PointerMotion::Orbit {
            radius_x: 0.5,
            radius_y: 0.25,
            period_frames: 4,
            phase: 0.0,
        };
        assert!(close(motion.position_at(0, 8), Vec2::new(0.5, 0.0)));
        assert!(close(motion.position_at(1, 8), Vec2::new(0.0, 0.25)));
        assert!(close(motion.position_at(4, 8), motion.position_at(0, 8)));
    }

    #[test]
    fn sweep_ping_pongs_across_duration() {
        let motion = PointerMotion::Sweep {
            from: [-1.0, 0.0],
            to: [1.0, 0.0],
        };
        assert!(close(motion.position_at(0, 5), Vec2::new(-1.0, 0.0)));
        assert!(close(motion.position_at(2, 5), Vec2::new(0.0, 0.0)));
        assert!(close(motion.position_at(4, 5), Vec2::new(1.0, 0.0)));
        assert!(close(motion.position_at(6, 5), Vec2::new(0.0, 0.0)));
    }

    #[test]
    fn sweep_handles_u32_long_renders() {
        let motion = PointerMotion::Sweep {
            from: [-1.0, 0.0],
            to: [1.0, 0.0],
        };
        assert!(close(motion.position_at(0, u32::MAX), Vec2::new(-1.0, 0.0)));
        assert!(close(motion.position_at(u32::MAX - 1, u32::MAX), Vec2::new(1.0, 0.0)));
        assert!(close(motion.position_at(u32::MAX, u32::MAX), Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn keyframes_interpolate_and_hold_ends() {
        let motion = PointerMotion::Keyframes {
            points: vec![
                PointerKeyframe { frame: 10, x: 0.0, y: 0.0 },
                PointerKeyframe { frame: 20, x: 1.0, y: -1.0 },
            ],
        };
        assert!(close(motion.position_at(0, 30), Vec2::ZERO));
        assert!(close(motion.position_at(15, 30), Vec2::new(0.5, -0.5)));
        assert!(close(motion.position_at(25, 30), Vec2::new(1.0, -1.0)));
    }

    #[test]
    fn keyframes_must_increase() {
        let motion = PointerMotion::Keyframes {
            points: vec![
                PointerKeyframe { frame: 5, x: 0.0, y: 0.0 },
                PointerKeyframe { frame: 5, x: 1.0, y: 1.0 },
            ],
        };
        assert!(motion.validate().is_err());
        assert!(PointerMotion::Keyframes { points: vec![] }.validate().is_err());
    }

    #[test]
    fn motion_parses_from_yaml() {
        let motion: PointerMotion =
            serde_yaml::from_str("{ kind: orbit, radius_x: 0.6, radius_y: 0.4, period_frames: 90 }")
                .expect("orbit should parse");
        assert!(matches!(motion, PointerMotion::Orbit { period_frames: 90, .. }));
        assert!(serde_yaml::from_str::<PointerMotion>("{ kind: spiral }").is_err());
    }

    #[test]
    fn cursor_normalization_matches_window_corners() {
        let window = Vec2::new(800.0, 600.0);
        assert!(close(normalize_cursor(Vec2::ZERO, window), Vec2::new(-1.0, 1.0)));
        assert!(close(normalize_cursor(window, window), Vec2::new(1.0, -1.0)));
        assert!(close(normalize_cursor(window * 0.5, window), Vec2::ZERO));
    }
}
