//! Physics abstraction.
//!
//! The sync layer only needs to read a body's state and to overwrite it.
//! [`KinematicWorld`] is a small reference backend so the system runs
//! headless; a real engine plugs in through [`PhysicsBackend`].

use crate::{
    math::Vec2,
    snapshot::{BodySnapshot, BODY_COUNT},
};

/// Standard gravity along -Y, before `gravity_scale`.
pub const STANDARD_GRAVITY: f32 = -9.81;

/// Arena walls sit at ±7 with half-thickness 0.5.
pub const ARENA_HALF_EXTENT: f32 = 6.5;

/// Physics parameters.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsConfig {
    pub gravity: Vec2,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, STANDARD_GRAVITY),
        }
    }
}

impl PhysicsConfig {
    pub fn with_gravity_scale(scale: f32) -> Self {
        Self {
            gravity: Vec2::new(0.0, STANDARD_GRAVITY * scale),
        }
    }
}

/// Physics stepper the sync layer drives.
pub trait PhysicsBackend: Send {
    /// Number of bodies. Must equal [`BODY_COUNT`] for syncing.
    fn body_count(&self) -> usize;

    /// Reads one body. `index < body_count()`.
    fn current_state(&self, index: usize) -> BodySnapshot;

    /// Overwrites one body. `index < body_count()`.
    fn apply_state(&mut self, index: usize, state: BodySnapshot);

    fn step(&mut self, dt_sec: f32);
}

/// Point bodies under constant gravity bouncing elastically off the arena walls.
#[derive(Debug, Clone)]
pub struct KinematicWorld {
    cfg: PhysicsConfig,
    bodies: Vec<BodySnapshot>,
}

impl Default for KinematicWorld {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl KinematicWorld {
    pub fn new(cfg: PhysicsConfig) -> Self {
        Self {
            cfg,
            bodies: Self::starting_layout(),
        }
    }

    // 10 columns x 3 rows, moving away from the grid origin.
    fn starting_layout() -> Vec<BodySnapshot> {
        (0..BODY_COUNT)
            .map(|i| {
                let p = Vec2::new((i % 10) as f32 - 5.0, (i / 10) as f32 - 5.0);
                BodySnapshot {
                    position: p,
                    linear_velocity: p,
                    ..BodySnapshot::ZERO
                }
            })
            .collect()
    }
}

fn reflect(pos: &mut f32, vel: &mut f32) {
    if *pos > ARENA_HALF_EXTENT {
        *pos = ARENA_HALF_EXTENT;
        *vel = -vel.abs();
    } else if *pos < -ARENA_HALF_EXTENT {
        *pos = -ARENA_HALF_EXTENT;
        *vel = vel.abs();
    }
}

impl PhysicsBackend for KinematicWorld {
    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn current_state(&self, index: usize) -> BodySnapshot {
        self.bodies[index]
    }

    fn apply_state(&mut self, index: usize, state: BodySnapshot) {
        self.bodies[index] = state;
    }

    fn step(&mut self, dt_sec: f32) {
        let gravity = self.cfg.gravity;
        for body in &mut self.bodies {
            body.linear_velocity += gravity * dt_sec;
            body.position += body.linear_velocity * dt_sec;
            body.orientation += body.angular_velocity * dt_sec;
            reflect(&mut body.position.x, &mut body.linear_velocity.x);
            reflect(&mut body.position.y, &mut body.linear_velocity.y);
        }
    }
}
