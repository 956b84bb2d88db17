//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! The simulation is planar, so only a 2D vector is needed.

use std::ops::{Add, AddAssign, Mul};

use serde::{Deserialize, Serialize};

/// 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_scale_and_add() {
        let p = Vec2::new(1.0, -2.0);
        let v = Vec2::new(4.0, 2.0);
        assert_eq!(p + v * 0.5, Vec2::new(3.0, -1.0));
        let mut q = p;
        q += v;
        assert_eq!(q, Vec2::new(5.0, 0.0));
    }
}
