use std::f32::consts::PI;
use std::ops::{Add, Mul, Sub};

/// Quadratic ease-in between `a` and `b`.
pub fn ease_in(a: f32, b: f32, percent: f32) -> f32 {
    a + (b - a) * percent.powi(2)
}

/// Quadratic ease-out between `a` and `b`.
pub fn ease_out(a: f32, b: f32, percent: f32) -> f32 {
    a + (b - a) * (1.0 - (1.0 - percent).powi(2))
}

/// Cosine ease-in-out between `a` and `b`.
pub fn ease_in_out(a: f32, b: f32, percent: f32) -> f32 {
    a + (b - a) * (-(percent * PI).cos() / 2.0 + 0.5)
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Folds `z` into `[0, period)`, for any finite `z`.
pub fn wrap(z: f32, period: f32) -> f32 {
    if period <= 0.0 {
        return 0.0;
    }
    let wrapped = z.rem_euclid(period);
    // rem_euclid can round up to `period` for tiny negative inputs
    if wrapped >= period {
        0.0
    } else {
        wrapped
    }
}

/// Signed distance from `from` to `to` on a ring of length `period`, folded
/// into `[-period/2, period/2]`.
pub fn ring_delta(to: f32, from: f32, period: f32) -> f32 {
    let mut delta = to - from;
    if delta < -period / 2.0 {
        delta += period;
    }
    if delta > period / 2.0 {
        delta -= period;
    }
    delta
}

/// Stateless pseudo-random value in `[0, 1)` for a segment index and salt.
///
/// Decoration placement depends only on `(index, salt)`, so a rebuilt track
/// scatters its scenery identically.
pub fn scatter_hash(index: usize, salt: u32) -> f32 {
    let mut state = (index as u64) ^ ((salt as u64) << 32) ^ 0x9e37_79b9_7f4a_7c15;
    state = (state ^ (state >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    state = (state ^ (state >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    state ^= state >> 31;
    ((state >> 40) as f32) / ((1u64 << 24) as f32)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((self.state >> 32) as f32) / (u32::MAX as f32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Builds a colour from a `0xRRGGBB` literal.
    pub const fn hex(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xFF) as f32 / 255.0,
            g: ((rgb >> 8) & 0xFF) as f32 / 255.0,
            b: (rgb & 0xFF) as f32 / 255.0,
        }
    }

    pub fn to_u32(&self) -> u32 {
        let r = (self.r.clamp(0.0, 1.0) * 255.0).round() as u32;
        let g = (self.g.clamp(0.0, 1.0) * 255.0).round() as u32;
        let b = (self.b.clamp(0.0, 1.0) * 255.0).round() as u32;
        (r << 16) | (g << 8) | b
    }

    pub fn from_u32(value: u32) -> Self {
        Self::hex(value & 0x00FF_FFFF)
    }

    pub fn blend_additive(self, other: Color) -> Color {
        Self {
            r: (self.r + other.r).min(1.0),
            g: (self.g + other.g).min(1.0),
            b: (self.b + other.b).min(1.0),
        }
    }

    pub fn lerp(a: Color, b: Color, t: f32) -> Color {
        Color::new(lerp(a.r, b.r, t), lerp(a.g, b.g, t), lerp(a.b, b.b, t))
    }
}

impl Mul<f32> for Color {
    type Output = Color;
    fn mul(self, rhs: f32) -> Color {
        Color::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}

impl Add for Color {
    type Output = Color;
    fn add(self, rhs: Color) -> Color {
        Color::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}
