//! Synthetic-perspective projection and the road drawing primitives.

use crate::math::{Color, Vec3};
use crate::surface::{Rect, Surface};
use crate::track::SegmentPoint;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub depth: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
}

impl Camera {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl Viewport {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Projects `point` into screen space, filling its camera and screen scratch.
///
/// Returns `false` when the point sits on or behind the camera plane. In that
/// case the scale is zero and the screen point is parked at bottom centre.
pub fn project(point: &mut SegmentPoint, camera: &Camera, viewport: Viewport, road_width: f32) -> bool {
    let w = viewport.width as f32;
    let h = viewport.height as f32;
    point.camera = point.world - camera.position();

    if point.camera.z <= 0.0 {
        point.screen.scale = 0.0;
        point.screen.x = (w / 2.0).round();
        point.screen.y = h;
        point.screen.w = 0.0;
        return false;
    }

    let scale = camera.depth / point.camera.z;
    point.screen.scale = scale;
    point.screen.x = (w / 2.0 + scale * point.camera.x * w / 2.0).round();
    point.screen.y = (h / 2.0 - scale * point.camera.y * h / 2.0).round();
    point.screen.w = (scale * road_width * w / 2.0).round();
    true
}

/// Screen-space edge of a segment: centre x, row y and road half-width w.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub x: f32,
    pub y: f32,
    pub w: f32,
}

impl From<&SegmentPoint> for Edge {
    fn from(point: &SegmentPoint) -> Self {
        Self {
            x: point.screen.x,
            y: point.screen.y,
            w: point.screen.w,
        }
    }
}

pub struct SegmentPaint {
    pub grass: Color,
    pub road: Color,
    pub rumble: Color,
    pub lane: Option<Color>,
}

fn trapezoid(surface: &mut dyn Surface, near: (f32, f32, f32), far: (f32, f32, f32), color: Color) {
    // (left x, right x, y) for each edge
    surface.fill_polygon(
        &[(near.0, near.2), (near.1, near.2), (far.1, far.2), (far.0, far.2)],
        color,
    );
}

fn grass_band(surface: &mut dyn Surface, near: Edge, far: Edge, color: Color) {
    let width = surface.width() as f32;
    surface.fill_rect(Rect::new(0.0, far.y, width, near.y - far.y), color);
}

fn rumbles(surface: &mut dyn Surface, near: Edge, far: Edge, r1: f32, r2: f32, color: Color) {
    trapezoid(
        surface,
        (near.x - near.w - r1, near.x - near.w, near.y),
        (far.x - far.w - r2, far.x - far.w, far.y),
        color,
    );
    trapezoid(
        surface,
        (near.x + near.w, near.x + near.w + r1, near.y),
        (far.x + far.w, far.x + far.w + r2, far.y),
        color,
    );
}

/// Draws one road segment between a near and a far edge.
pub fn draw_segment(surface: &mut dyn Surface, lanes: usize, near: Edge, far: Edge, paint: &SegmentPaint) {
    let divisor = (2 * lanes).max(6) as f32;
    let r1 = near.w / divisor;
    let r2 = far.w / divisor;

    grass_band(surface, near, far, paint.grass);
    rumbles(surface, near, far, r1, r2, paint.rumble);
    trapezoid(
        surface,
        (near.x - near.w, near.x + near.w, near.y),
        (far.x - far.w, far.x + far.w, far.y),
        paint.road,
    );

    let Some(lane_color) = paint.lane else {
        return;
    };
    if lanes < 2 {
        return;
    }
    let lane_w1 = near.w * 2.0 / lanes as f32;
    let lane_w2 = far.w * 2.0 / lanes as f32;
    let mut lane_x1 = near.x - near.w + lane_w1;
    let mut lane_x2 = far.x - far.w + lane_w2;
    for _ in 1..lanes {
        trapezoid(
            surface,
            (lane_x1 - near.w / 30.0, lane_x1 + near.w / 30.0, near.y),
            (lane_x2 - far.w / 30.0, lane_x2 + far.w / 30.0, far.y),
            lane_color,
        );
        lane_x1 += lane_w1;
        lane_x2 += lane_w2;
    }
}

pub const CHECKER_SQUARES: usize = 10;

/// Draws a start/finish band: ten alternating white and black squares.
pub fn draw_checkered_segment(surface: &mut dyn Surface, near: Edge, far: Edge, paint: &SegmentPaint) {
    rumbles(surface, near, far, near.w / 10.0, far.w / 10.0, paint.rumble);
    grass_band(surface, near, far, paint.grass);

    let sw1 = near.w * 2.0 / CHECKER_SQUARES as f32;
    let sw2 = far.w * 2.0 / CHECKER_SQUARES as f32;
    for i in 0..CHECKER_SQUARES {
        let x1 = near.x - near.w + i as f32 * sw1;
        let x2 = far.x - far.w + i as f32 * sw2;
        let color = if i % 2 == 0 { Color::WHITE } else { Color::BLACK };
        trapezoid(surface, (x1, x1 + sw1, near.y), (x2, x2 + sw2, far.y), color);
    }
}
