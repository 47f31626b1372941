//! Drawable targets.
//!
//! The engine renders through the [`Surface`] trait; [`FrameBuffer`] is the
//! software implementation the window presents each frame.

use crate::assets::Sprite;
use crate::math::Color;

/// 2D affine transform applied to everything drawn while it is set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2 {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Transform2 {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Rotation by `angle` around `(cx, cy)`, followed by a shift.
    pub fn rotate_about(angle: f32, cx: f32, cy: f32, shift_x: f32, shift_y: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: cx - cos * cx + sin * cy + shift_x,
            ty: cy - sin * cx - cos * cy + shift_y,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// `self` first, then `next`.
    pub fn then(&self, next: &Transform2) -> Self {
        Self {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// How a sprite is composited.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blit {
    pub opacity: f32,
    pub additive: bool,
    pub flip_x: bool,
}

impl Default for Blit {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            additive: false,
            flip_x: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
}

pub trait Surface {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn clear(&mut self, color: Color);
    fn set_transform(&mut self, transform: Transform2);
    fn fill_rect(&mut self, rect: Rect, color: Color);
    /// Fills a simple polygon; trapezoids are the common case.
    fn fill_polygon(&mut self, points: &[(f32, f32)], color: Color);
    /// Scales `sprite` into `dest`, dropping every row at or below `clip_y`.
    fn draw_sprite(&mut self, sprite: &Sprite, dest: Rect, clip_y: f32, blit: Blit);
    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: Color);
}

pub struct FrameBuffer {
    width: usize,
    height: usize,
    color: Vec<u32>,
    transform: Transform2,
}

impl FrameBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            color: vec![0; width * height],
            transform: Transform2::IDENTITY,
        }
    }

    pub fn color_buffer(&self) -> &[u32] {
        &self.color
    }

    /// Reallocates for a new window size; contents are discarded.
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if width == self.width && height == self.height {
            return false;
        }
        tracing::debug!("Resizing frame buffer to {}x{}", width, height);
        self.width = width;
        self.height = height;
        self.color = vec![0; width * height];
        true
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x < self.width && y < self.height {
            Some(self.color[y * self.width + x])
        } else {
            None
        }
    }

    fn put(&mut self, x: i32, y: i32, color: Color, opacity: f32, additive: bool) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let idx = y as usize * self.width + x as usize;
        let value = if additive {
            Color::from_u32(self.color[idx]).blend_additive(color * opacity)
        } else if opacity >= 1.0 {
            color
        } else {
            Color::lerp(Color::from_u32(self.color[idx]), color, opacity)
        };
        self.color[idx] = value.to_u32();
    }

    fn scan_fill(&mut self, points: &[(f32, f32)], color: Color) {
        if points.len() < 3 || self.width == 0 || self.height == 0 {
            return;
        }
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        if !min_y.is_finite() || !max_y.is_finite() {
            return;
        }
        let y_start = min_y.floor().max(0.0) as i32;
        let y_end = max_y.ceil().min(self.height as f32) as i32;
        let packed = color.to_u32();
        let mut crossings: Vec<f32> = Vec::with_capacity(points.len());
        for y in y_start..y_end {
            let sample = y as f32 + 0.5;
            crossings.clear();
            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                if (y0 <= sample && y1 > sample) || (y1 <= sample && y0 > sample) {
                    crossings.push(x0 + (sample - y0) / (y1 - y0) * (x1 - x0));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for span in crossings.chunks_exact(2) {
                let x_start = span[0].round().max(0.0) as usize;
                let x_end = span[1].round().min(self.width as f32).max(0.0) as usize;
                let row = y as usize * self.width;
                for x in x_start..x_end {
                    self.color[row + x] = packed;
                }
            }
        }
    }
}

impl Surface for FrameBuffer {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn clear(&mut self, color: Color) {
        self.color.fill(color.to_u32());
    }

    fn set_transform(&mut self, transform: Transform2) {
        self.transform = transform;
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let corners = [
            (rect.x, rect.y),
            (rect.x + rect.w, rect.y),
            (rect.x + rect.w, rect.y + rect.h),
            (rect.x, rect.y + rect.h),
        ];
        self.fill_polygon(&corners, color);
    }

    fn fill_polygon(&mut self, points: &[(f32, f32)], color: Color) {
        if self.transform.is_identity() {
            self.scan_fill(points, color);
        } else {
            let transform = self.transform;
            let moved: Vec<(f32, f32)> =
                points.iter().map(|&(x, y)| transform.apply(x, y)).collect();
            self.scan_fill(&moved, color);
        }
    }

    fn draw_sprite(&mut self, sprite: &Sprite, dest: Rect, clip_y: f32, blit: Blit) {
        if dest.w <= 0.0 || dest.h <= 0.0 || sprite.width == 0 || sprite.height == 0 {
            return;
        }
        let visible_h = (clip_y - dest.y).min(dest.h);
        if visible_h <= 0.0 {
            return;
        }
        // sprites stay upright; only their anchor follows the transform
        let (x0, y0) = self.transform.apply(dest.x, dest.y);
        let x_start = x0.floor().max(0.0) as i32;
        let x_end = (x0 + dest.w).ceil().min(self.width as f32) as i32;
        let y_start = y0.floor().max(0.0) as i32;
        let y_end = (y0 + visible_h).ceil().min(self.height as f32) as i32;
        for py in y_start..y_end {
            let v = ((py as f32 + 0.5 - y0) / dest.h).clamp(0.0, 0.999_999);
            let sy = (v * sprite.height as f32) as usize;
            for px in x_start..x_end {
                let mut u = ((px as f32 + 0.5 - x0) / dest.w).clamp(0.0, 0.999_999);
                if blit.flip_x {
                    u = 0.999_999 - u;
                }
                let sx = (u * sprite.width as f32) as usize;
                let argb = sprite.pixels[sy * sprite.width + sx];
                let alpha = (argb >> 24) as f32 / 255.0;
                if alpha <= 0.0 {
                    continue;
                }
                self.put(px, py, Color::from_u32(argb), alpha * blit.opacity, blit.additive);
            }
        }
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: Color) {
        const SCALE: i32 = 2;
        let mut cursor = x as i32;
        let top = y as i32;
        for ch in text.chars() {
            if let Some(rows) = glyph(ch) {
                for (row, bits) in rows.iter().enumerate() {
                    for col in 0..3 {
                        if bits & (0b100 >> col) == 0 {
                            continue;
                        }
                        for dy in 0..SCALE {
                            for dx in 0..SCALE {
                                self.put(
                                    cursor + col * SCALE + dx,
                                    top + row as i32 * SCALE + dy,
                                    color,
                                    1.0,
                                    false,
                                );
                            }
                        }
                    }
                }
            }
            cursor += 4 * SCALE;
        }
    }
}

/// 3x5 bitmap glyphs, top row first.
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'Q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '#' => [0b101, 0b111, 0b101, 0b111, 0b101],
        _ => return None,
    };
    Some(rows)
}
