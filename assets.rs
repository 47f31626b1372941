//! Sprite registry with a background loader.
//!
//! Images are decoded off the frame thread and handed over through a channel;
//! the frame thread calls [`AssetRegistry::poll`] once per frame and draws only
//! slots that are [`AssetSlot::Ready`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::math::Color;
use crate::theme::{Character, CHARACTERS};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset {0} not found")]
    Missing(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("asset loader stopped with {0} assets outstanding")]
    LoaderGone(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetId {
    /// Kart sprite for the character at this index.
    Kart(usize),
    KartLeft,
    KartRight,
    Sky,
    Tree,
    PalmTree,
    BushDry,
    BushGreen,
    Billboard1,
    Billboard2,
    House,
    Well,
    Rock,
    TrafficCar,
    Puddle,
    BoostFlame,
    ImpactLines,
}

impl AssetId {
    pub fn path(&self) -> &'static str {
        match self {
            AssetId::Kart(index) => CHARACTERS.get(*index).unwrap_or(&CHARACTERS[0]).sprite,
            // lean art is named for the side the kart faces, not the turn
            AssetId::KartLeft => "sprites/mario_right.png",
            AssetId::KartRight => "sprites/mario_left.png",
            AssetId::Sky => "sprites/background_forest_moon.png",
            AssetId::Tree => "sprites/tree.png",
            AssetId::PalmTree => "sprites/palm_tree.png",
            AssetId::BushDry => "sprites/bush_dry.png",
            AssetId::BushGreen => "sprites/bush_green.png",
            AssetId::Billboard1 => "sprites/billboard_1.png",
            AssetId::Billboard2 => "sprites/billboard_2.png",
            AssetId::House => "sprites/house.png",
            AssetId::Well => "sprites/well.png",
            AssetId::Rock => "sprites/rock.png",
            AssetId::TrafficCar => "sprites/car_obstacle.png",
            AssetId::Puddle => "sprites/puddle.png",
            AssetId::BoostFlame => "sprites/boost_flame.png",
            AssetId::ImpactLines => "sprites/impact_lines.png",
        }
    }

    /// Everything a race draws.
    pub fn race_set() -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = (0..CHARACTERS.len()).map(AssetId::Kart).collect();
        ids.extend([
            AssetId::KartLeft,
            AssetId::KartRight,
            AssetId::Sky,
            AssetId::Tree,
            AssetId::PalmTree,
            AssetId::BushDry,
            AssetId::BushGreen,
            AssetId::Billboard1,
            AssetId::Billboard2,
            AssetId::House,
            AssetId::Well,
            AssetId::Rock,
            AssetId::TrafficCar,
            AssetId::Puddle,
            AssetId::BoostFlame,
            AssetId::ImpactLines,
        ]);
        ids
    }
}

/// Decoded image, one `0xAARRGGBB` word per pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Sprite {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
}

impl Sprite {
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    fn from_image(image: &image::RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
            })
            .collect();
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            pixels,
        }
    }

    fn paint(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, argb: u32, inside: impl Fn(f32, f32) -> bool) {
        let w = (x1 - x0).max(1) as f32;
        let h = (y1 - y0).max(1) as f32;
        for y in y0.max(0)..y1.min(self.height as i32) {
            for x in x0.max(0)..x1.min(self.width as i32) {
                // unit coordinates within the painted box
                let u = (x - x0) as f32 / w;
                let v = (y - y0) as f32 / h;
                if inside(u, v) {
                    self.pixels[y as usize * self.width + x as usize] = argb;
                }
            }
        }
    }

    fn rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, argb: u32) {
        self.paint(x0, y0, x1, y1, argb, |_, _| true);
    }

    fn ellipse(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, argb: u32) {
        self.paint(x0, y0, x1, y1, argb, |u, v| {
            let (du, dv) = (u - 0.5, v - 0.5);
            du * du + dv * dv <= 0.25
        });
    }

    /// Upward-pointing triangle filling the box.
    fn peak(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, argb: u32) {
        self.paint(x0, y0, x1, y1, argb, |u, v| (u - 0.5).abs() <= v * 0.5);
    }
}

fn opaque(color: Color) -> u32 {
    0xFF00_0000 | color.to_u32()
}

fn kart_sprite(character: &Character, lean: i32) -> Sprite {
    let mut sprite = Sprite::blank(48, 32);
    let body = opaque(character.tint);
    let tyre = 0xFF20_2020;
    sprite.rect(4, 20, 14, 31, tyre);
    sprite.rect(34, 20, 44, 31, tyre);
    sprite.rect(8 + lean * 2, 12, 40 + lean * 2, 26, body);
    sprite.ellipse(16 + lean * 3, 0, 32 + lean * 3, 16, 0xFFF1_C27D);
    sprite.rect(18 + lean * 3, 0, 30 + lean * 3, 5, body);
    sprite
}

/// Simple stand-in art used when an image file is absent.
pub fn fallback_sprite(id: AssetId) -> Option<Sprite> {
    let sprite = match id {
        AssetId::Kart(index) => kart_sprite(CHARACTERS.get(index).unwrap_or(&CHARACTERS[0]), 0),
        AssetId::KartLeft => kart_sprite(&CHARACTERS[0], -1),
        AssetId::KartRight => kart_sprite(&CHARACTERS[0], 1),
        AssetId::Sky => return None,
        AssetId::Tree => {
            let mut s = Sprite::blank(32, 48);
            s.rect(13, 32, 19, 48, 0xFF6D_4C41);
            s.peak(0, 0, 32, 36, 0xFF2E_7D32);
            s
        }
        AssetId::PalmTree => {
            let mut s = Sprite::blank(32, 64);
            s.rect(14, 12, 18, 64, 0xFF8D_6E63);
            s.ellipse(0, 0, 32, 20, 0xFF38_8E3C);
            s
        }
        AssetId::BushDry => {
            let mut s = Sprite::blank(32, 20);
            s.ellipse(0, 0, 32, 20, 0xFFA1_887F);
            s
        }
        AssetId::BushGreen => {
            let mut s = Sprite::blank(32, 20);
            s.ellipse(0, 0, 32, 20, 0xFF43_A047);
            s
        }
        AssetId::Billboard1 | AssetId::Billboard2 => {
            let face = if id == AssetId::Billboard1 { 0xFFFF_F176 } else { 0xFF4F_C3F7 };
            let mut s = Sprite::blank(48, 40);
            s.rect(8, 24, 12, 40, 0xFF55_5555);
            s.rect(36, 24, 40, 40, 0xFF55_5555);
            s.rect(0, 0, 48, 26, face);
            s
        }
        AssetId::House => {
            let mut s = Sprite::blank(48, 40);
            s.peak(0, 0, 48, 16, 0xFFC6_2828);
            s.rect(6, 16, 42, 40, 0xFFD7_CCC8);
            s.rect(20, 26, 28, 40, 0xFF5D_4037);
            s
        }
        AssetId::Well => {
            let mut s = Sprite::blank(24, 24);
            s.rect(2, 12, 22, 24, 0xFF9E_9E9E);
            s.rect(3, 2, 5, 12, 0xFF6D_4C41);
            s.rect(19, 2, 21, 12, 0xFF6D_4C41);
            s.rect(1, 0, 23, 3, 0xFF8D_6E63);
            s
        }
        AssetId::Rock => {
            let mut s = Sprite::blank(24, 20);
            s.ellipse(0, 2, 24, 20, 0xFF75_7575);
            s
        }
        AssetId::TrafficCar => {
            let mut s = Sprite::blank(40, 28);
            s.rect(2, 20, 10, 28, 0xFF20_2020);
            s.rect(30, 20, 38, 28, 0xFF20_2020);
            s.rect(0, 10, 40, 24, 0xFFE5_3935);
            s.rect(8, 0, 32, 11, 0xFFB7_1C1C);
            s.rect(11, 3, 29, 9, 0xFF90_CAF9);
            s
        }
        AssetId::Puddle => {
            let mut s = Sprite::blank(36, 12);
            s.ellipse(0, 0, 36, 12, 0xB042_A5F5);
            s
        }
        AssetId::BoostFlame => {
            let mut s = Sprite::blank(16, 24);
            s.paint(0, 0, 16, 24, 0xFFFF_9800, |u, v| (u - 0.5).abs() <= (1.0 - v) * 0.5);
            s.paint(4, 0, 12, 14, 0xFFFF_EB3B, |u, v| (u - 0.5).abs() <= (1.0 - v) * 0.5);
            s
        }
        AssetId::ImpactLines => {
            let mut s = Sprite::blank(32, 64);
            for k in 0..6 {
                let y = 4 + k * 10;
                s.rect(0, y, 24 - k * 2, y + 2, 0xFFFF_1744);
            }
            s
        }
    };
    Some(sprite)
}

/// Loads `id` from `root`, falling back to generated art when the file is absent.
fn load_one(root: Option<&Path>, id: AssetId) -> Result<Sprite, AssetError> {
    if let Some(root) = root {
        let path = root.join(id.path());
        if path.exists() {
            let image = image::open(&path).map_err(|source| AssetError::Decode {
                path: path.display().to_string(),
                source,
            })?;
            return Ok(Sprite::from_image(&image.to_rgba8()));
        }
    }
    fallback_sprite(id).ok_or_else(|| AssetError::Missing(id.path().to_string()))
}

#[derive(Clone, Debug)]
pub enum AssetSlot {
    Pending,
    Ready(Arc<Sprite>),
    Failed,
}

type LoadResult = (AssetId, Result<Sprite, AssetError>);

pub struct AssetRegistry {
    slots: HashMap<AssetId, AssetSlot>,
    incoming: Option<Receiver<LoadResult>>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl AssetRegistry {
    /// A registry with no loader; every lookup is `Pending` until inserted.
    pub fn empty() -> Self {
        Self {
            slots: HashMap::new(),
            incoming: None,
        }
    }

    /// Starts a loader thread for `ids`, reading files under `root` when given.
    pub fn spawn(root: Option<PathBuf>, ids: Vec<AssetId>) -> Self {
        let (tx, rx) = mpsc::channel();
        let slots = ids.iter().map(|id| (*id, AssetSlot::Pending)).collect();
        thread::spawn(move || {
            for id in ids {
                let result = load_one(root.as_deref(), id);
                if tx.send((id, result)).is_err() {
                    // registry dropped
                    break;
                }
            }
        });
        Self {
            slots,
            incoming: Some(rx),
        }
    }

    fn settle(&mut self, id: AssetId, result: Result<Sprite, AssetError>) {
        let slot = match result {
            Ok(sprite) => {
                tracing::debug!("Loaded {:?} ({}x{})", id, sprite.width, sprite.height);
                AssetSlot::Ready(Arc::new(sprite))
            }
            Err(err) => {
                tracing::warn!("Asset {:?} unavailable: {}", id, err);
                AssetSlot::Failed
            }
        };
        self.slots.insert(id, slot);
    }

    /// Moves finished loads into their slots; returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let mut arrived = Vec::new();
        let mut disconnected = false;
        if let Some(rx) = &self.incoming {
            loop {
                match rx.try_recv() {
                    Ok(item) => arrived.push(item),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            self.incoming = None;
        }
        let count = arrived.len();
        for (id, result) in arrived {
            self.settle(id, result);
        }
        count
    }

    /// Blocks until nothing is pending or `timeout` elapses.
    pub fn block_until_settled(&mut self, timeout: Duration) -> Result<(), AssetError> {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            let Some(rx) = &self.incoming else {
                return Err(AssetError::LoaderGone(self.pending()));
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((id, result)) => self.settle(id, result),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.incoming = None;
                }
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, id: AssetId, sprite: Sprite) {
        self.slots.insert(id, AssetSlot::Ready(Arc::new(sprite)));
    }

    pub fn slot(&self, id: AssetId) -> AssetSlot {
        self.slots.get(&id).cloned().unwrap_or(AssetSlot::Pending)
    }

    /// The sprite for `id`, only once it is ready.
    pub fn get(&self, id: AssetId) -> Option<&Sprite> {
        match self.slots.get(&id) {
            Some(AssetSlot::Ready(sprite)) => Some(sprite.as_ref()),
            _ => None,
        }
    }

    pub fn is_ready(&self, id: AssetId) -> bool {
        self.get(id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, AssetSlot::Pending))
            .count()
    }

    /// Drops every sprite and stops listening to the loader.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.incoming = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_reports_pending() {
        let registry = AssetRegistry::empty();
        assert!(matches!(registry.slot(AssetId::Rock), AssetSlot::Pending));
        assert!(registry.get(AssetId::Rock).is_none());
    }

    #[test]
    fn test_missing_files_fall_back_to_generated_art() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AssetRegistry::spawn(
            Some(dir.path().to_path_buf()),
            vec![AssetId::Rock, AssetId::Kart(3), AssetId::Sky],
        );
        registry.block_until_settled(Duration::from_secs(5)).unwrap();
        assert!(registry.is_ready(AssetId::Rock));
        assert!(registry.is_ready(AssetId::Kart(3)));
        // the sky has a gradient fallback in the renderer instead
        assert!(matches!(registry.slot(AssetId::Sky), AssetSlot::Failed));
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_corrupt_file_marks_slot_failed() {
        let dir = tempfile::tempdir().unwrap();
        let sprites = dir.path().join("sprites");
        std::fs::create_dir_all(&sprites).unwrap();
        std::fs::write(sprites.join("rock.png"), b"not a png").unwrap();
        let mut registry = AssetRegistry::spawn(Some(dir.path().to_path_buf()), vec![AssetId::Rock]);
        registry.block_until_settled(Duration::from_secs(5)).unwrap();
        assert!(matches!(registry.slot(AssetId::Rock), AssetSlot::Failed));
    }

    #[test]
    fn test_png_file_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let sprites = dir.path().join("sprites");
        std::fs::create_dir_all(&sprites).unwrap();
        let mut image = image::RgbaImage::new(3, 2);
        image.put_pixel(1, 0, image::Rgba([255, 0, 0, 255]));
        image.save(sprites.join("tree.png")).unwrap();

        let mut registry = AssetRegistry::spawn(Some(dir.path().to_path_buf()), vec![AssetId::Tree]);
        registry.block_until_settled(Duration::from_secs(5)).unwrap();
        let tree = registry.get(AssetId::Tree).unwrap();
        assert_eq!((tree.width, tree.height), (3, 2));
        assert_eq!(tree.pixels[1], 0xFFFF_0000);
        assert_eq!(tree.pixels[0], 0);
    }

    #[test]
    fn test_clear_drops_sprites() {
        let mut registry = AssetRegistry::empty();
        registry.insert(AssetId::Puddle, Sprite::blank(2, 2));
        assert!(registry.is_ready(AssetId::Puddle));
        registry.clear();
        assert!(!registry.is_ready(AssetId::Puddle));
    }

    #[test]
    fn test_fallbacks_have_visible_pixels() {
        for id in AssetId::race_set() {
            if let Some(sprite) = fallback_sprite(id) {
                assert!(sprite.pixels.iter().any(|p| p >> 24 != 0), "{id:?} is blank");
            }
        }
    }
}
