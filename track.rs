//! Procedural track model.
//!
//! A track is a closed ring of fixed-length segments. Sections of straight,
//! curve and hill ease their curvature and elevation in and out, a flat finish
//! straight closes the race, and roadside scenery is scattered with a stateless
//! hash of the segment index.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CHECKPOINT_FIRST, CHECKPOINT_STRIDE, FINISH_STRAIGHT, MAP_HEADING_GAIN, MAP_SAMPLE_STRIDE,
    ROAD_WIDTH, SEGMENT_LENGTH, START_BAND,
};
use crate::math::{ease_in, ease_in_out, scatter_hash, wrap, Color, Vec3};
use crate::theme::Palette;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown difficulty tier '{0}' (expected easy, medium or hard)")]
pub struct UnknownDifficulty(pub String);

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(UnknownDifficulty(other.to_string())),
        }
    }
}

/// Section lengths in segments.
mod length {
    pub const SHORT: usize = 25;
    pub const LONG: usize = 100;
}

mod curve {
    pub const EASY: f32 = 1.0;
    pub const MEDIUM: f32 = 2.0;
    pub const HARD: f32 = 3.0;
}

/// Hill heights in segment lengths.
mod hill {
    pub const LOW: f32 = 20.0;
    pub const HIGH: f32 = 60.0;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Section {
    pub enter: usize,
    pub hold: usize,
    pub leave: usize,
    pub curve: f32,
    pub hill: f32,
}

impl Section {
    pub fn new(enter: usize, hold: usize, leave: usize, curve: f32, hill: f32) -> Self {
        Self {
            enter,
            hold,
            leave,
            curve,
            hill,
        }
    }

    pub fn straight(length: usize) -> Self {
        Self::new(length, length, length, 0.0, 0.0)
    }

    pub fn len(&self) -> usize {
        self.enter + self.hold + self.leave
    }
}

/// Fixed section catalog for a tier. `first_turn` is +1 or -1 and sets the
/// direction of the first curve; later curves alternate.
pub fn catalog(difficulty: Difficulty, first_turn: f32) -> Vec<Section> {
    let turn = |i: usize| if i % 2 == 0 { first_turn } else { -first_turn };
    let rise = |i: usize| match i % 3 {
        0 => 1.0,
        1 => -1.0,
        _ => 0.0,
    };

    let mut sections = vec![Section::straight(length::LONG)];
    match difficulty {
        Difficulty::Easy => {
            for i in 0..15 {
                sections.push(Section::new(
                    length::LONG,
                    length::LONG,
                    length::LONG,
                    turn(i) * curve::EASY,
                    0.0,
                ));
            }
        }
        Difficulty::Medium => {
            for i in 0..10 {
                sections.push(Section::new(
                    length::LONG,
                    length::LONG,
                    length::LONG,
                    turn(i) * curve::MEDIUM,
                    rise(i) * hill::LOW,
                ));
                sections.push(Section::straight(length::SHORT));
            }
        }
        Difficulty::Hard => {
            for i in 0..20 {
                sections.push(Section::new(
                    length::LONG,
                    length::LONG,
                    length::LONG,
                    turn(i) * curve::HARD,
                    rise(i) * hill::HIGH,
                ));
                sections.push(Section::straight(length::SHORT));
            }
        }
    }
    sections
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    /// Road half-width in pixels.
    pub w: f32,
}

/// One transverse edge of a segment. `camera` and `screen` are per-frame
/// scratch values overwritten by every projection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentPoint {
    pub world: Vec3,
    pub camera: Vec3,
    pub screen: ScreenPoint,
}

impl SegmentPoint {
    fn at(y: f32, z: f32) -> Self {
        Self {
            world: Vec3::new(0.0, y, z),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentColor {
    pub road: Color,
    pub grass: Color,
    pub rumble: Color,
    /// Lane stripes are skipped on segments without one.
    pub lane: Option<Color>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scenery {
    BushDry,
    BushGreen,
    Tree,
    PalmTree,
    Billboard1,
    Billboard2,
    House,
    Well,
}

/// Static roadside decoration attached to a segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decoration {
    pub kind: Scenery,
    /// Lateral position in road half-widths; ±1.0 is the road edge.
    pub offset: f32,
    /// Sprite height in world units.
    pub height: f32,
    /// Horizontal anchor as a fraction of sprite width: 0 puts the left edge
    /// at `offset`, -1 the right edge, -0.5 centres it.
    pub anchor: f32,
    /// Fraction of the height the sprite sinks below the ground line.
    pub sink: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub p1: SegmentPoint,
    pub p2: SegmentPoint,
    pub curve: f32,
    pub color: SegmentColor,
    /// Screen row of the nearest road drawn before this segment.
    pub clip: f32,
    pub checkpoint: bool,
    pub sprites: Vec<Decoration>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapPoint {
    pub x: f32,
    pub z: f32,
}

fn segment_color(index: usize, palette: &Palette) -> SegmentColor {
    if index < START_BAND {
        return SegmentColor {
            road: Color::WHITE,
            grass: palette.grass_light,
            rumble: Color::WHITE,
            lane: Some(Color::hex(0xFF0000)),
        };
    }
    if (index / 3) % 2 == 1 {
        SegmentColor {
            road: palette.road_dark,
            grass: palette.grass_dark,
            rumble: palette.rumble_dark,
            lane: Some(palette.rumble_dark),
        }
    } else {
        SegmentColor {
            road: palette.road_light,
            grass: palette.grass_light,
            rumble: palette.rumble_light,
            lane: Some(palette.rumble_light),
        }
    }
}

struct TrackBuilder<'a> {
    segments: Vec<Segment>,
    palette: &'a Palette,
    last_y: f32,
}

impl<'a> TrackBuilder<'a> {
    fn new(palette: &'a Palette) -> Self {
        Self {
            segments: Vec::new(),
            palette,
            last_y: 0.0,
        }
    }

    fn add_segment(&mut self, curve: f32, y: f32) {
        let n = self.segments.len();
        self.segments.push(Segment {
            index: n,
            p1: SegmentPoint::at(self.last_y, n as f32 * SEGMENT_LENGTH),
            p2: SegmentPoint::at(y, (n + 1) as f32 * SEGMENT_LENGTH),
            curve,
            color: segment_color(n, self.palette),
            clip: 0.0,
            checkpoint: false,
            sprites: Vec::new(),
        });
        self.last_y = y;
    }

    fn add_section(&mut self, section: Section) {
        let start_y = self.last_y;
        let end_y = start_y + section.hill * SEGMENT_LENGTH;
        let total = section.len() as f32;
        let elevation = |step: usize| ease_in_out(start_y, end_y, step as f32 / total);

        for n in 0..section.enter {
            let curve = ease_in(0.0, section.curve, n as f32 / section.enter as f32);
            self.add_segment(curve, elevation(n));
        }
        for n in 0..section.hold {
            self.add_segment(section.curve, elevation(section.enter + n));
        }
        for n in 0..section.leave {
            let curve = ease_in_out(section.curve, 0.0, n as f32 / section.leave as f32);
            self.add_segment(curve, elevation(section.enter + section.hold + n));
        }
    }

    fn finish(mut self) -> Vec<Segment> {
        for _ in 0..FINISH_STRAIGHT {
            let y = self.last_y;
            self.add_segment(0.0, y);
        }
        for i in (CHECKPOINT_FIRST..self.segments.len()).step_by(CHECKPOINT_STRIDE) {
            self.segments[i].checkpoint = true;
        }
        for segment in self.segments.iter_mut() {
            segment.sprites = scatter_scenery(segment.index);
        }
        self.segments
    }
}

fn roadside(kind: Scenery, right: bool, distance: f32, height: f32, sink: f32) -> Decoration {
    let offset = 1.0 + distance / ROAD_WIDTH;
    Decoration {
        kind,
        offset: if right { offset } else { -offset },
        height,
        anchor: if right { 0.0 } else { -1.0 },
        sink,
    }
}

/// Deterministic scenery for one segment.
fn scatter_scenery(index: usize) -> Vec<Decoration> {
    let hash = |salt: u32| scatter_hash(index, salt);
    let mut sprites = Vec::new();

    if index % 5 == 0 {
        let right = index % 10 == 0;
        sprites.push(Decoration {
            kind: if right { Scenery::BushDry } else { Scenery::BushGreen },
            offset: if right { 1.5 } else { -1.5 },
            height: 500.0,
            anchor: -0.5,
            sink: 0.0,
        });
    }

    if hash(100) > 0.9 {
        let side = hash(70);
        if side > 0.3 {
            sprites.push(roadside(Scenery::Tree, true, 400.0 + hash(60) * 800.0, 1500.0, 0.0));
        }
        if side < 0.7 {
            sprites.push(roadside(Scenery::Tree, false, 400.0 + hash(80) * 800.0, 1500.0, 0.0));
        }
    }

    if hash(500) > 0.85 {
        let kind = if hash(530) > 0.5 { Scenery::BushDry } else { Scenery::BushGreen };
        sprites.push(roadside(kind, hash(510) > 0.5, 100.0 + hash(520) * 300.0, 400.0, 0.0));
    }

    if hash(700) > 0.98 {
        let kind = if hash(730) > 0.5 { Scenery::Billboard1 } else { Scenery::Billboard2 };
        sprites.push(roadside(kind, hash(710) > 0.5, 200.0 + hash(720) * 400.0, 2000.0, 0.0));
    }

    if hash(800) > 0.98 {
        let distance = 300.0 + hash(820) * 500.0;
        let right = hash(810) > 0.5;
        if hash(830) > 0.5 {
            sprites.push(roadside(Scenery::House, right, distance, 2500.0, 0.15));
        } else {
            sprites.push(roadside(Scenery::Well, right, distance, 800.0, 0.0));
        }
    }

    // three palm layers, near to far
    let layers = [
        (900, 0.85, 2000.0, 800.0),
        (1000, 0.60, 1800.0, 1500.0),
        (1100, 0.40, 2400.0, 3000.0),
    ];
    for (salt, threshold, height, reach) in layers {
        if hash(salt) > threshold {
            let distance = reach + hash(salt + 20) * reach;
            sprites.push(roadside(Scenery::PalmTree, hash(salt + 10) > 0.5, distance, height, 0.0));
        }
    }

    sprites
}

#[derive(Clone, Debug)]
pub struct Track {
    segments: Vec<Segment>,
    difficulty: Difficulty,
    map_data: Vec<MapPoint>,
}

impl Track {
    /// Builds a track for `difficulty`; the first curve direction is a coin
    /// flip from `rng`.
    pub fn generate<R: Rng + ?Sized>(difficulty: Difficulty, palette: &Palette, rng: &mut R) -> Self {
        let first_turn = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        Self::from_sections(difficulty, palette, &catalog(difficulty, first_turn))
    }

    pub fn generate_seeded(difficulty: Difficulty, palette: &Palette, seed: u64) -> Self {
        Self::generate(difficulty, palette, &mut StdRng::seed_from_u64(seed))
    }

    pub fn from_sections(difficulty: Difficulty, palette: &Palette, sections: &[Section]) -> Self {
        let mut builder = TrackBuilder::new(palette);
        for section in sections {
            builder.add_section(*section);
        }
        let segments = builder.finish();
        let map_data = trace_map(&segments);
        tracing::debug!(
            "Generated {} track: {} segments, length {}",
            difficulty,
            segments.len(),
            segments.len() as f32 * SEGMENT_LENGTH
        );
        Self {
            segments,
            difficulty,
            map_data,
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn length(&self) -> f32 {
        self.segments.len() as f32 * SEGMENT_LENGTH
    }

    /// Index of the segment under `z`, for any `z`.
    pub fn segment_index(&self, z: f32) -> usize {
        let count = self.segments.len();
        if count == 0 {
            return 0;
        }
        ((wrap(z, self.length()) / SEGMENT_LENGTH).floor() as usize) % count
    }

    pub fn find_segment(&self, z: f32) -> &Segment {
        &self.segments[self.segment_index(z)]
    }

    /// The last segment, painted as the checkered finish band. The race ends
    /// at the far edge of this band rather than partway down the straight.
    pub fn finish_index(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    pub fn map_data(&self) -> &[MapPoint] {
        &self.map_data
    }

    /// Re-colours every segment for a new palette; geometry is untouched.
    pub fn repaint(&mut self, palette: &Palette) {
        for segment in self.segments.iter_mut() {
            segment.color = segment_color(segment.index, palette);
        }
    }
}

/// Integrates heading over the ring into a coarse 2D footprint.
fn trace_map(segments: &[Segment]) -> Vec<MapPoint> {
    let mut points = Vec::with_capacity(segments.len() / MAP_SAMPLE_STRIDE + 1);
    let (mut x, mut z, mut angle) = (0.0f32, 0.0f32, 0.0f32);
    for (i, segment) in segments.iter().enumerate() {
        angle -= segment.curve * MAP_HEADING_GAIN;
        x += angle.sin();
        z += angle.cos();
        if i % MAP_SAMPLE_STRIDE == 0 {
            points.push(MapPoint { x, z });
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::MAPS;

    fn track(difficulty: Difficulty) -> Track {
        Track::generate_seeded(difficulty, &MAPS[0].palette, 7)
    }

    #[test]
    fn test_segment_counts_per_tier() {
        assert_eq!(track(Difficulty::Easy).segment_count(), 300 + 15 * 300 + 50);
        assert_eq!(track(Difficulty::Medium).segment_count(), 300 + 10 * 375 + 50);
        assert_eq!(track(Difficulty::Hard).segment_count(), 300 + 20 * 375 + 50);
    }

    #[test]
    fn test_ring_closure_for_any_z() {
        let track = track(Difficulty::Easy);
        let length = track.length();
        let count = track.segment_count();
        let samples = [
            0.0,
            199.9,
            200.0,
            length - 1.0,
            length,
            length * 3.0 + 450.0,
            -1.0,
            -200.0,
            -length * 2.5,
            12_345_678.0,
        ];
        for z in samples {
            let expected = ((z.rem_euclid(length) / SEGMENT_LENGTH).floor() as usize) % count;
            assert_eq!(track.find_segment(z).index, expected, "z = {}", z);
        }
        assert_eq!(track.find_segment(-1.0).index, count - 1);
        assert_eq!(track.find_segment(length).index, 0);
    }

    #[test]
    fn test_segments_are_contiguous() {
        let track = track(Difficulty::Hard);
        for pair in track.segments().windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].p1.world.y, pair[0].p2.world.y);
            assert_eq!(pair[1].p1.world.z, pair[0].p2.world.z);
        }
    }

    #[test]
    fn test_finish_straight_is_flat() {
        let track = track(Difficulty::Hard);
        let segments = track.segments();
        let tail = &segments[segments.len() - FINISH_STRAIGHT..];
        let y = tail[0].p1.world.y;
        for segment in tail {
            assert_eq!(segment.curve, 0.0);
            assert_eq!(segment.p2.world.y, y);
        }
    }

    #[test]
    fn test_easy_track_has_no_hills() {
        let track = track(Difficulty::Easy);
        assert!(track.segments().iter().all(|s| s.p2.world.y == 0.0));
        assert!(track.segments().iter().any(|s| s.curve != 0.0));
    }

    #[test]
    fn test_curves_alternate_direction() {
        let sections = catalog(Difficulty::Medium, -1.0);
        let curves: Vec<f32> = sections.iter().map(|s| s.curve).filter(|c| *c != 0.0).collect();
        assert_eq!(curves.len(), 10);
        assert_eq!(curves[0], -2.0);
        for pair in curves.windows(2) {
            assert_eq!(pair[0], -pair[1]);
        }
    }

    #[test]
    fn test_checkpoint_stride() {
        let track = track(Difficulty::Easy);
        for segment in track.segments() {
            let expected = segment.index >= CHECKPOINT_FIRST
                && (segment.index - CHECKPOINT_FIRST) % CHECKPOINT_STRIDE == 0;
            assert_eq!(segment.checkpoint, expected, "segment {}", segment.index);
        }
    }

    #[test]
    fn test_colors_alternate_every_three_segments() {
        let palette = &MAPS[1].palette;
        let track = Track::generate_seeded(Difficulty::Easy, palette, 1);
        let segments = track.segments();
        assert_eq!(segments[0].color.road, Color::WHITE);
        assert_eq!(segments[4].color.road, Color::WHITE);
        assert_eq!(segments[5].color.road, palette.road_dark);
        assert_eq!(segments[6].color.road, palette.road_light);
        assert_eq!(segments[9].color.road, palette.road_dark);
        assert_eq!(segments[12].color.road, palette.road_light);
    }

    #[test]
    fn test_every_segment_carries_lane_stripes_in_its_rumble_colour() {
        let palette = &MAPS[0].palette;
        let track = Track::generate_seeded(Difficulty::Easy, palette, 1);
        let segments = track.segments();
        assert_eq!(segments[0].color.lane, Some(Color::hex(0xFF0000)));
        assert_eq!(segments[5].color.lane, Some(palette.rumble_dark));
        assert_eq!(segments[6].color.lane, Some(palette.rumble_light));
    }

    #[test]
    fn test_repaint_keeps_geometry() {
        let mut track = track(Difficulty::Medium);
        let before: Vec<_> = track.segments().iter().map(|s| (s.curve, s.p2.world)).collect();
        track.repaint(&MAPS[2].palette);
        let after: Vec<_> = track.segments().iter().map(|s| (s.curve, s.p2.world)).collect();
        assert_eq!(before, after);
        assert_eq!(track.segments()[100].color.grass, MAPS[2].palette.grass_dark);
    }

    #[test]
    fn test_scenery_is_reproducible() {
        let a = Track::generate_seeded(Difficulty::Easy, &MAPS[0].palette, 1);
        let b = Track::generate_seeded(Difficulty::Easy, &MAPS[0].palette, 99);
        for (sa, sb) in a.segments().iter().zip(b.segments()) {
            assert_eq!(sa.sprites, sb.sprites);
        }
        assert_eq!(a.segments()[10].sprites[0].kind, Scenery::BushDry);
        assert_eq!(a.segments()[15].sprites[0].kind, Scenery::BushGreen);
    }

    #[test]
    fn test_map_data_sampled_every_fifth_segment() {
        let track = track(Difficulty::Easy);
        let expected = (track.segment_count() + MAP_SAMPLE_STRIDE - 1) / MAP_SAMPLE_STRIDE;
        assert_eq!(track.map_data().len(), expected);
        // first long straight heads straight down +z
        assert_eq!(track.map_data()[1].x, 0.0);
        assert!((track.map_data()[1].z - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_difficulty_parses_wire_names() {
        assert_eq!("hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("insane".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::Medium.to_string(), "medium");
    }
}
