//! Screen-space overlay drawn after the world: readout, meters, live
//! rankings and the track minimap.

use crate::constants::{MAP_SAMPLE_STRIDE, SEGMENT_LENGTH};
use crate::math::Color;
use crate::net::LiveRanking;
use crate::surface::{Rect, Surface};
use crate::theme::character;
use crate::track::MapPoint;

const GLYPH_ADVANCE: f32 = 8.0;
const LINE_HEIGHT: f32 = 14.0;
const MARGIN: f32 = 10.0;
const BAR_WIDTH: f32 = 160.0;
const BAR_HEIGHT: f32 = 8.0;
const MAP_SIZE: f32 = 120.0;
const MAX_RANK_ROWS: usize = 8;

const PANEL: Color = Color::hex(0x101010);
const TRACK_LINE: Color = Color::hex(0xBDBDBD);
const LOCAL_HIGHLIGHT: Color = Color::hex(0xFFEB3B);
const REMOTE_DOT: Color = Color::hex(0xFF5252);

/// Everything the overlay needs from one engine frame.
pub struct HudSnapshot<'a> {
    pub speed: f32,
    pub max_speed: f32,
    pub nos: f32,
    pub nos_locked: bool,
    pub boosting: bool,
    pub rankings: &'a [LiveRanking],
    pub local_id: &'a str,
    pub map: &'a [MapPoint],
    /// Local racer's distance along the track.
    pub position: f32,
    /// Distances of the other racers.
    pub remote_positions: Vec<f32>,
}

pub fn draw(surface: &mut dyn Surface, hud: &HudSnapshot<'_>) {
    draw_readout(surface, hud);
    draw_meters(surface, hud);
    draw_rankings(surface, hud);
    draw_minimap(surface, hud);
}

fn draw_readout(surface: &mut dyn Surface, hud: &HudSnapshot<'_>) {
    let speed = (hud.speed / 100.0).round().max(0.0) as i32;
    surface.draw_text(MARGIN, MARGIN, &format!("SPEED {}", speed), Color::WHITE);
}

fn nos_color(hud: &HudSnapshot<'_>) -> Color {
    if hud.nos_locked {
        Color::hex(0x757575)
    } else if hud.nos < 10.0 {
        Color::hex(0xE53935)
    } else {
        Color::hex(0x00E5FF)
    }
}

fn draw_bar(surface: &mut dyn Surface, y: f32, fraction: f32, color: Color) {
    surface.fill_rect(Rect::new(MARGIN, y, BAR_WIDTH, BAR_HEIGHT), PANEL);
    let fill = BAR_WIDTH * fraction.clamp(0.0, 1.0);
    if fill > 0.0 {
        surface.fill_rect(Rect::new(MARGIN, y, fill, BAR_HEIGHT), color);
    }
}

fn draw_meters(surface: &mut dyn Surface, hud: &HudSnapshot<'_>) {
    let top = MARGIN + LINE_HEIGHT;
    let speed_fraction = if hud.max_speed > 0.0 { hud.speed / hud.max_speed } else { 0.0 };
    let speed_color = if hud.boosting { Color::hex(0xFF9800) } else { Color::hex(0x66BB6A) };
    draw_bar(surface, top, speed_fraction, speed_color);

    let nos_top = top + BAR_HEIGHT + 6.0;
    let color = nos_color(hud);
    draw_bar(surface, nos_top, hud.nos / 100.0, color);
    let label = format!("NOS {}%", hud.nos.floor().max(0.0) as i32);
    surface.draw_text(MARGIN, nos_top + BAR_HEIGHT + 4.0, &label, color);
}

fn draw_rankings(surface: &mut dyn Surface, hud: &HudSnapshot<'_>) {
    if hud.rankings.is_empty() {
        return;
    }
    let width = surface.width() as f32;
    for (row, entry) in hud.rankings.iter().take(MAX_RANK_ROWS).enumerate() {
        let name = character(&entry.character_id).name.to_uppercase();
        let text = format!("#{} {}", entry.rank, name);
        let x = width - MARGIN - text.chars().count() as f32 * GLYPH_ADVANCE;
        let color = if entry.id == hud.local_id { LOCAL_HIGHLIGHT } else { Color::WHITE };
        surface.draw_text(x, MARGIN + row as f32 * LINE_HEIGHT, &text, color);
    }
}

/// Point on the sampled footprint for a distance along the track.
fn map_point_at(map: &[MapPoint], z: f32) -> Option<MapPoint> {
    let last = map.len().checked_sub(1)?;
    let sample = (z.max(0.0) / SEGMENT_LENGTH / MAP_SAMPLE_STRIDE as f32).min(last as f32);
    let i = sample.floor() as usize;
    let next = (i + 1).min(last);
    let t = sample - i as f32;
    Some(MapPoint {
        x: map[i].x + (map[next].x - map[i].x) * t,
        z: map[i].z + (map[next].z - map[i].z) * t,
    })
}

fn draw_minimap(surface: &mut dyn Surface, hud: &HudSnapshot<'_>) {
    if hud.map.len() < 2 {
        return;
    }
    let (w, h) = (surface.width() as f32, surface.height() as f32);
    let frame = Rect::new(w - MAP_SIZE - MARGIN, h - MAP_SIZE - MARGIN, MAP_SIZE, MAP_SIZE);
    surface.fill_rect(frame, PANEL);

    let (mut min_x, mut max_x, mut min_z, mut max_z) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
    for p in hud.map {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_z = min_z.min(p.z);
        max_z = max_z.max(p.z);
    }
    let span = (max_x - min_x).max(max_z - min_z).max(1.0);
    let inner = MAP_SIZE - 12.0;
    let to_screen = |p: MapPoint| {
        (
            frame.x + 6.0 + (p.x - min_x) / span * inner,
            frame.bottom() - 6.0 - (p.z - min_z) / span * inner,
        )
    };

    for p in hud.map {
        let (x, y) = to_screen(*p);
        surface.fill_rect(Rect::new(x - 1.0, y - 1.0, 2.0, 2.0), TRACK_LINE);
    }
    for z in &hud.remote_positions {
        if let Some(p) = map_point_at(hud.map, *z) {
            let (x, y) = to_screen(p);
            surface.fill_rect(Rect::new(x - 2.0, y - 2.0, 4.0, 4.0), REMOTE_DOT);
        }
    }
    if let Some(p) = map_point_at(hud.map, hud.position) {
        let (x, y) = to_screen(p);
        surface.fill_rect(Rect::new(x - 3.0, y - 3.0, 6.0, 6.0), LOCAL_HIGHLIGHT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::recording::{DrawCall, RecordingSurface};

    fn snapshot<'a>(rankings: &'a [LiveRanking], map: &'a [MapPoint]) -> HudSnapshot<'a> {
        HudSnapshot {
            speed: 5000.0,
            max_speed: 10000.0,
            nos: 100.0,
            nos_locked: false,
            boosting: false,
            rankings,
            local_id: "me",
            map,
            position: 0.0,
            remote_positions: Vec::new(),
        }
    }

    fn texts(surface: &RecordingSurface) -> Vec<String> {
        surface
            .calls
            .iter()
            .filter_map(|call| match call {
                DrawCall::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_readout_comes_first() {
        let mut surface = RecordingSurface::new(320, 200);
        draw(&mut surface, &snapshot(&[], &[]));
        let texts = texts(&surface);
        assert_eq!(texts[0], "SPEED 50");
        assert!(texts.contains(&"NOS 100%".to_string()));
    }

    #[test]
    fn test_locked_nos_is_grey() {
        let mut surface = RecordingSurface::new(320, 200);
        let mut hud = snapshot(&[], &[]);
        hud.nos = 5.0;
        hud.nos_locked = true;
        draw_meters(&mut surface, &hud);
        let grey = Color::hex(0x757575);
        assert!(surface
            .calls
            .iter()
            .any(|call| matches!(call, DrawCall::Rect(_, c) if *c == grey)));
    }

    #[test]
    fn test_rankings_list_character_names() {
        let rankings = vec![
            LiveRanking { id: "other".into(), z: 900.0, character_id: "luigi".into(), rank: 1 },
            LiveRanking { id: "me".into(), z: 100.0, character_id: "peach".into(), rank: 2 },
        ];
        let mut surface = RecordingSurface::new(320, 200);
        draw_rankings(&mut surface, &snapshot(&rankings, &[]));
        assert_eq!(texts(&surface), vec!["#1 LUIGI", "#2 PEACH"]);
    }

    #[test]
    fn test_map_point_interpolates_between_samples() {
        let map = [MapPoint { x: 0.0, z: 0.0 }, MapPoint { x: 10.0, z: 20.0 }];
        let stride = SEGMENT_LENGTH * MAP_SAMPLE_STRIDE as f32;
        let mid = map_point_at(&map, stride / 2.0).unwrap();
        assert!((mid.x - 5.0).abs() < 1e-3 && (mid.z - 10.0).abs() < 1e-3);
        let past_end = map_point_at(&map, stride * 10.0).unwrap();
        assert_eq!(past_end, map[1]);
        assert!(map_point_at(&[], 0.0).is_none());
    }

    #[test]
    fn test_minimap_skipped_without_map() {
        let mut surface = RecordingSurface::new(320, 200);
        draw_minimap(&mut surface, &snapshot(&[], &[]));
        assert!(surface.calls.is_empty());
    }
}
