use crate::math::Color;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Palette {
    pub road_light: Color,
    pub road_dark: Color,
    pub grass_light: Color,
    pub grass_dark: Color,
    pub rumble_light: Color,
    pub rumble_dark: Color,
    pub sky_top: Color,
    pub sky_bottom: Color,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapTheme {
    pub id: &'static str,
    pub name: &'static str,
    pub palette: Palette,
    /// Painted sky image replaces the gradient once loaded.
    pub sky_image: bool,
}

pub const MAPS: [MapTheme; 3] = [
    MapTheme {
        id: "sawit-plants",
        name: "Sawit Plants",
        palette: Palette {
            road_light: Color::hex(0x8B5A2B),
            road_dark: Color::hex(0x6F4221),
            grass_light: Color::hex(0x105110),
            grass_dark: Color::hex(0x004600),
            rumble_light: Color::hex(0x4B2D16),
            rumble_dark: Color::hex(0x3B1E08),
            sky_top: Color::hex(0x7EC0EE),
            sky_bottom: Color::hex(0xB3E5FC),
        },
        sky_image: true,
    },
    MapTheme {
        id: "jakarta-streets",
        name: "Jakarta City Streets",
        palette: Palette {
            road_light: Color::hex(0x808080),
            road_dark: Color::hex(0x606060),
            grass_light: Color::hex(0x404040),
            grass_dark: Color::hex(0x303030),
            rumble_light: Color::hex(0xFFD700),
            rumble_dark: Color::hex(0x000000),
            sky_top: Color::hex(0x263238),
            sky_bottom: Color::hex(0x37474F),
        },
        sky_image: false,
    },
    MapTheme {
        id: "alien-land",
        name: "Alien Land",
        palette: Palette {
            road_light: Color::hex(0x1565C0),
            road_dark: Color::hex(0x0D47A1),
            grass_light: Color::hex(0x7B1FA2),
            grass_dark: Color::hex(0x4A148C),
            rumble_light: Color::hex(0x00E5FF),
            rumble_dark: Color::hex(0xFF00E6),
            sky_top: Color::hex(0x000000),
            sky_bottom: Color::hex(0x1A237E),
        },
        sky_image: false,
    },
];

/// Looks a map up by id, falling back to the first map.
pub fn map_theme(id: &str) -> &'static MapTheme {
    MAPS.iter().find(|map| map.id == id).unwrap_or(&MAPS[0])
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Character {
    pub id: &'static str,
    pub name: &'static str,
    pub sprite: &'static str,
    /// Dedicated left/right lean sprites exist for this character.
    pub lean_sprites: bool,
    pub tint: Color,
}

pub const CHARACTERS: [Character; 8] = [
    Character { id: "mario", name: "Mario", sprite: "characters/mario.png", lean_sprites: true, tint: Color::hex(0xE53935) },
    Character { id: "luigi", name: "Luigi", sprite: "characters/luigi.png", lean_sprites: false, tint: Color::hex(0x43A047) },
    Character { id: "peach", name: "Peach", sprite: "characters/peach.png", lean_sprites: false, tint: Color::hex(0xF48FB1) },
    Character { id: "toad", name: "Toad", sprite: "characters/toad.png", lean_sprites: false, tint: Color::hex(0xF5F5F5) },
    Character { id: "bowser", name: "Bowser", sprite: "characters/bowser-pixel.png", lean_sprites: false, tint: Color::hex(0xF9A825) },
    Character { id: "yoshi", name: "Yoshi", sprite: "characters/yoshi.png", lean_sprites: false, tint: Color::hex(0x7CB342) },
    Character { id: "wario", name: "Wario", sprite: "characters/wario-pixel.png", lean_sprites: false, tint: Color::hex(0xFDD835) },
    Character { id: "waluigi", name: "Waluigi", sprite: "characters/waluigi-pixel.png", lean_sprites: false, tint: Color::hex(0x8E24AA) },
];

/// Looks a character up by id, falling back to the first character.
pub fn character(id: &str) -> &'static Character {
    CHARACTERS.iter().find(|c| c.id == id).unwrap_or(&CHARACTERS[0])
}

pub fn character_index(id: &str) -> usize {
    CHARACTERS.iter().position(|c| c.id == id).unwrap_or(0)
}
