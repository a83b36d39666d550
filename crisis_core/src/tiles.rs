use std::hash::Hasher;

use bevy::math::UVec2;
use thiserror::Error;

use crate::hashing::StateDigest;
use crate::variables::{CrisisCategory, CrisisId, LookupError};

/// Terrain of a playable tile, taken from the map's biome layer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Biome {
    Grassland,
    Forest,
    Desert,
    Mountain,
    Wetland,
    Tundra,
    Urban,
}

impl Biome {
    pub const ALL: [Biome; 7] = [
        Biome::Grassland,
        Biome::Forest,
        Biome::Desert,
        Biome::Mountain,
        Biome::Wetland,
        Biome::Tundra,
        Biome::Urban,
    ];

    pub fn from_char(glyph: char) -> Option<Self> {
        match glyph {
            'g' => Some(Biome::Grassland),
            'f' => Some(Biome::Forest),
            'd' => Some(Biome::Desert),
            'm' => Some(Biome::Mountain),
            'w' => Some(Biome::Wetland),
            't' => Some(Biome::Tundra),
            'u' => Some(Biome::Urban),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Biome::Grassland => 'g',
            Biome::Forest => 'f',
            Biome::Desert => 'd',
            Biome::Mountain => 'm',
            Biome::Wetland => 'w',
            Biome::Tundra => 't',
            Biome::Urban => 'u',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FootprintEntry {
    pub crisis: CrisisId,
    pub category: CrisisCategory,
}

/// A playable map cell and the crises currently affecting it, in assignment order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub position: UVec2,
    pub biome: Biome,
    footprint: Vec<FootprintEntry>,
}

impl Tile {
    pub fn new(position: UVec2, biome: Biome) -> Self {
        Self {
            position,
            biome,
            footprint: Vec::new(),
        }
    }

    pub fn footprint(&self) -> &[FootprintEntry] {
        &self.footprint
    }

    pub fn contains(&self, crisis: CrisisId) -> bool {
        self.footprint.iter().any(|entry| entry.crisis == crisis)
    }

    /// Distinct categories on the tile, first assigned first.
    pub fn glyph_categories(&self) -> Vec<CrisisCategory> {
        let mut categories = Vec::new();
        for entry in &self.footprint {
            if !categories.contains(&entry.category) {
                categories.push(entry.category);
            }
        }
        categories
    }

    /// The glyph drawn when only one marker fits: the earliest assigned category.
    pub fn visible_glyph(&self) -> Option<CrisisCategory> {
        self.footprint.first().map(|entry| entry.category)
    }
}

/// Map collaborator the region expander works against.
pub trait TileMap {
    fn dimensions(&self) -> UVec2;
    /// `None` for out-of-bounds positions and null (non-playable) cells.
    fn tile(&self, position: UVec2) -> Option<&Tile>;
    /// Playable 4-neighbours of `position`.
    fn neighbors(&self, position: UVec2) -> Vec<UVec2>;
    /// Every playable position in row-major order.
    fn playable_positions(&self) -> Vec<UVec2>;
    fn total_playable(&self) -> usize;
    fn set_footprint(
        &mut self,
        position: UVec2,
        footprint: Vec<FootprintEntry>,
    ) -> Result<(), LookupError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("map has no rows")]
    Empty,
    #[error("row {row} has width {found}, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown biome glyph {glyph:?} at ({x}, {y})")]
    UnknownGlyph { glyph: char, x: usize, y: usize },
}

/// Fixed-size grid of optional tiles addressed by `(x, y)`.
#[derive(Debug, Clone)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tiles: Vec<Option<Tile>>,
    playable: usize,
}

impl TileGrid {
    pub fn from_layer(width: u32, height: u32, layer: impl Fn(UVec2) -> Option<Biome>) -> Self {
        let mut tiles = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let position = UVec2::new(x, y);
                tiles.push(layer(position).map(|biome| Tile::new(position, biome)));
            }
        }
        let playable = tiles.iter().filter(|tile| tile.is_some()).count();
        Self {
            width,
            height,
            tiles,
            playable,
        }
    }

    /// Parses one row per string; biome glyphs are playable, `.` is a null cell.
    pub fn from_ascii(rows: &[&str]) -> Result<Self, GridError> {
        let expected = rows.first().ok_or(GridError::Empty)?.chars().count();
        let mut layer = Vec::with_capacity(expected * rows.len());
        for (y, row) in rows.iter().enumerate() {
            let found = row.chars().count();
            if found != expected {
                return Err(GridError::RaggedRow {
                    row: y,
                    expected,
                    found,
                });
            }
            for (x, glyph) in row.chars().enumerate() {
                let biome = match glyph {
                    '.' => None,
                    other => Some(
                        Biome::from_char(other)
                            .ok_or(GridError::UnknownGlyph { glyph: other, x, y })?,
                    ),
                };
                layer.push(biome);
            }
        }
        let width = expected as u32;
        Ok(Self::from_layer(width, rows.len() as u32, |position| {
            layer[(position.y * width + position.x) as usize]
        }))
    }

    /// Deterministic pseudo-random biome layer; roughly `water_ratio` of the
    /// cells become null.
    pub fn procedural(width: u32, height: u32, seed: u64, water_ratio: f32) -> Self {
        let water_ratio = water_ratio.clamp(0.0, 1.0) as f64;
        Self::from_layer(width, height, |position| {
            let mut digest = StateDigest::new();
            digest.write_u64(seed);
            digest.write_u32(position.x);
            digest.write_u32(position.y);
            let hash = digest.finish();
            let roll = (hash >> 11) as f64 / (1u64 << 53) as f64;
            if roll < water_ratio {
                None
            } else {
                Some(Biome::ALL[(hash % Biome::ALL.len() as u64) as usize])
            }
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, position: UVec2) -> Option<usize> {
        if position.x < self.width && position.y < self.height {
            Some((position.y * self.width + position.x) as usize)
        } else {
            None
        }
    }

    /// Like [`TileMap::tile`] but tells out-of-bounds and null cells apart.
    pub fn lookup(&self, position: UVec2) -> Result<&Tile, LookupError> {
        let idx = self.index(position).ok_or(LookupError::OutOfBounds {
            x: position.x,
            y: position.y,
        })?;
        self.tiles[idx].as_ref().ok_or(LookupError::NullTile {
            x: position.x,
            y: position.y,
        })
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter().flatten()
    }

    /// Positions currently carrying `crisis`, row-major.
    pub fn crisis_tiles(&self, crisis: CrisisId) -> Vec<UVec2> {
        self.tiles()
            .filter(|tile| tile.contains(crisis))
            .map(|tile| tile.position)
            .collect()
    }

    pub fn clear_footprints(&mut self) {
        for tile in self.tiles.iter_mut().flatten() {
            tile.footprint.clear();
        }
    }

    /// One character per cell: the visible category glyph, else the biome, `.` for null.
    pub fn render_glyphs(&self) -> String {
        let mut out = String::with_capacity(((self.width + 1) * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let glyph = match self.tile(UVec2::new(x, y)) {
                    Some(tile) => tile
                        .visible_glyph()
                        .map(CrisisCategory::glyph)
                        .unwrap_or_else(|| tile.biome.as_char()),
                    None => '.',
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}

impl TileMap for TileGrid {
    fn dimensions(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    fn tile(&self, position: UVec2) -> Option<&Tile> {
        self.index(position)
            .and_then(|idx| self.tiles[idx].as_ref())
    }

    fn neighbors(&self, position: UVec2) -> Vec<UVec2> {
        let mut out = Vec::with_capacity(4);
        let candidates = [
            position.x.checked_sub(1).map(|x| UVec2::new(x, position.y)),
            Some(UVec2::new(position.x + 1, position.y)),
            position.y.checked_sub(1).map(|y| UVec2::new(position.x, y)),
            Some(UVec2::new(position.x, position.y + 1)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if self.tile(candidate).is_some() {
                out.push(candidate);
            }
        }
        out
    }

    fn playable_positions(&self) -> Vec<UVec2> {
        self.tiles().map(|tile| tile.position).collect()
    }

    fn total_playable(&self) -> usize {
        self.playable
    }

    fn set_footprint(
        &mut self,
        position: UVec2,
        footprint: Vec<FootprintEntry>,
    ) -> Result<(), LookupError> {
        let idx = self.index(position).ok_or(LookupError::OutOfBounds {
            x: position.x,
            y: position.y,
        })?;
        let tile = self.tiles[idx].as_mut().ok_or(LookupError::NullTile {
            x: position.x,
            y: position.y,
        })?;
        tile.footprint = footprint;
        Ok(())
    }
}
