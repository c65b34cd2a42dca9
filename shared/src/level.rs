//! Level raster shipped over the Level Transfer stream
//!
//! A level is a small RGBA image with one pixel per tile. The server streams
//! it as PNG without framing; the receiver crops the decoded image to the
//! width and height announced in the preceding LEVEL packet.

use crate::error::{NetError, Result};
use crate::{Team, TILE_PIXELS};
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Announced path of levels that were generated rather than loaded
pub const GENERATED_PATH: &str = "generated";
pub const DEFAULT_LEVEL_SIZE: u32 = 64;

const SPAWN_INSET: i32 = 100;
const FLAG_INSET: i32 = 200;

const FLOOR: Rgba<u8> = Rgba([96, 96, 96, 255]);
const WALL: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    path: String,
    image: RgbaImage,
}

impl Level {
    /// Walled rectangle of floor tiles
    pub fn blank(width: u32, height: u32) -> Level {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                WALL
            } else {
                FLOOR
            }
        });
        Level {
            path: GENERATED_PATH.to_string(),
            image,
        }
    }

    /// Loads `system_path` relative to `levels_dir`
    pub fn load(levels_dir: &Path, system_path: &str) -> Result<Level> {
        let file = levels_dir.join(system_path.trim_start_matches('/'));
        let image = image::open(&file)?.to_rgba8();
        Ok(Level {
            path: system_path.to_string(),
            image,
        })
    }

    /// Rebuilds a level from a received PNG stream
    pub fn from_png(path: &str, bytes: &[u8], width: u32, height: u32) -> Result<Level> {
        if width == 0 || height == 0 {
            return Err(NetError::EmptyLevel { width, height });
        }
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8();
        if decoded.width() < width || decoded.height() < height {
            return Err(NetError::LevelTooSmall {
                width,
                height,
                actual_width: decoded.width(),
                actual_height: decoded.height(),
            });
        }

        let image = imageops::crop_imm(&decoded, 0, 0, width, height).to_image();
        Ok(Level {
            path: path.to_string(),
            image,
        })
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Cursor::new(Vec::new());
        self.image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_generated(&self) -> bool {
        self.path == GENERATED_PATH
    }

    /// Width in tiles
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in tiles
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn pixel_width(&self) -> i32 {
        self.width() as i32 * TILE_PIXELS
    }

    pub fn pixel_height(&self) -> i32 {
        self.height() as i32 * TILE_PIXELS
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.pixel_width() && y < self.pixel_height()
    }

    /// Green spawns near the top-left corner, red near the bottom-right
    pub fn spawn_point(&self, team: Team) -> (i32, i32) {
        self.inset_point(team, SPAWN_INSET)
    }

    /// Capture-the-flag base of a team
    pub fn flag_base(&self, team: Team) -> (i32, i32) {
        self.inset_point(team, FLAG_INSET)
    }

    fn inset_point(&self, team: Team, inset: i32) -> (i32, i32) {
        match team {
            Team::Green => (inset, inset),
            Team::Red => (self.pixel_width() - inset, self.pixel_height() - inset),
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::blank(DEFAULT_LEVEL_SIZE, DEFAULT_LEVEL_SIZE)
    }
}
