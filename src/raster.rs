//! PPM (P3) cluster raster dump.

use std::fmt::Write as _;

use lazy_static::lazy_static;

use crate::error::{DbError, Result};
use crate::world::World;

lazy_static! {
    static ref PALETTE: [(u8, u8, u8); 9] = [
        (30, 30, 30),
        (220, 60, 60),
        (60, 200, 90),
        (70, 120, 220),
        (220, 200, 60),
        (200, 80, 200),
        (60, 200, 200),
        (200, 140, 60),
        (160, 160, 160),
    ];
}

/// Renders `world`'s occupancy grid as a P3 PPM image, each cell painted as
/// a `scale x scale` block. Empty cells use palette index 0; occupied
/// cells use `1 + (table_id % 8)`.
pub fn save_cluster_ppm(world: &World, scale: usize) -> Result<String> {
    if world.width == 0 || world.height == 0 {
        return Err(DbError::Argument("Invalid grid size for PPM.".to_string()));
    }
    if scale == 0 {
        return Err(DbError::Argument("PPM scale must be positive.".to_string()));
    }

    let palette = &*PALETTE;
    let mut out = String::new();
    writeln!(out, "P3").unwrap();
    writeln!(out, "{} {}", world.width * scale, world.height * scale).unwrap();
    writeln!(out, "255").unwrap();

    for y in 0..world.height {
        for _sy in 0..scale {
            for x in 0..world.width {
                let idx = world.cell_payload[y * world.width + x];
                let color = if idx >= 0 {
                    let table_id = world.payloads[idx as usize].table_id;
                    1 + (table_id % (palette.len() - 1))
                } else {
                    0
                };
                let (r, g, b) = palette[color];
                for _sx in 0..scale {
                    write!(out, "{} {} {} ", r, g, b).unwrap();
                }
            }
            writeln!(out).unwrap();
        }
    }

    Ok(out)
}
