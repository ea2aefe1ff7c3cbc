//! The world model: tables, payloads, foreign keys and the spatial indexes
//! that tie them to grid cells.

use std::collections::HashMap;

use crate::error::{DbError, Result};
use crate::grid::Field;

/// One discovered foreign key on a payload.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table_id: usize,
    pub ref_id: i64,
}

/// A relational tuple instance, placed or not yet placed on the grid.
#[derive(Debug, Clone)]
pub struct Payload {
    pub id: i64,
    pub table_id: usize,
    pub fields: Vec<(String, String)>,
    pub foreign_keys: Vec<ForeignKey>,
    pub raw_data: String,
    pub x: i64,
    pub y: i64,
    pub placed: bool,
}

impl Payload {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A registered table: display name, schema, and (once `init_world` has run)
/// its own pheromone field.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub key: String,
    pub columns: Vec<String>,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: name.to_lowercase(),
            columns: Vec::new(),
        }
    }
}

/// Packs `(table_id, id)` into a lookup key, matching the C-side
/// `(table_id << 32) | (uint32)id` scheme.
pub fn payload_key(table_id: usize, id: i64) -> u64 {
    ((table_id as u64) << 32) | (id as u32 as u64)
}

pub struct World {
    pub width: usize,
    pub height: usize,
    pub tables: Vec<Table>,
    table_lookup: HashMap<String, usize>,
    pub payloads: Vec<Payload>,
    /// -1 (stored as None) for empty, else the payload index.
    pub cell_payload: Vec<i64>,
    pub payload_positions: HashMap<u64, (i64, i64)>,
    pub table_pheromones: Vec<Field>,
    pub data_density: Field,
    pub mycelium: Field,
}

impl World {
    /// Creates a world with zero grid dimensions; tables may be registered
    /// before `init_world` is called, but no pheromone fields exist yet.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            tables: Vec::new(),
            table_lookup: HashMap::new(),
            payloads: Vec::new(),
            cell_payload: Vec::new(),
            payload_positions: HashMap::new(),
            table_pheromones: Vec::new(),
            data_density: Field::new(1, 1),
            mycelium: Field::new(1, 1),
        }
    }

    /// Allocates the WxH grid and per-table pheromone fields. Idempotent if
    /// called with the same dimensions on an already-sized world; otherwise
    /// rebuilds the grid-sized state from scratch (ingest always calls this
    /// once, up front).
    pub fn init_world(&mut self, width: usize, height: usize) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(DbError::Argument(format!(
                "world dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        self.width = width;
        self.height = height;
        self.cell_payload = vec![-1; width * height];
        self.data_density = Field::new(width, height);
        self.mycelium = Field::new(width, height);
        self.table_pheromones = self.tables.iter().map(|_| Field::new(width, height)).collect();
        Ok(())
    }

    /// Idempotent: looks up by lowercased name, creating the table (and, if
    /// the grid is already sized, a fresh pheromone field for it) if absent.
    pub fn add_table(&mut self, name: &str) -> usize {
        let key = name.to_lowercase();
        if let Some(&id) = self.table_lookup.get(&key) {
            return id;
        }
        let id = self.tables.len();
        self.tables.push(Table::new(name));
        self.table_lookup.insert(key, id);
        if self.width > 0 && self.height > 0 {
            self.table_pheromones.push(Field::new(self.width, self.height));
        }
        id
    }

    pub fn find_table(&self, name: &str) -> Option<usize> {
        self.table_lookup.get(&name.to_lowercase()).copied()
    }

    pub fn table(&self, id: usize) -> Option<&Table> {
        self.tables.get(id)
    }

    fn cell_index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    pub fn is_empty_cell(&self, x: i64, y: i64) -> bool {
        match self.cell_index(x, y) {
            Some(idx) => self.cell_payload[idx] < 0,
            None => false,
        }
    }

    /// Places `payload_idx` at `(x,y)`: marks it placed, wires the cell
    /// index, publishes its position, and deposits pheromone/density.
    pub fn place_payload(&mut self, payload_idx: usize, x: i64, y: i64) -> Result<()> {
        let idx = self
            .cell_index(x, y)
            .ok_or_else(|| DbError::Argument(format!("placement out of bounds: ({}, {})", x, y)))?;
        let (table_id, id) = {
            let p = &mut self.payloads[payload_idx];
            p.x = x;
            p.y = y;
            p.placed = true;
            (p.table_id, p.id)
        };
        self.cell_payload[idx] = payload_idx as i64;
        self.payload_positions.insert(payload_key(table_id, id), (x, y));
        self.data_density.set(x as usize, y as usize, 1.0);
        if let Some(field) = self.table_pheromones.get_mut(table_id) {
            field.add(x as usize, y as usize, 1.0);
        }
        Ok(())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
