//! Deterministic carrier-agent simulation: walks unplaced payloads toward
//! their foreign-key targets and deposits them onto free grid cells.

use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::grid::{Field, FieldParams};
use crate::rng::Rng;
use crate::world::{payload_key, World};

pub struct IngestConfig {
    pub agent_count: usize,
    pub steps: usize,
    pub seed: u64,
    pub spawn_x: Option<i64>,
    pub spawn_y: Option<i64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            agent_count: 256,
            steps: 2000,
            seed: 42,
            spawn_x: None,
            spawn_y: None,
        }
    }
}

struct Agent {
    x: f32,
    y: f32,
    payload_index: Option<usize>,
}

/// Finds the first empty cell in the `(2*radius+1)^2` square centred on
/// `(cx,cy)`, scanning row-major, clamped to grid bounds.
fn find_empty_near(world: &World, cx: i64, cy: i64, radius: i64) -> Option<(i64, i64)> {
    let x0 = (cx - radius).max(0);
    let x1 = (cx + radius).min(world.width as i64 - 1);
    let y0 = (cy - radius).max(0);
    let y1 = (cy + radius).min(world.height as i64 - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            if world.is_empty_cell(x, y) {
                return Some((x, y));
            }
        }
    }
    None
}

/// Runs the full carrier simulation over `world`'s (already present, as yet
/// unplaced) payloads. `world` must already have `init_world` applied with
/// non-zero dimensions.
pub fn run_ingest(world: &mut World, cfg: &IngestConfig) -> Result<()> {
    if world.width == 0 || world.height == 0 {
        return Err(DbError::Argument("Invalid grid size.".to_string()));
    }
    if world.payloads.is_empty() {
        return Err(DbError::Schema("No payloads present.".to_string()));
    }

    info!(
        payloads = world.payloads.len(),
        agents = cfg.agent_count,
        steps = cfg.steps,
        seed = cfg.seed,
        "starting carrier ingest"
    );

    let mut rng = Rng::new(cfg.seed);
    let spawn_x = cfg.spawn_x.unwrap_or(world.width as i64 / 2);
    let spawn_y = cfg.spawn_y.unwrap_or(world.height as i64 / 2);

    let mut pending: Vec<usize> = (0..world.payloads.len()).collect();
    let mut pending_index = 0usize;

    let mut agents: Vec<Agent> = (0..cfg.agent_count)
        .map(|_| Agent {
            x: spawn_x as f32,
            y: spawn_y as f32,
            payload_index: None,
        })
        .collect();

    let mut phero_accum = Field::new(world.width, world.height);
    let pheromone_params = FieldParams {
        evaporation: 0.02,
        diffusion: 0.15,
    };

    for _step in 0..cfg.steps {
        for agent in agents.iter_mut() {
            if agent.payload_index.is_none() {
                if pending_index < pending.len() {
                    agent.payload_index = Some(pending[pending_index]);
                    pending_index += 1;
                } else {
                    continue;
                }
            }
            let payload_idx = agent.payload_index.unwrap();
            if world.payloads[payload_idx].placed {
                agent.payload_index = None;
                continue;
            }

            let mut has_target = false;
            let mut tx = spawn_x;
            let mut ty = spawn_y;
            for fk in &world.payloads[payload_idx].foreign_keys {
                if let Some(&(px, py)) = world.payload_positions.get(&payload_key(fk.ref_table_id, fk.ref_id)) {
                    tx = px;
                    ty = py;
                    has_target = true;
                    break;
                }
            }

            let dx = tx as f32 - agent.x;
            let dy = ty as f32 - agent.y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > 0.001 {
                let jitter = rng.uniform(-0.35, 0.35);
                agent.x += (dx / dist) * 1.0 + jitter;
                agent.y += (dy / dist) * 1.0 + jitter;
            } else {
                agent.x += rng.uniform(-1.0, 1.0);
                agent.y += rng.uniform(-1.0, 1.0);
            }

            let cx = (agent.x.round() as i64).clamp(0, world.width as i64 - 1);
            let cy = (agent.y.round() as i64).clamp(0, world.height as i64 - 1);

            let allow_place = if has_target {
                dist <= 2.5
            } else {
                rng.uniform(0.0, 1.0) < 0.1
            };

            if allow_place {
                if let Some((px, py)) = find_empty_near(world, cx, cy, 2) {
                    world.place_payload(payload_idx, px, py)?;
                    agent.payload_index = None;
                }
            }
        }

        phero_accum.fill(0.0);
        for field in &world.table_pheromones {
            for y in 0..world.height {
                for x in 0..world.width {
                    phero_accum.add(x, y, field.at(x, y));
                }
            }
        }
        phero_accum.diffuse_and_evaporate(pheromone_params);
        // The mycelium network is an out-of-core analysis surface; it is
        // accumulated here but never consulted by placement decisions.
        for y in 0..world.height {
            for x in 0..world.width {
                world.mycelium.add(x, y, phero_accum.at(x, y) * 0.01);
            }
        }
    }

    let placed_count = world.payloads.iter().filter(|p| p.placed).count();
    debug!(placed_count, total = world.payloads.len(), "simulation loop finished");
    if placed_count < world.payloads.len() {
        let unplaced = world.payloads.len() - placed_count;
        warn!(unplaced, "falling back to random placement for unplaced payloads");
        let mut free_cells: Vec<usize> = Vec::new();
        for y in 0..world.height {
            for x in 0..world.width {
                if world.cell_payload[y * world.width + x] < 0 {
                    free_cells.push(y * world.width + x);
                }
            }
        }
        if free_cells.len() < unplaced {
            return Err(DbError::Capacity(
                "Not enough free cells to place all payloads.".to_string(),
            ));
        }
        for i in 0..world.payloads.len() {
            if world.payloads[i].placed {
                continue;
            }
            let pick = rng.uniform_int(0, free_cells.len() as i64 - 1) as usize;
            let idx = free_cells.swap_remove(pick);
            let px = (idx % world.width) as i64;
            let py = (idx / world.width) as i64;
            world.place_payload(i, px, py)?;
        }
    }

    info!("carrier ingest complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::sql_parser::load_sql;

    fn ingest(sql: &str, w: usize, h: usize, cfg: IngestConfig) -> World {
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        world.init_world(w, h).unwrap();
        run_ingest(&mut world, &cfg).unwrap();
        world
    }

    #[test]
    fn all_payloads_end_up_placed() {
        let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
                   INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');";
        let world = ingest(
            sql,
            32,
            32,
            IngestConfig {
                agent_count: 16,
                steps: 200,
                seed: 42,
                spawn_x: None,
                spawn_y: None,
            },
        );
        assert!(world.payloads.iter().all(|p| p.placed));
        let (p0, p1) = (&world.payloads[0], &world.payloads[1]);
        assert!(p0.x != p1.x || p0.y != p1.y);
    }

    #[test]
    fn identical_seed_reproduces_placement() {
        let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
                   INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B'),(3,'C');";
        let cfg = IngestConfig {
            agent_count: 16,
            steps: 200,
            seed: 7,
            spawn_x: None,
            spawn_y: None,
        };
        let w1 = ingest(sql, 32, 32, IngestConfig { agent_count: 16, steps: 200, seed: 7, spawn_x: None, spawn_y: None });
        let w2 = ingest(sql, 32, 32, cfg);
        for (a, b) in w1.payloads.iter().zip(w2.payloads.iter()) {
            assert_eq!((a.x, a.y), (b.x, b.y));
        }
    }

    #[test]
    fn capacity_error_when_grid_too_small() {
        let sql = "INSERT INTO T (Id) VALUES (1),(2),(3),(4),(5);";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        world.init_world(2, 2).unwrap();
        let cfg = IngestConfig {
            agent_count: 4,
            steps: 5,
            seed: 1,
            spawn_x: None,
            spawn_y: None,
        };
        let err = run_ingest(&mut world, &cfg).unwrap_err();
        assert!(matches!(err, DbError::Capacity(_)));
    }
}
