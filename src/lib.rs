//! myco-db: an experimental swarm-placed spatial database.
//!
//! SQL `CREATE TABLE`/`INSERT` statements are ingested into a [`world::World`],
//! whose rows are then scattered across a 2-D grid by carrier agents
//! ([`ingest::carriers`]) biased by per-table pheromone fields
//! ([`grid`]). The placed world persists to the MYCO1 text format
//! ([`persist`]) and can be dumped as a PPM raster ([`raster`]). Placed data
//! is queried either through a tolerant single-predicate grammar or a SQL
//! subset ([`query`]).

pub mod error;
pub mod grid;
pub mod ingest;
pub mod persist;
pub mod query;
pub mod raster;
pub mod rng;
pub mod world;

pub use error::{DbError, Result};
pub use world::World;
