//! SQL ingest parsing and carrier-based placement.

pub mod carriers;
pub mod sql_parser;

pub use carriers::{run_ingest, IngestConfig};
pub use sql_parser::load_sql;
