//! Query engines: the tolerant single-predicate grammar and the SQL subset.

pub mod predicate;
pub mod sql;

pub use predicate::{execute_query, execute_query_focus, parse_query, Query};
