//! The tolerant single-predicate query grammar: `SELECT … FROM T WHERE C=V`.

use tracing::debug;

use crate::world::{payload_key, World};

#[derive(Debug, Clone)]
pub struct Query {
    pub table: String,
    pub column: String,
    pub value: String,
}

fn strip_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() >= 2 {
        let a = chars[0];
        let b = chars[chars.len() - 1];
        if (a == '\'' && b == '\'') || (a == '"' && b == '"') {
            return chars[1..chars.len() - 1].iter().collect();
        }
    }
    s.to_string()
}

fn ends_with_id(name: &str) -> bool {
    if name.chars().count() < 2 {
        return false;
    }
    let lower = name.to_lowercase();
    if lower == "id" {
        return false;
    }
    lower.ends_with("_id") || lower.ends_with("id")
}

fn fk_table_from_column(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with("_id") {
        return name[..name.len() - 3].to_string();
    }
    if lower.ends_with("id") {
        return name[..name.len() - 2].to_string();
    }
    name.to_string()
}

fn match_field(fields: &[(String, String)], name: &str, value: &str) -> bool {
    fields
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case(name) && v == value)
}

/// Parses the tolerant `... FROM <table> WHERE <col>=<value>` grammar,
/// case-insensitively matching the `from`/`where` keywords wherever they
/// first appear. Returns `None` if either keyword or the `=` is missing.
pub fn parse_query(query: &str) -> Option<Query> {
    let lower = query.to_lowercase();
    let from_pos = lower.find("from")?;
    let where_pos = lower.find("where")?;
    if where_pos < from_pos {
        return None;
    }
    let from_part = query[from_pos + 4..where_pos].trim();
    let where_part = query[where_pos + 5..].trim();
    let eq = where_part.find('=')?;
    let table = from_part.trim().to_string();
    let column = where_part[..eq].trim().to_string();
    let value = strip_quotes(where_part[eq + 1..].trim());
    if table.is_empty() || column.is_empty() || value.is_empty() {
        None
    } else {
        Some(Query { table, column, value })
    }
}

struct Classification {
    table_id: usize,
    pk_query: bool,
    fk_query: bool,
    target_id: i64,
    parent_table_id: Option<usize>,
}

fn classify(world: &World, q: &Query) -> Option<Classification> {
    let table_id = world.find_table(&q.table)?;
    let mut fk_query = ends_with_id(&q.column);
    let mut target_id = 0;
    if fk_query {
        match q.value.parse::<i64>() {
            Ok(v) => target_id = v,
            Err(_) => fk_query = false,
        }
    }
    let mut pk_query = false;
    if fk_query {
        let col_lower = q.column.to_lowercase();
        let table_lower = q.table.to_lowercase();
        if col_lower == "id" || col_lower == format!("{}id", table_lower) || col_lower == format!("{}_id", table_lower) {
            pk_query = true;
        }
    }
    let parent_table_id = if fk_query {
        world.find_table(&fk_table_from_column(&q.column))
    } else {
        None
    };
    Some(Classification {
        table_id,
        pk_query,
        fk_query,
        target_id,
        parent_table_id,
    })
}

/// Executes `q` against `world`. Tries a spatial window around the FK
/// target first (if any hit is found there, returns just those); otherwise
/// falls back to a full linear scan of the query table.
pub fn execute_query(world: &World, q: &Query, radius: i64) -> Vec<usize> {
    let Some(c) = classify(world, q) else {
        debug!(table = %q.table, column = %q.column, "predicate did not classify against any known table");
        return Vec::new();
    };
    debug!(
        table = %q.table,
        column = %q.column,
        pk_query = c.pk_query,
        fk_query = c.fk_query,
        "classified predicate"
    );

    if c.fk_query {
        if let Some(parent_id) = c.parent_table_id {
            if let Some(&(px, py)) = world.payload_positions.get(&payload_key(parent_id, c.target_id)) {
                let x0 = (px - radius).max(0);
                let x1 = (px + radius).min(world.width as i64 - 1);
                let y0 = (py - radius).max(0);
                let y1 = (py + radius).min(world.height as i64 - 1);
                let mut hits = Vec::new();
                for y in y0..=y1 {
                    for x in x0..=x1 {
                        let idx = world.cell_payload[y as usize * world.width + x as usize];
                        if idx < 0 {
                            continue;
                        }
                        let p = &world.payloads[idx as usize];
                        if p.table_id != c.table_id {
                            continue;
                        }
                        if p.foreign_keys.iter().any(|fk| fk.ref_table_id == parent_id && fk.ref_id == c.target_id) {
                            hits.push(idx as usize);
                        }
                    }
                }
                if !hits.is_empty() {
                    debug!(hits = hits.len(), "resolved via spatial FK window");
                    return hits;
                }
            }
        }
    }

    let mut out = Vec::new();
    for (i, p) in world.payloads.iter().enumerate() {
        if p.table_id != c.table_id {
            continue;
        }
        if c.pk_query && p.id == c.target_id {
            out.push(i);
            continue;
        }
        if match_field(&p.fields, &q.column, &q.value) {
            out.push(i);
        }
    }
    debug!(hits = out.len(), "resolved via full table scan");
    out
}

/// Like [`execute_query`] but restricted to the bounding box around
/// `(cx,cy)`; does not fall back to a full scan beyond that box.
pub fn execute_query_focus(world: &World, q: &Query, cx: i64, cy: i64, radius: i64) -> Vec<usize> {
    let Some(c) = classify(world, q) else {
        return Vec::new();
    };
    if world.width == 0 || world.height == 0 {
        return Vec::new();
    }

    let x0 = (cx - radius).max(0);
    let x1 = (cx + radius).min(world.width as i64 - 1);
    let y0 = (cy - radius).max(0);
    let y1 = (cy + radius).min(world.height as i64 - 1);

    let fk_table_id = if c.fk_query && !c.pk_query { c.parent_table_id } else { None };

    let mut out = Vec::new();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let idx = world.cell_payload[y as usize * world.width + x as usize];
            if idx < 0 {
                continue;
            }
            let p = &world.payloads[idx as usize];
            if p.table_id != c.table_id {
                continue;
            }
            if c.pk_query && p.id == c.target_id {
                out.push(idx as usize);
                continue;
            }
            if c.fk_query {
                if let Some(parent_id) = fk_table_id {
                    if p.foreign_keys.iter().any(|fk| fk.ref_table_id == parent_id && fk.ref_id == c.target_id) {
                        out.push(idx as usize);
                    }
                    continue;
                }
            }
            if match_field(&p.fields, &q.column, &q.value) {
                out.push(idx as usize);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::carriers::{run_ingest, IngestConfig};
    use crate::ingest::sql_parser::load_sql;

    fn build() -> World {
        let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
                   INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');\n\
                   INSERT INTO Track (Id,AlbumId,Name) VALUES (1,2,'t');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        world.init_world(32, 32).unwrap();
        run_ingest(&mut world, &IngestConfig { agent_count: 16, steps: 200, seed: 42, spawn_x: None, spawn_y: None }).unwrap();
        world
    }

    #[test]
    fn parses_basic_grammar() {
        let q = parse_query("SELECT * FROM Track WHERE AlbumId=2").unwrap();
        assert_eq!(q.table, "Track");
        assert_eq!(q.column, "AlbumId");
        assert_eq!(q.value, "2");
    }

    #[test]
    fn quoted_value_is_stripped() {
        let q = parse_query("SELECT * FROM Album WHERE Title='A'").unwrap();
        assert_eq!(q.value, "A");
    }

    #[test]
    fn missing_where_returns_none() {
        assert!(parse_query("SELECT * FROM Album").is_none());
    }

    #[test]
    fn spatial_fk_query_finds_track() {
        let world = build();
        let q = Query {
            table: "Track".to_string(),
            column: "AlbumId".to_string(),
            value: "2".to_string(),
        };
        let hits = execute_query(&world, &q, 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(world.payloads[hits[0]].id, 1);
    }

    #[test]
    fn focus_result_is_subset_of_full_query() {
        let world = build();
        let q = Query {
            table: "Track".to_string(),
            column: "AlbumId".to_string(),
            value: "2".to_string(),
        };
        let full = execute_query(&world, &q, 5);
        let album2_pos = *world.payload_positions.get(&payload_key(world.find_table("Album").unwrap(), 2)).unwrap();
        let focused = execute_query_focus(&world, &q, album2_pos.0, album2_pos.1, 5);
        for hit in &focused {
            assert!(full.contains(hit));
        }
    }

    #[test]
    fn unknown_table_returns_empty() {
        let world = build();
        let q = Query {
            table: "Nope".to_string(),
            column: "x".to_string(),
            value: "1".to_string(),
        };
        assert!(execute_query(&world, &q, 5).is_empty());
    }
}
