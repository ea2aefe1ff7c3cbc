//! End-to-end scenarios from the engine's test matrix (ingest, FK discovery,
//! spatial/SQL queries, and the universal invariants), driven through the
//! public `myco_db` API the way a consumer would.

use myco_db::ingest::{load_sql, run_ingest, IngestConfig};
use myco_db::persist::{load_myco, save_myco};
use myco_db::query::sql::db_execute_sql;
use myco_db::query::{execute_query, execute_query_focus, Query};
use myco_db::world::{payload_key, World};

fn cfg(agent_count: usize, steps: usize, seed: u64) -> IngestConfig {
    IngestConfig { agent_count, steps, seed, spawn_x: None, spawn_y: None }
}

fn s1_world() -> World {
    let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
               INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');";
    let mut world = World::new();
    load_sql(sql, &mut world).unwrap();
    world.init_world(32, 32).unwrap();
    run_ingest(&mut world, &cfg(16, 200, 42)).unwrap();
    world
}

#[test]
fn s1_ingest_smoke() {
    let world = s1_world();
    assert_eq!(world.payloads.len(), 2);
    assert!(world.payloads.iter().all(|p| p.placed));
    let p0 = &world.payloads[0];
    let p1 = &world.payloads[1];
    assert!((p0.x, p0.y) != (p1.x, p1.y));
    assert_eq!(p0.raw_data, "Id=1, Title=A");
    assert_eq!(p1.raw_data, "Id=2, Title=B");
}

fn s1_s2_world() -> World {
    let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
               INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');\n\
               INSERT INTO Track (Id,AlbumId,Name) VALUES (1,2,'t');";
    let mut world = World::new();
    load_sql(sql, &mut world).unwrap();
    world.init_world(32, 32).unwrap();
    run_ingest(&mut world, &cfg(16, 200, 42)).unwrap();
    world
}

#[test]
fn s2_fk_discovery() {
    let world = s1_s2_world();
    let album_id = world.find_table("Album").unwrap();
    let track = world.payloads.iter().find(|p| world.table(p.table_id).unwrap().name == "Track").unwrap();
    assert_eq!(track.foreign_keys.len(), 1);
    assert_eq!(track.foreign_keys[0].column, "AlbumId");
    assert_eq!(track.foreign_keys[0].ref_table_id, album_id);
    assert_eq!(track.foreign_keys[0].ref_id, 2);
}

#[test]
fn s3_spatial_fk_query() {
    let world = s1_s2_world();
    let q = Query { table: "Track".to_string(), column: "AlbumId".to_string(), value: "2".to_string() };
    let hits = execute_query(&world, &q, 5);
    assert_eq!(hits.len(), 1);
    let track = &world.payloads[hits[0]];
    assert_eq!(track.id, 1);

    let album_id = world.find_table("Album").unwrap();
    let (ax, ay) = *world.payload_positions.get(&payload_key(album_id, 2)).unwrap();
    assert!((track.x - ax).abs() <= 5);
    assert!((track.y - ay).abs() <= 5);
}

#[test]
fn s4_sql_inner_join() {
    let world = s1_s2_world();
    let rs = db_execute_sql(&world, "SELECT t.Name, a.Title FROM Track t JOIN Album a ON t.AlbumId = a.Id ORDER BY t.Name", None).unwrap();
    assert_eq!(rs.rows.len(), 1);
    let cells = rs.rows[0].cells();
    assert_eq!(cells[0].text, "t");
    assert_eq!(cells[1].text, "B");
}

#[test]
fn s5_aggregation() {
    let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
               INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');\n\
               INSERT INTO Track (Id,AlbumId,Name) VALUES (1,2,'t'),(2,2,'u');";
    let mut world = World::new();
    load_sql(sql, &mut world).unwrap();
    world.init_world(32, 32).unwrap();
    run_ingest(&mut world, &cfg(16, 200, 42)).unwrap();

    let rs = db_execute_sql(&world, "SELECT AlbumId, COUNT(*) AS n FROM Track GROUP BY AlbumId ORDER BY n DESC", None).unwrap();
    assert_eq!(rs.rows.len(), 1);
    assert_eq!(rs.rows[0].cells()[0].text, "2");
    assert_eq!(rs.rows[0].cells()[1].text, "2");
}

#[test]
fn s6_union_dedup() {
    let world = s1_s2_world();
    let rs = db_execute_sql(&world, "SELECT Id FROM Album UNION SELECT AlbumId FROM Track", None).unwrap();
    let mut values: Vec<String> = rs.rows.iter().map(|r| r.cells()[0].text.clone()).collect();
    values.sort();
    assert_eq!(values, vec!["1".to_string(), "2".to_string()]);

    let rs_all = db_execute_sql(&world, "SELECT Id FROM Album UNION ALL SELECT AlbumId FROM Track", None).unwrap();
    let mut values_all: Vec<String> = rs_all.rows.iter().map(|r| r.cells()[0].text.clone()).collect();
    values_all.sort();
    assert_eq!(values_all, vec!["1".to_string(), "2".to_string(), "2".to_string()]);
}

#[test]
fn invariant_cell_payload_consistent_with_placed_state() {
    let world = s1_world();
    for y in 0..world.height {
        for x in 0..world.width {
            let idx = world.cell_payload[y * world.width + x];
            if idx >= 0 {
                let p = &world.payloads[idx as usize];
                assert!(p.placed);
                assert_eq!((p.x as usize, p.y as usize), (x, y));
            }
        }
    }
}

#[test]
fn invariant_payload_positions_match_placed_coordinates() {
    let world = s1_world();
    for p in &world.payloads {
        assert!(p.placed);
        let pos = world.payload_positions.get(&payload_key(p.table_id, p.id)).unwrap();
        assert_eq!(*pos, (p.x, p.y));
    }
}

#[test]
fn invariant_payload_count_and_bytes_survive_round_trip() {
    let world = s1_world();
    let saved = save_myco(&world);
    let reloaded = load_myco(&saved).unwrap();
    assert_eq!(reloaded.payloads.len(), world.payloads.len());
    let resaved = save_myco(&reloaded);
    assert_eq!(saved, resaved);
}

#[test]
fn invariant_identical_seed_reproduces_placement() {
    let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
               INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B'),(3,'C');";
    let mut w1 = World::new();
    load_sql(sql, &mut w1).unwrap();
    w1.init_world(24, 24).unwrap();
    run_ingest(&mut w1, &cfg(12, 150, 99)).unwrap();

    let mut w2 = World::new();
    load_sql(sql, &mut w2).unwrap();
    w2.init_world(24, 24).unwrap();
    run_ingest(&mut w2, &cfg(12, 150, 99)).unwrap();

    for (a, b) in w1.payloads.iter().zip(w2.payloads.iter()) {
        assert_eq!((a.x, a.y), (b.x, b.y));
    }
}

#[test]
fn invariant_focus_query_refines_full_query() {
    let world = s1_s2_world();
    let q = Query { table: "Track".to_string(), column: "AlbumId".to_string(), value: "2".to_string() };
    let full = execute_query(&world, &q, 10);
    let album_id = world.find_table("Album").unwrap();
    let (ax, ay) = *world.payload_positions.get(&payload_key(album_id, 2)).unwrap();
    let focused = execute_query_focus(&world, &q, ax, ay, 10);
    for hit in &focused {
        assert!(full.contains(hit));
    }
}

#[test]
fn invariant_distinct_is_idempotent() {
    let world = s1_s2_world();
    let once = db_execute_sql(&world, "SELECT DISTINCT Title FROM Album", None).unwrap();
    let nested = db_execute_sql(&world, "SELECT DISTINCT Title FROM (SELECT DISTINCT Title FROM Album) t", None).unwrap();
    let mut once_vals: Vec<String> = once.rows.iter().map(|r| r.cells()[0].text.clone()).collect();
    let mut nested_vals: Vec<String> = nested.rows.iter().map(|r| r.cells()[0].text.clone()).collect();
    once_vals.sort();
    nested_vals.sort();
    assert_eq!(once_vals, nested_vals);
}
