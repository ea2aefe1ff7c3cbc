//! CLI front-end for querying a persisted myco-db world: either the tolerant
//! single-predicate grammar or the SQL subset, rendered as a table, CSV or
//! JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use myco_db::persist::load_myco;
use myco_db::query::sql::db_execute_sql;
use myco_db::query::{execute_query, parse_query};
use myco_db::world::World;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SqlFormat {
    Table,
    Csv,
    Json,
}

#[derive(Parser)]
#[command(name = "db_query")]
#[command(about = "Query a myco-db MYCO1 snapshot")]
struct Args {
    /// Path to the MYCO1 snapshot to load.
    #[arg(long)]
    db: PathBuf,

    /// The query text: either `SELECT ...`/`WITH ...` (SQL subset) or the
    /// tolerant `... FROM T WHERE C=V` single-predicate grammar.
    #[arg(long)]
    query: String,

    /// Spatial window radius (in grid cells) used by the single-predicate
    /// grammar's FK lookup.
    #[arg(long = "db-radius", default_value_t = 5)]
    db_radius: i64,

    /// Output format for the SQL subset's result set.
    #[arg(long = "sql-format", value_enum, default_value_t = SqlFormat::Table)]
    sql_format: SqlFormat,
}

fn render_table(columns: &[String], rows: &[myco_db::query::sql::Row]) {
    println!("{}", columns.join(" | "));
    for row in rows {
        let line: Vec<String> = row
            .cells()
            .iter()
            .map(|c| if c.is_null { "NULL".to_string() } else { c.text.clone() })
            .collect();
        println!("{}", line.join(" | "));
    }
}

fn render_csv(columns: &[String], rows: &[myco_db::query::sql::Row]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(columns).context("CSV-Fehler: Kopfzeile konnte nicht geschrieben werden")?;
    for row in rows {
        let line: Vec<String> = row
            .cells()
            .iter()
            .map(|c| if c.is_null { String::new() } else { c.text.clone() })
            .collect();
        writer.write_record(&line).context("CSV-Fehler: Zeile konnte nicht geschrieben werden")?;
    }
    writer.flush().context("CSV-Fehler: Flush fehlgeschlagen")?;
    Ok(())
}

fn render_json(columns: &[String], rows: &[myco_db::query::sql::Row]) -> Result<()> {
    let mut out = Vec::new();
    for row in rows {
        let mut obj = serde_json::Map::new();
        for (name, cell) in columns.iter().zip(row.cells().iter()) {
            let value = if cell.is_null {
                serde_json::Value::Null
            } else if let Some(n) = cell.num {
                serde_json::Number::from_f64(n).map(serde_json::Value::Number).unwrap_or_else(|| serde_json::Value::String(cell.text.clone()))
            } else {
                serde_json::Value::String(cell.text.clone())
            };
            obj.insert(name.clone(), value);
        }
        out.push(serde_json::Value::Object(obj));
    }
    let text = serde_json::to_string_pretty(&out).context("SQL-Fehler: JSON-Serialisierung fehlgeschlagen")?;
    println!("{}", text);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("Lade Snapshot {}", args.db.display());
    let content = fs::read_to_string(&args.db).with_context(|| format!("MYCO-Fehler: kann {} nicht lesen", args.db.display()))?;
    let world: World = load_myco(&content).context("MYCO-Fehler: Laden des Snapshots fehlgeschlagen")?;

    let lower = args.query.trim().to_lowercase();
    if lower.starts_with("select") || lower.starts_with("with") {
        let result = db_execute_sql(&world, &args.query, None).context("SQL-Fehler: Ausfuehrung fehlgeschlagen")?;
        match args.sql_format {
            SqlFormat::Table => render_table(&result.columns, &result.rows),
            SqlFormat::Csv => render_csv(&result.columns, &result.rows)?,
            SqlFormat::Json => render_json(&result.columns, &result.rows)?,
        }
        info!("{} Zeilen zurueckgegeben", result.rows.len());
        return Ok(());
    }

    let query = parse_query(&args.query).context("SQL-Fehler: Anfrage konnte nicht geparst werden")?;
    let hits = execute_query(&world, &query, args.db_radius);
    for idx in &hits {
        let p = &world.payloads[*idx];
        let table_name = world.table(p.table_id).map(|t| t.name.as_str()).unwrap_or("?");
        println!("id={} table={} x={} y={} data=\"{}\"", p.id, table_name, p.x, p.y, p.raw_data);
    }
    info!("{} Treffer gefunden", hits.len());
    Ok(())
}
