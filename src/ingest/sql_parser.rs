//! Tolerant parser for `CREATE TABLE` and `INSERT INTO … VALUES …`
//! statements. Everything else in the input text is silently ignored.

use crate::error::{DbError, Result};
use crate::world::{ForeignKey, Payload, World};

fn is_space(c: char) -> bool {
    c.is_whitespace()
}

fn trim(s: &str) -> &str {
    s.trim()
}

fn ieq_prefix(s: &[char], prefix: &str) -> bool {
    let p: Vec<char> = prefix.chars().collect();
    if s.len() < p.len() {
        return false;
    }
    s.iter()
        .zip(p.iter())
        .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
}

fn ieq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parse_int_value(s: &str) -> Option<i64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    // matches the leading-integer-prefix tolerance of std::stoi
    let mut end = 0;
    let bytes: Vec<char> = t.chars().collect();
    if bytes[0] == '+' || bytes[0] == '-' {
        end = 1;
    }
    let start_digits = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start_digits {
        return None;
    }
    let prefix: String = bytes[..end].iter().collect();
    prefix.parse::<i64>().ok()
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

struct SqlInsert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Parses one identifier starting at `i`, advancing `i` past it. Honors
/// backtick/double-quote quoting and keeps only the tail of a dotted name.
fn parse_identifier(s: &[char], i: &mut usize) -> Option<String> {
    while *i < s.len() && is_space(s[*i]) {
        *i += 1;
    }
    if *i >= s.len() {
        return None;
    }
    if s[*i] == '`' || s[*i] == '"' {
        let quote = s[*i];
        *i += 1;
        let start = *i;
        while *i < s.len() && s[*i] != quote {
            *i += 1;
        }
        if *i >= s.len() {
            return None;
        }
        let out: String = s[start..*i].iter().collect();
        *i += 1;
        return Some(out);
    }
    let start = *i;
    while *i < s.len() {
        let c = s[*i];
        if is_space(c) || c == '(' || c == ',' || c == ')' {
            break;
        }
        *i += 1;
    }
    if *i <= start {
        return None;
    }
    let mut out: String = s[start..*i].iter().collect();
    if let Some(dot) = out.rfind('.') {
        if dot + 1 < out.len() {
            out = out[dot + 1..].to_string();
        }
    }
    Some(out)
}

fn parse_columns_list(s: &[char], i: &mut usize) -> Option<Vec<String>> {
    while *i < s.len() && is_space(s[*i]) {
        *i += 1;
    }
    if *i >= s.len() || s[*i] != '(' {
        return None;
    }
    *i += 1;
    let mut cols = Vec::new();
    loop {
        while *i < s.len() && is_space(s[*i]) {
            *i += 1;
        }
        if *i < s.len() && s[*i] == ')' {
            *i += 1;
            return Some(cols);
        }
        if *i >= s.len() {
            return None;
        }
        let col = parse_identifier(s, i)?;
        cols.push(col);
        while *i < s.len() && is_space(s[*i]) {
            *i += 1;
        }
        if *i < s.len() && s[*i] == ',' {
            *i += 1;
        }
    }
}

fn parse_value(s: &[char], i: &mut usize) -> Option<String> {
    while *i < s.len() && is_space(s[*i]) {
        *i += 1;
    }
    if *i >= s.len() {
        return None;
    }
    if s[*i] == '\'' || s[*i] == '"' {
        let quote = s[*i];
        *i += 1;
        let mut val = String::new();
        while *i < s.len() {
            let c = s[*i];
            *i += 1;
            if c == quote {
                if *i < s.len() && s[*i] == quote {
                    val.push(quote);
                    *i += 1;
                    continue;
                }
                break;
            }
            val.push(c);
        }
        return Some(val);
    }
    let start = *i;
    while *i < s.len() {
        let c = s[*i];
        if c == ',' || c == ')' {
            break;
        }
        *i += 1;
    }
    let raw: String = s[start..*i].iter().collect();
    Some(trim(&raw).to_string())
}

fn parse_values_list(s: &[char], i: &mut usize) -> Option<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    loop {
        while *i < s.len() && is_space(s[*i]) {
            *i += 1;
        }
        if *i >= s.len() {
            return None;
        }
        if s[*i] == ';' {
            return Some(rows);
        }
        if s[*i] != '(' {
            *i += 1;
            continue;
        }
        *i += 1;
        let mut row = Vec::new();
        loop {
            if *i >= s.len() {
                break;
            }
            let value = match parse_value(s, i) {
                Some(v) => v,
                None => return None,
            };
            row.push(value);
            while *i < s.len() && is_space(s[*i]) {
                *i += 1;
            }
            if *i < s.len() && s[*i] == ',' {
                *i += 1;
                continue;
            }
            if *i < s.len() && s[*i] == ')' {
                *i += 1;
                break;
            }
            break;
        }
        if !row.is_empty() {
            rows.push(row);
        }
        while *i < s.len() && is_space(s[*i]) {
            *i += 1;
        }
        if *i < s.len() && s[*i] == ',' {
            *i += 1;
            continue;
        }
        if *i < s.len() && s[*i] == ';' {
            return Some(rows);
        }
    }
}

fn parse_insert_statement(stmt: &str) -> Option<SqlInsert> {
    let chars: Vec<char> = stmt.chars().collect();
    let mut i = 0;
    while i < chars.len() && is_space(chars[i]) {
        i += 1;
    }
    if !ieq_prefix(&chars[i..], "insert into") {
        return None;
    }
    i += 11;
    let table = parse_identifier(&chars, &mut i)?;
    let save = i;
    let columns = parse_columns_list(&chars, &mut i).unwrap_or_else(|| {
        i = save;
        Vec::new()
    });
    while i < chars.len() && is_space(chars[i]) {
        i += 1;
    }
    if !ieq_prefix(&chars[i..], "values") {
        return None;
    }
    i += 6;
    let rows = parse_values_list(&chars, &mut i)?;
    Some(SqlInsert { table, columns, rows })
}

fn parse_create_table_statement(stmt: &str) -> Option<(String, Vec<String>)> {
    let chars: Vec<char> = stmt.chars().collect();
    let mut i = 0;
    while i < chars.len() && is_space(chars[i]) {
        i += 1;
    }
    if !ieq_prefix(&chars[i..], "create table") {
        return None;
    }
    i += 12;
    {
        let mut tmp = i;
        while tmp < chars.len() && is_space(chars[tmp]) {
            tmp += 1;
        }
        if ieq_prefix(&chars[tmp..], "if not exists") {
            tmp += 13;
            i = tmp;
        }
    }
    let table = parse_identifier(&chars, &mut i)?;
    let open = stmt.find('(')?;
    let close = stmt.rfind(')')?;
    if close <= open {
        return None;
    }
    let inner: Vec<char> = stmt[open + 1..close].chars().collect();

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut string_quote = '\0';
    for &c in inner.iter() {
        if (c == '\'' || c == '"') && (!in_string || c == string_quote) {
            if in_string && c == string_quote {
                in_string = false;
            } else if !in_string {
                in_string = true;
                string_quote = c;
            }
        }
        if !in_string {
            if c == '(' {
                depth += 1;
            }
            if c == ')' {
                depth = (depth - 1).max(0);
            }
            if c == ',' && depth == 0 {
                parts.push(std::mem::take(&mut current));
                continue;
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }

    let mut columns = Vec::new();
    for part in &parts {
        let item = trim(part);
        if item.is_empty() {
            continue;
        }
        let lower = item.to_lowercase();
        if lower.starts_with("primary key")
            || lower.starts_with("foreign key")
            || lower.starts_with("constraint")
            || lower.starts_with("unique")
            || lower.starts_with("key")
            || lower.starts_with("index")
        {
            continue;
        }
        let item_chars: Vec<char> = item.chars().collect();
        let mut pos = 0;
        if let Some(col) = parse_identifier(&item_chars, &mut pos) {
            columns.push(col);
        }
    }
    if columns.is_empty() {
        None
    } else {
        Some((table, columns))
    }
}

fn build_raw_data(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Splits `content` into top-level `;`-terminated statements, stripping
/// `--` line comments and `/* … */` block comments, honoring quoted
/// strings so a `;` inside a literal does not end the statement.
fn split_statements(content: &str) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut statements = Vec::new();
    let mut stmt = String::new();
    let mut in_string = false;
    let mut string_quote = '\0';
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let n = if i + 1 < chars.len() { chars[i + 1] } else { '\0' };
        if !in_string && !in_block_comment && c == '-' && n == '-' {
            in_line_comment = true;
            i += 2;
            continue;
        }
        if !in_string && !in_line_comment && c == '/' && n == '*' {
            in_block_comment = true;
            i += 2;
            continue;
        }
        if in_line_comment {
            if c == '\n' || c == '\r' {
                in_line_comment = false;
            }
            i += 1;
            continue;
        }
        if in_block_comment {
            if c == '*' && n == '/' {
                in_block_comment = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            if !in_string {
                in_string = true;
                string_quote = c;
            } else if c == string_quote {
                if n == string_quote {
                    stmt.push(c);
                    stmt.push(n);
                    i += 2;
                    continue;
                }
                in_string = false;
            }
        }
        stmt.push(c);
        i += 1;
        if !in_string && c == ';' {
            statements.push(trim(&stmt).to_string());
            stmt.clear();
        }
    }
    statements
}

/// Parses `content` as a sequence of SQL statements, populating `world`
/// with tables (schemas) and payloads. Statements that are neither a
/// recognised `CREATE TABLE` nor `INSERT INTO` are skipped.
pub fn load_sql(content: &str, world: &mut World) -> Result<()> {
    if content.is_empty() {
        return Err(DbError::Parse("SQL input is empty.".to_string()));
    }
    let mut table_columns: Vec<Vec<String>> = Vec::new();

    for stmt in split_statements(content) {
        if stmt.is_empty() {
            continue;
        }
        if let Some((table_name, schema_cols)) = parse_create_table_statement(&stmt) {
            let table_id = world.add_table(&table_name);
            if table_columns.len() <= table_id {
                table_columns.resize(table_id + 1, Vec::new());
            }
            if !schema_cols.is_empty() {
                table_columns[table_id] = schema_cols.clone();
                world.tables[table_id].columns = schema_cols;
            }
            continue;
        }
        if let Some(insert) = parse_insert_statement(&stmt) {
            let table_id = world.add_table(&insert.table);
            if table_columns.len() <= table_id {
                table_columns.resize(table_id + 1, Vec::new());
            }
            if !insert.columns.is_empty() && table_columns[table_id].is_empty() {
                table_columns[table_id] = insert.columns.clone();
                world.tables[table_id].columns = insert.columns.clone();
            }
            for row in &insert.rows {
                let fields: Vec<(String, String)> = if !insert.columns.is_empty() {
                    if row.len() != insert.columns.len() {
                        continue;
                    }
                    insert
                        .columns
                        .iter()
                        .zip(row.iter())
                        .map(|(name, value)| (name.clone(), strip_quotes(value)))
                        .collect()
                } else {
                    let schema = &table_columns[table_id];
                    row.iter()
                        .enumerate()
                        .map(|(ci, value)| {
                            let name = schema.get(ci).cloned().unwrap_or_else(|| format!("col{}", ci));
                            (name, strip_quotes(value))
                        })
                        .collect()
                };

                let mut found_id = false;
                let mut id_value = 0i64;
                if let Some((_, v)) = fields.iter().find(|(n, _)| ieq(n, "id")) {
                    if let Some(parsed) = parse_int_value(v) {
                        id_value = parsed;
                        found_id = true;
                    }
                }
                if !found_id {
                    if let Some((_, v)) = fields.first() {
                        if let Some(parsed) = parse_int_value(v) {
                            id_value = parsed;
                            found_id = true;
                        }
                    }
                }
                if !found_id {
                    id_value = world.payloads.len() as i64 + 1;
                }

                let mut foreign_keys = Vec::new();
                for (name, value) in &fields {
                    if !ends_with_id(name) {
                        continue;
                    }
                    let Some(fk_id) = parse_int_value(value) else {
                        continue;
                    };
                    let fk_table = fk_table_from_column(name);
                    let fk_table_id = world.add_table(&fk_table);
                    foreign_keys.push(ForeignKey {
                        column: name.clone(),
                        ref_table_id: fk_table_id,
                        ref_id: fk_id,
                    });
                }

                let raw_data = build_raw_data(&fields);
                world.payloads.push(Payload {
                    id: id_value,
                    table_id,
                    fields,
                    foreign_keys,
                    raw_data,
                    x: -1,
                    y: -1,
                    placed: false,
                });
            }
            continue;
        }
        // anything else is silently ignored
    }

    if world.payloads.is_empty() {
        return Err(DbError::Parse("No INSERT statements found.".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_smoke_creates_two_payloads() {
        let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
                   INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        assert_eq!(world.payloads.len(), 2);
        assert_eq!(world.payloads[0].id, 1);
        assert_eq!(world.payloads[0].raw_data, "Id=1, Title=A");
        assert_eq!(world.payloads[1].raw_data, "Id=2, Title=B");
    }

    #[test]
    fn fk_discovery_creates_referenced_table() {
        let sql = "INSERT INTO Track (Id,AlbumId,Name) VALUES (1,2,'t');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        let p = &world.payloads[0];
        assert_eq!(p.foreign_keys.len(), 1);
        assert_eq!(p.foreign_keys[0].column, "AlbumId");
        assert_eq!(p.foreign_keys[0].ref_table_id, world.find_table("Album").unwrap());
    }

    #[test]
    fn empty_input_is_fatal() {
        let mut world = World::new();
        assert!(load_sql("", &mut world).is_err());
    }

    #[test]
    fn no_inserts_is_fatal() {
        let mut world = World::new();
        assert!(load_sql("CREATE TABLE Foo (a int);", &mut world).is_err());
    }

    #[test]
    fn comments_are_stripped() {
        let sql = "-- comment\nINSERT INTO T (Id) VALUES (1); /* trailing */";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        assert_eq!(world.payloads.len(), 1);
    }

    #[test]
    fn row_length_mismatch_is_dropped() {
        let sql = "INSERT INTO T (Id,Name) VALUES (1,'a'),(2);";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        assert_eq!(world.payloads.len(), 1);
    }

    #[test]
    fn missing_columns_synthesises_names() {
        let sql = "INSERT INTO T VALUES (1,'a');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        assert_eq!(world.payloads[0].fields[1].0, "col1");
    }
}
