//! Interpreter for the SQL-subset grammar: row model, joins, aggregation,
//! subqueries, CTEs and UNION, layered over [`super::parser`]'s AST.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::{DbError, Result};
use crate::world::{Payload, World};

use super::ast::{Expr, JoinClause, JoinKind, SelectItemKind, SqlQuery};
use super::lexer::tokenize;
use super::parser::{parse_query, split_union, split_with};

/// An (cx, cy, radius) disc restricting table scans to nearby payloads.
pub type Focus = (f64, f64, f64);

/// One cell of a result row: original text, a null flag, and (if the text
/// parses as a double) its numeric value for numeric-aware comparisons.
#[derive(Debug, Clone)]
pub struct Cell {
    pub text: String,
    pub is_null: bool,
    pub num: Option<f64>,
}

impl Cell {
    pub fn null() -> Self {
        Self { text: String::new(), is_null: true, num: None }
    }

    pub fn text(s: impl Into<String>) -> Self {
        let text = s.into();
        let num = text.trim().parse::<f64>().ok();
        Self { text, is_null: false, num }
    }

    pub fn number(n: f64) -> Self {
        let text = if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            format!("{}", n)
        };
        Self { text, is_null: false, num: Some(n) }
    }
}

fn is_quoted_token(t: &str) -> bool {
    let chars: Vec<char> = t.chars().collect();
    chars.len() >= 2
        && ((chars[0] == '\'' && *chars.last().unwrap() == '\'')
            || (chars[0] == '"' && *chars.last().unwrap() == '"'))
}

fn strip_quote(t: &str) -> String {
    let chars: Vec<char> = t.chars().collect();
    chars[1..chars.len() - 1].iter().collect()
}

/// A result/source row: an insertion-ordered column list (for `SELECT *`)
/// paired with a case-insensitive lookup covering bare, `table.col` and
/// `alias.col` key forms, per SPEC_FULL.md §C.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub columns: Vec<String>,
    lookup: HashMap<String, usize>,
    cells: Vec<Cell>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_field(&mut self, bare: &str, table: Option<&str>, alias: Option<&str>, cell: Cell) {
        let idx = self.cells.len();
        self.columns.push(bare.to_string());
        self.cells.push(cell);
        self.lookup.entry(bare.to_lowercase()).or_insert(idx);
        if let Some(t) = table {
            self.lookup.insert(format!("{}.{}", t.to_lowercase(), bare.to_lowercase()), idx);
        }
        if let Some(a) = alias {
            self.lookup.insert(format!("{}.{}", a.to_lowercase(), bare.to_lowercase()), idx);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Cell> {
        self.lookup.get(&key.to_lowercase()).map(|&i| &self.cells[i])
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Adds `alias.col` keys for every existing column, reusing the same
    /// cell indices (used when a CTE or subquery result is given a FROM
    /// alias).
    pub fn with_alias(&self, alias: &str) -> Row {
        let mut out = self.clone();
        for (i, name) in self.columns.iter().enumerate() {
            out.lookup.insert(format!("{}.{}", alias.to_lowercase(), name.to_lowercase()), i);
        }
        out
    }

    /// Concatenates `self`'s and `other`'s columns/cells; on a bare-name
    /// collision the left side's key wins, matching the table-then-column
    /// "first join side takes precedence" convention this engine uses.
    pub fn merged(&self, other: &Row) -> Row {
        let mut out = self.clone();
        let offset = out.cells.len();
        out.columns.extend(other.columns.iter().cloned());
        out.cells.extend(other.cells.iter().cloned());
        for (k, &v) in other.lookup.iter() {
            out.lookup.entry(k.clone()).or_insert(v + offset);
        }
        out
    }

    /// A copy of `self` with every cell nulled out but columns/keys intact;
    /// used as the "missing side" template for LEFT/RIGHT join padding.
    pub fn nulled(&self) -> Row {
        let mut out = self.clone();
        for c in out.cells.iter_mut() {
            *c = Cell::null();
        }
        out
    }

    pub fn pipe_joined(&self) -> String {
        self.cells
            .iter()
            .map(|c| if c.is_null { "NULL".to_string() } else { c.text.clone() })
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// The final projected output of a query: a fixed column order plus rows in
/// that same shape.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

fn dedupe(rows: &mut Vec<Row>) {
    let mut seen = HashSet::new();
    rows.retain(|r| seen.insert(r.pipe_joined()));
}

// ---------------------------------------------------------------------
// Scalar value evaluation (identifiers, literals, nested function calls)
// ---------------------------------------------------------------------

struct ValueParser {
    tokens: Vec<String>,
    pos: usize,
}

impl ValueParser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn consume(&mut self) -> String {
        let t = self.tokens.get(self.pos).cloned().unwrap_or_default();
        self.pos += 1;
        t
    }

    fn parse(&mut self, row: &Row, outer: Option<&Row>) -> Cell {
        if self.tokens.is_empty() {
            return Cell::null();
        }
        let t = self.consume();
        if is_quoted_token(&t) {
            return Cell::text(strip_quote(&t));
        }
        if self.peek() == Some("(") {
            self.consume();
            let mut args = Vec::new();
            if self.peek() != Some(")") {
                loop {
                    args.push(self.parse(row, outer));
                    if self.peek() == Some(",") {
                        self.consume();
                        continue;
                    }
                    break;
                }
            }
            if self.peek() == Some(")") {
                self.consume();
            }
            return apply_function(&t.to_lowercase(), &args);
        }
        if t.eq_ignore_ascii_case("null") {
            return Cell::null();
        }
        if t.parse::<f64>().is_ok() {
            return Cell::text(t);
        }
        if let Some(c) = row.get(&t) {
            return c.clone();
        }
        if let Some(o) = outer {
            if let Some(c) = o.get(&t) {
                return c.clone();
            }
        }
        Cell::null()
    }
}

/// Evaluates a flattened scalar expression string — an identifier, a
/// literal, or a `func(args)` call as produced by the parser — against
/// `row`, falling back to `outer` for unresolved identifiers (single-level
/// correlation, per spec.md §4.8).
pub fn eval_scalar_text(text: &str, row: &Row, outer: Option<&Row>) -> Cell {
    let mut vp = ValueParser { tokens: tokenize(text), pos: 0 };
    vp.parse(row, outer)
}

fn apply_function(name: &str, args: &[Cell]) -> Cell {
    match name {
        "lower" => Cell::text(args.first().map(|c| c.text.to_lowercase()).unwrap_or_default()),
        "upper" => Cell::text(args.first().map(|c| c.text.to_uppercase()).unwrap_or_default()),
        "length" => Cell::number(args.first().map(|c| c.text.chars().count() as f64).unwrap_or(0.0)),
        "concat" => Cell::text(args.iter().map(|c| c.text.clone()).collect::<String>()),
        "substring" | "substr" => {
            let s = args.first().map(|c| c.text.clone()).unwrap_or_default();
            let chars: Vec<char> = s.chars().collect();
            let mut start = args.get(1).and_then(|c| c.num).unwrap_or(1.0) as i64;
            if start < 1 {
                start = 1;
            }
            let start0 = ((start - 1).max(0) as usize).min(chars.len());
            let len_arg = args.get(2).and_then(|c| c.num);
            let end0 = match len_arg {
                Some(l) if l < 0.0 => chars.len(),
                Some(l) => (start0 + l.max(0.0) as usize).min(chars.len()),
                None => chars.len(),
            };
            let out: String = chars[start0..end0.max(start0)].iter().collect();
            Cell::text(out)
        }
        _ => Cell::null(),
    }
}

fn cell_cmp(a: &Cell, b: &Cell) -> Ordering {
    match (a.num, b.num) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.text.cmp(&b.text),
    }
}

fn values_equal(a: &Cell, b: &Cell) -> bool {
    cell_cmp(a, b) == Ordering::Equal
}

fn compare_cells(op: &str, a: &Cell, b: &Cell) -> bool {
    if a.is_null || b.is_null {
        return false;
    }
    let ord = cell_cmp(a, b);
    match op {
        "=" => ord == Ordering::Equal,
        "!=" | "<>" => ord != Ordering::Equal,
        "<" => ord == Ordering::Less,
        "<=" => ord != Ordering::Greater,
        ">" => ord == Ordering::Greater,
        ">=" => ord != Ordering::Less,
        _ => false,
    }
}

fn cell_truthy(c: &Cell) -> bool {
    if c.is_null {
        return false;
    }
    match c.num {
        Some(n) => n != 0.0,
        None => !c.text.is_empty(),
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(text)).unwrap_or(false)
}

// ---------------------------------------------------------------------
// Evaluation context: distinguishes plain per-row evaluation (WHERE/ON/
// projection) from grouped-aggregate evaluation (HAVING/aggregate items).
// ---------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Ctx<'a> {
    Row { row: &'a Row, outer: Option<&'a Row> },
    Group { out_row: &'a Row, group_rows: &'a [&'a Row] },
}

impl<'a> Ctx<'a> {
    fn resolve(self, text: &str) -> Cell {
        match self {
            Ctx::Row { row, outer } => eval_scalar_text(text, row, outer),
            Ctx::Group { out_row, group_rows } => resolve_having_value(text, out_row, group_rows),
        }
    }

    fn correlation_row(self) -> Option<&'a Row> {
        match self {
            Ctx::Row { row, .. } => Some(row),
            Ctx::Group { group_rows, .. } => group_rows.first().copied(),
        }
    }
}

fn resolve_having_value(text: &str, out_row: &Row, group_rows: &[&Row]) -> Cell {
    if let Some(c) = out_row.get(text) {
        return c.clone();
    }
    let lower = text.trim().to_lowercase();
    for func in ["count", "sum", "avg", "min", "max"] {
        let prefix = format!("{}(", func);
        if lower.starts_with(&prefix) && lower.ends_with(')') {
            let inner = &text[prefix.len()..text.len() - 1];
            return compute_agg(func, inner, group_rows);
        }
    }
    match group_rows.first() {
        Some(r) => eval_scalar_text(text, r, None),
        None => Cell::null(),
    }
}

fn compute_agg(func: &str, col_text: &str, rows: &[&Row]) -> Cell {
    match func {
        "count" => {
            if col_text.trim() == "*" {
                Cell::number(rows.len() as f64)
            } else {
                let n = rows.iter().filter(|r| !eval_scalar_text(col_text, r, None).is_null).count();
                Cell::number(n as f64)
            }
        }
        "sum" => {
            let s: f64 = rows.iter().filter_map(|r| eval_scalar_text(col_text, r, None).num).sum();
            Cell::number(s)
        }
        "avg" => {
            let nums: Vec<f64> = rows.iter().filter_map(|r| eval_scalar_text(col_text, r, None).num).collect();
            if nums.is_empty() {
                Cell::number(0.0)
            } else {
                Cell::number(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "min" | "max" => {
            let mut best: Option<Cell> = None;
            for r in rows {
                let c = eval_scalar_text(col_text, r, None);
                if c.is_null {
                    continue;
                }
                best = Some(match best {
                    None => c,
                    Some(b) => {
                        let better = if func == "min" { cell_cmp(&c, &b) == Ordering::Less } else { cell_cmp(&c, &b) == Ordering::Greater };
                        if better {
                            c
                        } else {
                            b
                        }
                    }
                });
            }
            best.unwrap_or_else(Cell::null)
        }
        _ => Cell::null(),
    }
}

fn eval_leaf(expr: &Expr, ctx: &Ctx) -> Cell {
    match expr {
        Expr::Value(text) => ctx.resolve(text),
        other => {
            if eval_expr_inner(other, ctx, None).unwrap_or(false) {
                Cell::number(1.0)
            } else {
                Cell::number(0.0)
            }
        }
    }
}

/// Evaluates a boolean expression. `engine` is `None` for leaf comparisons
/// that never reach a subquery; `Some` is required for `InSubquery`/
/// `Exists`, which recurse into [`execute_select_expr`].
fn eval_expr_inner(expr: &Expr, ctx: &Ctx, engine: Option<(&World, &HashMap<String, ResultSet>, Option<Focus>)>) -> Result<bool> {
    Ok(match expr {
        Expr::Value(text) => cell_truthy(&ctx.resolve(text)),
        Expr::Compare { op, lhs, rhs } => compare_cells(op, &eval_leaf(lhs, ctx), &eval_leaf(rhs, ctx)),
        Expr::And(l, r) => eval_expr_inner(l, ctx, engine)? && eval_expr_inner(r, ctx, engine)?,
        Expr::Or(l, r) => eval_expr_inner(l, ctx, engine)? || eval_expr_inner(r, ctx, engine)?,
        Expr::Not(e) => !eval_expr_inner(e, ctx, engine)?,
        Expr::InList { lhs, list } => {
            let a = eval_leaf(lhs, ctx);
            !a.is_null
                && list.iter().any(|tok| {
                    let b = ctx.resolve(tok);
                    !b.is_null && values_equal(&a, &b)
                })
        }
        Expr::Between { lhs, lo, hi } => {
            let a = eval_leaf(lhs, ctx);
            let lo_c = ctx.resolve(lo);
            let hi_c = ctx.resolve(hi);
            !a.is_null && !lo_c.is_null && !hi_c.is_null && cell_cmp(&a, &lo_c) != Ordering::Less && cell_cmp(&a, &hi_c) != Ordering::Greater
        }
        Expr::Like { lhs, pattern } => {
            let a = eval_leaf(lhs, ctx);
            let p = ctx.resolve(pattern);
            !a.is_null && like_match(&a.text, &p.text)
        }
        Expr::Regexp { lhs, pattern } => {
            let a = eval_leaf(lhs, ctx);
            let p = ctx.resolve(pattern);
            if a.is_null {
                false
            } else {
                let re = Regex::new(&p.text).map_err(|e| DbError::Parse(format!("invalid REGEXP pattern: {}", e)))?;
                re.is_match(&a.text)
            }
        }
        Expr::IsNull { lhs, negate } => {
            let a = eval_leaf(lhs, ctx);
            if *negate {
                !a.is_null
            } else {
                a.is_null
            }
        }
        Expr::InSubquery { lhs, subquery } => {
            let a = eval_leaf(lhs, ctx);
            let Some((world, ctes, focus)) = engine else { return Ok(false) };
            if a.is_null {
                false
            } else {
                let rs = execute_select_expr(subquery, world, ctes, ctx.correlation_row(), focus)?;
                rs.rows.iter().any(|r| r.cells().first().map(|c| !c.is_null && values_equal(&a, c)).unwrap_or(false))
            }
        }
        Expr::Exists { subquery } => {
            let Some((world, ctes, focus)) = engine else { return Ok(false) };
            let rs = execute_select_expr(subquery, world, ctes, ctx.correlation_row(), focus)?;
            !rs.rows.is_empty()
        }
    })
}

fn eval_bool(expr: &Expr, ctx: &Ctx, world: &World, ctes: &HashMap<String, ResultSet>, focus: Option<Focus>) -> Result<bool> {
    eval_expr_inner(expr, ctx, Some((world, ctes, focus)))
}

// ---------------------------------------------------------------------
// Row sourcing
// ---------------------------------------------------------------------

fn row_from_payload(table_name: &str, alias: Option<&str>, p: &Payload) -> Row {
    let mut row = Row::new();
    let mut seen_id = false;
    for (name, value) in &p.fields {
        if name.eq_ignore_ascii_case("id") {
            seen_id = true;
        }
        row.push_field(name, Some(table_name), alias, Cell::text(value));
    }
    if !seen_id {
        row.push_field("id", Some(table_name), alias, Cell::number(p.id as f64));
    }
    row
}

fn base_rows(world: &World, table_id: usize, table_name: &str, alias: Option<&str>, focus: Option<Focus>) -> Vec<Row> {
    world
        .payloads
        .iter()
        .filter(|p| p.table_id == table_id)
        .filter(|p| match focus {
            None => true,
            Some((cx, cy, r)) => {
                if !p.placed {
                    false
                } else {
                    let dx = p.x as f64 - cx;
                    let dy = p.y as f64 - cy;
                    dx * dx + dy * dy <= r * r
                }
            }
        })
        .map(|p| row_from_payload(table_name, alias, p))
        .collect()
}

fn resolve_from(world: &World, ctes: &HashMap<String, ResultSet>, name: &str, alias: Option<&str>, focus: Option<Focus>) -> Result<Vec<Row>> {
    if let Some(rs) = ctes.get(&name.to_lowercase()) {
        return Ok(match alias {
            Some(a) => rs.rows.iter().map(|r| r.with_alias(a)).collect(),
            None => rs.rows.clone(),
        });
    }
    let table_id = world
        .find_table(name)
        .ok_or_else(|| DbError::Schema(format!("unknown table '{}'", name)))?;
    let display = world.table(table_id).map(|t| t.name.clone()).unwrap_or_default();
    Ok(base_rows(world, table_id, &display, alias, focus))
}

fn join_matches(l: &Row, r: &Row, left_col: &str, right_col: &str) -> bool {
    match (l.get(left_col), r.get(right_col)) {
        (Some(a), Some(b)) => !a.is_null && !b.is_null && values_equal(a, b),
        _ => false,
    }
}

fn apply_join(left: Vec<Row>, right: Vec<Row>, join: &JoinClause) -> Vec<Row> {
    match join.kind {
        JoinKind::Cross => {
            let mut out = Vec::with_capacity(left.len() * right.len().max(1));
            for l in &left {
                for r in &right {
                    out.push(l.merged(r));
                }
            }
            out
        }
        JoinKind::Inner => {
            let mut out = Vec::new();
            for l in &left {
                for r in &right {
                    if join_matches(l, r, &join.left_col, &join.right_col) {
                        out.push(l.merged(r));
                    }
                }
            }
            out
        }
        JoinKind::Left => {
            let mut out = Vec::new();
            let right_template = right.first().map(Row::nulled);
            for l in &left {
                let mut any = false;
                for r in &right {
                    if join_matches(l, r, &join.left_col, &join.right_col) {
                        out.push(l.merged(r));
                        any = true;
                    }
                }
                if !any {
                    match &right_template {
                        Some(rt) => out.push(l.merged(rt)),
                        None => out.push(l.clone()),
                    }
                }
            }
            out
        }
        JoinKind::Right => {
            let mut out = Vec::new();
            let left_template = left.first().map(Row::nulled);
            for r in &right {
                let mut any = false;
                for l in &left {
                    if join_matches(l, r, &join.left_col, &join.right_col) {
                        out.push(l.merged(r));
                        any = true;
                    }
                }
                if !any {
                    match &left_template {
                        Some(lt) => out.push(lt.merged(r)),
                        None => out.push(r.clone()),
                    }
                }
            }
            out
        }
    }
}

// ---------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------

fn project_row(items: &[super::ast::SelectItem], row: &Row, outer: Option<&Row>) -> Row {
    let mut out = Row::new();
    for item in items {
        match item.kind {
            SelectItemKind::Star => {
                for (name, cell) in row.columns.iter().zip(row.cells().iter()) {
                    out.push_field(name, None, None, cell.clone());
                }
            }
            SelectItemKind::Column => {
                let value = eval_scalar_text(&item.column, row, outer);
                let name = item.alias.clone().unwrap_or_else(|| item.raw.clone());
                out.push_field(&name, None, None, value);
            }
            SelectItemKind::Agg => unreachable!("aggregates require GROUP BY and are projected separately"),
        }
    }
    out
}

fn output_columns(items: &[super::ast::SelectItem], template: Option<&Row>) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
        match item.kind {
            SelectItemKind::Star => {
                if let Some(t) = template {
                    out.extend(t.columns.clone());
                }
            }
            _ => out.push(item.alias.clone().unwrap_or_else(|| item.raw.clone())),
        }
    }
    out
}

fn group_key(row: &Row, group_by: &[String]) -> String {
    group_by
        .iter()
        .map(|c| match row.get(c) {
            Some(cell) if !cell.is_null => cell.text.clone(),
            _ => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join("|")
}

// ---------------------------------------------------------------------
// Core select execution
// ---------------------------------------------------------------------

pub fn execute_select_core(
    q: &SqlQuery,
    world: &World,
    ctes: &HashMap<String, ResultSet>,
    outer: Option<&Row>,
    focus: Option<Focus>,
) -> Result<ResultSet> {
    let has_star = q.select_items.iter().any(|i| matches!(i.kind, SelectItemKind::Star));
    let has_agg = q.select_items.iter().any(|i| matches!(i.kind, SelectItemKind::Agg));
    if has_star && !q.group_by.is_empty() {
        return Err(DbError::Schema("SELECT * is not allowed with GROUP BY".to_string()));
    }
    if has_agg && q.group_by.is_empty() {
        return Err(DbError::Schema("aggregate functions require GROUP BY".to_string()));
    }

    let mut rows = if let Some(sub) = &q.from_subquery {
        let rs = execute_select_expr(sub, world, ctes, outer, focus)?;
        match &q.from_alias {
            Some(a) => rs.rows.iter().map(|r| r.with_alias(a)).collect(),
            None => rs.rows,
        }
    } else {
        resolve_from(world, ctes, &q.from_table, q.from_alias.as_deref(), focus)?
    };

    for join in &q.joins {
        let right_rows = resolve_from(world, ctes, &join.table, join.alias.as_deref(), focus)?;
        rows = apply_join(rows, right_rows, join);
    }

    let template = rows.first().cloned();

    if let Some(where_expr) = &q.where_expr {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let ctx = Ctx::Row { row: &row, outer };
            if eval_bool(where_expr, &ctx, world, ctes, focus)? {
                kept.push(row);
            }
        }
        rows = kept;
    }

    let mut out_rows: Vec<Row> = if !q.group_by.is_empty() {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            let k = group_key(row, &q.group_by);
            groups.entry(k.clone()).or_insert_with(|| {
                order.push(k.clone());
                Vec::new()
            });
            groups.get_mut(&k).unwrap().push(i);
        }

        let mut out = Vec::new();
        for k in &order {
            let idxs = &groups[k];
            let group_rows: Vec<&Row> = idxs.iter().map(|&i| &rows[i]).collect();
            let mut out_row = Row::new();
            for item in &q.select_items {
                let value = match item.kind {
                    SelectItemKind::Agg => compute_agg(&item.func, &item.column, &group_rows),
                    SelectItemKind::Column => eval_scalar_text(&item.column, group_rows[0], None),
                    SelectItemKind::Star => unreachable!(),
                };
                let name = item.alias.clone().unwrap_or_else(|| item.raw.clone());
                out_row.push_field(&name, None, None, value);
            }
            if let Some(h) = &q.having_expr {
                let ctx = Ctx::Group { out_row: &out_row, group_rows: &group_rows };
                if !eval_bool(h, &ctx, world, ctes, focus)? {
                    continue;
                }
            }
            out.push(out_row);
        }
        out
    } else {
        rows.iter().map(|r| project_row(&q.select_items, r, outer)).collect()
    };

    if q.distinct {
        dedupe(&mut out_rows);
    }

    if !q.order_by.is_empty() {
        out_rows.sort_by(|a, b| {
            for (key, asc) in &q.order_by {
                let (ca, cb) = if let Ok(pos) = key.parse::<usize>() {
                    (a.cells().get(pos.saturating_sub(1)), b.cells().get(pos.saturating_sub(1)))
                } else {
                    (a.get(key), b.get(key))
                };
                let ord = match (ca, cb) {
                    (Some(x), Some(y)) => x.text.cmp(&y.text),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ord = if *asc { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let offset = q.offset.max(0) as usize;
    out_rows = out_rows.into_iter().skip(offset).collect();
    if let Some(limit) = q.limit {
        if limit >= 0 {
            out_rows.truncate(limit as usize);
        }
    }

    let columns = if let Some(first) = out_rows.first() {
        first.columns.clone()
    } else {
        output_columns(&q.select_items, template.as_ref())
    };

    Ok(ResultSet { columns, rows: out_rows })
}

/// Executes a `select_expr` (one or more `UNION`/`UNION ALL`-joined
/// `select_core`s).
pub fn execute_select_expr(
    sql: &str,
    world: &World,
    ctes: &HashMap<String, ResultSet>,
    outer: Option<&Row>,
    focus: Option<Focus>,
) -> Result<ResultSet> {
    if let Some(parts) = split_union(sql) {
        let mut acc: Option<ResultSet> = None;
        for (i, part) in parts.iter().enumerate() {
            let q = parse_query(&part.sql).ok_or_else(|| DbError::Parse("invalid query".to_string()))?;
            let rs = execute_select_core(&q, world, ctes, outer, focus)?;
            acc = Some(match acc {
                None => rs,
                Some(mut a) => {
                    if !a.columns.is_empty() && !rs.columns.is_empty() && a.columns.len() != rs.columns.len() {
                        return Err(DbError::Schema("UNION column count mismatch".to_string()));
                    }
                    if a.columns.is_empty() {
                        a.columns = rs.columns.clone();
                    }
                    a.rows.extend(rs.rows);
                    if !parts[i - 1].all {
                        dedupe(&mut a.rows);
                    }
                    a
                }
            });
        }
        Ok(acc.unwrap_or_default())
    } else {
        let q = parse_query(sql).ok_or_else(|| DbError::Parse("invalid query".to_string()))?;
        execute_select_core(&q, world, ctes, outer, focus)
    }
}

/// Executes a full statement: an optional non-recursive `WITH` clause
/// followed by a `select_expr`.
pub fn execute_statement(sql: &str, world: &World, focus: Option<Focus>) -> Result<ResultSet> {
    let wc = split_with(sql);
    let mut ctes: HashMap<String, ResultSet> = HashMap::new();
    for (name, body) in &wc.ctes {
        let rs = execute_select_expr(body, world, &ctes, None, focus)?;
        ctes.insert(name.to_lowercase(), rs);
    }
    execute_select_expr(&wc.rest, world, &ctes, None, focus)
}

/// Entry point matching spec.md §4.8's `db_execute_sql`; `focus` is
/// `(cx, cy, radius)` in grid-cell units, applied to every table scan
/// reached by the statement (base tables, subqueries, CTEs, and joins
/// alike).
pub fn db_execute_sql(world: &World, sql: &str, focus: Option<(i64, i64, i64)>) -> Result<ResultSet> {
    let focus_f = focus.map(|(x, y, r)| (x as f64, y as f64, r as f64));
    execute_statement(sql, world, focus_f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::carriers::{run_ingest, IngestConfig};
    use crate::ingest::sql_parser::load_sql;

    fn sample_world() -> World {
        let sql = "CREATE TABLE Album (Id INT, Title TEXT);\n\
                   INSERT INTO Album (Id,Title) VALUES (1,'A'),(2,'B');\n\
                   INSERT INTO Track (Id,AlbumId,Name) VALUES (1,2,'t'),(2,2,'u');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        world.init_world(32, 32).unwrap();
        run_ingest(&mut world, &IngestConfig { agent_count: 16, steps: 200, seed: 42, spawn_x: None, spawn_y: None }).unwrap();
        world
    }

    #[test]
    fn select_star_returns_all_columns() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT * FROM Album", None).unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert!(rs.columns.iter().any(|c| c.eq_ignore_ascii_case("Title")));
    }

    #[test]
    fn inner_join_matches_s4() {
        let world = sample_world();
        let rs = db_execute_sql(
            &world,
            "SELECT t.Name, a.Title FROM Track t JOIN Album a ON t.AlbumId = a.Id WHERE t.Name = 't' ORDER BY t.Name",
            None,
        )
        .unwrap();
        assert_eq!(rs.rows.len(), 1);
        let cells = rs.rows[0].cells();
        assert_eq!(cells[0].text, "t");
        assert_eq!(cells[1].text, "B");
    }

    #[test]
    fn group_by_count_matches_s5() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT AlbumId, COUNT(*) AS n FROM Track GROUP BY AlbumId ORDER BY n DESC", None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0].cells()[0].text, "2");
        assert_eq!(rs.rows[0].cells()[1].text, "2");
    }

    #[test]
    fn union_dedups_by_default() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT Id FROM Album UNION SELECT AlbumId FROM Track", None).unwrap();
        let mut values: Vec<String> = rs.rows.iter().map(|r| r.cells()[0].text.clone()).collect();
        values.sort();
        assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn union_all_preserves_duplicates() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT Id FROM Album UNION ALL SELECT AlbumId FROM Track", None).unwrap();
        assert_eq!(rs.rows.len(), 4);
    }

    #[test]
    fn select_star_with_group_by_is_rejected() {
        let world = sample_world();
        let err = db_execute_sql(&world, "SELECT * FROM Track GROUP BY AlbumId", None).unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn aggregate_without_group_by_is_rejected() {
        let world = sample_world();
        let err = db_execute_sql(&world, "SELECT COUNT(*) FROM Track", None).unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn cte_is_queryable_as_a_table() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "WITH t2 AS (SELECT * FROM Album WHERE Id = 2) SELECT Title FROM t2", None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0].cells()[0].text, "B");
    }

    #[test]
    fn exists_subquery_is_correlated() {
        let world = sample_world();
        let rs = db_execute_sql(
            &world,
            "SELECT Title FROM Album WHERE EXISTS (SELECT Id FROM Track WHERE AlbumId = Album.Id)",
            None,
        )
        .unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0].cells()[0].text, "B");
    }

    #[test]
    fn like_and_regexp_filter_rows() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT Title FROM Album WHERE Title LIKE 'A'", None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        let rs2 = db_execute_sql(&world, "SELECT Title FROM Album WHERE Title REGEXP '^[AB]$'", None).unwrap();
        assert_eq!(rs2.rows.len(), 2);
    }

    #[test]
    fn between_and_in_list() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT Id FROM Album WHERE Id BETWEEN 1 AND 1", None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        let rs2 = db_execute_sql(&world, "SELECT Id FROM Album WHERE Id IN (2, 3)", None).unwrap();
        assert_eq!(rs2.rows.len(), 1);
    }

    #[test]
    fn scalar_functions_project_correctly() {
        let world = sample_world();
        let rs = db_execute_sql(&world, "SELECT UPPER(Title) AS t FROM Album WHERE Id = 1", None).unwrap();
        assert_eq!(rs.rows[0].cells()[0].text, "A");
    }

    #[test]
    fn left_join_emits_unmatched_rows() {
        let sql = "CREATE TABLE Track (Id INT, AlbumId INT);\n\
                   INSERT INTO Album (Id,Title) VALUES (9,'lonely');";
        let mut world = World::new();
        load_sql(sql, &mut world).unwrap();
        world.init_world(16, 16).unwrap();
        run_ingest(&mut world, &IngestConfig { agent_count: 8, steps: 100, seed: 1, spawn_x: None, spawn_y: None }).unwrap();
        let rs = db_execute_sql(&world, "SELECT a.Title FROM Album a LEFT JOIN Track t ON a.Id = t.AlbumId", None).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0].cells()[0].text, "lonely");
    }

    #[test]
    fn unknown_table_is_a_schema_error() {
        let world = sample_world();
        let err = db_execute_sql(&world, "SELECT * FROM Nope", None).unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn invalid_regexp_surfaces_parse_error() {
        let world = sample_world();
        let err = db_execute_sql(&world, "SELECT Title FROM Album WHERE Title REGEXP '('", None).unwrap_err();
        assert!(matches!(err, DbError::Parse(_)));
    }
}
