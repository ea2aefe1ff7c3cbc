//! Recursive-descent parser over the token stream produced by
//! [`super::lexer::tokenize`].

use super::ast::{Expr, JoinClause, JoinKind, SelectItem, SelectItemKind, SqlQuery};
use super::lexer::tokenize;

pub struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    pub fn new(sql: &str) -> Self {
        Self {
            tokens: tokenize(sql),
            pos: 0,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> &str {
        if self.eof() {
            ""
        } else {
            &self.tokens[self.pos]
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        !self.eof() && self.tokens[self.pos].eq_ignore_ascii_case(kw)
    }

    fn match_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn match_symbol(&mut self, sym: &str) -> bool {
        if !self.eof() && self.tokens[self.pos] == sym {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume(&mut self) -> String {
        if self.eof() {
            String::new()
        } else {
            let t = self.tokens[self.pos].clone();
            self.pos += 1;
            t
        }
    }

    /// Consumes a balanced parenthesised group (the opening `(` must
    /// already have been consumed) as a flattened, space-joined string.
    fn consume_balanced(&mut self) -> String {
        let mut out = String::new();
        let mut depth = 1;
        while !self.eof() && depth > 0 {
            let t = self.consume();
            if t == "(" {
                depth += 1;
            }
            if t == ")" {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&t);
        }
        out
    }
}

fn parse_plain_identifier(p: &mut Parser) -> Option<String> {
    if p.eof() {
        return None;
    }
    let t = p.consume();
    if t == "," || t == "(" || t == ")" || t == "*" {
        None
    } else {
        Some(t)
    }
}

fn parse_select_list(p: &mut Parser) -> Option<Vec<SelectItem>> {
    let mut out = Vec::new();
    loop {
        if p.peek() == "*" {
            p.consume();
            out.push(SelectItem {
                kind: SelectItemKind::Star,
                column: String::new(),
                func: String::new(),
                alias: None,
                raw: "*".to_string(),
            });
        } else {
            let name = p.consume();
            let lower = name.to_lowercase();
            let mut item = if !p.eof() && p.peek() == "(" {
                p.consume();
                let arglist = p.consume_balanced();
                let raw = format!("{}({})", lower, arglist);
                if matches!(lower.as_str(), "count" | "sum" | "avg" | "min" | "max") {
                    SelectItem {
                        kind: SelectItemKind::Agg,
                        column: if arglist.is_empty() { "*".to_string() } else { arglist },
                        func: lower,
                        alias: None,
                        raw,
                    }
                } else {
                    SelectItem {
                        kind: SelectItemKind::Column,
                        column: raw.clone(),
                        func: String::new(),
                        alias: None,
                        raw,
                    }
                }
            } else {
                SelectItem {
                    kind: SelectItemKind::Column,
                    column: name.clone(),
                    func: String::new(),
                    alias: None,
                    raw: name,
                }
            };
            if p.match_kw("as") {
                item.alias = parse_plain_identifier(p);
            } else if !p.eof() && p.peek() != "," && !p.is_kw("from") {
                item.alias = parse_plain_identifier(p);
            }
            out.push(item);
        }
        if p.match_symbol(",") {
            continue;
        }
        break;
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn parse_primary(p: &mut Parser) -> Option<Expr> {
    if p.match_symbol("(") {
        let inner = parse_expr(p)?;
        if !p.match_symbol(")") {
            return None;
        }
        return Some(inner);
    }
    if p.match_kw("exists") {
        if !p.match_symbol("(") {
            return None;
        }
        let sub = p.consume_balanced();
        return Some(Expr::Exists { subquery: sub });
    }
    if p.match_kw("not") {
        let inner = parse_primary(p)?;
        return Some(Expr::Not(Box::new(inner)));
    }
    if p.eof() {
        return None;
    }
    let head = p.consume();
    if !p.eof() && p.peek() == "(" {
        p.consume();
        let arglist = p.consume_balanced();
        return Some(Expr::Value(format!("{}({})", head.to_lowercase(), arglist)));
    }
    Some(Expr::Value(head))
}

fn parse_compare(p: &mut Parser) -> Option<Expr> {
    let left = parse_primary(p)?;
    let negated = p.match_kw("not");

    if p.match_kw("is") {
        let is_not = p.match_kw("not");
        if !p.match_kw("null") {
            return None;
        }
        let expr = Expr::IsNull {
            lhs: Box::new(left),
            negate: is_not,
        };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    if p.match_kw("between") {
        let lo = p.consume();
        if !p.match_kw("and") {
            return None;
        }
        let hi = p.consume();
        let expr = Expr::Between { lhs: Box::new(left), lo, hi };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    if p.match_kw("in") {
        if !p.match_symbol("(") {
            return None;
        }
        if p.is_kw("select") || p.is_kw("with") {
            let head = p.consume();
            let rest = p.consume_balanced();
            let sub = if rest.is_empty() { head } else { format!("{} {}", head, rest) };
            let expr = Expr::InSubquery { lhs: Box::new(left), subquery: sub };
            return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
        }
        let mut list = Vec::new();
        loop {
            if p.eof() {
                return None;
            }
            list.push(p.consume());
            if p.match_symbol(")") {
                break;
            }
            if !p.match_symbol(",") {
                return None;
            }
        }
        let expr = Expr::InList { lhs: Box::new(left), list };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    if p.match_kw("like") {
        let pattern = p.consume();
        let expr = Expr::Like { lhs: Box::new(left), pattern };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    if p.match_kw("regexp") {
        let pattern = p.consume();
        let expr = Expr::Regexp { lhs: Box::new(left), pattern };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    if p.eof() {
        return Some(left);
    }
    let op = p.peek().to_string();
    if matches!(op.as_str(), "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=") {
        p.consume();
        let right = parse_primary(p)?;
        let expr = Expr::Compare { op, lhs: Box::new(left), rhs: Box::new(right) };
        return Some(if negated { Expr::Not(Box::new(expr)) } else { expr });
    }
    Some(left)
}

fn parse_and(p: &mut Parser) -> Option<Expr> {
    let mut left = parse_compare(p)?;
    while p.match_kw("and") {
        let right = parse_compare(p)?;
        left = Expr::And(Box::new(left), Box::new(right));
    }
    Some(left)
}

pub fn parse_expr(p: &mut Parser) -> Option<Expr> {
    let mut left = parse_and(p)?;
    while p.match_kw("or") {
        let right = parse_and(p)?;
        left = Expr::Or(Box::new(left), Box::new(right));
    }
    Some(left)
}

const FROM_STOPWORDS: &[&str] = &["join", "left", "where", "right", "cross", "group", "order", "limit", "offset", "inner"];

pub fn parse_query(sql: &str) -> Option<SqlQuery> {
    let mut p = Parser::new(sql);
    let mut out = SqlQuery::default();

    if !p.match_kw("select") {
        return None;
    }
    if p.match_kw("distinct") {
        out.distinct = true;
    }
    out.select_items = parse_select_list(&mut p)?;
    if !p.match_kw("from") {
        return None;
    }
    if p.match_symbol("(") {
        out.from_subquery = Some(p.consume_balanced());
    } else {
        out.from_table = parse_plain_identifier(&mut p)?;
    }
    if p.match_kw("as") {
        out.from_alias = parse_plain_identifier(&mut p);
    } else if !p.eof() && !FROM_STOPWORDS.iter().any(|kw| p.is_kw(kw)) {
        out.from_alias = parse_plain_identifier(&mut p);
    }

    loop {
        let kind = if p.match_kw("left") {
            if !p.match_kw("join") {
                return None;
            }
            JoinKind::Left
        } else if p.match_kw("right") {
            if !p.match_kw("join") {
                return None;
            }
            JoinKind::Right
        } else if p.match_kw("cross") {
            if !p.match_kw("join") {
                return None;
            }
            JoinKind::Cross
        } else if p.match_kw("join") || p.match_kw("inner") {
            if p.is_kw("join") {
                p.consume();
            }
            JoinKind::Inner
        } else {
            break;
        };

        let table = parse_plain_identifier(&mut p)?;
        let alias = if p.match_kw("as") {
            parse_plain_identifier(&mut p)
        } else if !p.eof() && !p.is_kw("on") {
            parse_plain_identifier(&mut p)
        } else {
            None
        };

        let (left_col, right_col) = if kind == JoinKind::Cross {
            (String::new(), String::new())
        } else {
            if !p.match_kw("on") {
                return None;
            }
            let left = p.consume();
            if !p.match_symbol("=") {
                return None;
            }
            let right = p.consume();
            (left, right)
        };

        out.joins.push(JoinClause { kind, table, alias, left_col, right_col });
    }

    if p.match_kw("where") {
        out.where_expr = parse_expr(&mut p);
    }
    if p.match_kw("group") {
        if !p.match_kw("by") {
            return None;
        }
        loop {
            out.group_by.push(p.consume());
            if p.match_symbol(",") {
                continue;
            }
            break;
        }
    }
    if p.match_kw("having") {
        out.having_expr = parse_expr(&mut p);
    }
    if p.match_kw("order") {
        if !p.match_kw("by") {
            return None;
        }
        loop {
            let col = p.consume();
            let asc = if p.match_kw("asc") {
                true
            } else if p.match_kw("desc") {
                false
            } else {
                true
            };
            out.order_by.push((col, asc));
            if p.match_symbol(",") {
                continue;
            }
            break;
        }
    }
    if p.match_kw("limit") {
        out.limit = p.consume().parse().ok();
    }
    if p.match_kw("offset") {
        out.offset = p.consume().parse().unwrap_or(0);
    }
    Some(out)
}

pub struct UnionPart {
    pub sql: String,
    pub all: bool,
}

/// Splits `sql` on top-level `UNION [ALL]` boundaries (ignoring ones nested
/// inside parentheses). Returns `None` if there's no top-level UNION.
pub fn split_union(sql: &str) -> Option<Vec<UnionPart>> {
    let mut p = Parser::new(sql);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    while !p.eof() {
        let t = p.consume();
        if t == "(" {
            depth += 1;
        } else if t == ")" {
            depth = (depth - 1).max(0);
        }
        if depth == 0 && t.eq_ignore_ascii_case("union") {
            let all = p.match_kw("all");
            parts.push(UnionPart {
                sql: std::mem::take(&mut current),
                all,
            });
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&t);
    }
    if !current.is_empty() {
        parts.push(UnionPart { sql: current, all: false });
    }
    if parts.len() > 1 {
        Some(parts)
    } else {
        None
    }
}

pub struct WithClause {
    pub ctes: Vec<(String, String)>,
    pub rest: String,
}

/// Splits a leading non-recursive `WITH name AS (body), ...` clause off of
/// `sql`, returning the CTE name/body pairs in definition order and the
/// remaining `select_expr` text. Returns an empty CTE list (and `rest ==
/// sql`) when there is no leading `WITH`.
pub fn split_with(sql: &str) -> WithClause {
    let mut p = Parser::new(sql);
    if !p.match_kw("with") {
        return WithClause { ctes: Vec::new(), rest: sql.to_string() };
    }
    let mut ctes = Vec::new();
    loop {
        let name = p.consume();
        if name.is_empty() || !p.match_kw("as") || !p.match_symbol("(") {
            break;
        }
        let body = p.consume_balanced();
        ctes.push((name, body));
        if p.match_symbol(",") {
            continue;
        }
        break;
    }
    let mut rest = String::new();
    while !p.eof() {
        let t = p.consume();
        if !rest.is_empty() {
            rest.push(' ');
        }
        rest.push_str(&t);
    }
    WithClause { ctes, rest }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_with_extracts_named_ctes() {
        let wc = split_with("WITH t2 AS (SELECT * FROM Album WHERE Id = 2) SELECT Title FROM t2");
        assert_eq!(wc.ctes.len(), 1);
        assert_eq!(wc.ctes[0].0, "t2");
        assert_eq!(wc.rest, "SELECT Title FROM t2");
    }

    #[test]
    fn split_with_passes_through_plain_select() {
        let wc = split_with("SELECT Id FROM Album");
        assert!(wc.ctes.is_empty());
        assert_eq!(wc.rest, "SELECT Id FROM Album");
    }

    #[test]
    fn parses_basic_select() {
        let q = parse_query("SELECT Name FROM Track WHERE AlbumId = 2").unwrap();
        assert_eq!(q.from_table, "Track");
        assert_eq!(q.select_items.len(), 1);
        assert!(q.where_expr.is_some());
    }

    #[test]
    fn parses_join_with_alias() {
        let q = parse_query("SELECT t.Name, a.Title FROM Track t JOIN Album a ON t.AlbumId = a.Id ORDER BY t.Name").unwrap();
        assert_eq!(q.joins.len(), 1);
        assert_eq!(q.joins[0].kind, JoinKind::Inner);
        assert_eq!(q.from_alias, Some("t".to_string()));
    }

    #[test]
    fn parses_group_by_and_having() {
        let q = parse_query("SELECT AlbumId, COUNT(*) AS n FROM Track GROUP BY AlbumId HAVING n > 1").unwrap();
        assert_eq!(q.group_by, vec!["AlbumId"]);
        assert!(q.having_expr.is_some());
    }

    #[test]
    fn split_union_finds_top_level_union() {
        let parts = split_union("SELECT Id FROM Album UNION SELECT AlbumId FROM Track").unwrap();
        assert_eq!(parts.len(), 2);
        assert!(!parts[0].all);
    }

    #[test]
    fn no_union_returns_none() {
        assert!(split_union("SELECT Id FROM Album").is_none());
    }
}
