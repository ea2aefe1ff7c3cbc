//! AST types for the SQL-subset grammar (§4.8).

#[derive(Debug, Clone)]
pub enum Expr {
    /// A bare identifier, a quoted literal (kept quoted), or a pre-built
    /// `func(args)` call string.
    Value(String),
    Compare { op: String, lhs: Box<Expr>, rhs: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    InList { lhs: Box<Expr>, list: Vec<String> },
    InSubquery { lhs: Box<Expr>, subquery: String },
    Between { lhs: Box<Expr>, lo: String, hi: String },
    Like { lhs: Box<Expr>, pattern: String },
    Regexp { lhs: Box<Expr>, pattern: String },
    Exists { subquery: String },
    IsNull { lhs: Box<Expr>, negate: bool },
}

#[derive(Debug, Clone)]
pub enum SelectItemKind {
    Star,
    Column,
    Agg,
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    pub kind: SelectItemKind,
    /// The column name (Column) or the function argument text (Agg).
    pub column: String,
    pub func: String,
    pub alias: Option<String>,
    /// The original text, used as the output header when no alias is given.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub left_col: String,
    pub right_col: String,
}

#[derive(Debug, Clone, Default)]
pub struct SqlQuery {
    pub distinct: bool,
    pub select_items: Vec<SelectItem>,
    pub from_table: String,
    pub from_alias: Option<String>,
    pub from_subquery: Option<String>,
    pub joins: Vec<JoinClause>,
    pub where_expr: Option<Expr>,
    pub group_by: Vec<String>,
    pub having_expr: Option<Expr>,
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<i64>,
    pub offset: i64,
}
