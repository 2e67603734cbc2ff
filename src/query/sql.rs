//! # SQL-light
//!
//! Tokenizer and recursive-descent parser for the query language.
//!
//! ```text
//! statement := query | insert | update | delete
//! query     := [WITH name AS ( query ) {, name AS ( query )}] select {UNION [ALL] select}
//! select    := SELECT [DISTINCT] items FROM table [alias]
//!              {[INNER | LEFT | CROSS] JOIN table [alias] [ON expr]}
//!              [WHERE expr] [GROUP BY cols] [ORDER BY key [ASC|DESC] {, ...}]
//!              [LIMIT n] [OFFSET n] [RADIUS r [AT x, y]]
//! insert    := INSERT INTO table ( cols ) VALUES ( values ) {, ( values )}
//! update    := UPDATE table SET col = value {, col = value} [WHERE expr]
//! delete    := DELETE FROM table [WHERE expr]
//! ```

use std::fmt;

use crate::core::{MycoError, MycoResult, Position, Value};

// ============================================================================
// AST
// ============================================================================

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

/// `WITH ... select UNION select ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub ctes: Vec<(String, Query)>,
    pub selects: Vec<Select>,
    /// `union_all[i]` joins `selects[i]` and `selects[i + 1]`
    pub union_all: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub radius: Option<RadiusClause>,
}

impl Select {
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || self.items.iter().any(|i| matches!(i, SelectItem::Aggregate { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name used to qualify columns
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    /// `None` joins through foreign keys (or is a cross product for CROSS)
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard(String),
    Column { column: ColumnRef, alias: Option<String> },
    Aggregate { func: AggFunc, arg: Option<ColumnRef>, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// Display label of an aggregate, e.g. `COUNT(*)`
pub fn aggregate_label(func: AggFunc, arg: Option<&ColumnRef>) -> String {
    match arg {
        Some(col) => format!("{}({})", func.as_str(), col),
        None => format!("{}(*)", func.as_str()),
    }
}

/// `[qualifier.]name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Cmp(Operand, CmpOp, Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Like { operand: Operand, pattern: Operand, negated: bool },
    In { operand: Operand, list: Vec<Operand>, negated: bool },
    Between { operand: Operand, low: Operand, high: Operand, negated: bool },
    IsNull { operand: Operand, negated: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    Column(ColumnRef),
    /// 1-based output column
    Ordinal(usize),
    /// Output column by label, e.g. `COUNT(*)`
    Label(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub target: OrderTarget,
    pub descending: bool,
}

/// `RADIUS r [AT x, y]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusClause {
    pub radius: f32,
    pub center: Option<Position>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    Str(String),
    Number(String),
    Sym(&'static str),
}

const SYMBOLS: [&str; 14] = ["<=", ">=", "<>", "!=", "=", "<", ">", "(", ")", ",", ".", "*", ";", "-"];

fn malformed(msg: impl Into<String>) -> MycoError {
    MycoError::MalformedQuery(msg.into())
}

fn tokenize(input: &str) -> MycoResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(malformed("unterminated quote")),
                    Some(&q) if q == c => {
                        if chars.get(i + 1) == Some(&c) {
                            s.push(c);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&other) => {
                        s.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(if c == '\'' { Token::Str(s) } else { Token::QuotedIdent(s) });
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '-' || chars[j] == '+') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
            continue;
        }
        for sym in SYMBOLS {
            let len = sym.len();
            if i + len <= chars.len() && chars[i..i + len].iter().copied().eq(sym.chars()) {
                tokens.push(Token::Sym(sym));
                i += len;
                continue 'outer;
            }
        }
        return Err(malformed(format!("unexpected character {:?}", c)));
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// Words that end an alias-less table or column position
const RESERVED: [&str; 22] = [
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "CROSS", "ON", "GROUP", "ORDER", "BY", "LIMIT",
    "OFFSET", "RADIUS", "AT", "UNION", "ALL", "AS", "AND", "OR", "NOT", "DISTINCT",
];

/// Parse one statement (a trailing `;` is allowed)
pub fn parse(input: &str) -> MycoResult<Statement> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.statement()?;
    parser.eat_sym(";");
    if let Some(tok) = parser.peek() {
        return Err(malformed(format!("unexpected trailing input at {:?}", tok)));
    }
    Ok(stmt)
}

/// Parse an expression on its own (used for `col=val` shortcuts and tests)
pub fn parse_expr(input: &str) -> MycoResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.peek().is_some() {
        return Err(malformed("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn is_keyword_at(&self, offset: usize, kw: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> MycoResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(malformed(format!("expected {} near {}", kw, self.here())))
        }
    }

    fn is_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Some(Token::Sym(s)) if *s == sym)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.is_sym(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> MycoResult<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(malformed(format!("expected '{}' near {}", sym, self.here())))
        }
    }

    fn here(&self) -> String {
        match self.peek() {
            Some(Token::Word(w)) | Some(Token::QuotedIdent(w)) | Some(Token::Number(w)) => w.clone(),
            Some(Token::Str(s)) => format!("'{}'", s),
            Some(Token::Sym(s)) => s.to_string(),
            None => "end of input".to_string(),
        }
    }

    fn identifier(&mut self) -> MycoResult<String> {
        match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            Some(Token::QuotedIdent(w)) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            _ => Err(malformed(format!("expected identifier near {}", self.here()))),
        }
    }

    fn optional_alias(&mut self) -> MycoResult<Option<String>> {
        if self.eat_keyword("AS") {
            return self.identifier().map(Some);
        }
        match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => self.identifier().map(Some),
            Some(Token::QuotedIdent(_)) => self.identifier().map(Some),
            _ => Ok(None),
        }
    }

    fn unsigned(&mut self) -> MycoResult<usize> {
        match self.next() {
            Some(Token::Number(n)) => n.parse().map_err(|_| malformed(format!("expected a count, got {}", n))),
            _ => Err(malformed("expected a number")),
        }
    }

    fn float(&mut self) -> MycoResult<f32> {
        let negative = self.eat_sym("-");
        match self.next() {
            Some(Token::Number(n)) => {
                let v: f32 = n.parse().map_err(|_| malformed(format!("bad number {}", n)))?;
                Ok(if negative { -v } else { v })
            }
            _ => Err(malformed("expected a number")),
        }
    }

    fn statement(&mut self) -> MycoResult<Statement> {
        if self.is_keyword("INSERT") {
            return self.insert().map(Statement::Insert);
        }
        if self.is_keyword("UPDATE") {
            return self.update().map(Statement::Update);
        }
        if self.is_keyword("DELETE") {
            return self.delete().map(Statement::Delete);
        }
        if self.is_keyword("SELECT") || self.is_keyword("WITH") {
            return self.query().map(Statement::Query);
        }
        Err(malformed(format!("unsupported statement near {}", self.here())))
    }

    fn query(&mut self) -> MycoResult<Query> {
        let mut ctes = Vec::new();
        if self.eat_keyword("WITH") {
            loop {
                let name = self.identifier()?;
                self.expect_keyword("AS")?;
                self.expect_sym("(")?;
                let sub = self.query()?;
                self.expect_sym(")")?;
                ctes.push((name, sub));
                if !self.eat_sym(",") {
                    break;
                }
            }
        }
        let mut selects = vec![self.select()?];
        let mut union_all = Vec::new();
        while self.eat_keyword("UNION") {
            union_all.push(self.eat_keyword("ALL"));
            selects.push(self.select()?);
        }
        Ok(Query {
            ctes,
            selects,
            union_all,
        })
    }

    fn select(&mut self) -> MycoResult<Select> {
        self.expect_keyword("SELECT")?;
        let distinct = self.eat_keyword("DISTINCT");
        let mut items = vec![self.select_item()?];
        while self.eat_sym(",") {
            items.push(self.select_item()?);
        }
        self.expect_keyword("FROM")?;
        let from = self.table_ref()?;

        let mut joins = Vec::new();
        loop {
            let kind = if self.eat_keyword("JOIN") {
                JoinKind::Inner
            } else if self.is_keyword("INNER") && self.is_keyword_at(1, "JOIN") {
                self.pos += 2;
                JoinKind::Inner
            } else if self.is_keyword("LEFT") {
                self.pos += 1;
                self.eat_keyword("OUTER");
                self.expect_keyword("JOIN")?;
                JoinKind::Left
            } else if self.is_keyword("CROSS") && self.is_keyword_at(1, "JOIN") {
                self.pos += 2;
                JoinKind::Cross
            } else {
                break;
            };
            let table = self.table_ref()?;
            let on = if self.eat_keyword("ON") { Some(self.expr()?) } else { None };
            joins.push(Join { kind, table, on });
        }

        let filter = if self.eat_keyword("WHERE") { Some(self.expr()?) } else { None };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                group_by.push(self.column_ref()?);
                if !self.eat_sym(",") {
                    break;
                }
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let target = self.order_target()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderKey { target, descending });
                if !self.eat_sym(",") {
                    break;
                }
            }
        }

        let mut limit = None;
        let mut offset = None;
        let mut radius = None;
        loop {
            if self.eat_keyword("LIMIT") {
                limit = Some(self.unsigned()?);
            } else if self.eat_keyword("OFFSET") {
                offset = Some(self.unsigned()?);
            } else if self.eat_keyword("RADIUS") {
                let r = self.float()?;
                if r < 0.0 {
                    return Err(malformed("RADIUS must not be negative"));
                }
                let center = if self.eat_keyword("AT") {
                    let x = self.float()?;
                    self.expect_sym(",")?;
                    let y = self.float()?;
                    Some(Position::new(x, y))
                } else {
                    None
                };
                radius = Some(RadiusClause { radius: r, center });
            } else {
                break;
            }
        }

        Ok(Select {
            distinct,
            items,
            from,
            joins,
            filter,
            group_by,
            order_by,
            limit,
            offset,
            radius,
        })
    }

    fn table_ref(&mut self) -> MycoResult<TableRef> {
        let mut name = self.identifier()?;
        // schema-qualified: keep the last segment
        while self.eat_sym(".") {
            name = self.identifier()?;
        }
        let alias = self.optional_alias()?;
        Ok(TableRef { name, alias })
    }

    fn select_item(&mut self) -> MycoResult<SelectItem> {
        if self.eat_sym("*") {
            return Ok(SelectItem::Wildcard);
        }
        if let Some(Token::Word(w)) = self.peek() {
            if let Some(func) = AggFunc::parse(w) {
                if matches!(self.peek_at(1), Some(Token::Sym("("))) {
                    self.pos += 2;
                    let arg = if self.eat_sym("*") { None } else { Some(self.column_ref()?) };
                    if arg.is_none() && func != AggFunc::Count {
                        return Err(malformed(format!("{}(*) is not allowed", func.as_str())));
                    }
                    self.expect_sym(")")?;
                    let alias = self.optional_alias()?;
                    return Ok(SelectItem::Aggregate { func, arg, alias });
                }
            }
        }
        // t.*
        if matches!(self.peek_at(1), Some(Token::Sym("."))) && matches!(self.peek_at(2), Some(Token::Sym("*"))) {
            let qualifier = self.identifier()?;
            self.pos += 2;
            return Ok(SelectItem::QualifiedWildcard(qualifier));
        }
        let column = self.column_ref()?;
        let alias = self.optional_alias()?;
        Ok(SelectItem::Column { column, alias })
    }

    fn column_ref(&mut self) -> MycoResult<ColumnRef> {
        let first = self.identifier()?;
        if self.eat_sym(".") {
            let name = self.identifier()?;
            Ok(ColumnRef {
                qualifier: Some(first),
                name,
            })
        } else {
            Ok(ColumnRef::bare(first))
        }
    }

    fn order_target(&mut self) -> MycoResult<OrderTarget> {
        if let Some(Token::Number(_)) = self.peek() {
            let n = self.unsigned()?;
            if n == 0 {
                return Err(malformed("ORDER BY ordinal starts at 1"));
            }
            return Ok(OrderTarget::Ordinal(n));
        }
        if let Some(Token::Word(w)) = self.peek() {
            if let Some(func) = AggFunc::parse(w) {
                if matches!(self.peek_at(1), Some(Token::Sym("("))) {
                    self.pos += 2;
                    let arg = if self.eat_sym("*") { None } else { Some(self.column_ref()?) };
                    self.expect_sym(")")?;
                    return Ok(OrderTarget::Label(aggregate_label(func, arg.as_ref())));
                }
            }
        }
        self.column_ref().map(OrderTarget::Column)
    }

    fn literal(&mut self) -> MycoResult<Value> {
        let negative = self.eat_sym("-");
        match self.next() {
            Some(Token::Number(n)) => {
                let text = if negative { format!("-{}", n) } else { n };
                Ok(Value::from_literal(&text))
            }
            Some(Token::Str(s)) if !negative => Ok(Value::Text(s)),
            Some(Token::Word(w)) if !negative && w.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            Some(Token::Word(w)) if !negative && w.eq_ignore_ascii_case("TRUE") => Ok(Value::Integer(1)),
            Some(Token::Word(w)) if !negative && w.eq_ignore_ascii_case("FALSE") => Ok(Value::Integer(0)),
            _ => Err(malformed("expected a literal value")),
        }
    }

    fn operand(&mut self) -> MycoResult<Operand> {
        match self.peek() {
            Some(Token::Number(_)) | Some(Token::Str(_)) | Some(Token::Sym("-")) => self.literal().map(Operand::Literal),
            Some(Token::Word(w))
                if w.eq_ignore_ascii_case("NULL") || w.eq_ignore_ascii_case("TRUE") || w.eq_ignore_ascii_case("FALSE") =>
            {
                self.literal().map(Operand::Literal)
            }
            _ => self.column_ref().map(Operand::Column),
        }
    }

    pub(crate) fn expr(&mut self) -> MycoResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> MycoResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> MycoResult<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> MycoResult<Expr> {
        if self.eat_sym("(") {
            let inner = self.expr()?;
            self.expect_sym(")")?;
            return Ok(inner);
        }
        let operand = self.operand()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull { operand, negated });
        }
        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            let pattern = self.operand()?;
            return Ok(Expr::Like {
                operand,
                pattern,
                negated,
            });
        }
        if self.eat_keyword("IN") {
            self.expect_sym("(")?;
            let mut list = vec![self.operand()?];
            while self.eat_sym(",") {
                list.push(self.operand()?);
            }
            self.expect_sym(")")?;
            return Ok(Expr::In {
                operand,
                list,
                negated,
            });
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.operand()?;
            self.expect_keyword("AND")?;
            let high = self.operand()?;
            return Ok(Expr::Between {
                operand,
                low,
                high,
                negated,
            });
        }
        if negated {
            return Err(malformed(format!("expected LIKE, IN or BETWEEN after NOT near {}", self.here())));
        }

        let op = match self.next() {
            Some(Token::Sym("=")) => CmpOp::Eq,
            Some(Token::Sym("!=")) | Some(Token::Sym("<>")) => CmpOp::Ne,
            Some(Token::Sym("<")) => CmpOp::Lt,
            Some(Token::Sym("<=")) => CmpOp::Le,
            Some(Token::Sym(">")) => CmpOp::Gt,
            Some(Token::Sym(">=")) => CmpOp::Ge,
            _ => return Err(malformed("expected a comparison operator")),
        };
        let right = self.operand()?;
        Ok(Expr::Cmp(operand, op, right))
    }

    fn insert(&mut self) -> MycoResult<Insert> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.identifier()?;
        self.expect_sym("(")?;
        let mut columns = vec![self.identifier()?];
        while self.eat_sym(",") {
            columns.push(self.identifier()?);
        }
        self.expect_sym(")")?;
        self.expect_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_sym("(")?;
            let mut row = vec![self.literal()?];
            while self.eat_sym(",") {
                row.push(self.literal()?);
            }
            self.expect_sym(")")?;
            if row.len() != columns.len() {
                return Err(malformed(format!(
                    "INSERT has {} columns but a row has {} values",
                    columns.len(),
                    row.len()
                )));
            }
            rows.push(row);
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(Insert { table, columns, rows })
    }

    fn update(&mut self) -> MycoResult<Update> {
        self.expect_keyword("UPDATE")?;
        let table = self.identifier()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect_sym("=")?;
            assignments.push((column, self.literal()?));
            if !self.eat_sym(",") {
                break;
            }
        }
        let filter = if self.eat_keyword("WHERE") { Some(self.expr()?) } else { None };
        Ok(Update {
            table,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> MycoResult<Delete> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;
        let filter = if self.eat_keyword("WHERE") { Some(self.expr()?) } else { None };
        Ok(Delete { table, filter })
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sql: &str) -> Select {
        match parse(sql).unwrap() {
            Statement::Query(mut q) => q.selects.remove(0),
            other => panic!("not a query: {:?}", other),
        }
    }

    #[test]
    fn test_tokenize_operators_and_literals() {
        let tokens = tokenize("a<=1.5 AND b<>'it''s'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("a".into()),
                Token::Sym("<="),
                Token::Number("1.5".into()),
                Token::Word("AND".into()),
                Token::Word("b".into()),
                Token::Sym("<>"),
                Token::Str("it's".into()),
            ]
        );
        assert!(tokenize("a # b").is_err());
    }

    #[test]
    fn test_simple_select() {
        let s = select("SELECT * FROM Album WHERE ArtistId = 5");
        assert_eq!(s.items, vec![SelectItem::Wildcard]);
        assert_eq!(s.from.name, "Album");
        assert_eq!(
            s.filter,
            Some(Expr::Cmp(
                Operand::Column(ColumnRef::bare("ArtistId")),
                CmpOp::Eq,
                Operand::Literal(Value::Integer(5))
            ))
        );
    }

    #[test]
    fn test_full_select_clauses() {
        let s = select(
            "SELECT DISTINCT a.Title AS t, COUNT(*) n FROM Album a LEFT JOIN Artist r ON a.ArtistId = r.ArtistId \
             WHERE r.Name LIKE 'A%' AND NOT a.AlbumId IN (1, 2) GROUP BY a.Title \
             ORDER BY COUNT(*) DESC, 1 LIMIT 10 OFFSET 2 RADIUS 7.5 AT 1, -2",
        );
        assert!(s.distinct);
        assert_eq!(s.items.len(), 2);
        assert_eq!(s.from.qualifier(), "a");
        assert_eq!(s.joins[0].kind, JoinKind::Left);
        assert!(s.joins[0].on.is_some());
        assert_eq!(s.group_by, vec![ColumnRef { qualifier: Some("a".into()), name: "Title".into() }]);
        assert_eq!(s.order_by[0].target, OrderTarget::Label("COUNT(*)".into()));
        assert!(s.order_by[0].descending);
        assert_eq!(s.order_by[1].target, OrderTarget::Ordinal(1));
        assert_eq!((s.limit, s.offset), (Some(10), Some(2)));
        assert_eq!(
            s.radius,
            Some(RadiusClause {
                radius: 7.5,
                center: Some(Position::new(1.0, -2.0))
            })
        );
        assert!(s.is_aggregate());
    }

    #[test]
    fn test_with_and_union() {
        let q = match parse("WITH rock AS (SELECT * FROM Genre WHERE Name = 'Rock') SELECT * FROM rock UNION ALL SELECT * FROM Genre;").unwrap() {
            Statement::Query(q) => q,
            other => panic!("{:?}", other),
        };
        assert_eq!(q.ctes.len(), 1);
        assert_eq!(q.ctes[0].0, "rock");
        assert_eq!(q.selects.len(), 2);
        assert_eq!(q.union_all, vec![true]);
    }

    #[test]
    fn test_predicates() {
        assert!(matches!(parse_expr("x BETWEEN 1 AND 3").unwrap(), Expr::Between { negated: false, .. }));
        assert!(matches!(parse_expr("x NOT LIKE '%a'").unwrap(), Expr::Like { negated: true, .. }));
        assert!(matches!(parse_expr("x IS NOT NULL").unwrap(), Expr::IsNull { negated: true, .. }));
        assert!(matches!(parse_expr("(a = 1 OR b = 2) AND c != 3").unwrap(), Expr::And(..)));
        assert!(matches!(parse_expr("a = -4").unwrap(), Expr::Cmp(_, CmpOp::Eq, Operand::Literal(Value::Integer(-4)))));
    }

    #[test]
    fn test_dml() {
        match parse("INSERT INTO Album (AlbumId, Title) VALUES (9, 'New'), (10, NULL)").unwrap() {
            Statement::Insert(ins) => {
                assert_eq!(ins.columns, vec!["AlbumId", "Title"]);
                assert_eq!(ins.rows[1][1], Value::Null);
            }
            other => panic!("{:?}", other),
        }
        match parse("UPDATE Album SET Title = 'X', Price = 1.5 WHERE AlbumId = 1").unwrap() {
            Statement::Update(up) => {
                assert_eq!(up.assignments.len(), 2);
                assert!(up.filter.is_some());
            }
            other => panic!("{:?}", other),
        }
        assert!(matches!(parse("DELETE FROM Album").unwrap(), Statement::Delete(Delete { filter: None, .. })));
    }

    #[test]
    fn test_malformed_queries() {
        for bad in [
            "",
            "SELECT",
            "SELECT * FROM",
            "SELECT * FROM t WHERE",
            "SELECT * FROM t WHERE a =",
            "SELECT * FROM t LIMIT x",
            "SELECT * FROM t extra junk",
            "SELECT * FROM t WHERE a = 'open",
            "INSERT INTO t (a, b) VALUES (1)",
            "DROP TABLE t",
            "SELECT SUM(*) FROM t",
        ] {
            assert!(matches!(parse(bad), Err(MycoError::MalformedQuery(_))), "accepted: {}", bad);
        }
    }
}
