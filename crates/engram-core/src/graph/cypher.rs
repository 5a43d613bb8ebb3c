//! Cypher subset
//!
//! Hand-rolled lexer, recursive-descent parser, and executor for the
//! supported query forms:
//!
//! - `MATCH (n[:Label] [{props}]) [WHERE ...] RETURN n [LIMIT k]`
//! - `MATCH (a)-[r[:TYPE]]->(b) RETURN a, r, b [LIMIT k]`
//! - `MATCH (a)-[:TYPE*1..D]->(b) WHERE a.id = "..." RETURN b`
//!
//! Predicates are equality (`n.prop = lit`) and containment
//! (`n.prop CONTAINS lit`, over strings and arrays). Anything outside the
//! subset fails with `Malformed`; traversal of unknown edge types returns
//! empty rather than failing.

use serde_json::Value;

use super::{Direction, GraphEdge, GraphError, GraphNode, GraphStore};

/// Hop ceiling applied to a bare `*` range
const DEFAULT_VAR_HOPS: usize = 3;

// ============================================================================
// AST
// ============================================================================

/// A parsed query
#[derive(Debug, Clone)]
pub struct CypherQuery {
    pattern: Pattern,
    conditions: Vec<Condition>,
    returns: Vec<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone)]
enum Pattern {
    Node(NodePattern),
    Path {
        from: NodePattern,
        edge: EdgePattern,
        to: NodePattern,
    },
}

#[derive(Debug, Clone, Default)]
struct NodePattern {
    var: Option<String>,
    label: Option<String>,
    props: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default)]
struct EdgePattern {
    var: Option<String>,
    types: Vec<String>,
    min_hops: usize,
    max_hops: usize,
}

#[derive(Debug, Clone)]
struct Condition {
    var: String,
    key: String,
    op: Op,
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Contains,
}

/// Result of a graph query: the matched nodes and edges
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQueryResult {
    /// Matched nodes, deduplicated by id
    pub nodes: Vec<GraphNode>,
    /// Matched edges, deduplicated by (from, to, type)
    pub edges: Vec<GraphEdge>,
}

impl GraphQueryResult {
    fn push_node(&mut self, node: GraphNode) {
        if !self.nodes.iter().any(|n| n.id == node.id) {
            self.nodes.push(node);
        }
    }

    fn push_edge(&mut self, edge: GraphEdge) {
        if !self.edges.iter().any(|e| {
            e.from == edge.from && e.to == edge.to && e.edge_type == edge.edge_type
        }) {
            self.edges.push(edge);
        }
    }
}

// ============================================================================
// LEXER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    DotDot,
    Eq,
    Pipe,
    Star,
    Dash,
    Arrow,
}

fn lex(input: &str) -> Result<Vec<Token>, GraphError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '-' => {
                if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Arrow);
                    i += 2;
                } else {
                    tokens.push(Token::Dash);
                    i += 1;
                }
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                value.push(escaped);
                                i += 2;
                            } else {
                                return Err(GraphError::Malformed(
                                    "dangling escape in string literal".into(),
                                ));
                            }
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(GraphError::Malformed(
                                "unterminated string literal".into(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        text.push(ch);
                        i += 1;
                    } else if ch == '.'
                        && chars.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false)
                        && !text.contains('.')
                    {
                        // A decimal point, not the `..` range operator
                        text.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let number: f64 = text
                    .parse()
                    .map_err(|_| GraphError::Malformed(format!("bad number: {text}")))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(GraphError::Malformed(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), GraphError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(GraphError::Malformed(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn keyword(&mut self, word: &str) -> Result<(), GraphError> {
        match self.next() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word) => Ok(()),
            other => Err(GraphError::Malformed(format!(
                "expected {word}, found {other:?}"
            ))),
        }
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word))
    }

    fn ident(&mut self) -> Result<String, GraphError> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            other => Err(GraphError::Malformed(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }

    fn literal(&mut self) -> Result<Value, GraphError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => {
                if n.fract() == 0.0 {
                    Ok(Value::from(n as i64))
                } else {
                    Ok(Value::from(n))
                }
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("true") => {
                Ok(Value::Bool(true))
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            other => Err(GraphError::Malformed(format!(
                "expected literal, found {other:?}"
            ))),
        }
    }

    fn node_pattern(&mut self) -> Result<NodePattern, GraphError> {
        self.expect(Token::LParen)?;
        let mut pattern = NodePattern::default();

        if let Some(Token::Ident(_)) = self.peek() {
            pattern.var = Some(self.ident()?);
        }
        if self.peek() == Some(&Token::Colon) {
            self.next();
            pattern.label = Some(self.ident()?);
        }
        if self.peek() == Some(&Token::LBrace) {
            self.next();
            loop {
                let key = match self.next() {
                    Some(Token::Ident(ident)) => ident,
                    Some(Token::Str(s)) => s,
                    other => {
                        return Err(GraphError::Malformed(format!(
                            "expected property key, found {other:?}"
                        )));
                    }
                };
                self.expect(Token::Colon)?;
                let value = self.literal()?;
                pattern.props.push((key, value));
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RBrace) => break,
                    other => {
                        return Err(GraphError::Malformed(format!(
                            "expected ',' or '}}', found {other:?}"
                        )));
                    }
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok(pattern)
    }

    fn edge_pattern(&mut self) -> Result<EdgePattern, GraphError> {
        self.expect(Token::Dash)?;
        self.expect(Token::LBracket)?;
        let mut pattern = EdgePattern {
            min_hops: 1,
            max_hops: 1,
            ..Default::default()
        };

        if let Some(Token::Ident(_)) = self.peek() {
            pattern.var = Some(self.ident()?);
        }
        if self.peek() == Some(&Token::Colon) {
            self.next();
            pattern.types.push(self.ident()?);
            while self.peek() == Some(&Token::Pipe) {
                self.next();
                pattern.types.push(self.ident()?);
            }
        }
        if self.peek() == Some(&Token::Star) {
            self.next();
            if let Some(Token::Num(min)) = self.peek().cloned() {
                self.next();
                self.expect(Token::DotDot)?;
                let max = match self.next() {
                    Some(Token::Num(n)) => n,
                    other => {
                        return Err(GraphError::Malformed(format!(
                            "expected hop bound, found {other:?}"
                        )));
                    }
                };
                pattern.min_hops = min as usize;
                pattern.max_hops = max as usize;
            } else {
                pattern.min_hops = 1;
                pattern.max_hops = DEFAULT_VAR_HOPS;
            }
            if pattern.min_hops == 0 || pattern.max_hops < pattern.min_hops {
                return Err(GraphError::Malformed(format!(
                    "bad hop range {}..{}",
                    pattern.min_hops, pattern.max_hops
                )));
            }
        }
        self.expect(Token::RBracket)?;
        self.expect(Token::Arrow)?;
        Ok(pattern)
    }

    fn condition(&mut self) -> Result<Condition, GraphError> {
        let var = self.ident()?;
        self.expect(Token::Dot)?;
        let key = self.ident()?;
        let op = match self.next() {
            Some(Token::Eq) => Op::Eq,
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("contains") => Op::Contains,
            other => {
                return Err(GraphError::Malformed(format!(
                    "expected '=' or CONTAINS, found {other:?}"
                )));
            }
        };
        let value = self.literal()?;
        Ok(Condition {
            var,
            key,
            op,
            value,
        })
    }
}

/// Parse a query string into the supported subset
pub fn parse(input: &str) -> Result<CypherQuery, GraphError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };

    parser.keyword("MATCH")?;
    let from = parser.node_pattern()?;
    let pattern = if parser.peek() == Some(&Token::Dash) {
        let edge = parser.edge_pattern()?;
        let to = parser.node_pattern()?;
        Pattern::Path { from, edge, to }
    } else {
        Pattern::Node(from)
    };

    let mut conditions = Vec::new();
    if parser.peek_keyword("WHERE") {
        parser.next();
        conditions.push(parser.condition()?);
        while parser.peek_keyword("AND") {
            parser.next();
            conditions.push(parser.condition()?);
        }
    }

    parser.keyword("RETURN")?;
    let mut returns = vec![parser.ident()?];
    while parser.peek() == Some(&Token::Comma) {
        parser.next();
        returns.push(parser.ident()?);
    }

    let mut limit = None;
    if parser.peek_keyword("LIMIT") {
        parser.next();
        match parser.next() {
            Some(Token::Num(n)) if n >= 0.0 => limit = Some(n as usize),
            other => {
                return Err(GraphError::Malformed(format!(
                    "expected limit count, found {other:?}"
                )));
            }
        }
    }

    if parser.peek().is_some() {
        return Err(GraphError::Malformed(format!(
            "trailing input at token {:?}",
            parser.peek()
        )));
    }

    Ok(CypherQuery {
        pattern,
        conditions,
        returns,
        limit,
    })
}

// ============================================================================
// EXECUTOR
// ============================================================================

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn node_property(node: &GraphNode, key: &str) -> Option<Value> {
    match key {
        "id" => Some(Value::String(node.id.clone())),
        "type" => Some(Value::String(node.node_type.clone())),
        _ => node.properties.get(key).cloned(),
    }
}

fn node_matches(node: &GraphNode, pattern: &NodePattern, conditions: &[Condition]) -> bool {
    if let Some(label) = &pattern.label {
        if &node.node_type != label {
            return false;
        }
    }
    for (key, expected) in &pattern.props {
        match node_property(node, key) {
            Some(actual) if value_eq(&actual, expected) => {}
            _ => return false,
        }
    }
    let var = pattern.var.as_deref();
    for condition in conditions {
        if Some(condition.var.as_str()) != var {
            continue;
        }
        let Some(actual) = node_property(node, &condition.key) else {
            return false;
        };
        let holds = match condition.op {
            Op::Eq => value_eq(&actual, &condition.value),
            Op::Contains => match (&actual, &condition.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.iter().any(|item| value_eq(item, needle)),
                _ => false,
            },
        };
        if !holds {
            return false;
        }
    }
    true
}

/// Find the id a pattern or WHERE clause binds for `var`, if any
fn bound_id(pattern: &NodePattern, conditions: &[Condition]) -> Option<String> {
    for (key, value) in &pattern.props {
        if key == "id" {
            return value.as_str().map(str::to_string);
        }
    }
    let var = pattern.var.as_deref()?;
    conditions
        .iter()
        .find(|c| c.var == var && c.key == "id" && c.op == Op::Eq)
        .and_then(|c| c.value.as_str().map(str::to_string))
}

/// Execute a parsed query against a graph store
pub fn execute(
    store: &GraphStore,
    query: &CypherQuery,
    max_traversal: usize,
) -> Result<GraphQueryResult, GraphError> {
    let mut result = GraphQueryResult::default();
    let limit = query.limit.unwrap_or(usize::MAX);
    if limit == 0 {
        return Ok(result);
    }

    match &query.pattern {
        Pattern::Node(pattern) => {
            let wants_var = pattern.var.as_deref();
            if !query.returns.iter().all(|r| Some(r.as_str()) == wants_var) {
                return Err(GraphError::Malformed("unknown return variable".into()));
            }
            let mut matched = 0;
            for node in store.find_nodes(pattern.label.as_deref(), None)? {
                if node_matches(&node, pattern, &query.conditions) {
                    result.push_node(node);
                    matched += 1;
                    if matched >= limit {
                        break;
                    }
                }
            }
        }

        Pattern::Path { from, edge, to } if edge.max_hops == 1 && edge.min_hops == 1 => {
            let known: Vec<&str> = [from.var.as_deref(), edge.var.as_deref(), to.var.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if !query.returns.iter().all(|r| known.contains(&r.as_str())) {
                return Err(GraphError::Malformed("unknown return variable".into()));
            }

            let mut candidate_edges = Vec::new();
            if edge.types.is_empty() {
                candidate_edges.extend(store.find_edges(None, None)?);
            } else {
                for edge_type in &edge.types {
                    candidate_edges.extend(store.find_edges(Some(edge_type), None)?);
                }
            }

            let wants_from = wants(&query.returns, from);
            let wants_edge = edge
                .var
                .as_deref()
                .map(|v| query.returns.iter().any(|r| r == v))
                .unwrap_or(false);
            let wants_to = wants(&query.returns, to);

            let mut matched = 0;
            for candidate in candidate_edges {
                let Some(from_node) = store.get_node(&candidate.from)? else {
                    continue;
                };
                let Some(to_node) = store.get_node(&candidate.to)? else {
                    continue;
                };
                if !node_matches(&from_node, from, &query.conditions)
                    || !node_matches(&to_node, to, &query.conditions)
                {
                    continue;
                }
                if wants_from {
                    result.push_node(from_node);
                }
                if wants_to {
                    result.push_node(to_node);
                }
                if wants_edge {
                    result.push_edge(candidate);
                }
                matched += 1;
                if matched >= limit {
                    break;
                }
            }
        }

        Pattern::Path { from, edge, to } => {
            // Variable-length paths need a bound start to stay deterministic
            let Some(start) = bound_id(from, &query.conditions) else {
                return Err(GraphError::Malformed(
                    "variable-length match requires binding the start id".into(),
                ));
            };
            if !query
                .returns
                .iter()
                .all(|r| Some(r.as_str()) == to.var.as_deref())
            {
                return Err(GraphError::Malformed(
                    "variable-length match returns only the end variable".into(),
                ));
            }

            let Some(start_node) = store.get_node(&start)? else {
                return Ok(result);
            };
            if !node_matches(&start_node, from, &query.conditions) {
                return Ok(result);
            }

            let types = if edge.types.is_empty() {
                None
            } else {
                Some(edge.types.as_slice())
            };
            let mut matched = 0;
            for neighbour in store.neighbours(
                &start,
                types,
                Direction::Outgoing,
                edge.max_hops,
                max_traversal,
            )? {
                if neighbour.depth < edge.min_hops {
                    continue;
                }
                if node_matches(&neighbour.node, to, &query.conditions) {
                    result.push_node(neighbour.node);
                    matched += 1;
                    if matched >= limit {
                        break;
                    }
                }
            }
        }
    }

    Ok(result)
}

fn wants(returns: &[String], pattern: &NodePattern) -> bool {
    pattern
        .var
        .as_deref()
        .map(|v| returns.iter().any(|r| r == v))
        .unwrap_or(false)
}

// ============================================================================
// TESTS
// ============================================================================
