//! SQL-92 subset used by subscription rule filters.
//!
//! Supported: comparisons (`=`, `<>`, `!=`, `<`, `<=`, `>`, `>=`), `AND`,
//! `OR`, `NOT`, parentheses, `TRUE`/`FALSE`, `IS [NOT] NULL`,
//! `[NOT] LIKE` with `%`/`_` wildcards and `[NOT] IN (...)`. Identifiers
//! name user properties; `sys.Label` and `sys.MessageId` name system ones.
//! Comparisons against a missing property are unknown, and a rule only
//! matches when its filter is definitely true.

use crate::domain::{BrokerFault, OutboundMessage, PropertyValue};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    root: Expr,
}

impl SqlFilter {
    pub fn parse(expression: &str) -> Result<Self, BrokerFault> {
        let invalid = |reason: String| BrokerFault::InvalidFilter {
            expression: expression.to_string(),
            reason,
        };

        let tokens = tokenize(expression).map_err(invalid)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or().map_err(invalid)?;
        if let Some(token) = parser.peek() {
            return Err(invalid(format!("unexpected token {token:?}")));
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn matches(&self, message: &OutboundMessage) -> bool {
        self.root.eval(message) == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op("="));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<>"));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('>') => {
                    tokens.push(Token::Op("<>"));
                    i += 2;
                }
                Some('=') => {
                    tokens.push(Token::Op("<="));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && is_number_start(&chars, i + 1)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{text}`"))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '[' => {
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|c| *c == ']') else {
                    return Err("unterminated bracketed identifier".into());
                };
                tokens.push(Token::Ident(chars[start..start + len].iter().collect()));
                i = start + len + 1;
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }

    Ok(tokens)
}

fn is_number_start(chars: &[char], index: usize) -> bool {
    chars.get(index).is_some_and(char::is_ascii_digit)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Property(String),
    Label,
    MessageId,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Operand, &'static str, Operand),
    IsNull(Operand, bool),
    Like(Operand, String, bool),
    In(Operand, Vec<Value>, bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

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
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        let left = self.parse_operand()?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(left, op, right));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err("expected NULL after IS".into());
            }
            return Ok(Expr::IsNull(left, negated));
        }

        let negated = self.peek_keyword("NOT")
            && (self.keyword_at(1, "LIKE") || self.keyword_at(1, "IN"));
        if negated {
            self.pos += 1;
        }

        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Expr::Like(left, pattern, negated)),
                _ => Err("expected string pattern after LIKE".into()),
            };
        }

        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut values = Vec::new();
            loop {
                match self.parse_operand()? {
                    Operand::Literal(value) => values.push(value),
                    _ => return Err("IN list accepts literals only".into()),
                }
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err("expected `,` or `)` in IN list".into()),
                }
            }
            return Ok(Expr::In(left, values, negated));
        }

        match left {
            Operand::Literal(Value::Bool(value)) => Ok(Expr::Literal(value)),
            other => Err(format!("expected a comparison after {other:?}")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Num(value)) => Ok(Operand::Literal(Value::Number(value))),
            Some(Token::Str(value)) => Ok(Operand::Literal(Value::Text(value))),
            Some(Token::Ident(word)) => Ok(identifier(word)),
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of input".into()),
        }
    }
}

fn identifier(word: String) -> Operand {
    let lower = word.to_ascii_lowercase();
    match lower.as_str() {
        "true" => Operand::Literal(Value::Bool(true)),
        "false" => Operand::Literal(Value::Bool(false)),
        "null" => Operand::Literal(Value::Null),
        "sys.label" => Operand::Label,
        "sys.messageid" => Operand::MessageId,
        _ => match lower.strip_prefix("user.") {
            Some(_) => Operand::Property(word[5..].to_string()),
            None => Operand::Property(word),
        },
    }
}

impl Operand {
    fn resolve(&self, message: &OutboundMessage) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Label => message
                .label
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
            Self::MessageId => Value::Text(message.message_id.clone()),
            Self::Property(name) => match message.properties.get(name) {
                None => Value::Null,
                Some(PropertyValue::Bool(value)) => Value::Bool(*value),
                Some(PropertyValue::Int(value)) => Value::Number(*value as f64),
                Some(PropertyValue::Float(value)) => Value::Number(*value),
                Some(PropertyValue::String(value)) => Value::Text(value.clone()),
                Some(PropertyValue::Json(value)) => Value::Text(value.to_string()),
            },
        }
    }
}

impl Expr {
    fn eval(&self, message: &OutboundMessage) -> Option<bool> {
        match self {
            Self::Literal(value) => Some(*value),
            Self::Not(inner) => inner.eval(message).map(|value| !value),
            Self::And(left, right) => match (left.eval(message), right.eval(message)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or(left, right) => match (left.eval(message), right.eval(message)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Self::Compare(left, op, right) => {
                compare(&left.resolve(message), op, &right.resolve(message))
            }
            Self::IsNull(operand, negated) => {
                let is_null = operand.resolve(message) == Value::Null;
                Some(is_null != *negated)
            }
            Self::Like(operand, pattern, negated) => match operand.resolve(message) {
                Value::Text(text) => Some(like(&text, pattern) != *negated),
                _ => None,
            },
            Self::In(operand, values, negated) => {
                let value = operand.resolve(message);
                if value == Value::Null {
                    return None;
                }
                let found = values
                    .iter()
                    .any(|candidate| compare(&value, "=", candidate) == Some(true));
                Some(found != *negated)
            }
        }
    }
}

fn compare(left: &Value, op: &str, right: &Value) -> Option<bool> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b)?,
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => return None,
    };

    Some(match op {
        "=" => ordering == Ordering::Equal,
        "<>" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => return None,
    })
}

/// Wildcard match with `%` (any run) and `_` (one char), backtracking only
/// to the most recent `%`.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last `%` and the text index it is currently covering up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, t));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Properties;

    fn message() -> OutboundMessage {
        OutboundMessage::new(b"{}".to_vec())
            .with_label("TimeService.TimePassed")
            .with_properties(Properties::from([
                ("Region".to_string(), "eu".into()),
                ("Priority".to_string(), 5_i64.into()),
                ("Ratio".to_string(), 0.25_f64.into()),
                ("Urgent".to_string(), true.into()),
            ]))
    }

    fn eval(expression: &str) -> bool {
        SqlFilter::parse(expression)
            .expect("filter parses")
            .matches(&message())
    }

    #[test]
    fn test_true_filter() {
        assert!(eval("1=1"));
        assert!(eval("TRUE"));
        assert!(!eval("FALSE"));
        assert!(!eval("1=0"));
    }

    #[test]
    fn test_property_comparisons() {
        assert!(eval("Region = 'eu'"));
        assert!(!eval("Region <> 'eu'"));
        assert!(eval("Priority > 3"));
        assert!(eval("Priority >= 5 AND Ratio < 0.5"));
        assert!(eval("Priority != 4"));
        assert!(eval("Urgent = TRUE"));
    }

    #[test]
    fn test_system_properties() {
        assert!(eval("sys.Label = 'TimeService.TimePassed'"));
        assert!(eval("sys.Label LIKE 'TimeService.%'"));
        assert!(eval("sys.MessageId IS NOT NULL"));
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like("TimeService.TimePassed", "%.%"));
        assert!(like("abc", "a%c"));
        assert!(like("ac", "a%c"));
        assert!(like("abc", "%"));
        assert!(like("", "%%"));
        assert!(like("mississippi", "m%iss%pi"));
        assert!(like("éa", "_a"));
        assert!(!like("abc", "a%d"));
        assert!(!like("ab", "a_c"));
        assert!(!like("", "_"));
        assert!(!like("abcd", "abc"));
    }

    #[test]
    fn test_like_many_wildcards_on_long_text() {
        let text = "a".repeat(5_000);
        let pattern = format!("{}b", "%a".repeat(40));
        let started = std::time::Instant::now();
        assert!(!like(&text, &pattern));
        assert!(like(&text, &"%a".repeat(40)));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_boolean_composition() {
        assert!(eval("Region = 'us' OR Priority = 5"));
        assert!(eval("NOT (Region = 'us')"));
        assert!(!eval("NOT Region = 'eu' AND Priority = 5"));
        assert!(eval("Region IN ('us', 'eu')"));
        assert!(eval("Region NOT IN ('us', 'apac')"));
        assert!(eval("Region NOT LIKE 'u_'"));
    }

    #[test]
    fn test_missing_property_is_unknown() {
        assert!(!eval("Missing = 'x'"));
        assert!(!eval("NOT Missing = 'x'"));
        assert!(eval("Missing IS NULL"));
        assert!(eval("Missing = 'x' OR Region = 'eu'"));
    }

    #[test]
    fn test_quoted_strings_and_brackets() {
        let msg = OutboundMessage::new(Vec::new()).with_properties(Properties::from([(
            "Display Name".to_string(),
            "O'Neil".into(),
        )]));
        let filter = SqlFilter::parse("[Display Name] = 'O''Neil'").expect("parses");
        assert!(filter.matches(&msg));
    }

    #[test]
    fn test_invalid_filters_are_rejected() {
        for expression in ["", "Region =", "Region = 'eu", "(1=1", "Region eu", "1=1 1=1", "#"] {
            let err = SqlFilter::parse(expression).expect_err(expression);
            assert!(matches!(err, BrokerFault::InvalidFilter { .. }), "{expression}");
        }
    }
}
