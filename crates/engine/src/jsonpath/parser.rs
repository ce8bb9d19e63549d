//! Parser for the JSONPath template dialect.
//!
//! A template is literal text interleaved with `{...}` actions. An action is
//! either a path expression, a quoted literal (`{"\n"}`), `range <expr>` or
//! `end`. Path expressions follow the usual dotted/bracket notation with
//! backslash-escaped dots inside keys.

use super::PathError;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Path(Expr),
    Range { expr: Expr, body: Vec<Node> },
}

/// Where evaluation of an expression starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Root,
    Current,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub anchor: Anchor,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Child(String),
    Wildcard,
    Index(i64),
    Slice(Option<i64>, Option<i64>),
    Recursive(Option<String>),
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub left: Expr,
    pub comparison: Option<(CompareOp, Literal)>,
}

/// Parse a whole template into nodes.
pub fn parse_template(template: &str) -> Result<Vec<Node>, PathError> {
    let chars: Vec<char> = template.chars().collect();
    let mut position = 0;
    let nodes = parse_nodes(&chars, &mut position, false)?;
    Ok(nodes)
}

fn parse_nodes(chars: &[char], position: &mut usize, in_range: bool) -> Result<Vec<Node>, PathError> {
    let mut nodes = Vec::new();
    let mut text = String::new();
    while *position < chars.len() {
        let current = chars[*position];
        if current != '{' {
            text.push(current);
            *position += 1;
            continue;
        }
        if !text.is_empty() {
            nodes.push(Node::Text(std::mem::take(&mut text)));
        }
        let close = find_action_end(chars, *position + 1)?;
        let action: String = chars[*position + 1..close].iter().collect();
        *position = close + 1;
        let action = action.trim();

        if action == "end" {
            if in_range {
                return Ok(nodes);
            }
            return Err(PathError::syntax("unexpected {end} without a matching {range}"));
        }
        if let Some(expression) = action.strip_prefix("range ") {
            let expr = parse_expr(expression.trim())?;
            let body = parse_nodes(chars, position, true)?;
            nodes.push(Node::Range { expr, body });
            continue;
        }
        if let Some(literal) = quoted_literal(action) {
            nodes.push(Node::Text(unescape_literal(&literal)));
            continue;
        }
        nodes.push(Node::Path(parse_expr(action)?));
    }
    if in_range {
        return Err(PathError::syntax("{range} is missing its {end}"));
    }
    if !text.is_empty() {
        nodes.push(Node::Text(text));
    }
    Ok(nodes)
}

/// Index of the `}` closing the action opened just before `start`.
fn find_action_end(chars: &[char], start: usize) -> Result<usize, PathError> {
    let mut quote: Option<char> = None;
    let mut index = start;
    while index < chars.len() {
        let current = chars[index];
        match quote {
            Some(open) if current == open => quote = None,
            Some(_) => {}
            None if current == '\\' => index += 1,
            None if current == '\'' || current == '"' => quote = Some(current),
            None if current == '}' => return Ok(index),
            None => {}
        }
        index += 1;
    }
    Err(PathError::syntax("unclosed action: missing '}'"))
}

fn quoted_literal(action: &str) -> Option<String> {
    let first = action.chars().next()?;
    if (first == '"' || first == '\'') && action.len() >= 2 && action.ends_with(first) {
        return Some(action[1..action.len() - 1].to_string());
    }
    None
}

fn unescape_literal(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\t", "\t").replace("\\r", "\r")
}

/// Parse a single path expression such as `.items[*].metadata.name`.
pub fn parse_expr(raw: &str) -> Result<Expr, PathError> {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut position = 0;
    let anchor = match chars.first() {
        Some('$') => {
            position = 1;
            Anchor::Root
        }
        Some('@') => {
            position = 1;
            Anchor::Current
        }
        _ => Anchor::Current,
    };

    let mut segments = Vec::new();
    // A bare leading key such as `metadata.name` is accepted.
    if position < chars.len() && chars[position] != '.' && chars[position] != '[' {
        let name = read_name(&chars, &mut position);
        push_name(&mut segments, name);
    }

    while position < chars.len() {
        match chars[position] {
            '.' => {
                position += 1;
                if position < chars.len() && chars[position] == '.' {
                    position += 1;
                    if position < chars.len() && chars[position] == '[' {
                        segments.push(Segment::Recursive(None));
                        continue;
                    }
                    let name = read_name(&chars, &mut position);
                    let target = if name.is_empty() || name == "*" { None } else { Some(name) };
                    segments.push(Segment::Recursive(target));
                    continue;
                }
                let name = read_name(&chars, &mut position);
                push_name(&mut segments, name);
            }
            '[' => {
                let close = find_bracket_end(&chars, position)?;
                let inner: String = chars[position + 1..close].iter().collect();
                segments.push(parse_bracket(inner.trim())?);
                position = close + 1;
            }
            other => {
                return Err(PathError::syntax(format!(
                    "unexpected character '{}' in path '{}'",
                    other,
                    raw.trim()
                )));
            }
        }
    }

    Ok(Expr { anchor, segments })
}

fn push_name(segments: &mut Vec<Segment>, name: String) {
    if name == "*" {
        segments.push(Segment::Wildcard);
    } else if !name.is_empty() {
        segments.push(Segment::Child(name));
    }
}

/// Read a key up to the next unescaped `.` or `[`.
fn read_name(chars: &[char], position: &mut usize) -> String {
    let mut name = String::new();
    while *position < chars.len() {
        let current = chars[*position];
        if current == '\\' && *position + 1 < chars.len() {
            name.push(chars[*position + 1]);
            *position += 2;
            continue;
        }
        if current == '.' || current == '[' {
            break;
        }
        name.push(current);
        *position += 1;
    }
    name.trim().to_string()
}

fn find_bracket_end(chars: &[char], open: usize) -> Result<usize, PathError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, current) in chars.iter().enumerate().skip(open) {
        match quote {
            Some(q) if *current == q => quote = None,
            Some(_) => {}
            None => match current {
                '\'' | '"' => quote = Some(*current),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(index);
                    }
                }
                _ => {}
            },
        }
    }
    Err(PathError::syntax("unclosed '[' in path"))
}

fn parse_bracket(inner: &str) -> Result<Segment, PathError> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(filter) = inner.strip_prefix('?') {
        let filter = filter.trim();
        let body = filter
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| PathError::syntax(format!("filter '{}' must be wrapped in '?( )'", inner)))?;
        return parse_filter(body.trim()).map(Segment::Filter);
    }
    if let Some(key) = quoted_literal(inner) {
        return Ok(Segment::Child(key));
    }
    if let Some((start, end)) = inner.split_once(':') {
        return Ok(Segment::Slice(parse_bound(start)?, parse_bound(end)?));
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| PathError::syntax(format!("invalid array index '{}'", inner)))
}

fn parse_bound(raw: &str) -> Result<Option<i64>, PathError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| PathError::syntax(format!("invalid slice bound '{}'", raw)))
}

const OPERATORS: [(&str, CompareOp); 6] = [
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    ("<=", CompareOp::Le),
    (">=", CompareOp::Ge),
    ("<", CompareOp::Lt),
    (">", CompareOp::Gt),
];

fn parse_filter(body: &str) -> Result<Filter, PathError> {
    let operator = find_operator(body);
    let Some((index, symbol, op)) = operator else {
        let left = parse_expr(body)?;
        return Ok(Filter { left, comparison: None });
    };

    let left = parse_expr(body[..index].trim())?;
    let right = body[index + symbol.len()..].trim();
    let literal = if let Some(text) = quoted_literal(right) {
        Literal::Text(text)
    } else if let Ok(number) = right.parse::<f64>() {
        Literal::Number(number)
    } else if right.is_empty() {
        return Err(PathError::syntax(format!("filter '{}' is missing a right operand", body)));
    } else {
        Literal::Text(right.to_string())
    };
    Ok(Filter {
        left,
        comparison: Some((op, literal)),
    })
}

/// First comparison operator outside quotes.
fn find_operator(body: &str) -> Option<(usize, &'static str, CompareOp)> {
    let mut quote: Option<char> = None;
    for (index, current) in body.char_indices() {
        match quote {
            Some(q) if current == q => quote = None,
            Some(_) => {}
            None if current == '\'' || current == '"' => quote = Some(current),
            None => {
                let rest = &body[index..];
                if let Some((symbol, op)) = OPERATORS.iter().find(|(symbol, _)| rest.starts_with(symbol)) {
                    return Some((index, *symbol, *op));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_escaped_dots_in_keys() {
        let expr = parse_expr(r".metadata.annotations.controller\.openebs\.io/affinity").expect("expr");
        assert_eq!(
            expr.segments,
            vec![
                Segment::Child("metadata".into()),
                Segment::Child("annotations".into()),
                Segment::Child("controller.openebs.io/affinity".into()),
            ]
        );
    }

    #[test]
    fn parses_filter_with_quoted_literal() {
        let expr = parse_expr(".spec.containers[?(@.name=='bb')].image").expect("expr");
        let Segment::Filter(filter) = &expr.segments[2] else {
            panic!("expected filter, got {:?}", expr.segments[2]);
        };
        assert_eq!(filter.left.segments, vec![Segment::Child("name".into())]);
        assert_eq!(filter.comparison, Some((CompareOp::Eq, Literal::Text("bb".into()))));
    }

    #[test]
    fn parses_range_blocks() {
        let nodes = parse_template("{range .items[*]}{@.x}/{.y};{end}").expect("template");
        let [Node::Range { body, .. }] = nodes.as_slice() else {
            panic!("expected a single range node, got {:?}", nodes);
        };
        assert_eq!(body.len(), 4);
        assert_eq!(body[1], Node::Text("/".into()));
    }

    #[test]
    fn rejects_unbalanced_templates() {
        assert!(parse_template("{.a").is_err());
        assert!(parse_template("{range .a[*]}{.b}").is_err());
        assert!(parse_template("{end}").is_err());
        assert!(parse_expr(".a[?(@.b=='x'").is_err());
    }
}
