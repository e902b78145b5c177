//! Scanner and parser for template sources.

use super::{Field, TemplateError};

/// A parsed template node.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Commands chained with `|`; each result feeds the next command's last argument.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Command {
    Call { name: String, args: Vec<Operand> },
    Value(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    Field(Field),
    Str(String),
    Bool(bool),
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Field),
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Pipe,
}

/// An action's tokens, each with its byte offset in the source.
struct Action {
    tokens: Vec<(Token, usize)>,
    offset: usize,
}

impl Action {
    fn keyword(&self) -> Option<&str> {
        match self.tokens.first() {
            Some((Token::Ident(word), _)) if matches!(word.as_str(), "if" | "else" | "end") => {
                Some(word.as_str())
            }
            _ => None,
        }
    }
}

enum Item {
    Text(String),
    Action(Action),
}

/// How a node list ended.
enum Stop {
    Eof,
    End(usize),
    Else(usize, Option<Pipeline>),
}

/// Parses a template source into a node list.
pub(super) fn parse(src: &str) -> Result<Vec<Node>, TemplateError> {
    let items = scan(src)?;
    let mut parser = Parser {
        items: items.into_iter(),
    };
    let (nodes, stop) = parser.parse_list()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End(offset) => Err(TemplateError::parse(offset, "unexpected {{end}}")),
        Stop::Else(offset, _) => Err(TemplateError::parse(offset, "unexpected {{else}}")),
    }
}

/// Splits the source into text runs and lexed actions, applying `{{-`/`-}}` trimming.
fn scan(src: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while let Some(found) = src[pos..].find("{{") {
        let open = pos + found;
        let mut text = &src[pos..open];
        if trim_next {
            text = text.trim_start();
        }
        let mut body = open + 2;
        if src[body..].starts_with('-') {
            body += 1;
            text = text.trim_end();
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let (tokens, close, trim_after) = lex_action(src, body, open)?;
        items.push(Item::Action(Action {
            tokens,
            offset: open,
        }));
        pos = close;
        trim_next = trim_after;
    }

    let mut text = &src[pos..];
    if trim_next {
        text = text.trim_start();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
    Ok(items)
}

/// Lexes one action body starting at `start`.
///
/// Returns the tokens, the position just past the closing delimiter and
/// whether the delimiter asked to trim the following text.
fn lex_action(
    src: &str,
    start: usize,
    open: usize,
) -> Result<(Vec<(Token, usize)>, usize, bool), TemplateError> {
    let mut tokens = Vec::new();
    let mut i = start;

    loop {
        let rest = &src[i..];
        let Some(c) = rest.chars().next() else {
            return Err(TemplateError::parse(open, "unclosed action"));
        };
        if rest.starts_with("}}") {
            return Ok((tokens, i + 2, false));
        }
        if rest.starts_with("-}}") {
            return Ok((tokens, i + 3, true));
        }

        match c {
            c if c.is_whitespace() => i += c.len_utf8(),
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '|' => {
                tokens.push((Token::Pipe, i));
                i += 1;
            }
            '.' => {
                let name = ident_at(&src[i + 1..]);
                if name.is_empty() {
                    return Err(TemplateError::parse(
                        i,
                        "bare '.' is not supported; use a variable such as .name",
                    ));
                }
                let field = Field::from_name(name).ok_or_else(|| {
                    TemplateError::parse(
                        i,
                        format!(
                            "unknown variable .{name} (expected one of {})",
                            Field::ALL
                                .iter()
                                .map(|f| format!(".{}", f.as_str()))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    )
                })?;
                tokens.push((Token::Field(field), i));
                i += 1 + name.len();
            }
            '"' => {
                let (value, len) = quoted_at(&src[i..], i)?;
                tokens.push((Token::Str(value), i));
                i += len;
            }
            '`' => {
                let end = src[i + 1..]
                    .find('`')
                    .ok_or_else(|| TemplateError::parse(i, "unterminated raw string"))?;
                tokens.push((Token::Str(src[i + 1..i + 1 + end].to_string()), i));
                i += end + 2;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name = ident_at(rest);
                tokens.push((Token::Ident(name.to_string()), i));
                i += name.len();
            }
            other => {
                return Err(TemplateError::parse(
                    i,
                    format!("unexpected character {other:?} in action"),
                ));
            }
        }
    }
}

fn ident_at(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

/// Reads a double-quoted literal; returns the unescaped value and its source length.
fn quoted_at(s: &str, offset: usize) -> Result<(String, usize), TemplateError> {
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, idx + 1)),
            '\n' => break,
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((_, other)) => {
                        return Err(TemplateError::parse(
                            offset + idx,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c => value.push(c),
        }
    }
    Err(TemplateError::parse(offset, "unterminated quoted string"))
}

struct Parser {
    items: std::vec::IntoIter<Item>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.next() {
            let action = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(action) => action,
            };
            let offset = action.offset;
            match action.keyword() {
                Some("if") => {
                    let cond = parse_pipeline(&action.tokens[1..], offset)?;
                    nodes.push(self.parse_if(cond, offset)?);
                }
                Some("else") => {
                    let rest = &action.tokens[1..];
                    let cond = match rest.first() {
                        None => None,
                        Some((Token::Ident(word), _)) if word == "if" => {
                            Some(parse_pipeline(&rest[1..], offset)?)
                        }
                        Some((_, at)) => {
                            return Err(TemplateError::parse(*at, "unexpected token after else"));
                        }
                    };
                    return Ok((nodes, Stop::Else(offset, cond)));
                }
                Some(_) => {
                    if let Some((_, at)) = action.tokens.get(1) {
                        return Err(TemplateError::parse(*at, "unexpected token after end"));
                    }
                    return Ok((nodes, Stop::End(offset)));
                }
                None => nodes.push(Node::Action(parse_pipeline(&action.tokens, offset)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn parse_if(&mut self, cond: Pipeline, offset: usize) -> Result<Node, TemplateError> {
        let (then, stop) = self.parse_list()?;
        let otherwise = match stop {
            Stop::End(_) => Vec::new(),
            Stop::Else(_, None) => {
                let (nodes, stop) = self.parse_list()?;
                match stop {
                    Stop::End(_) => nodes,
                    Stop::Else(at, _) => {
                        return Err(TemplateError::parse(at, "unexpected {{else}} after {{else}}"));
                    }
                    Stop::Eof => {
                        return Err(TemplateError::parse(offset, "unclosed {{if}}: missing {{end}}"));
                    }
                }
            }
            Stop::Else(at, Some(next)) => vec![self.parse_if(next, at)?],
            Stop::Eof => {
                return Err(TemplateError::parse(offset, "unclosed {{if}}: missing {{end}}"));
            }
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }
}

fn parse_pipeline(tokens: &[(Token, usize)], offset: usize) -> Result<Pipeline, TemplateError> {
    let mut cursor = Cursor {
        tokens,
        pos: 0,
        offset,
    };
    let pipeline = cursor.pipeline()?;
    if let Some((_, at)) = tokens.get(cursor.pos) {
        return Err(TemplateError::parse(*at, "unexpected ')'"));
    }
    Ok(pipeline)
}

struct Cursor<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
    offset: usize,
}

impl Cursor<'_> {
    fn here(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, at)| *at)
            .unwrap_or(self.offset)
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.command()?];
        while let Some((Token::Pipe, _)) = self.tokens.get(self.pos) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, TemplateError> {
        if let Some((Token::Ident(name), _)) = self.tokens.get(self.pos) {
            if name != "true" && name != "false" {
                let name = name.clone();
                self.pos += 1;
                let mut args = Vec::new();
                while let Some(arg) = self.operand()? {
                    args.push(arg);
                }
                return Ok(Command::Call { name, args });
            }
        }

        let at = self.here();
        let Some(value) = self.operand()? else {
            return Err(TemplateError::parse(at, "missing value for command"));
        };
        if self.operand()?.is_some() {
            return Err(TemplateError::parse(
                at,
                "only a function call can take arguments",
            ));
        }
        Ok(Command::Value(value))
    }

    fn operand(&mut self) -> Result<Option<Operand>, TemplateError> {
        let Some((token, at)) = self.tokens.get(self.pos) else {
            return Ok(None);
        };
        let operand = match token {
            Token::Field(field) => Operand::Field(*field),
            Token::Str(value) => Operand::Str(value.clone()),
            Token::Ident(name) if name == "true" => Operand::Bool(true),
            Token::Ident(name) if name == "false" => Operand::Bool(false),
            Token::Ident(name) => {
                return Err(TemplateError::parse(
                    *at,
                    format!("function {name:?} must be parenthesized when used as an argument"),
                ));
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.pipeline()?;
                match self.tokens.get(self.pos) {
                    Some((Token::RParen, _)) => self.pos += 1,
                    _ => return Err(TemplateError::parse(*at, "unclosed '('")),
                }
                return Ok(Some(Operand::Pipeline(inner)));
            }
            Token::RParen | Token::Pipe => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_fields() {
        let nodes = parse("a-{{ .name }}-b").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a-".to_string()),
                Node::Action(Pipeline {
                    commands: vec![Command::Value(Operand::Field(Field::Name))]
                }),
                Node::Text("-b".to_string()),
            ]
        );
    }

    #[test]
    fn test_trim_markers() {
        let nodes = parse("a  {{- .os -}}  b").unwrap();
        assert_eq!(nodes.first(), Some(&Node::Text("a".to_string())));
        assert_eq!(nodes.last(), Some(&Node::Text("b".to_string())));
    }

    #[test]
    fn test_closing_braces_inside_string() {
        let nodes = parse(r#"{{ eq .os "}}" }}"#).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_else_if_chain_nests() {
        let nodes = parse("{{if .os}}a{{else if .arch}}b{{else}}c{{end}}").unwrap();
        let [Node::If { otherwise, .. }] = nodes.as_slice() else {
            panic!("expected a single if node: {nodes:?}");
        };
        assert!(matches!(otherwise.as_slice(), [Node::If { .. }]));
    }

    #[test]
    fn test_errors_carry_offsets() {
        let err = parse("abc {{ .nmae }}").unwrap_err();
        assert!(err.message.contains("offset 7"), "{err}");
        assert!(err.message.contains("unknown variable .nmae"), "{err}");
    }

    #[test]
    fn test_structural_errors() {
        for src in [
            "{{ .name",
            "{{end}}",
            "{{if .os}}x",
            "{{ \"abc }}",
            "{{ (lower .os }}",
            "{{ }}",
            "{{ .os .arch }}",
            "{{ eq lower .os }}",
            "{{ . }}",
        ] {
            assert!(parse(src).is_err(), "expected parse error for {src:?}");
        }
    }
}
