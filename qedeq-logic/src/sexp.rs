//! S-expression reader and printer for logic elements
//!
//! `(FORALL (VAR "x") (PREDVAR "\phi" (VAR "x")))` reads as a list with tag
//! `FORALL` and two children. The head of every list is its operator tag;
//! all other positions hold atoms (bare or quoted) or nested lists.

use crate::element::LogicElement;
use crate::error::{LogicError, Result};

/// Read exactly one logic element from `input`
pub fn parse_element(input: &str) -> Result<LogicElement> {
    let tokens = SExpLexer::new(input).tokenize()?;
    let mut parser = SExpTokenParser::new(tokens);
    let element = parser.parse_element()?;
    match parser.current_token() {
        Token::Eof(_) => Ok(element),
        _ => Err(LogicError::syntax(
            "Trailing input after element",
            parser.current_offset(),
        )),
    }
}

/// Read a whitespace separated sequence of logic elements
pub fn parse_elements(input: &str) -> Result<Vec<LogicElement>> {
    let tokens = SExpLexer::new(input).tokenize()?;
    let mut parser = SExpTokenParser::new(tokens);
    let mut elements = Vec::new();
    while !matches!(parser.current_token(), Token::Eof(_)) {
        elements.push(parser.parse_element()?);
    }
    Ok(elements)
}

/// Print an element on a single line
pub fn print_element(element: &LogicElement) -> String {
    let mut out = String::new();
    write_element(element, &mut out);
    out
}

/// Print an element with one nested list per line
pub fn print_element_pretty(element: &LogicElement, indent_size: usize) -> String {
    let mut out = String::new();
    write_pretty(element, indent_size, 0, &mut out);
    out
}

fn write_element(element: &LogicElement, out: &mut String) {
    match element {
        LogicElement::Atom(text) => write_atom(text, out),
        LogicElement::List(list) => {
            out.push('(');
            write_tag(&list.operator, out);
            for child in &list.elements {
                out.push(' ');
                write_element(child, out);
            }
            out.push(')');
        }
    }
}

fn write_pretty(element: &LogicElement, indent_size: usize, level: usize, out: &mut String) {
    match element {
        LogicElement::List(list) if list.elements.iter().any(LogicElement::is_list) => {
            out.push('(');
            write_tag(&list.operator, out);
            for child in &list.elements {
                out.push('\n');
                out.push_str(&" ".repeat((level + 1) * indent_size));
                write_pretty(child, indent_size, level + 1, out);
            }
            out.push(')');
        }
        _ => write_element(element, out),
    }
}

fn write_tag(tag: &str, out: &mut String) {
    if is_bare(tag) {
        out.push_str(tag);
    } else {
        write_atom(tag, out);
    }
}

fn write_atom(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn is_bare(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|ch| !is_delimiter(ch))
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';')
}

/// S-expression token
#[derive(Debug, Clone, PartialEq)]
enum Token {
    LeftParen(usize),
    RightParen(usize),
    Atom(String, usize),
    Str(String, usize),
    Eof(usize),
}

/// S-expression lexer
struct SExpLexer {
    chars: Vec<char>,
    position: usize,
}

impl SExpLexer {
    fn new(input: &str) -> Self {
        SExpLexer {
            chars: input.chars().collect(),
            position: 0,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.skip_whitespace_and_comments();

            if self.is_at_end() {
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        tokens.push(Token::Eof(self.position));
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        let start = self.position;
        match self.current_char() {
            Some('(') => {
                self.advance();
                Ok(Token::LeftParen(start))
            }
            Some(')') => {
                self.advance();
                Ok(Token::RightParen(start))
            }
            Some('"') => {
                let string = self.read_string()?;
                Ok(Token::Str(string, start))
            }
            Some(_) => Ok(Token::Atom(self.read_atom(), start)),
            None => Ok(Token::Eof(start)),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let start = self.position;
        self.advance(); // Skip opening quote
        let mut value = String::new();

        while let Some(ch) = self.current_char() {
            if ch == '"' {
                self.advance(); // Skip closing quote
                return Ok(value);
            } else if ch == '\\' {
                self.advance();
                match self.current_char() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    // LaTeX style names such as "\phi" keep their backslash
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => break,
                }
                self.advance();
            } else {
                value.push(ch);
                self.advance();
            }
        }

        Err(LogicError::UnterminatedString { offset: start })
    }

    fn read_atom(&mut self) -> String {
        let mut atom = String::new();

        while let Some(ch) = self.current_char() {
            if is_delimiter(ch) {
                break;
            }
            atom.push(ch);
            self.advance();
        }

        atom
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                // Skip comment until end of line
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn current_char(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn advance(&mut self) {
        if self.position < self.chars.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.chars.len()
    }
}

/// Turns the token stream into elements
struct SExpTokenParser {
    tokens: Vec<Token>,
    current: usize,
}

impl SExpTokenParser {
    fn new(tokens: Vec<Token>) -> Self {
        SExpTokenParser { tokens, current: 0 }
    }

    fn current_token(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    fn current_offset(&self) -> usize {
        match self.current_token() {
            Token::LeftParen(offset)
            | Token::RightParen(offset)
            | Token::Atom(_, offset)
            | Token::Str(_, offset)
            | Token::Eof(offset) => *offset,
        }
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
    }

    fn parse_element(&mut self) -> Result<LogicElement> {
        match self.current_token().clone() {
            Token::LeftParen(_) => self.parse_list(),
            Token::Atom(text, _) | Token::Str(text, _) => {
                self.advance();
                Ok(LogicElement::Atom(text))
            }
            Token::RightParen(offset) => {
                Err(LogicError::syntax("Unexpected closing parenthesis", offset))
            }
            Token::Eof(_) => Err(LogicError::unexpected_eof("element")),
        }
    }

    fn parse_list(&mut self) -> Result<LogicElement> {
        self.advance(); // Skip opening paren
        let operator = match self.current_token().clone() {
            Token::Atom(tag, _) | Token::Str(tag, _) => {
                self.advance();
                tag
            }
            Token::Eof(_) => return Err(LogicError::unexpected_eof("operator tag")),
            _ => {
                return Err(LogicError::syntax(
                    "List must start with an operator tag",
                    self.current_offset(),
                ))
            }
        };

        let mut elements = Vec::new();
        while !matches!(self.current_token(), Token::RightParen(_) | Token::Eof(_)) {
            elements.push(self.parse_element()?);
        }

        if matches!(self.current_token(), Token::RightParen(_)) {
            self.advance(); // Skip closing paren
            Ok(LogicElement::list(operator, elements))
        } else {
            Err(LogicError::unexpected_eof("closing parenthesis"))
        }
    }
}
