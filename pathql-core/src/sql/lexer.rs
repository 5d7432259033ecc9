//! Tokenizer for the SQL subset. Every token carries the character offset
//! it starts at, so parse errors can point into the statement text.

use crate::error::{QueryError, QueryResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Select,
    From,
    Where,
    Limit,
    As,
    Register,
    Global,
    Type,
    And,
    Or,
    Not,
    Is,
    Null,
    In,
    True,
    False,

    /// Bare or back-ticked name; back-ticked selectors keep their slashes and brackets.
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Placeholder,

    Equal,
    /// `!=` or `<>`
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    Minus,
    Star,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    Semicolon,

    Eof,
}

impl Token {
    /// Short rendering used in error messages.
    pub fn describe(&self) -> String {
        let symbol = match self {
            Token::Identifier(name) => return name.clone(),
            Token::Integer(n) => return n.to_string(),
            Token::Float(n) => return n.to_string(),
            Token::String(s) => return format!("'{}'", s),
            Token::Placeholder => "?",
            Token::Equal => "=",
            Token::NotEqual => "!=",
            Token::LessThan => "<",
            Token::LessThanEq => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanEq => ">=",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::Semicolon => ";",
            Token::Eof => "end of input",
            keyword => return format!("{:?}", keyword).to_uppercase(),
        };
        symbol.to_string()
    }

    fn keyword(word: &str) -> Option<Token> {
        let token = match word.to_ascii_uppercase().as_str() {
            "SELECT" => Token::Select,
            "FROM" => Token::From,
            "WHERE" => Token::Where,
            "LIMIT" => Token::Limit,
            "AS" => Token::As,
            "REGISTER" => Token::Register,
            "GLOBAL" => Token::Global,
            "TYPE" => Token::Type,
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "IS" => Token::Is,
            "NULL" => Token::Null,
            "IN" => Token::In,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            _ => return None,
        };
        Some(token)
    }
}

pub struct SqlLexer {
    input: Vec<char>,
    position: usize,
    offset: usize,
}

impl SqlLexer {
    pub fn new(input: &str) -> Self {
        Self::with_offset(input, 0)
    }

    /// Lexer whose reported positions are shifted by `offset`, used when the
    /// input is a fragment of a larger text.
    pub fn with_offset(input: &str, offset: usize) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            offset,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    /// Consumes `expected` when it is the current character.
    fn eat(&mut self, expected: char) -> bool {
        let matched = self.current() == Some(expected);
        if matched {
            self.position += 1;
        }
        matched
    }

    /// Consumes characters while `accept` holds and returns them.
    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let start = self.position;
        while self.current().is_some_and(&accept) {
            self.position += 1;
        }
        self.input[start..self.position].iter().collect()
    }

    /// Position of the next unread character, including the offset.
    pub fn position(&self) -> usize {
        self.offset + self.position
    }

    /// Unread input.
    pub fn remaining(&self) -> String {
        self.input[self.position.min(self.input.len())..].iter().collect()
    }

    fn error(&self, message: &str, start: usize) -> QueryError {
        let end = (self.position + 1).min(self.input.len());
        let fragment: String = self.input[start.min(end)..end].iter().take(16).collect();
        QueryError::parse_at(message, &fragment, self.offset + start)
    }

    /// Offset of the next token, after skipping whitespace and comments.
    pub fn next_offset(&mut self) -> usize {
        self.skip_trivia();
        self.position()
    }

    fn skip_trivia(&mut self) {
        loop {
            self.take_while(char::is_whitespace);
            match (self.current(), self.peek()) {
                (Some('-'), Some('-')) => {
                    self.take_while(|ch| ch != '\n');
                    self.eat('\n');
                }
                (Some('/'), Some('*')) => {
                    self.position += 2;
                    while self.current().is_some() {
                        if self.current() == Some('*') && self.peek() == Some('/') {
                            self.position += 2;
                            break;
                        }
                        self.position += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn read_number(&mut self) -> QueryResult<Token> {
        let start = self.position;
        let mut text = self.take_while(|ch| ch.is_ascii_digit());
        // "1." followed by a non-digit leaves the dot for the parser
        if self.current() == Some('.') && self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.position += 1;
            text.push('.');
            text.push_str(&self.take_while(|ch| ch.is_ascii_digit()));
            return text
                .parse()
                .map(Token::Float)
                .map_err(|_| self.error("Invalid float number", start));
        }
        text.parse()
            .map(Token::Integer)
            .map_err(|_| self.error("Invalid integer number", start))
    }

    fn read_string(&mut self, quote: char) -> QueryResult<Token> {
        let start = self.position;
        self.position += 1;
        let mut text = String::new();

        while let Some(ch) = self.current() {
            self.position += 1;
            if ch == quote {
                if !self.eat(quote) {
                    return Ok(Token::String(text));
                }
                text.push(quote);
            } else if ch == '\\' {
                if let Some(escaped) = self.current() {
                    self.position += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
            } else {
                text.push(ch);
            }
        }

        Err(self.error("Unterminated string", start))
    }

    fn read_word(&mut self) -> Token {
        let word = self.take_while(|ch| ch.is_alphanumeric() || ch == '_');
        Token::keyword(&word).unwrap_or(Token::Identifier(word))
    }

    fn read_quoted_identifier(&mut self) -> QueryResult<Token> {
        let start = self.position;
        self.position += 1;
        let name = self.take_while(|ch| ch != '`');
        if !self.eat('`') {
            return Err(self.error("Unterminated quoted identifier", start));
        }
        Ok(Token::Identifier(name))
    }

    pub fn next_token(&mut self) -> QueryResult<Token> {
        self.skip_trivia();

        let start = self.position;
        let ch = match self.current() {
            None => return Ok(Token::Eof),
            Some(ch) => ch,
        };
        match ch {
            '0'..='9' => return self.read_number(),
            '\'' | '"' => return self.read_string(ch),
            '`' => return self.read_quoted_identifier(),
            ch if ch.is_alphabetic() || ch == '_' => return Ok(self.read_word()),
            _ => {}
        }

        self.position += 1;
        let token = match ch {
            '?' => Token::Placeholder,
            '=' => {
                self.eat('=');
                Token::Equal
            }
            '!' if self.eat('=') => Token::NotEqual,
            '<' if self.eat('=') => Token::LessThanEq,
            '<' if self.eat('>') => Token::NotEqual,
            '<' => Token::LessThan,
            '>' if self.eat('=') => Token::GreaterThanEq,
            '>' => Token::GreaterThan,
            '-' => Token::Minus,
            '*' => Token::Star,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ';' => Token::Semicolon,
            _ => {
                self.position = start;
                return Err(self.error("Unexpected character", start));
            }
        };
        Ok(token)
    }

    /// Tokenizes the whole input; each token is paired with its start position.
    pub fn tokenize(&mut self) -> QueryResult<Vec<(Token, usize)>> {
        let mut tokens = Vec::new();
        loop {
            let offset = self.next_offset();
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push((token, offset));
            if done {
                return Ok(tokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        SqlLexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn test_select_keywords() {
        let tokens = tokenize("SELECT FROM WHERE LIMIT");
        assert_eq!(tokens[0], Token::Select);
        assert_eq!(tokens[1], Token::From);
        assert_eq!(tokens[2], Token::Where);
        assert_eq!(tokens[3], Token::Limit);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(tokenize("select")[0], Token::Select);
        assert_eq!(tokenize("SELECT")[0], Token::Select);
        assert_eq!(tokenize("Select")[0], Token::Select);
        assert_eq!(tokenize("is not null"), vec![Token::Is, Token::Not, Token::Null, Token::Eof]);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(tokenize("Records")[0], Token::Identifier("Records".to_string()));
        assert_eq!(tokenize("my_table")[0], Token::Identifier("my_table".to_string()));
    }

    #[test]
    fn test_backtick_selector() {
        assert_eq!(
            tokenize("`/Records[Active = true]`")[0],
            Token::Identifier("/Records[Active = true]".to_string())
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(tokenize("'hello'")[0], Token::String("hello".to_string()));
        assert_eq!(tokenize("\"abc\"")[0], Token::String("abc".to_string()));
        assert_eq!(tokenize("'it''s'")[0], Token::String("it's".to_string()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("123")[0], Token::Integer(123));
        assert_eq!(tokenize("100.0")[0], Token::Float(100.0));
        assert_eq!(
            tokenize("1.x"),
            vec![
                Token::Integer(1),
                Token::Dot,
                Token::Identifier("x".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(tokenize(r"'a\'b\n'")[0], Token::String("a'b\n".to_string()));
        let err = SqlLexer::new("  'open").tokenize().unwrap_err();
        assert!(err.to_string().contains("Unterminated string"), "{}", err);
        assert!(err.to_string().contains("position 2"), "{}", err);
    }

    #[test]
    fn test_describe() {
        assert_eq!(Token::Register.describe(), "REGISTER");
        assert_eq!(Token::NotEqual.describe(), "!=");
        assert_eq!(Token::String("x".to_string()).describe(), "'x'");
    }

    #[test]
    fn test_operators() {
        assert_eq!(tokenize("=")[0], Token::Equal);
        assert_eq!(tokenize("!=")[0], Token::NotEqual);
        assert_eq!(tokenize("<>")[0], Token::NotEqual);
        assert_eq!(tokenize("<")[0], Token::LessThan);
        assert_eq!(tokenize("<=")[0], Token::LessThanEq);
        assert_eq!(tokenize(">")[0], Token::GreaterThan);
        assert_eq!(tokenize(">=")[0], Token::GreaterThanEq);
        assert_eq!(tokenize("?")[0], Token::Placeholder);
    }

    #[test]
    fn test_positions() {
        let tokens = SqlLexer::with_offset("Active = ?", 10).tokenize().unwrap();
        let offsets: Vec<usize> = tokens.iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![10, 17, 19, 20]);
    }

    #[test]
    fn test_unexpected_character_reports_position() {
        let err = SqlLexer::new("Name # 1").tokenize().unwrap_err();
        assert!(err.to_string().contains("position 5"), "{}", err);
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("SELECT -- this is a comment\n* FROM /* x */ Foo");
        assert_eq!(tokens[0], Token::Select);
        assert_eq!(tokens[1], Token::Star);
        assert_eq!(tokens[2], Token::From);
        assert_eq!(tokens[3], Token::Identifier("Foo".to_string()));
    }
}
