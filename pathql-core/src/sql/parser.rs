use super::lexer::{SqlLexer, Token};
use crate::error::{QueryError, QueryResult};

/// SQL Abstract Syntax Tree types

#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(SelectStatement),
    RegisterType(RegisterTypeStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub columns: Vec<SelectColumn>,
    pub from: FromSource,
    /// Character offset of the FROM source in the statement text.
    pub from_offset: usize,
    pub where_clause: Option<SqlExpr>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    /// Table name or back-ticked selector path.
    Table(String),
    Subquery(Box<SelectStatement>),
}

impl FromSource {
    pub fn table_name(&self) -> Option<&str> {
        match self {
            FromSource::Table(name) => Some(name),
            FromSource::Subquery(_) => None,
        }
    }
}

/// `REGISTER [GLOBAL] TYPE name AS definition`
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterTypeStatement {
    pub name: String,
    pub global: bool,
    /// Raw definition text: an inline `struct{...}` or `?`.
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Star,
    Column {
        name: String,
        alias: Option<String>,
    },
    Function {
        name: String,
        args: Vec<SqlExpr>,
        alias: Option<String>,
    },
    Expression {
        expr: SqlExpr,
        alias: Option<String>,
    },
}

impl SelectColumn {
    pub fn alias(&self) -> Option<&str> {
        match self {
            SelectColumn::Star => None,
            SelectColumn::Column { alias, .. }
            | SelectColumn::Function { alias, .. }
            | SelectColumn::Expression { alias, .. } => alias.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column(String),
    QualifiedColumn { table: String, column: String },
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    /// `?`, numbered in encounter order.
    Placeholder(usize),

    BinaryOp {
        left: Box<SqlExpr>,
        op: BinaryOp,
        right: Box<SqlExpr>,
    },

    Not(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),

    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },

    /// Function call; `CAST(x AS t)` carries `t` as a trailing `Column` argument.
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
}

impl SqlExpr {
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            SqlExpr::Integer(_)
                | SqlExpr::Float(_)
                | SqlExpr::String(_)
                | SqlExpr::Boolean(_)
                | SqlExpr::Null
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Operator with its operands swapped (`a < b` == `b > a`).
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => *other,
        }
    }
}

/// Parses a SELECT or REGISTER TYPE statement.
pub fn parse_statement(sql: &str) -> QueryResult<SqlStatement> {
    let mut lexer = SqlLexer::new(sql);
    if lexer.next_token()? == Token::Register {
        return parse_register(lexer);
    }
    SqlParser::new(sql)?.parse()
}

/// Parses a statement that must be a SELECT.
pub fn parse_select(sql: &str) -> QueryResult<SelectStatement> {
    match parse_statement(sql)? {
        SqlStatement::Select(select) => Ok(select),
        SqlStatement::RegisterType(_) => Err(QueryError::ParseError(
            "unsupported statement: expected SELECT".to_string(),
        )),
    }
}

/// Parses a standalone boolean expression; reported positions are shifted by `offset`.
pub fn parse_criteria(text: &str, offset: usize) -> QueryResult<SqlExpr> {
    let tokens = SqlLexer::with_offset(text, offset).tokenize()?;
    let mut parser = SqlParser::from_tokens(tokens);
    let expr = parser.parse_expression()?;
    if *parser.current_token() != Token::Eof {
        return Err(parser.error("Unexpected trailing input"));
    }
    Ok(expr)
}

fn parse_register(mut lexer: SqlLexer) -> QueryResult<SqlStatement> {
    let mut token = lexer.next_token()?;
    let global = token == Token::Global;
    if global {
        token = lexer.next_token()?;
    }
    if token != Token::Type {
        let at = lexer.position();
        return Err(QueryError::parse_at("Expected TYPE", &token.describe(), at));
    }
    let at = lexer.next_offset();
    let name = match lexer.next_token()? {
        Token::Identifier(name) => name,
        other => {
            return Err(QueryError::parse_at(
                "Expected type name",
                &other.describe(),
                at,
            ))
        }
    };
    let at = lexer.next_offset();
    let as_token = lexer.next_token()?;
    if as_token != Token::As {
        return Err(QueryError::parse_at("Expected AS", &as_token.describe(), at));
    }
    let remaining = lexer.remaining();
    let definition = remaining.trim().trim_end_matches(';').trim();
    if definition.is_empty() {
        return Err(QueryError::parse_at(
            "Missing type definition",
            "",
            lexer.position(),
        ));
    }
    Ok(SqlStatement::RegisterType(RegisterTypeStatement {
        name,
        global,
        definition: definition.to_string(),
    }))
}

/// SQL Parser
pub struct SqlParser {
    tokens: Vec<(Token, usize)>,
    position: usize,
    placeholders: usize,
}

impl SqlParser {
    pub fn new(input: &str) -> QueryResult<Self> {
        let mut lexer = SqlLexer::new(input);
        let tokens = lexer.tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    fn from_tokens(tokens: Vec<(Token, usize)>) -> Self {
        Self {
            tokens,
            position: 0,
            placeholders: 0,
        }
    }

    fn current_token(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|(token, _)| token)
            .unwrap_or(&Token::Eof)
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|(_, offset)| *offset)
            .unwrap_or(0)
    }

    fn peek_token(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map(|(token, _)| token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn error(&self, message: &str) -> QueryError {
        QueryError::parse_at(
            message,
            &self.current_token().describe(),
            self.current_offset(),
        )
    }

    fn expect(&mut self, expected: Token) -> QueryResult<()> {
        if *self.current_token() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("Expected {}", expected.describe())))
        }
    }

    fn expect_identifier(&mut self) -> QueryResult<String> {
        match self.current_token().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    pub fn parse(&mut self) -> QueryResult<SqlStatement> {
        let stmt = match self.current_token() {
            Token::Select => SqlStatement::Select(self.parse_select()?),
            _ => return Err(self.error("Unexpected token at start of statement")),
        };

        // Optional semicolon at end
        if *self.current_token() == Token::Semicolon {
            self.advance();
        }

        if *self.current_token() != Token::Eof {
            return Err(self.error("Unexpected trailing input"));
        }

        Ok(stmt)
    }

    fn parse_select(&mut self) -> QueryResult<SelectStatement> {
        self.expect(Token::Select)?;

        let columns = self.parse_select_columns()?;

        self.expect(Token::From)?;
        let from_offset = self.current_offset();
        let from = if *self.current_token() == Token::LeftParen {
            self.advance();
            let inner = self.parse_select()?;
            self.expect(Token::RightParen)?;
            // Derived-table alias is accepted and ignored
            if *self.current_token() == Token::As {
                self.advance();
                self.expect_identifier()?;
            } else if let Token::Identifier(_) = self.current_token() {
                self.advance();
            }
            FromSource::Subquery(Box::new(inner))
        } else {
            FromSource::Table(self.expect_identifier()?)
        };

        let where_clause = if *self.current_token() == Token::Where {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };

        let limit = if *self.current_token() == Token::Limit {
            self.advance();
            match self.current_token() {
                Token::Integer(n) if *n >= 0 => {
                    let n = *n as usize;
                    self.advance();
                    Some(n)
                }
                _ => return Err(self.error("Expected non-negative integer after LIMIT")),
            }
        } else {
            None
        };

        Ok(SelectStatement {
            columns,
            from,
            from_offset,
            where_clause,
            limit,
        })
    }

    fn parse_select_columns(&mut self) -> QueryResult<Vec<SelectColumn>> {
        let mut columns = Vec::new();

        loop {
            let col = self.parse_select_column()?;
            columns.push(col);

            if *self.current_token() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(columns)
    }

    fn parse_select_column(&mut self) -> QueryResult<SelectColumn> {
        if *self.current_token() == Token::Star {
            self.advance();
            return Ok(SelectColumn::Star);
        }

        let expr = self.parse_primary_expression()?;
        let alias = self.parse_optional_alias()?;

        Ok(match expr {
            SqlExpr::Column(name) => SelectColumn::Column { name, alias },
            SqlExpr::QualifiedColumn { table, column } => SelectColumn::Column {
                name: format!("{}.{}", table, column),
                alias,
            },
            SqlExpr::Function { name, args } => SelectColumn::Function { name, args, alias },
            expr => SelectColumn::Expression { expr, alias },
        })
    }

    fn parse_optional_alias(&mut self) -> QueryResult<Option<String>> {
        if *self.current_token() == Token::As {
            self.advance();
            Ok(Some(self.expect_identifier()?))
        } else if let Token::Identifier(name) = self.current_token() {
            let alias = name.clone();
            self.advance();
            Ok(Some(alias))
        } else {
            Ok(None)
        }
    }

    fn parse_expression_list(&mut self) -> QueryResult<Vec<SqlExpr>> {
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expression()?);

            if *self.current_token() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(exprs)
    }

    fn parse_expression(&mut self) -> QueryResult<SqlExpr> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> QueryResult<SqlExpr> {
        let mut left = self.parse_and_expression()?;

        while *self.current_token() == Token::Or {
            self.advance();
            let right = self.parse_and_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and_expression(&mut self) -> QueryResult<SqlExpr> {
        let mut left = self.parse_not_expression()?;

        while *self.current_token() == Token::And {
            self.advance();
            let right = self.parse_not_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_not_expression(&mut self) -> QueryResult<SqlExpr> {
        if *self.current_token() == Token::Not {
            self.advance();
            let expr = self.parse_not_expression()?;
            return Ok(SqlExpr::Not(Box::new(expr)));
        }

        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> QueryResult<SqlExpr> {
        let left = self.parse_primary_expression()?;

        // IS NULL / IS NOT NULL
        if *self.current_token() == Token::Is {
            self.advance();

            if *self.current_token() == Token::Not {
                self.advance();
                self.expect(Token::Null)?;
                return Ok(SqlExpr::IsNotNull(Box::new(left)));
            } else {
                self.expect(Token::Null)?;
                return Ok(SqlExpr::IsNull(Box::new(left)));
            }
        }

        // IN / NOT IN
        let negated = *self.current_token() == Token::Not && *self.peek_token(1) == Token::In;
        if negated {
            self.advance();
        }
        if *self.current_token() == Token::In {
            self.advance();
            self.expect(Token::LeftParen)?;
            let list = self.parse_expression_list()?;
            self.expect(Token::RightParen)?;
            return Ok(SqlExpr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        let op = match self.current_token() {
            Token::Equal => Some(BinaryOp::Eq),
            Token::NotEqual => Some(BinaryOp::NotEq),
            Token::LessThan => Some(BinaryOp::Lt),
            Token::LessThanEq => Some(BinaryOp::LtEq),
            Token::GreaterThan => Some(BinaryOp::Gt),
            Token::GreaterThanEq => Some(BinaryOp::GtEq),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let right = self.parse_primary_expression()?;
            return Ok(SqlExpr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_function_args(&mut self) -> QueryResult<Vec<SqlExpr>> {
        if *self.current_token() == Token::RightParen {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        loop {
            if *self.current_token() == Token::Star {
                self.advance();
                args.push(SqlExpr::Column("*".to_string()));
            } else {
                args.push(self.parse_expression()?);
            }

            // CAST(expr AS type)
            if *self.current_token() == Token::As {
                self.advance();
                args.push(SqlExpr::Column(self.expect_identifier()?));
            }

            if *self.current_token() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary_expression(&mut self) -> QueryResult<SqlExpr> {
        match self.current_token().clone() {
            Token::Integer(n) => {
                self.advance();
                Ok(SqlExpr::Integer(n))
            }
            Token::Float(n) => {
                self.advance();
                Ok(SqlExpr::Float(n))
            }
            Token::Minus => {
                self.advance();
                match self.current_token().clone() {
                    Token::Integer(n) => {
                        self.advance();
                        Ok(SqlExpr::Integer(-n))
                    }
                    Token::Float(n) => {
                        self.advance();
                        Ok(SqlExpr::Float(-n))
                    }
                    _ => Err(self.error("Expected number after '-'")),
                }
            }
            Token::String(s) => {
                self.advance();
                Ok(SqlExpr::String(s))
            }
            Token::True => {
                self.advance();
                Ok(SqlExpr::Boolean(true))
            }
            Token::False => {
                self.advance();
                Ok(SqlExpr::Boolean(false))
            }
            Token::Null => {
                self.advance();
                Ok(SqlExpr::Null)
            }
            Token::Placeholder => {
                self.advance();
                let index = self.placeholders;
                self.placeholders += 1;
                Ok(SqlExpr::Placeholder(index))
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                self.advance();

                // Check for function call
                if *self.current_token() == Token::LeftParen {
                    self.advance();
                    let args = self.parse_function_args()?;
                    self.expect(Token::RightParen)?;
                    return Ok(SqlExpr::Function { name, args });
                }

                // Check for qualified column (holder.column)
                if *self.current_token() == Token::Dot {
                    self.advance();
                    let column = self.expect_identifier()?;
                    return Ok(SqlExpr::QualifiedColumn {
                        table: name,
                        column,
                    });
                }

                Ok(SqlExpr::Column(name))
            }
            _ => Err(self.error("Unexpected token in expression")),
        }
    }
}
