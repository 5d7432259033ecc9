//! SQL-subset front end: `SELECT`, standalone criteria and `REGISTER TYPE`.

pub mod lexer;
pub mod parser;

pub use lexer::{SqlLexer, Token};
pub use parser::{
    parse_criteria, parse_select, parse_statement, BinaryOp, FromSource, RegisterTypeStatement,
    SelectColumn, SelectStatement, SqlExpr, SqlParser, SqlStatement,
};
