//! Path selector parser.
//!
//! ```text
//! Selector := ['/'] Step ('/' Step)*
//! Step     := Identifier ['[' Criteria ']']
//! ```
//!
//! A bracket block filters the elements found under the step it follows, so it
//! is stored on the *next* step with `holder` naming the step it was written on.
//! The chain always ends with an anonymous step marking the leaf.

use crate::error::{QueryError, QueryResult};
use crate::sql::{parse_criteria, SqlExpr};

/// Filter attached to a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    /// Source text between the brackets.
    pub text: String,
    pub expr: SqlExpr,
}

/// One segment of a selector chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// Field to descend into; empty at the leaf sentinel.
    pub name: String,
    pub criteria: Option<Criteria>,
    /// Name the criteria uses to qualify fields (the parent step's name).
    pub holder: String,
    pub child: Option<Box<Step>>,
}

impl Step {
    pub fn is_leaf(&self) -> bool {
        self.name.is_empty()
    }

    pub fn child(&self) -> Option<&Step> {
        self.child.as_deref()
    }

    /// Iterates the chain starting at this step.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        std::iter::successors(Some(self), |step| step.child())
    }

    /// Name of the last named step, if any.
    pub fn last_name(&self) -> Option<&str> {
        self.iter()
            .filter(|step| !step.is_leaf())
            .last()
            .map(|step| step.name.as_str())
    }
}

struct Segment {
    name: String,
    criteria: Option<Criteria>,
}

struct SelectorScanner<'a> {
    chars: Vec<char>,
    position: usize,
    /// Offset of `source` within the enclosing statement.
    base: usize,
    source: &'a str,
}

impl<'a> SelectorScanner<'a> {
    fn new(source: &'a str, base: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            base,
            source,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn at_end(&self) -> bool {
        self.position >= self.chars.len()
    }

    fn error(&self, message: &str, at: usize) -> QueryError {
        let fragment: String = self.chars[at.min(self.chars.len())..]
            .iter()
            .take(16)
            .collect();
        let fragment = if fragment.is_empty() {
            self.source.to_string()
        } else {
            fragment
        };
        QueryError::parse_at(message, &fragment, self.base + at)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(ch) if ch.is_whitespace()) {
            self.position += 1;
        }
    }

    fn skip_backticks(&mut self) {
        while self.current() == Some('`') {
            self.position += 1;
        }
    }

    fn read_identifier(&mut self) -> QueryResult<String> {
        let start = self.position;
        while matches!(self.current(), Some(ch) if ch.is_alphanumeric() || ch == '_') {
            self.position += 1;
        }
        if self.position == start {
            return Err(self.error("expected identifier", start));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    /// Reads a `[...]` block; returns its inner text and the inner start position.
    fn read_block(&mut self) -> QueryResult<(String, usize)> {
        let open = self.position;
        self.position += 1;
        let start = self.position;
        let mut depth = 1;
        let mut quote: Option<char> = None;

        while let Some(ch) = self.current() {
            match ch {
                '\\' => {
                    self.position += 2;
                    continue;
                }
                '\'' | '"' if quote.is_none() => quote = Some(ch),
                ch if quote == Some(ch) => quote = None,
                '[' if quote.is_none() => depth += 1,
                ']' if quote.is_none() => {
                    depth -= 1;
                    if depth == 0 {
                        let text = self.chars[start..self.position].iter().collect();
                        self.position += 1;
                        return Ok((text, start));
                    }
                }
                _ => {}
            }
            self.position += 1;
        }

        Err(self.error("unmatched '['", open))
    }

    fn scan(&mut self) -> QueryResult<Vec<Segment>> {
        let mut segments = Vec::new();

        self.skip_whitespace();
        self.skip_backticks();
        self.skip_whitespace();
        if self.current() == Some('/') {
            self.position += 1;
        }

        loop {
            self.skip_whitespace();
            if self.at_end() || self.current() == Some('`') {
                break;
            }

            let name = self.read_identifier()?;
            self.skip_whitespace();

            let criteria = if self.current() == Some('[') {
                let (text, offset) = self.read_block()?;
                let expr = parse_criteria(&text, self.base + offset)?;
                Some(Criteria { text, expr })
            } else {
                None
            };
            segments.push(Segment { name, criteria });

            self.skip_whitespace();
            match self.current() {
                Some('/') => {
                    self.position += 1;
                    self.skip_whitespace();
                    if self.current() == Some('/') {
                        return Err(self.error("expected identifier", self.position));
                    }
                }
                None | Some('`') => break,
                Some(_) => return Err(self.error("unexpected input", self.position)),
            }
        }

        self.skip_backticks();
        self.skip_whitespace();
        if !self.at_end() {
            return Err(self.error("unexpected input", self.position));
        }

        Ok(segments)
    }
}

/// Parses a selector path into a step chain.
pub fn parse_selector(expr: &str) -> QueryResult<Step> {
    parse_selector_at(expr, 0)
}

/// Like [`parse_selector`], with error positions shifted by `base` characters.
pub fn parse_selector_at(expr: &str, base: usize) -> QueryResult<Step> {
    let segments = SelectorScanner::new(expr, base).scan()?;

    let mut step = Step::default();
    let mut pending: Option<(Criteria, String)> = None;
    let mut named = Vec::with_capacity(segments.len());

    for segment in segments {
        let (criteria, holder) = match pending.take() {
            Some((criteria, holder)) => (Some(criteria), holder),
            None => (None, String::new()),
        };
        if let Some(next) = segment.criteria {
            pending = Some((next, segment.name.clone()));
        }
        named.push(Step {
            name: segment.name,
            criteria,
            holder,
            child: None,
        });
    }

    if let Some((criteria, holder)) = pending {
        step.criteria = Some(criteria);
        step.holder = holder;
    }

    // Link back to front
    for mut parent in named.into_iter().rev() {
        parent.child = Some(Box::new(step));
        step = parent;
    }

    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::BinaryOp;

    fn names(step: &Step) -> Vec<&str> {
        step.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_basic_selector() {
        let step = parse_selector("/Records").unwrap();
        assert_eq!(names(&step), vec!["Records", ""]);
        assert!(step.criteria.is_none());
        assert!(step.child().unwrap().child().is_none());
    }

    #[test]
    fn test_relative_selector() {
        assert_eq!(
            parse_selector("Records").unwrap(),
            parse_selector("/Records").unwrap()
        );
        assert_eq!(
            names(&parse_selector("Root/Records").unwrap()),
            vec!["Root", "Records", ""]
        );
    }

    #[test]
    fn test_backticks_stripped() {
        assert_eq!(
            parse_selector("`/Vendors/Products`").unwrap(),
            parse_selector("/Vendors/Products").unwrap()
        );
    }

    #[test]
    fn test_root_scan() {
        for expr in ["/", "", "``"] {
            let step = parse_selector(expr).unwrap();
            assert!(step.is_leaf());
            assert!(step.child.is_none());
        }
    }

    #[test]
    fn test_criteria_attached_to_child() {
        let step = parse_selector("Items[Active=true]/Nodes").unwrap();
        assert_eq!(names(&step), vec!["Items", "Nodes", ""]);
        assert!(step.criteria.is_none());

        let nodes = step.child().unwrap();
        let criteria = nodes.criteria.as_ref().unwrap();
        assert_eq!(criteria.text, "Active=true");
        assert_eq!(nodes.holder, "Items");
        assert_eq!(
            criteria.expr,
            SqlExpr::BinaryOp {
                left: Box::new(SqlExpr::Column("Active".to_string())),
                op: BinaryOp::Eq,
                right: Box::new(SqlExpr::Boolean(true)),
            }
        );
        assert!(nodes.child().unwrap().criteria.is_none());
    }

    #[test]
    fn test_trailing_criteria_on_leaf() {
        let step = parse_selector("/Records[ID > 1]").unwrap();
        let leaf = step.child().unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.holder, "Records");
        assert_eq!(leaf.criteria.as_ref().unwrap().text, "ID > 1");
    }

    #[test]
    fn test_nested_brackets_and_quotes() {
        let step = parse_selector("/Records[Name = 'a]b' AND ID IN (1, 2)]").unwrap();
        let leaf = step.child().unwrap();
        assert_eq!(
            leaf.criteria.as_ref().unwrap().text,
            "Name = 'a]b' AND ID IN (1, 2)"
        );
    }

    #[test]
    fn test_same_text_same_chain() {
        let text = "/Vendors[Revenue > 1]/Products[Status = 1]";
        assert_eq!(parse_selector(text).unwrap(), parse_selector(text).unwrap());
    }

    #[test]
    fn test_last_name() {
        assert_eq!(parse_selector("/A/B").unwrap().last_name(), Some("B"));
        assert_eq!(parse_selector("/").unwrap().last_name(), None);
    }

    #[test]
    fn test_errors() {
        let err = parse_selector("/Records[Active = true").unwrap_err();
        assert!(err.to_string().contains("unmatched '['"), "{}", err);
        assert!(err.to_string().contains("position 8"), "{}", err);

        assert!(parse_selector("//Records").is_err());
        assert!(parse_selector("/A//B").is_err());
        assert!(parse_selector("/[x]").is_err());
        assert!(parse_selector("/Records]").is_err());
        assert!(parse_selector("/Records[Active = ]").is_err());
    }

    #[test]
    fn test_criteria_error_position_is_absolute() {
        let err = parse_selector("/Records[Active # 1]").unwrap_err();
        assert!(err.to_string().contains("position 16"), "{}", err);

        let err = parse_selector_at("/Records[Active # 1]", 15).unwrap_err();
        assert!(err.to_string().contains("position 31"), "{}", err);
        let err = parse_selector_at("/Records[Active = true", 15).unwrap_err();
        assert!(err.to_string().contains("position 23"), "{}", err);
    }
}
