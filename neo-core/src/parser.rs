//! Recursive-descent statement parser.
//!
//! The parser walks a grouped token slice and produces [`Statement`]s.
//! Expressions are kept as sub-slices of the input; block bodies are
//! parsed by a fresh [`Parser`] over the children of their brace group,
//! which borrows the same token tree as its parent.

use crate::ast::{Block, Statement};
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::lexer::{Delimiter, Token, TokenKind, split_tokens};
use crate::span::Span;

pub fn parse(tokens: &[Token]) -> Result<Vec<Statement<'_>>, CoreError> {
    Parser::new(tokens).parse()
}

pub struct Parser<'t> {
    tokens: &'t [Token],
    index: usize,
    statements: Vec<Statement<'t>>,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Parser {
            tokens,
            index: 0,
            statements: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Vec<Statement<'t>>, CoreError> {
        while let Some(token) = self.peek() {
            if token.is_separator() {
                self.index += 1;
                continue;
            }
            self.parse_statement(token)?;
        }
        Ok(self.statements)
    }

    fn parse_statement(&mut self, token: &'t Token) -> Result<(), CoreError> {
        if token.kind == TokenKind::Keyword {
            match token.value.as_str() {
                "let" => return self.parse_variable_declaration(false),
                "const" => return self.parse_variable_declaration(true),
                "fn" => return self.parse_function_declaration(),
                "do" => return self.parse_do(),
                "loop" => return self.parse_loop(),
                "while" => return self.parse_while(),
                "for" => return self.parse_for(),
                "if" => return self.parse_if(),
                "else" => return self.parse_else(),
                "break" | "continue" => return self.parse_jump(),
                "return" => return self.parse_return(),
                "class" => return self.parse_class(),
                "import" => return self.parse_import(),
                _ => {}
            }
        }

        if self.line_declares()? {
            return self.parse_bare_declaration();
        }

        let expression = self.accumulate();
        self.statements.push(Statement::Expression(expression));
        Ok(())
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.index)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.index + offset)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.peek();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    /// Greedily collect tokens up to the next separator or end of input.
    /// The separator itself is consumed but not returned.
    fn accumulate(&mut self) -> &'t [Token] {
        let start = self.index;
        while let Some(token) = self.peek() {
            if token.is_separator() {
                break;
            }
            self.index += 1;
        }
        let slice = &self.tokens[start..self.index];
        if self.peek().is_some() {
            self.index += 1;
        }
        slice
    }

    /// Tokens from the cursor up to (not including) the next separator.
    fn rest_of_line(&self) -> &'t [Token] {
        let rest = &self.tokens[self.index..];
        let end = rest
            .iter()
            .position(Token::is_separator)
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn at_end_of_statement(&self) -> bool {
        self.peek().is_none_or(Token::is_separator)
    }

    fn skip_separator(&mut self) {
        if self.peek().is_some_and(Token::is_separator) {
            self.index += 1;
        }
    }

    fn expect_identifier(&mut self, after: &'t Token) -> Result<&'t Token, CoreError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => {
                self.index += 1;
                Ok(token)
            }
            Some(token) if !token.is_separator() => Err(error(
                format!("Expected an identifier, found '{}'", token.describe()),
                token.span,
            )),
            _ => Err(error("Expected an identifier", end_of(after))),
        }
    }

    fn expect_group(
        &mut self,
        delimiter: Delimiter,
        after: &'t Token,
    ) -> Result<&'t Token, CoreError> {
        match self.peek() {
            Some(token) if token.is_group(delimiter) => {
                self.index += 1;
                Ok(token)
            }
            Some(token) if !token.is_separator() => Err(error(
                format!(
                    "Expected '{}', found '{}'",
                    delimiter.open(),
                    token.describe()
                ),
                token.span,
            )),
            _ => Err(error(
                format!("Expected '{}'", delimiter.open()),
                end_of(after),
            )),
        }
    }

    fn parse_variable_declaration(&mut self, constant: bool) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let name = self.expect_identifier(keyword)?;

        let value = match self.peek() {
            Some(token) if token.kind == TokenKind::SetOperator && token.value == "=" => {
                self.index += 1;
                let value = self.accumulate();
                if value.is_empty() {
                    return Err(error("Expected an expression after '='", end_of(token)));
                }
                value
            }
            Some(token) if !token.is_separator() => {
                return Err(error(
                    format!("Expected '=' after '{}'", name.value),
                    token.span,
                ));
            }
            _ => {
                if constant {
                    return Err(error(
                        format!("Constant '{}' must be initialized", name.value),
                        name.span,
                    ));
                }
                self.skip_separator();
                &[]
            }
        };

        self.statements.push(Statement::VariableDeclaration {
            name,
            value,
            constant,
        });
        Ok(())
    }

    /// Look ahead on the current line for a `:=` declaration.
    fn line_declares(&self) -> Result<bool, CoreError> {
        let line = self.rest_of_line();
        let Some(position) = line
            .iter()
            .position(|token| token.kind == TokenKind::SetOperator && token.value == ":=")
        else {
            return Ok(false);
        };
        if position == 1 && line[0].kind == TokenKind::Identifier {
            return Ok(true);
        }
        Err(error(
            "Invalid declaration, expected 'name := value'",
            line[position].span,
        ))
    }

    fn parse_bare_declaration(&mut self) -> Result<(), CoreError> {
        let (Some(name), Some(operator)) = (self.advance(), self.advance()) else {
            return Ok(());
        };
        let value = self.accumulate();
        if value.is_empty() {
            return Err(error("Expected an expression after ':='", end_of(operator)));
        }
        self.statements.push(Statement::VariableDeclaration {
            name,
            value,
            constant: false,
        });
        Ok(())
    }

    fn parse_function_declaration(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let name = self.expect_identifier(keyword)?;
        let arguments = self.expect_group(Delimiter::Paren, name)?;

        let mut parameters: Vec<&'t Token> = Vec::new();
        for piece in split_tokens(&arguments.children, |token| token.is_symbol(",")) {
            let parameter = match piece {
                [parameter] if parameter.kind == TokenKind::Identifier => parameter,
                [first, ..] => return Err(error("Invalid parameter", first.span)),
                [] => return Err(error("Expected a parameter name", arguments.span)),
            };
            if parameters.iter().any(|p| p.value == parameter.value) {
                return Err(error(
                    format!("Duplicate parameter '{}'", parameter.value),
                    parameter.span,
                ));
            }
            parameters.push(parameter);
        }

        let body = self.expect_group(Delimiter::Brace, arguments)?;
        let body = parse_block(body)?;
        self.statements.push(Statement::FunctionDeclaration {
            name,
            parameters,
            body,
        });
        Ok(())
    }

    fn parse_do(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let body = parse_block(self.expect_group(Delimiter::Brace, keyword)?)?;
        self.statements.push(Statement::Do { body });
        Ok(())
    }

    fn parse_loop(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let body = parse_block(self.expect_group(Delimiter::Brace, keyword)?)?;
        self.statements.push(Statement::Loop { body });
        Ok(())
    }

    /// Split the rest of the line into a condition and the brace group
    /// that follows it.
    fn take_condition(&mut self, keyword: &'t Token) -> Result<(&'t [Token], &'t Token), CoreError> {
        let line = self.rest_of_line();
        let Some(position) = line
            .iter()
            .position(|token| token.is_group(Delimiter::Brace))
        else {
            return Err(error(
                format!("Expected '{{' after '{}' condition", keyword.value),
                line.last().map(|t| end_of(t)).unwrap_or_else(|| end_of(keyword)),
            ));
        };
        if position == 0 {
            return Err(error("Expected a condition", line[0].span));
        }
        self.index += position + 1;
        Ok((&line[..position], &line[position]))
    }

    fn parse_while(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let (condition, body) = self.take_condition(keyword)?;
        let body = parse_block(body)?;
        self.statements.push(Statement::While {
            keyword,
            condition,
            body,
        });
        Ok(())
    }

    fn parse_if(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };

        let line = self.rest_of_line();
        let then_part = line
            .iter()
            .position(|token| token.is_keyword("else"))
            .map_or(line, |end| &line[..end]);
        let has_block = then_part.iter().any(|token| token.is_group(Delimiter::Brace));
        let (condition, body) = match line.first() {
            Some(group) if !has_block && group.is_group(Delimiter::Paren) => {
                self.index += 1;
                let body = self.parse_inline_body(group)?;
                (&line[..1], body)
            }
            _ => {
                let (condition, body) = self.take_condition(keyword)?;
                (condition, parse_block(body)?)
            }
        };

        self.statements.push(Statement::If {
            condition,
            body,
            else_body: None,
        });
        Ok(())
    }

    /// A brace-less body: the rest of the line, up to an `else` on the
    /// same line, parsed as one block.
    fn parse_inline_body(&mut self, after: &'t Token) -> Result<Block<'t>, CoreError> {
        let start = self.index;
        while let Some(token) = self.peek() {
            if token.is_separator() || token.is_keyword("else") {
                break;
            }
            self.index += 1;
        }
        let line = &self.tokens[start..self.index];
        self.skip_separator();
        if line.is_empty() {
            return Err(error("Expected a body", end_of(after)));
        }
        Parser::new(line).parse()
    }

    fn parse_else(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        if !self.statements.last().is_some_and(Statement::is_if) {
            return Err(error("Unexpected 'else'", keyword.span));
        }

        let branch = match self.peek() {
            Some(token) if token.is_group(Delimiter::Brace) => {
                self.index += 1;
                parse_block(token)?
            }
            Some(token) if token.is_keyword("if") => {
                self.parse_if()?;
                match self.statements.pop() {
                    Some(nested) => vec![nested],
                    None => Vec::new(),
                }
            }
            _ => self.parse_inline_body(keyword)?,
        };

        let attached = match self.statements.last_mut() {
            Some(statement) => statement.attach_else(branch).is_ok(),
            None => false,
        };
        if !attached {
            return Err(error("Unexpected 'else'", keyword.span));
        }
        Ok(())
    }

    fn parse_for(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let head = self.expect_group(Delimiter::Paren, keyword)?;
        let body = parse_block(self.expect_group(Delimiter::Brace, head)?)?;

        let header = &head.children;
        let semicolons: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, token)| token.kind == TokenKind::Eoe)
            .map(|(index, _)| index)
            .collect();

        if semicolons.is_empty() {
            let statement = parse_for_iterator(keyword, head, body)?;
            self.statements.push(statement);
            return Ok(());
        }

        let [first, second] = semicolons[..] else {
            return Err(error(
                "A for loop needs exactly three ';'-separated parts",
                head.span,
            ));
        };
        let init = parse_single_statement(&header[..first], head, "initializer")?;
        let condition = &header[first + 1..second];
        let iterator = parse_single_statement(&header[second + 1..], head, "iterator")?;

        self.statements.push(Statement::ForClassic {
            init: Box::new(init),
            condition,
            iterator: Box::new(iterator),
            body,
        });
        Ok(())
    }

    fn parse_jump(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        if let Some(token) = self.peek().filter(|t| !t.is_separator()) {
            return Err(error(
                format!("Unexpected token '{}' after '{}'", token.describe(), keyword.value),
                token.span,
            ));
        }
        self.skip_separator();
        let statement = if keyword.value == "break" {
            Statement::Break(keyword)
        } else {
            Statement::Continue(keyword)
        };
        self.statements.push(statement);
        Ok(())
    }

    fn parse_return(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        let value = if self.at_end_of_statement() {
            self.skip_separator();
            &[]
        } else {
            self.accumulate()
        };
        self.statements.push(Statement::Return { keyword, value });
        Ok(())
    }

    fn parse_class(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        self.accumulate();
        self.statements.push(Statement::Class(keyword));
        Ok(())
    }

    fn parse_import(&mut self) -> Result<(), CoreError> {
        let Some(keyword) = self.advance() else {
            return Ok(());
        };
        self.accumulate();
        self.statements.push(Statement::Import(keyword));
        Ok(())
    }
}

/// Parse the children of a brace group with a nested parser.
fn parse_block(group: &Token) -> Result<Block<'_>, CoreError> {
    Parser::new(&group.children).parse()
}

fn parse_single_statement<'t>(
    tokens: &'t [Token],
    head: &'t Token,
    part: &str,
) -> Result<Statement<'t>, CoreError> {
    let mut statements = Parser::new(tokens).parse()?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        _ => {
            let span = match (tokens.first(), tokens.last()) {
                (Some(first), Some(last)) => first.span.join(last.span),
                _ => head.span,
            };
            Err(error(
                format!("The for loop {part} must be exactly one statement"),
                span,
            ))
        }
    }
}

fn parse_for_iterator<'t>(
    keyword: &'t Token,
    head: &'t Token,
    body: Block<'t>,
) -> Result<Statement<'t>, CoreError> {
    let header = &head.children;
    let invalid = || error("Invalid for loop header", head.span);

    let position = header
        .iter()
        .position(|token| token.is_keyword("in"))
        .ok_or_else(invalid)?;
    let iterable = &header[position + 1..];
    if iterable.is_empty() {
        return Err(invalid());
    }

    let names = split_tokens(&header[..position], |token| token.is_symbol(","));
    let mut identifiers = Vec::with_capacity(names.len());
    for name in names {
        match name {
            [name] if name.kind == TokenKind::Identifier => identifiers.push(name),
            _ => return Err(invalid()),
        }
    }
    let (index, value) = match identifiers[..] {
        [value] => (None, value),
        [index, value] => (Some(index), value),
        _ => return Err(invalid()),
    };

    Ok(Statement::ForIterator {
        keyword,
        index,
        value,
        iterable,
        body,
    })
}

fn end_of(token: &Token) -> Span {
    Span::new(token.span.end, token.span.end)
}

fn error(message: impl Into<String>, span: Span) -> CoreError {
    CoreError::ParseError(Diagnostic::syntax(message, span).with_code("E0103"))
}
