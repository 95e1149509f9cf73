//! Statement tree produced by the parser.
//!
//! Expressions are not expanded into trees here; each one stays a
//! borrowed slice of the token tree and is interpreted by the compiler
//! when the surrounding statement is compiled.

use crate::lexer::Token;

pub type Block<'t> = Vec<Statement<'t>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'t> {
    VariableDeclaration {
        name: &'t Token,
        value: &'t [Token],
        constant: bool,
    },
    FunctionDeclaration {
        name: &'t Token,
        parameters: Vec<&'t Token>,
        body: Block<'t>,
    },
    Do {
        body: Block<'t>,
    },
    Loop {
        body: Block<'t>,
    },
    While {
        keyword: &'t Token,
        condition: &'t [Token],
        body: Block<'t>,
    },
    ForClassic {
        init: Box<Statement<'t>>,
        condition: &'t [Token],
        iterator: Box<Statement<'t>>,
        body: Block<'t>,
    },
    /// `for (value in expr)` / `for (index, value in expr)`; parsed but
    /// not compiled.
    ForIterator {
        keyword: &'t Token,
        index: Option<&'t Token>,
        value: &'t Token,
        iterable: &'t [Token],
        body: Block<'t>,
    },
    Break(&'t Token),
    Continue(&'t Token),
    Return {
        keyword: &'t Token,
        value: &'t [Token],
    },
    If {
        condition: &'t [Token],
        body: Block<'t>,
        else_body: Option<Block<'t>>,
    },
    Class(&'t Token),
    Import(&'t Token),
    Expression(&'t [Token]),
}

impl<'t> Statement<'t> {
    /// Attach an else-branch to the innermost `if` of an `if`/`else if`
    /// chain whose else slot is still empty.
    ///
    /// Returns the branch back when there is no free slot.
    pub fn attach_else(&mut self, branch: Block<'t>) -> Result<(), Block<'t>> {
        let Statement::If { else_body, .. } = self else {
            return Err(branch);
        };
        if else_body.is_none() {
            *else_body = Some(branch);
            return Ok(());
        }
        match else_body.as_mut().map(Vec::as_mut_slice) {
            Some([nested @ Statement::If { .. }]) => nested.attach_else(branch),
            _ => Err(branch),
        }
    }

    pub fn is_if(&self) -> bool {
        matches!(self, Statement::If { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_else_to_innermost_open_if() {
        let mut statement = Statement::If {
            condition: &[],
            body: Vec::new(),
            else_body: Some(vec![Statement::If {
                condition: &[],
                body: Vec::new(),
                else_body: None,
            }]),
        };
        statement
            .attach_else(vec![Statement::Do { body: Vec::new() }])
            .expect("free else slot");

        let Statement::If {
            else_body: Some(chain),
            ..
        } = &statement
        else {
            panic!("unexpected variant");
        };
        assert!(matches!(
            &chain[0],
            Statement::If {
                else_body: Some(_),
                ..
            }
        ));
        assert!(statement.attach_else(Vec::new()).is_err());
    }

    #[test]
    fn refuses_else_on_non_if() {
        let mut statement = Statement::Do { body: Vec::new() };
        assert!(statement.attach_else(Vec::new()).is_err());
    }
}
