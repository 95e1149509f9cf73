//! Expression evaluation.
//!
//! Expressions arrive as raw token slices. A slice is first separated
//! into alternating operand chains and operator tokens; every operand is
//! then compiled left to right and the results are combined with a
//! shunting-yard pass over [`crate::operators`]. Each step emits C into
//! the current function body and reports where its result lives.

use crate::builtins::find_builtin;
use crate::codegen_c::c_string_literal;
use crate::compiler::Compiler;
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::lexer::{Delimiter, Token, TokenKind, split_tokens, trim_separators};
use crate::operators::{self, BinaryOperator, Lowering};
use crate::runtime;
use crate::scope::VariableBinding;
use crate::span::Span;

/// Where the value of a compiled expression lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileTimeValue {
    /// Owned temporary that must be released or moved exactly once.
    Temp(String),
    /// Borrowed binding or runtime global; never released by the user.
    Variable(String),
    /// Identifier with no binding yet, only valid as a call target.
    Unresolved,
    Null,
}

impl CompileTimeValue {
    /// C expression for the value.
    pub fn pointer(&self) -> &str {
        match self {
            CompileTimeValue::Temp(name) | CompileTimeValue::Variable(name) => name,
            CompileTimeValue::Unresolved | CompileTimeValue::Null => "NULL",
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, CompileTimeValue::Temp(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element<'t> {
    Operand(&'t [Token]),
    Operator(&'t Token),
}

enum Callee<'a> {
    Value(&'a str),
    Method { object: &'a str, name: &'a str },
    Forward(usize),
}

enum PropertyKey<'t> {
    Name(&'t Token),
    Index(&'t Token),
}

struct Arguments {
    values: Vec<CompileTimeValue>,
    /// `<array>, <count>` or `NULL, 0`.
    positional: String,
    keywords: String,
    map: Option<String>,
    /// Values the keyword map took a reference to.
    mapped: Vec<String>,
}

/// Split an expression into operand chains and the binary or set
/// operators between them. Prefix operators stay with their operand.
fn separate(tokens: &[Token]) -> Result<Vec<Element<'_>>, CoreError> {
    let mut elements = Vec::new();
    let mut start = 0;
    let mut in_operand = false;

    for (index, token) in tokens.iter().enumerate() {
        let infix = matches!(token.kind, TokenKind::Operator | TokenKind::SetOperator);
        if !in_operand {
            let prefix = token.kind == TokenKind::IncOperator
                || (token.kind == TokenKind::Operator && operators::is_unary(&token.value));
            if prefix {
                continue;
            }
            if infix {
                return Err(syntax(
                    format!("Expected an expression, found operator '{}'", token.value),
                    token.span,
                    "E0101",
                ));
            }
            in_operand = true;
            continue;
        }
        if infix {
            elements.push(Element::Operand(&tokens[start..index]));
            elements.push(Element::Operator(token));
            start = index + 1;
            in_operand = false;
        }
    }

    if !in_operand {
        if let Some(last) = tokens.last() {
            return Err(syntax(
                format!("Expected an expression after '{}'", last.value),
                last.span,
                "E0101",
            ));
        }
    }
    elements.push(Element::Operand(&tokens[start..]));
    Ok(elements)
}

impl Compiler {
    pub(crate) fn execute_expression(
        &mut self,
        tokens: &[Token],
        anchor: Span,
    ) -> Result<CompileTimeValue, CoreError> {
        if tokens.is_empty() {
            return Err(syntax("Expected an expression", anchor, "E0101"));
        }
        let elements = separate(tokens)?;
        self.execute_separated(&elements)
    }

    fn execute_separated(&mut self, elements: &[Element<'_>]) -> Result<CompileTimeValue, CoreError> {
        if let [Element::Operand(target), Element::Operator(op), rest @ ..] = elements {
            if op.kind == TokenKind::SetOperator {
                return self.assign(target, op, rest);
            }
        }

        let mut operands = Vec::new();
        let mut binary = Vec::new();
        for element in elements {
            match element {
                Element::Operand(tokens) => operands.push(self.execute_single_expression(tokens)?),
                Element::Operator(op) if op.kind == TokenKind::SetOperator => {
                    return Err(syntax("Invalid assignment target", op.span, "E0203"));
                }
                Element::Operator(op) => {
                    let operator = operators::find_binary(&op.value).ok_or_else(|| {
                        syntax(
                            format!("'{}' is not a binary operator", op.value),
                            op.span,
                            "E0101",
                        )
                    })?;
                    binary.push(operator);
                }
            }
        }

        let mut operands = operands.into_iter();
        let Some(first) = operands.next() else {
            return Ok(CompileTimeValue::Null);
        };
        let mut values = vec![first];
        let mut stack: Vec<&'static BinaryOperator> = Vec::new();
        for (operator, operand) in binary.into_iter().zip(operands) {
            while let Some(top) = stack.last().copied() {
                if !top.reduces_before(operator) {
                    break;
                }
                stack.pop();
                self.reduce(&mut values, top);
            }
            stack.push(operator);
            values.push(operand);
        }
        while let Some(top) = stack.pop() {
            self.reduce(&mut values, top);
        }
        Ok(values.pop().unwrap_or(CompileTimeValue::Null))
    }

    fn reduce(&mut self, values: &mut Vec<CompileTimeValue>, operator: &BinaryOperator) {
        if let (Some(right), Some(left)) = (values.pop(), values.pop()) {
            let result = self.binary(operator, left, right);
            values.push(result);
        }
    }

    fn binary(
        &mut self,
        operator: &BinaryOperator,
        left: CompileTimeValue,
        right: CompileTimeValue,
    ) -> CompileTimeValue {
        let init = match operator.runtime_call() {
            Some(call) => format!("{}({}, {})", call, left.pointer(), right.pointer()),
            None => {
                let joiner = if operator.lowering == Lowering::And { "&&" } else { "||" };
                format!(
                    "({truthy}({}) {joiner} {truthy}({})) ? {} : {}",
                    left.pointer(),
                    right.pointer(),
                    runtime::TRUE,
                    runtime::FALSE,
                    truthy = runtime::TRUTHY,
                )
            }
        };
        let result = self.declare_temp(init);
        self.release(&left);
        self.release(&right);
        result
    }

    // -----------------------------------------------------------------
    // Operand chains
    // -----------------------------------------------------------------

    fn execute_single_expression(&mut self, tokens: &[Token]) -> Result<CompileTimeValue, CoreError> {
        let Some((first, rest)) = tokens.split_first() else {
            return Ok(CompileTimeValue::Null);
        };

        if first.kind == TokenKind::Operator && operators::is_unary(&first.value) {
            if rest.is_empty() {
                return Err(syntax(
                    format!("Expected an expression after '{}'", first.value),
                    first.span,
                    "E0101",
                ));
            }
            let value = self.execute_single_expression(rest)?;
            let Some(call) = operators::unary_call(&first.value) else {
                return Ok(value);
            };
            let result = self.declare_temp(format!("{}({})", call, value.pointer()));
            self.release(&value);
            return Ok(result);
        }
        if first.kind == TokenKind::IncOperator {
            return self.increment(rest, first);
        }
        if let [chain @ .., last] = tokens {
            if last.kind == TokenKind::IncOperator {
                return self.increment(chain, last);
            }
        }

        let mut value = self.execute_token(first)?;
        let mut index = 1;
        if value == CompileTimeValue::Unresolved {
            match rest.first() {
                Some(arguments) if arguments.is_group(Delimiter::Paren) => {
                    let slot = self.record_forward_reference(first);
                    value = self.call(Callee::Forward(slot), arguments)?;
                    index = 2;
                }
                _ => {
                    return Err(CoreError::SemanticError(
                        Diagnostic::name(format!("'{}' is not defined", first.value), first.span)
                            .with_code("E0201"),
                    ));
                }
            }
        }

        while let Some(token) = tokens.get(index) {
            let (result, consumed) = if token.is_symbol(".") {
                let Some(name) = tokens
                    .get(index + 1)
                    .filter(|name| name.kind == TokenKind::Identifier)
                else {
                    return Err(syntax("Expected a property name after '.'", token.span, "E0101"));
                };
                match tokens.get(index + 2).filter(|t| t.is_group(Delimiter::Paren)) {
                    Some(arguments) => {
                        let callee = Callee::Method {
                            object: value.pointer(),
                            name: &name.value,
                        };
                        (self.call(callee, arguments)?, 3)
                    }
                    None => {
                        let get = format!(
                            "{}({}, \"{}\")",
                            runtime::GET_PROPERTY,
                            value.pointer(),
                            name.value
                        );
                        (self.declare_temp(get), 2)
                    }
                }
            } else if token.is_group(Delimiter::Paren) {
                (self.call(Callee::Value(value.pointer()), token)?, 1)
            } else if token.is_group(Delimiter::Bracket) {
                let key = self.stringify_key(token)?;
                let get = format!("{}({}, {})", runtime::GET_PROPERTY, value.pointer(), key);
                let result = self.declare_temp(get);
                self.emit(format!("free({key});"));
                (result, 1)
            } else {
                return Err(syntax(
                    format!("Unexpected token '{}'", token.describe()),
                    token.span,
                    "E0101",
                ));
            };
            self.release(&value);
            value = result;
            index += consumed;
        }

        Ok(value)
    }

    fn execute_token(&mut self, token: &Token) -> Result<CompileTimeValue, CoreError> {
        match token.kind {
            TokenKind::Number => self.number_literal(token),
            TokenKind::String => Ok(self.declare_temp(format!(
                "{}({})",
                runtime::STRING,
                c_string_literal(&token.value)
            ))),
            TokenKind::Group(Delimiter::Paren) => {
                if token.children.is_empty() {
                    return Err(syntax(
                        "Expected an expression inside parentheses",
                        token.span,
                        "E0101",
                    ));
                }
                self.execute_expression(&token.children, token.span)
            }
            TokenKind::Group(Delimiter::Bracket) => self.array_literal(token),
            TokenKind::Group(Delimiter::Brace) => self.object_literal(token),
            TokenKind::Identifier => self.resolve_identifier(token),
            _ => Err(syntax(
                format!("Unexpected token '{}'", token.describe()),
                token.span,
                "E0101",
            )),
        }
    }

    fn number_literal(&mut self, token: &Token) -> Result<CompileTimeValue, CoreError> {
        let text = token.value.as_str();
        if let Some(digits) = text.strip_suffix('n') {
            let constructor = if digits.contains(['.', 'e']) {
                runtime::BIGFLOAT_STR
            } else {
                runtime::BIGINT_STR
            };
            return Ok(self.declare_temp(format!("{constructor}(\"{digits}\")")));
        }
        if text.contains(['.', 'e']) {
            return Ok(self.declare_temp(format!("{}({})", runtime::DOUBLE, text)));
        }
        match text.parse::<i32>() {
            Ok(value) => Ok(self.declare_temp(format!("{}({})", runtime::INT, value))),
            Err(_) => Err(CoreError::SemanticError(
                Diagnostic::value(
                    "Integer literal out of range, use the 'n' suffix",
                    token.span,
                )
                .with_code("E0209"),
            )),
        }
    }

    fn resolve_identifier(&mut self, token: &Token) -> Result<CompileTimeValue, CoreError> {
        if let Some((index, binding)) = self.lookup(&token.value) {
            self.check_visible(index, &binding, token)?;
            return Ok(CompileTimeValue::Variable(binding.generated));
        }
        if let Some(builtin) = find_builtin(&token.value) {
            return Ok(CompileTimeValue::Variable(builtin.symbol.to_string()));
        }
        Ok(CompileTimeValue::Unresolved)
    }

    fn lookup(&self, name: &str) -> Option<(usize, VariableBinding)> {
        self.scopes
            .resolve(name)
            .map(|(index, binding)| (index, binding.clone()))
    }

    /// Locals of an enclosing function are not reachable from a nested
    /// function body.
    fn check_visible(
        &self,
        index: usize,
        binding: &VariableBinding,
        token: &Token,
    ) -> Result<(), CoreError> {
        if binding.is_global || binding.is_function {
            return Ok(());
        }
        if self.scopes.get(index).function != self.scopes.current().function {
            return Err(syntax("Closures are not supported", token.span, "E0206"));
        }
        Ok(())
    }

    fn array_literal(&mut self, group: &Token) -> Result<CompileTimeValue, CoreError> {
        let array = self.declare_temp(format!("{}()", runtime::ARRAY));
        for element in split_tokens(&group.children, |t| t.is_symbol(",")) {
            if element.is_empty() {
                return Err(syntax("Invalid array value", group.span, "E0101"));
            }
            let value = self.execute_expression(element, group.span)?;
            self.emit(format!(
                "{}({}, {});",
                runtime::ARRAY_PUSH,
                array.pointer(),
                value.pointer()
            ));
            self.release(&value);
        }
        Ok(array)
    }

    fn object_literal(&mut self, group: &Token) -> Result<CompileTimeValue, CoreError> {
        let object = self.declare_temp(format!("{}()", runtime::OBJECT));
        for entry in split_tokens(&group.children, |t| t.is_symbol(",")) {
            let entry = trim_separators(entry);
            if entry.is_empty() {
                continue;
            }
            let Some(colon) = entry.iter().position(|t| t.is_symbol(":")) else {
                return Err(syntax("Invalid key-value pair", span_of(entry), "E0204"));
            };
            let key = trim_separators(&entry[..colon]);
            let value = trim_separators(&entry[colon + 1..]);
            let (key_expr, key_string) = match key {
                [name] if name.kind == TokenKind::Identifier => (format!("\"{}\"", name.value), None),
                [text] if text.kind == TokenKind::String => (c_string_literal(&text.value), None),
                [computed] if computed.is_group(Delimiter::Bracket) => {
                    let key = self.stringify_key(computed)?;
                    (key.clone(), Some(key))
                }
                _ => {
                    let span = if key.is_empty() { entry[colon].span } else { span_of(key) };
                    return Err(syntax("Invalid object key", span, "E0204"));
                }
            };
            let value = self.execute_expression(value, entry[colon].span)?;
            self.emit(format!(
                "{}({}, {}, {});",
                runtime::SET_PROPERTY,
                object.pointer(),
                key_expr,
                value.pointer()
            ));
            if let Some(key) = key_string {
                self.emit(format!("free({key});"));
            }
            self.release(&value);
        }
        Ok(object)
    }

    /// Evaluate a `[key]` group and convert it to a C string that the
    /// caller must `free`.
    fn stringify_key(&mut self, group: &Token) -> Result<String, CoreError> {
        if group.children.is_empty() {
            return Err(syntax("Expected an expression", group.span, "E0101"));
        }
        let key = self.execute_expression(&group.children, group.span)?;
        let name = format!("_neo_str_{}", self.fresh_id());
        self.emit(format!(
            "char *{} = {}({});",
            name,
            runtime::TO_STRING,
            key.pointer()
        ));
        self.release(&key);
        Ok(name)
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    fn call(&mut self, callee: Callee<'_>, group: &Token) -> Result<CompileTimeValue, CoreError> {
        let arguments = self.compile_arguments(group)?;
        let tail = format!("{}, {}", arguments.positional, arguments.keywords);
        let result = format!("_neo_temp_{}", self.fresh_id());

        match callee {
            Callee::Value(function) => self.emit(format!(
                "NeoObject *{} = {}({}, NULL, {});",
                result,
                runtime::CALL,
                function,
                tail
            )),
            Callee::Method { object, name } => self.emit(format!(
                "NeoObject *{} = {}({}, \"{}\", {}, {});",
                result,
                runtime::CALL_PROPERTY,
                object,
                name,
                object,
                tail
            )),
            Callee::Forward(slot) => self.emit_with_slot(
                &format!("NeoObject *{} = {}(", result, runtime::CALL),
                slot,
                &format!(", NULL, {tail});"),
            ),
        }
        self.scopes.track_temp(result.clone());

        if let Some(map) = &arguments.map {
            // The map references its values but does not release them.
            self.emit(format!("{}({});", runtime::FREE_HASHMAP, map));
            for value in &arguments.mapped {
                self.emit(format!("{}({});", runtime::DEREFERENCE, value));
            }
        }
        for value in &arguments.values {
            self.release(value);
        }
        Ok(CompileTimeValue::Temp(result))
    }

    fn compile_arguments(&mut self, group: &Token) -> Result<Arguments, CoreError> {
        let mut positional = Vec::new();
        let mut keywords: Vec<(&str, CompileTimeValue)> = Vec::new();

        for piece in split_tokens(&group.children, |t| t.is_symbol(",")) {
            match piece {
                [] => return Err(syntax("Expected an argument", group.span, "E0101")),
                [key, colon, value @ ..] if key.kind == TokenKind::Identifier && colon.is_symbol(":") => {
                    if keywords.iter().any(|(name, _)| *name == key.value) {
                        return Err(syntax(
                            format!("Duplicate keyword argument '{}'", key.value),
                            key.span,
                            "E0101",
                        ));
                    }
                    let value = self.execute_expression(value, colon.span)?;
                    keywords.push((key.value.as_str(), value));
                }
                _ => positional.push(self.execute_expression(piece, group.span)?),
            }
        }

        let positional_arg = if positional.is_empty() {
            "NULL, 0".to_string()
        } else {
            let name = format!("_neo_args_{}", self.fresh_id());
            let list = positional
                .iter()
                .map(CompileTimeValue::pointer)
                .collect::<Vec<_>>()
                .join(", ");
            self.emit(format!("NeoObject *{name}[] = {{ {list} }};"));
            format!("{}, {}", name, positional.len())
        };

        let map = if keywords.is_empty() {
            None
        } else {
            let name = format!("_neo_kwargs_{}", self.fresh_id());
            self.emit(format!(
                "NeoHashMap *{} = {}({});",
                name,
                runtime::CREATE_HASHMAP,
                (keywords.len() * 4).div_ceil(3)
            ));
            for (key, value) in &keywords {
                self.emit(format!(
                    "{}({}, \"{}\", {});",
                    runtime::HASHMAP_SET,
                    name,
                    key,
                    value.pointer()
                ));
            }
            Some(name)
        };

        let mapped = keywords
            .iter()
            .map(|(_, value)| value.pointer().to_string())
            .collect();
        let mut values = positional;
        values.extend(keywords.into_iter().map(|(_, value)| value));
        Ok(Arguments {
            values,
            positional: positional_arg,
            keywords: map
                .clone()
                .unwrap_or_else(|| runtime::EMPTY_HASHMAP.to_string()),
            map,
            mapped,
        })
    }

    // -----------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------

    fn assign(
        &mut self,
        target: &[Token],
        op: &Token,
        rest: &[Element<'_>],
    ) -> Result<CompileTimeValue, CoreError> {
        if op.value == ":=" {
            return Err(syntax("Cannot use ':=' inside expressions", op.span, "E0103"));
        }
        let compound = operators::compound_operator(&op.value);

        match target {
            [name] if name.kind == TokenKind::Identifier => {
                self.assign_variable(name, compound, rest)
            }
            [chain @ .., dot, name]
                if !chain.is_empty() && dot.is_symbol(".") && name.kind == TokenKind::Identifier =>
            {
                self.assign_property(chain, PropertyKey::Name(name), compound, rest)
            }
            [chain @ .., index] if !chain.is_empty() && index.is_group(Delimiter::Bracket) => {
                self.assign_property(chain, PropertyKey::Index(index), compound, rest)
            }
            _ => Err(syntax("Invalid assignment target", span_of(target), "E0203")),
        }
    }

    fn assign_variable(
        &mut self,
        name: &Token,
        compound: Option<&'static BinaryOperator>,
        rest: &[Element<'_>],
    ) -> Result<CompileTimeValue, CoreError> {
        let variable = self.assignable(name)?;
        let value = match compound {
            None => self.execute_separated(rest)?,
            Some(operator) => {
                let current = CompileTimeValue::Variable(variable.clone());
                let right = self.execute_separated(rest)?;
                self.binary(operator, current, right)
            }
        };

        if let CompileTimeValue::Variable(source) = &value {
            if *source == variable {
                return Ok(value);
            }
        }
        self.emit(format!("{}({});", runtime::REFERENCE, value.pointer()));
        self.emit(format!("{}({});", runtime::DEREFERENCE, variable));
        self.emit(format!("{} = {};", variable, value.pointer()));
        self.release(&value);
        Ok(CompileTimeValue::Variable(variable))
    }

    fn assign_property(
        &mut self,
        chain: &[Token],
        key: PropertyKey<'_>,
        compound: Option<&'static BinaryOperator>,
        rest: &[Element<'_>],
    ) -> Result<CompileTimeValue, CoreError> {
        let object = self.execute_single_expression(chain)?;
        let (key_expr, key_string) = match key {
            PropertyKey::Name(name) => (format!("\"{}\"", name.value), None),
            PropertyKey::Index(group) => {
                let key = self.stringify_key(group)?;
                (key.clone(), Some(key))
            }
        };

        let value = match compound {
            None => self.execute_separated(rest)?,
            Some(operator) => {
                let current = self.declare_temp(format!(
                    "{}({}, {})",
                    runtime::GET_PROPERTY,
                    object.pointer(),
                    key_expr
                ));
                let right = self.execute_separated(rest)?;
                self.binary(operator, current, right)
            }
        };

        self.emit(format!(
            "{}({}, {}, {});",
            runtime::SET_PROPERTY,
            object.pointer(),
            key_expr,
            value.pointer()
        ));
        if let Some(key) = key_string {
            self.emit(format!("free({key});"));
        }
        self.release(&object);
        Ok(value)
    }

    fn increment(&mut self, target: &[Token], op: &Token) -> Result<CompileTimeValue, CoreError> {
        let name = match target {
            [name] if name.kind == TokenKind::Identifier => name,
            _ => {
                return Err(syntax(
                    format!("'{}' needs a variable", op.value),
                    op.span,
                    "E0203",
                ));
            }
        };
        let variable = self.assignable(name)?;
        let symbol = if op.value == "++" { "+" } else { "-" };
        let Some(call) = operators::find_binary(symbol).and_then(BinaryOperator::runtime_call) else {
            return Err(syntax(
                format!("'{}' is not supported", op.value),
                op.span,
                "E0206",
            ));
        };
        let one = self.declare_temp(format!("{}(1)", runtime::INT));
        let updated = self.declare_temp(format!("{}({}, {})", call, variable, one.pointer()));
        self.release(&one);
        self.emit(format!("{}({});", runtime::DEREFERENCE, variable));
        self.emit(format!("{} = {};", variable, updated.pointer()));
        self.scopes.untrack_temp(updated.pointer());
        Ok(CompileTimeValue::Variable(variable))
    }

    /// Generated name of a binding that may be stored to.
    fn assignable(&self, name: &Token) -> Result<String, CoreError> {
        let Some((index, binding)) = self.lookup(&name.value) else {
            if find_builtin(&name.value).is_some() {
                return Err(syntax(
                    format!("Cannot assign to built-in '{}'", name.value),
                    name.span,
                    "E0203",
                ));
            }
            return Err(CoreError::SemanticError(
                Diagnostic::name(format!("'{}' is not defined", name.value), name.span)
                    .with_code("E0201"),
            ));
        };
        if binding.is_function {
            return Err(syntax(
                format!("Cannot assign to function '{}'", name.value),
                name.span,
                "E0203",
            ));
        }
        if binding.is_constant {
            return Err(CoreError::SemanticError(
                Diagnostic::type_error(
                    format!("Cannot reassign constant '{}'", name.value),
                    name.span,
                )
                .with_code("E0208"),
            ));
        }
        self.check_visible(index, &binding, name)?;
        Ok(binding.generated)
    }
}

fn span_of(tokens: &[Token]) -> Span {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => first.span.join(last.span),
        _ => Span::default(),
    }
}

fn syntax(message: impl Into<String>, span: Span, code: &'static str) -> CoreError {
    CoreError::SemanticError(Diagnostic::syntax(message, span).with_code(code))
}
