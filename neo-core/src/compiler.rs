//! Statement compilation and translation unit assembly.
//!
//! The compiler walks the statement list once, emitting C into the body
//! of the function that owns the current scope. Expressions are handled
//! in [`crate::expression`]; this module owns scopes, control flow,
//! function introduction and forward-reference resolution.

use tracing::{debug, instrument};

use crate::ast::Statement;
use crate::codegen_c::{FunctionCode, TranslationUnit};
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::expression::CompileTimeValue;
use crate::lexer::{Token, lex};
use crate::parser::parse;
use crate::runtime;
use crate::scope::{MAIN_FUNCTION, Scope, ScopeKind, ScopeStack, VariableBinding};
use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Header named in the `#include` line of the generated unit.
    pub runtime_header: String,
    /// Compile `continue` to `break`, as older toolchains did.
    pub continue_breaks_loop: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            runtime_header: runtime::DEFAULT_HEADER.to_string(),
            continue_breaks_loop: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    /// The complete C translation unit.
    pub c_source: String,
    /// C symbols of the user functions, in emission order.
    pub functions: Vec<String>,
}

pub fn compile_c(source: &str) -> Result<CompilationArtifact, CoreError> {
    compile_c_with(source, &CompileOptions::default())
}

#[instrument(skip_all, fields(len = source.len()))]
pub fn compile_c_with(
    source: &str,
    options: &CompileOptions,
) -> Result<CompilationArtifact, CoreError> {
    let tokens = lex(source)?;
    let statements = parse(&tokens)?;
    debug!(statements = statements.len(), "parsed program");
    Compiler::new(options.clone()).compile(&statements)
}

/// A call to a function that was not declared yet when the call was
/// compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFunctionReference {
    /// Ids of the scopes open at the call site, outermost first.
    pub scope_path: Vec<usize>,
    pub span: Span,
    pub name: String,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    /// The statement ended in `return`, `break` or `continue`.
    Exited,
}

pub struct Compiler {
    options: CompileOptions,
    next_id: usize,
    pub(crate) scopes: ScopeStack,
    unit: TranslationUnit,
    pub(crate) slots: Vec<Option<String>>,
    pub(crate) pending: Vec<PendingFunctionReference>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        let unit = TranslationUnit::new(options.runtime_header.clone());
        let program = Scope::new(1, ScopeKind::Program, MAIN_FUNCTION, 1);
        Compiler {
            options,
            next_id: 1,
            scopes: ScopeStack::new(program),
            unit,
            slots: Vec::new(),
            pending: Vec::new(),
        }
    }

    #[instrument(skip_all)]
    pub fn compile(mut self, statements: &[Statement<'_>]) -> Result<CompilationArtifact, CoreError> {
        self.emit(format!("{}(argc, argv);", runtime::INIT));
        self.emit(format!("{}();", runtime::INIT_FUNCTIONS));

        let flow = self.compile_block(statements)?;
        if flow == Flow::Normal {
            self.release_current_scope();
        }

        self.emit(format!("{}();", runtime::FREE_FUNCTIONS));
        self.emit(format!("{}(0);", runtime::EXIT));
        self.emit("return 0;");

        if let Some(missing) = self.pending.first() {
            return Err(CoreError::SemanticError(
                Diagnostic::name(format!("Function '{}' is not defined", missing.name), missing.span)
                    .with_code("E0205"),
            ));
        }

        let functions = self
            .unit
            .functions
            .iter()
            .skip(1)
            .filter_map(|function| function.signature.split('(').next())
            .map(|head| head.trim_start_matches("NeoObject *").to_string())
            .collect();

        Ok(CompilationArtifact {
            c_source: self.unit.render(&self.slots),
            functions,
        })
    }

    // -----------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------

    pub(crate) fn fresh_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    /// Append one line to the current function body at the current
    /// scope's indentation.
    pub(crate) fn emit(&mut self, line: impl AsRef<str>) {
        self.emit_indented(0, line);
    }

    pub(crate) fn emit_indented(&mut self, extra: usize, line: impl AsRef<str>) {
        let scope = self.scopes.current();
        let (function, indent) = (scope.function, scope.indent + extra);
        self.unit.functions[function]
            .body
            .push_line(indent, line.as_ref());
    }

    /// Emit a line whose text is interrupted by a forward-reference slot.
    pub(crate) fn emit_with_slot(&mut self, before: &str, slot: usize, after: &str) {
        let scope = self.scopes.current();
        let (function, indent) = (scope.function, scope.indent);
        let body = &mut self.unit.functions[function].body;
        body.push_str(&"\t".repeat(indent));
        body.push_str(before);
        body.push_forward_ref(slot);
        body.push_str(after);
        body.push_str("\n");
    }

    /// Declare a fresh temporary initialized with `init` and track it in
    /// the current scope.
    pub(crate) fn declare_temp(&mut self, init: impl AsRef<str>) -> CompileTimeValue {
        let name = format!("_neo_temp_{}", self.fresh_id());
        self.emit(format!("NeoObject *{} = {};", name, init.as_ref()));
        self.scopes.track_temp(name.clone());
        CompileTimeValue::Temp(name)
    }

    /// Release `value` if it is a temporary.
    pub(crate) fn release(&mut self, value: &CompileTimeValue) {
        if let CompileTimeValue::Temp(name) = value {
            self.emit(format!("{}({});", runtime::DEREFERENCE, name));
            self.scopes.untrack_temp(name);
        }
    }

    fn emit_releases(&mut self, names: &[String]) {
        for name in names {
            self.emit(format!("{}({});", runtime::DEREFERENCE, name));
        }
    }

    /// Release everything the current scope owns on its normal exit.
    fn release_current_scope(&mut self) {
        let names: Vec<String> = self
            .scopes
            .current()
            .releases()
            .map(str::to_string)
            .collect();
        self.emit_releases(&names);
        self.scopes.current_mut().temps.clear();
    }

    /// Release temporaries left pending by the last statement.
    fn flush_temps(&mut self) {
        let temps = std::mem::take(&mut self.scopes.current_mut().temps);
        self.emit_releases(&temps);
    }

    fn enter_scope(&mut self, kind: ScopeKind) {
        let id = self.fresh_id();
        let current = self.scopes.current();
        let scope = Scope::new(id, kind, current.function, current.indent + 1);
        self.scopes.push(scope);
    }

    fn leave_scope(&mut self, flow: Flow) -> Option<Scope> {
        if flow == Flow::Normal {
            self.release_current_scope();
        }
        self.scopes.pop()
    }

    fn compile_nested_block(&mut self, kind: ScopeKind, body: &[Statement<'_>]) -> Result<Option<Scope>, CoreError> {
        self.enter_scope(kind);
        let flow = self.compile_block(body)?;
        Ok(self.leave_scope(flow))
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    fn compile_block(&mut self, statements: &[Statement<'_>]) -> Result<Flow, CoreError> {
        for statement in statements {
            let flow = self.compile_statement(statement)?;
            if flow == Flow::Exited {
                // Already released on the jump path.
                self.scopes.current_mut().temps.clear();
                return Ok(Flow::Exited);
            }
            self.flush_temps();
        }
        Ok(Flow::Normal)
    }

    fn compile_statement(&mut self, statement: &Statement<'_>) -> Result<Flow, CoreError> {
        match statement {
            Statement::Expression(tokens) => {
                let anchor = tokens.first().map(|t| t.span).unwrap_or_default();
                let value = self.execute_expression(tokens, anchor)?;
                self.release(&value);
            }
            Statement::VariableDeclaration {
                name,
                value,
                constant,
            } => self.compile_declaration(name, value, *constant)?,
            Statement::FunctionDeclaration {
                name,
                parameters,
                body,
            } => self.introduce_function(name, parameters, body)?,
            Statement::Do { body } => {
                self.emit("{");
                self.compile_nested_block(ScopeKind::Block, body)?;
                self.emit("}");
            }
            Statement::If {
                condition,
                body,
                else_body,
            } => {
                let anchor = condition.first().map(|t| t.span).unwrap_or_default();
                let condition = self.execute_expression(condition, anchor)?;
                self.emit(format!(
                    "if ({}({})) {{",
                    runtime::TRUTHY,
                    condition.pointer()
                ));
                self.compile_nested_block(ScopeKind::Block, body)?;
                if let Some(else_body) = else_body {
                    self.emit("} else {");
                    self.compile_nested_block(ScopeKind::Block, else_body)?;
                }
                self.emit("}");
                self.release(&condition);
            }
            Statement::Loop { body } => {
                self.emit("while (1) {");
                self.compile_nested_block(loop_scope(None), body)?;
                self.emit("}");
            }
            Statement::While {
                keyword,
                condition,
                body,
            } => {
                self.emit("while (1) {");
                self.enter_scope(loop_scope(None));
                self.compile_loop_test(condition, keyword.span)?;
                let flow = self.compile_block(body)?;
                self.leave_scope(flow);
                self.emit("}");
            }
            Statement::ForClassic {
                init,
                condition,
                iterator,
                body,
            } => self.compile_for(init, condition, iterator, body)?,
            Statement::ForIterator { keyword, .. } => {
                return Err(unsupported("Iterator for loops are", keyword));
            }
            Statement::Class(keyword) => return Err(unsupported("Classes are", keyword)),
            Statement::Import(keyword) => return Err(unsupported("Imports are", keyword)),
            Statement::Break(keyword) => {
                let index = self.loop_index(keyword)?;
                let names = self.scopes.releases_through(index, None);
                self.emit_releases(&names);
                self.emit("break;");
                return Ok(Flow::Exited);
            }
            Statement::Continue(keyword) => {
                let index = self.loop_index(keyword)?;
                let names = self.scopes.releases_through(index, None);
                self.emit_releases(&names);
                let jump = self.continue_jump(index);
                self.emit(jump);
                return Ok(Flow::Exited);
            }
            Statement::Return { keyword, value } => {
                self.compile_return(keyword, value)?;
                return Ok(Flow::Exited);
            }
        }
        Ok(Flow::Normal)
    }

    fn compile_declaration(
        &mut self,
        name: &Token,
        value: &[Token],
        constant: bool,
    ) -> Result<(), CoreError> {
        if self.scopes.current().declares(&name.value) {
            return Err(CoreError::SemanticError(
                Diagnostic::syntax(format!("Variable '{}' already defined", name.value), name.span)
                    .with_code("E0202"),
            ));
        }

        let value = if value.is_empty() {
            CompileTimeValue::Null
        } else {
            self.execute_expression(value, name.span)?
        };
        let pointer = match &value {
            CompileTimeValue::Temp(temp) => {
                self.scopes.untrack_temp(temp);
                temp.clone()
            }
            CompileTimeValue::Variable(variable) => {
                self.emit(format!("{}({});", runtime::REFERENCE, variable));
                variable.clone()
            }
            CompileTimeValue::Unresolved | CompileTimeValue::Null => "NULL".to_string(),
        };

        let scope = self.scopes.current();
        let generated = format!("_neo_var_{}_{}", scope.id, name.value);
        let is_global = scope.function == MAIN_FUNCTION;
        if is_global {
            self.unit.globals.push(format!("NeoObject *{generated};"));
            self.emit(format!("{generated} = {pointer};"));
        } else {
            self.emit(format!("NeoObject *{generated} = {pointer};"));
        }

        self.scopes.current_mut().bindings.push(VariableBinding {
            name: name.value.clone(),
            generated,
            is_constant: constant,
            is_function: false,
            is_global,
        });
        Ok(())
    }

    /// `while (1) { <test> ... }` head shared by `while` and `for`.
    fn compile_loop_test(&mut self, condition: &[Token], anchor: Span) -> Result<(), CoreError> {
        let condition = self.execute_expression(condition, anchor)?;
        self.emit(format!(
            "if (!{}({})) {{",
            runtime::TRUTHY,
            condition.pointer()
        ));
        if let CompileTimeValue::Temp(name) = &condition {
            self.emit_indented(1, format!("{}({});", runtime::DEREFERENCE, name));
        }
        self.emit_indented(1, "break;");
        self.emit("}");
        self.release(&condition);
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: &Statement<'_>,
        condition: &[Token],
        iterator: &Statement<'_>,
        body: &[Statement<'_>],
    ) -> Result<(), CoreError> {
        self.emit("{");
        self.enter_scope(ScopeKind::Block);
        self.compile_single(init)?;

        let label = format!("_neo_continue_{}", self.fresh_id());
        self.emit("while (1) {");
        self.enter_scope(loop_scope(Some(label.clone())));
        if let Some(first) = condition.first() {
            self.compile_loop_test(condition, first.span)?;
        }
        let flow = self.compile_block(body)?;
        let continue_used = match self.leave_scope(flow).map(|scope| scope.kind) {
            Some(ScopeKind::Loop { continue_used, .. }) => continue_used,
            _ => false,
        };

        if continue_used {
            self.emit_indented(1, format!("{label}: ;"));
        }
        self.enter_scope(ScopeKind::Block);
        self.compile_single(iterator)?;
        self.leave_scope(Flow::Normal);
        self.emit("}");

        self.leave_scope(Flow::Normal);
        self.emit("}");
        Ok(())
    }

    /// Compile the init or iterator statement of a `for` head.
    fn compile_single(&mut self, statement: &Statement<'_>) -> Result<(), CoreError> {
        if let Statement::Break(keyword) | Statement::Continue(keyword) | Statement::Return { keyword, .. } =
            statement
        {
            return Err(misplaced(
                format!("'{}' is not allowed in a for loop header", keyword.value),
                keyword.span,
            ));
        }
        self.compile_statement(statement)?;
        self.flush_temps();
        Ok(())
    }

    fn loop_index(&self, keyword: &Token) -> Result<usize, CoreError> {
        self.scopes.innermost_loop().ok_or_else(|| {
            misplaced(
                format!("'{}' outside of a loop", keyword.value),
                keyword.span,
            )
        })
    }

    fn continue_jump(&mut self, loop_index: usize) -> String {
        if self.options.continue_breaks_loop {
            return "break;".to_string();
        }
        match &mut self.scopes.get_mut(loop_index).kind {
            ScopeKind::Loop {
                continue_label: Some(label),
                continue_used,
            } => {
                *continue_used = true;
                format!("goto {label};")
            }
            _ => "continue;".to_string(),
        }
    }

    fn compile_return(&mut self, keyword: &Token, value: &[Token]) -> Result<(), CoreError> {
        let Some(function) = self.scopes.innermost_function() else {
            return Err(misplaced("'return' outside of a function", keyword.span));
        };

        let value = if value.is_empty() {
            CompileTimeValue::Null
        } else {
            self.execute_expression(value, keyword.span)?
        };

        let exempt = match &value {
            CompileTimeValue::Temp(name) => Some(name.clone()),
            CompileTimeValue::Variable(name) if self.scopes.owned_through(function, name) => {
                Some(name.clone())
            }
            CompileTimeValue::Variable(name) => {
                // Globals and builtins stay alive; hand the caller its own reference.
                self.emit(format!("{}({});", runtime::REFERENCE, name));
                None
            }
            CompileTimeValue::Unresolved | CompileTimeValue::Null => None,
        };

        let names = self.scopes.releases_through(function, exempt.as_deref());
        self.emit_releases(&names);
        if let CompileTimeValue::Temp(name) = &value {
            self.scopes.untrack_temp(name);
        }
        self.emit(format!("return {};", value.pointer()));
        Ok(())
    }

    // -----------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------

    fn introduce_function(
        &mut self,
        name: &Token,
        parameters: &[&Token],
        body: &[Statement<'_>],
    ) -> Result<(), CoreError> {
        let scope_id = self.scopes.current().id;
        if self.scopes.current().declares(&name.value) {
            return Err(CoreError::SemanticError(
                Diagnostic::syntax(format!("'{}' is already defined", name.value), name.span)
                    .with_code("E0202"),
            ));
        }

        let variable = format!("_neo_var_{}_{}", scope_id, name.value);
        let symbol = format!("_neo_fn_{}_{}", scope_id, name.value);
        let signature = format!("NeoObject *{}({})", symbol, runtime::FUNCTION_PARAMETERS);
        debug!(name = %name.value, %symbol, "introducing function");

        self.unit.globals.push(format!("NeoObject *{variable};"));
        self.unit.globals.push(format!("{signature};"));
        self.unit
            .init_functions
            .push(format!("{} = {}({});", variable, runtime::FUNCTION, symbol));
        self.unit
            .free_functions
            .push(format!("{}({});", runtime::DEREFERENCE, variable));
        self.scopes.current_mut().bindings.push(VariableBinding {
            name: name.value.clone(),
            generated: variable.clone(),
            is_constant: true,
            is_function: true,
            is_global: true,
        });
        self.resolve_pending(scope_id, &name.value, &variable);

        let function = self.unit.functions.len();
        self.unit.functions.push(FunctionCode::new(signature));
        let id = self.fresh_id();
        self.scopes
            .push(Scope::new(id, ScopeKind::Function, function, 1));

        for (index, parameter) in parameters.iter().enumerate() {
            let generated = format!("_neo_var_{}_{}", id, parameter.value);
            self.emit(format!(
                "NeoObject *{generated} = arg_count > {index} ? args[{index}] : {}(kwargs, \"{}\");",
                runtime::HASHMAP_SEARCH,
                parameter.value
            ));
            self.emit(format!("{}({});", runtime::REFERENCE, generated));
            self.scopes.current_mut().bindings.push(VariableBinding {
                name: parameter.value.clone(),
                generated,
                is_constant: false,
                is_function: false,
                is_global: false,
            });
        }

        let flow = self.compile_block(body)?;
        if flow == Flow::Normal {
            self.release_current_scope();
            self.emit("return NULL;");
        }
        self.scopes.pop();
        Ok(())
    }

    /// Record a call to a not-yet-declared function and return the slot
    /// its callee will be written into.
    pub(crate) fn record_forward_reference(&mut self, name: &Token) -> usize {
        let slot = self.slots.len();
        self.slots.push(None);
        debug!(name = %name.value, slot, "recording forward reference");
        self.pending.push(PendingFunctionReference {
            scope_path: self.scopes.path(),
            span: name.span,
            name: name.value.clone(),
            slot,
        });
        slot
    }

    fn resolve_pending(&mut self, scope_id: usize, name: &str, variable: &str) {
        let slots = &mut self.slots;
        self.pending.retain(|pending| {
            let matches = pending.name == name && pending.scope_path.contains(&scope_id);
            if matches {
                debug!(name, slot = pending.slot, "resolving forward reference");
                slots[pending.slot] = Some(variable.to_string());
            }
            !matches
        });
    }
}

fn loop_scope(continue_label: Option<String>) -> ScopeKind {
    ScopeKind::Loop {
        continue_label,
        continue_used: false,
    }
}

fn unsupported(what: &str, keyword: &Token) -> CoreError {
    CoreError::SemanticError(
        Diagnostic::syntax(format!("{what} not supported yet"), keyword.span).with_code("E0206"),
    )
}

fn misplaced(message: impl Into<String>, span: Span) -> CoreError {
    CoreError::SemanticError(Diagnostic::syntax(message, span).with_code("E0207"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::ErrorKind;

    fn compile(source: &str) -> String {
        compile_c(source).expect("compile should succeed").c_source
    }

    fn semantic_error(source: &str) -> Diagnostic {
        match compile_c(source) {
            Err(CoreError::SemanticError(diag)) => diag,
            other => panic!("expected semantic error, got {other:?}"),
        }
    }

    /// Body of `main` between its braces.
    fn main_body(code: &str) -> &str {
        let start = code
            .find("int main(int argc, char *argv[]) {\n")
            .expect("main present");
        &code[start..]
    }

    /// Every temporary declared in `code` is released exactly once,
    /// moved into a binding, or returned, counting the extra reference
    /// taken by `NEO_reference` or a keyword map. Only valid when every
    /// temporary is created and consumed within one statement, because a
    /// jump releases pending temporaries on its own path.
    fn assert_balanced(code: &str) {
        let mut index = 0;
        while let Some(position) = code[index..].find("NeoObject *_neo_temp_") {
            let start = index + position + "NeoObject *".len();
            let end = start
                + code[start..]
                    .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                    .expect("temp name end");
            let name = &code[start..end];
            let released = code.matches(&format!("NEO_dereference({name});")).count();
            let moved = code.matches(&format!(" = {name};")).count();
            let returned = code.matches(&format!("return {name};")).count();
            let referenced = code.matches(&format!("NEO_reference({name});")).count();
            let mapped = code
                .lines()
                .filter(|line| {
                    line.trim_start().starts_with("NEO_hashmap_set(")
                        && line.ends_with(&format!(", {name});"))
                })
                .count();
            assert_eq!(
                released + moved + returned,
                1 + referenced + mapped,
                "temporary {name} is not released exactly once in:\n{code}"
            );
            index = end;
        }
    }

    #[test]
    fn emits_translation_unit_skeleton() {
        let code = compile("");
        assert!(code.starts_with("#include \"neo.h\"\n"));
        assert!(code.contains("void NEO_initFunctions() {\n}\n"));
        assert!(code.contains("void NEO_freeFunctions() {\n}\n"));
        assert!(code.ends_with(
            "int main(int argc, char *argv[]) {\n\tNEO_init(argc, argv);\n\tNEO_initFunctions();\n\tNEO_freeFunctions();\n\tNEO_exit(0);\n\treturn 0;\n}\n"
        ));
    }

    #[test]
    fn honors_runtime_header_option() {
        let options = CompileOptions {
            runtime_header: "../api/include/neo.h".to_string(),
            ..CompileOptions::default()
        };
        let artifact = compile_c_with("", &options).expect("compile");
        assert!(artifact.c_source.starts_with("#include \"../api/include/neo.h\"\n"));
    }

    #[test]
    fn compiles_print_of_sum() {
        let code = compile("print(1 + 2)");
        let expected = "\tNeoObject *_neo_temp_2 = NEO_int(1);\n\
                        \tNeoObject *_neo_temp_3 = NEO_int(2);\n\
                        \tNeoObject *_neo_temp_4 = NEO_add(_neo_temp_2, _neo_temp_3);\n\
                        \tNEO_dereference(_neo_temp_2);\n\
                        \tNEO_dereference(_neo_temp_3);\n\
                        \tNeoObject *_neo_args_5[] = { _neo_temp_4 };\n\
                        \tNeoObject *_neo_temp_6 = NEO_call(NeoGlobPrint, NULL, _neo_args_5, 1, NeoEmptyHashmap);\n\
                        \tNEO_dereference(_neo_temp_4);\n\
                        \tNEO_dereference(_neo_temp_6);\n";
        assert!(main_body(&code).contains(expected), "{code}");
        assert_balanced(&code);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let code = compile("1 + 2 * 3");
        assert!(code.contains("NeoObject *_neo_temp_5 = NEO_multiply(_neo_temp_3, _neo_temp_4);"));
        assert!(code.contains("NeoObject *_neo_temp_6 = NEO_add(_neo_temp_2, _neo_temp_5);"));
        assert_balanced(&code);
    }

    #[test]
    fn power_is_right_associative() {
        let code = compile("2 ** 3 ** 2");
        assert!(code.contains("NeoObject *_neo_temp_5 = NEO_power(_neo_temp_3, _neo_temp_4);"));
        assert!(code.contains("NeoObject *_neo_temp_6 = NEO_power(_neo_temp_2, _neo_temp_5);"));
    }

    #[test]
    fn subtraction_is_left_associative() {
        let code = compile("2 - 3 - 1");
        assert!(code.contains("NeoObject *_neo_temp_5 = NEO_subtract(_neo_temp_2, _neo_temp_3);"));
        assert!(code.contains("NeoObject *_neo_temp_6 = NEO_subtract(_neo_temp_5, _neo_temp_4);"));
    }

    #[test]
    fn logical_operators_use_truthiness() {
        let code = compile("true || false && true");
        assert!(code.contains(
            "NeoObject *_neo_temp_2 = (NEO_get_truthy(NeoFalse) && NEO_get_truthy(NeoTrue)) ? NeoTrue : NeoFalse;"
        ));
        assert!(code.contains(
            "NeoObject *_neo_temp_3 = (NEO_get_truthy(NeoTrue) || NEO_get_truthy(_neo_temp_2)) ? NeoTrue : NeoFalse;"
        ));
        assert_balanced(&code);
    }

    #[test]
    fn classifies_numeric_literals() {
        let code = compile("a := 42\nb := 3.5\nc := 1e3\nd := 99999999999999999999n\ne := 1.5n");
        assert!(code.contains("NEO_int(42)"));
        assert!(code.contains("NEO_double(3.5)"));
        assert!(code.contains("NEO_double(1e3)"));
        assert!(code.contains("NEO_bigint_str(\"99999999999999999999\")"));
        assert!(code.contains("NEO_bigfloat_str(\"1.5\")"));
    }

    #[test]
    fn rejects_integer_out_of_range() {
        let diag = semantic_error("a := 3000000000");
        assert_eq!(diag.kind, ErrorKind::ValueError);
        assert_eq!(diag.code, Some("E0209"));
        assert!(diag.message.contains("'n' suffix"));
    }

    #[test]
    fn requotes_single_quoted_strings() {
        let code = compile("print('say \"hi\"')");
        assert!(code.contains("NEO_string3(\"say \\\"hi\\\"\")"));
    }

    #[test]
    fn top_level_bindings_are_globals_released_at_exit() {
        let code = compile("let a = 1\nlet b = a");
        assert!(code.contains("NeoObject *_neo_var_1_a;\nNeoObject *_neo_var_1_b;\n"));
        let main = main_body(&code);
        assert!(main.contains("\t_neo_var_1_a = _neo_temp_2;\n"));
        assert!(main.contains("\tNEO_reference(_neo_var_1_a);\n\t_neo_var_1_b = _neo_var_1_a;\n"));
        assert!(main.contains(
            "\tNEO_dereference(_neo_var_1_a);\n\tNEO_dereference(_neo_var_1_b);\n\tNEO_freeFunctions();"
        ));
        assert_balanced(&code);
    }

    #[test]
    fn block_scope_exit_releases_each_binding_once() {
        let code = compile("do {\n let a = 1\n let b = 2\n}");
        let main = main_body(&code);
        assert_eq!(main.matches("NEO_dereference(_neo_var_2_a);").count(), 1);
        assert_eq!(main.matches("NEO_dereference(_neo_var_2_b);").count(), 1);
        let a = main.find("NEO_dereference(_neo_var_2_a);").expect("a released");
        let b = main.find("NEO_dereference(_neo_var_2_b);").expect("b released");
        assert!(a < b);
        assert!(main.contains("\t{\n"));
        assert_balanced(&code);
    }

    #[test]
    fn null_declaration() {
        let code = compile("let a");
        assert!(main_body(&code).contains("\t_neo_var_1_a = NULL;\n"));
    }

    #[test]
    fn rejects_redeclaration_in_same_scope() {
        let diag = semantic_error("let a = 1\nlet a = 2");
        assert_eq!(diag.message, "Variable 'a' already defined");
        assert_eq!(diag.code, Some("E0202"));
    }

    #[test]
    fn allows_shadowing_in_nested_scope() {
        let code = compile("let a = 1\ndo { let a = 2\n print(a) }");
        assert!(code.contains("_neo_var_3_a"));
        assert!(code.contains("NeoObject *_neo_args_5[] = { _neo_var_3_a };"));
    }

    #[test]
    fn self_assignment_is_a_no_op() {
        let code = compile("let x = 1\nx = x");
        let main = main_body(&code);
        assert!(!main.contains("NEO_reference(_neo_var_1_x)"));
        assert_eq!(main.matches("NEO_dereference(_neo_var_1_x);").count(), 1);
    }

    #[test]
    fn assignment_references_new_and_releases_old() {
        let code = compile("let x = 1\nx = 2");
        assert!(main_body(&code).contains(
            "\tNeoObject *_neo_temp_3 = NEO_int(2);\n\
             \tNEO_reference(_neo_temp_3);\n\
             \tNEO_dereference(_neo_var_1_x);\n\
             \t_neo_var_1_x = _neo_temp_3;\n\
             \tNEO_dereference(_neo_temp_3);\n"
        ));
    }

    #[test]
    fn compound_assignment_reads_target_first() {
        let code = compile("let x = 1\nx -= 2");
        assert!(code.contains("NEO_subtract(_neo_var_1_x, _neo_temp_3)"));
        assert_balanced(&code);
    }

    #[test]
    fn chained_assignment_is_right_associative() {
        let code = compile("let a = 1\nlet b = 2\na = b = 3");
        let main = main_body(&code);
        let inner = main.find("_neo_var_1_b = _neo_temp_4;").expect("b assigned");
        let outer = main.find("_neo_var_1_a = _neo_var_1_b;").expect("a assigned");
        assert!(inner < outer);
    }

    #[test]
    fn rejects_constant_reassignment() {
        let diag = semantic_error("const a = 1\na = 2");
        assert_eq!(diag.kind, ErrorKind::TypeError);
        assert_eq!(diag.code, Some("E0208"));
    }

    #[test]
    fn rejects_builtin_and_function_targets() {
        assert_eq!(semantic_error("print = 1").code, Some("E0203"));
        assert_eq!(semantic_error("fn f() {}\nf = 1").code, Some("E0203"));
        assert_eq!(semantic_error("1 = 2").code, Some("E0203"));
    }

    #[test]
    fn rejects_undefined_names() {
        let diag = semantic_error("print(x)");
        assert_eq!(diag.to_string(), "NameError: 'x' is not defined");
        assert_eq!(diag.code, Some("E0201"));
    }

    #[test]
    fn property_and_index_stores() {
        let code = compile("let o = {a: 1}\no.b = 2\no[\"c\"] = 3");
        assert!(code.contains("NEO_set_object_property(_neo_var_1_o, \"b\", _neo_temp_"));
        assert!(code.contains("char *_neo_str_"));
        assert!(code.contains("free(_neo_str_"));
        assert_balanced(&code);
    }

    #[test]
    fn compiles_array_and_object_literals() {
        let code = compile("let a = [1, 2,]\nlet o = {x: 1, 'y': 2, [a]: 3}");
        assert_eq!(code.matches("internal_NEO_array_push(").count(), 2);
        assert!(code.contains("NEO_set_object_property(_neo_temp_"));
        assert!(code.contains(", \"x\", "));
        assert!(code.contains(", \"y\", "));
        assert!(code.contains("= NEO_to_string(_neo_var_1_a);"));
        assert_balanced(&code);
    }

    #[test]
    fn rejects_invalid_object_key() {
        let diag = semantic_error("let o = {1: 2}");
        assert_eq!(diag.code, Some("E0204"));
    }

    #[test]
    fn method_calls_pass_the_receiver() {
        let code = compile("let a = [1]\na.push(2)");
        assert!(code.contains(
            "NEO_call_object_property(_neo_var_1_a, \"push\", _neo_var_1_a, _neo_args_5, 1, NeoEmptyHashmap);"
        ));
        assert_balanced(&code);
    }

    #[test]
    fn keyword_arguments_use_a_hashmap() {
        let code = compile("print(1, end: \"\")");
        assert!(code.contains("NeoHashMap *_neo_kwargs_"));
        assert!(code.contains("NEO_hashmap_set(_neo_kwargs_"));
        assert!(code.contains("NEO_free_hashmap(_neo_kwargs_"));
        assert_balanced(&code);
    }

    #[test]
    fn keyword_values_are_released_after_the_map() {
        let code = compile("let x = 1\nfn f(a) { }\nf(1, end: x)\nf(end: 1 + 2)");
        let main = main_body(&code);
        assert!(main.contains("NEO_hashmap_set(_neo_kwargs_"));
        let freed = main.find("NEO_free_hashmap(").expect("first map freed");
        assert!(main[freed..].contains(");\n\tNEO_dereference(_neo_var_1_x);\n"));
        assert_eq!(main.matches("NEO_dereference(_neo_var_1_x);").count(), 2);
        assert_balanced(&code);
    }

    #[test]
    fn object_values_may_start_on_a_new_line() {
        let code = compile("let o = {\n  a:\n    1,\n  'b'\n  : 2,\n}");
        assert!(code.contains(", \"a\", _neo_temp_"));
        assert!(code.contains(", \"b\", _neo_temp_"));
        assert_balanced(&code);
    }

    #[test]
    fn ownership_balances_for_every_operator_and_operand_shape() {
        let operands = ["1", "x", "f(2)", "-x", "o.k", "o[\"k\"]"];
        for operator in crate::operators::BINARY_OPERATORS {
            for left in operands {
                for right in operands {
                    let expression = format!("{left} {} {right}", operator.symbol);
                    let source = format!(
                        "let x = 3\nlet o = {{k: 4}}\nfn f(a) {{ return a }}\n\
                         let y = {expression}\nprint({expression})\ny = {expression}\n\
                         fn g(p) {{\n return {expression}\n}}"
                    );
                    assert_balanced(&compile(&source));
                }
            }
        }
    }

    #[test]
    fn ownership_balances_for_call_argument_shapes() {
        let values = ["1", "x", "f(2)", "1 + x", "[x, 2]", "{k: x}"];
        for first in values {
            for second in values {
                for call in [
                    format!("f({first}, {second})"),
                    format!("f({first}, end: {second})"),
                    format!("f(sep: {first}, end: {second})"),
                    format!("o.m({first}, end: {second})"),
                    format!("later({first}, end: {second})"),
                ] {
                    let source = format!(
                        "let x = 3\nlet o = {{}}\nfn f(a) {{ return a }}\n\
                         {call}\nlet r = {call}\nfn later(a) {{ }}"
                    );
                    assert_balanced(&compile(&source));
                }
            }
        }
    }

    /// Source names of the bindings released between the declaration of
    /// `c` and the jump that follows it.
    fn drained_before_jump(code: &str, jump: &str) -> Vec<String> {
        let start = code.find("_c = ").expect("c declared");
        let end = start + code[start..].find(jump).expect("jump emitted");
        let mut names: Vec<String> = code[start..end]
            .lines()
            .filter_map(|line| line.trim().strip_prefix("NEO_dereference(_neo_var_"))
            .filter_map(|rest| rest.strip_suffix(");"))
            .filter_map(|rest| rest.rsplit('_').next())
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn jumps_drain_every_scope_they_leave() {
        let kinds = [
            ("if p {", false, false),
            ("do {", false, false),
            ("while p {", true, false),
            ("loop {", true, false),
            ("for (let i = 0; p; i += 1) {", true, true),
        ];
        for (outer, outer_loop, outer_for) in kinds {
            for (inner, inner_loop, inner_for) in kinds {
                for jump in ["break", "continue", "return p", "return 1 + 2"] {
                    let is_return = jump.starts_with("return");
                    if !is_return && !outer_loop && !inner_loop {
                        assert_eq!(
                            semantic_error(&format!("fn f(p) {{\n {outer}\n {inner}\n {jump}\n }}\n }}\n}}"))
                                .code,
                            Some("E0207")
                        );
                        continue;
                    }
                    let source = format!(
                        "fn f(p) {{\n let a = 1\n {outer}\n  let b = 2\n  {inner}\n   let c = 3\n   {jump}\n  }}\n }}\n return a\n}}\nf(1)"
                    );
                    let code = compile(&source);

                    let mut expected = vec!["c"];
                    if inner_for && (is_return || !inner_loop) {
                        expected.push("i");
                    }
                    if is_return || !inner_loop {
                        expected.push("b");
                        if outer_for && is_return {
                            expected.push("i");
                        }
                    }
                    if is_return {
                        expected.push("a");
                    }
                    // A returned parameter moves to the caller.
                    if is_return && jump != "return p" {
                        expected.push("p");
                    }
                    expected.sort();

                    let marker = match jump {
                        "break" => "break;",
                        "continue" if (inner_loop && inner_for) || (!inner_loop && outer_for) => "goto ",
                        "continue" => "continue;",
                        _ => "return ",
                    };
                    assert_eq!(
                        drained_before_jump(&code, marker),
                        expected,
                        "{outer} / {inner} / {jump}:\n{code}"
                    );
                    assert_balanced(&code);
                }
            }
        }
    }

    #[test]
    fn increments_update_the_binding() {
        let code = compile("let i = 0\ni++\n--i");
        assert!(code.contains("NEO_add(_neo_var_1_i, _neo_temp_"));
        assert!(code.contains("NEO_subtract(_neo_var_1_i, _neo_temp_"));
        assert_balanced(&code);
    }

    #[test]
    fn emits_functions_with_parameters() {
        let artifact = compile_c("fn add(a, b) {\n return a + b\n}\nprint(add(1, 2))").expect("compile");
        assert_eq!(artifact.functions, vec!["_neo_fn_1_add"]);
        let code = artifact.c_source;
        assert!(code.contains(
            "NeoObject *_neo_fn_1_add(NeoObject *this, NeoObject **args, size_t arg_count, NeoHashMap *kwargs);"
        ));
        assert!(code.contains("\t_neo_var_1_add = NEO_function(_neo_fn_1_add);\n"));
        assert!(code.contains("\tNEO_dereference(_neo_var_1_add);\n"));
        assert!(code.contains(
            "\tNeoObject *_neo_var_2_a = arg_count > 0 ? args[0] : NEO_hashmap_search(kwargs, \"a\");\n\tNEO_reference(_neo_var_2_a);\n"
        ));
        assert!(code.contains(
            "\tNEO_dereference(_neo_var_2_a);\n\tNEO_dereference(_neo_var_2_b);\n\treturn _neo_temp_"
        ));
        assert!(!code.contains("return NULL;"));
        assert_balanced(&code);
    }

    #[test]
    fn appends_return_null_without_explicit_return() {
        let code = compile("fn f() {\n print(1)\n}");
        assert!(code.contains("\tNEO_dereference(_neo_temp_5);\n\treturn NULL;\n}"));
    }

    #[test]
    fn returning_a_global_references_it_first() {
        let code = compile("let g = 1\nfn f() { return g }");
        assert!(code.contains("\tNEO_reference(_neo_var_1_g);\n\treturn _neo_var_1_g;\n"));
    }

    #[test]
    fn returning_a_local_transfers_ownership() {
        let code = compile("fn f(a) {\n let b = a\n return b\n}");
        assert!(code.contains("\tNEO_dereference(_neo_var_2_a);\n\treturn _neo_var_2_b;\n"));
        assert!(!code.contains("NEO_dereference(_neo_var_2_b)"));
    }

    #[test]
    fn return_inside_nested_block_drains_to_function() {
        let code = compile("fn f(a) {\n if a {\n let b = 1\n return 2\n }\n return a\n}");
        let early = code.find("return _neo_temp_").expect("early return");
        let before = &code[..early];
        let drained = &before[before.rfind("NEO_int(2);").expect("value")..];
        assert!(drained.contains("NEO_dereference(_neo_var_3_b);"));
        assert!(drained.contains("NEO_dereference(_neo_var_2_a);"));
    }

    #[test]
    fn resolves_forward_references() {
        let code = compile("print(later())\nfn later() { return 1 }");
        assert!(code.contains("NEO_call(_neo_var_1_later, NULL, NULL, 0, NeoEmptyHashmap);"));
    }

    #[test]
    fn resolves_forward_references_from_function_bodies() {
        let code = compile("fn a() { return b() }\nfn b() { return 1 }");
        assert!(code.contains("NEO_call(_neo_var_1_b, NULL, NULL, 0, NeoEmptyHashmap);"));
    }

    #[test]
    fn reports_unresolved_forward_reference() {
        let diag = semantic_error("missing()");
        assert_eq!(diag.to_string(), "NameError: Function 'missing' is not defined");
        assert_eq!(diag.code, Some("E0205"));
    }

    #[test]
    fn forward_reference_does_not_resolve_from_sibling_block() {
        let diag = semantic_error("do { f() }\ndo { fn f() {} }");
        assert_eq!(diag.code, Some("E0205"));
    }

    #[test]
    fn recursion_uses_the_function_binding() {
        let code = compile("fn f(n) { return f(n) }");
        assert!(code.contains("NEO_call(_neo_var_1_f, NULL, _neo_args_"));
    }

    #[test]
    fn rejects_duplicate_function() {
        let diag = semantic_error("fn f() {}\nfn f() {}");
        assert_eq!(diag.message, "'f' is already defined");
    }

    #[test]
    fn rejects_closures() {
        let diag = semantic_error("fn outer(a) {\n fn inner() { return a }\n}");
        assert_eq!(diag.message, "Closures are not supported");
    }

    #[test]
    fn compiles_if_else_chain() {
        let code = compile("let a = 1\nif a == 1 { print(1) } else if a == 2 { print(2) } else { print(3) }");
        assert!(code.contains("if (NEO_get_truthy(_neo_temp_4)) {"));
        assert_eq!(code.matches("} else {").count(), 2);
        assert_balanced(&code);
    }

    #[test]
    fn compiles_while_loop_with_condition_release() {
        let code = compile("let i = 0\nwhile i < 3 {\n i += 1\n}");
        let main = main_body(&code);
        assert!(main.contains(
            "\twhile (1) {\n\
             \t\tNeoObject *_neo_temp_4 = NEO_int(3);\n\
             \t\tNeoObject *_neo_temp_5 = NEO_less_than(_neo_var_1_i, _neo_temp_4);\n\
             \t\tNEO_dereference(_neo_temp_4);\n\
             \t\tif (!NEO_get_truthy(_neo_temp_5)) {\n\
             \t\t\tNEO_dereference(_neo_temp_5);\n\
             \t\t\tbreak;\n\
             \t\t}\n\
             \t\tNEO_dereference(_neo_temp_5);\n"
        ), "{code}");
    }

    #[test]
    fn break_releases_loop_bindings() {
        let code = compile("loop {\n let a = 1\n break\n}");
        assert!(main_body(&code).contains("\t\tNEO_dereference(_neo_var_2_a);\n\t\tbreak;\n\t}\n"));
    }

    #[test]
    fn continue_in_for_jumps_to_iterator() {
        let code = compile("for (let i = 0; i < 3; i += 1) {\n if i == 1 { continue }\n print(i)\n}");
        assert!(code.contains("goto _neo_continue_"));
        assert!(code.contains("_neo_continue_"));
        let label = code.find(": ;").expect("label emitted");
        let step = code.rfind("NEO_add(_neo_var_").expect("iterator step");
        assert!(label < step);
    }

    #[test]
    fn continue_in_while_reenters_loop() {
        let code = compile("let i = 0\nwhile i < 3 {\n i += 1\n continue\n}");
        assert!(code.contains("\t\tcontinue;\n"));
    }

    #[test]
    fn continue_can_compile_as_break() {
        let options = CompileOptions {
            continue_breaks_loop: true,
            ..CompileOptions::default()
        };
        let artifact = compile_c_with("loop { continue }", &options).expect("compile");
        assert!(artifact.c_source.contains("\t\tbreak;\n"));
        assert!(!artifact.c_source.contains("continue;"));
    }

    #[test]
    fn for_without_condition_loops_forever() {
        let code = compile("for (let i = 0; ; i += 1) { break }");
        assert!(!code.contains("if (!NEO_get_truthy"));
    }

    #[test]
    fn rejects_misplaced_control_flow() {
        assert_eq!(semantic_error("break").code, Some("E0207"));
        assert_eq!(semantic_error("continue").code, Some("E0207"));
        assert_eq!(semantic_error("return 1").code, Some("E0207"));
        assert_eq!(semantic_error("loop { fn f() { break } }").code, Some("E0207"));
    }

    #[test]
    fn rejects_unsupported_constructs() {
        assert_eq!(semantic_error("for (v in [1]) { }").code, Some("E0206"));
        assert_eq!(semantic_error("class A { }").message, "Classes are not supported yet");
        assert_eq!(semantic_error("import math").message, "Imports are not supported yet");
    }

    #[test]
    fn statements_after_return_are_skipped() {
        let code = compile("fn f() {\n return 1\n print(2)\n}");
        assert!(!code.contains("NEO_int(2)"));
    }
}
