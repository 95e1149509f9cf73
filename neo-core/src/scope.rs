//! Lexical scopes and the lifetime bookkeeping attached to them.
//!
//! Every scope records the bindings it declared and the temporaries that
//! are still waiting to be released. Leaving a scope, normally or
//! through `return`/`break`/`continue`, releases exactly those names.

use tracing::debug;

/// Index of the C `main` body in the compiler's function list.
pub const MAIN_FUNCTION: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    /// Top-level program, compiled into `main`.
    Program,
    Function,
    Block,
    Loop {
        /// Label in front of the iterator step of a classic `for`.
        continue_label: Option<String>,
        continue_used: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBinding {
    pub name: String,
    /// C identifier holding the value.
    pub generated: String,
    pub is_constant: bool,
    pub is_function: bool,
    /// Declared as a C global rather than a local of the current function.
    pub is_global: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: usize,
    pub kind: ScopeKind,
    /// Function body the scope writes into.
    pub function: usize,
    pub indent: usize,
    pub bindings: Vec<VariableBinding>,
    /// Temporaries created in this scope and not released yet.
    pub temps: Vec<String>,
}

impl Scope {
    pub fn new(id: usize, kind: ScopeKind, function: usize, indent: usize) -> Self {
        Scope {
            id,
            kind,
            function,
            indent,
            bindings: Vec::new(),
            temps: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&VariableBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Whether this scope is responsible for releasing `generated`.
    pub fn owns(&self, generated: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| !binding.is_function && binding.generated == generated)
            || self.temps.iter().any(|temp| temp == generated)
    }

    /// Names released when control leaves this scope: non-function
    /// bindings in declaration order, then pending temporaries.
    pub fn releases(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|binding| !binding.is_function)
            .map(|binding| binding.generated.as_str())
            .chain(self.temps.iter().map(String::as_str))
    }

    pub fn is_function_boundary(&self) -> bool {
        matches!(self.kind, ScopeKind::Program | ScopeKind::Function)
    }
}

/// The chain of open scopes, innermost last. Never empty: the program
/// scope it is created with is never popped.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new(program: Scope) -> Self {
        ScopeStack {
            scopes: vec![program],
        }
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn current(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub fn get(&self, index: usize) -> &Scope {
        &self.scopes[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Scope {
        &mut self.scopes[index]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Innermost binding for `name` together with the stack index of the
    /// scope that declared it.
    pub fn resolve(&self, name: &str) -> Option<(usize, &VariableBinding)> {
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, scope)| scope.lookup(name).map(|binding| (index, binding)))
    }

    /// Stack index of the innermost function scope, if the current scope
    /// is inside a function at all.
    pub fn innermost_function(&self) -> Option<usize> {
        self.scopes
            .iter()
            .rposition(Scope::is_function_boundary)
            .filter(|index| self.scopes[*index].kind == ScopeKind::Function)
    }

    /// Stack index of the innermost loop of the current function.
    pub fn innermost_loop(&self) -> Option<usize> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if matches!(scope.kind, ScopeKind::Loop { .. }) {
                return Some(index);
            }
            if scope.is_function_boundary() {
                return None;
            }
        }
        None
    }

    /// Ids of every open scope, outermost first.
    pub fn path(&self) -> Vec<usize> {
        self.scopes.iter().map(|scope| scope.id).collect()
    }

    pub fn track_temp(&mut self, name: String) {
        self.current_mut().temps.push(name);
    }

    /// Forget a temporary, innermost scope first. Returns whether it was
    /// pending.
    pub fn untrack_temp(&mut self, name: &str) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(position) = scope.temps.iter().position(|temp| temp == name) {
                scope.temps.remove(position);
                return true;
            }
        }
        false
    }

    /// Everything that has to be released when control jumps from the
    /// current scope out of the scope at `index` (inclusive), innermost
    /// scope first.
    pub fn releases_through(&self, index: usize, exempt: Option<&str>) -> Vec<String> {
        let names: Vec<String> = self.scopes[index..]
            .iter()
            .rev()
            .flat_map(Scope::releases)
            .filter(|name| Some(*name) != exempt)
            .map(str::to_string)
            .collect();
        debug!(
            from = self.current().id,
            through = self.scopes[index].id,
            count = names.len(),
            "draining scopes"
        );
        names
    }

    /// Whether any scope from `index` to the current one owns `generated`.
    pub fn owned_through(&self, index: usize, generated: &str) -> bool {
        self.scopes[index..].iter().any(|scope| scope.owns(generated))
    }
}
