//! C translation unit assembly.
//!
//! Function bodies are buffered as fragments so that calls to functions
//! declared later in the source can be emitted before the callee's
//! global is known. Each forward reference is a slot that is filled when
//! the declaration shows up and substituted during [`TranslationUnit::render`].

use crate::runtime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    ForwardRef(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeBuffer {
    fragments: Vec<Fragment>,
}

impl CodeBuffer {
    pub fn push_str(&mut self, text: &str) {
        if let Some(Fragment::Text(last)) = self.fragments.last_mut() {
            last.push_str(text);
        } else {
            self.fragments.push(Fragment::Text(text.to_string()));
        }
    }

    pub fn push_line(&mut self, indent: usize, line: &str) {
        self.push_str(&"\t".repeat(indent));
        self.push_str(line);
        self.push_str("\n");
    }

    pub fn push_forward_ref(&mut self, slot: usize) {
        self.fragments.push(Fragment::ForwardRef(slot));
    }

    /// Render the buffer, replacing every forward reference with its
    /// resolved symbol. Unresolved slots render as `NULL`.
    pub fn render(&self, slots: &[Option<String>]) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(text) => out.push_str(text),
                Fragment::ForwardRef(slot) => {
                    match slots.get(*slot).and_then(Option::as_deref) {
                        Some(symbol) => out.push_str(symbol),
                        None => out.push_str("NULL"),
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCode {
    pub signature: String,
    pub body: CodeBuffer,
}

impl FunctionCode {
    pub fn new(signature: impl Into<String>) -> Self {
        FunctionCode {
            signature: signature.into(),
            body: CodeBuffer::default(),
        }
    }
}

/// Sections of the generated translation unit.
///
/// `functions[0]` is `main`; user functions follow in declaration order
/// but `main` is written last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub header: String,
    pub globals: Vec<String>,
    pub init_functions: Vec<String>,
    pub free_functions: Vec<String>,
    pub functions: Vec<FunctionCode>,
}

impl TranslationUnit {
    pub fn new(header: impl Into<String>) -> Self {
        TranslationUnit {
            header: header.into(),
            globals: vec![
                format!("void {}();", runtime::INIT_FUNCTIONS),
                format!("void {}();", runtime::FREE_FUNCTIONS),
            ],
            init_functions: Vec::new(),
            free_functions: Vec::new(),
            functions: vec![FunctionCode::new("int main(int argc, char *argv[])")],
        }
    }

    pub fn main_mut(&mut self) -> &mut FunctionCode {
        &mut self.functions[0]
    }

    pub fn render(&self, slots: &[Option<String>]) -> String {
        let mut out = format!("#include \"{}\"\n\n", self.header);

        for global in &self.globals {
            out.push_str(global);
            out.push('\n');
        }
        out.push('\n');

        write_function(
            &mut out,
            &format!("void {}()", runtime::INIT_FUNCTIONS),
            &lines(&self.init_functions),
        );
        write_function(
            &mut out,
            &format!("void {}()", runtime::FREE_FUNCTIONS),
            &lines(&self.free_functions),
        );
        for function in self.functions.iter().skip(1) {
            write_function(&mut out, &function.signature, &function.body.render(slots));
        }
        let main = &self.functions[0];
        write_function(&mut out, &main.signature, &main.body.render(slots));

        // Drop the blank line after the last function.
        out.pop();
        out
    }
}

fn lines(lines: &[String]) -> String {
    lines.iter().map(|line| format!("\t{line}\n")).collect()
}

fn write_function(out: &mut String, signature: &str, body: &str) {
    out.push_str(signature);
    out.push_str(" {\n");
    out.push_str(body);
    out.push_str("}\n\n");
}

/// Re-quote a Neo string literal (including its quotes) as a C string
/// literal. Escape sequences are kept verbatim; only a bare `"` inside a
/// single-quoted literal needs escaping.
pub fn c_string_literal(raw: &str) -> String {
    let inner = raw
        .get(1..raw.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len() + 2);
    out.push('"');
    let mut escaped = false;
    for ch in inner.chars() {
        if ch == '"' && !escaped {
            out.push('\\');
        }
        out.push(ch);
        escaped = ch == '\\' && !escaped;
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_text_and_substitutes_slots() {
        let mut buffer = CodeBuffer::default();
        buffer.push_str("NEO_call(");
        buffer.push_forward_ref(0);
        buffer.push_str(", NULL);");
        buffer.push_forward_ref(1);
        assert_eq!(
            buffer.render(&[Some("_neo_var_1_f".to_string())]),
            "NEO_call(_neo_var_1_f, NULL);NULL"
        );
    }

    #[test]
    fn renders_unit_in_section_order() {
        let mut unit = TranslationUnit::new("neo.h");
        unit.globals.push("NeoObject *_neo_var_1_f;".to_string());
        unit.init_functions
            .push("_neo_var_1_f = NEO_function(_neo_fn_1_f);".to_string());
        unit.free_functions.push("NEO_dereference(_neo_var_1_f);".to_string());
        let mut function = FunctionCode::new("NeoObject *_neo_fn_1_f()");
        function.body.push_line(1, "return NULL;");
        unit.functions.push(function);
        unit.main_mut().body.push_line(1, "NEO_init(argc, argv);");

        let code = unit.render(&[]);
        assert!(code.starts_with("#include \"neo.h\"\n\nvoid NEO_initFunctions();\n"));
        let init = code.find("void NEO_initFunctions() {").expect("init");
        let free = code.find("void NEO_freeFunctions() {").expect("free");
        let user = code.find("NeoObject *_neo_fn_1_f() {").expect("user function");
        let main = code.find("int main(int argc, char *argv[]) {").expect("main");
        assert!(init < free && free < user && user < main);
        assert!(code.contains("\t_neo_var_1_f = NEO_function(_neo_fn_1_f);\n"));
        assert!(code.ends_with("\tNEO_init(argc, argv);\n}\n"));
    }

    #[test]
    fn requotes_string_literals() {
        assert_eq!(c_string_literal("\"hi\\n\""), "\"hi\\n\"");
        assert_eq!(c_string_literal("'say \"hi\"'"), "\"say \\\"hi\\\"\"");
        assert_eq!(c_string_literal("'it\\'s'"), "\"it\\'s\"");
        assert_eq!(c_string_literal("\"a\\\\\""), "\"a\\\\\"");
    }
}
