//! Source-positioned diagnostics and their terminal rendering.

use std::fmt;

use owo_colors::OwoColorize;

use crate::span::Span;

/// Category printed in front of every diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
        }
    }
}

/// A single error pointing at a span of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub code: Option<&'static str>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            span,
            code: None,
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span)
    }

    pub fn name(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::NameError, message, span)
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeError, message, span)
    }

    pub fn value(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::ValueError, message, span)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Render the diagnostic with an annotated source excerpt.
    ///
    /// Every source line touched by the span is printed with a line
    /// number gutter, followed by a caret line under the affected
    /// columns. Colors are only applied when `color` is set.
    pub fn render(&self, source: &str, filename: &str, color: bool) -> String {
        let (line, column) = self.span.line_col(source);
        let mut out = String::new();

        let header = match self.code {
            Some(code) => format!("{} [{}]", self, code),
            None => self.to_string(),
        };
        if color {
            out.push_str(&format!("{}\n", header.red().bold()));
            out.push_str(&format!(
                "  {} {}:{}:{}\n",
                "-->".blue(),
                filename,
                line,
                column
            ));
        } else {
            out.push_str(&header);
            out.push('\n');
            out.push_str(&format!("  --> {}:{}:{}\n", filename, line, column));
        }

        let gutter = excerpt_lines(source, self.span)
            .last()
            .map(|(number, _, _)| number.to_string().len())
            .unwrap_or(1);

        for (number, text, (from, to)) in excerpt_lines(source, self.span) {
            let underline = format!(
                "{}{}",
                " ".repeat(text[..from].chars().count()),
                "^".repeat(text[from..to].chars().count().max(1))
            );
            if color {
                out.push_str(&format!(
                    "{} {} {}\n",
                    format!("{number:>gutter$}").blue(),
                    "|".blue(),
                    text
                ));
                out.push_str(&format!(
                    "{} {} {}\n",
                    " ".repeat(gutter),
                    "|".blue(),
                    underline.yellow().bold()
                ));
            } else {
                out.push_str(&format!("{number:>gutter$} | {text}\n"));
                out.push_str(&format!("{} | {}\n", " ".repeat(gutter), underline));
            }
        }

        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Lines covered by `span` as `(line number, line text, underlined byte
/// range within the line)`.
fn excerpt_lines(source: &str, span: Span) -> Vec<(usize, &str, (usize, usize))> {
    let start = (span.start as usize).min(source.len());
    let end = (span.end as usize).clamp(start, source.len());
    let mut lines = Vec::new();
    let mut offset = 0;

    for (index, text) in source.split('\n').enumerate() {
        let line_start = offset;
        let line_end = offset + text.len();
        offset = line_end + 1;

        let touches = if start == end {
            start >= line_start && start <= line_end
        } else {
            start <= line_end && end > line_start
        };
        if !touches {
            if line_start > end {
                break;
            }
            continue;
        }

        let from = start.saturating_sub(line_start).min(text.len());
        let to = end.saturating_sub(line_start).clamp(from, text.len());
        let text = text.strip_suffix('\r').unwrap_or(text);
        let from = from.min(text.len());
        let to = to.min(text.len());
        lines.push((index + 1, text, (from, to)));
        if start == end {
            break;
        }
    }

    lines
}
