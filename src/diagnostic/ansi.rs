use super::{Diagnostic, Severity};
use crate::lexer::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn yellow(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;33m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[FAE-C003]: message"
        let label = match (&d.severity, d.code) {
            (Severity::Error, Some(code)) => self.bold_red(&format!("error[{code}]")),
            (Severity::Error, None) => self.bold_red("error"),
            (Severity::Warning, Some(code)) => self.yellow(&format!("warning[{code}]")),
            (Severity::Warning, None) => self.yellow("warning"),
        };
        out.push_str(&format!("{}: {}\n", label, self.bold(&d.message)));

        if let Some(line) = d.line {
            out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line));

            let text = d
                .source
                .as_deref()
                .map(|source| SourceMap::new(source).line_text(source, line))
                .filter(|text| !text.trim().is_empty());
            if let Some(text) = text {
                let gutter = line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);
                out.push_str(&format!("{pad} {pipe}\n"));
                let line_num = self.cyan(&format!("{line:>gutter$}"));
                out.push_str(&format!("{line_num} {pipe} {text}\n"));

                // Underline the line's content, leading whitespace excluded.
                let indent = text.len() - text.trim_start().len();
                let width = text.trim().chars().count().max(1);
                let carets = self.bold_red(&"^".repeat(width));
                out.push_str(&format!("{pad} {pipe} {}{carets}\n", " ".repeat(indent)));
                out.push_str(&format!("{pad} {pipe}\n"));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
