use std::io::{self, Write};

use crate::span::Span;

/// A problem found while reading a program file or a config file.
///
/// Every diagnostic is fatal to the read that produced it; readers collect
/// as many as they can before giving up so the user sees them all at once.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Write the annotated source excerpt to `out`.
    pub fn write_to<W: Write>(
        &self,
        filename: &str,
        source: &str,
        color: bool,
        out: W,
    ) -> io::Result<()> {
        use ariadne::{Color, Config, Label, Report, ReportKind, Source};

        let mut label = Label::new((filename, self.span.range())).with_message(&self.message);
        if color {
            label = label.with_color(Color::Red);
        }
        let mut report = Report::build(ReportKind::Error, filename, self.span.start as usize)
            .with_config(Config::default().with_color(color))
            .with_message(&self.message)
            .with_label(label);
        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }
        report.finish().write((filename, Source::from(source)), out)
    }

    /// Render to stderr with colors.
    pub fn render(&self, filename: &str, source: &str) {
        // stderr closed: nothing left to report to.
        let _ = self.write_to(filename, source, true, io::stderr());
    }
}

pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_accumulate_notes() {
        let d = Diagnostic::error("unknown key 'threds'", Span::new(10, 16))
            .with_note("in gradus.toml")
            .with_help("known keys: threads")
            .with_note("second note");
        assert_eq!(d.span, Span::new(10, 16));
        assert_eq!(d.notes, ["in gradus.toml", "second note"]);
        assert_eq!(d.help.as_deref(), Some("known keys: threads"));
    }

    #[test]
    fn test_write_points_at_the_offending_line() {
        let source = "kernel k over [0..4] {\n  %0 = frob %1\n}\n";
        let d = Diagnostic::error("unknown operation 'frob'", Span::new(30, 34))
            .with_help("expected one of: add, sub");
        let mut out = Vec::new();
        d.write_to("k.gd", source, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("unknown operation 'frob'"));
        assert!(text.contains("k.gd:2"));
        assert!(text.contains("%0 = frob %1"));
        assert!(text.contains("expected one of: add, sub"));
    }

    #[test]
    fn test_render_to_stderr_does_not_panic() {
        let diagnostics = vec![Diagnostic::error("bad", Span::new(0, 3))];
        render_diagnostics(&diagnostics, "k.gd", "abc\n");
    }
}
