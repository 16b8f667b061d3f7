//! Indent-scoped kernel source writer.
//!
//! Templates build source line by line; blocks opened with [`KernelWriter::open`]
//! indent their contents and are closed with a matching [`KernelWriter::close`].
//! Lines stay individually addressable until [`KernelWriter::finish`], so tests
//! can assert on fragments without parsing the joined text.

const INDENT: &str = "    ";

/// Builds kernel source text with scoped indentation.
#[derive(Debug, Default)]
pub struct KernelWriter {
    lines: Vec<String>,
    depth: usize,
}

impl KernelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indent.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let mut s = String::with_capacity(self.depth * INDENT.len() + text.as_ref().len());
        for _ in 0..self.depth {
            s.push_str(INDENT);
        }
        s.push_str(text.as_ref());
        self.lines.push(s);
    }

    /// Append a blank line.
    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    /// Append `header {` and indent the following lines.
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    /// Un-indent and append the closing `}`.
    pub fn close(&mut self) {
        debug_assert!(self.depth > 0, "close() without a matching open()");
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    /// Lines emitted so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Join the lines into the final source text.
    pub fn finish(self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_indentation() {
        let mut w = KernelWriter::new();
        w.open("for (int i = 0; i < 4; ++i)");
        w.line("x += 1;");
        w.open("if (x > 2)");
        w.line("y = x;");
        w.close();
        w.close();

        assert_eq!(
            w.lines(),
            &[
                "for (int i = 0; i < 4; ++i) {",
                "    x += 1;",
                "    if (x > 2) {",
                "        y = x;",
                "    }",
                "}",
            ]
        );
    }

    #[test]
    fn test_finish_terminates_with_newline() {
        let mut w = KernelWriter::new();
        w.line("a;");
        w.blank();
        w.line("b;");
        assert_eq!(w.finish(), "a;\n\nb;\n");
    }
}
