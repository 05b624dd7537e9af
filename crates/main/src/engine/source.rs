use crate::error::ScriptingDetails;

/// A half-open byte range into a script source text.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) struct Span {
    pub(crate) start: u32,
    pub(crate) end: u32,
}

impl Span {
    #[inline(always)]
    pub(crate) fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Source text with a precomputed line index.
///
/// Lines are 1-based and columns 0-based in the rendered diagnostics,
/// following the surface of the embedded engine.
pub(crate) struct SourceText {
    text: String,
    resource_name: String,
    line_starts: Vec<u32>,
}

impl SourceText {
    pub(crate) fn new(text: &str, resource_name: Option<&str>) -> Self {
        let mut line_starts = vec![0];

        for (index, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(index as u32 + 1);
            }
        }

        Self {
            text: String::from(text),
            resource_name: String::from(resource_name.unwrap_or("undefined")),
            line_starts,
        }
    }

    #[inline(always)]
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    /// 0-based line index of an absolute position.
    fn line_index(&self, position: u32) -> usize {
        match self.line_starts.binary_search(&position) {
            Ok(line) => line,
            Err(line) => line - 1,
        }
    }

    fn line_text(&self, line: usize) -> &str {
        let start = self.line_starts[line] as usize;

        let end = match self.line_starts.get(line + 1) {
            Some(next) => (*next as usize).saturating_sub(1),
            None => self.text.len(),
        };

        let line = &self.text[start..end];

        line.strip_suffix('\r').unwrap_or(line)
    }

    /// Builds the structured error record for a source range.
    pub(crate) fn details(&self, message: impl Into<String>, span: Span) -> ScriptingDetails {
        let line = self.line_index(span.start);
        let line_start = self.line_starts[line];

        ScriptingDetails {
            message: message.into(),
            resource_name: self.resource_name.clone(),
            source_line: String::from(self.line_text(line)),
            line_number: line + 1,
            start_column: (span.start - line_start) as usize,
            end_column: (span.end - line_start) as usize,
            start_position: span.start as usize,
            end_position: span.end as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_locate_second_line() {
        let source = SourceText::new("const a = 1;\na ==== 2;", None);

        let details = source.details("SyntaxError: Unexpected token '='", Span::new(18, 19));

        assert_eq!(details.resource_name, "undefined");
        assert_eq!(details.source_line, "a ==== 2;");
        assert_eq!(details.line_number, 2);
        assert_eq!(details.start_column, 5);
        assert_eq!(details.end_column, 6);
        assert_eq!(details.start_position, 18);
        assert_eq!(details.end_position, 19);
    }
}
