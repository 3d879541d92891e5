use std::path::PathBuf;

use self::lexer::Span;

pub mod ast;
pub mod lexer;
pub mod parser;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// 1-based line number of a byte position
    pub fn line_for_position(&self, position: usize) -> usize {
        self.contents[..position].matches('\n').count() + 1
    }

    /// 1-based column of a byte position
    pub fn column_for_position(&self, position: usize) -> usize {
        match self.contents[..position].rfind('\n') {
            Some(newline) => position - newline,
            None => position + 1,
        }
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}
