/// Accumulates the assembly text line by line.
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    /// An indented instruction or directive line
    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("; {}", comment.as_ref()));
    }

    pub fn blank_line(&mut self) {
        self.output.push('\n');
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
