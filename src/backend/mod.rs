//! The backend of the compiler consumes the optimized IR plus its tables
//! and emits assembly text for a syscall-only x86-64 Linux target, with an
//! optional hand-off to an external assembler/linker toolchain.

use std::{collections::BTreeMap, io, path::Path, process::Command};

use mktemp::Temp;

use crate::middle::ir::Lowered;

pub mod assembler;
pub mod x86_64_linux_gnu;

#[derive(Debug, Clone, Copy, Default)]
pub struct CodegenOptions {
    /// Embed each IR instruction as a comment above its assembly block
    pub emit_comments: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// An operand that is neither an integer literal, a known constant
    /// symbol, nor an identifier table entry
    UnresolvedOperand(String),
}

impl core::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::UnresolvedOperand(name) => {
                write!(f, "operand `{name}` does not resolve to a literal, constant, or variable")
            }
        }
    }
}

impl std::error::Error for CodegenError {}

pub trait CodeGenerator {
    fn translate_to_asm(
        &self,
        lowered: &Lowered,
        temp_renames: &BTreeMap<String, String>,
        options: &CodegenOptions,
    ) -> Result<String, CodegenError>;

    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command;

    fn create_linker_command(&self, input_file: &Path, output_file: &Path) -> Command;
}

/// Assembles and links the emitted text with the generator's toolchain,
/// runs the produced binary, and returns its exit status. The intermediate
/// files live at temp paths that are released when this returns, on every
/// path.
pub fn assemble_and_run(generator: &dyn CodeGenerator, assembly: &str) -> io::Result<i32> {
    let asm_file = Temp::new_file()?;
    let asm_path = asm_file.to_path_buf();
    std::fs::write(&asm_path, assembly)?;

    let object_file = Temp::new_file()?;
    let object_path = object_file.to_path_buf();

    let status = generator
        .create_assembler_command(&asm_path, &object_path)
        .status()?;

    if !status.success() {
        return Ok(status.code().unwrap_or(1));
    }

    let executable_file = Temp::new_file()?;
    let executable_path = executable_file.to_path_buf();

    let status = generator
        .create_linker_command(&object_path, &executable_path)
        .status()?;

    if !status.success() {
        return Ok(status.code().unwrap_or(1));
    }

    let status = Command::new(&executable_path).status()?;

    Ok(status.code().unwrap_or(1))
}
