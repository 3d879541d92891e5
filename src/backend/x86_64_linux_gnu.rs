use std::{collections::BTreeMap, path::Path, process::Command};

use crate::{
    backend::{CodeGenerator, CodegenError, CodegenOptions, assembler::Assembler},
    frontend::ast::{BinaryOp, CompareOp},
    middle::ir::{self, Instruction, Lowered, PrintKind},
};

// Names reserved for the runtime and its storage. The `$` keeps them out of
// the source identifier namespace.
const PRINT_INT: &str = "__$print_int";
const PRINT_STR: &str = "__$print_str";
const NEWLINE: &str = "__$newline";
const DIGIT_SPACE: &str = "__$digit_space";
const DIGIT_SPACE_POS: &str = "__$digit_space_pos";

/// 19 digits, a sign, and a trailing newline covers the widest signed
/// 64-bit value
const DIGIT_SPACE_LEN: usize = 21;

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    fn translate_to_asm(
        &self,
        lowered: &Lowered,
        temp_renames: &BTreeMap<String, String>,
        options: &CodegenOptions,
    ) -> Result<String, CodegenError> {
        Emitter {
            lowered,
            temp_renames,
            options,
            assembler: Assembler::new(),
            need_print_int: false,
            need_print_str: false,
        }
        .translate()
    }

    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("nasm");

        cmd.args([
            "-f",
            "elf64",
            "-o",
            output_file
                .to_str()
                .expect("Could not convert output_file to string"),
            input_file
                .to_str()
                .expect("Could not convert input_file to string"),
        ]);

        cmd
    }

    fn create_linker_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("x86_64-linux-gnu-gcc");

        cmd.args([
            "-nostdlib",
            "-ffreestanding",
            "-o",
            output_file
                .to_str()
                .expect("Could not convert output_file to string"),
            input_file
                .to_str()
                .expect("Could not convert input_file to string"),
        ]);

        cmd
    }
}

struct Emitter<'a> {
    lowered: &'a Lowered,
    temp_renames: &'a BTreeMap<String, String>,
    options: &'a CodegenOptions,
    assembler: Assembler,
    need_print_int: bool,
    need_print_str: bool,
}

impl Emitter<'_> {
    fn translate(mut self) -> Result<String, CodegenError> {
        // Helper needs are decided before anything is emitted because the
        // numeric helper owns a scratch buffer declared in the storage
        // section.
        for instruction in &self.lowered.code {
            if let Instruction::Print { kind, .. } = instruction {
                match kind {
                    PrintKind::Int => self.need_print_int = true,
                    PrintKind::String => self.need_print_str = true,
                }
            }
        }

        self.emit_storage_section();
        self.emit_constants_section();
        self.emit_program()?;
        self.emit_helpers();

        Ok(self.assembler.into_output())
    }

    fn emit_storage_section(&mut self) {
        self.assembler.push_line("section .bss");

        if self.need_print_int {
            self.assembler
                .emit(format!("{DIGIT_SPACE} resb {DIGIT_SPACE_LEN}"));
            self.assembler.emit(format!("{DIGIT_SPACE_POS} resb 1"));
        }

        // One uniform 8-byte slot per name, whether it holds an integer
        // value or a string address. Temporaries are table entries like any
        // other variable.
        for name in self.lowered.identifiers.keys() {
            self.assembler.emit(format!("{name} resb 8"));
        }

        self.assembler.blank_line();
    }

    fn emit_constants_section(&mut self) {
        self.assembler.push_line("section .data");
        self.assembler.emit(format!("{NEWLINE} db 10"));

        for (symbol, text) in &self.lowered.constants {
            self.assembler
                .emit(format!("{symbol} db {}, 0", format_nasm_string(text)));
        }

        self.assembler.blank_line();
    }

    fn emit_program(&mut self) -> Result<(), CodegenError> {
        self.assembler.push_line("section .text");
        self.assembler.emit("global _start");
        self.assembler.blank_line();
        self.assembler.label("_start");

        for instruction in &self.lowered.code {
            self.translate_instruction(instruction)?;
        }

        // exit(0) sits between the straight-line program and the helper
        // bodies
        self.assembler.emit("mov rax, 60");
        self.assembler.emit("mov rdi, 0");
        self.assembler.emit("syscall");

        Ok(())
    }

    /// One IR instruction becomes one straight-line block, with `rax` as
    /// the only transit point for values.
    fn translate_instruction(&mut self, instruction: &Instruction) -> Result<(), CodegenError> {
        if self.options.emit_comments {
            self.assembler
                .comment(strip_ansi_escapes::strip_str(instruction.to_string()));
        }

        match instruction {
            Instruction::Assign { dest, src, op } => {
                self.load_accumulator(src)?;

                if let Some((op, rhs)) = op {
                    let rhs = self.resolve(rhs)?;

                    match op {
                        BinaryOp::Add => self.assembler.emit(format!("add rax, {rhs}")),
                        BinaryOp::Subtract => self.assembler.emit(format!("sub rax, {rhs}")),
                        BinaryOp::Multiply => self.assembler.emit(format!("imul rax, {rhs}")),
                        BinaryOp::Divide => {
                            // idiv takes no immediate; stage the divisor in
                            // rbx
                            self.assembler.emit(format!("mov rbx, {rhs}"));
                            self.assembler.emit("cqo");
                            self.assembler.emit("idiv rbx");
                        }
                        BinaryOp::BitwiseAnd => self.assembler.emit(format!("and rax, {rhs}")),
                        BinaryOp::BitwiseOr => self.assembler.emit(format!("or rax, {rhs}")),
                        BinaryOp::BitwiseXor => self.assembler.emit(format!("xor rax, {rhs}")),
                    }
                }

                let dest = self.slot(dest)?;
                self.assembler.emit(format!("mov {dest}, rax"));
            }
            Instruction::Jump { target } => {
                self.assembler.emit(format!("jmp {target}"));
            }
            Instruction::Label { name } => {
                self.assembler.label(name);
            }
            Instruction::Compare {
                lhs,
                op,
                rhs,
                target,
            } => {
                // cmp cannot take an immediate as its primary operand
                self.load_accumulator(lhs)?;

                let rhs = self.resolve(rhs)?;
                self.assembler.emit(format!("cmp rax, {rhs}"));
                self.assembler
                    .emit(format!("{} {target}", jump_mnemonic(*op)));
            }
            Instruction::Print {
                kind: PrintKind::Int,
                value,
                ..
            } => {
                // the helper terminates the digits with a newline itself
                self.load_accumulator(value)?;
                self.assembler.emit(format!("call {PRINT_INT}"));
            }
            Instruction::Print {
                kind: PrintKind::String,
                value,
                newline,
            } => {
                self.load_accumulator(value)?;
                self.assembler.emit(format!("call {PRINT_STR}"));

                if *newline {
                    self.emit_newline_write();
                }
            }
        }

        Ok(())
    }

    fn emit_newline_write(&mut self) {
        self.assembler.emit("mov rax, 1");
        self.assembler.emit("mov rdi, 1");
        self.assembler.emit(format!("mov rsi, {NEWLINE}"));
        self.assembler.emit("mov rdx, 1");
        self.assembler.emit("syscall");
    }

    fn load_accumulator(&mut self, name: &str) -> Result<(), CodegenError> {
        let source = self.resolve(name)?;
        self.assembler.emit(format!("mov rax, {source}"));

        Ok(())
    }

    /// Renames, then classifies: integer literal -> immediate, constant
    /// symbol -> bare address, identifier -> storage slot. Anything else is
    /// a malformed operand and fails the compilation.
    fn resolve(&self, name: &str) -> Result<String, CodegenError> {
        let name = self.rename(name);

        if ir::is_int_literal(name) || self.lowered.constants.contains_key(name) {
            Ok(name.to_owned())
        } else if self.lowered.identifiers.contains_key(name) {
            Ok(format!("[{name}]"))
        } else {
            Err(CodegenError::UnresolvedOperand(name.to_owned()))
        }
    }

    /// An assignment destination must be a storage slot
    fn slot(&self, name: &str) -> Result<String, CodegenError> {
        let name = self.rename(name);

        if self.lowered.identifiers.contains_key(name) {
            Ok(format!("[{name}]"))
        } else {
            Err(CodegenError::UnresolvedOperand(name.to_owned()))
        }
    }

    fn rename<'n>(&'n self, name: &'n str) -> &'n str {
        self.temp_renames
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    fn emit_helpers(&mut self) {
        if self.need_print_int {
            self.assembler.blank_line();
            self.assembler.push_line(format!(
                indoc::indoc! {r"
                    {print_int}:
                        mov byte [{space} + {last}], 10
                        lea rsi, [{space} + {last}]
                        mov rbx, rax
                        cmp rax, 0
                        jge .convert
                        neg rax
                    .convert:
                        test rax, rax
                        jnz .next_digit
                        dec rsi
                        mov byte [rsi], '0'
                        jmp .sign
                    .next_digit:
                        test rax, rax
                        jz .sign
                        xor rdx, rdx
                        mov rcx, 10
                        div rcx
                        add dl, '0'
                        dec rsi
                        mov [rsi], dl
                        jmp .next_digit
                    .sign:
                        test rbx, rbx
                        jns .write
                        dec rsi
                        mov byte [rsi], '-'
                    .write:
                        lea rdx, [{space} + {len}]
                        sub rdx, rsi
                        mov [{pos}], dl
                        mov rax, 1
                        mov rdi, 1
                        syscall
                        ret"
                },
                print_int = PRINT_INT,
                space = DIGIT_SPACE,
                pos = DIGIT_SPACE_POS,
                last = DIGIT_SPACE_LEN - 1,
                len = DIGIT_SPACE_LEN,
            ));
        }

        if self.need_print_str {
            self.assembler.blank_line();
            self.assembler.push_line(format!(
                indoc::indoc! {r"
                    {print_str}:
                        mov rsi, rax
                        xor rdx, rdx
                    .count:
                        cmp byte [rsi + rdx], 0
                        je .write
                        inc rdx
                        jmp .count
                    .write:
                        mov rax, 1
                        mov rdi, 1
                        syscall
                        ret"
                },
                print_str = PRINT_STR,
            ));
        }
    }
}

fn jump_mnemonic(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Equals => "je",
        CompareOp::NotEquals => "jne",
        CompareOp::LessThan => "jl",
        CompareOp::LessThanOrEqualTo => "jle",
        CompareOp::GreaterThan => "jg",
        CompareOp::GreaterThanOrEqualTo => "jge",
    }
}

fn format_nasm_string(string: &str) -> String {
    let mut parts = Vec::new();

    let mut last = 0;
    for (index, matched) in string.match_indices(['\n', '\r', '"']) {
        if last != index {
            parts.push(format!("\"{}\"", &string[last..index]));
        }

        for b in matched.bytes() {
            parts.push(format!("0x{b:X}"));
        }

        last = index + matched.len();
    }
    if last < string.len() {
        parts.push(format!("\"{}\"", &string[last..]));
    }

    if parts.is_empty() {
        return "\"\"".to_owned();
    }

    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::parser::parse_str,
        middle::{lowering::lower, optimize::optimize},
    };

    fn emit(source: &str) -> String {
        let Lowered {
            code,
            identifiers,
            constants,
        } = lower(&parse_str(source)).expect("lowering should succeed");

        let lowered = Lowered {
            code: optimize(code).expect("optimization should succeed"),
            identifiers,
            constants,
        };

        CodeGeneratorX86_64LinuxGnu
            .translate_to_asm(&lowered, &BTreeMap::new(), &CodegenOptions::default())
            .expect("codegen should succeed")
    }

    #[test]
    fn emits_the_three_sections_in_order() {
        let assembly = emit("int x; x = 2 + 3; print(x);");

        let bss = assembly.find("section .bss").unwrap();
        let data = assembly.find("section .data").unwrap();
        let text = assembly.find("section .text").unwrap();

        assert!(bss < data && data < text);
    }

    #[test]
    fn folded_constants_load_as_immediates() {
        let assembly = emit("int x; x = 2 + 3; print(x);");

        assert!(assembly.contains("x resb 8"));
        assert!(assembly.contains("mov rax, 5"));
        assert!(assembly.contains("mov [x], rax"));
        assert!(assembly.contains("call __$print_int"));
    }

    #[test]
    fn numeric_printing_declares_the_scratch_buffer() {
        let assembly = emit("int x; x = 1; print(x);");

        assert!(assembly.contains("__$digit_space resb 21"));
        assert!(assembly.contains("__$digit_space_pos resb 1"));
        assert!(assembly.contains("__$print_int:"));
    }

    #[test]
    fn string_only_programs_omit_the_numeric_helper() {
        let assembly = emit("prints(\"hi\");");

        assert!(assembly.contains("S1 db \"hi\", 0"));
        assert!(assembly.contains("call __$print_str"));
        assert!(assembly.contains("mov rsi, __$newline"));
        assert!(!assembly.contains("__$print_int"));
        assert!(!assembly.contains("__$digit_space"));
    }

    #[test]
    fn empty_programs_emit_only_the_exit() {
        let assembly = emit("int x;");

        assert!(assembly.contains("mov rax, 60"));
        assert!(!assembly.contains("__$print_int"));
        assert!(!assembly.contains("__$print_str"));
    }

    #[test]
    fn compares_load_the_accumulator_first() {
        let assembly = emit("int x; x = 0; while (x < 3) { x = x + 1; } print(x);");

        assert!(assembly.contains("mov rax, [x]\n    cmp rax, 3\n    jl L2"));
        assert!(assembly.contains("jmp L1"));
        assert!(assembly.contains("L3:"));
    }

    #[test]
    fn division_stages_the_divisor_in_rbx() {
        let assembly = emit("int x, y; x = 9; y = x / 3; print(y);");

        assert!(assembly.contains("mov rbx, 3\n    cqo\n    idiv rbx"));
    }

    #[test]
    fn string_variables_hold_addresses() {
        let assembly = emit("string s; s = \"hey\"; print(s);");

        // the constant's address transits rax into the variable's slot
        assert!(assembly.contains("mov rax, S1\n    mov [s], rax"));
        assert!(assembly.contains("mov rax, [s]\n    call __$print_str"));
    }

    #[test]
    fn applies_the_temp_rename_map_before_classifying() {
        let lowered = Lowered {
            code: vec![Instruction::Assign {
                dest: "x".into(),
                src: "T9".into(),
                op: None,
            }],
            identifiers: BTreeMap::from([
                ("x".into(), crate::frontend::ast::VarType::Int),
                ("T1".into(), crate::frontend::ast::VarType::Int),
            ]),
            constants: BTreeMap::new(),
        };
        let renames = BTreeMap::from([("T9".into(), "T1".into())]);

        let assembly = CodeGeneratorX86_64LinuxGnu
            .translate_to_asm(&lowered, &renames, &CodegenOptions::default())
            .unwrap();

        assert!(assembly.contains("mov rax, [T1]"));
    }

    #[test]
    fn rejects_operands_missing_from_every_table() {
        let lowered = Lowered {
            code: vec![Instruction::Print {
                kind: PrintKind::Int,
                value: "ghost".into(),
                newline: true,
            }],
            identifiers: BTreeMap::new(),
            constants: BTreeMap::new(),
        };

        let result = CodeGeneratorX86_64LinuxGnu.translate_to_asm(
            &lowered,
            &BTreeMap::new(),
            &CodegenOptions::default(),
        );

        assert_eq!(
            result.unwrap_err(),
            CodegenError::UnresolvedOperand("ghost".into())
        );
    }

    #[test]
    fn comment_embedding_strips_the_colors() {
        let Lowered {
            code,
            identifiers,
            constants,
        } = lower(&parse_str("int x; x = 1; print(x);")).unwrap();

        let lowered = Lowered {
            code: optimize(code).unwrap(),
            identifiers,
            constants,
        };

        let assembly = CodeGeneratorX86_64LinuxGnu
            .translate_to_asm(
                &lowered,
                &BTreeMap::new(),
                &CodegenOptions { emit_comments: true },
            )
            .unwrap();

        assert!(assembly.contains("; x = 1"));
        assert!(!assembly.contains('\u{1b}'));
    }

    #[test]
    fn nasm_strings_escape_control_bytes() {
        assert_eq!(format_nasm_string("hi"), "\"hi\"");
        assert_eq!(format_nasm_string(""), "\"\"");
        assert_eq!(format_nasm_string("a\nb"), "\"a\", 0xA, \"b\"");
    }
}
