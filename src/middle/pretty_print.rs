use colored::{ColoredString, Colorize};

use crate::middle::ir::{self, Instruction, Lowered};

pub fn pretty_print_ir(lowered: &Lowered) {
    for instruction in &lowered.code {
        if let Instruction::Label { name } = instruction {
            println!("{}", format!("{name}:").bright_red());
        } else {
            println!("    {instruction}");
        }
    }

    if !lowered.constants.is_empty() {
        println!();
        for (symbol, text) in &lowered.constants {
            println!("{} {} {:?}", operand(symbol), "=".white(), text);
        }
    }

    if !lowered.identifiers.is_empty() {
        println!();
        for (name, ty) in &lowered.identifiers {
            println!("{} {} {}", operand(name), ":".white(), ty.to_string().magenta());
        }
    }
}

// Literals render like immediates, generated names like registers
fn operand(name: &str) -> ColoredString {
    if ir::is_int_literal(name) {
        name.purple()
    } else if ir::is_generated_name(name) {
        name.yellow()
    } else {
        name.white()
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Assign { dest, src, op: None } => {
                write!(f, "{} {} {}", operand(dest), "=".white(), operand(src))
            }
            Instruction::Assign {
                dest,
                src,
                op: Some((op, rhs)),
            } => {
                write!(
                    f,
                    "{} {} {} {} {}",
                    operand(dest),
                    "=".white(),
                    operand(src),
                    op.to_string().white(),
                    operand(rhs)
                )
            }
            Instruction::Jump { target } => {
                write!(f, "{} {}", "jmp".cyan(), target.blue())
            }
            Instruction::Label { name } => write!(f, "{}:", name.bright_red()),
            Instruction::Compare {
                lhs,
                op,
                rhs,
                target,
            } => {
                write!(
                    f,
                    "{} {} {} {} {} {}",
                    "cmp".cyan(),
                    operand(lhs),
                    op.to_string().white(),
                    operand(rhs),
                    "->".white(),
                    target.blue()
                )
            }
            Instruction::Print {
                kind,
                value,
                newline,
            } => {
                write!(
                    f,
                    "{} {} {}",
                    "print".cyan(),
                    kind.to_string().magenta(),
                    operand(value)
                )?;

                if *newline {
                    write!(f, " {}", "nl".white())?;
                }

                Ok(())
            }
        }
    }
}
