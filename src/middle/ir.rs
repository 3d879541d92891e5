//! Linear three-address IR. In this form, loops and conditionals are
//! simplified to labels and jumps, and expression trees are flattened into an
//! ordered instruction sequence over named operands.
//!
//! Operands are plain names: a decimal integer literal, a source identifier,
//! a generated temporary (`T1`, `T2`, ...), or a generated string-constant
//! symbol (`S1`, `S2`, ...). Jump targets name generated labels (`L1`, ...).
//! The prefix shapes are load-bearing: passes and the code generator classify
//! operands by them without consulting the tables, so lowering rejects source
//! identifiers that collide with them.

use std::collections::BTreeMap;

use strum::Display;

use crate::frontend::ast::{BinaryOp, CompareOp, VarType};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `dest = src` when `op` is `None`, otherwise `dest = src OP rhs`
    Assign {
        dest: String,
        src: String,
        op: Option<(BinaryOp, String)>,
    },
    Jump {
        target: String,
    },
    /// A definition point; never itself branches
    Label {
        name: String,
    },
    /// Branches to `target` only when the comparison holds, otherwise falls
    /// through to the next instruction
    Compare {
        lhs: String,
        op: CompareOp,
        rhs: String,
        target: String,
    },
    Print {
        kind: PrintKind,
        value: String,
        newline: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PrintKind {
    Int,
    String,
}

/// A lowered program: the instruction sequence plus the symbol tables built
/// alongside it. The tables are read-only once lowering completes; dead-code
/// elimination deliberately never prunes them, so a removed variable keeps
/// its storage slot.
#[derive(Debug)]
pub struct Lowered {
    pub code: Vec<Instruction>,
    /// variable or temporary name -> declared kind
    pub identifiers: BTreeMap<String, VarType>,
    /// generated constant symbol -> literal text
    pub constants: BTreeMap<String, String>,
}

pub const TEMP_PREFIX: char = 'T';
pub const LABEL_PREFIX: char = 'L';
pub const STRING_PREFIX: char = 'S';

/// `-?[0-9]+`
pub fn is_int_literal(name: &str) -> bool {
    let digits = name.strip_prefix('-').unwrap_or(name);

    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

pub fn parse_int_literal(name: &str) -> Option<i64> {
    if !is_int_literal(name) {
        return None;
    }

    name.parse().ok()
}

fn has_generated_shape(name: &str, prefix: char) -> bool {
    let Some(digits) = name.strip_prefix(prefix) else {
        return false;
    };

    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_temp_name(name: &str) -> bool {
    has_generated_shape(name, TEMP_PREFIX)
}

/// Does this name look like any generated temporary, label, or string
/// constant? Used to keep source identifiers out of the reserved shapes.
pub fn is_generated_name(name: &str) -> bool {
    has_generated_shape(name, TEMP_PREFIX)
        || has_generated_shape(name, LABEL_PREFIX)
        || has_generated_shape(name, STRING_PREFIX)
}
