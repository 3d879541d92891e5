//! IR-to-IR optimization passes. Each pass is a pure function from one
//! instruction sequence to a new one, applied exactly once, in a fixed
//! order. None of them touch the identifier or constant tables: a removed
//! assignment's destination keeps its table entry (and storage slot).

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::ast::CompareOp,
    middle::ir::{self, Instruction},
};

#[derive(Debug, PartialEq, Eq)]
pub enum OptimizeError {
    /// A jump or compare names a label that is not defined anywhere in the
    /// sequence
    MissingLabel(String),
}

impl core::fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizeError::MissingLabel(target) => {
                write!(f, "jump target `{target}` has no matching label")
            }
        }
    }
}

impl std::error::Error for OptimizeError {}

/// Runs the whole pipeline over a lowered instruction sequence.
pub fn optimize(code: Vec<Instruction>) -> Result<Vec<Instruction>, OptimizeError> {
    let code = fold_constant_compares(code);
    let code = eliminate_unreachable(code)?;
    let code = inline_temp_copies(code);
    let code = eliminate_dead_assignments(code);
    let code = remove_trivial_jumps(code);
    let code = strip_unused_labels(code);

    // Stripping jumps and labels can orphan whole blocks, so reachability
    // runs once more over the cleaned sequence.
    eliminate_unreachable(code)
}

/// Evaluates compares whose operands are both integer literals. A compare
/// that always holds becomes an unconditional jump, swallowing the
/// else-skip jump lowering placed after it; one that never holds is dropped
/// so that same jump takes over.
fn fold_constant_compares(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut result = Vec::with_capacity(code.len());
    let mut iter = code.into_iter().peekable();

    while let Some(instruction) = iter.next() {
        match instruction {
            Instruction::Compare {
                lhs,
                op,
                rhs,
                target,
            } => match (ir::parse_int_literal(&lhs), ir::parse_int_literal(&rhs)) {
                (Some(left), Some(right)) => {
                    if evaluate_compare(left, op, right) {
                        if matches!(iter.peek(), Some(Instruction::Jump { .. })) {
                            iter.next();
                        }

                        result.push(Instruction::Jump { target });
                    }
                }
                _ => result.push(Instruction::Compare {
                    lhs,
                    op,
                    rhs,
                    target,
                }),
            },
            other => result.push(other),
        }
    }

    result
}

fn evaluate_compare(lhs: i64, op: CompareOp, rhs: i64) -> bool {
    match op {
        CompareOp::Equals => lhs == rhs,
        CompareOp::NotEquals => lhs != rhs,
        CompareOp::LessThan => lhs < rhs,
        CompareOp::LessThanOrEqualTo => lhs <= rhs,
        CompareOp::GreaterThan => lhs > rhs,
        CompareOp::GreaterThanOrEqualTo => lhs >= rhs,
    }
}

/// Keeps only instructions reachable from index 0. A jump contributes an
/// edge to its target, a compare to both its target and the fallthrough,
/// and everything else to the next instruction.
fn eliminate_unreachable(code: Vec<Instruction>) -> Result<Vec<Instruction>, OptimizeError> {
    let label_indices: HashMap<String, usize> = code
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::Label { name } => Some((name.clone(), index)),
            _ => None,
        })
        .collect();

    let index_of = |target: &str| {
        label_indices
            .get(target)
            .copied()
            .ok_or_else(|| OptimizeError::MissingLabel(target.to_owned()))
    };

    let mut reachable = vec![false; code.len()];
    let mut worklist = vec![0usize];

    while let Some(index) = worklist.pop() {
        if index >= code.len() || reachable[index] {
            continue;
        }

        reachable[index] = true;

        match &code[index] {
            Instruction::Jump { target } => worklist.push(index_of(target)?),
            Instruction::Compare { target, .. } => {
                worklist.push(index + 1);
                worklist.push(index_of(target)?);
            }
            _ => worklist.push(index + 1),
        }
    }

    Ok(code
        .into_iter()
        .zip(reachable)
        .filter_map(|(instruction, keep)| keep.then_some(instruction))
        .collect())
}

/// Peephole over adjacent pairs: `T = a OP b` directly followed by the pure
/// copy `x = T` collapses into `x = a OP b` when `T` is a generated
/// temporary. Both instructions are consumed.
fn inline_temp_copies(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut result = Vec::with_capacity(code.len());
    let mut iter = code.into_iter().peekable();

    while let Some(instruction) = iter.next() {
        if let Instruction::Assign {
            dest: temp,
            src,
            op: op @ Some(_),
        } = &instruction
        {
            if ir::is_temp_name(temp) {
                if let Some(Instruction::Assign {
                    dest,
                    src: copied,
                    op: None,
                }) = iter.peek()
                {
                    if copied == temp {
                        let merged = Instruction::Assign {
                            dest: dest.clone(),
                            src: src.clone(),
                            op: op.clone(),
                        };

                        iter.next();
                        result.push(merged);
                        continue;
                    }
                }
            }
        }

        result.push(instruction);
    }

    result
}

/// Drops assignments whose destination is never read anywhere in the
/// sequence. Flow-insensitive by design: one read anywhere keeps every
/// assignment to that name alive, which over-retains but never wrongly
/// removes a definition.
fn eliminate_dead_assignments(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut read = HashSet::new();

    for instruction in &code {
        match instruction {
            Instruction::Assign { src, op, .. } => {
                read.insert(src.clone());

                if let Some((_, rhs)) = op {
                    read.insert(rhs.clone());
                }
            }
            Instruction::Compare { lhs, rhs, .. } => {
                read.insert(lhs.clone());
                read.insert(rhs.clone());
            }
            Instruction::Print { value, .. } => {
                read.insert(value.clone());
            }
            Instruction::Jump { .. } | Instruction::Label { .. } => {}
        }
    }

    code.into_iter()
        .filter(|instruction| match instruction {
            Instruction::Assign { dest, .. } => read.contains(dest),
            _ => true,
        })
        .collect()
}

/// A jump to the label on the very next instruction is a no-op.
fn remove_trivial_jumps(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut result = Vec::with_capacity(code.len());
    let mut iter = code.into_iter().peekable();

    while let Some(instruction) = iter.next() {
        if let Instruction::Jump { target } = &instruction {
            if matches!(iter.peek(), Some(Instruction::Label { name }) if name == target) {
                continue;
            }
        }

        result.push(instruction);
    }

    result
}

/// Drops label definitions no remaining jump or compare refers to.
fn strip_unused_labels(code: Vec<Instruction>) -> Vec<Instruction> {
    let referenced: HashSet<String> = code
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Jump { target } | Instruction::Compare { target, .. } => {
                Some(target.clone())
            }
            _ => None,
        })
        .collect();

    code.into_iter()
        .filter(|instruction| match instruction {
            Instruction::Label { name } => referenced.contains(name),
            _ => true,
        })
        .collect()
}
