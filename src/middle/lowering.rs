//! Lowers the syntax tree into the linear IR, building the identifier and
//! constant tables as it walks. Integer arithmetic over two literal operands
//! is folded here, at lowering time; a folded subexpression never reaches
//! the IR.

use std::collections::BTreeMap;

use crate::{
    frontend::ast::{
        self, BinaryOp, Condition, Expression, IfStatement, PrintStatement, Statement, VarType,
        WhileStatement,
    },
    middle::ir::{self, Instruction, Lowered, PrintKind},
};

#[derive(Debug, PartialEq, Eq)]
pub enum LoweringError {
    /// `expr / 0` with a literal zero divisor, caught while folding
    DivisionByZero,
    /// A declared identifier collides with the generated `T`/`L`/`S` name
    /// shapes the rest of the pipeline classifies operands by
    ReservedName(String),
}

impl core::fmt::Display for LoweringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoweringError::DivisionByZero => {
                write!(f, "division by a constant zero")
            }
            LoweringError::ReservedName(name) => {
                write!(
                    f,
                    "identifier `{name}` collides with the compiler's reserved name shapes"
                )
            }
        }
    }
}

impl std::error::Error for LoweringError {}

/// Walks the program once, producing the raw IR sequence and its tables.
/// All counters and tables live in the per-call context, so every
/// compilation starts from a clean slate.
pub fn lower(program: &ast::Program) -> Result<Lowered, LoweringError> {
    let mut lowering = Lowering::default();

    lowering.lower_body(&program.statements)?;

    Ok(lowering.into_output())
}

#[derive(Debug, Default)]
struct Lowering {
    code: Vec<Instruction>,
    identifiers: BTreeMap<String, VarType>,
    constants: BTreeMap<String, String>,
    temp_counter: u32,
    label_counter: u32,
    string_counter: u32,
}

impl Lowering {
    fn next_temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("{}{}", ir::TEMP_PREFIX, self.temp_counter)
    }

    fn next_label(&mut self) -> String {
        self.label_counter += 1;
        format!("{}{}", ir::LABEL_PREFIX, self.label_counter)
    }

    fn next_string_symbol(&mut self) -> String {
        self.string_counter += 1;
        format!("{}{}", ir::STRING_PREFIX, self.string_counter)
    }

    fn push(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn into_output(self) -> Lowered {
        Lowered {
            code: self.code,
            identifiers: self.identifiers,
            constants: self.constants,
        }
    }

    fn intern_string(&mut self, text: &str) -> String {
        let symbol = self.next_string_symbol();
        self.constants.insert(symbol.clone(), text.to_owned());
        symbol
    }

    fn is_string_value(&self, name: &str) -> bool {
        self.constants.contains_key(name)
            || self.identifiers.get(name) == Some(&VarType::String)
    }

    // Unknown names classify as int; this keeps the generated program
    // permissive about operands the tables have no opinion on.
    fn is_int_value(&self, name: &str) -> bool {
        ir::is_int_literal(name)
            || self.identifiers.get(name) == Some(&VarType::Int)
            || !self.constants.contains_key(name)
    }

    fn lower_body(&mut self, statements: &[Statement]) -> Result<(), LoweringError> {
        for statement in statements {
            self.lower_statement(statement)?;
        }

        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), LoweringError> {
        match statement {
            Statement::Declaration(declaration) => {
                for name in &declaration.names {
                    if ir::is_generated_name(name) {
                        return Err(LoweringError::ReservedName(name.clone()));
                    }

                    self.identifiers.insert(name.clone(), declaration.ty);
                }

                Ok(())
            }
            Statement::Assignment(assignment) => {
                let src = self.lower_expression(&assignment.value)?;

                self.push(Instruction::Assign {
                    dest: assignment.target.clone(),
                    src,
                    op: None,
                });

                Ok(())
            }
            Statement::If(if_statement) => self.lower_if(if_statement),
            Statement::While(while_statement) => self.lower_while(while_statement),
            Statement::Print(print_statement) => self.lower_print(print_statement),
        }
    }

    /// Lowers an expression to an operand name. Leaves never emit an
    /// instruction; a binary operation over two integer literals folds to
    /// its result, also without emitting.
    fn lower_expression(&mut self, expression: &Expression) -> Result<String, LoweringError> {
        match expression {
            Expression::Number(text) => Ok(text.clone()),
            Expression::Identifier(name) => Ok(name.clone()),
            Expression::StringLiteral(text) => Ok(self.intern_string(text)),
            Expression::Binary { lhs, op, rhs } => {
                let lhs = self.lower_expression(lhs)?;
                let rhs = self.lower_expression(rhs)?;

                self.lower_binary_operands(lhs, *op, rhs)
            }
        }
    }

    fn lower_binary_operands(
        &mut self,
        lhs: String,
        op: BinaryOp,
        rhs: String,
    ) -> Result<String, LoweringError> {
        if let (Some(left), Some(right)) =
            (ir::parse_int_literal(&lhs), ir::parse_int_literal(&rhs))
        {
            return Ok(fold_constants(left, op, right)?.to_string());
        }

        let temp = self.next_temp();
        self.identifiers.insert(temp.clone(), VarType::Int);

        self.push(Instruction::Assign {
            dest: temp.clone(),
            src: lhs,
            op: Some((op, rhs)),
        });

        Ok(temp)
    }

    fn lower_condition(
        &mut self,
        condition: &Condition,
        target: String,
    ) -> Result<(), LoweringError> {
        let lhs = self.lower_expression(&condition.lhs)?;
        let rhs = self.lower_expression(&condition.rhs)?;

        self.push(Instruction::Compare {
            lhs,
            op: condition.op,
            rhs,
            target,
        });

        Ok(())
    }

    // A compare that holds jumps to the then-label; falling through (the
    // false case) hits the jump that skips the body.
    fn lower_if(&mut self, if_statement: &IfStatement) -> Result<(), LoweringError> {
        if let Some(else_body) = &if_statement.else_body {
            let then_label = self.next_label();
            let else_label = self.next_label();
            let end_label = self.next_label();

            self.lower_condition(&if_statement.condition, then_label.clone())?;
            self.push(Instruction::Jump {
                target: else_label.clone(),
            });

            self.push(Instruction::Label { name: then_label });
            self.lower_body(&if_statement.then_body)?;
            self.push(Instruction::Jump {
                target: end_label.clone(),
            });

            self.push(Instruction::Label { name: else_label });
            self.lower_body(else_body)?;

            self.push(Instruction::Label { name: end_label });
        } else {
            let then_label = self.next_label();
            let end_label = self.next_label();

            self.lower_condition(&if_statement.condition, then_label.clone())?;
            self.push(Instruction::Jump {
                target: end_label.clone(),
            });

            self.push(Instruction::Label { name: then_label });
            self.lower_body(&if_statement.then_body)?;

            self.push(Instruction::Label { name: end_label });
        }

        Ok(())
    }

    fn lower_while(&mut self, while_statement: &WhileStatement) -> Result<(), LoweringError> {
        let start_label = self.next_label();
        let body_label = self.next_label();
        let end_label = self.next_label();

        self.push(Instruction::Label {
            name: start_label.clone(),
        });
        self.lower_condition(&while_statement.condition, body_label.clone())?;
        self.push(Instruction::Jump {
            target: end_label.clone(),
        });

        self.push(Instruction::Label { name: body_label });
        self.lower_body(&while_statement.body)?;
        self.push(Instruction::Jump {
            target: start_label,
        });

        self.push(Instruction::Label { name: end_label });

        Ok(())
    }

    fn lower_print(&mut self, print_statement: &PrintStatement) -> Result<(), LoweringError> {
        let expression = match print_statement {
            PrintStatement::Literal(text) => {
                let symbol = self.intern_string(text);

                self.push(Instruction::Print {
                    kind: PrintKind::String,
                    value: symbol,
                    newline: true,
                });

                return Ok(());
            }
            PrintStatement::Expression(expression) => expression,
        };

        let value = if let Expression::Binary {
            lhs,
            op: BinaryOp::Add,
            rhs,
        } = expression
        {
            // String/number concatenation: a `+` of a string-typed operand
            // and an int-typed operand prints as two pieces, the string part
            // without a trailing newline and the numeric part with one.
            let lhs = self.lower_expression(lhs)?;
            let rhs = self.lower_expression(rhs)?;

            let concat = if self.is_string_value(&lhs) && self.is_int_value(&rhs) {
                Some((lhs.clone(), rhs.clone()))
            } else if self.is_int_value(&lhs) && self.is_string_value(&rhs) {
                Some((rhs.clone(), lhs.clone()))
            } else {
                None
            };

            if let Some((string_part, int_part)) = concat {
                self.push(Instruction::Print {
                    kind: PrintKind::String,
                    value: string_part,
                    newline: false,
                });
                self.push(Instruction::Print {
                    kind: PrintKind::Int,
                    value: int_part,
                    newline: true,
                });

                return Ok(());
            }

            self.lower_binary_operands(lhs, BinaryOp::Add, rhs)?
        } else {
            self.lower_expression(expression)?
        };

        let kind = if self.is_string_value(&value) {
            PrintKind::String
        } else {
            PrintKind::Int
        };

        self.push(Instruction::Print {
            kind,
            value,
            newline: true,
        });

        Ok(())
    }
}

fn fold_constants(lhs: i64, op: BinaryOp, rhs: i64) -> Result<i64, LoweringError> {
    Ok(match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Subtract => lhs.wrapping_sub(rhs),
        BinaryOp::Multiply => lhs.wrapping_mul(rhs),
        BinaryOp::Divide => {
            if rhs == 0 {
                return Err(LoweringError::DivisionByZero);
            }

            lhs.wrapping_div(rhs)
        }
        BinaryOp::BitwiseAnd => lhs & rhs,
        BinaryOp::BitwiseOr => lhs | rhs,
        BinaryOp::BitwiseXor => lhs ^ rhs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{ast::CompareOp, parser::parse_str};

    fn lower_str(source: &str) -> Lowered {
        lower(&parse_str(source)).expect("lowering should succeed")
    }

    #[test]
    fn folds_literal_arithmetic_to_a_single_copy() {
        let lowered = lower_str("int x; x = 2 + 3; print(x);");

        assert_eq!(
            lowered.code,
            [
                Instruction::Assign {
                    dest: "x".into(),
                    src: "5".into(),
                    op: None,
                },
                Instruction::Print {
                    kind: PrintKind::Int,
                    value: "x".into(),
                    newline: true,
                },
            ]
        );
    }

    #[test]
    fn folds_nested_literal_expressions_without_temporaries() {
        // (2 + 3) * 4 - 6 / 2 == 17, all folded during the walk
        let lowered = lower_str("int x; x = (2 + 3) * 4 - 6 / 2;");

        assert_eq!(
            lowered.code,
            [Instruction::Assign {
                dest: "x".into(),
                src: "17".into(),
                op: None,
            }]
        );
        assert!(lowered.identifiers.keys().all(|name| name == "x"));
    }

    #[test]
    fn allocates_temporaries_for_non_literal_arithmetic() {
        let lowered = lower_str("int x, y; y = x + 1;");

        assert_eq!(
            lowered.code,
            [
                Instruction::Assign {
                    dest: "T1".into(),
                    src: "x".into(),
                    op: Some((BinaryOp::Add, "1".into())),
                },
                Instruction::Assign {
                    dest: "y".into(),
                    src: "T1".into(),
                    op: None,
                },
            ]
        );
        assert_eq!(lowered.identifiers.get("T1"), Some(&VarType::Int));
    }

    #[test]
    fn lowers_while_to_the_canonical_label_shape() {
        let lowered = lower_str("int x; x = 0; while (x < 3) { x = x + 1; } print(x);");

        assert_eq!(
            lowered.code,
            [
                Instruction::Assign {
                    dest: "x".into(),
                    src: "0".into(),
                    op: None,
                },
                Instruction::Label { name: "L1".into() },
                Instruction::Compare {
                    lhs: "x".into(),
                    op: CompareOp::LessThan,
                    rhs: "3".into(),
                    target: "L2".into(),
                },
                Instruction::Jump {
                    target: "L3".into(),
                },
                Instruction::Label { name: "L2".into() },
                Instruction::Assign {
                    dest: "T1".into(),
                    src: "x".into(),
                    op: Some((BinaryOp::Add, "1".into())),
                },
                Instruction::Assign {
                    dest: "x".into(),
                    src: "T1".into(),
                    op: None,
                },
                Instruction::Jump {
                    target: "L1".into(),
                },
                Instruction::Label { name: "L3".into() },
                Instruction::Print {
                    kind: PrintKind::Int,
                    value: "x".into(),
                    newline: true,
                },
            ]
        );
    }

    #[test]
    fn lowers_if_else_with_then_else_end_labels() {
        let lowered = lower_str("int x; if (x == 1) { x = 2; } else { x = 3; }");

        assert_eq!(
            lowered.code,
            [
                Instruction::Compare {
                    lhs: "x".into(),
                    op: CompareOp::Equals,
                    rhs: "1".into(),
                    target: "L1".into(),
                },
                Instruction::Jump {
                    target: "L2".into(),
                },
                Instruction::Label { name: "L1".into() },
                Instruction::Assign {
                    dest: "x".into(),
                    src: "2".into(),
                    op: None,
                },
                Instruction::Jump {
                    target: "L3".into(),
                },
                Instruction::Label { name: "L2".into() },
                Instruction::Assign {
                    dest: "x".into(),
                    src: "3".into(),
                    op: None,
                },
                Instruction::Label { name: "L3".into() },
            ]
        );
    }

    #[test]
    fn lowers_prints_to_a_fresh_constant_symbol() {
        let lowered = lower_str("prints(\"hi\");");

        assert_eq!(
            lowered.code,
            [Instruction::Print {
                kind: PrintKind::String,
                value: "S1".into(),
                newline: true,
            }]
        );
        assert_eq!(lowered.constants.get("S1").map(String::as_str), Some("hi"));
    }

    #[test]
    fn lowers_string_plus_int_print_as_two_pieces() {
        let lowered = lower_str("int n; n = 7; print(\"count: \" + n);");

        assert_eq!(
            lowered.code[1..],
            [
                Instruction::Print {
                    kind: PrintKind::String,
                    value: "S1".into(),
                    newline: false,
                },
                Instruction::Print {
                    kind: PrintKind::Int,
                    value: "n".into(),
                    newline: true,
                },
            ]
        );
    }

    #[test]
    fn lowers_int_plus_string_print_with_the_string_part_first() {
        let lowered = lower_str("int n; n = 7; print(n + \" items\");");

        assert_eq!(
            lowered.code[1..],
            [
                Instruction::Print {
                    kind: PrintKind::String,
                    value: "S1".into(),
                    newline: false,
                },
                Instruction::Print {
                    kind: PrintKind::Int,
                    value: "n".into(),
                    newline: true,
                },
            ]
        );
    }

    #[test]
    fn prints_declared_string_variables_as_strings() {
        let lowered = lower_str("string s; s = \"hey\"; print(s);");

        assert_eq!(
            lowered.code,
            [
                Instruction::Assign {
                    dest: "s".into(),
                    src: "S1".into(),
                    op: None,
                },
                Instruction::Print {
                    kind: PrintKind::String,
                    value: "s".into(),
                    newline: true,
                },
            ]
        );
    }

    #[test]
    fn rejects_division_by_literal_zero() {
        let result = lower(&parse_str("int x; x = 1 / 0;"));

        assert_eq!(result.unwrap_err(), LoweringError::DivisionByZero);
    }

    #[test]
    fn rejects_identifiers_shaped_like_generated_names() {
        let result = lower(&parse_str("int T1;"));

        assert_eq!(
            result.unwrap_err(),
            LoweringError::ReservedName("T1".into())
        );
    }
}
