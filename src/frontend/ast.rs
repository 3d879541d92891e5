use strum::{Display, EnumString};

/// A parsed Rill program: an ordered sequence of top-level statements.
#[derive(Debug)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub enum Statement {
    Declaration(Declaration),
    Assignment(Assignment),
    If(IfStatement),
    While(WhileStatement),
    Print(PrintStatement),
}

#[derive(Debug)]
pub struct Declaration {
    pub ty: VarType,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VarType {
    Int,
    String,
}

#[derive(Debug)]
pub struct Assignment {
    pub target: String,
    pub value: Expression,
}

#[derive(Debug)]
pub struct IfStatement {
    pub condition: Condition,
    pub then_body: Vec<Statement>,
    pub else_body: Option<Vec<Statement>>,
}

#[derive(Debug)]
pub struct WhileStatement {
    pub condition: Condition,
    pub body: Vec<Statement>,
}

#[derive(Debug)]
pub enum PrintStatement {
    /// `prints("...")`: a bare string literal, printed with a trailing
    /// newline
    Literal(String),
    /// `print(expr)`
    Expression(Expression),
}

/// A single comparison between two arithmetic expressions. Conditions are
/// not general expressions in Rill; they only appear in `if`/`while` heads.
#[derive(Debug)]
pub struct Condition {
    pub lhs: Expression,
    pub op: CompareOp,
    pub rhs: Expression,
}

#[derive(Debug)]
pub enum Expression {
    /// Integer literal, kept as its decimal source text
    Number(String),
    Identifier(String),
    StringLiteral(String),
    Binary {
        lhs: Box<Expression>,
        op: BinaryOp,
        rhs: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "&")]
    BitwiseAnd,
    #[strum(serialize = "|")]
    BitwiseOr,
    #[strum(serialize = "^")]
    BitwiseXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum CompareOp {
    #[strum(serialize = "==")]
    Equals,
    #[strum(serialize = "!=")]
    NotEquals,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqualTo,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqualTo,
}
