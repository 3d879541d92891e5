//! The middle of the compiler: the syntax tree is lowered into a linear
//! three-address IR, then a fixed sequence of IR-to-IR passes prunes and
//! simplifies it before code generation.

pub mod ir;
pub mod lowering;
pub mod optimize;
pub mod pretty_print;
