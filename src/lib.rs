//! fae: a small scripting language whose programs run as blocks of
//! stack-machine code, with copy-on-write values and cooperative tasks.

pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod host;
pub mod lexer;
pub mod ops;
pub mod types;
pub mod value;
pub mod vm;

pub use bytecode::Program;
pub use compiler::{CompileError, compile};
pub use value::Value;
pub use vm::{Machine, RuntimeError, VmError};
