/*!
## Rust Machine Module

This Rust module is the BIPLAN machine: a decoder over the byte-coded
program, the host interface, and the interpreter that runs statements
against fixed preallocated buffers.

*/

/// Integer cell type used for variables and expression values.
pub type Cell = i32;
/// Opaque position in the byte-coded program, stable for jump-and-resume.
pub type Address = usize;

/// Number of integer variables.
pub const VARIABLES: usize = 64;
/// Number of string slots.
pub const STRINGS: usize = 32;
/// Width of each string slot and of the scratch buffer, delimiter included.
pub const STRING_MAX: usize = 96;
/// Maximum depth of nested for/while cycles.
pub const CYCLE_DEPTH: usize = 16;
/// Maximum depth of nested user-function calls.
pub const FUN_DEPTH: usize = 16;
/// Maximum number of indexed function definitions.
pub const MAX_FUNCTIONS: usize = 32;
/// Size of a definition's parameter table. The usable limit is one less.
pub const PARAMS: usize = 8;

mod decoder;
mod frame;
mod host;
mod runtime;
mod stack;
mod val;

pub use decoder::Decoder;
pub use host::Host;
pub use runtime::Interpreter;
