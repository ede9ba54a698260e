use super::{Address, Cell, PARAMS};

/// Saved state of one active `for` or `while` loop. Each kind carries
/// only the fields it needs.
#[derive(Debug, Clone, Copy)]
pub enum Cycle {
    For {
        /// First statement of the loop body; `next` jumps back here.
        address: Address,
        var_id: usize,
        /// Value the loop variable held before the loop, restored on exit.
        saved: Cell,
        to: Cell,
        up: bool,
    },
    While {
        /// Position of the `while` opcode itself; `redo` re-tests from here.
        address: Address,
    },
}

/// One shadowed global: the id a parameter bound and the value it held
/// at the call site.
#[derive(Debug, Clone, Copy, Default)]
pub struct Param {
    pub id: usize,
    pub value: Cell,
}

/// Saved state of one active user-function invocation. The saved
/// parameters are replayed in reverse on return, so a variable bound
/// twice still ends up with its pre-call value.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Position of the call's closing parenthesis; the call site resumes
    /// there and consumes it.
    pub ret: Address,
    pub saved: [Param; PARAMS],
    pub nsaved: usize,
}

impl Frame {
    pub fn new(ret: Address) -> Frame {
        Frame {
            ret,
            saved: [Param::default(); PARAMS],
            nsaved: 0,
        }
    }
}

/// Descriptor of one user function, indexed once at load time.
#[derive(Debug, Clone, Copy)]
pub struct Definition {
    /// Raw id byte from the stream, matched against call sites.
    pub id: u8,
    /// First token of the body.
    pub address: Address,
    /// Parameter id payload bytes in declaration order, still biased.
    pub params: [u8; PARAMS],
    pub nparams: usize,
}

impl Definition {
    pub fn new(id: u8) -> Definition {
        Definition {
            id,
            address: 0,
            params: [0; PARAMS],
            nparams: 0,
        }
    }
}
