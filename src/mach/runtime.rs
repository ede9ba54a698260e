use super::decoder::Decoder;
use super::frame::{Cycle, Definition, Frame, Param};
use super::host::Host;
use super::stack::Stack;
use super::val::Val;
use super::Cell;
use super::{CYCLE_DEPTH, FUN_DEPTH, MAX_FUNCTIONS, PARAMS, STRINGS, STRING_MAX, VARIABLES};
use crate::error;
use crate::lang::{Error, ErrorKind, Op, ADDRESS_OFFSET};

type Result<T> = std::result::Result<T, Error>;

/// ## The BIPLAN interpreter
///
/// Walks a byte-coded program one statement per [`Interpreter::run`] call,
/// evaluating expressions by recursive descent and executing control flow
/// by jumping the decoder. All working memory is preallocated: integer
/// variables, string slots, the cycle and call frame stacks and the
/// function definition table are fixed arrays sized by the `mach`
/// constants. Nothing is allocated after construction.
///
/// Errors are fatal. The first one is reported through [`Host::error`]
/// with the stream position and a stable kind, after which the machine is
/// [`Interpreter::finished`] and `run` does nothing.
pub struct Interpreter<'p, H: Host> {
    decoder: Decoder<'p>,
    host: H,
    variables: [Cell; VARIABLES],
    strings: [[u8; STRING_MAX]; STRINGS],
    scratch: [u8; STRING_MAX],
    cycles: Stack<Cycle>,
    frames: Stack<Frame>,
    definitions: Vec<Definition>,
    /// Cycle stack depth at entry to the innermost running function,
    /// restored on return so a `return` inside a loop unwinds the loop
    /// bookkeeping with it.
    fun_cycle_id: usize,
    ended: bool,
}

impl<'p, H: Host> Interpreter<'p, H> {
    /// Bind a program and a host. Function definitions are indexed here,
    /// in one pass over the stream, before anything runs.
    pub fn new(program: &'p [u8], host: H) -> Interpreter<'p, H> {
        Interpreter {
            definitions: index_definitions(program),
            decoder: Decoder::new(program),
            host,
            variables: [0; VARIABLES],
            strings: [[0; STRING_MAX]; STRINGS],
            scratch: [0; STRING_MAX],
            cycles: Stack::new(CYCLE_DEPTH),
            frames: Stack::new(FUN_DEPTH),
            fun_cycle_id: 0,
            ended: false,
        }
    }

    /// Execute at most one statement. A no-op once finished; on error the
    /// host callback fires once and the machine halts.
    pub fn run(&mut self) {
        if self.finished() {
            return;
        }
        if let Err(error) = self.statement() {
            self.host.error(error.position(), error.kind());
            self.ended = true;
        }
    }

    pub fn finished(&self) -> bool {
        self.ended || self.decoder.finished()
    }

    /// Rewind to the program start and clear both frame stacks. Variable
    /// and string contents survive, as they do on the wire protocol's
    /// `restart` statement.
    pub fn restart(&mut self) {
        self.cycles.clear();
        self.frames.clear();
        self.fun_cycle_id = 0;
        self.ended = false;
        self.decoder.rewind();
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /* STREAM DISCIPLINE ---------------------------------------------- */

    fn expect(&mut self, op: Op) -> Result<()> {
        if self.decoder.peek() == op {
            self.decoder.advance();
            Ok(())
        } else {
            Err(error!(Symbol; self.decoder.position()))
        }
    }

    fn ignore(&mut self, op: Op) -> bool {
        if self.decoder.peek() == op {
            self.decoder.advance();
            true
        } else {
            false
        }
    }

    /* STATE ACCESS --------------------------------------------------- */

    fn get_variable(&self, n: Cell) -> Result<Cell> {
        if n >= 0 && (n as usize) < VARIABLES {
            Ok(self.variables[n as usize])
        } else {
            Err(error!(VariableGet; self.decoder.position()))
        }
    }

    fn set_variable(&mut self, n: Cell, v: Cell) -> Result<()> {
        if n >= 0 && (n as usize) < VARIABLES {
            self.variables[n as usize] = v;
            Ok(())
        } else {
            Err(error!(VariableSet; self.decoder.position()))
        }
    }

    fn slot_index(&self, id: Cell, kind: ErrorKind) -> Result<usize> {
        if id >= 0 && (id as usize) < STRINGS {
            Ok(id as usize)
        } else {
            Err(Error::new(kind, self.decoder.position()))
        }
    }

    fn string_byte(&self, id: Cell, i: Cell) -> Result<u8> {
        let si = self.slot_index(id, ErrorKind::VariableGet)?;
        if i >= 0 && (i as usize) < STRING_MAX {
            Ok(self.strings[si][i as usize])
        } else {
            Err(error!(VariableGet; self.decoder.position()))
        }
    }

    fn string_byte_set(&mut self, id: Cell, i: Cell, b: u8) -> Result<()> {
        let si = self.slot_index(id, ErrorKind::VariableSet)?;
        if i >= 0 && (i as usize) < STRING_MAX {
            self.strings[si][i as usize] = b;
            Ok(())
        } else {
            Err(error!(VariableSet; self.decoder.position()))
        }
    }

    /* EXPRESSION EVALUATOR ------------------------------------------- */

    /// Count a run of `++`/`--` tokens, net delta.
    fn unary(&mut self) -> Cell {
        let mut u = 0;
        loop {
            match self.decoder.peek() {
                Op::Increment => u += 1,
                Op::Decrement => u -= 1,
                _ => return u,
            }
            self.decoder.advance();
        }
    }

    /// Identifier primary: an integer variable, a string slot reference,
    /// or a subscripted string byte, with pre/post increment applied to
    /// the referenced variable. The returned value carries the pre-delta
    /// but not the post-delta.
    fn var_factor(&mut self) -> Result<Val> {
        let pre = self.unary();
        let leading = self.decoder.peek();
        self.decoder.advance();
        let id = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
        let val = if leading == Op::Address {
            Val::Int(self.get_variable(id)?)
        } else if self.decoder.peek() == Op::Access {
            self.decoder.advance();
            let ci = self.expression()?.cell();
            let b = self.string_byte(id, ci)?;
            self.expect(Op::AccessEnd)?;
            Val::Byte(b)
        } else {
            Val::Slot(id as u8)
        };
        let post = self.unary();
        if pre != 0 || post != 0 {
            self.set_variable(id, val.cell().wrapping_add(pre).wrapping_add(post))?;
        }
        let v = val.cell().wrapping_add(pre);
        Ok(match val {
            Val::Int(_) => Val::Int(v),
            Val::Slot(_) => Val::Slot(v as u8),
            Val::Byte(_) => Val::Byte(v as u8),
        })
    }

    fn factor(&mut self) -> Result<Val> {
        let complement = self.ignore(Op::BitwiseNot);
        let v = match self.decoder.peek() {
            Op::VarAccess => {
                self.decoder.advance();
                let vi = self.relation()?.cell();
                let v = self.get_variable(vi)?;
                self.expect(Op::AccessEnd)?;
                Val::Int(v)
            }
            Op::StrAccess => {
                self.decoder.advance();
                let si = self.relation()?.cell();
                self.expect(Op::AccessEnd)?;
                Val::Slot(si as u8)
            }
            Op::Number => {
                let v = self.decoder.number();
                self.expect(Op::Number)?;
                Val::Int(v)
            }
            Op::Dread => {
                self.decoder.advance();
                let pin = self.expression()?.cell();
                Val::Int(self.host.digital_read(pin))
            }
            Op::Millis => {
                self.decoder.advance();
                Val::Int(self.host.millis().rem_euclid(32767))
            }
            Op::AGet => {
                self.decoder.advance();
                let pin = self.expression()?.cell();
                Val::Int(self.host.analog_read(pin))
            }
            Op::Rnd => {
                self.decoder.advance();
                self.random_call()?
            }
            Op::Sqrt => {
                self.decoder.advance();
                let v = self.expression()?.cell();
                Val::Int(self.host.sqrt_int(v))
            }
            Op::Function => {
                let v = self.function_call()?;
                self.decoder.advance(); // the call's closing parenthesis
                Val::Int(v)
            }
            Op::SerialRx => {
                let v = self.host.serial_read();
                self.decoder.advance();
                Val::Int(v)
            }
            Op::Input => {
                let v = self.host.input();
                self.decoder.advance();
                Val::Int(v)
            }
            Op::InputAv => {
                let v = self.host.input_available();
                self.decoder.advance();
                Val::Int(v)
            }
            Op::SerialAv => {
                let v = self.host.serial_available();
                self.decoder.advance();
                Val::Int(v)
            }
            Op::LRParent => {
                self.decoder.advance();
                let v = self.relation()?;
                self.expect(Op::RRParent)?;
                v
            }
            Op::SizeOf => self.sizeof_call()?,
            Op::Stoi => self.stoi_call()?,
            _ => self.var_factor()?,
        };
        Ok(if complement { Val::Int(!v.cell()) } else { v })
    }

    fn term(&mut self) -> Result<Val> {
        let mut v = self.factor()?;
        loop {
            let op = self.decoder.peek();
            match op {
                Op::Mult | Op::Div | Op::Mod => {}
                _ => return Ok(v),
            }
            self.decoder.advance();
            let rhs = self.factor()?.cell();
            let lhs = v.cell();
            v = Val::Int(match op {
                Op::Mult => lhs.wrapping_mul(rhs),
                Op::Div => lhs.checked_div(rhs).unwrap_or(0),
                _ => lhs.checked_rem(rhs).unwrap_or(0),
            });
        }
    }

    fn expression(&mut self) -> Result<Val> {
        let mut v = self.term()?;
        loop {
            let op = self.decoder.peek();
            match op {
                Op::Plus | Op::Minus | Op::And | Op::Or | Op::Xor | Op::LShift | Op::RShift => {}
                _ => return Ok(v),
            }
            self.decoder.advance();
            let rhs = self.term()?.cell();
            let lhs = v.cell();
            v = Val::Int(match op {
                Op::Plus => lhs.wrapping_add(rhs),
                Op::Minus => lhs.wrapping_sub(rhs),
                Op::And => lhs & rhs,
                Op::Or => lhs | rhs,
                Op::Xor => lhs ^ rhs,
                Op::LShift => lhs.wrapping_shl(rhs as u32),
                _ => lhs.wrapping_shr(rhs as u32),
            });
        }
    }

    /// Entry point for a full expression. Comparisons and logic bind
    /// loosest and yield 0/1; both operands are always evaluated.
    fn relation(&mut self) -> Result<Val> {
        let mut v = self.expression()?;
        loop {
            let op = self.decoder.peek();
            match op {
                Op::Eq
                | Op::NotEq
                | Op::Lt
                | Op::Gt
                | Op::LtOEq
                | Op::GtOEq
                | Op::LogicAnd
                | Op::LogicOr => {}
                _ => return Ok(v),
            }
            self.decoder.advance();
            let rhs = self.expression()?.cell();
            let lhs = v.cell();
            v = Val::Int(Cell::from(match op {
                Op::Eq => lhs == rhs,
                Op::NotEq => lhs != rhs,
                Op::Lt => lhs < rhs,
                Op::Gt => lhs > rhs,
                Op::LtOEq => lhs <= rhs,
                Op::GtOEq => lhs >= rhs,
                Op::LogicAnd => lhs != 0 && rhs != 0,
                _ => lhs != 0 || rhs != 0,
            }));
        }
    }

    /* STATEMENT EXECUTOR --------------------------------------------- */

    fn statement(&mut self) -> Result<()> {
        match self.decoder.peek() {
            Op::Semicolon | Op::Cr | Op::EndIf => {
                self.decoder.advance();
                Ok(())
            }
            Op::Function => {
                self.function_call()?;
                self.expect(Op::RRParent)?;
                self.ignore(Op::Cr);
                Ok(())
            }
            Op::VarAccess | Op::Address => self.variable_assignment(),
            Op::StrAccess | Op::SAddress => self.string_assignment(),
            Op::Increment | Op::Decrement => {
                self.var_factor()?;
                self.ignore(Op::Cr);
                Ok(())
            }
            Op::Return => {
                self.return_call()?;
                Ok(())
            }
            Op::If => self.if_call(),
            Op::Else => self.else_call(),
            Op::For => self.for_call(),
            Op::While => self.while_call(),
            Op::Redo => self.redo_call(),
            Op::Next => self.next_call(),
            Op::Break => self.break_call(),
            Op::Continue => self.continue_call(),
            Op::Print => self.print_call(),
            Op::End => self.end_call(),
            Op::Restart => {
                self.restart();
                Ok(())
            }
            Op::Dwrite => self.dwrite_call(),
            Op::PinMode => self.pinmode_call(),
            Op::Delay => self.delay_call(),
            Op::SerialTx => self.serial_tx_call(),
            _ => Err(error!(Statement; self.decoder.position())),
        }
    }

    /// A statement that begins with an address is an assignment; there is
    /// no assignment operator on the wire.
    fn variable_assignment(&mut self) -> Result<()> {
        if self.decoder.peek() == Op::VarAccess {
            self.decoder.advance();
            let vi = self.relation()?.cell();
            self.expect(Op::AccessEnd)?;
            let v = self.relation()?.cell();
            self.set_variable(vi, v)
        } else {
            self.decoder.advance();
            let vi = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
            let v = self.relation()?.cell();
            self.set_variable(vi, v)
        }
    }

    fn string_assignment(&mut self) -> Result<()> {
        let indirect = self.decoder.peek() == Op::StrAccess;
        self.decoder.advance();
        let si = if indirect {
            let v = self.expression()?.cell();
            self.expect(Op::AccessEnd)?;
            v
        } else {
            Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET)
        };
        let mut ci = None;
        if self.decoder.peek() == Op::Access {
            self.decoder.advance();
            ci = Some(self.expression()?.cell());
            self.expect(Op::AccessEnd)?;
        }
        match ci {
            // Whole-slot assignment from a literal or another slot.
            None => {
                if self.decoder.peek() == Op::String {
                    let di = self.slot_index(si, ErrorKind::VariableSet)?;
                    self.decoder.extract_string(&mut self.strings[di]);
                    self.decoder.advance();
                    self.ignore(Op::Cr);
                } else if self.decoder.peek() == Op::SAddress {
                    self.decoder.advance();
                    let src = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
                    let di = self.slot_index(si, ErrorKind::VariableSet)?;
                    let srci = self.slot_index(src, ErrorKind::VariableGet)?;
                    self.strings[di] = self.strings[srci];
                    self.ignore(Op::Cr);
                }
                Ok(())
            }
            // One byte, from a literal's last byte or an expression.
            Some(ci) => {
                if self.decoder.peek() == Op::String {
                    self.expect(Op::String)?;
                    let b = self.decoder.behind(2);
                    self.string_byte_set(si, ci, b)?;
                } else {
                    let v = self.expression()?.cell();
                    self.string_byte_set(si, ci, v as u8)?;
                }
                self.ignore(Op::Cr);
                Ok(())
            }
        }
    }

    fn print_slot(&mut self, id: Cell) -> Result<()> {
        let si = self.slot_index(id, ErrorKind::VariableGet)?;
        self.host.print_cstr(&self.strings[si]);
        Ok(())
    }

    fn print_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        loop {
            let is_char = self.decoder.peek() == Op::Char;
            if is_char || self.decoder.peek() == Op::Comma {
                self.decoder.advance();
            }
            match self.decoder.peek() {
                Op::StrAccess => {
                    self.decoder.advance();
                    let si = self.relation()?.cell();
                    self.print_slot(si)?;
                    self.expect(Op::AccessEnd)?;
                }
                Op::String => {
                    self.decoder.extract_string(&mut self.scratch);
                    self.host.print_cstr(&self.scratch);
                    self.decoder.advance();
                }
                Op::SAddress => match self.var_factor()? {
                    Val::Byte(b) => {
                        if is_char {
                            self.host.print_byte(b);
                        } else {
                            self.host.print_int(Cell::from(b));
                        }
                    }
                    v => self.print_slot(v.cell())?,
                },
                _ => match self.relation()? {
                    Val::Slot(s) => self.print_slot(Cell::from(s))?,
                    v => {
                        let v = v.cell();
                        if is_char {
                            self.host.print_byte(v as u8);
                        } else {
                            self.host.print_int(v);
                        }
                    }
                },
            }
            match self.decoder.peek() {
                Op::Semicolon | Op::Cr | Op::RRParent | Op::EndOfInput => break,
                _ => {}
            }
        }
        self.ignore(Op::RRParent);
        Ok(())
    }

    /* CONTROL FLOW --------------------------------------------------- */

    /// Advance past the current if-block: stop after the matching `endif`,
    /// or at an `else` belonging to this block.
    fn skip_block(&mut self) -> Result<()> {
        let mut depth = 1u16;
        loop {
            match self.decoder.peek() {
                Op::If => depth += 1,
                Op::EndIf => depth -= 1,
                Op::Else if depth == 1 => return Ok(()),
                Op::EndOfInput => return Err(error!(Block; self.decoder.position())),
                _ => {}
            }
            self.decoder.advance();
            if depth == 0 {
                return Ok(());
            }
        }
    }

    fn if_call(&mut self) -> Result<()> {
        self.decoder.advance();
        let r = self.relation()?.cell();
        self.ignore(Op::Cr);
        if r == 0 {
            self.skip_block()?;
        }
        if self.decoder.peek() == Op::Else {
            self.decoder.advance();
            self.ignore(Op::Cr);
            if r != 0 {
                self.skip_block()?;
            }
        }
        Ok(())
    }

    /// An `else` reached in normal flow closes a taken then-branch: its
    /// body is skipped.
    fn else_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::Cr);
        self.skip_block()
    }

    fn for_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        self.expect(Op::Address)?;
        let vi = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
        let saved = self.get_variable(vi)?;
        let init = self.expression()?.cell();
        self.set_variable(vi, init)?;
        self.expect(Op::Comma)?;
        let to = self.expression()?.cell();
        self.ignore(Op::RRParent);
        self.ignore(Op::Cr);
        let up = self.get_variable(vi)? < to;
        let frame = Cycle::For {
            address: self.decoder.position(),
            var_id: vi as usize,
            saved,
            to,
            up,
        };
        if !self.cycles.push(frame) {
            return Err(error!(CycleMax; self.decoder.position()));
        }
        Ok(())
    }

    fn next_call(&mut self) -> Result<()> {
        self.decoder.advance();
        match self.cycles.top().copied() {
            Some(Cycle::For {
                address,
                var_id,
                saved,
                to,
                up,
            }) => {
                let vi = var_id as Cell;
                let v = self.get_variable(vi)?;
                if (up && v < to) || (!up && v > to) {
                    self.decoder.goto(address);
                    let step = if up { v.wrapping_add(1) } else { v.wrapping_sub(1) };
                    self.set_variable(vi, step)?;
                } else {
                    self.set_variable(vi, saved)?;
                    self.cycles.pop();
                }
                Ok(())
            }
            _ => Err(error!(CycleNext; self.decoder.position())),
        }
    }

    fn while_call(&mut self) -> Result<()> {
        let start = self.decoder.position();
        self.decoder.advance();
        if self.relation()?.cell() != 0 {
            if !self.cycles.push(Cycle::While { address: start }) {
                return Err(error!(WhileMax; self.decoder.position()));
            }
            return Ok(());
        }
        // False on entry: step past the matching redo.
        let mut depth = 1u16;
        loop {
            match self.decoder.peek() {
                Op::While => depth += 1,
                Op::Redo => {
                    depth -= 1;
                    if depth == 0 {
                        self.decoder.advance();
                        return Ok(());
                    }
                }
                Op::EndOfInput => return Err(error!(Block; self.decoder.position())),
                _ => {}
            }
            self.decoder.advance();
        }
    }

    fn redo_call(&mut self) -> Result<()> {
        self.decoder.advance();
        let end = self.decoder.position();
        match self.cycles.top().copied() {
            Some(Cycle::While { address }) => {
                self.decoder.goto(address);
                self.decoder.advance();
                if self.relation()?.cell() != 0 {
                    self.ignore(Op::Cr);
                } else {
                    self.decoder.goto(end);
                    self.cycles.pop();
                }
                Ok(())
            }
            _ => Err(error!(Redo; end)),
        }
    }

    /// Forward to the terminator of the innermost cycle, counting nested
    /// openers on the way. Stops on the terminator without consuming it.
    fn scan_cycle_end(&mut self) -> Result<()> {
        let mut depth = 0u16;
        loop {
            match self.decoder.peek() {
                Op::Next | Op::Redo => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                Op::While | Op::For => depth += 1,
                Op::EndOfInput => return Err(error!(Block; self.decoder.position())),
                _ => {}
            }
            self.decoder.advance();
        }
    }

    fn continue_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.scan_cycle_end()
    }

    fn break_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.scan_cycle_end()?;
        self.decoder.advance(); // the next/redo itself
        if self.cycles.pop().is_none() {
            return Err(error!(Block; self.decoder.position()));
        }
        Ok(())
    }

    /* FUNCTION MACHINERY --------------------------------------------- */

    fn find_definition(&self, id: u8) -> Result<Definition> {
        for def in &self.definitions {
            if def.id == id {
                return Ok(*def);
            }
        }
        Err(error!(FunctionCall; self.decoder.position()))
    }

    /// From the start of a call, move to its closing parenthesis.
    fn find_call_end(&mut self) -> Result<()> {
        let mut n = 0u16;
        loop {
            let op = self.decoder.peek();
            if op == Op::RRParent && n <= 1 {
                return Ok(());
            }
            match op {
                Op::EndOfInput => return Err(error!(FunctionEnd; self.decoder.position())),
                Op::LRParent => n += 1,
                Op::RRParent => n -= 1,
                _ => {}
            }
            self.decoder.advance();
        }
    }

    /// Call a user function: bind arguments over the shadowed globals,
    /// push a call frame, jump into the body and run it to its `return`.
    /// Leaves the decoder on the call's closing parenthesis.
    fn function_call(&mut self) -> Result<Cell> {
        self.fun_cycle_id = self.cycles.len();
        let start = self.decoder.position();
        self.find_call_end()?;
        let end = self.decoder.position();
        self.decoder.goto(start);
        self.expect(Op::Function)?;
        let def = self.find_definition(self.decoder.behind(1))?;
        if def.nparams == PARAMS {
            return Err(error!(Parameters; self.decoder.position()));
        }
        let mut frame = Frame::new(end);
        let here = self.decoder.position();
        if self.decoder.peek() == Op::LRParent
            && Op::from_byte(self.decoder.byte_at(here + 1)) == Op::RRParent
        {
            self.expect(Op::LRParent)?; // a call with no arguments
        } else if self.decoder.peek() == Op::LRParent {
            for i in 0..def.nparams {
                self.decoder.advance(); // the ( or , before this argument
                let vi = Cell::from(def.params[i]) - Cell::from(ADDRESS_OFFSET);
                let value = self.get_variable(vi)?;
                frame.saved[frame.nsaved] = Param {
                    id: vi as usize,
                    value,
                };
                frame.nsaved += 1;
                let arg = self.relation()?.cell();
                self.set_variable(vi, arg)?;
            }
        }
        self.expect(Op::RRParent)?;
        self.ignore(Op::Cr);
        if !self.frames.push(frame) {
            return Err(error!(FunctionCall; self.decoder.position()));
        }
        self.decoder.goto(def.address);
        while self.decoder.peek() != Op::Return {
            self.statement()?;
        }
        self.return_call()
    }

    /// Evaluate the optional return value with the callee's bindings still
    /// live, then restore the shadowed globals in reverse and resume at
    /// the call site.
    fn return_call(&mut self) -> Result<Cell> {
        self.decoder.advance();
        if self.frames.is_empty() {
            return Err(error!(Return; self.decoder.position()));
        }
        let rel = if self.decoder.peek() != Op::Cr {
            self.relation()?.cell()
        } else {
            0
        };
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => return Err(error!(Return; self.decoder.position())),
        };
        for i in (0..frame.nsaved).rev() {
            let param = frame.saved[i];
            self.set_variable(param.id as Cell, param.value)?;
        }
        self.decoder.goto(frame.ret);
        self.cycles.truncate(self.fun_cycle_id);
        Ok(rel)
    }

    /* INTRINSICS ----------------------------------------------------- */

    fn end_call(&mut self) -> Result<()> {
        self.expect(Op::End)?;
        self.ended = true;
        Ok(())
    }

    fn dwrite_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        let pin = self.expression()?.cell();
        self.expect(Op::Comma)?;
        let v = self.expression()?.cell();
        self.host.digital_write(pin, v);
        self.ignore(Op::RRParent);
        Ok(())
    }

    fn pinmode_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        let pin = self.expression()?.cell();
        self.expect(Op::Comma)?;
        let v = self.expression()?.cell();
        self.host.pin_mode(pin, v);
        self.ignore(Op::RRParent);
        Ok(())
    }

    fn delay_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        let ms = self.expression()?.cell();
        self.host.delay(ms);
        self.ignore(Op::RRParent);
        Ok(())
    }

    /// String operands go out as whole fixed-size frames; anything else
    /// as the low byte of the value.
    fn serial_tx_call(&mut self) -> Result<()> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        match self.decoder.peek() {
            Op::String => {
                self.decoder.extract_string(&mut self.scratch);
                for i in 0..STRING_MAX {
                    self.host.serial_write(self.scratch[i]);
                }
                self.decoder.advance();
            }
            Op::SAddress => {
                self.decoder.advance();
                let id = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
                let si = self.slot_index(id, ErrorKind::VariableGet)?;
                for i in 0..STRING_MAX {
                    self.host.serial_write(self.strings[si][i]);
                }
            }
            _ => {
                let v = self.relation()?.cell();
                self.host.serial_write(v as u8);
            }
        }
        self.ignore(Op::RRParent);
        Ok(())
    }

    fn random_call(&mut self) -> Result<Val> {
        self.ignore(Op::LRParent);
        let a = self.expression()?.cell();
        let v = if self.decoder.peek() == Op::Comma {
            self.decoder.advance();
            let b = self.expression()?.cell();
            self.host.random_between(a, b)
        } else {
            self.host.random(a)
        };
        self.ignore(Op::RRParent);
        Ok(Val::Int(v))
    }

    fn sizeof_call(&mut self) -> Result<Val> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        if self.decoder.peek() == Op::SAddress {
            self.decoder.advance();
            let id = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
            let si = self.slot_index(id, ErrorKind::VariableGet)?;
            let len = self.strings[si]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(STRING_MAX);
            self.ignore(Op::RRParent);
            Ok(Val::Int(len as Cell))
        } else if self.decoder.peek() == Op::Address {
            self.decoder.advance();
            self.ignore(Op::RRParent);
            Ok(Val::Int(std::mem::size_of::<Cell>() as Cell))
        } else {
            Ok(Val::Int(0))
        }
    }

    fn stoi_call(&mut self) -> Result<Val> {
        self.decoder.advance();
        self.ignore(Op::LRParent);
        let mut v = 0;
        if self.decoder.peek() == Op::SAddress {
            self.decoder.advance();
            let id = Cell::from(self.decoder.behind(1)) - Cell::from(ADDRESS_OFFSET);
            let si = self.slot_index(id, ErrorKind::VariableGet)?;
            v = self.host.stoi(&self.strings[si]);
        }
        if self.decoder.peek() == Op::String {
            self.decoder.extract_string(&mut self.scratch);
            self.decoder.advance();
            v = self.host.stoi(&self.scratch);
        }
        self.ignore(Op::RRParent);
        Ok(Val::Int(v))
    }
}

/// One pass over the whole stream, recording every `fun_def`: the id
/// byte, the declared parameter ids and the body entry address. Stream
/// order decides lookups, so the first definition of a duplicated id
/// wins. Definitions beyond the table capacity are dropped.
fn index_definitions(program: &[u8]) -> Vec<Definition> {
    let mut definitions = Vec::with_capacity(MAX_FUNCTIONS);
    let mut decoder = Decoder::new(program);
    while !decoder.finished() {
        if decoder.peek() != Op::FunDef {
            decoder.advance();
            continue;
        }
        decoder.advance();
        let mut def = Definition::new(decoder.behind(1));
        while decoder.peek() == Op::LRParent || decoder.peek() == Op::Comma {
            decoder.advance();
            if decoder.peek() == Op::Address {
                decoder.advance();
                if def.nparams < PARAMS {
                    def.params[def.nparams] = decoder.behind(1);
                    def.nparams += 1;
                }
            }
            if decoder.peek() == Op::RRParent {
                break;
            }
        }
        if decoder.peek() == Op::RRParent {
            decoder.advance();
        }
        if decoder.peek() == Op::Cr {
            decoder.advance();
        }
        def.address = decoder.position();
        if definitions.len() < MAX_FUNCTIONS {
            definitions.push(def);
        }
    }
    definitions
}
