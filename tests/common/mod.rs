#![allow(dead_code)]

use biplan::lang::{ErrorKind, Op, ADDRESS_OFFSET};
use biplan::mach::{Address, Cell, Host, Interpreter};
use std::collections::VecDeque;

/// Byte-program builder: what the external tokenizer would emit.
pub struct Code {
    bytes: Vec<u8>,
}

impl Code {
    pub fn new() -> Code {
        Code { bytes: vec![] }
    }

    pub fn op(mut self, op: Op) -> Code {
        self.bytes.push(op as u8);
        self
    }

    pub fn cr(self) -> Code {
        self.op(Op::Cr)
    }

    pub fn num(mut self, n: Cell) -> Code {
        self.bytes.push(Op::Number as u8);
        self.bytes.extend_from_slice(n.to_string().as_bytes());
        self
    }

    pub fn lit(mut self, s: &str) -> Code {
        self.bytes.push(Op::String as u8);
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self
    }

    pub fn var(mut self, id: u8) -> Code {
        self.bytes.push(Op::Address as u8);
        self.bytes.push(ADDRESS_OFFSET + id);
        self
    }

    pub fn slot(mut self, id: u8) -> Code {
        self.bytes.push(Op::SAddress as u8);
        self.bytes.push(ADDRESS_OFFSET + id);
        self
    }

    pub fn fun(mut self, id: u8) -> Code {
        self.bytes.push(Op::Function as u8);
        self.bytes.push(ADDRESS_OFFSET + id);
        self
    }

    pub fn fun_def(mut self, id: u8) -> Code {
        self.bytes.push(Op::FunDef as u8);
        self.bytes.push(ADDRESS_OFFSET + id);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn build(mut self) -> Vec<u8> {
        self.bytes.push(Op::EndOfInput as u8);
        self.bytes
    }
}

/// Host that records everything the machine does to it.
#[derive(Clone)]
pub struct TestHost {
    pub out: String,
    pub errors: Vec<(Address, ErrorKind)>,
    pub serial_out: Vec<u8>,
    pub serial_in: VecDeque<u8>,
    pub input_in: VecDeque<u8>,
    pub digital_writes: Vec<(Cell, Cell)>,
    pub pin_modes: Vec<(Cell, Cell)>,
    pub delays: Vec<Cell>,
    pub rnd_calls: Vec<(Cell, Cell)>,
    pub digital_in: Cell,
    pub analog_in: Cell,
    pub millis_value: Cell,
    pub rnd_value: Cell,
}

impl TestHost {
    pub fn new() -> TestHost {
        TestHost {
            out: String::new(),
            errors: vec![],
            serial_out: vec![],
            serial_in: VecDeque::new(),
            input_in: VecDeque::new(),
            digital_writes: vec![],
            pin_modes: vec![],
            delays: vec![],
            rnd_calls: vec![],
            digital_in: 0,
            analog_in: 0,
            millis_value: 40000,
            rnd_value: 4,
        }
    }
}

impl Host for TestHost {
    fn print_byte(&mut self, b: u8) {
        self.out.push(b as char);
    }

    fn print_int(&mut self, n: Cell) {
        self.out.push_str(&n.to_string());
    }

    fn print_cstr(&mut self, s: &[u8]) {
        for &b in s {
            if b == 0 {
                break;
            }
            self.out.push(b as char);
        }
    }

    fn serial_read(&mut self) -> Cell {
        match self.serial_in.pop_front() {
            Some(b) => Cell::from(b),
            None => -1,
        }
    }

    fn serial_write(&mut self, b: u8) {
        self.serial_out.push(b);
    }

    fn serial_available(&mut self) -> Cell {
        self.serial_in.len() as Cell
    }

    fn input(&mut self) -> Cell {
        match self.input_in.pop_front() {
            Some(b) => Cell::from(b),
            None => -1,
        }
    }

    fn input_available(&mut self) -> Cell {
        self.input_in.len() as Cell
    }

    fn digital_write(&mut self, pin: Cell, v: Cell) {
        self.digital_writes.push((pin, v));
    }

    fn digital_read(&mut self, _pin: Cell) -> Cell {
        self.digital_in
    }

    fn analog_read(&mut self, _pin: Cell) -> Cell {
        self.analog_in
    }

    fn pin_mode(&mut self, pin: Cell, v: Cell) {
        self.pin_modes.push((pin, v));
    }

    fn delay(&mut self, ms: Cell) {
        self.delays.push(ms);
    }

    fn millis(&mut self) -> Cell {
        self.millis_value
    }

    fn random(&mut self, max: Cell) -> Cell {
        self.rnd_calls.push((0, max));
        self.rnd_value
    }

    fn random_between(&mut self, min: Cell, max: Cell) -> Cell {
        self.rnd_calls.push((min, max));
        self.rnd_value
    }

    fn error(&mut self, position: Address, kind: ErrorKind) {
        self.errors.push((position, kind));
    }
}

/// Run a program on a fresh host and return everything it captured.
pub fn exec_host(program: &[u8], host: TestHost) -> TestHost {
    let mut interp = Interpreter::new(program, host);
    let mut statements = 0;
    while !interp.finished() {
        interp.run();
        statements += 1;
        assert!(statements < 100_000, "execution cycle limit exceeded");
    }
    interp.host().clone()
}

/// Run a program that must not error and return its printed output.
pub fn exec(program: &[u8]) -> String {
    let host = exec_host(program, TestHost::new());
    assert!(host.errors.is_empty(), "unexpected errors: {:?}", host.errors);
    host.out
}

/// Run a program and return its printed output and reported errors.
pub fn exec_errors(program: &[u8]) -> (String, Vec<(Address, ErrorKind)>) {
    let host = exec_host(program, TestHost::new());
    (host.out, host.errors)
}
