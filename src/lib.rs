//! # BIPLAN
//!
//! The Byte-coded Interpreted Programming LANguage.
//!
//! BIPLAN programs are pre-tokenized into a compact byte stream by an
//! external tokenizer. This crate is the machine that runs such a stream:
//! a recursive-descent evaluator and statement executor working against a
//! fixed set of preallocated buffers, suitable for hosts where nothing may
//! be allocated after startup.
//!
//! The embedder provides a [`mach::Host`] with the side-effecting
//! primitives (print, serial, pins, time, random) and drives the machine
//! one statement at a time:
//!
//! ```
//! use biplan::lang::{ErrorKind, Op};
//! use biplan::mach::{Address, Cell, Host, Interpreter};
//!
//! struct Silent;
//!
//! impl Host for Silent {
//!     fn print_byte(&mut self, _b: u8) {}
//!     fn print_int(&mut self, _n: Cell) {}
//!     fn print_cstr(&mut self, _s: &[u8]) {}
//!     fn serial_read(&mut self) -> Cell { -1 }
//!     fn serial_write(&mut self, _b: u8) {}
//!     fn serial_available(&mut self) -> Cell { 0 }
//!     fn input(&mut self) -> Cell { -1 }
//!     fn input_available(&mut self) -> Cell { 0 }
//!     fn digital_write(&mut self, _pin: Cell, _v: Cell) {}
//!     fn digital_read(&mut self, _pin: Cell) -> Cell { 0 }
//!     fn analog_read(&mut self, _pin: Cell) -> Cell { 0 }
//!     fn pin_mode(&mut self, _pin: Cell, _v: Cell) {}
//!     fn delay(&mut self, _ms: Cell) {}
//!     fn millis(&mut self) -> Cell { 0 }
//!     fn random(&mut self, _max: Cell) -> Cell { 0 }
//!     fn random_between(&mut self, min: Cell, _max: Cell) -> Cell { min }
//!     fn error(&mut self, _position: Address, _kind: ErrorKind) {}
//! }
//!
//! // print 2
//! let program = [Op::Print as u8, Op::Number as u8, b'2', Op::Cr as u8, 0];
//! let mut interp = Interpreter::new(&program, Silent);
//! while !interp.finished() {
//!     interp.run();
//! }
//! ```
//!
//! The source-text tokenizer and the host I/O are external collaborators;
//! this crate only consumes the byte stream and the [`mach::Host`] trait.

pub mod lang;
pub mod mach;
