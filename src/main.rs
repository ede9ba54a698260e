//! Command line shell for BIPLAN: loads a tokenized program file and runs
//! it on a console host until it finishes or ctrl-c is pressed.

use ansi_term::Style;
use biplan::lang::ErrorKind;
use biplan::mach::{Address, Cell, Host, Interpreter};
use rand::Rng;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    if std::env::args().count() != 2 {
        println!("Usage: biplan FILENAME");
        return;
    }
    let mut args = std::env::args();
    let _executable = args.next();
    let filename = match args.next() {
        Some(f) => f,
        None => return,
    };
    let mut program = match std::fs::read(&filename) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("{}", Style::new().bold().paint(format!("?{}", error)));
            return;
        }
    };
    if program.last() != Some(&0) {
        program.push(0);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let int_moved = interrupted.clone();
    if let Err(error) = ctrlc::set_handler(move || {
        int_moved.store(true, Ordering::SeqCst);
    }) {
        eprintln!("{}", Style::new().bold().paint(format!("?{}", error)));
        return;
    }

    let mut interp = Interpreter::new(&program, ConsoleHost::new());
    while !interp.finished() {
        if interrupted.load(Ordering::SeqCst) {
            eprintln!("{}", Style::new().bold().paint("?INTERRUPTED"));
            break;
        }
        interp.run();
    }
}

struct ConsoleHost {
    start: Instant,
}

impl ConsoleHost {
    fn new() -> ConsoleHost {
        ConsoleHost {
            start: Instant::now(),
        }
    }
}

fn write_stdout(bytes: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}

fn read_stdin_byte() -> Cell {
    let mut buf = [0u8; 1];
    match std::io::stdin().read(&mut buf) {
        Ok(1) => Cell::from(buf[0]),
        _ => -1,
    }
}

impl Host for ConsoleHost {
    fn print_byte(&mut self, b: u8) {
        write_stdout(&[b]);
    }

    fn print_int(&mut self, n: Cell) {
        write_stdout(n.to_string().as_bytes());
    }

    fn print_cstr(&mut self, s: &[u8]) {
        let len = s.iter().position(|&b| b == 0).unwrap_or(s.len());
        write_stdout(&s[..len]);
    }

    fn serial_read(&mut self) -> Cell {
        read_stdin_byte()
    }

    fn serial_write(&mut self, b: u8) {
        write_stdout(&[b]);
    }

    fn serial_available(&mut self) -> Cell {
        0
    }

    fn input(&mut self) -> Cell {
        read_stdin_byte()
    }

    fn input_available(&mut self) -> Cell {
        0
    }

    fn digital_write(&mut self, _pin: Cell, _v: Cell) {}

    fn digital_read(&mut self, _pin: Cell) -> Cell {
        0
    }

    fn analog_read(&mut self, _pin: Cell) -> Cell {
        0
    }

    fn pin_mode(&mut self, _pin: Cell, _v: Cell) {}

    fn delay(&mut self, ms: Cell) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms as u64));
        }
    }

    fn millis(&mut self) -> Cell {
        self.start.elapsed().as_millis() as Cell
    }

    fn random(&mut self, max: Cell) -> Cell {
        if max <= 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..max)
    }

    fn random_between(&mut self, min: Cell, max: Cell) -> Cell {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..max)
    }

    fn error(&mut self, position: Address, kind: ErrorKind) {
        let message = format!("?{} AT {}", kind, position);
        eprintln!("{}", Style::new().bold().paint(message));
    }
}
