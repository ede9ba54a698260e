mod common;
use biplan::lang::Op;
use common::*;

#[test]
fn test_semicolon_separates_statements() {
    // v0 = 1 ; print v0
    let p = Code::new()
        .var(0)
        .num(1)
        .op(Op::Semicolon)
        .op(Op::Print)
        .var(0)
        .op(Op::Semicolon)
        .build();
    assert_eq!(exec(&p), "1");
}

#[test]
fn test_end_stops_execution() {
    let p = Code::new()
        .op(Op::Print)
        .num(1)
        .cr()
        .op(Op::End)
        .cr()
        .op(Op::Print)
        .num(2)
        .cr()
        .build();
    assert_eq!(exec(&p), "1");
}

#[test]
fn test_restart_reruns_from_the_top() {
    // print 7  if v0 == 1  end  endif  v0 = 1  restart
    let p = Code::new()
        .op(Op::Print)
        .num(7)
        .cr()
        .op(Op::If)
        .var(0)
        .op(Op::Eq)
        .num(1)
        .cr()
        .op(Op::End)
        .cr()
        .op(Op::EndIf)
        .cr()
        .var(0)
        .num(1)
        .cr()
        .op(Op::Restart)
        .cr()
        .build();
    // variables survive restart, so the second pass ends
    assert_eq!(exec(&p), "77");
}

#[test]
fn test_increment_statement() {
    // v0 = 3  ++v0  print v0
    let p = Code::new()
        .var(0)
        .num(3)
        .cr()
        .op(Op::Increment)
        .var(0)
        .cr()
        .op(Op::Print)
        .var(0)
        .cr()
        .build();
    assert_eq!(exec(&p), "4");
}

#[test]
fn test_decrement_statement() {
    let p = Code::new()
        .var(0)
        .num(3)
        .cr()
        .op(Op::Decrement)
        .var(0)
        .cr()
        .op(Op::Print)
        .var(0)
        .cr()
        .build();
    assert_eq!(exec(&p), "2");
}

#[test]
fn test_print_char_modifier() {
    // print 'c' 65 'c' 33
    let p = Code::new()
        .op(Op::Print)
        .op(Op::Char)
        .num(65)
        .op(Op::Char)
        .num(33)
        .cr()
        .build();
    assert_eq!(exec(&p), "A!");
}

#[test]
fn test_print_comma_separated_arguments() {
    let p = Code::new()
        .op(Op::Print)
        .num(1)
        .op(Op::Comma)
        .num(2)
        .op(Op::Comma)
        .lit("!")
        .cr()
        .build();
    assert_eq!(exec(&p), "12!");
}

#[test]
fn test_print_parenthesized() {
    // print(3 + 4)
    let p = Code::new()
        .op(Op::Print)
        .op(Op::LRParent)
        .num(3)
        .op(Op::Plus)
        .num(4)
        .op(Op::RRParent)
        .cr()
        .build();
    assert_eq!(exec(&p), "7");
}

#[test]
fn test_print_mixed_arguments() {
    // v0 = 8  print "v0 is " v0
    let p = Code::new()
        .var(0)
        .num(8)
        .cr()
        .op(Op::Print)
        .lit("v0 is ")
        .var(0)
        .cr()
        .build();
    assert_eq!(exec(&p), "v0 is 8");
}

#[test]
fn test_finishes_at_end_of_input() {
    let p = Code::new().op(Op::Print).num(1).cr().build();
    assert_eq!(exec(&p), "1");
}
