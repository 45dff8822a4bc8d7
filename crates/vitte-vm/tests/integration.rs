//! End-to-end scenarios exercising the dispatch loop's testable properties:
//! assemble a small program with `vitte_core::asm`, run it on a fresh `Vm`,
//! and check the printed output / runtime-error taxonomy.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use pretty_assertions::assert_eq;
use vitte_core::asm;
use vitte_core::bytecode::FunctionProto;
use vitte_vm::{Host, Vm};

/// Captures everything written through the `Host` trait instead of touching
/// real stdout/stderr, so scenarios can assert on exact printed lines.
struct CapturingHost {
    out: Rc<RefCell<Vec<String>>>,
    err: Rc<RefCell<Vec<String>>>,
    start: Instant,
}

impl Host for CapturingHost {
    fn print(&mut self, line: &str) {
        self.out.borrow_mut().push(line.to_string());
    }
    fn eprint(&mut self, line: &str) {
        self.err.borrow_mut().push(line.to_string());
    }
    fn clock(&mut self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Assemble `src`, run it to completion on a fresh VM, and return the
/// captured stdout lines (or the runtime-error message on failure).
fn run_capturing(src: &str) -> Result<Vec<String>, String> {
    let chunk = asm::assemble(src).expect("assemble ok");
    let out = Rc::new(RefCell::new(Vec::new()));
    let err = Rc::new(RefCell::new(Vec::new()));
    let host = CapturingHost { out: out.clone(), err: err.clone(), start: Instant::now() };
    let mut vm = Vm::new().with_host(Box::new(host));
    let script = Rc::new(FunctionProto::new(None, 0, 0, chunk));
    match vm.interpret(script) {
        Ok(()) => Ok(out.borrow().clone()),
        Err(e) => {
            // the VM's own runtime-error report lands in `err`; the structured
            // message on `e` is what scenarios assert against.
            let _ = &err;
            Err(e.to_string())
        }
    }
}

#[test]
fn arithmetic_precedence() {
    let out = run_capturing(
        r#"
            constant 1
            constant 2
            constant 3
            multiply
            add
            print
            return
        "#,
    )
    .expect("runs ok");
    assert_eq!(out, vec!["7"]);
}

#[test]
fn closure_counter_increments_across_calls() {
    let src = r#"
        .const name_makeCounter = "makeCounter"
        .const name_c = "c"

        .function makeCounter arity=0 upvalues=0
            constant 0
            .function inc arity=0 upvalues=1
                get_upvalue 0
                constant 1
                add
                set_upvalue 0
                pop
                get_upvalue 0
                return
            .end
            closure #inc local:1
            return
        .end

        closure #makeCounter
        define_global #name_makeCounter

        get_global #name_makeCounter
        call 0
        define_global #name_c

        get_global #name_c
        call 0
        print

        get_global #name_c
        call 0
        print

        get_global #name_c
        call 0
        print

        return
    "#;
    let out = run_capturing(src).expect("runs ok");
    assert_eq!(out, vec!["1", "2", "3"]);
}

#[test]
fn two_closures_share_one_upvalue_cell() {
    let src = r#"
        .const name_get = "theGet"
        .const name_set = "theSet"

        .function pair arity=0 upvalues=0
            constant 10
            .function get_ arity=0 upvalues=1
                get_upvalue 0
                return
            .end
            .function set_ arity=1 upvalues=1
                get_local 1
                set_upvalue 0
                pop
                nil
                return
            .end
            closure #get_ local:1
            define_global #name_get
            closure #set_ local:1
            define_global #name_set
            nil
            return
        .end

        closure #pair
        call 0
        pop

        get_global #name_set
        constant 42
        call 1
        pop

        get_global #name_get
        call 0
        print

        return
    "#;
    let out = run_capturing(src).expect("runs ok");
    assert_eq!(out, vec!["42"]);
}

#[test]
fn reading_an_undefined_global_is_a_runtime_error() {
    let src = r#"
        .const name_undef = "undefinedVar"
        get_global #name_undef
        print
        return
    "#;
    let err = run_capturing(src).unwrap_err();
    assert_eq!(err, "Undefined variable 'undefinedVar'");
}

#[test]
fn writing_an_undefined_global_is_a_runtime_error() {
    let src = r#"
        .const name_undef = "undefinedVar"
        constant 1
        set_global #name_undef
        pop
        return
    "#;
    let err = run_capturing(src).unwrap_err();
    assert_eq!(err, "Undefined variable 'undefinedVar'.");
}

#[test]
fn list_build_append_delete_and_index() {
    let src = r#"
        .const name_L = "L"
        .const name_append = "append"
        .const name_delete = "delete"

        constant 1
        constant 2
        constant 3
        build_list 3
        define_global #name_L

        get_global #name_append
        get_global #name_L
        constant 4
        call 2
        pop

        get_global #name_delete
        get_global #name_L
        constant 0
        call 2
        pop

        get_global #name_L
        constant 0
        index_subscr
        print

        get_global #name_L
        constant 2
        index_subscr
        print

        return
    "#;
    let out = run_capturing(src).expect("runs ok");
    assert_eq!(out, vec!["2", "4"]);
}

#[test]
fn calling_with_wrong_arity_is_a_runtime_error() {
    let src = r#"
        .function f arity=2 upvalues=0
            get_local 1
            get_local 2
            add
            return
        .end

        closure #f
        constant 1
        call 1
        pop
        return
    "#;
    let err = run_capturing(src).unwrap_err();
    assert_eq!(err, "Expected 2 arguments but got 1.");
}

#[test]
fn add_concatenates_two_strings_but_rejects_mixed_operands() {
    let out = run_capturing(
        r#"
            constant "foo"
            constant "bar"
            add
            print
            return
        "#,
    )
    .expect("runs ok");
    assert_eq!(out, vec!["foobar"]);

    let err = run_capturing(
        r#"
            constant "foo"
            constant 1
            add
            print
            return
        "#,
    )
    .unwrap_err();
    assert_eq!(err, "Operands must be two numbers or two strings");
}

#[test]
fn truthiness_nil_and_false_are_falsey_everything_else_is_truthy() {
    let out = run_capturing(
        r#"
            nil
            not
            print
            false
            not
            print
            constant 0
            not
            print
            constant ""
            not
            print
            return
        "#,
    )
    .expect("runs ok");
    assert_eq!(out, vec!["true", "true", "false", "false"]);
}

#[test]
fn native_clock_returns_a_number_without_erroring() {
    let src = r#"
        .const name_clock = "clock"
        get_global #name_clock
        call 0
        pop
        nil
        print
        return
    "#;
    let out = run_capturing(src).expect("runs ok");
    assert_eq!(out, vec!["nil"]);
}
