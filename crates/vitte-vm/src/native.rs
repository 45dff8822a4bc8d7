//! The default native-callable set, installed at VM construction.
//!
//! Error wording and the exact (sometimes slightly misleading — the `append`
//! message is reused for a type error, not just an arity error) message text
//! is taken verbatim from the original `vm.c`.

use crate::value::{Obj, Value};
use crate::vm::Vm;

/// A host-supplied callable. Receives the VM (for the host sink, interner,
/// and allocator) and the argument slice; returns `Err(message)` on failure,
/// which the dispatch loop reports prefixed `Native error: <message>`.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

pub fn clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(vm.host.clock()))
}

pub fn read_file(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    if args.len() != 1 {
        return Err("readFile() takes exactly 1 argument.".into());
    }
    let path = match args[0].as_str() {
        Some(s) => s.as_str().to_string(),
        None => return Err("Argument to readFile() must be a string.".into()),
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(Value::Obj(Obj::Str(vm.intern(&contents)))),
        Err(_) => Err("Failed to open file.".into()),
    }
}

pub fn println(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&v.to_string());
    }
    vm.host.print(&line);
    Ok(Value::Nil)
}

pub fn append(_vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    if args.len() != 2 || args[0].as_list().is_none() {
        return Err("append() takes exactly 2 arguments.".into());
    }
    let list = args[0].as_list().unwrap();
    list.borrow_mut().append(args[1].clone());
    Ok(Value::Nil)
}

pub fn delete(_vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let valid_shape = args.len() == 2 && args[0].as_list().is_some() && args[1].is_number();
    if !valid_shape {
        return Err("delete() takes a list and an index as arguments".into());
    }
    let list = args[0].as_list().unwrap();
    let index = args[1].as_number().unwrap() as i64;
    if !list.borrow().is_valid_index(index) {
        return Err("Index out of bounds".into());
    }
    list.borrow_mut().delete(index);
    Ok(Value::Nil)
}

/// `(name, arity, fn)` triples installed by `Vm::with_options` when
/// `VmOptions::natives` is enabled (on by default, matching `initVM`).
pub fn default_set() -> &'static [(&'static str, i32, NativeFn)] {
    &[
        ("clock", 0, clock as NativeFn),
        ("readFile", 1, read_file as NativeFn),
        ("println", -1, println as NativeFn),
        ("append", 2, append as NativeFn),
        ("delete", 2, delete as NativeFn),
    ]
}
