//! The tagged `Value` union and the `Obj` heap-object family.
//!
//! Heap objects are realized as `Rc`/`Rc<RefCell<_>>` per variant rather than
//! an intrusive raw-pointer list; `Vm::objects` plays the role of the
//! singly-linked allocation list as an owning `Vec<Obj>` (see DESIGN.md).

use std::cell::RefCell;
use std::fmt::{self, Debug, Display};
use std::rc::Rc;

use vitte_core::bytecode::FunctionProto;

/// A canonical, interned string. Reference identity among live `ObjString`s
/// implies content identity.
pub struct ObjString {
    pub chars: Rc<str>,
    pub hash: u32,
    /// Nothing in this core produces a borrowed string today, but the flag
    /// is kept for future static-string optimizations, matching the
    /// original's `ownsChars`.
    pub owns_chars: bool,
}

impl ObjString {
    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

impl Debug for ObjString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjString({:?})", self.chars)
    }
}

/// A host-supplied callable. Arity `-1` means variadic. Natives take the
/// `Vm` itself so `println`/`clock`/`readFile` can reach the host sink and
/// interner instead of bypassing them.
pub struct ObjNative {
    pub name: Rc<str>,
    pub arity: i32,
    pub func: crate::native::NativeFn,
}

impl Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjNative({}/{})", self.name, self.arity)
    }
}

/// A runtime activation template: the compiled function plus its captured
/// upvalues. Several closures may share `function` (compiled once) and may
/// share individual upvalue cells when constructed from the same frame.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: Rc<FunctionProto>,
    pub upvalues: Vec<Rc<RefCell<ObjUpvalue>>>,
}

/// A captured variable cell: either still live on the value stack (`Open`,
/// holding the stack index) or snapshotted into its own storage (`Closed`)
/// once that stack region is abandoned.
#[derive(Debug, Clone)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

/// A growable list of values. Growth/shrink policy is delegated to `Vec`,
/// which already grows geometrically without a hand-rolled capacity field.
#[derive(Debug, Default)]
pub struct ObjList {
    pub items: Vec<Value>,
}

impl ObjList {
    pub fn is_valid_index(&self, index: i64) -> bool {
        index >= 0 && (index as usize) < self.items.len()
    }

    pub fn append(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn get(&self, index: i64) -> Option<&Value> {
        self.items.get(index as usize)
    }

    pub fn set(&mut self, index: i64, value: Value) {
        self.items[index as usize] = value;
    }

    pub fn delete(&mut self, index: i64) {
        self.items.remove(index as usize);
    }
}

/// A heap object: one `Rc`-family variant per type tag.
#[derive(Clone)]
pub enum Obj {
    Str(Rc<ObjString>),
    Function(Rc<FunctionProto>),
    Native(Rc<ObjNative>),
    Closure(Rc<ObjClosure>),
    Upvalue(Rc<RefCell<ObjUpvalue>>),
    List(Rc<RefCell<ObjList>>),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::Str(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&Rc<ObjString>> {
        match self {
            Obj::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<RefCell<ObjList>>> {
        match self {
            Obj::List(l) => Some(l),
            _ => None,
        }
    }
}

impl PartialEq for Obj {
    /// Object equality is reference identity; for interned
    /// strings this coincides with value equality.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Obj::Str(a), Obj::Str(b)) => Rc::ptr_eq(a, b),
            (Obj::Function(a), Obj::Function(b)) => Rc::ptr_eq(a, b),
            (Obj::Native(a), Obj::Native(b)) => Rc::ptr_eq(a, b),
            (Obj::Closure(a), Obj::Closure(b)) => Rc::ptr_eq(a, b),
            (Obj::Upvalue(a), Obj::Upvalue(b)) => Rc::ptr_eq(a, b),
            (Obj::List(a), Obj::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => write!(f, "{:?}", s),
            Obj::Function(p) => write!(f, "<fn {} /{}>", p.display_name(), p.arity),
            Obj::Native(n) => write!(f, "{:?}", n),
            Obj::Closure(c) => write!(f, "<closure {}>", c.function.display_name()),
            Obj::Upvalue(_) => write!(f, "<upvalue>"),
            Obj::List(l) => write!(f, "<list len={}>", l.borrow().items.len()),
        }
    }
}

impl Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => f.write_str(s.as_str()),
            Obj::Function(p) => write!(f, "<fn {}>", p.display_name()),
            Obj::Native(n) => write!(f, "<native {}>", n.name),
            Obj::Closure(c) => write!(f, "<fn {}>", c.function.display_name()),
            Obj::Upvalue(_) => f.write_str("<upvalue>"),
            Obj::List(l) => {
                let l = l.borrow();
                f.write_str("[")?;
                for (i, v) in l.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The tagged runtime value: nil, bool, number, or object
/// reference. `Clone` is a cheap tag-and-pointer copy.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(Obj),
}

impl Value {
    /// nil and `false` are falsey; everything else (including `0` and `""`)
    /// is truthy.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil) || matches!(self, Value::Bool(false))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&Rc<ObjString>> {
        match self {
            Value::Obj(o) => o.as_str(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<RefCell<ObjList>>> {
        match self {
            Value::Obj(o) => o.as_list(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Obj(o) => o.type_name(),
        }
    }
}

impl PartialEq for Value {
    /// Same-tag required; nil==nil; numbers use IEEE equality (NaN != NaN);
    /// bools use identity; objects use reference identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Obj(o) => write!(f, "{o}"),
        }
    }
}
