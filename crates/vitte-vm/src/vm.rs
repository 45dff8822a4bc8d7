//! The VM: globals, intern table, call-frame/value stacks, and the
//! instruction dispatch loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use ahash::AHashMap;

use vitte_core::bytecode::{Chunk, ConstValue, FunctionProto, Op};

use crate::error::{VmError, VmResult};
use crate::frame::CallFrame;
use crate::intern::Interner;
use crate::native::{self, NativeFn};
use crate::value::{Obj, ObjClosure, ObjList, ObjNative, ObjString, ObjUpvalue, Value};

/// Default value-stack and call-frame capacities.
pub const DEFAULT_STACK_CAPACITY: usize = 256;
pub const DEFAULT_FRAME_CAPACITY: usize = 64;

/// Environment for user-visible output and the wall clock. `print`,
/// `readFile`'s caller-visible errors, and `clock` all go through here so
/// tests can capture them instead of hitting real stdout.
pub trait Host {
    fn print(&mut self, line: &str);
    fn eprint(&mut self, line: &str);
    /// Monotonic process-clock seconds, per the `clock` native's contract.
    fn clock(&mut self) -> f64;
}

/// Default host: real stdout/stderr, process-start-relative clock.
pub struct DefaultHost {
    start: Instant,
}

impl Default for DefaultHost {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Host for DefaultHost {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }
    fn eprint(&mut self, line: &str) {
        eprintln!("{line}");
    }
    fn clock(&mut self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// VM construction options (stack/frame capacities, the default native set,
/// tracing). The fixed capacities (256/64) are the defaults but are
/// constructor parameters here.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub stack_reserve: usize,
    pub frame_capacity: usize,
    /// Install `clock`/`readFile`/`println`/`append`/`delete` at construction.
    pub natives: bool,
    /// Emit `trace!`/`debug!` spans via the `tracing` feature.
    pub trace: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            stack_reserve: DEFAULT_STACK_CAPACITY,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            natives: true,
            trace: false,
        }
    }
}

impl VmOptions {
    pub fn with_stack_reserve(mut self, n: usize) -> Self {
        self.stack_reserve = n;
        self
    }
    pub fn with_frame_capacity(mut self, n: usize) -> Self {
        self.frame_capacity = n;
        self
    }
    pub fn with_natives(mut self, on: bool) -> Self {
        self.natives = on;
        self
    }
    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }
}

enum Flow {
    Continue,
    Halt,
}

/// Process-wide VM state: value stack, frame stack, globals, intern table,
/// the object allocation list, and the open-upvalue list.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: AHashMap<Rc<str>, Value>,
    interner: Interner,
    /// Open upvalues sorted by descending stack index (the list's
    /// "descending stack address" invariant, realized with plain indices
    /// rather than raw pointers).
    open_upvalues: Vec<Rc<RefCell<ObjUpvalue>>>,
    /// Enumeration root for non-string heap objects; interned strings are
    /// already enumerable through the intern table, so together these two
    /// collections together play the role of a single object list (see
    /// DESIGN.md).
    objects: Vec<Obj>,
    frame_capacity: usize,
    pub host: Box<dyn Host>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(options.stack_reserve),
            frames: Vec::with_capacity(options.frame_capacity),
            globals: AHashMap::new(),
            interner: Interner::new(),
            open_upvalues: Vec::new(),
            objects: Vec::new(),
            frame_capacity: options.frame_capacity,
            host: Box::<DefaultHost>::default(),
        };
        if options.natives {
            vm.install_natives();
        }
        vm
    }

    pub fn with_host(mut self, host: Box<dyn Host>) -> Self {
        self.host = host;
        self
    }

    fn install_natives(&mut self) {
        for (name, arity, f) in native::default_set() {
            self.define_native(name, *arity, *f);
        }
    }

    fn define_native(&mut self, name: &str, arity: i32, f: NativeFn) {
        let interned_name = self.intern(name);
        let native = Rc::new(ObjNative { name: interned_name.chars.clone(), arity, func: f });
        self.objects.push(Obj::Native(native.clone()));
        self.globals.insert(interned_name.chars.clone(), Value::Obj(Obj::Native(native)));
    }

    /// Canonicalize a string through the intern table; newly created
    /// strings are also recorded in the object list.
    pub fn intern(&mut self, s: &str) -> Rc<ObjString> {
        let before = self.interner.len();
        let obj = self.interner.intern(s);
        if self.interner.len() != before {
            self.objects.push(Obj::Str(obj.clone()));
        }
        obj
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        let key = self.intern(name).chars.clone();
        self.globals.insert(key, value);
    }

    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len() + self.interner.len()
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| VmError::MalformedChunk("stack underflow".into()))
    }

    fn peek(&self, distance: usize) -> VmResult<&Value> {
        let len = self.stack.len();
        if distance >= len {
            return Err(VmError::MalformedChunk("stack underflow on peek".into()));
        }
        Ok(&self.stack[len - 1 - distance])
    }

    fn current_chunk(&self) -> &Chunk {
        &self.frames.last().expect("run() always holds at least one frame").closure.function.chunk
    }

    fn const_name(&self, ix: u32) -> VmResult<String> {
        match self.current_chunk().consts.get(ix) {
            Some(ConstValue::Str(s)) => Ok(s.clone()),
            other => Err(VmError::MalformedChunk(format!("constant {ix} is not a name: {other:?}"))),
        }
    }

    fn const_function(&self, ix: u32) -> VmResult<Rc<FunctionProto>> {
        match self.current_chunk().consts.get(ix) {
            Some(ConstValue::Function(p)) => Ok(p.clone()),
            other => Err(VmError::MalformedChunk(format!("constant {ix} is not a function: {other:?}"))),
        }
    }

    fn const_value(&mut self, ix: u32) -> VmResult<Value> {
        let c = self
            .current_chunk()
            .consts
            .get(ix)
            .cloned()
            .ok_or_else(|| VmError::MalformedChunk(format!("no constant at {ix}")))?;
        Ok(match c {
            ConstValue::Null => Value::Nil,
            ConstValue::Bool(b) => Value::Bool(b),
            ConstValue::I64(i) => Value::Number(i as f64),
            ConstValue::F64(f) => Value::Number(f),
            ConstValue::Str(s) => Value::Obj(Obj::Str(self.intern(&s))),
            ConstValue::Bytes(_) => {
                return Err(VmError::MalformedChunk(format!("constant {ix} is a raw byte blob, not a Value")))
            }
            ConstValue::Function(_) => {
                return Err(VmError::MalformedChunk(format!(
                    "constant {ix} is a function prototype; only OP_CLOSURE may reference it"
                )))
            }
        })
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> Rc<RefCell<ObjUpvalue>> {
        if let Some(existing) = self.open_upvalues.iter().find(|u| {
            matches!(*u.borrow(), ObjUpvalue::Open(i) if i == stack_index)
        }) {
            return existing.clone();
        }
        let upvalue = Rc::new(RefCell::new(ObjUpvalue::Open(stack_index)));
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|u| matches!(*u.borrow(), ObjUpvalue::Open(i) if i < stack_index))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, upvalue.clone());
        self.objects.push(Obj::Upvalue(upvalue.clone()));
        upvalue
    }

    /// Close every open upvalue at or above `watermark`; called on
    /// `OP_CLOSE_UPVALUE` (watermark = top slot) and `OP_RETURN` (watermark
    /// = the returning frame's base).
    fn close_upvalues(&mut self, watermark: usize) {
        while let Some(u) = self.open_upvalues.first() {
            let index = match *u.borrow() {
                ObjUpvalue::Open(i) => i,
                ObjUpvalue::Closed(_) => break,
            };
            if index < watermark {
                break;
            }
            let value = self.stack[index].clone();
            *u.borrow_mut() = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    fn read_upvalue(&self, up: &Rc<RefCell<ObjUpvalue>>) -> Value {
        match &*up.borrow() {
            ObjUpvalue::Open(idx) => self.stack[*idx].clone(),
            ObjUpvalue::Closed(v) => v.clone(),
        }
    }

    fn write_upvalue(&mut self, up: &Rc<RefCell<ObjUpvalue>>, value: Value) {
        let idx = match &*up.borrow() {
            ObjUpvalue::Open(idx) => Some(*idx),
            ObjUpvalue::Closed(_) => None,
        };
        match idx {
            Some(idx) => self.stack[idx] = value,
            None => *up.borrow_mut() = ObjUpvalue::Closed(value),
        }
    }

    fn call_closure(&mut self, closure: Rc<ObjClosure>, argc: usize) -> VmResult<()> {
        let arity = closure.function.arity as usize;
        if argc != arity {
            return Err(VmError::ArityMismatch { expected: closure.function.arity as i32, got: argc });
        }
        if self.frames.len() >= self.frame_capacity {
            return Err(VmError::FrameOverflow);
        }
        let base = self.stack.len() - argc - 1;
        #[cfg(feature = "tracing")]
        tracing::debug!(name = closure.function.display_name(), base, "call");
        self.frames.push(CallFrame::new(closure, base));
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: usize) -> VmResult<()> {
        match callee {
            Value::Obj(Obj::Closure(c)) => self.call_closure(c, argc),
            Value::Obj(Obj::Native(n)) => {
                if n.arity != -1 && n.arity as usize != argc {
                    return Err(VmError::ArityMismatch { expected: n.arity, got: argc });
                }
                let args_start = self.stack.len() - argc;
                let args: Vec<Value> = self.stack[args_start..].to_vec();
                let result = (n.func)(self, &args).map_err(VmError::Native)?;
                self.stack.truncate(args_start - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(VmError::NotCallable),
        }
    }

    /// Run the top-level closure already activated as the sole frame.
    pub fn run(&mut self) -> VmResult<()> {
        loop {
            let frame_index = self.frames.len() - 1;
            let pc = self.frames[frame_index].ip;
            let op = match self.frames[frame_index].closure.function.chunk.ops.get(pc) {
                Some(op) => op.clone(),
                None => return Ok(()),
            };
            self.frames[frame_index].ip = pc + 1;

            #[cfg(feature = "tracing")]
            tracing::trace!(pc, ?op, "dispatch");

            match self.dispatch(&op) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(e) => {
                    self.report_runtime_error(&e);
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&mut self, op: &Op) -> VmResult<Flow> {
        match op {
            Op::Constant(ix) => {
                let v = self.const_value(*ix)?;
                self.push(v);
            }
            Op::Nil => self.push(Value::Nil),
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let v = self.peek(0)?.clone();
                self.push(v);
            }
            Op::GetLocal(slot) => {
                let base = self.frames.last().unwrap().base;
                let v = self.stack[base + *slot as usize].clone();
                self.push(v);
            }
            Op::SetLocal(slot) => {
                let base = self.frames.last().unwrap().base;
                let v = self.peek(0)?.clone();
                self.stack[base + *slot as usize] = v;
            }
            Op::GetGlobal(ix) => {
                let name = self.const_name(*ix)?;
                match self.globals.get(name.as_str()) {
                    Some(v) => {
                        let v = v.clone();
                        self.push(v);
                    }
                    None => return Err(VmError::UndefinedVariableRead(name)),
                }
            }
            Op::DefineGlobal(ix) => {
                let name = self.const_name(*ix)?;
                let value = self.pop()?;
                let key = self.intern(&name).chars.clone();
                self.globals.insert(key, value);
            }
            Op::SetGlobal(ix) => {
                let name = self.const_name(*ix)?;
                let value = self.peek(0)?.clone();
                match self.globals.get_mut(name.as_str()) {
                    Some(slot) => *slot = value,
                    None => return Err(VmError::UndefinedVariableWrite(name)),
                }
            }
            Op::GetUpvalue(ix) => {
                let up = self.frames.last().unwrap().closure.upvalues[*ix as usize].clone();
                let v = self.read_upvalue(&up);
                self.push(v);
            }
            Op::SetUpvalue(ix) => {
                let up = self.frames.last().unwrap().closure.upvalues[*ix as usize].clone();
                let v = self.peek(0)?.clone();
                self.write_upvalue(&up, v);
            }
            Op::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b));
            }
            Op::Greater => self.numeric_binop(|a, b| Value::Bool(a > b))?,
            Op::Less => self.numeric_binop(|a, b| Value::Bool(a < b))?,
            Op::Add => self.add()?,
            Op::Subtract => self.numeric_binop(|a, b| Value::Number(a - b))?,
            Op::Multiply => self.numeric_binop(|a, b| Value::Number(a * b))?,
            Op::Divide => self.numeric_binop(|a, b| Value::Number(a / b))?,
            Op::Not => {
                let v = self.pop()?;
                self.push(Value::Bool(v.is_falsey()));
            }
            Op::Negate => {
                let v = self.pop()?;
                let n = v.as_number().ok_or(VmError::OperandMustBeANumber)?;
                self.push(Value::Number(-n));
            }
            Op::Print => {
                let v = self.pop()?;
                self.host.print(&v.to_string());
            }
            Op::Jump(off) => {
                self.frames.last_mut().unwrap().ip += *off as usize;
            }
            Op::JumpIfFalse(off) => {
                if self.peek(0)?.is_falsey() {
                    self.frames.last_mut().unwrap().ip += *off as usize;
                }
            }
            Op::Loop(off) => {
                self.frames.last_mut().unwrap().ip -= *off as usize;
            }
            Op::Call(argc) => {
                let argc = *argc as usize;
                let callee = self.peek(argc)?.clone();
                self.call_value(callee, argc)?;
            }
            Op::Closure(ix, captures) => {
                let proto = self.const_function(*ix)?;
                let mut upvalues = Vec::with_capacity(captures.len());
                for cap in captures {
                    if cap.is_local {
                        let base = self.frames.last().unwrap().base;
                        upvalues.push(self.capture_upvalue(base + cap.index as usize));
                    } else {
                        let parent = self.frames.last().unwrap().closure.upvalues[cap.index as usize].clone();
                        upvalues.push(parent);
                    }
                }
                let closure = Rc::new(ObjClosure { function: proto, upvalues });
                self.objects.push(Obj::Closure(closure.clone()));
                self.push(Value::Obj(Obj::Closure(closure)));
            }
            Op::CloseUpvalue => {
                let top = self.stack.len() - 1;
                self.close_upvalues(top);
                self.pop()?;
            }
            Op::BuildList(n) => {
                let n = *n as usize;
                let list = Rc::new(RefCell::new(ObjList::default()));
                self.objects.push(Obj::List(list.clone()));
                // Push before appending so the list is itself a live root
                // for the duration of the build.
                self.push(Value::Obj(Obj::List(list.clone())));
                let base = self.stack.len() - 1 - n;
                for i in 0..n {
                    let v = self.stack[base + i].clone();
                    list.borrow_mut().append(v);
                }
                let built = self.pop()?;
                self.stack.truncate(base);
                self.push(built);
            }
            Op::IndexSubscr => {
                let index_v = self.pop()?;
                let list_v = self.pop()?;
                let list = list_v.as_list().ok_or(VmError::IndexTargetNotAList)?.clone();
                let idx = index_v.as_number().ok_or(VmError::IndexNotANumber)? as i64;
                if !list.borrow().is_valid_index(idx) {
                    return Err(VmError::IndexOutOfRange);
                }
                let v = list.borrow().get(idx).cloned().unwrap();
                self.push(v);
            }
            Op::StoreSubscr => {
                let item = self.pop()?;
                let index_v = self.pop()?;
                let list_v = self.pop()?;
                let list = list_v.as_list().ok_or(VmError::StoreTargetNotAList)?.clone();
                let idx = index_v.as_number().ok_or(VmError::IndexNotANumber)? as i64;
                if !list.borrow().is_valid_index(idx) {
                    return Err(VmError::InvalidStoreIndex);
                }
                list.borrow_mut().set(idx, item.clone());
                self.push(item);
            }
            Op::Return => {
                let result = self.pop()?;
                let base = self.frames.last().unwrap().base;
                self.close_upvalues(base);
                self.frames.pop();
                if self.frames.is_empty() {
                    self.stack.clear();
                    return Ok(Flow::Halt);
                }
                self.stack.truncate(base);
                self.push(result);
            }
        }
        Ok(Flow::Continue)
    }

    fn numeric_binop(&mut self, f: impl FnOnce(f64, f64) -> Value) -> VmResult<()> {
        let b = self.peek(0)?.as_number();
        let a = self.peek(1)?.as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(f(a, b));
                Ok(())
            }
            _ => Err(VmError::OperandsMustBeNumbers),
        }
    }

    fn add(&mut self) -> VmResult<()> {
        let (a_is_str, b_is_str) = (self.peek(1)?.as_str().is_some(), self.peek(0)?.as_str().is_some());
        if a_is_str && b_is_str {
            let b = self.pop()?;
            let a = self.pop()?;
            let mut combined = a.as_str().unwrap().as_str().to_string();
            combined.push_str(b.as_str().unwrap().as_str());
            let interned = self.intern(&combined);
            self.push(Value::Obj(Obj::Str(interned)));
            return Ok(());
        }
        let (a_num, b_num) = (self.peek(1)?.as_number(), self.peek(0)?.as_number());
        match (a_num, b_num) {
            (Some(a), Some(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(Value::Number(a + b));
                Ok(())
            }
            _ => Err(VmError::OperandsMustBeTwoNumbersOrStrings),
        }
    }

    fn report_runtime_error(&mut self, err: &VmError) {
        let mut msg = err.to_string();
        for frame in self.frames.iter().rev() {
            let pc = frame.ip.saturating_sub(1) as u32;
            let line = frame.closure.function.chunk.lines.line_for_pc(pc);
            let line_str = line.map(|l| l.to_string()).unwrap_or_else(|| "?".into());
            let location = match &frame.closure.function.name {
                Some(name) => format!("{name}()"),
                None => "script".to_string(),
            };
            msg.push_str(&format!("\n[line {line_str}] in {location}"));
        }
        self.host.eprint(&msg);
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    /// Wrap `script` (arity 0, no upvalues) in a closure, activate it as the
    /// first frame, and run to completion or the first runtime error
    /// The VM remains usable for a subsequent `interpret`.
    pub fn interpret(&mut self, script: Rc<FunctionProto>) -> VmResult<()> {
        let closure = Rc::new(ObjClosure { function: script, upvalues: Vec::new() });
        self.objects.push(Obj::Closure(closure.clone()));
        self.push(Value::Obj(Obj::Closure(closure.clone())));
        self.call_closure(closure, 0)?;
        self.run()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
