//! vitte-vm — the stack-based bytecode VM: value model, object heap, string
//! interning, globals, call-frame/value stacks, and the dispatch loop that
//! executes a `vitte_core::Chunk`.
//!
//! ```no_run
//! use std::rc::Rc;
//! use vitte_core::bytecode::{Chunk, ChunkFlags, FunctionProto, Op};
//! use vitte_vm::Vm;
//!
//! let mut chunk = Chunk::new(ChunkFlags::default());
//! let msg = chunk.add_const(vitte_core::bytecode::ConstValue::Str("hi".into()));
//! chunk.push_op(Op::Constant(msg), Some(1));
//! chunk.push_op(Op::Print, Some(1));
//! chunk.push_op(Op::Nil, Some(1));
//! chunk.push_op(Op::Return, Some(1));
//!
//! let script = Rc::new(FunctionProto::new(None, 0, 0, chunk));
//! let mut vm = Vm::new();
//! vm.interpret(script).expect("runs to completion");
//! ```

pub mod error;
pub mod frame;
pub mod intern;
pub mod native;
pub mod value;
pub mod vm;

pub use error::{VmError, VmResult};
pub use frame::CallFrame;
pub use intern::Interner;
pub use value::{Obj, ObjClosure, ObjList, ObjNative, ObjString, ObjUpvalue, Value};
pub use vm::{DefaultHost, Host, Vm, VmOptions};

pub mod prelude {
    pub use crate::error::{VmError, VmResult};
    pub use crate::value::{Obj, Value};
    pub use crate::vm::{Host, Vm, VmOptions};
}
