//! ops.rs — the opcode set dispatched by `vitte-vm`.
//!
//! One variant per instruction, operands carried directly on the enum
//! rather than packed into a raw byte stream: `Chunk` already serializes
//! `Vec<Op>` through `serde`/`bincode`, so there is no separate encode/decode
//! step to hand-roll here, unlike the byte-addressed instruction stream this
//! opcode table mirrors.
//!
//! Compat note: **do not reorder variants** (bincode's enum encoding is
//! positional); add new ones at the bottom and bump `CHUNK_VERSION` in
//! `chunk.rs` if the change is not purely additive.

use serde::{Deserialize, Serialize};

pub type ConstIx = u32;
pub type LocalIx = u8;
pub type UpvalueIx = u8;
pub type JumpOffset = u16;
pub type ArgCount = u8;
pub type ListCount = u8;

/// One upvalue-capture descriptor read by `Closure`: the slot is either a
/// local of the *enclosing* frame (`is_local = true`, captured by
/// `captureUpvalue`), or inherited from the enclosing closure's own upvalue
/// array at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpvalueCapture {
    pub is_local: bool,
    pub index: UpvalueIx,
}

/// The exhaustive instruction set of the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    // ----- Constants & literals -----
    Constant(ConstIx), // push chunk constant
    Nil,               // push nil
    True,              // push true
    False,             // push false

    // ----- Stack shuffling -----
    Pop, // discard top
    Dup, // duplicate top

    // ----- Locals -----
    GetLocal(LocalIx), // push locals[slot]
    SetLocal(LocalIx), // locals[slot] = peek(0); value stays on stack

    // ----- Globals -----
    GetGlobal(ConstIx),    // push globals[name]; error if undefined
    DefineGlobal(ConstIx), // globals[name] = pop()
    SetGlobal(ConstIx),    // globals[name] = peek(0); error if undefined

    // ----- Upvalues -----
    GetUpvalue(UpvalueIx), // push *upvalues[idx]
    SetUpvalue(UpvalueIx), // *upvalues[idx] = peek(0); value stays on stack

    // ----- Comparisons -----
    Equal,
    Greater,
    Less,

    // ----- Arithmetic (ADD also concatenates two strings) -----
    Add,
    Subtract,
    Multiply,
    Divide,

    // ----- Unary -----
    Not,
    Negate,

    // ----- I/O -----
    Print, // pop and print, with trailing newline

    // ----- Control flow -----
    Jump(JumpOffset),         // ip += offset, unconditional
    JumpIfFalse(JumpOffset),  // if !truthy(peek(0)) { ip += offset }; does not pop
    Loop(JumpOffset),         // ip -= offset, unconditional

    // ----- Calls -----
    Call(ArgCount), // dispatch peek(argc) as closure or native

    // ----- Closures & upvalues -----
    Closure(ConstIx, Vec<UpvalueCapture>), // build closure over const[idx], then capture N upvalues
    CloseUpvalue,                          // close the upvalue at top of stack, then pop

    // ----- Lists -----
    BuildList(ListCount), // pop n items, push a fresh list holding them in order
    IndexSubscr,          // list[index]
    StoreSubscr,          // list[index] = item; leaves item on stack

    // ----- Return -----
    Return,
}

impl Op {
    /// Short mnemonic, as used by the text assembler, logs and disassembly.
    pub fn mnemonic(&self) -> &'static str {
        use Op::*;
        match self {
            Constant(_) => "constant",
            Nil => "nil",
            True => "true",
            False => "false",
            Pop => "pop",
            Dup => "dup",
            GetLocal(_) => "get_local",
            SetLocal(_) => "set_local",
            GetGlobal(_) => "get_global",
            DefineGlobal(_) => "define_global",
            SetGlobal(_) => "set_global",
            GetUpvalue(_) => "get_upvalue",
            SetUpvalue(_) => "set_upvalue",
            Equal => "equal",
            Greater => "greater",
            Less => "less",
            Add => "add",
            Subtract => "subtract",
            Multiply => "multiply",
            Divide => "divide",
            Not => "not",
            Negate => "negate",
            Print => "print",
            Jump(_) => "jump",
            JumpIfFalse(_) => "jump_if_false",
            Loop(_) => "loop",
            Call(_) => "call",
            Closure(_, _) => "closure",
            CloseUpvalue => "close_upvalue",
            BuildList(_) => "build_list",
            IndexSubscr => "index_subscr",
            StoreSubscr => "store_subscr",
            Return => "return",
        }
    }

    /// Static stack-depth delta, when it does not depend on runtime state.
    /// `None` for `Call` (depends on the callee) and `Return` (unwinds a frame).
    pub fn stack_delta(&self) -> Option<i32> {
        use Op::*;
        match self {
            Constant(_) | Nil | True | False | Dup => Some(1),
            Pop | DefineGlobal(_) | Equal | Greater | Less | Add | Subtract | Multiply
            | Divide | Print | CloseUpvalue => Some(-1),
            GetLocal(_) | GetGlobal(_) | GetUpvalue(_) => Some(1),
            SetLocal(_) | SetGlobal(_) | SetUpvalue(_) => Some(0),
            Not | Negate => Some(0),
            Jump(_) | JumpIfFalse(_) | Loop(_) => Some(0),
            Closure(_, _) => Some(1),
            BuildList(n) => Some(1 - i32::from(*n)),
            IndexSubscr => Some(-1),
            StoreSubscr => Some(-2),
            Call(_) | Return => None,
        }
    }

    /// Is this a control-flow instruction (jump/loop)?
    pub fn is_jump(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::JumpIfFalse(_) | Op::Loop(_))
    }

    /// The raw unsigned 16-bit offset carried by a jump/loop instruction.
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        match *self {
            Op::Jump(o) | Op::JumpIfFalse(o) => Some(o),
            Op::Loop(o) => Some(o),
            _ => None,
        }
    }

    /// Destination pc, given the pc this instruction occupies.
    /// `JUMP`/`JUMP_IF_FALSE` are relative to the following instruction;
    /// `LOOP` subtracts instead of adding (it always jumps backward).
    pub fn jump_target(&self, pc: u32) -> Option<u32> {
        let next = i64::from(pc) + 1;
        match *self {
            Op::Jump(o) | Op::JumpIfFalse(o) => Some((next + i64::from(o)).max(0) as u32),
            Op::Loop(o) => Some((next - i64::from(o)).max(0) as u32),
            _ => None,
        }
    }

    /// Does this instruction end a call frame (no fallthrough)?
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Return)
    }

    /// Nature of the immediate operand(s), for the disassembler and assembler.
    pub fn operand_kind(&self) -> OperandKind {
        use Op::*;
        match self {
            Constant(_) | GetGlobal(_) | DefineGlobal(_) | SetGlobal(_) => OperandKind::Const,
            GetLocal(_) | SetLocal(_) => OperandKind::Local,
            GetUpvalue(_) | SetUpvalue(_) => OperandKind::Upvalue,
            Jump(_) | JumpIfFalse(_) => OperandKind::JumpForward,
            Loop(_) => OperandKind::JumpBackward,
            Call(_) => OperandKind::Argc,
            Closure(_, caps) => OperandKind::ClosureDesc(caps.len() as u8),
            BuildList(n) => OperandKind::ListCount(*n),
            _ => OperandKind::None,
        }
    }
}

/// Nature of an opcode's immediate operand(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    Const,
    Local,
    Upvalue,
    Argc,
    JumpForward,
    JumpBackward,
    /// `Closure`'s constant index plus N upvalue-capture descriptors.
    ClosureDesc(u8),
    ListCount(u8),
}

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use Op::*;
        match self {
            Constant(ix) => write!(f, "constant {ix}"),
            Nil => write!(f, "nil"),
            True => write!(f, "true"),
            False => write!(f, "false"),
            Pop => write!(f, "pop"),
            Dup => write!(f, "dup"),
            GetLocal(ix) => write!(f, "get_local {ix}"),
            SetLocal(ix) => write!(f, "set_local {ix}"),
            GetGlobal(ix) => write!(f, "get_global {ix}"),
            DefineGlobal(ix) => write!(f, "define_global {ix}"),
            SetGlobal(ix) => write!(f, "set_global {ix}"),
            GetUpvalue(ix) => write!(f, "get_upvalue {ix}"),
            SetUpvalue(ix) => write!(f, "set_upvalue {ix}"),
            Equal => write!(f, "equal"),
            Greater => write!(f, "greater"),
            Less => write!(f, "less"),
            Add => write!(f, "add"),
            Subtract => write!(f, "subtract"),
            Multiply => write!(f, "multiply"),
            Divide => write!(f, "divide"),
            Not => write!(f, "not"),
            Negate => write!(f, "negate"),
            Print => write!(f, "print"),
            Jump(o) => write!(f, "jump +{o}"),
            JumpIfFalse(o) => write!(f, "jump_if_false +{o}"),
            Loop(o) => write!(f, "loop -{o}"),
            Call(argc) => write!(f, "call {argc}"),
            Closure(ix, caps) => {
                write!(f, "closure {ix}")?;
                for c in caps {
                    write!(f, " {}{}", if c.is_local { "local:" } else { "upvalue:" }, c.index)?;
                }
                Ok(())
            }
            CloseUpvalue => write!(f, "close_upvalue"),
            BuildList(n) => write!(f, "build_list {n}"),
            IndexSubscr => write!(f, "index_subscr"),
            StoreSubscr => write!(f, "store_subscr"),
            Return => write!(f, "return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(Op::Add.mnemonic(), "add");
        assert_eq!(Op::Nil.mnemonic(), "nil");
        assert_eq!(Op::Jump(0).mnemonic(), "jump");
        assert_eq!(Op::Call(3).mnemonic(), "call");
    }

    #[test]
    fn stack_deltas_match_spec_table() {
        assert_eq!(Op::Constant(0).stack_delta(), Some(1));
        assert_eq!(Op::Add.stack_delta(), Some(-1));
        assert_eq!(Op::Negate.stack_delta(), Some(0));
        assert_eq!(Op::Pop.stack_delta(), Some(-1));
        assert_eq!(Op::SetGlobal(0).stack_delta(), Some(0));
        assert_eq!(Op::Return.stack_delta(), None);
        assert_eq!(Op::Call(2).stack_delta(), None);
        assert_eq!(Op::BuildList(3).stack_delta(), Some(-2));
        assert_eq!(Op::StoreSubscr.stack_delta(), Some(-2));
    }

    #[test]
    fn jump_targets() {
        let j = Op::Jump(5);
        assert_eq!(j.jump_target(10), Some(16)); // 10+1+5
        let jz = Op::JumpIfFalse(0);
        assert_eq!(jz.jump_target(0), Some(1));
        let l = Op::Loop(3);
        assert_eq!(l.jump_target(10), Some(8)); // 10+1-3
    }

    #[test]
    fn display_is_human() {
        assert_eq!(Op::Constant(42).to_string(), "constant 42");
        assert_eq!(Op::Loop(3).to_string(), "loop -3");
        assert_eq!(
            Op::Closure(7, vec![UpvalueCapture { is_local: true, index: 0 }]).to_string(),
            "closure 7 local:0"
        );
    }
}
