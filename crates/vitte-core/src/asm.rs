//! asm.rs — a small textual assembler over the opcode table in `ops.rs`.
//!
//! Stands in for a full lexer/parser/compiler frontend: it lets tests, the
//! REPL and the CLI produce a real `Chunk` by hand, one mnemonic per line,
//! without writing a frontend for the source language — a concrete, testable
//! stand-in for the compiler, never advertised as a real language compiler.
//!
//! ## Syntax
//! ```text
//! ; comments start with ';' and run to end of line
//! .const pi = 3.1415926535
//! .const greeting = "hello"
//!
//! .function inc arity=0 upvalues=1
//!     get_upvalue 0
//!     constant 1
//!     add
//!     set_upvalue 0
//!     get_upvalue 0
//!     return
//! .end
//!
//! .function makeCounter arity=0 upvalues=0
//!     constant 0
//!     closure #inc local:0
//!     return
//! .end
//!
//! loop_top:
//!     get_local 1
//!     jump_if_false @loop_end
//!     loop @loop_top
//! loop_end:
//!     return
//! ```
//!
//! Operand forms: bare integers (`get_local 0`), bare numbers/strings used
//! as inline constants (`constant 3.14`, `constant "hi"`), named constants
//! declared with `.const`/`.function` (`get_global #name`), label references
//! for control flow (`jump @label`), and capture descriptors for `closure`
//! (`local:N` / `upvalue:N`).

use ahash::AHashMap;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::ops::{UpvalueCapture, UpvalueIx};
use crate::bytecode::{Chunk, ChunkFlags, ConstValue, FunctionProto, Op};

#[derive(Debug, Clone)]
pub struct AsmError {
    pub line: usize,
    pub msg: String,
}

impl AsmError {
    fn new(line: usize, msg: impl Into<String>) -> Self {
        Self { line, msg: msg.into() }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.msg)
    }
}

impl std::error::Error for AsmError {}

/// Assemble a source text into a `Chunk`, resolving labels, inline
/// constants, named constants and nested function literals.
pub fn assemble(src: &str) -> Result<Chunk, AsmError> {
    let lines: Vec<(usize, &str)> = src.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let mut cur = Cursor { lines: &lines, pos: 0 };
    let items = parse_block(&mut cur, false)?;
    assemble_items(&items)
}

#[derive(Debug, Clone)]
enum Item {
    Label { name: String, line: usize },
    Const { name: String, value: ConstValue, line: usize },
    Function { name: String, arity: u8, upvalues: u8, body: Vec<Item>, line: usize },
    Instr { mnemonic: String, operands: Vec<String>, line: usize },
}

struct Cursor<'a> {
    lines: &'a [(usize, &'a str)],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<(usize, &'a str)> {
        self.lines.get(self.pos).copied()
    }
    fn advance(&mut self) -> Option<(usize, &'a str)> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }
    fn last_line(&self) -> usize {
        self.lines.last().map(|(l, _)| *l).unwrap_or(0)
    }
}

fn parse_block(cur: &mut Cursor<'_>, in_function: bool) -> Result<Vec<Item>, AsmError> {
    let mut items = Vec::new();
    loop {
        let Some((lineno, raw)) = cur.peek() else {
            if in_function {
                return Err(AsmError::new(cur.last_line(), "unterminated .function block (missing .end)"));
            }
            return Ok(items);
        };

        let stripped = strip_comment(raw).trim();
        if stripped.is_empty() {
            cur.advance();
            continue;
        }

        if stripped == ".end" {
            if !in_function {
                return Err(AsmError::new(lineno, "unexpected .end outside .function"));
            }
            cur.advance();
            return Ok(items);
        }

        if let Some(rest) = stripped.strip_prefix(".function") {
            cur.advance();
            let toks = tokenize(rest);
            let name = toks
                .first()
                .cloned()
                .ok_or_else(|| AsmError::new(lineno, ".function requires a name"))?;
            let mut arity = 0u8;
            let mut upvalues = 0u8;
            for tok in &toks[1..] {
                if let Some(v) = tok.strip_prefix("arity=") {
                    arity = v.parse().map_err(|_| AsmError::new(lineno, "invalid arity="))?;
                } else if let Some(v) = tok.strip_prefix("upvalues=") {
                    upvalues = v.parse().map_err(|_| AsmError::new(lineno, "invalid upvalues="))?;
                } else {
                    return Err(AsmError::new(lineno, format!("unknown .function attribute: {tok}")));
                }
            }
            let body = parse_block(cur, true)?;
            items.push(Item::Function { name, arity, upvalues, body, line: lineno });
            continue;
        }

        if let Some(rest) = stripped.strip_prefix(".const") {
            let toks = tokenize(rest);
            if toks.len() < 3 || toks[1] != "=" {
                return Err(AsmError::new(lineno, "expected: .const NAME = VALUE"));
            }
            let name = toks[0].clone();
            let value = parse_literal(lineno, &toks[2])?;
            items.push(Item::Const { name, value, line: lineno });
            cur.advance();
            continue;
        }

        if let Some(name) = stripped.strip_suffix(':') {
            items.push(Item::Label { name: name.to_string(), line: lineno });
            cur.advance();
            continue;
        }

        let toks = tokenize(stripped);
        let mnemonic = toks[0].to_ascii_lowercase();
        items.push(Item::Instr { mnemonic, operands: toks[1..].to_vec(), line: lineno });
        cur.advance();
    }
}

/// Splits a line into whitespace-separated tokens, keeping quoted strings
/// (with their surrounding quotes) intact as a single token.
fn tokenize(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    let mut cur = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            continue;
        }
        if c == '"' {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            cur.push(chars.next().unwrap());
            while let Some(&c) = chars.peek() {
                cur.push(c);
                chars.next();
                if c == '\\' {
                    if let Some(&esc) = chars.peek() {
                        cur.push(esc);
                        chars.next();
                    }
                } else if c == '"' {
                    break;
                }
            }
            out.push(std::mem::take(&mut cur));
            continue;
        }
        cur.push(c);
        chars.next();
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            ';' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_literal(line: usize, tok: &str) -> Result<ConstValue, AsmError> {
    if let Some(inner) = tok.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(ConstValue::Str(unescape(inner)));
    }
    match tok {
        "true" => return Ok(ConstValue::Bool(true)),
        "false" => return Ok(ConstValue::Bool(false)),
        "null" | "nil" => return Ok(ConstValue::Null),
        _ => {}
    }
    if let Ok(i) = tok.parse::<i64>() {
        return Ok(ConstValue::I64(i));
    }
    if let Ok(f) = tok.parse::<f64>() {
        return Ok(ConstValue::F64(f));
    }
    Err(AsmError::new(line, format!("invalid constant literal: {tok}")))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Named-constant and label scope for one chunk (function body or the
/// top-level script); nested `.function` blocks get their own scope.
struct Scope {
    named_consts: AHashMap<String, u32>,
    labels: AHashMap<String, u32>,
}

fn assemble_items(items: &[Item]) -> Result<Chunk, AsmError> {
    let mut chunk = Chunk::new(ChunkFlags { stripped: false });
    let mut scope = Scope { named_consts: AHashMap::new(), labels: AHashMap::new() };

    // Pass 1: materialize `.const` and `.function` declarations into the
    // constant pool, regardless of where they appear relative to their use.
    for item in items {
        match item {
            Item::Const { name, value, .. } => {
                let ix = chunk.add_const(value.clone());
                scope.named_consts.insert(name.clone(), ix);
            }
            Item::Function { name, arity, upvalues, body, .. } => {
                let inner = assemble_items(body)?;
                let proto = FunctionProto::new(Some(name.clone()), *arity, *upvalues, inner);
                let ix = chunk.add_const(ConstValue::Function(Rc::new(proto)));
                scope.named_consts.insert(name.clone(), ix);
            }
            _ => {}
        }
    }

    // Pass 2: assign pcs to labels (only `Instr` items occupy a slot).
    let mut pc: u32 = 0;
    for item in items {
        match item {
            Item::Label { name, .. } => {
                scope.labels.insert(name.clone(), pc);
            }
            Item::Instr { .. } => pc += 1,
            _ => {}
        }
    }

    // Pass 3: emit one `Op` per instruction, resolving operands.
    for item in items {
        if let Item::Instr { mnemonic, operands, line } = item {
            let op = build_op(&mut chunk, &scope, *line, mnemonic, operands)?;
            chunk.push_op(op, Some(*line as u32));
        }
    }

    Ok(chunk)
}

fn build_op(
    chunk: &mut Chunk,
    scope: &Scope,
    line: usize,
    mnemonic: &str,
    operands: &[String],
) -> Result<Op, AsmError> {
    let this_pc = chunk.len() as u32;

    let const_ref = |chunk: &mut Chunk, tok: &str| -> Result<u32, AsmError> {
        if let Some(name) = tok.strip_prefix('#') {
            scope
                .named_consts
                .get(name)
                .copied()
                .ok_or_else(|| AsmError::new(line, format!("unknown constant #{name}")))
        } else {
            let v = parse_literal(line, tok)?;
            Ok(chunk.add_const(v))
        }
    };

    let int_operand = |tok: &str| -> Result<u8, AsmError> {
        tok.parse::<u8>().map_err(|_| AsmError::new(line, format!("expected small integer, got {tok}")))
    };

    let jump_forward = |tok: &str| -> Result<u16, AsmError> {
        let name = tok.strip_prefix('@').ok_or_else(|| AsmError::new(line, "expected @label"))?;
        let target = scope
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| AsmError::new(line, format!("unknown label @{name}")))?;
        let next = this_pc + 1;
        if target < next {
            return Err(AsmError::new(line, format!("@{name} is behind this instruction; use `loop`")));
        }
        Ok((target - next) as u16)
    };

    let jump_backward = |tok: &str| -> Result<u16, AsmError> {
        let name = tok.strip_prefix('@').ok_or_else(|| AsmError::new(line, "expected @label"))?;
        let target = scope
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| AsmError::new(line, format!("unknown label @{name}")))?;
        let next = this_pc + 1;
        if target > next {
            return Err(AsmError::new(line, format!("@{name} is ahead of this instruction; use `jump`")));
        }
        Ok((next - target) as u16)
    };

    let need = |n: usize| -> Result<(), AsmError> {
        if operands.len() != n {
            return Err(AsmError::new(
                line,
                format!("{mnemonic} expects {n} operand(s), got {}", operands.len()),
            ));
        }
        Ok(())
    };

    Ok(match mnemonic {
        "constant" => {
            need(1)?;
            Op::Constant(const_ref(chunk, &operands[0])?)
        }
        "nil" => { need(0)?; Op::Nil }
        "true" => { need(0)?; Op::True }
        "false" => { need(0)?; Op::False }
        "pop" => { need(0)?; Op::Pop }
        "dup" => { need(0)?; Op::Dup }
        "get_local" => { need(1)?; Op::GetLocal(int_operand(&operands[0])?) }
        "set_local" => { need(1)?; Op::SetLocal(int_operand(&operands[0])?) }
        "get_global" => { need(1)?; Op::GetGlobal(const_ref(chunk, &operands[0])?) }
        "define_global" => { need(1)?; Op::DefineGlobal(const_ref(chunk, &operands[0])?) }
        "set_global" => { need(1)?; Op::SetGlobal(const_ref(chunk, &operands[0])?) }
        "get_upvalue" => { need(1)?; Op::GetUpvalue(int_operand(&operands[0])?) }
        "set_upvalue" => { need(1)?; Op::SetUpvalue(int_operand(&operands[0])?) }
        "equal" => { need(0)?; Op::Equal }
        "greater" => { need(0)?; Op::Greater }
        "less" => { need(0)?; Op::Less }
        "add" => { need(0)?; Op::Add }
        "subtract" => { need(0)?; Op::Subtract }
        "multiply" => { need(0)?; Op::Multiply }
        "divide" => { need(0)?; Op::Divide }
        "not" => { need(0)?; Op::Not }
        "negate" => { need(0)?; Op::Negate }
        "print" => { need(0)?; Op::Print }
        "jump" => { need(1)?; Op::Jump(jump_forward(&operands[0])?) }
        "jump_if_false" => { need(1)?; Op::JumpIfFalse(jump_forward(&operands[0])?) }
        "loop" => { need(1)?; Op::Loop(jump_backward(&operands[0])?) }
        "call" => { need(1)?; Op::Call(int_operand(&operands[0])?) }
        "closure" => {
            if operands.is_empty() {
                return Err(AsmError::new(line, "closure expects a function constant operand"));
            }
            let ix = const_ref(chunk, &operands[0])?;
            let mut caps = Vec::with_capacity(operands.len() - 1);
            for tok in &operands[1..] {
                let (is_local, idx) = if let Some(v) = tok.strip_prefix("local:") {
                    (true, v)
                } else if let Some(v) = tok.strip_prefix("upvalue:") {
                    (false, v)
                } else {
                    return Err(AsmError::new(line, format!("expected local:N or upvalue:N, got {tok}")));
                };
                let index: UpvalueIx = idx
                    .parse()
                    .map_err(|_| AsmError::new(line, format!("invalid upvalue index: {idx}")))?;
                caps.push(UpvalueCapture { is_local, index });
            }
            Op::Closure(ix, caps)
        }
        "close_upvalue" => { need(0)?; Op::CloseUpvalue }
        "build_list" => { need(1)?; Op::BuildList(int_operand(&operands[0])?) }
        "index_subscr" => { need(0)?; Op::IndexSubscr }
        "store_subscr" => { need(0)?; Op::StoreSubscr }
        "return" => { need(0)?; Op::Return }
        other => return Err(AsmError::new(line, format!("unknown mnemonic: {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ConstValue, Op};

    #[test]
    fn arithmetic_and_print() {
        let src = r#"
            constant 1
            constant 2
            constant 3
            multiply
            add
            print
            return
        "#;
        let chunk = assemble(src).expect("assemble ok");
        assert_eq!(chunk.ops.len(), 7);
        assert!(matches!(chunk.ops[3], Op::Multiply));
        assert!(matches!(chunk.ops[6], Op::Return));
    }

    #[test]
    fn named_const_and_global() {
        let src = r#"
            .const greeting = "hi"
            get_global #greeting
            print
            return
        "#;
        let chunk = assemble(src).expect("assemble ok");
        match &chunk.ops[0] {
            Op::GetGlobal(ix) => {
                assert_eq!(chunk.const_at(*ix), Some(&ConstValue::Str("hi".into())));
            }
            other => panic!("expected get_global, got {other:?}"),
        }
    }

    #[test]
    fn forward_and_backward_jump() {
        let src = r#"
            true
        loop_top:
            jump_if_false @loop_end
            nil
            pop
            loop @loop_top
        loop_end:
            return
        "#;
        let chunk = assemble(src).expect("assemble ok");
        assert!(matches!(chunk.ops[1], Op::JumpIfFalse(_)));
        assert!(matches!(chunk.ops[4], Op::Loop(_)));
    }

    #[test]
    fn nested_function_and_closure() {
        let src = r#"
            .function inc arity=0 upvalues=1
                get_upvalue 0
                constant 1
                add
                set_upvalue 0
                get_upvalue 0
                return
            .end

            constant 0
            closure #inc local:0
            return
        "#;
        let chunk = assemble(src).expect("assemble ok");
        match &chunk.ops[1] {
            Op::Closure(ix, caps) => {
                assert_eq!(caps.len(), 1);
                assert!(caps[0].is_local);
                match chunk.const_at(*ix) {
                    Some(ConstValue::Function(p)) => {
                        assert_eq!(p.display_name(), "inc");
                        assert_eq!(p.chunk.ops.len(), 6);
                    }
                    other => panic!("expected function constant, got {other:?}"),
                }
            }
            other => panic!("expected closure, got {other:?}"),
        }
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let err = assemble("frobnicate\n").unwrap_err();
        assert!(err.msg.contains("unknown mnemonic"));
    }
}
