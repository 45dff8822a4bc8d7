//! disasm.rs — human-readable disassembler for compiled chunks.
//!
//! Two levels:
//!  - `disassemble_compact(chunk)`: one line per op, constants resolved.
//!  - `disassemble_full(chunk, title)`: header + pool + lines + debug + code
//!    (with jump-target labels), followed by the compact view.
//!
//! No external dependencies: pure std.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::bytecode::{chunk::Chunk, ops::Op, ConstValue};

/// Compact view: `PC  (line)  OP  [annotations…]`.
pub fn disassemble_compact(chunk: &Chunk) -> String {
    let mut out = String::new();
    let labels = compute_labels(chunk);

    for (pc_usize, op) in chunk.ops.iter().enumerate() {
        let pc = pc_usize as u32;
        let line = chunk.lines.line_for_pc(pc);
        let line_disp = line.map(|x| x.to_string()).unwrap_or_else(|| "-".into());
        let pretty = fmt_op(chunk, pc, op, &labels);
        let _ = writeln!(out, "{pc:05} (line {line_disp:>4})  {pretty}");
    }
    out
}

/// Full view: header + const pool + line table + debug info + labeled code,
/// followed by the compact rendering.
pub fn disassemble_full(chunk: &Chunk, title: &str) -> String {
    let mut s = String::new();

    {
        let version = chunk.version();
        let stripped = chunk.flags().stripped;
        let n_ops = chunk.ops.len();
        let n_consts = chunk.consts.len();
        let hash = chunk.compute_hash();
        let _ = writeln!(s, "== {title} ==");
        let _ = writeln!(
            s,
            "• version: {version}   stripped: {stripped}   ops: {n_ops}   consts: {n_consts}   hash: 0x{hash:016x}",
        );
    }

    if chunk.consts.len() > 0 {
        let _ = writeln!(s, "\n# Const Pool");
        for (ix, c) in chunk.consts.iter() {
            let (ty, preview) = fmt_const(c);
            let _ = writeln!(s, "  [{ix:03}] {ty:<8}  {preview}");
        }
    } else {
        let _ = writeln!(s, "\n# Const Pool (empty)");
    }

    {
        let _ = writeln!(s, "\n# Line Table (PC ranges)");
        let mut any = false;
        for (range, line) in chunk.lines.iter_ranges() {
            any = true;
            let _ = writeln!(s, "  [{:05}..{:05})  line {}", range.start, range.end, line);
        }
        if !any {
            let _ = writeln!(s, "  <no line info>");
        }
    }

    {
        let _ = writeln!(s, "\n# Debug");
        if let Some(main) = &chunk.debug.main_file {
            let _ = writeln!(s, "  main_file: {main}");
        }
        if !chunk.debug.files.is_empty() {
            let _ = writeln!(s, "  files ({}):", chunk.debug.files.len());
            for f in &chunk.debug.files {
                let _ = writeln!(s, "    - {f}");
            }
        } else {
            let _ = writeln!(s, "  files: (none)");
        }
        if !chunk.debug.symbols.is_empty() {
            let _ = writeln!(s, "  symbols ({}):", chunk.debug.symbols.len());
            for (sym, pc) in &chunk.debug.symbols {
                let _ = writeln!(s, "    - {pc:05}  {sym}");
            }
        } else {
            let _ = writeln!(s, "  symbols: (none)");
        }
    }

    {
        let _ = writeln!(s, "\n# Code");
        let labels = compute_labels(chunk);

        for (pc_usize, op) in chunk.ops.iter().enumerate() {
            let pc = pc_usize as u32;
            let line = chunk.lines.line_for_pc(pc);
            let line_disp = line.map(|x| x.to_string()).unwrap_or_else(|| "-".into());

            if let Some(lbl) = labels.get(&pc) {
                let _ = writeln!(s, "{lbl}:");
            }

            let pretty = fmt_op(chunk, pc, op, &labels);
            let _ = writeln!(s, "  {pc:05} (line {line_disp:>4})  {pretty}");
        }
    }

    s.push_str("\n# Compact\n");
    s.push_str(&disassemble_compact(chunk));

    s
}

/* ────────────────────────────── Helpers ────────────────────────────── */

/// Map of jump/loop target pc -> label, assigned in order of first appearance.
fn compute_labels(chunk: &Chunk) -> HashMap<u32, String> {
    let mut set = HashMap::<u32, String>::new();
    let mut targets = Vec::<u32>::new();

    for (pc_usize, op) in chunk.ops.iter().enumerate() {
        let pc = pc_usize as u32;
        if let Some(dest) = op.jump_target(pc) {
            if (dest as usize) < chunk.ops.len() {
                targets.push(dest);
            }
        }
    }

    targets.sort_unstable();
    targets.dedup();
    for (i, pc) in targets.into_iter().enumerate() {
        set.insert(pc, format!("L{:04}", i + 1));
    }
    set
}

/// Render one instruction with useful annotations (const preview, jump target).
fn fmt_op(chunk: &Chunk, pc: u32, op: &Op, labels: &HashMap<u32, String>) -> String {
    use Op::*;
    match op {
        Constant(ix) => {
            let annex = match chunk.consts.get(*ix) {
                Some(ConstValue::Str(s)) => format!("; \"{}\"", shorten(s, 60)),
                Some(v) => format!("; {}", pretty_const(v, 60)),
                None => "; <invalid>".into(),
            };
            format!("constant {ix}  {annex}")
        }
        GetLocal(ix) => format!("get_local {ix}"),
        SetLocal(ix) => format!("set_local {ix}"),
        GetGlobal(ix) => format!("get_global {ix}  {}", const_annex(chunk, *ix)),
        DefineGlobal(ix) => format!("define_global {ix}  {}", const_annex(chunk, *ix)),
        SetGlobal(ix) => format!("set_global {ix}  {}", const_annex(chunk, *ix)),
        GetUpvalue(ix) => format!("get_upvalue {ix}"),
        SetUpvalue(ix) => format!("set_upvalue {ix}"),

        Closure(ix, caps) => {
            let mut s = format!("closure {ix}  {}", const_annex(chunk, *ix));
            for c in caps {
                let _ = write!(s, "  {}{}", if c.is_local { "local:" } else { "upvalue:" }, c.index);
            }
            s
        }
        CloseUpvalue => "close_upvalue".into(),

        Call(argc) => format!("call argc={argc}"),

        Jump(off) => {
            let dest = op.jump_target(pc).unwrap_or(pc);
            let lbl = labels.get(&dest).cloned().unwrap_or_else(|| dest.to_string());
            format!("jump +{off}  -> {lbl}")
        }
        JumpIfFalse(off) => {
            let dest = op.jump_target(pc).unwrap_or(pc);
            let lbl = labels.get(&dest).cloned().unwrap_or_else(|| dest.to_string());
            format!("jump_if_false +{off}  -> {lbl}")
        }
        Loop(off) => {
            let dest = op.jump_target(pc).unwrap_or(pc);
            let lbl = labels.get(&dest).cloned().unwrap_or_else(|| dest.to_string());
            format!("loop -{off}  -> {lbl}")
        }

        BuildList(n) => format!("build_list {n}"),
        IndexSubscr => "index_subscr".into(),
        StoreSubscr => "store_subscr".into(),

        Print => "print".into(),
        Add => "add".into(),
        Subtract => "subtract".into(),
        Multiply => "multiply".into(),
        Divide => "divide".into(),
        Not => "not".into(),
        Negate => "negate".into(),

        Equal => "equal".into(),
        Greater => "greater".into(),
        Less => "less".into(),

        Nil => "nil".into(),
        True => "true".into(),
        False => "false".into(),

        Pop => "pop".into(),
        Dup => "dup".into(),
        Return => "return".into(),
    }
}

fn const_annex(chunk: &Chunk, ix: u32) -> String {
    match chunk.consts.get(ix) {
        Some(ConstValue::Str(s)) => format!("; \"{}\"", shorten(s, 40)),
        Some(v) => format!("; {}", pretty_const(v, 40)),
        None => "; <invalid>".into(),
    }
}

/// (short type tag, short preview) for a constant.
fn fmt_const(c: &ConstValue) -> (&'static str, String) {
    match c {
        ConstValue::Null => ("null", "null".into()),
        ConstValue::Bool(b) => ("bool", format!("{b}")),
        ConstValue::I64(i) => ("i64", format!("{i}")),
        ConstValue::F64(x) => ("f64", format!("{x}")),
        ConstValue::Str(s) => ("str", preview_str(s, 80)),
        ConstValue::Bytes(b) => ("bytes", format!("len={}", b.len())),
        ConstValue::Function(p) => ("fn", format!("<fn {} /{}>", p.display_name(), p.arity)),
    }
}

fn pretty_const(c: &ConstValue, str_max: usize) -> String {
    match c {
        ConstValue::Str(s) => format!("\"{}\"", shorten(s, str_max)),
        ConstValue::Bytes(b) => format!("bytes[{}]", b.len()),
        other => format!("{other}"),
    }
}

fn preview_str(s: &str, max: usize) -> String {
    let esc = escape_for_preview(s);
    if esc.len() <= max {
        format!("\"{esc}\"")
    } else {
        format!("\"{}…\"", &esc[..max])
    }
}

fn escape_for_preview(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn shorten(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ChunkFlags, ConstValue};

    #[test]
    fn compact_disassembly_resolves_constants() {
        let mut c = Chunk::new(ChunkFlags { stripped: false });
        let k = c.add_const(ConstValue::Str("hi".into()));
        c.push_op(Op::Constant(k), Some(1));
        c.push_op(Op::Print, Some(1));
        c.push_op(Op::Return, Some(1));

        let out = disassemble_compact(&c);
        assert!(out.contains("constant 0"));
        assert!(out.contains("\"hi\""));
        assert!(out.contains("return"));
    }

    #[test]
    fn full_disassembly_labels_jump_targets() {
        let mut c = Chunk::new(ChunkFlags { stripped: false });
        c.push_op(Op::True, Some(1));
        c.push_op(Op::JumpIfFalse(1), Some(1));
        c.push_op(Op::Nil, Some(2));
        c.push_op(Op::Return, Some(3));

        let out = disassemble_full(&c, "test");
        assert!(out.contains("L0001:"));
        assert!(out.contains("jump_if_false +1  -> L0001"));
    }
}
