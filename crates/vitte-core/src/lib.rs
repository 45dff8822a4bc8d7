//! vitte-core — bytecode core for the vitte-vm interpreter.
//!
//! Holds the *compiled artifact* shared between an external compiler (not
//! part of this crate) and `vitte-vm`: opcodes, chunk format, constant pool,
//! line table, a disassembler, and a small text assembler that stands in for
//! a real language frontend when producing chunks for tests, the REPL, and
//! the CLI.
//!
//! ## Modules
//! - `bytecode` : `Chunk`, `ConstPool`, `ConstValue`, `Op`.
//! - `asm`      : textual mnemonic assembler → `Chunk` (test/REPL surrogate
//!                for the real, out-of-scope compiler).
//! - `disasm`   : human-readable disassembly.
//!
//! ## Features
//! - **tracing**: instrument chunk building with `tracing` spans.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod asm;
pub mod bytecode;

pub use bytecode::{chunk::ChunkLoadError, disasm, Chunk, ChunkFlags, ConstPool, ConstValue, LineTable, Op};

/// Crate version, handy for `.vitbc` banners and CLI `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience prelude for downstream crates (`vitte-vm`, `vitte-cli`).
pub mod prelude {
    pub use crate::{
        asm, bytecode, disasm, Chunk, ChunkFlags, ConstPool, ConstValue, LineTable, Op,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip_bytes() {
        let mut c = Chunk::new(ChunkFlags { stripped: false });
        let k = c.add_const(ConstValue::Str("yo".into()));
        c.push_op(Op::Constant(k), Some(1));
        c.push_op(Op::Print, Some(1));
        c.push_op(Op::Return, Some(1));

        let mut bytes = c.to_bytes();
        let c2 = Chunk::from_bytes(&bytes).expect("roundtrip ok");
        assert_eq!(c2.len(), 3);

        bytes[bytes.len() - 1] ^= 0xFF;
        let err = Chunk::from_bytes(&bytes).unwrap_err();
        assert!(format!("{err}").to_lowercase().contains("hash"));
    }
}
