//! Integration tests for vitte-core: assemble -> disassemble -> byte roundtrip,
//! exercised against small programs shaped like real VM scenarios (globals,
//! control flow, nested closures).

use std::rc::Rc;

use vitte_core::bytecode::{ChunkFlags, ConstValue, FunctionProto, Op};
use vitte_core::{asm, disasm, Chunk};

#[test]
fn assemble_globals_and_print_then_roundtrips_bytes() {
    let src = r#"
        ; define a global and print it back
        .const greeting = "Hello, Vitte!"
        constant #greeting
        define_global #greeting
        get_global #greeting
        print
        return
    "#;

    let mut chunk = asm::assemble(src).expect("assemble ok");
    assert_eq!(chunk.len(), 4);

    let mut bytes = chunk.to_bytes();
    let back = Chunk::from_bytes(&bytes).expect("load ok");
    assert_eq!(back.len(), chunk.len());
    assert_eq!(back.const_at(0), Some(&ConstValue::Str("Hello, Vitte!".into())));

    bytes[bytes.len() - 1] ^= 0xFF;
    let err = Chunk::from_bytes(&bytes).unwrap_err();
    assert!(format!("{err}").to_lowercase().contains("hash"));
}

#[test]
fn assemble_loop_disassembles_with_labels() {
    let src = r#"
        .const zero = 0
        constant #zero
    loop_top:
        get_local 0
        jump_if_false @loop_end
        get_local 0
        pop
        loop @loop_top
    loop_end:
        return
    "#;

    let chunk = asm::assemble(src).expect("assemble ok");
    assert!(matches!(chunk.ops[2], Op::JumpIfFalse(_)));
    assert!(matches!(chunk.ops[5], Op::Loop(_)));

    let compact = disasm::disassemble_compact(&chunk);
    assert!(compact.contains("jump_if_false"));
    assert!(compact.contains("loop"));

    let full = disasm::disassemble_full(&chunk, "loop demo");
    // the loop body's entry and the fallthrough target both get a label
    assert!(full.contains("L0001:") || full.contains("L0002:"));
    assert!(full.contains("# Const Pool"));
    assert!(full.contains("# Code"));
}

#[test]
fn assemble_nested_closure_and_roundtrip_bytes() {
    let src = r#"
        .function makeCounter arity=0 upvalues=0
            constant 0
            .function inc arity=0 upvalues=1
                get_upvalue 0
                constant 1
                add
                set_upvalue 0
                get_upvalue 0
                return
            .end
            closure #inc local:0
            return
        .end

        get_global #makeCounter
        call 0
        print
        return
    "#;

    let mut chunk = asm::assemble(src).expect("assemble ok");
    let maker_ix = match chunk.ops[0] {
        Op::GetGlobal(ix) => ix,
        ref other => panic!("expected get_global, got {other:?}"),
    };

    match chunk.const_at(maker_ix) {
        Some(ConstValue::Function(proto)) => {
            assert_eq!(proto.display_name(), "makeCounter");
            assert_eq!(proto.arity, 0);
            // constant 0, closure #inc, return
            assert_eq!(proto.chunk.len(), 3);
        }
        other => panic!("expected function constant, got {other:?}"),
    }

    let bytes = chunk.to_bytes();
    let back = Chunk::from_bytes(&bytes).expect("load ok");
    match back.const_at(maker_ix) {
        Some(ConstValue::Function(proto)) => assert_eq!(proto.display_name(), "makeCounter"),
        other => panic!("expected function constant after roundtrip, got {other:?}"),
    }
}

#[test]
fn manual_chunk_with_nested_function_proto_roundtrips() {
    let mut inner = Chunk::new(ChunkFlags { stripped: false });
    inner.push_op(Op::GetLocal(1), Some(1));
    inner.push_op(Op::Return, Some(1));
    let proto = FunctionProto::new(Some("helper".into()), 1, 0, inner);

    let mut outer = Chunk::new(ChunkFlags { stripped: false });
    let k = outer.add_const(ConstValue::Function(Rc::new(proto)));
    outer.push_op(Op::Closure(k, vec![]), Some(1));
    outer.push_op(Op::Return, Some(2));

    let bytes = outer.to_bytes();
    let back = Chunk::from_bytes(&bytes).expect("load ok");
    match back.const_at(k) {
        Some(ConstValue::Function(p)) => {
            assert_eq!(p.display_name(), "helper");
            assert_eq!(p.arity, 1);
            assert_eq!(p.chunk.len(), 2);
        }
        other => panic!("expected nested function constant, got {other:?}"),
    }
}

#[test]
fn assemble_reports_line_numbers_on_error() {
    let src = "constant 1\nfrobnicate\n";
    let err = asm::assemble(src).unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.msg.contains("unknown mnemonic"));
}
