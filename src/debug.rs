// File: src/debug.rs
//
// Bytecode disassembler backing the LOX_PRINT_CODE and LOX_TRACE_EXEC
// switches. Output goes to stderr so traced programs still produce clean
// stdout for the expect-comment harness.

use crate::bytecode::{Chunk, OpCode};
use crate::memory::Heap;
use crate::value::{format_value, Value};

pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    eprintln!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset);
    }
}

/// Prints one instruction and returns the offset of the next.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    eprint!("{:04} ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.line_at(offset));
    }

    let op = OpCode::from_byte(chunk.code[offset]);
    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(heap, chunk, op, offset),

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(chunk, op, offset),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(chunk, op, 1, offset),
        OpCode::Loop => jump_instruction(chunk, op, -1, offset),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(heap, chunk, op, offset),

        OpCode::Closure => closure_instruction(heap, chunk, offset),

        _ => {
            eprintln!("{:?}", op);
            offset + 1
        }
    }
}

fn constant_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    eprintln!("{:<16} {:4} '{}'", format!("{:?}", op), index, format_value(value, heap));
    offset + 2
}

fn byte_instruction(chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    eprintln!("{:<16} {:4}", format!("{:?}", op), slot);
    offset + 2
}

fn jump_instruction(chunk: &Chunk, op: OpCode, sign: i64, offset: usize) -> usize {
    let jump = u16::from(chunk.code[offset + 1]) << 8 | u16::from(chunk.code[offset + 2]);
    let target = offset as i64 + 3 + sign * i64::from(jump);
    eprintln!("{:<16} {:4} -> {}", format!("{:?}", op), offset, target);
    offset + 3
}

fn invoke_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    let name = chunk.constants[index as usize];
    eprintln!(
        "{:<16} ({} args) {:4} '{}'",
        format!("{:?}", op),
        argc,
        index,
        format_value(name, heap)
    );
    offset + 3
}

fn closure_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let constant = chunk.constants[index as usize];
    eprintln!("{:<16} {:4} {}", "Closure", index, format_value(constant, heap));

    let mut offset = offset + 2;
    if let Value::Obj(function) = constant {
        for _ in 0..heap.function(function).upvalue_count {
            let is_local = chunk.code[offset];
            let slot = chunk.code[offset + 1];
            eprintln!(
                "{:04}    |                     {} {}",
                offset,
                if is_local == 1 { "local" } else { "upvalue" },
                slot
            );
            offset += 2;
        }
    }
    offset
}
