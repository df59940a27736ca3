// File: src/object.rs
//
// Heap object variants. All objects live in the Heap's slot arena and refer
// to each other through ObjRef handles, so cyclic graphs (closures capturing
// themselves, classes whose methods mention the class) need no ownership
// gymnastics and are reclaimed by the collector.

use crate::bytecode::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Handle to a heap object: an index into the Heap's slot arena. Identity
/// comparison of handles is object identity, which string interning turns
/// into content equality for strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(pub(crate) u32);

#[derive(Debug)]
pub enum Obj {
    String(LoxString),
    Function(Function),
    Native(Native),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
}

/// An immutable, interned string with its FNV-1a hash cached for table
/// probing.
#[derive(Debug)]
pub struct LoxString {
    pub chars: String,
    pub hash: u32,
}

/// A compiled function. Only the compiler creates these; the VM always runs
/// them wrapped in a Closure.
#[derive(Debug)]
pub struct Function {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Interned name string; None for the top-level script.
    pub name: Option<ObjRef>,
}

/// Host-provided function: receives the argument window, returns a value.
pub type NativeFn = fn(&[Value]) -> Value;

pub struct Native {
    pub name: ObjRef,
    pub function: NativeFn,
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable. Open upvalues point at a live value-stack slot;
/// closing copies the value into the upvalue itself.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct Class {
    pub name: ObjRef,
    /// Method name -> closure. Fixed after the class declaration executes.
    pub methods: Table,
}

#[derive(Debug)]
pub struct Instance {
    pub class: ObjRef,
    /// Fields are late-bound: created on first assignment.
    pub fields: Table,
}

/// A method freshly plucked off an instance, carrying its receiver.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}
