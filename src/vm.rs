// File: src/vm.rs
//
// The bytecode virtual machine: a value stack, a fixed-depth call-frame
// stack, a globals table, and one dispatch loop. The VM owns the Heap and is
// the only place collections start, since it holds every root.

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

use crate::builtins;
use crate::bytecode::OpCode;
use crate::compiler::compile;
use crate::debug;
use crate::errors::{InterpretError, RuntimeError, TraceFrame};
use crate::memory::Heap;
use crate::object::{BoundMethod, Closure, Instance, NativeFn, Obj, ObjRef, Upvalue};
use crate::table::Table;
use crate::value::{format_value, Value};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

static TRACE_EXEC: Lazy<bool> = Lazy::new(|| std::env::var("LOX_TRACE_EXEC").is_ok());

/// One in-progress function invocation. `slots` indexes the first value
/// stack slot owned by the frame: the callee itself, then the arguments.
struct CallFrame {
    closure: ObjRef,
    ip: usize,
    slots: usize,
}

pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Upvalues still pointing into the stack, sorted by descending slot so
    /// closing can stop at the first one below the threshold.
    open_upvalues: Vec<ObjRef>,
    heap: Heap,
    /// Interned "init", looked up on every class call.
    init_string: ObjRef,
    /// Captured print output for tests and tooling; stdout when unset.
    output: Option<Arc<Mutex<Vec<u8>>>>,
}

/// Copied-out dispatch info for a callee, so the heap borrow ends before the
/// call manipulates the stack.
enum CalleeKind {
    Bound(Value, ObjRef),
    Class,
    Closure,
    Native(NativeFn),
    Other,
}

macro_rules! binary_op {
    ($self:ident, $wrap:path, $op:tt) => {{
        let b = $self.peek(0);
        let a = $self.peek(1);
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                $self.pop();
                $self.pop();
                $self.push($wrap(a $op b));
            }
            _ => return Err($self.runtime_error("operands must be numbers".to_string())),
        }
    }};
}

impl Default for VM {
    fn default() -> Self {
        VM::new()
    }
}

impl VM {
    pub fn new() -> VM {
        let mut heap = Heap::new();
        let init_string = heap.intern("init".to_string());

        let mut vm = VM {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
            output: None,
        };

        vm.define_native("clock", builtins::clock);
        vm.define_native("random", builtins::random);
        vm.define_native("random_int", builtins::random_int);
        vm
    }

    /// Redirects `print` output into a buffer (the capture hook tests use).
    pub fn set_output(&mut self, sink: Arc<Mutex<Vec<u8>>>) {
        self.output = Some(sink);
    }

    /// Collect on every allocation, regardless of the heap threshold.
    pub fn set_gc_stress(&mut self, on: bool) {
        self.heap.set_stress(on);
    }

    /// Compiles and runs a source string. The VM survives errors, so a REPL
    /// can keep calling this on the same instance.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap).map_err(InterpretError::Compile)?;

        self.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(Closure { function, upvalues: Vec::new() }));
        self.pop();
        self.push(Value::Obj(closure));
        self.call_closure(closure, 0).map_err(InterpretError::Runtime)?;

        self.run().map_err(InterpretError::Runtime)
    }

    // ---- Stack primitives ----

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // ---- Allocation and collection ----

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// All runtime allocation funnels through here so a collection can run
    /// first, while everything live is still rooted.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.maybe_collect();
        self.heap.alloc(obj)
    }

    fn collect_garbage(&mut self) {
        // Roots: the value stack, each frame's closure, open upvalues, the
        // globals table, and the interned "init" name.
        for value in &self.stack {
            self.heap.mark_value(*value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.remove_white_strings();
        self.heap.sweep();
    }

    // ---- Error reporting ----

    /// Builds the traceback, resets the stack, and hands back the error for
    /// the dispatch loop to propagate.
    fn runtime_error(&mut self, message: String) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function);
            trace.push(TraceFrame {
                line: function.chunk.line_at(frame.ip.saturating_sub(1)),
                function: function.name.map(|n| self.heap.string(n).chars.clone()),
            });
        }

        self.reset_stack();
        RuntimeError { message, trace }
    }

    // ---- Decoding ----

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active call frame");
        let function = self.heap.closure(frame.closure).function;
        let byte = self.heap.function(function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let high = self.read_byte();
        let low = self.read_byte();
        u16::from(high) << 8 | u16::from(low)
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("no active call frame");
        let function = self.heap.closure(frame.closure).function;
        self.heap.function(function).chunk.constants[index]
    }

    fn read_string(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(obj) => obj,
            _ => panic!("constant is not a string"),
        }
    }

    // ---- Calls ----

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeError> {
        let kind = match callee {
            Value::Obj(obj) => match self.heap.obj(obj) {
                Obj::BoundMethod(bound) => CalleeKind::Bound(bound.receiver, bound.method),
                Obj::Class(_) => CalleeKind::Class,
                Obj::Closure(_) => CalleeKind::Closure,
                Obj::Native(native) => CalleeKind::Native(native.function),
                _ => CalleeKind::Other,
            },
            _ => CalleeKind::Other,
        };

        match kind {
            CalleeKind::Bound(receiver, method) => {
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
            CalleeKind::Class => {
                let class = match callee {
                    Value::Obj(obj) => obj,
                    _ => unreachable!(),
                };
                let instance =
                    self.alloc(Obj::Instance(Instance { class, fields: Table::new() }));
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = Value::Obj(instance);

                let init = {
                    let hash = self.heap.string(self.init_string).hash;
                    self.heap.class(class).methods.get(self.init_string, hash)
                };
                match init {
                    Some(Value::Obj(initializer)) => self.call_closure(initializer, argc),
                    Some(_) => Ok(()),
                    None if argc != 0 => {
                        Err(self.runtime_error(format!("expected 0 arguments but got {}", argc)))
                    }
                    None => Ok(()),
                }
            }
            CalleeKind::Closure => {
                let closure = match callee {
                    Value::Obj(obj) => obj,
                    _ => unreachable!(),
                };
                self.call_closure(closure, argc)
            }
            CalleeKind::Native(function) => {
                // Call the host function directly and splice the result over
                // the argument window.
                let first_arg = self.stack.len() - argc;
                let result = function(&self.stack[first_arg..]);
                self.stack.truncate(first_arg - 1);
                self.push(result);
                Ok(())
            }
            CalleeKind::Other => {
                Err(self.runtime_error("can only call functions and classes".to_string()))
            }
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity as usize;

        if argc != arity {
            return Err(self.runtime_error(format!("expected {} arguments but got {}", arity, argc)));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("stack overflow".to_string()));
        }

        self.frames.push(CallFrame { closure, ip: 0, slots: self.stack.len() - argc - 1 });
        Ok(())
    }

    /// The Invoke fast path: property lookup fused with the call. Fields
    /// shadow methods, so a field holding a callable wins.
    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        let Some(instance) = self.heap.value_as_instance(receiver) else {
            return Err(self.runtime_error("only instances have methods".to_string()));
        };

        let hash = self.heap.string(name).hash;
        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => self.call_closure(method, argc),
            _ => {
                let message =
                    format!("undefined property '{}'", self.heap.string(name).chars);
                Err(self.runtime_error(message))
            }
        }
    }

    /// Pops the instance and pushes `name`'s method bound to it.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        let Some(Value::Obj(method)) = self.heap.class(class).methods.get(name, hash) else {
            let message = format!("undefined property '{}'", self.heap.string(name).chars);
            return Err(self.runtime_error(message));
        };

        let receiver = self.peek(0);
        let bound = self.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    // ---- Upvalues ----

    /// Captures the local at `slot`, reusing an existing open upvalue so
    /// every closure over the same variable shares one cell.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            match self.heap.upvalue(self.open_upvalues[index]) {
                Upvalue::Open(open) if *open > slot => index += 1,
                Upvalue::Open(open) if *open == slot => return self.open_upvalues[index],
                _ => break,
            }
        }

        let created = self.alloc(Obj::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(index, created);
        created
    }

    /// Closes every open upvalue at or above `from`: the stack value moves
    /// into the upvalue, which leaves the list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&first) = self.open_upvalues.first() {
            let slot = match self.heap.upvalue(first) {
                Upvalue::Open(slot) if *slot >= from => *slot,
                _ => break,
            };
            let value = self.stack[slot];
            *self.heap.upvalue_mut(first) = Upvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // ---- Natives ----

    /// Registers a host function under a global name. Both allocations are
    /// kept on the stack across each other so a collection in between cannot
    /// reclaim them.
    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_ref = self.heap.intern(name.to_string());
        self.push(Value::Obj(name_ref));
        let native = self.alloc(Obj::Native(crate::object::Native { name: name_ref, function }));
        self.push(Value::Obj(native));

        let hash = self.heap.string(name_ref).hash;
        self.globals.set(name_ref, hash, Value::Obj(native));
        self.pop();
        self.pop();
    }

    // ---- Output ----

    fn print_line(&mut self, text: &str) {
        match &self.output {
            Some(sink) => {
                let mut buffer = sink.lock().unwrap();
                buffer.extend_from_slice(text.as_bytes());
                buffer.push(b'\n');
            }
            None => println!("{}", text),
        }
    }

    // ---- Dispatch ----

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if *TRACE_EXEC {
                let mut shelf = String::from("          ");
                for value in &self.stack {
                    shelf.push_str(&format!("[ {} ]", format_value(*value, &self.heap)));
                }
                eprintln!("{}", shelf);
                let frame = self.frames.last().expect("no active call frame");
                let function = self.heap.closure(frame.closure).function;
                debug::disassemble_instruction(
                    &self.heap,
                    &self.heap.function(function).chunk,
                    frame.ip,
                );
            }

            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active call frame").slots;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active call frame").slots;
                    let value = self.peek(0);
                    self.stack[base + slot] = value;
                }

                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!(
                                "undefined variable '{}'",
                                self.heap.string(name).chars
                            );
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        // Assignment never creates a global; undo the insert.
                        self.globals.delete(name, hash);
                        let message =
                            format!("undefined variable '{}'", self.heap.string(name).chars);
                        return Err(self.runtime_error(message));
                    }
                }

                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active call frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = match self.heap.upvalue(upvalue) {
                        Upvalue::Open(open) => self.stack[*open],
                        Upvalue::Closed(value) => *value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active call frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue) {
                        Upvalue::Open(open) => {
                            let open = *open;
                            self.stack[open] = value;
                        }
                        Upvalue::Closed(_) => {
                            *self.heap.upvalue_mut(upvalue) = Upvalue::Closed(value);
                        }
                    }
                }

                OpCode::GetProperty => {
                    let name = self.read_string();
                    let Some(instance) = self.heap.value_as_instance(self.peek(0)) else {
                        return Err(
                            self.runtime_error("only instances have properties".to_string())
                        );
                    };

                    let hash = self.heap.string(name).hash;
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let Some(instance) = self.heap.value_as_instance(self.peek(1)) else {
                        return Err(self.runtime_error("only instances have fields".to_string()));
                    };

                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);

                    // Leave just the assigned value behind.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Obj(obj) => obj,
                        _ => panic!("superclass slot does not hold a class"),
                    };
                    self.bind_method(superclass, name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => binary_op!(self, Value::Bool, >),
                OpCode::Lesser => binary_op!(self, Value::Bool, <),

                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let a_string = self.heap.value_as_string(a);
                    let b_string = self.heap.value_as_string(b);
                    match (a, b, a_string, b_string) {
                        (_, _, Some(a), Some(b)) => self.concatenate(a, b),
                        (Value::Number(a), Value::Number(b), _, _) => {
                            self.pop();
                            self.pop();
                            self.push(Value::Number(a + b));
                        }
                        _ => {
                            return Err(self.runtime_error(
                                "operands must be two numbers or two strings".to_string(),
                            ));
                        }
                    }
                }
                OpCode::Subtract => binary_op!(self, Value::Number, -),
                OpCode::Multiply => binary_op!(self, Value::Number, *),
                OpCode::Divide => binary_op!(self, Value::Number, /),

                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let Value::Number(n) = self.peek(0) else {
                        return Err(self.runtime_error("operand must be a number".to_string()));
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = format_value(value, &self.heap);
                    self.print_line(&text);
                }

                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active call frame").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("no active call frame").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active call frame").ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    self.call_value(self.peek(argc), argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte() as usize;
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte() as usize;
                    let superclass = match self.pop() {
                        Value::Obj(obj) => obj,
                        _ => panic!("superclass slot does not hold a class"),
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }

                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(obj) => obj,
                        _ => panic!("closure constant is not a function"),
                    };
                    let upvalue_count = self.heap.function(function).upvalue_count;

                    let closure = self.alloc(Obj::Closure(Closure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::Obj(closure));

                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().expect("no active call frame").slots;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing =
                                self.frames.last().expect("no active call frame").closure;
                            self.heap.closure(enclosing).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active call frame");
                    self.close_upvalues(frame.slots);

                    if self.frames.is_empty() {
                        // The script function itself is still on the stack.
                        self.pop();
                        return Ok(());
                    }

                    self.stack.truncate(frame.slots);
                    self.push(result);
                }

                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(crate::object::Class {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let Some(superclass) = self.heap.value_as_class(self.peek(1)) else {
                        return Err(self.runtime_error("superclass must be a class".to_string()));
                    };
                    let subclass = match self.peek(0) {
                        Value::Obj(obj) => obj,
                        _ => panic!("subclass slot does not hold a class"),
                    };

                    // Methods are fixed after declaration, so inheriting is a
                    // one-time copy of the superclass table.
                    let methods: Vec<(ObjRef, u32, Value)> =
                        self.heap.class(superclass).methods.iter_entries().collect();
                    for (key, hash, value) in methods {
                        self.heap.class_mut(subclass).methods.set(key, hash, value);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let hash = self.heap.string(name).hash;
                    let method = self.peek(0);
                    let class = match self.peek(1) {
                        Value::Obj(obj) => obj,
                        _ => panic!("method owner slot does not hold a class"),
                    };
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
            }
        }
    }

    fn concatenate(&mut self, a: ObjRef, b: ObjRef) {
        let mut chars =
            String::with_capacity(self.heap.string(a).chars.len() + self.heap.string(b).chars.len());
        chars.push_str(&self.heap.string(a).chars);
        chars.push_str(&self.heap.string(b).chars);

        // Operands stay on the stack until the result exists, so a
        // collection here cannot free them.
        self.maybe_collect();
        let result = self.heap.intern(chars);
        self.pop();
        self.pop();
        self.push(Value::Obj(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to compile and run Lox code, returning captured print output.
    fn run_program(source: &str) -> Result<String, InterpretError> {
        let mut vm = VM::new();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        vm.set_output(buffer.clone());
        vm.interpret(source)?;
        let output = buffer.lock().unwrap();
        Ok(String::from_utf8_lossy(&output).to_string())
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run_program("print 1 + 2 * 3;").unwrap(), "7\n");
        assert_eq!(run_program("print (1 + 2) * 3;").unwrap(), "9\n");
        assert_eq!(run_program("print -1 - -2;").unwrap(), "1\n");
    }

    #[test]
    fn test_globals_define_and_assign() {
        let out = run_program("var a = 1; a = a + 2; print a;").unwrap();
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_string_concatenation() {
        let out = run_program(r#"var a = "foo"; var b = "bar"; print a + b;"#).unwrap();
        assert_eq!(out, "foobar\n");
    }

    #[test]
    fn test_interned_concatenation_results_compare_equal() {
        let out = run_program(r#"print "foo" + "bar" == "foobar";"#).unwrap();
        assert_eq!(out, "true\n");
    }

    #[test]
    fn test_undefined_variable_is_a_runtime_error() {
        match run_program("print missing;") {
            Err(InterpretError::Runtime(error)) => {
                assert_eq!(error.message, "undefined variable 'missing'");
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_to_undefined_global_fails() {
        match run_program("missing = 3;") {
            Err(InterpretError::Runtime(error)) => {
                assert_eq!(error.message, "undefined variable 'missing'");
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_calling_a_number_fails() {
        match run_program("var x = 3; x();") {
            Err(InterpretError::Runtime(error)) => {
                assert_eq!(error.message, "can only call functions and classes");
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_traceback_names_frames_innermost_first() {
        let source = r#"
            fun inner() { return 1 + nil; }
            fun outer() { return inner(); }
            outer();
        "#;
        match run_program(source) {
            Err(InterpretError::Runtime(error)) => {
                assert_eq!(error.message, "operands must be two numbers or two strings");
                let names: Vec<Option<String>> =
                    error.trace.iter().map(|f| f.function.clone()).collect();
                assert_eq!(
                    names,
                    vec![Some("inner".to_string()), Some("outer".to_string()), None]
                );
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_clock_native_is_callable() {
        let out = run_program("print clock() >= 0;").unwrap();
        assert_eq!(out, "true\n");
    }

    #[test]
    fn test_native_result_replaces_arguments() {
        let out = run_program("print random_int(3, 3);").unwrap();
        assert_eq!(out, "3\n");
    }
}
