// File: src/vm.rs
//
// Stack-based virtual machine. Executes the `Chunk`s the compiler emits
// using an operand stack, a call-frame stack, a name-keyed globals map,
// and an open-upvalue list threaded through the operand stack for
// closures with capture-by-reference semantics (spec.md §4.3).

use ahash::AHashMap;

use crate::chunk::OpCode;
use crate::errors::{LoxError, SourceLocation};
use crate::heap::{Heap, ObjRef};
use crate::object::{LoxBoundMethod, LoxClass, LoxClosure, LoxInstance, Obj, Upvalue};
use crate::value::Value;

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    stack_start: usize,
}

pub struct VM {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: AHashMap<ObjRef, Value>,
    /// Sorted by decreasing stack slot so closing a prefix is O(k).
    open_upvalues: Vec<ObjRef>,
    init_string: ObjRef,
}

impl VM {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        Self {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: AHashMap::new(),
            open_upvalues: Vec::new(),
            init_string,
        }
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Wraps the compiled script `Function` in a `Closure`, pushes the
    /// initial frame, and runs the dispatch loop to completion.
    pub fn interpret(&mut self, script: ObjRef) -> Result<(), LoxError> {
        let closure = self.heap.alloc(Obj::Closure(LoxClosure { function: script, upvalues: Vec::new() }));
        self.stack.push(Value::Obj(closure));
        self.call_closure(closure, 0)?;
        self.run()
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn function_of(&self, closure: ObjRef) -> ObjRef {
        match self.heap.get(closure) {
            Obj::Closure(c) => c.function,
            _ => unreachable!("frame closure is not a Closure"),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let frame_idx = self.frames.len() - 1;
        let (closure, ip) = {
            let f = &self.frames[frame_idx];
            (f.closure, f.ip)
        };
        let function = self.function_of(closure);
        let byte = match self.heap.get(function) {
            Obj::Function(f) => f.chunk.code[ip],
            _ => unreachable!(),
        };
        self.frames[frame_idx].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self, index: u8) -> Value {
        let closure = self.current_frame().closure;
        let function = self.function_of(closure);
        match self.heap.get(function) {
            Obj::Function(f) => f.chunk.constants[index as usize],
            _ => unreachable!(),
        }
    }

    fn advance_ip(&mut self, delta: i32) {
        let frame = self.frames.last_mut().unwrap();
        frame.ip = (frame.ip as i32 + delta) as usize;
    }

    fn current_line(&self) -> usize {
        let closure = self.current_frame().closure;
        let function = self.function_of(closure);
        let ip = self.current_frame().ip;
        match self.heap.get(function) {
            Obj::Function(f) => f.chunk.lines[ip.saturating_sub(1)],
            _ => unreachable!(),
        }
    }

    fn get_string<'a>(&'a self, v: Value) -> &'a str {
        match v {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::String(s) => s,
                _ => panic!("value is not a string"),
            },
            _ => panic!("value is not a string"),
        }
    }

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            let stack = &self.stack;
            let frames: Vec<ObjRef> = self.frames.iter().map(|f| f.closure).collect();
            let open_upvalues = &self.open_upvalues;
            let globals = &self.globals;
            let init_string = self.init_string;
            self.heap.collect_garbage(|roots| {
                roots.extend(stack.iter().copied());
                roots.extend(frames.iter().map(|r| Value::Obj(*r)));
                roots.extend(open_upvalues.iter().map(|r| Value::Obj(*r)));
                for (k, v) in globals.iter() {
                    roots.push(Value::Obj(*k));
                    roots.push(*v);
                }
                roots.push(Value::Obj(init_string));
            });
        }
    }

    fn build_runtime_error(&self, message: String) -> LoxError {
        let line = self.current_line();
        let mut call_stack = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.function_of(frame.closure);
            let name = match self.heap.get(function) {
                Obj::Function(f) => f.name.clone().unwrap_or_else(|| "script".to_string()),
                _ => "?".to_string(),
            };
            let frame_line = match self.heap.get(function) {
                Obj::Function(f) => f.chunk.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(line),
                _ => line,
            };
            call_stack.push(format!("{}() (line {})", name, frame_line));
        }
        LoxError::runtime_error(message, SourceLocation::new(line)).with_call_stack(call_stack)
    }

    fn undefined_variable_error(&self, name: &str) -> LoxError {
        let candidates: Vec<String> = self
            .globals
            .keys()
            .filter_map(|r| match self.heap.get(*r) {
                Obj::String(s) => Some(s.to_string()),
                _ => None,
            })
            .collect();
        let err = self.build_runtime_error(format!("Undefined variable '{}'.", name));
        match crate::errors::find_closest_match(name, &candidates) {
            Some(suggestion) => err.with_suggestion(suggestion.to_string()),
            None => err,
        }
    }

    // ---- dispatch loop ------------------------------------------------

    pub fn run(&mut self) -> Result<(), LoxError> {
        loop {
            let op = OpCode::from_u8(self.read_byte());
            match op {
                OpCode::Constant => {
                    let k = self.read_byte();
                    let v = self.read_constant(k);
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let start = self.current_frame().stack_start;
                    self.push(self.stack[start + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let start = self.current_frame().stack_start;
                    self.stack[start + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let k = self.read_byte();
                    let name_ref = self.read_constant(k).as_obj().unwrap();
                    match self.globals.get(&name_ref).copied() {
                        Some(v) => self.push(v),
                        None => {
                            let name = self.get_string(Value::Obj(name_ref)).to_string();
                            return Err(self.undefined_variable_error(&name));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let k = self.read_byte();
                    let name_ref = self.read_constant(k).as_obj().unwrap();
                    if !self.globals.contains_key(&name_ref) {
                        let name = self.get_string(Value::Obj(name_ref)).to_string();
                        return Err(self.undefined_variable_error(&name));
                    }
                    let v = self.peek(0);
                    self.globals.insert(name_ref, v);
                }
                OpCode::DefineGlobal => {
                    let k = self.read_byte();
                    let name_ref = self.read_constant(k).as_obj().unwrap();
                    let v = self.pop();
                    self.globals.insert(name_ref, v);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let up_ref = match self.heap.get(closure) {
                        Obj::Closure(c) => c.upvalues[slot],
                        _ => unreachable!(),
                    };
                    let value = match self.heap.get(up_ref) {
                        Obj::Upvalue(Upvalue::Open(s)) => self.stack[*s],
                        Obj::Upvalue(Upvalue::Closed(v)) => *v,
                        _ => unreachable!(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let up_ref = match self.heap.get(closure) {
                        Obj::Closure(c) => c.upvalues[slot],
                        _ => unreachable!(),
                    };
                    let value = self.peek(0);
                    let open_slot = match self.heap.get(up_ref) {
                        Obj::Upvalue(Upvalue::Open(s)) => Some(*s),
                        _ => None,
                    };
                    match open_slot {
                        Some(s) => self.stack[s] = value,
                        None => {
                            if let Obj::Upvalue(u) = self.heap.get_mut(up_ref) {
                                *u = Upvalue::Closed(value);
                            }
                        }
                    }
                }
                OpCode::GetProperty => self.op_get_property()?,
                OpCode::SetProperty => self.op_set_property()?,
                OpCode::GetSuper => self.op_get_super()?,
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.equals(&b)));
                }
                OpCode::Greater => self.numeric_compare(|a, b| a > b)?,
                OpCode::Less => self.numeric_compare(|a, b| a < b)?,
                OpCode::Add => self.op_add()?,
                OpCode::Subtract => self.numeric_binop(|a, b| a - b)?,
                OpCode::Multiply => self.numeric_binop(|a, b| a * b)?,
                OpCode::Divide => self.numeric_binop(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.build_runtime_error("Operand must be a number.".to_string())),
                    }
                }
                OpCode::Jump => {
                    let o = self.read_u16();
                    self.advance_ip(o as i32);
                }
                OpCode::JumpIfFalse => {
                    let o = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.advance_ip(o as i32);
                    }
                }
                OpCode::Loop => {
                    let o = self.read_u16();
                    self.advance_ip(-(o as i32));
                }
                OpCode::And => {
                    let o = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.advance_ip(o as i32);
                    } else {
                        self.pop();
                    }
                }
                OpCode::Or => {
                    let o = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.pop();
                    } else {
                        self.advance_ip(o as i32);
                    }
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => self.op_invoke()?,
                OpCode::SuperInvoke => self.op_super_invoke()?,
                OpCode::Closure => self.op_closure(),
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    if self.op_return() {
                        return Ok(());
                    }
                }
                OpCode::Class => {
                    let k = self.read_byte();
                    let name_ref = self.read_constant(k).as_obj().unwrap();
                    let name = self.get_string(Value::Obj(name_ref)).to_string();
                    self.maybe_collect();
                    let class_ref = self.heap.alloc(Obj::Class(LoxClass::new(name)));
                    self.push(Value::Obj(class_ref));
                }
                OpCode::Inherit => self.op_inherit()?,
                OpCode::Method => self.op_method(),
                OpCode::Print => {
                    let v = self.pop();
                    println!("{}", v.to_display_string(&self.heap));
                }
            }
        }
    }

    fn numeric_binop(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), LoxError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(f(a, b)));
                Ok(())
            }
            _ => Err(self.build_runtime_error("Operands must be numbers.".to_string())),
        }
    }

    fn numeric_compare(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), LoxError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(f(a, b)));
                Ok(())
            }
            _ => Err(self.build_runtime_error("Operands must be numbers.".to_string())),
        }
    }

    fn op_add(&mut self) -> Result<(), LoxError> {
        let b = self.peek(0);
        let a = self.peek(1);
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::Number(x + y));
            return Ok(());
        }
        if a.is_string(&self.heap) && b.is_string(&self.heap) {
            let mut combined = self.get_string(a).to_string();
            combined.push_str(self.get_string(b));
            self.maybe_collect();
            let r = self.heap.intern(&combined);
            self.pop();
            self.pop();
            self.push(Value::Obj(r));
            return Ok(());
        }
        Err(self.build_runtime_error("Operands must be two numbers or two strings.".to_string()))
    }

    fn op_get_property(&mut self) -> Result<(), LoxError> {
        let receiver = self.peek(0);
        let instance_ref = match receiver {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::Instance(_)) => r,
            _ => return Err(self.build_runtime_error("Only instances have properties.".to_string())),
        };
        let name_const = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();

        let field = match self.heap.get(instance_ref) {
            Obj::Instance(i) => i.fields.get(&name).copied(),
            _ => unreachable!(),
        };
        if let Some(v) = field {
            self.pop();
            self.push(v);
            return Ok(());
        }
        let class_ref = match self.heap.get(instance_ref) {
            Obj::Instance(i) => i.class,
            _ => unreachable!(),
        };
        match self.bind_method(class_ref, &name, receiver) {
            Some(bound) => {
                self.pop();
                self.push(bound);
                Ok(())
            }
            None => Err(self.build_runtime_error(format!("Undefined property '{}'.", name))),
        }
    }

    fn bind_method(&mut self, class_ref: ObjRef, name: &str, receiver: Value) -> Option<Value> {
        let method_ref = match self.heap.get(class_ref) {
            Obj::Class(c) => c.methods.get(name).copied(),
            _ => None,
        }?;
        self.maybe_collect();
        let bound_ref = self.heap.alloc(Obj::BoundMethod(LoxBoundMethod { receiver, method: method_ref }));
        Some(Value::Obj(bound_ref))
    }

    fn op_set_property(&mut self) -> Result<(), LoxError> {
        let value = self.peek(0);
        let receiver = self.peek(1);
        let instance_ref = match receiver {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::Instance(_)) => r,
            _ => return Err(self.build_runtime_error("Only instances have fields.".to_string())),
        };
        let name_const = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();
        if let Obj::Instance(i) = self.heap.get_mut(instance_ref) {
            i.fields.insert(name, value);
        }
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn op_get_super(&mut self) -> Result<(), LoxError> {
        let name_const = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();

        let superclass_ref = match self.pop() {
            Value::Obj(r) => r,
            _ => unreachable!("compiler always pushes the superclass here"),
        };
        let receiver = self.pop();
        match self.bind_method(superclass_ref, &name, receiver) {
            Some(bound) => {
                self.push(bound);
                Ok(())
            }
            None => Err(self.build_runtime_error(format!("Undefined property '{}'.", name))),
        }
    }

    fn op_inherit(&mut self) -> Result<(), LoxError> {
        let subclass_ref = match self.peek(0) {
            Value::Obj(r) => r,
            _ => unreachable!(),
        };
        let superclass_val = self.peek(1);
        let superclass_ref = match superclass_val {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::Class(_)) => r,
            _ => return Err(self.build_runtime_error("Superclass must be a class.".to_string())),
        };
        let methods = match self.heap.get(superclass_ref) {
            Obj::Class(c) => c.methods.clone(),
            _ => unreachable!(),
        };
        if let Obj::Class(c) = self.heap.get_mut(subclass_ref) {
            for (name, method) in methods {
                c.methods.insert(name, method);
            }
        }
        self.pop();
        Ok(())
    }

    fn op_method(&mut self) {
        let name_const = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();
        let method = self.pop();
        let method_ref = match method {
            Value::Obj(r) => r,
            _ => unreachable!("compiler always emits a closure before OP_METHOD"),
        };
        let class_val = self.peek(0);
        if let Value::Obj(class_ref) = class_val {
            if let Obj::Class(c) = self.heap.get_mut(class_ref) {
                c.methods.insert(name, method_ref);
            }
        }
    }

    fn op_closure(&mut self) {
        let k = self.read_byte();
        let function_ref = self.read_constant(k).as_obj().unwrap();
        let upvalue_count = match self.heap.get(function_ref) {
            Obj::Function(f) => f.upvalue_count,
            _ => unreachable!(),
        };
        let stack_start = self.current_frame().stack_start;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte();
            if is_local {
                upvalues.push(self.capture_upvalue(stack_start + index as usize));
            } else {
                let enclosing = self.current_frame().closure;
                let up = match self.heap.get(enclosing) {
                    Obj::Closure(c) => c.upvalues[index as usize],
                    _ => unreachable!(),
                };
                upvalues.push(up);
            }
        }
        self.maybe_collect();
        let closure_ref = self.heap.alloc(Obj::Closure(LoxClosure { function: function_ref, upvalues }));
        self.push(Value::Obj(closure_ref));
    }

    fn capture_upvalue(&mut self, stack_slot: usize) -> ObjRef {
        for &r in &self.open_upvalues {
            match self.heap.get(r) {
                Obj::Upvalue(Upvalue::Open(s)) if *s == stack_slot => return r,
                Obj::Upvalue(Upvalue::Open(s)) if *s < stack_slot => break,
                _ => {}
            }
        }
        self.maybe_collect();
        let new_ref = self.heap.alloc(Obj::Upvalue(Upvalue::Open(stack_slot)));
        let pos = self
            .open_upvalues
            .iter()
            .position(|&r| matches!(self.heap.get(r), Obj::Upvalue(Upvalue::Open(s)) if *s < stack_slot))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, new_ref);
        new_ref
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&r) = self.open_upvalues.first() {
            let slot = match self.heap.get(r) {
                Obj::Upvalue(Upvalue::Open(s)) => *s,
                _ => unreachable!(),
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            if let Obj::Upvalue(u) = self.heap.get_mut(r) {
                *u = Upvalue::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), LoxError> {
        let obj_ref = match callee {
            Value::Obj(r) => r,
            _ => return Err(self.build_runtime_error("Can only call functions and classes.".to_string())),
        };
        enum Kind {
            Closure,
            Class,
            BoundMethod(Value, ObjRef),
        }
        let kind = match self.heap.get(obj_ref) {
            Obj::Closure(_) => Kind::Closure,
            Obj::Class(_) => Kind::Class,
            Obj::BoundMethod(b) => Kind::BoundMethod(b.receiver, b.method),
            _ => return Err(self.build_runtime_error("Can only call functions and classes.".to_string())),
        };
        match kind {
            Kind::Closure => self.call_closure(obj_ref, argc),
            Kind::Class => self.call_class(obj_ref, argc),
            Kind::BoundMethod(receiver, method) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
        }
    }

    fn call_closure(&mut self, closure_ref: ObjRef, argc: u8) -> Result<(), LoxError> {
        let function_ref = self.function_of(closure_ref);
        let arity = match self.heap.get(function_ref) {
            Obj::Function(f) => f.arity,
            _ => unreachable!(),
        };
        if argc as usize != arity {
            return Err(self.build_runtime_error(format!("Expected {} arguments but got {}.", arity, argc)));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.build_runtime_error("Stack overflow.".to_string()));
        }
        let stack_start = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, stack_start });
        Ok(())
    }

    fn call_class(&mut self, class_ref: ObjRef, argc: u8) -> Result<(), LoxError> {
        self.maybe_collect();
        let instance_ref = self.heap.alloc(Obj::Instance(LoxInstance::new(class_ref)));
        let slot = self.stack.len() - argc as usize - 1;
        self.stack[slot] = Value::Obj(instance_ref);

        let init_name = self.get_string(Value::Obj(self.init_string)).to_string();
        let initializer = match self.heap.get(class_ref) {
            Obj::Class(c) => c.methods.get(&init_name).copied(),
            _ => None,
        };
        match initializer {
            Some(init_ref) => self.call_closure(init_ref, argc),
            None => {
                if argc != 0 {
                    Err(self.build_runtime_error(format!("Expected 0 arguments but got {}.", argc)))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn op_invoke(&mut self) -> Result<(), LoxError> {
        let name_const = self.read_byte();
        let argc = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();

        let receiver = self.peek(argc as usize);
        let instance_ref = match receiver {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::Instance(_)) => r,
            _ => return Err(self.build_runtime_error("Only instances have methods.".to_string())),
        };

        let field = match self.heap.get(instance_ref) {
            Obj::Instance(i) => i.fields.get(&name).copied(),
            _ => unreachable!(),
        };
        if let Some(v) = field {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = v;
            return self.call_value(v, argc);
        }

        let class_ref = match self.heap.get(instance_ref) {
            Obj::Instance(i) => i.class,
            _ => unreachable!(),
        };
        let method_ref = match self.heap.get(class_ref) {
            Obj::Class(c) => c.methods.get(&name).copied(),
            _ => None,
        };
        match method_ref {
            Some(m) => self.call_closure(m, argc),
            None => Err(self.build_runtime_error(format!("Undefined property '{}'.", name))),
        }
    }

    fn op_super_invoke(&mut self) -> Result<(), LoxError> {
        let name_const = self.read_byte();
        let argc = self.read_byte();
        let name_ref = self.read_constant(name_const).as_obj().unwrap();
        let name = self.get_string(Value::Obj(name_ref)).to_string();

        let superclass_ref = match self.pop() {
            Value::Obj(r) => r,
            _ => unreachable!("compiler always pushes the superclass here"),
        };
        let method_ref = match self.heap.get(superclass_ref) {
            Obj::Class(c) => c.methods.get(&name).copied(),
            _ => None,
        };
        match method_ref {
            Some(m) => self.call_closure(m, argc),
            None => Err(self.build_runtime_error(format!("Undefined property '{}'.", name))),
        }
    }

    /// Returns `true` once the outermost frame has returned (program end).
    fn op_return(&mut self) -> bool {
        let result = self.pop();
        let stack_start = self.current_frame().stack_start;
        self.close_upvalues(stack_start);
        self.frames.pop();
        if self.frames.is_empty() {
            self.stack.clear();
            return true;
        }
        self.stack.truncate(stack_start);
        self.push(result);
        false
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn run_source(src: &str) -> Result<(), LoxError> {
        let (tokens, _) = tokenize(src);
        let (stmts, parse_errors) = Parser::new(tokens).parse();
        assert!(parse_errors.is_empty(), "unexpected parse errors: {:?}", parse_errors);
        let mut vm = VM::new();
        let script = Compiler::compile(&stmts, vm.heap_mut()).expect("unexpected compile errors");
        vm.interpret(script)
    }

    #[test]
    fn arithmetic_and_precedence_run_without_error() {
        assert!(run_source("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn string_type_error_reports_runtime_failure() {
        let result = run_source("print \"s\" - 1;");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("numbers"));
    }

    #[test]
    fn unbounded_recursion_overflows_the_call_stack() {
        let result = run_source("fun f() { return f(); } f();");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("Stack overflow"));
    }

    #[test]
    fn closures_observe_reassignment_of_captured_local() {
        assert!(run_source(
            "fun makeCounter() { var i = 0; fun c() { i = i + 1; return i; } return c; } \
             var c = makeCounter(); print c(); print c();"
        )
        .is_ok());
    }

    #[test]
    fn inheritance_and_super_init_compose() {
        assert!(run_source(
            "class A { init(n) { this.n = n; } } \
             class B < A { init(n) { super.init(n); this.m = n + 1; } } \
             var b = B(3); print b.n; print b.m;"
        )
        .is_ok());
    }
}
