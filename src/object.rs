// File: src/object.rs
//
// Heap-allocated object kinds. Every variant is owned by the `Heap`
// (heap.rs) and referred to elsewhere only through an `ObjRef` handle —
// grounded in the handle/arena object model sketched in
// other_examples/71b2ca0e_woupiestek-rlox__src-object.rs.rs, which this
// module's `Obj`/`trace` split follows directly (its `Traceable` trait
// becomes `Obj::trace` below).

use ahash::AHashMap;

use crate::chunk::Chunk;
use crate::heap::ObjRef;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
pub struct LoxFunction {
    pub name: Option<String>,
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub kind: FunctionKind,
}

impl LoxFunction {
    pub fn new(name: Option<String>, kind: FunctionKind) -> Self {
        Self { name, arity: 0, upvalue_count: 0, chunk: Chunk::new(), kind }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    /// Points at a stack slot that is still live (the frame hasn't returned).
    Open(usize),
    /// The frame returned; the value was lifted off the stack onto the heap.
    Closed(Value),
}

#[derive(Debug)]
pub struct LoxClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Debug)]
pub struct LoxClass {
    pub name: String,
    pub methods: AHashMap<String, ObjRef>,
}

impl LoxClass {
    pub fn new(name: String) -> Self {
        Self { name, methods: AHashMap::new() }
    }
}

#[derive(Debug)]
pub struct LoxInstance {
    pub class: ObjRef,
    pub fields: AHashMap<String, Value>,
}

impl LoxInstance {
    pub fn new(class: ObjRef) -> Self {
        Self { class, fields: AHashMap::new() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoxBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

#[derive(Debug)]
pub enum Obj {
    String(Box<str>),
    Function(LoxFunction),
    Upvalue(Upvalue),
    Closure(LoxClosure),
    Class(LoxClass),
    Instance(LoxInstance),
    BoundMethod(LoxBoundMethod),
}

impl Obj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Closure(_) => "closure",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }

    /// Rough per-object byte cost, used only to drive the GC's adaptive
    /// threshold (spec.md "next_gc = max(live_after_sweep * 2, min)").
    pub fn byte_count(&self) -> usize {
        match self {
            Obj::String(s) => std::mem::size_of::<Box<str>>() + s.len(),
            Obj::Function(f) => std::mem::size_of::<LoxFunction>() + f.chunk.byte_count(),
            Obj::Upvalue(_) => std::mem::size_of::<Upvalue>(),
            Obj::Closure(c) => {
                std::mem::size_of::<LoxClosure>() + c.upvalues.len() * std::mem::size_of::<ObjRef>()
            }
            Obj::Class(c) => {
                std::mem::size_of::<LoxClass>()
                    + c.methods.len() * (std::mem::size_of::<ObjRef>() + 16)
            }
            Obj::Instance(i) => {
                std::mem::size_of::<LoxInstance>()
                    + i.fields.len() * (std::mem::size_of::<Value>() + 16)
            }
            Obj::BoundMethod(_) => std::mem::size_of::<LoxBoundMethod>(),
        }
    }

    /// Pushes every `ObjRef` directly reachable from this object onto
    /// `worklist`, to be blackened in turn by the collector.
    pub fn trace(&self, worklist: &mut Vec<ObjRef>) {
        match self {
            Obj::String(_) => {}
            Obj::Function(f) => {
                for constant in f.chunk.constants.iter() {
                    if let Value::Obj(r) = constant {
                        worklist.push(*r);
                    }
                }
            }
            Obj::Upvalue(Upvalue::Closed(Value::Obj(r))) => worklist.push(*r),
            Obj::Upvalue(_) => {}
            Obj::Closure(c) => {
                worklist.push(c.function);
                worklist.extend(c.upvalues.iter().copied());
            }
            Obj::Class(c) => worklist.extend(c.methods.values().copied()),
            Obj::Instance(i) => {
                worklist.push(i.class);
                for v in i.fields.values() {
                    if let Value::Obj(r) = v {
                        worklist.push(*r);
                    }
                }
            }
            Obj::BoundMethod(b) => {
                if let Value::Obj(r) = b.receiver {
                    worklist.push(r);
                }
                worklist.push(b.method);
            }
        }
    }

    pub fn to_display_string(&self, heap: &crate::heap::Heap) -> String {
        match self {
            Obj::String(s) => s.to_string(),
            Obj::Function(f) => match &f.name {
                Some(name) => format!("<fn {}>", name),
                None => "<script>".to_string(),
            },
            Obj::Upvalue(_) => "<upvalue>".to_string(),
            Obj::Closure(c) => match heap.get(c.function) {
                Obj::Function(f) => match &f.name {
                    Some(name) => format!("<fn {}>", name),
                    None => "<script>".to_string(),
                },
                _ => "<closure>".to_string(),
            },
            Obj::Class(c) => c.name.clone(),
            Obj::Instance(i) => match heap.get(i.class) {
                Obj::Class(c) => format!("{} instance", c.name),
                _ => "<instance>".to_string(),
            },
            Obj::BoundMethod(b) => match heap.get(b.method) {
                Obj::Closure(c) => match heap.get(c.function) {
                    Obj::Function(f) => match &f.name {
                        Some(name) => format!("<fn {}>", name),
                        None => "<script>".to_string(),
                    },
                    _ => "<bound method>".to_string(),
                },
                _ => "<bound method>".to_string(),
            },
        }
    }
}
