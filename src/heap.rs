// File: src/heap.rs
//
// Object storage and the mark-sweep collector. Objects live in a slab
// (`Vec<Slot>`) and are referred to everywhere else by a stable `ObjRef`
// index rather than a raw pointer — the arena/handle model spec.md's
// REDESIGN FLAGS section asks for in place of an intrusive linked list of
// heap objects, grounded in the `Handle` indirection of
// other_examples/71b2ca0e_woupiestek-rlox__src-object.rs.rs. Collection is
// synchronous tri-colour mark-sweep, triggered at allocation sites.

use ahash::AHashMap;
use std::env;

use crate::object::Obj;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

enum Slot {
    Free { next: Option<u32> },
    Occupied { obj: Obj, marked: bool },
}

const MIN_THRESHOLD: usize = 1024 * 1024;

pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    /// Interned strings: content -> handle. Weak — entries for strings the
    /// mark phase didn't reach are purged before the object sweep runs.
    strings: AHashMap<Box<str>, ObjRef>,
    /// Auxiliary root set: values an allocation in progress pushes here so
    /// they survive a collection triggered mid-construction, before they're
    /// reachable from anywhere else (spec.md "allocation-during-GC safety").
    extra_roots: Vec<Value>,
    bytes_allocated: usize,
    next_gc: usize,
    pub stress: bool,
    pub log: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            strings: AHashMap::new(),
            extra_roots: Vec::new(),
            bytes_allocated: 0,
            next_gc: MIN_THRESHOLD,
            stress: env::var("LOX_GC_STRESS").map(|v| v != "0").unwrap_or(false),
            log: env::var("LOX_GC_LOG").map(|v| v != "0").unwrap_or(false),
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        match &self.slots[r.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling ObjRef {}", r.0),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        match &mut self.slots[r.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling ObjRef {}", r.0),
        }
    }

    fn insert(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.byte_count();
        if let Some(i) = self.free_head {
            let idx = i as usize;
            self.free_head = match &self.slots[idx] {
                Slot::Free { next } => *next,
                Slot::Occupied { .. } => unreachable!(),
            };
            self.slots[idx] = Slot::Occupied { obj, marked: false };
            ObjRef(i)
        } else {
            self.slots.push(Slot::Occupied { obj, marked: false });
            ObjRef((self.slots.len() - 1) as u32)
        }
    }

    /// Allocates a non-string heap object. GC eligibility is checked by
    /// the caller (vm/compiler) via `should_collect`, since collecting
    /// requires knowledge of live roots this module doesn't have.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.insert(obj)
    }

    /// Interns `s`, returning the existing handle if an equal string is
    /// already live.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(r) = self.strings.get(s) {
            return *r;
        }
        let r = self.insert(Obj::String(s.into()));
        self.strings.insert(s.into(), r);
        r
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Pushes a value onto the auxiliary root set so it survives a
    /// collection triggered before it's reachable from anywhere else.
    pub fn protect(&mut self, v: Value) {
        self.extra_roots.push(v);
    }

    pub fn unprotect(&mut self) {
        self.extra_roots.pop();
    }

    /// Runs a full mark-sweep cycle. `push_roots` is called once to seed
    /// the mark worklist with every root the caller (VM or Compiler) knows
    /// about; the heap's own auxiliary root set is always included too.
    pub fn collect_garbage(&mut self, push_roots: impl FnOnce(&mut Vec<Value>)) {
        let before = self.bytes_allocated;
        let mut roots = self.extra_roots.clone();
        push_roots(&mut roots);

        let mut worklist: Vec<ObjRef> = Vec::new();
        for v in roots {
            if let Value::Obj(r) = v {
                self.mark(r, &mut worklist);
            }
        }
        while let Some(r) = worklist.pop() {
            self.blacken(r, &mut worklist);
        }

        let slots = &self.slots;
        self.strings.retain(|_, r| matches!(slots[r.0 as usize], Slot::Occupied { marked: true, .. }));
        self.sweep();

        self.next_gc = std::cmp::max(self.bytes_allocated * 2, MIN_THRESHOLD);
        if self.log {
            eprintln!(
                "gc: collected {} bytes ({} -> {}), next at {}",
                before.saturating_sub(self.bytes_allocated),
                before,
                self.bytes_allocated,
                self.next_gc
            );
        }
    }

    fn is_marked(&self, r: ObjRef) -> bool {
        matches!(self.slots[r.0 as usize], Slot::Occupied { marked: true, .. })
    }

    fn mark(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        if let Slot::Occupied { marked, .. } = &mut self.slots[r.0 as usize] {
            if !*marked {
                *marked = true;
                worklist.push(r);
            }
        }
    }

    fn blacken(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        let mut children = Vec::new();
        if let Slot::Occupied { obj, .. } = &self.slots[r.0 as usize] {
            obj.trace(&mut children);
        }
        for child in children {
            self.mark(child, worklist);
        }
    }

    fn sweep(&mut self) {
        for i in 0..self.slots.len() {
            let marked_occupied = matches!(self.slots[i], Slot::Occupied { marked: true, .. });
            let unmarked_occupied = matches!(self.slots[i], Slot::Occupied { marked: false, .. });
            if marked_occupied {
                if let Slot::Occupied { marked, .. } = &mut self.slots[i] {
                    *marked = false;
                }
            } else if unmarked_occupied {
                let freed = match std::mem::replace(&mut self.slots[i], Slot::Free { next: self.free_head }) {
                    Slot::Occupied { obj, .. } => obj.byte_count(),
                    Slot::Free { .. } => unreachable!(),
                };
                self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
                self.free_head = Some(i as u32);
            }
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
