// File: src/compiler.rs
//
// Single-pass AST-to-bytecode compiler. Each function body (including the
// top-level script) gets its own `FunctionCompiler` frame; frames are
// kept in a plain `Vec` rather than a chain of raw `enclosing` pointers —
// the replacement DESIGN NOTES recommends for the source's one-way
// parent-pointer compiler graph. Resolving a name walks this vector from
// the innermost frame outward exactly as the linked list would.

use crate::ast::{BinaryOp, Expr, FunctionDecl, LogicalOp, Stmt, UnaryOp};
use crate::chunk::OpCode;
use crate::errors::{LoxError, SourceLocation};
use crate::heap::{Heap, ObjRef};
use crate::object::{FunctionKind, LoxFunction, Obj};
use crate::value::Value;

struct LocalVar {
    name: String,
    /// `None` is the sentinel "declared but not yet initialized" state —
    /// used to reject `var a = a;`.
    depth: Option<usize>,
    is_captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct ClassCompiler {
    has_superclass: bool,
}

struct FunctionCompiler {
    function: LoxFunction,
    locals: Vec<LocalVar>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
}

pub struct Compiler<'h> {
    heap: &'h mut Heap,
    frames: Vec<FunctionCompiler>,
    classes: Vec<ClassCompiler>,
    errors: Vec<LoxError>,
}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

impl<'h> Compiler<'h> {
    pub fn new(heap: &'h mut Heap) -> Self {
        let mut compiler = Self { heap, frames: Vec::new(), classes: Vec::new(), errors: Vec::new() };
        compiler.push_function_frame(None, FunctionKind::Script);
        compiler
    }

    /// Compiles a full program, returning the top-level script `Function`
    /// object or every error accumulated along the way.
    pub fn compile(statements: &[Stmt], heap: &'h mut Heap) -> Result<ObjRef, Vec<LoxError>> {
        let mut compiler = Compiler::new(heap);
        for stmt in statements {
            compiler.compile_stmt(stmt);
        }
        let end_line = statements.last().map(|s| s.line()).unwrap_or(1);
        let script_ref = compiler.finish_script(end_line);
        if compiler.errors.is_empty() {
            Ok(script_ref)
        } else {
            Err(compiler.errors)
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(LoxError::semantic_error(message.into(), SourceLocation::new(line)));
    }

    // ---- frame/scope plumbing ----------------------------------------

    fn push_function_frame(&mut self, name: Option<String>, kind: FunctionKind) {
        let function = LoxFunction::new(name, kind);
        let slot0_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        let locals = vec![LocalVar { name: slot0_name.to_string(), depth: Some(0), is_captured: false }];
        self.frames.push(FunctionCompiler { function, locals, upvalues: Vec::new(), scope_depth: 0 });
        if !matches!(kind, FunctionKind::Script) {
            self.begin_scope();
        }
    }

    fn current(&self) -> &FunctionCompiler {
        self.frames.last().unwrap()
    }

    fn current_mut(&mut self) -> &mut FunctionCompiler {
        self.frames.last_mut().unwrap()
    }

    fn current_kind(&self) -> FunctionKind {
        self.current().function.kind
    }

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, line: usize) {
        self.current_mut().scope_depth -= 1;
        let depth = self.current().scope_depth;
        loop {
            let should_pop = match self.current().locals.last() {
                Some(local) => local.depth.map(|d| d > depth).unwrap_or(false),
                None => false,
            };
            if !should_pop {
                break;
            }
            let captured = self.current_mut().locals.pop().unwrap().is_captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue, line);
            } else {
                self.emit_op(OpCode::Pop, line);
            }
        }
    }

    // ---- emission helpers ---------------------------------------------

    fn emit_byte(&mut self, byte: u8, line: usize) {
        self.current_mut().function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode, line: usize) {
        self.current_mut().function.chunk.write_op(op, line);
    }

    fn emit_jump(&mut self, op: OpCode, line: usize) -> usize {
        self.emit_op(op, line);
        self.emit_byte(0xff, line);
        self.emit_byte(0xff, line);
        self.current().function.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let (code_len, line) = {
            let chunk = &self.current().function.chunk;
            (chunk.code.len(), chunk.lines[offset])
        };
        let jump = code_len - offset - 2;
        if jump > u16::MAX as usize {
            self.error(line, "Too much code to jump over.");
            return;
        }
        let chunk = &mut self.current_mut().function.chunk;
        chunk.patch(offset, ((jump >> 8) & 0xff) as u8);
        chunk.patch(offset + 1, (jump & 0xff) as u8);
    }

    fn emit_loop(&mut self, loop_start: usize, line: usize) {
        self.emit_op(OpCode::Loop, line);
        let offset = self.current().function.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error(line, "Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8, line);
        self.emit_byte((offset & 0xff) as u8, line);
    }

    fn emit_return(&mut self, line: usize) {
        if self.current_kind() == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal, line);
            self.emit_byte(0, line);
        } else {
            self.emit_op(OpCode::Nil, line);
        }
        self.emit_op(OpCode::Return, line);
    }

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            let frames = &self.frames;
            self.heap.collect_garbage(|roots| {
                for frame in frames {
                    roots.extend(frame.function.chunk.constants.iter().copied());
                }
            });
        }
    }

    fn identifier_constant(&mut self, name: &str, line: usize) -> u8 {
        self.maybe_collect();
        let r = self.heap.intern(name);
        self.add_constant(Value::Obj(r), line)
    }

    fn add_constant(&mut self, value: Value, line: usize) -> u8 {
        match self.current_mut().function.chunk.add_constant(value) {
            Some(k) => k,
            None => {
                self.error(line, "Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value, line: usize) {
        let k = self.add_constant(value, line);
        self.emit_op(OpCode::Constant, line);
        self.emit_byte(k, line);
    }

    // ---- name resolution -------------------------------------------------

    fn resolve_local(&self, frame: usize, name: &str) -> Option<usize> {
        self.frames[frame].locals.iter().enumerate().rev().find(|(_, l)| l.name == name).map(|(i, _)| i)
    }

    fn resolve_upvalue(&mut self, frame: usize, name: &str) -> Option<u8> {
        if frame == 0 {
            return None;
        }
        let enclosing = frame - 1;
        if let Some(local_idx) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[local_idx].is_captured = true;
            return Some(self.add_upvalue(frame, local_idx as u8, true));
        }
        if let Some(up_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame, up_idx, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame: usize, index: u8, is_local: bool) -> u8 {
        for (i, up) in self.frames[frame].upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if self.frames[frame].upvalues.len() >= MAX_UPVALUES {
            let line = self.frames[frame].function.chunk.lines.last().copied().unwrap_or(0);
            self.error(line, "Too many closure variables in function.");
            return 0;
        }
        self.frames[frame].upvalues.push(UpvalueDesc { index, is_local });
        (self.frames[frame].upvalues.len() - 1) as u8
    }

    fn declare_variable(&mut self, name: &str, line: usize) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth;
        let mut duplicate = false;
        for local in self.current().locals.iter().rev() {
            if local.depth.map(|d| d < depth).unwrap_or(false) {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error(line, format!("Already a variable named '{}' in this scope.", name));
        }
        self.add_local(name, line);
    }

    fn add_local(&mut self, name: &str, line: usize) {
        if self.current().locals.len() >= MAX_LOCALS {
            self.error(line, "Too many local variables in function.");
            return;
        }
        self.current_mut().locals.push(LocalVar { name: name.to_string(), depth: None, is_captured: false });
    }

    fn mark_top_local_initialized(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth;
        if let Some(local) = self.current_mut().locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn parse_variable(&mut self, name: &str, line: usize) -> Option<u8> {
        self.declare_variable(name, line);
        if self.current().scope_depth > 0 {
            None
        } else {
            Some(self.identifier_constant(name, line))
        }
    }

    fn define_variable(&mut self, global: Option<u8>, line: usize) {
        match global {
            Some(k) => {
                self.emit_op(OpCode::DefineGlobal, line);
                self.emit_byte(k, line);
            }
            None => self.mark_top_local_initialized(),
        }
    }

    fn compile_variable_get(&mut self, name: &str, line: usize) {
        let frame = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame, name) {
            if self.frames[frame].locals[slot].depth.is_none() {
                self.error(line, "Can't read local variable in its own initializer.");
            }
            self.emit_op(OpCode::GetLocal, line);
            self.emit_byte(slot as u8, line);
        } else if let Some(up) = self.resolve_upvalue(frame, name) {
            self.emit_op(OpCode::GetUpvalue, line);
            self.emit_byte(up, line);
        } else {
            let k = self.identifier_constant(name, line);
            self.emit_op(OpCode::GetGlobal, line);
            self.emit_byte(k, line);
        }
    }

    fn compile_variable_set(&mut self, name: &str, line: usize) {
        let frame = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame, name) {
            self.emit_op(OpCode::SetLocal, line);
            self.emit_byte(slot as u8, line);
        } else if let Some(up) = self.resolve_upvalue(frame, name) {
            self.emit_op(OpCode::SetUpvalue, line);
            self.emit_byte(up, line);
        } else {
            let k = self.identifier_constant(name, line);
            self.emit_op(OpCode::SetGlobal, line);
            self.emit_byte(k, line);
        }
    }

    // ---- statements -----------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements, line } => {
                self.begin_scope();
                for s in statements {
                    self.compile_stmt(s);
                }
                self.end_scope(*line);
            }
            Stmt::Class { name, superclass, methods, line } => {
                self.compile_class_decl(name, superclass, methods, *line)
            }
            Stmt::Expression { expression, line } => {
                self.compile_expr(expression);
                self.emit_op(OpCode::Pop, *line);
            }
            Stmt::Function { decl, line } => self.compile_fn_decl(decl, *line),
            Stmt::If { condition, then_branch, else_branch, line } => {
                self.compile_expr(condition);
                let then_jump = self.emit_jump(OpCode::JumpIfFalse, *line);
                self.emit_op(OpCode::Pop, *line);
                self.compile_stmt(then_branch);
                let else_jump = self.emit_jump(OpCode::Jump, *line);
                self.patch_jump(then_jump);
                self.emit_op(OpCode::Pop, *line);
                if let Some(eb) = else_branch {
                    self.compile_stmt(eb);
                }
                self.patch_jump(else_jump);
            }
            Stmt::Print { expression, line } => {
                self.compile_expr(expression);
                self.emit_op(OpCode::Print, *line);
            }
            Stmt::Return { value, line } => self.compile_return(value, *line),
            Stmt::Var { name, initializer, line } => {
                let global = self.parse_variable(name, *line);
                match initializer {
                    Some(e) => self.compile_expr(e),
                    None => self.emit_op(OpCode::Nil, *line),
                }
                self.define_variable(global, *line);
            }
            Stmt::While { condition, body, line } => {
                let loop_start = self.current().function.chunk.code.len();
                self.compile_expr(condition);
                let exit_jump = self.emit_jump(OpCode::JumpIfFalse, *line);
                self.emit_op(OpCode::Pop, *line);
                self.compile_stmt(body);
                self.emit_loop(loop_start, *line);
                self.patch_jump(exit_jump);
                self.emit_op(OpCode::Pop, *line);
            }
        }
    }

    fn compile_return(&mut self, value: &Option<Expr>, line: usize) {
        if self.current_kind() == FunctionKind::Script {
            self.error(line, "Can't return from top-level code.");
        }
        match value {
            None => self.emit_return(line),
            Some(v) => {
                if self.current_kind() == FunctionKind::Initializer {
                    self.error(line, "Can't return a value from an initializer.");
                }
                self.compile_expr(v);
                self.emit_op(OpCode::Return, line);
            }
        }
    }

    fn compile_fn_decl(&mut self, decl: &FunctionDecl, line: usize) {
        let global = self.parse_variable(&decl.name, line);
        if global.is_none() {
            self.mark_top_local_initialized();
        }
        self.compile_function(decl, FunctionKind::Function);
        self.define_variable(global, line);
    }

    fn compile_function(&mut self, decl: &FunctionDecl, kind: FunctionKind) {
        self.push_function_frame(Some(decl.name.clone()), kind);
        if decl.params.len() > 255 {
            self.error(decl.line, "Can't have more than 255 parameters.");
        }
        for p in &decl.params {
            self.declare_variable(p, decl.line);
            self.mark_top_local_initialized();
        }
        self.current_mut().function.arity = decl.params.len();
        for stmt in &decl.body {
            self.compile_stmt(stmt);
        }
        let end_line = decl.body.last().map(|s| s.line()).unwrap_or(decl.line);
        self.finish_function(end_line);
    }

    fn finish_function(&mut self, end_line: usize) {
        self.emit_return(end_line);
        let frame = self.frames.pop().unwrap();
        let upvalue_count = frame.upvalues.len();
        let mut function = frame.function;
        function.upvalue_count = upvalue_count;

        // `function` isn't reachable from any compiler frame anymore (we
        // just popped it), so its constant pool needs its own protection
        // before the next allocation can trigger a collection.
        let protected = function.chunk.constants.len();
        for v in function.chunk.constants.iter() {
            self.heap.protect(*v);
        }
        self.maybe_collect();
        let func_ref = self.heap.alloc(Obj::Function(function));
        for _ in 0..protected {
            self.heap.unprotect();
        }

        let k = self.add_constant(Value::Obj(func_ref), end_line);
        self.emit_op(OpCode::Closure, end_line);
        self.emit_byte(k, end_line);
        for up in &frame.upvalues {
            self.emit_byte(up.is_local as u8, end_line);
            self.emit_byte(up.index, end_line);
        }
    }

    /// Ends the outermost (script) frame, the one entry point never
    /// reached by `finish_function`.
    fn finish_script(&mut self, end_line: usize) -> ObjRef {
        self.emit_return(end_line);
        let frame = self.frames.pop().unwrap();
        let mut function = frame.function;
        function.upvalue_count = frame.upvalues.len();

        let protected = function.chunk.constants.len();
        for v in function.chunk.constants.iter() {
            self.heap.protect(*v);
        }
        self.maybe_collect();
        let script_ref = self.heap.alloc(Obj::Function(function));
        for _ in 0..protected {
            self.heap.unprotect();
        }
        script_ref
    }

    fn compile_class_decl(
        &mut self,
        name: &str,
        superclass: &Option<String>,
        methods: &[FunctionDecl],
        line: usize,
    ) {
        let name_const = self.identifier_constant(name, line);
        self.declare_variable(name, line);
        self.emit_op(OpCode::Class, line);
        self.emit_byte(name_const, line);
        self.define_variable(if self.current().scope_depth == 0 { Some(name_const) } else { None }, line);

        self.classes.push(ClassCompiler { has_superclass: false });

        let mut has_superclass = false;
        if let Some(super_name) = superclass {
            if super_name == name {
                self.error(line, "A class can't inherit from itself.");
            }
            self.compile_variable_get(super_name, line);
            self.begin_scope();
            self.add_local("super", line);
            self.mark_top_local_initialized();
            self.compile_variable_get(name, line);
            self.emit_op(OpCode::Inherit, line);
            has_superclass = true;
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.compile_variable_get(name, line);
        for m in methods {
            self.compile_method(m);
        }
        self.emit_op(OpCode::Pop, line);

        if has_superclass {
            self.end_scope(line);
        }
        self.classes.pop();
    }

    fn compile_method(&mut self, decl: &FunctionDecl) {
        let kind = if decl.name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        let name_const = self.identifier_constant(&decl.name, decl.line);
        self.compile_function(decl, kind);
        self.emit_op(OpCode::Method, decl.line);
        self.emit_byte(name_const, decl.line);
    }

    // ---- expressions ------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { name, value, line } => {
                self.compile_expr(value);
                self.compile_variable_set(name, *line);
            }
            Expr::Binary { left, op, right, line } => self.compile_binary(left, *op, right, *line),
            Expr::Call { callee, args, line } => self.compile_call(callee, args, *line),
            Expr::Get { object, name, line } => {
                self.compile_expr(object);
                let k = self.identifier_constant(name, *line);
                self.emit_op(OpCode::GetProperty, *line);
                self.emit_byte(k, *line);
            }
            Expr::Grouping { expression, .. } => self.compile_expr(expression),
            Expr::Number { value, line } => self.emit_constant(Value::Number(*value), *line),
            Expr::Str { value, line } => {
                self.maybe_collect();
                let r = self.heap.intern(value);
                self.emit_constant(Value::Obj(r), *line);
            }
            Expr::Bool { value, line } => {
                self.emit_op(if *value { OpCode::True } else { OpCode::False }, *line);
            }
            Expr::Nil { line } => self.emit_op(OpCode::Nil, *line),
            Expr::Logical { left, op, right, line } => self.compile_logical(left, *op, right, *line),
            Expr::Set { object, name, value, line } => {
                self.compile_expr(object);
                self.compile_expr(value);
                let k = self.identifier_constant(name, *line);
                self.emit_op(OpCode::SetProperty, *line);
                self.emit_byte(k, *line);
            }
            Expr::Super { method, line } => self.compile_super_get(method, *line),
            Expr::This { line } => {
                if self.classes.is_empty() {
                    self.error(*line, "Can't use 'this' outside of a class.");
                }
                self.compile_variable_get("this", *line);
            }
            Expr::Unary { op, right, line } => {
                self.compile_expr(right);
                match op {
                    UnaryOp::Negate => self.emit_op(OpCode::Negate, *line),
                    UnaryOp::Not => self.emit_op(OpCode::Not, *line),
                }
            }
            Expr::Variable { name, line } => self.compile_variable_get(name, *line),
        }
    }

    fn compile_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr, line: usize) {
        self.compile_expr(left);
        self.compile_expr(right);
        match op {
            BinaryOp::Add => self.emit_op(OpCode::Add, line),
            BinaryOp::Subtract => self.emit_op(OpCode::Subtract, line),
            BinaryOp::Multiply => self.emit_op(OpCode::Multiply, line),
            BinaryOp::Divide => self.emit_op(OpCode::Divide, line),
            BinaryOp::Equal => self.emit_op(OpCode::Equal, line),
            BinaryOp::NotEqual => {
                self.emit_op(OpCode::Equal, line);
                self.emit_op(OpCode::Not, line);
            }
            BinaryOp::Greater => self.emit_op(OpCode::Greater, line),
            BinaryOp::GreaterEqual => {
                self.emit_op(OpCode::Less, line);
                self.emit_op(OpCode::Not, line);
            }
            BinaryOp::Less => self.emit_op(OpCode::Less, line),
            BinaryOp::LessEqual => {
                self.emit_op(OpCode::Greater, line);
                self.emit_op(OpCode::Not, line);
            }
        }
    }

    fn compile_logical(&mut self, left: &Expr, op: LogicalOp, right: &Expr, line: usize) {
        self.compile_expr(left);
        let jump = match op {
            LogicalOp::And => self.emit_jump(OpCode::And, line),
            LogicalOp::Or => self.emit_jump(OpCode::Or, line),
        };
        self.compile_expr(right);
        self.patch_jump(jump);
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], line: usize) {
        if args.len() > 255 {
            self.error(line, "Can't have more than 255 arguments.");
        }
        match callee {
            Expr::Get { object, name, .. } => {
                self.compile_expr(object);
                for a in args {
                    self.compile_expr(a);
                }
                let k = self.identifier_constant(name, line);
                self.emit_op(OpCode::Invoke, line);
                self.emit_byte(k, line);
                self.emit_byte(args.len() as u8, line);
            }
            Expr::Super { method, .. } => {
                if self.classes.is_empty() {
                    self.error(line, "Can't use 'super' outside of a class.");
                } else if !self.classes.last().unwrap().has_superclass {
                    self.error(line, "Can't use 'super' in a class with no superclass.");
                }
                self.compile_variable_get("this", line);
                for a in args {
                    self.compile_expr(a);
                }
                let k = self.identifier_constant(method, line);
                self.compile_variable_get("super", line);
                self.emit_op(OpCode::SuperInvoke, line);
                self.emit_byte(k, line);
                self.emit_byte(args.len() as u8, line);
            }
            _ => {
                self.compile_expr(callee);
                for a in args {
                    self.compile_expr(a);
                }
                self.emit_op(OpCode::Call, line);
                self.emit_byte(args.len() as u8, line);
            }
        }
    }

    fn compile_super_get(&mut self, method: &str, line: usize) {
        if self.classes.is_empty() {
            self.error(line, "Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error(line, "Can't use 'super' in a class with no superclass.");
        }
        self.compile_variable_get("this", line);
        let k = self.identifier_constant(method, line);
        self.compile_variable_get("super", line);
        self.emit_op(OpCode::GetSuper, line);
        self.emit_byte(k, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile_source(src: &str) -> Result<(ObjRef, Heap), Vec<LoxError>> {
        let (tokens, _) = tokenize(src);
        let (stmts, parse_errors) = Parser::new(tokens).parse();
        assert!(parse_errors.is_empty(), "unexpected parse errors: {:?}", parse_errors);
        let mut heap = Heap::new();
        match Compiler::compile(&stmts, &mut heap) {
            Ok(r) => Ok((r, heap)),
            Err(e) => Err(e),
        }
    }

    #[test]
    fn compiles_arithmetic_without_errors() {
        assert!(compile_source("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn rejects_duplicate_local_in_scope() {
        let result = compile_source("{ var a = 1; var a = 2; }");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_top_level_return() {
        let result = compile_source("return 1;");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_this_outside_class() {
        let result = compile_source("print this;");
        assert!(result.is_err());
    }

    #[test]
    fn accepts_recursive_local_function() {
        assert!(compile_source("fun f() { fun g() { return g; } return g; }").is_ok());
    }

    #[test]
    fn compiles_inheriting_class() {
        assert!(compile_source("class A {} class B < A { init() { super.init(); } }").is_ok());
    }
}
