/*
 * interpreter.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tree-walking interpreter for parsed programs.
//!
//! Every call to [`Program::call`] builds a fresh global environment, so
//! renders share nothing but the immutable syntax tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use super::ast::{
    AssignOp, DeclKind, Declarator, Expr, ForInit, FunctionDef, LogicalOp, LoopBinding,
    MemberKey, Program, Stmt, UnaryOp, UpdateOp,
};
use super::builtins;
use super::operators::evaluate_binary;
use super::value::{Closure, HeapScope, Value};
use crate::codegen::OUTPUT_BUFFER;
use crate::error::{RenderError, RenderResult};

/// Nested function calls allowed before a render fails with a range error.
const MAX_CALL_DEPTH: usize = 64;

/// A lexical environment: a chain of frames from the innermost scope out to
/// the globals.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Frame>>);

struct Frame {
    kind: FrameKind,
    bindings: HashMap<String, Binding>,
    parent: Option<Env>,
    /// Set once a closure captures this frame.
    captured: bool,
}

enum FrameKind {
    Global,
    Function,
    Block,
    /// `with (value)`: own properties of the value resolve as bare names.
    With(Value),
}

struct Binding {
    value: Value,
    mutable: bool,
}

impl Env {
    /// An empty global environment.
    pub fn root() -> Self {
        Env::new(FrameKind::Global, None)
    }

    fn new(kind: FrameKind, parent: Option<Env>) -> Self {
        Env(Rc::new(RefCell::new(Frame {
            kind,
            bindings: HashMap::new(),
            parent,
            captured: false,
        })))
    }

    fn child(&self, kind: FrameKind) -> Self {
        Env::new(kind, Some(self.clone()))
    }

    /// Bind `name` in this frame, replacing any existing binding.
    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.0
            .borrow_mut()
            .bindings
            .insert(name.to_string(), Binding { value, mutable });
    }

    /// Resolve a bare name.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut env = self.clone();
        loop {
            let parent = {
                let frame = env.0.borrow();
                if let FrameKind::With(object) = &frame.kind {
                    if object.has_own_property(name) {
                        return object.get_property(name).ok();
                    }
                }
                if let Some(binding) = frame.bindings.get(name) {
                    return Some(binding.value.clone());
                }
                frame.parent.clone()?
            };
            env = parent;
        }
    }

    /// Assign to an existing binding (or `with` property).
    pub fn assign(&self, name: &str, value: Value) -> RenderResult<()> {
        let mut env = self.clone();
        loop {
            let parent = {
                let mut frame = env.0.borrow_mut();
                if let FrameKind::With(object) = &frame.kind {
                    if object.has_own_property(name) {
                        return object.set_property(name, value);
                    }
                }
                if let Some(binding) = frame.bindings.get_mut(name) {
                    if !binding.mutable {
                        return Err(RenderError::type_error("Assignment to constant variable."));
                    }
                    binding.value = value;
                    return Ok(());
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => env = parent,
                None => {
                    return Err(RenderError::Reference {
                        name: name.to_string(),
                    });
                }
            }
        }
    }

    /// The nearest function (or global) frame, where `var` bindings live.
    fn function_scope(&self) -> Env {
        let mut env = self.clone();
        loop {
            let parent = {
                let frame = env.0.borrow();
                if matches!(frame.kind, FrameKind::Function | FrameKind::Global) {
                    None
                } else {
                    frame.parent.clone()
                }
            };
            match parent {
                Some(parent) => env = parent,
                None => return env,
            }
        }
    }

    /// Hoisted `var`: bound to `undefined` unless the name already exists
    /// in the function scope.
    fn declare_var(&self, name: &str) {
        let scope = self.function_scope();
        let mut frame = scope.0.borrow_mut();
        frame.bindings.entry(name.to_string()).or_insert(Binding {
            value: Value::Undefined,
            mutable: true,
        });
    }

    /// `name += text` on a binding of this frame, creating it if needed.
    fn append(&self, name: &str, text: &str) {
        let mut frame = self.0.borrow_mut();
        let binding = frame.bindings.entry(name.to_string()).or_insert(Binding {
            value: Value::from(""),
            mutable: true,
        });
        let mut current = binding.value.to_js_string();
        current.push_str(text);
        binding.value = Value::from(current);
    }

    /// Mark this frame as captured. Returns `true` the first time.
    fn capture(&self) -> bool {
        let mut frame = self.0.borrow_mut();
        !std::mem::replace(&mut frame.captured, true)
    }

    /// Drop every binding and the parent link, breaking reference cycles
    /// between closures and the frames they were created in.
    fn clear(&self) {
        let mut frame = self.0.borrow_mut();
        frame.bindings.clear();
        frame.parent = None;
        frame.kind = FrameKind::Block;
    }
}

/// How a statement completed.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// An assignable location.
enum Place {
    Binding(String),
    Property(Value, String),
}

pub struct Interpreter {
    /// Frame of the program function; `print` appends to its output buffer.
    program_env: Env,
    depth: usize,
    /// Frames captured by closures, cleared when the render ends.
    captured: Vec<Env>,
}

impl Program {
    /// Run the program with `data` bound to its first parameter and return
    /// the produced text.
    ///
    /// A program that returns `undefined` produces the empty string.
    pub fn call(&self, data: &serde_json::Value) -> RenderResult<String> {
        let _heap = HeapScope::enter();
        let globals = builtins::global_env();
        let program_env = globals.child(FrameKind::Function);
        let mut interpreter = Interpreter {
            program_env: program_env.clone(),
            depth: 0,
            captured: Vec::new(),
        };

        let result = interpreter.run(self, Value::from_json(data));
        interpreter.release();
        program_env.clear();
        globals.clear();

        match result? {
            Value::Undefined => Ok(String::new()),
            value => Ok(value.to_js_string()),
        }
    }
}

impl Interpreter {
    fn run(&mut self, program: &Program, data: Value) -> RenderResult<Value> {
        let env = self.program_env.clone();
        let mut args = std::iter::once(data);
        for param in &program.params {
            env.declare(param, args.next().unwrap_or_default(), true);
        }
        if let Some(rest) = &program.rest {
            env.declare(rest, Value::new_array(args.collect()), true);
        }
        self.enter_function_body(&program.body, &env);
        match self.exec_block(&program.body, &env)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    fn release(&mut self) {
        for env in self.captured.drain(..) {
            env.clear();
        }
    }

    /// Append to the program's output buffer.
    pub fn print(&mut self, text: &str) {
        self.program_env.append(OUTPUT_BUFFER, text);
    }

    // Hoisting

    fn enter_function_body(&mut self, body: &[Stmt], env: &Env) {
        for stmt in body {
            hoist_vars(stmt, env);
        }
        self.hoist_functions(body, env);
    }

    fn hoist_functions(&mut self, stmts: &[Stmt], env: &Env) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = self.make_closure(def, env);
                    env.declare(name, closure, true);
                }
            }
        }
    }

    fn make_closure(&mut self, def: &Arc<FunctionDef>, env: &Env) -> Value {
        if env.capture() {
            self.captured.push(env.clone());
        }
        Value::Function(Rc::new(Closure {
            def: Arc::clone(def),
            env: env.clone(),
        }))
    }

    // Statements

    fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> RenderResult<Flow> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> RenderResult<Flow> {
        match stmt {
            Stmt::Declaration(kind, declarators) => {
                self.declare(*kind, declarators, env)?;
                Ok(Flow::Normal)
            }
            // Hoisted when the enclosing body was entered.
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.exec(consequent, env)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_env = env.child(FrameKind::Block);
                match init {
                    Some(ForInit::Declaration(kind, declarators)) => {
                        self.declare(*kind, declarators, &loop_env)?;
                    }
                    Some(ForInit::Expr(expr)) => {
                        self.eval(expr, &loop_env)?;
                    }
                    None => {}
                }
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &loop_env)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &loop_env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_env)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, env)? {
                    Value::Array(items) => items.borrow().clone(),
                    Value::String(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
                    _ => {
                        return Err(RenderError::type_error(format!(
                            "{} is not iterable",
                            iterable.describe()
                        )));
                    }
                };
                self.exec_each(binding, items, body, env)
            }
            Stmt::ForIn {
                binding,
                object,
                body,
            } => {
                let keys = self
                    .eval(object, env)?
                    .keys()
                    .into_iter()
                    .map(Value::from)
                    .collect();
                self.exec_each(binding, keys, body, env)
            }
            Stmt::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::With { object, body } => {
                let object = self.eval(object, env)?;
                if object.is_nullish() {
                    return Err(RenderError::type_error(
                        "Cannot convert undefined or null to object",
                    ));
                }
                self.exec(body, &env.child(FrameKind::With(object)))
            }
            Stmt::Block(stmts) => {
                let block_env = env.child(FrameKind::Block);
                self.hoist_functions(stmts, &block_env);
                self.exec_block(stmts, &block_env)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn declare(&mut self, kind: DeclKind, declarators: &[Declarator], env: &Env) -> RenderResult<()> {
        for declarator in declarators {
            match kind {
                // Already hoisted; only the initializer runs here.
                DeclKind::Var => {
                    if let Some(init) = &declarator.init {
                        let value = self.eval(init, env)?;
                        env.assign(&declarator.name, value)?;
                    }
                }
                DeclKind::Let | DeclKind::Const => {
                    let value = match &declarator.init {
                        Some(init) => self.eval(init, env)?,
                        None => Value::Undefined,
                    };
                    env.declare(&declarator.name, value, kind == DeclKind::Let);
                }
            }
        }
        Ok(())
    }

    /// Body of `for...of` and `for...in`. Each iteration gets its own frame,
    /// so closures created in the body see that iteration's binding.
    fn exec_each(
        &mut self,
        binding: &LoopBinding,
        items: Vec<Value>,
        body: &Stmt,
        env: &Env,
    ) -> RenderResult<Flow> {
        for item in items {
            let iteration_env = env.child(FrameKind::Block);
            match binding {
                LoopBinding::Declare(DeclKind::Var, name) | LoopBinding::Assign(name) => {
                    iteration_env.assign(name, item)?;
                }
                LoopBinding::Declare(kind, name) => {
                    iteration_env.declare(name, item, *kind == DeclKind::Let);
                }
            }
            match self.exec(body, &iteration_env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    // Expressions

    fn eval(&mut self, expr: &Expr, env: &Env) -> RenderResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::from(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<RenderResult<Vec<_>>>()?;
                Ok(Value::new_array(items))
            }
            Expr::Object(properties) => {
                let mut map = IndexMap::with_capacity(properties.len());
                for property in properties {
                    let value = self.eval(&property.value, env)?;
                    map.insert(property.key.clone(), value);
                }
                Ok(Value::new_object(map))
            }
            Expr::Function(def) => Ok(self.make_closure(def, env)),
            Expr::Ident(name) => env.lookup(name).ok_or_else(|| RenderError::Reference {
                name: name.clone(),
            }),
            Expr::Member { object, key } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(key, env)?;
                object.get_property(&key)
            }
            Expr::Call { callee, args } => {
                let function = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<RenderResult<Vec<_>>>()?;
                if !function.is_callable() {
                    return Err(RenderError::type_error(format!(
                        "{} is not a function",
                        callee.describe()
                    )));
                }
                self.call(&function, args)
            }
            Expr::Unary { op, operand } => {
                if let (UnaryOp::Typeof, Expr::Ident(name)) = (op, operand.as_ref()) {
                    // Undeclared names are not an error under `typeof`.
                    let type_of = env.lookup(name).map_or("undefined", |value| value.type_of());
                    return Ok(Value::from(type_of));
                }
                let value = self.eval(operand, env)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Typeof => Value::from(value.type_of()),
                })
            }
            Expr::Update { op, prefix, target } => {
                let place = self.place(target, env)?;
                let old = self.read(&place, env)?.to_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.write(&place, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(evaluate_binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self.place(target, env)?;
                let value = match op {
                    AssignOp::Assign => self.eval(value, env)?,
                    AssignOp::Compound(binary) => {
                        let current = self.read(&place, env)?;
                        let rhs = self.eval(value, env)?;
                        evaluate_binary(*binary, &current, &rhs)
                    }
                };
                self.write(&place, value.clone(), env)?;
                Ok(value)
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, env)?;
                }
                Ok(last)
            }
        }
    }

    fn member_key(&mut self, key: &MemberKey, env: &Env) -> RenderResult<String> {
        match key {
            MemberKey::Named(name) => Ok(name.clone()),
            MemberKey::Computed(expr) => Ok(self.eval(expr, env)?.to_property_key()),
        }
    }

    fn place(&mut self, target: &Expr, env: &Env) -> RenderResult<Place> {
        match target {
            Expr::Ident(name) => Ok(Place::Binding(name.clone())),
            Expr::Member { object, key } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(key, env)?;
                Ok(Place::Property(object, key))
            }
            other => Err(RenderError::type_error(format!(
                "{} is not assignable",
                other.describe()
            ))),
        }
    }

    fn read(&self, place: &Place, env: &Env) -> RenderResult<Value> {
        match place {
            Place::Binding(name) => env.lookup(name).ok_or_else(|| RenderError::Reference {
                name: name.clone(),
            }),
            Place::Property(object, key) => object.get_property(key),
        }
    }

    fn write(&self, place: &Place, value: Value, env: &Env) -> RenderResult<()> {
        match place {
            Place::Binding(name) => env.assign(name, value),
            Place::Property(object, key) => object.set_property(key, value),
        }
    }

    // Calls

    /// Call any callable value.
    pub fn call(&mut self, function: &Value, args: Vec<Value>) -> RenderResult<Value> {
        match function {
            Value::Function(closure) => {
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(RenderError::range_error("Maximum call stack size exceeded"));
                }
                self.depth += 1;
                let result = self.call_closure(closure, args);
                self.depth -= 1;
                result
            }
            Value::Builtin(builtin) => builtins::call_builtin(self, *builtin, args),
            Value::BoundMethod(bound) => {
                builtins::call_method(self, &bound.receiver, bound.method, args)
            }
            other => Err(RenderError::type_error(format!(
                "{} is not a function",
                other.to_js_string()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> RenderResult<Value> {
        let def = &closure.def;
        let env = closure.env.child(FrameKind::Function);
        if let Some(name) = &def.name {
            env.declare(name, Value::Function(Rc::clone(closure)), true);
        }
        let mut args = args.into_iter();
        for param in &def.params {
            env.declare(param, args.next().unwrap_or_default(), true);
        }
        if let Some(rest) = &def.rest {
            env.declare(rest, Value::new_array(args.collect()), true);
        }
        self.enter_function_body(&def.body, &env);
        match self.exec_block(&def.body, &env)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }
}

/// Bind every `var` declared in `stmt` (outside nested functions).
fn hoist_vars(stmt: &Stmt, env: &Env) {
    match stmt {
        Stmt::Declaration(DeclKind::Var, declarators)
        | Stmt::For {
            init: Some(ForInit::Declaration(DeclKind::Var, declarators)),
            ..
        } => {
            for declarator in declarators {
                env.declare_var(&declarator.name);
            }
        }
        Stmt::ForOf {
            binding: LoopBinding::Declare(DeclKind::Var, name),
            ..
        }
        | Stmt::ForIn {
            binding: LoopBinding::Declare(DeclKind::Var, name),
            ..
        } => env.declare_var(name),
        _ => {}
    }
    match stmt {
        Stmt::If {
            consequent,
            alternate,
            ..
        } => {
            hoist_vars(consequent, env);
            if let Some(alternate) = alternate {
                hoist_vars(alternate, env);
            }
        }
        Stmt::For { body, .. }
        | Stmt::ForOf { body, .. }
        | Stmt::ForIn { body, .. }
        | Stmt::While { body, .. }
        | Stmt::With { body, .. } => hoist_vars(body, env),
        Stmt::Block(stmts) => {
            for stmt in stmts {
                hoist_vars(stmt, env);
            }
        }
        _ => {}
    }
}
