//! Tree-walking evaluator.
//!
//! # Design
//!
//! - One [`Evaluator`] drives one module evaluation or one host-initiated
//!   call; it tracks the active source, the current statement span, and the
//!   call stack for backtraces.
//! - Name resolution walks locals (inside a function) → module globals →
//!   the built-in universe.
//! - `load(...)` statements call back into a [`ModuleImporter`]; the host's
//!   loader implements that trait and recursion shares its cache.

pub mod builtins;
pub mod env;
pub mod error;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Arg, BinOp, Expr, ExprKind, Module, Stmt, StmtKind, Target, UnaryOp};
use crate::span::{Position, SourceInfo, Span};
use crate::value::{CallArgs, Function, Key, NativeObject, Value};

pub use env::{Bindings, ModuleEnv};
pub use error::{EvalError, EvalErrorKind, Frame};

/// Call depth limit. The language has no recursion-heavy idioms; this
/// bounds runaway recursion well before the host stack is at risk.
pub const MAX_CALL_DEPTH: usize = 100;

/// Host callback used by `load(...)` statements.
///
/// `module` is the logical name as written in the script; `from` is the
/// path of the module containing the `load`. Returns the loaded module's
/// exported bindings.
pub trait ModuleImporter {
    fn load(&mut self, module: &str, from: &Path) -> Result<IndexMap<String, Value>, EvalError>;
}

/// Statement outcome, threaded through block execution.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Lexical scope for one evaluation: optional function locals plus the
/// enclosing module environment.
struct Scope<'s> {
    locals: Option<&'s mut IndexMap<String, Value>>,
    module: &'s ModuleEnv,
}

/// The evaluator. See module docs.
pub struct Evaluator<'a> {
    universe: IndexMap<String, Value>,
    importer: Option<&'a mut dyn ModuleImporter>,
    sources: Vec<Rc<SourceInfo>>,
    frames: Vec<Frame>,
    current_span: Span,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator with the given built-in universe and no importer
    /// (any `load` fails). Suitable for calling already-loaded functions.
    pub fn new(universe: IndexMap<String, Value>) -> Self {
        Self {
            universe,
            importer: None,
            sources: Vec::new(),
            frames: Vec::new(),
            current_span: Span::zero(),
        }
    }

    /// Create an evaluator that resolves `load(...)` through `importer`.
    pub fn with_importer(
        universe: IndexMap<String, Value>,
        importer: &'a mut dyn ModuleImporter,
    ) -> Self {
        Self {
            universe,
            importer: Some(importer),
            sources: Vec::new(),
            frames: Vec::new(),
            current_span: Span::zero(),
        }
    }

    /// Position of the expression currently being evaluated.
    pub fn current_position(&self) -> Option<Position> {
        self.sources.last().map(|s| s.position(self.current_span))
    }

    fn position_at(&self, span: Span) -> Option<Position> {
        self.sources.last().map(|s| s.position(span))
    }

    fn backtrace(&self) -> Vec<Frame> {
        self.frames.iter().rev().cloned().collect()
    }

    /// Evaluate a module body top to bottom and return its global bindings.
    pub fn eval_module(
        &mut self,
        source: Rc<SourceInfo>,
        module: &Module,
    ) -> Result<Bindings, EvalError> {
        let env = ModuleEnv::new(source.clone());
        self.sources.push(source);
        let result = self.eval_module_body(module, &env);
        self.sources.pop();
        result?;
        Ok(env.bindings)
    }

    fn eval_module_body(&mut self, module: &Module, env: &ModuleEnv) -> Result<(), EvalError> {
        let mut scope = Scope {
            locals: None,
            module: env,
        };
        for stmt in &module.stmts {
            match self.exec_stmt(stmt, &mut scope)? {
                Flow::Normal => {}
                Flow::Return(_) => {
                    return Err(EvalError::value_error("return outside function")
                        .or_position(self.position_at(stmt.span)));
                }
                Flow::Break | Flow::Continue => {
                    return Err(EvalError::value_error("break/continue outside loop")
                        .or_position(self.position_at(stmt.span)));
                }
            }
        }
        Ok(())
    }

    /// Call a callable value from the host (e.g. `main`, a validator).
    pub fn call_value(&mut self, func: &Value, args: CallArgs) -> Result<Value, EvalError> {
        self.call_at(func, args, None)
    }

    fn call_at(
        &mut self,
        func: &Value,
        args: CallArgs,
        call_span: Option<Span>,
    ) -> Result<Value, EvalError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(EvalError::new(
                EvalErrorKind::Recursion,
                format!("call depth exceeds {MAX_CALL_DEPTH}"),
            ));
        }
        match func {
            Value::Function(f) => self.call_function(&f.clone(), args, call_span),
            Value::Builtin(b) => {
                let b = b.clone();
                (b.f)(self, args)
            }
            Value::Native(n) => n.clone().call(self, args),
            other => Err(EvalError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        f: &Rc<Function>,
        args: CallArgs,
        call_span: Option<Span>,
    ) -> Result<Value, EvalError> {
        let mut locals = self.bind_params(f, args)?;

        let call_position = call_span.and_then(|s| self.position_at(s));
        self.frames.push(Frame {
            function: f.name().to_string(),
            position: call_position,
        });
        self.sources.push(f.module.source.clone());
        let saved_span = self.current_span;

        let mut scope = Scope {
            locals: Some(&mut locals),
            module: &f.module,
        };
        let mut result = Ok(Value::None);
        for stmt in &f.def.body {
            match self.exec_stmt(stmt, &mut scope) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(v)) => {
                    result = Ok(v);
                    break;
                }
                Ok(Flow::Break | Flow::Continue) => {
                    result = Err(EvalError::value_error("break/continue outside loop")
                        .or_position(self.position_at(stmt.span)));
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        drop(scope);

        if let Err(e) = &mut result {
            if e.frames.is_empty() {
                e.frames = self.backtrace();
            }
        }
        self.sources.pop();
        self.frames.pop();
        self.current_span = saved_span;
        result
    }

    fn bind_params(
        &mut self,
        f: &Function,
        mut args: CallArgs,
    ) -> Result<IndexMap<String, Value>, EvalError> {
        let params = &f.def.params;
        if args.positional.len() > params.len() {
            return Err(EvalError::arity_error(format!(
                "{}() takes at most {} argument(s), got {}",
                f.name(),
                params.len(),
                args.positional.len()
            )));
        }
        let mut locals = IndexMap::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let value = if i < args.positional.len() {
                if args.keywords.contains_key(&param.name) {
                    return Err(EvalError::arity_error(format!(
                        "{}() got multiple values for parameter `{}`",
                        f.name(),
                        param.name
                    )));
                }
                args.positional[i].clone()
            } else if let Some(v) = args.keywords.shift_remove(&param.name) {
                v
            } else if let Some(d) = &f.defaults[i] {
                d.clone()
            } else {
                return Err(EvalError::arity_error(format!(
                    "{}() missing argument `{}`",
                    f.name(),
                    param.name
                )));
            };
            locals.insert(param.name.clone(), value);
        }
        if let Some(extra) = args.keywords.keys().next() {
            return Err(EvalError::arity_error(format!(
                "{}() got an unexpected keyword argument `{extra}`",
                f.name()
            )));
        }
        Ok(locals)
    }

    // === Statements ===

    fn exec_block(&mut self, stmts: &[Stmt], scope: &mut Scope<'_>) -> Result<Flow, EvalError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &mut Scope<'_>) -> Result<Flow, EvalError> {
        self.current_span = stmt.span;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval_expr(e, scope)?;
                Ok(Flow::Normal)
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval_expr(value, scope)?;
                self.assign_target(target, value, scope)?;
                Ok(Flow::Normal)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value, scope)?;
                Ok(Flow::Normal)
            }
            StmtKind::Def(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    match &param.default {
                        Some(expr) => defaults.push(Some(self.eval_expr(expr, scope)?)),
                        None => defaults.push(None),
                    }
                }
                let function = Value::Function(Rc::new(Function {
                    def: def.clone(),
                    module: scope.module.clone(),
                    defaults,
                }));
                self.assign_name(&def.name, function, scope);
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval_expr(e, scope)?,
                    None => Value::None,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval_expr(cond, scope)?.truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                self.exec_block(orelse, scope)
            }
            StmtKind::For { target, iter, body } => {
                let items = self
                    .eval_expr(iter, scope)?
                    .iterate()
                    .map_err(|e| e.or_position(self.position_at(iter.span)))?;
                for item in items {
                    self.assign_target(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Load { module, symbols } => {
                self.exec_load(stmt.span, module, symbols, scope)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_load(
        &mut self,
        span: Span,
        module: &str,
        symbols: &[(String, String)],
        scope: &mut Scope<'_>,
    ) -> Result<(), EvalError> {
        let from: PathBuf = scope.module.source.path().to_path_buf();
        let result = match self.importer.as_deref_mut() {
            Some(importer) => importer.load(module, &from),
            None => Err(EvalError::new(
                EvalErrorKind::Import,
                "load() is not available in this context",
            )),
        };
        let exports = result.map_err(|e| e.or_position(self.position_at(span)))?;
        for (local, remote) in symbols {
            let value = exports.get(remote).cloned().ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::Import,
                    format!("module \"{module}\" does not export \"{remote}\""),
                )
                .or_position(self.position_at(span))
            })?;
            scope
                .module
                .bindings
                .borrow_mut()
                .insert(local.clone(), value);
        }
        Ok(())
    }

    fn exec_aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        scope: &mut Scope<'_>,
    ) -> Result<(), EvalError> {
        let rhs = self.eval_expr(value, scope)?;
        match target {
            Target::Name(name) => {
                let current = self
                    .lookup(name, scope)
                    .ok_or_else(|| EvalError::name_error(name))?;
                let updated = self.binary_op(op, current, rhs)?;
                self.assign_name(name, updated, scope);
                Ok(())
            }
            Target::Attr(object, name) => {
                let object = self.eval_expr(object, scope)?;
                let current = self.attr_get(&object, name)?;
                let updated = self.binary_op(op, current, rhs)?;
                self.attr_set(&object, name, updated)
            }
            Target::Index(object, index) => {
                let object = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                let current = self.index_get(&object, &index)?;
                let updated = self.binary_op(op, current, rhs)?;
                self.index_set(&object, index, updated)
            }
            Target::Tuple(_) => Err(EvalError::type_error(
                "augmented assignment to a tuple target",
            )),
        }
    }

    fn assign_target(
        &mut self,
        target: &Target,
        value: Value,
        scope: &mut Scope<'_>,
    ) -> Result<(), EvalError> {
        match target {
            Target::Name(name) => {
                self.assign_name(name, value, scope);
                Ok(())
            }
            Target::Attr(object, name) => {
                let object = self.eval_expr(object, scope)?;
                self.attr_set(&object, name, value)
            }
            Target::Index(object, index) => {
                let object = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.index_set(&object, index, value)
            }
            Target::Tuple(targets) => {
                let items = value.iterate().map_err(|_| {
                    EvalError::type_error(format!(
                        "cannot unpack {} into {} target(s)",
                        value.type_name(),
                        targets.len()
                    ))
                })?;
                if items.len() != targets.len() {
                    return Err(EvalError::value_error(format!(
                        "cannot unpack {} value(s) into {} target(s)",
                        items.len(),
                        targets.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign_target(t, v, scope)?;
                }
                Ok(())
            }
        }
    }

    fn assign_name(&mut self, name: &str, value: Value, scope: &mut Scope<'_>) {
        match &mut scope.locals {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => {
                scope
                    .module
                    .bindings
                    .borrow_mut()
                    .insert(name.to_string(), value);
            }
        }
    }

    fn lookup(&self, name: &str, scope: &Scope<'_>) -> Option<Value> {
        if let Some(locals) = &scope.locals {
            if let Some(v) = locals.get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = scope.module.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.universe.get(name).cloned()
    }

    // === Expressions ===

    fn eval_expr(&mut self, expr: &Expr, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
        self.current_span = expr.span;
        let result = self.eval_expr_inner(expr, scope);
        result.map_err(|e| e.or_position(self.position_at(expr.span)))
    }

    fn eval_expr_inner(&mut self, expr: &Expr, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::NoneLit => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(x) => Ok(Value::Float(*x)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bytes(b) => Ok(Value::Bytes(b.clone())),
            ExprKind::Name(name) => self
                .lookup(name, scope)
                .ok_or_else(|| EvalError::name_error(name)),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, scope)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, scope)?);
                }
                Ok(Value::tuple(values))
            }
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = Key::from_value(&self.eval_expr(k, scope)?)
                        .map_err(|e| e.or_position(self.position_at(k.span)))?;
                    let value = self.eval_expr(v, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval_expr(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnaryOp::Neg => match v {
                        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| {
                            EvalError::new(EvalErrorKind::Overflow, "integer negation overflow")
                        }),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(EvalError::type_error(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            ExprKind::Binary { op, left, right } => match op {
                BinOp::And => {
                    let l = self.eval_expr(left, scope)?;
                    if l.truthy() {
                        self.eval_expr(right, scope)
                    } else {
                        Ok(l)
                    }
                }
                BinOp::Or => {
                    let l = self.eval_expr(left, scope)?;
                    if l.truthy() {
                        Ok(l)
                    } else {
                        self.eval_expr(right, scope)
                    }
                }
                _ => {
                    let l = self.eval_expr(left, scope)?;
                    let r = self.eval_expr(right, scope)?;
                    self.binary_op(*op, l, r)
                }
            },
            ExprKind::Conditional { cond, then, orelse } => {
                if self.eval_expr(cond, scope)?.truthy() {
                    self.eval_expr(then, scope)
                } else {
                    self.eval_expr(orelse, scope)
                }
            }
            ExprKind::Call { func, args } => {
                let callee = self.eval_expr(func, scope)?;
                let mut call_args = CallArgs::default();
                for arg in args {
                    match arg {
                        Arg::Positional(e) => {
                            call_args.positional.push(self.eval_expr(e, scope)?);
                        }
                        Arg::Keyword(name, e) => {
                            let value = self.eval_expr(e, scope)?;
                            if call_args.keywords.insert(name.clone(), value).is_some() {
                                return Err(EvalError::arity_error(format!(
                                    "duplicate keyword argument `{name}`"
                                )));
                            }
                        }
                    }
                }
                self.current_span = expr.span;
                self.call_at(&callee, call_args, Some(expr.span))
            }
            ExprKind::Attr { object, name } => {
                let object = self.eval_expr(object, scope)?;
                self.attr_get(&object, name)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.index_get(&object, &index)
            }
            ExprKind::ListComp {
                expr: body,
                target,
                iter,
                cond,
            } => {
                let items = self
                    .eval_expr(iter, scope)?
                    .iterate()
                    .map_err(|e| e.or_position(self.position_at(iter.span)))?;
                let saved = self.save_target_bindings(target, scope);
                let mut out = Vec::new();
                let mut run = || -> Result<(), EvalError> {
                    for item in items {
                        self.assign_target(target, item, scope)?;
                        if let Some(cond) = cond {
                            if !self.eval_expr(cond, scope)?.truthy() {
                                continue;
                            }
                        }
                        out.push(self.eval_expr(body, scope)?);
                    }
                    Ok(())
                };
                let result = run();
                self.restore_target_bindings(saved, scope);
                result?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp {
                key,
                value,
                target,
                iter,
                cond,
            } => {
                let items = self
                    .eval_expr(iter, scope)?
                    .iterate()
                    .map_err(|e| e.or_position(self.position_at(iter.span)))?;
                let saved = self.save_target_bindings(target, scope);
                let mut out = IndexMap::new();
                let mut run = || -> Result<(), EvalError> {
                    for item in items {
                        self.assign_target(target, item, scope)?;
                        if let Some(cond) = cond {
                            if !self.eval_expr(cond, scope)?.truthy() {
                                continue;
                            }
                        }
                        let k = Key::from_value(&self.eval_expr(key, scope)?)?;
                        let v = self.eval_expr(value, scope)?;
                        out.insert(k, v);
                    }
                    Ok(())
                };
                let result = run();
                self.restore_target_bindings(saved, scope);
                result?;
                Ok(Value::dict(out))
            }
        }
    }

    /// Snapshot the bindings a comprehension target will shadow.
    fn save_target_bindings(
        &self,
        target: &Target,
        scope: &Scope<'_>,
    ) -> Vec<(String, Option<Value>)> {
        let mut names = Vec::new();
        collect_target_names(target, &mut names);
        names
            .into_iter()
            .map(|name| {
                let previous = match &scope.locals {
                    Some(locals) => locals.get(&name).cloned(),
                    None => scope.module.bindings.borrow().get(&name).cloned(),
                };
                (name, previous)
            })
            .collect()
    }

    fn restore_target_bindings(
        &mut self,
        saved: Vec<(String, Option<Value>)>,
        scope: &mut Scope<'_>,
    ) {
        for (name, previous) in saved {
            match previous {
                Some(value) => self.assign_name(&name, value, scope),
                None => match &mut scope.locals {
                    Some(locals) => {
                        locals.shift_remove(&name);
                    }
                    None => {
                        scope.module.bindings.borrow_mut().shift_remove(&name);
                    }
                },
            }
        }
    }

    // === Attribute and index protocols ===

    pub fn attr_get(&mut self, object: &Value, name: &str) -> Result<Value, EvalError> {
        match object {
            Value::Struct(s) => s
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::attribute_error("struct", name)),
            Value::Native(n) => n.get_attr(name),
            other => crate::eval::builtins::method_for(other, name)
                .ok_or_else(|| EvalError::attribute_error(other.type_name(), name)),
        }
    }

    fn attr_set(&mut self, object: &Value, name: &str, value: Value) -> Result<(), EvalError> {
        match object {
            Value::Native(n) => n.set_attr(name, value),
            Value::Struct(_) => Err(EvalError::type_error(format!(
                "struct is immutable; cannot set `{name}`"
            ))),
            other => Err(EvalError::type_error(format!(
                "{} does not support attribute assignment",
                other.type_name()
            ))),
        }
    }

    fn index_get(&mut self, object: &Value, index: &Value) -> Result<Value, EvalError> {
        match object {
            Value::List(l) => {
                let l = l.borrow();
                let i = normalize_index(index, l.len())?;
                Ok(l[i].clone())
            }
            Value::Tuple(t) => {
                let i = normalize_index(index, t.len())?;
                Ok(t[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len())?;
                Ok(Value::str(chars[i].to_string()))
            }
            Value::Bytes(b) => {
                let i = normalize_index(index, b.len())?;
                Ok(Value::Int(b[i] as i64))
            }
            Value::Dict(d) => {
                let key = Key::from_value(index)?;
                d.borrow().get(&key).cloned().ok_or_else(|| {
                    EvalError::index_error(format!("key {} not found", index.repr()))
                })
            }
            Value::Native(n) => n.index_get(index),
            other => Err(EvalError::type_error(format!(
                "{} is not indexable",
                other.type_name()
            ))),
        }
    }

    fn index_set(&mut self, object: &Value, index: Value, value: Value) -> Result<(), EvalError> {
        match object {
            Value::List(l) => {
                let mut l = l.borrow_mut();
                let len = l.len();
                let i = normalize_index(&index, len)?;
                l[i] = value;
                Ok(())
            }
            Value::Dict(d) => {
                let key = Key::from_value(&index)?;
                d.borrow_mut().insert(key, value);
                Ok(())
            }
            Value::Native(n) => n.index_set(index, value),
            other => Err(EvalError::type_error(format!(
                "{} does not support item assignment",
                other.type_name()
            ))),
        }
    }

    // === Operators ===

    fn binary_op(&mut self, op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
        use std::cmp::Ordering;
        match op {
            BinOp::Eq => Ok(Value::Bool(left.equals(&right))),
            BinOp::Ne => Ok(Value::Bool(!left.equals(&right))),
            BinOp::Lt => Ok(Value::Bool(left.compare(&right)? == Ordering::Less)),
            BinOp::Le => Ok(Value::Bool(left.compare(&right)? != Ordering::Greater)),
            BinOp::Gt => Ok(Value::Bool(left.compare(&right)? == Ordering::Greater)),
            BinOp::Ge => Ok(Value::Bool(left.compare(&right)? != Ordering::Less)),
            BinOp::In => Ok(Value::Bool(membership(&left, &right)?)),
            BinOp::NotIn => Ok(Value::Bool(!membership(&left, &right)?)),
            BinOp::Add => add_values(left, right),
            BinOp::Sub => arithmetic(op, left, right),
            BinOp::Mul => mul_values(left, right),
            BinOp::Div | BinOp::FloorDiv | BinOp::Mod => arithmetic(op, left, right),
            BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled by eval_expr"),
        }
    }
}

fn collect_target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Name(name) => names.push(name.clone()),
        Target::Tuple(targets) => {
            for t in targets {
                collect_target_names(t, names);
            }
        }
        Target::Attr(..) | Target::Index(..) => {}
    }
}

/// Resolve a (possibly negative) integer index against a length.
fn normalize_index(index: &Value, len: usize) -> Result<usize, EvalError> {
    let Value::Int(i) = index else {
        return Err(EvalError::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let idx = if *i < 0 { *i + len as i64 } else { *i };
    if idx < 0 || idx as usize >= len {
        return Err(EvalError::index_error(format!(
            "index {i} out of range for length {len}"
        )));
    }
    Ok(idx as usize)
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::List(l) => Ok(l.borrow().iter().any(|v| v.equals(needle))),
        Value::Tuple(t) => Ok(t.iter().any(|v| v.equals(needle))),
        Value::Dict(d) => {
            let key = Key::from_value(needle)?;
            Ok(d.borrow().contains_key(&key))
        }
        Value::Set(s) => {
            let key = Key::from_value(needle)?;
            Ok(s.borrow().contains(&key))
        }
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => Err(EvalError::type_error(format!(
                "`in <string>` requires a string, got {}",
                other.type_name()
            ))),
        },
        Value::Native(n) => n.contains(needle),
        other => Err(EvalError::type_error(format!(
            "{} does not support membership tests",
            other.type_name()
        ))),
    }
}

fn add_values(left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| EvalError::new(EvalErrorKind::Overflow, "integer addition overflow")),
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut out = a.to_vec();
            out.extend_from_slice(b);
            Ok(Value::Bytes(out.into()))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            let mut out = a.to_vec();
            out.extend(b.iter().cloned());
            Ok(Value::tuple(out))
        }
        _ => arithmetic(BinOp::Add, left, right),
    }
}

fn mul_values(left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            Ok(Value::str(s.repeat((*n).max(0) as usize)))
        }
        (Value::List(l), Value::Int(n)) | (Value::Int(n), Value::List(l)) => {
            let items = l.borrow();
            let mut out = Vec::with_capacity(items.len() * (*n).max(0) as usize);
            for _ in 0..(*n).max(0) {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => arithmetic(BinOp::Mul, left, right),
    }
}

/// Numeric arithmetic with int/float promotion and Python-style floor
/// division and modulo (result takes the divisor's sign).
fn arithmetic(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => float_arithmetic(op, *a, *b),
        (Value::Int(a), Value::Float(b)) => float_arithmetic(op, *a as f64, *b),
        (Value::Float(a), Value::Int(b)) => float_arithmetic(op, *a, *b as f64),
        _ => Err(EvalError::type_error(format!(
            "unsupported operand types for `{}`: {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let overflow = || EvalError::new(EvalErrorKind::Overflow, "integer overflow");
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Div => {
            if b == 0 {
                Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "division by zero",
                ))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "integer division by zero",
                ));
            }
            let mut q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && (a < 0) != (b < 0) {
                q -= 1;
            }
            Ok(Value::Int(q))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "modulo by zero",
                ));
            }
            let mut r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && (r < 0) != (b < 0) {
                r += b;
            }
            Ok(Value::Int(r))
        }
        _ => unreachable!("non-arithmetic op {op}"),
    }
}

fn float_arithmetic(op: BinOp, a: f64, b: f64) -> Result<Value, EvalError> {
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div => {
            if b == 0.0 {
                Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "division by zero",
                ))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "division by zero",
                ))
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        BinOp::Mod => {
            if b == 0.0 {
                Err(EvalError::new(
                    EvalErrorKind::DivisionByZero,
                    "modulo by zero",
                ))
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        _ => unreachable!("non-arithmetic op {op}"),
    }
}
