//! The compiler front door and its delegate cache.
//!
//! Delegates are cached by normalized source text and requested return
//! type. A hit returns the cached `Rc` without re-running the parser; the
//! parse counter exists so tests can pin that contract. The cache is owned
//! by the engine's top-level context, not by any global.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use brg_ir::{CallNode, Expr, Ty};
use brg_ops::OpTable;

use crate::delegate::{Compiled, FromVal, Gcxf, VelocityStep};
use crate::{differentiate, linearize, CompileError, Resolver};

/// Collapse whitespace runs and strip comments, so layout-only variants of
/// the same text share one delegate.
pub fn normalize_source(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut in_comment = false;
    let mut pending_space = false;
    for c in src.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                pending_space = true;
            }
            continue;
        }
        if c == '#' {
            in_comment = true;
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Script compiler with a process-scoped delegate cache.
pub struct Compiler {
    ops: Rc<OpTable>,
    difficulty: f32,
    cache: RefCell<FxHashMap<(String, Ty), Rc<Compiled>>>,
    vel_cache: RefCell<FxHashMap<String, Rc<Compiled>>>,
    parses: Cell<usize>,
}

impl Compiler {
    pub fn new(ops: Rc<OpTable>) -> Self {
        Self::with_difficulty(ops, 1.0)
    }

    pub fn with_difficulty(ops: Rc<OpTable>, difficulty: f32) -> Self {
        Compiler {
            ops,
            difficulty,
            cache: RefCell::new(FxHashMap::default()),
            vel_cache: RefCell::new(FxHashMap::default()),
            parses: Cell::new(0),
        }
    }

    pub fn ops(&self) -> &Rc<OpTable> {
        &self.ops
    }

    /// How many times the parser has actually run. Cache hits do not bump
    /// this.
    pub fn parse_count(&self) -> usize {
        self.parses.get()
    }

    pub fn num(&self, src: &str) -> Result<Gcxf<f32>, CompileError> {
        self.typed(src)
    }

    pub fn vec2(&self, src: &str) -> Result<Gcxf<glam::Vec2>, CompileError> {
        self.typed(src)
    }

    pub fn vec3(&self, src: &str) -> Result<Gcxf<glam::Vec3>, CompileError> {
        self.typed(src)
    }

    pub fn boolean(&self, src: &str) -> Result<Gcxf<bool>, CompileError> {
        self.typed(src)
    }

    pub fn rv2(&self, src: &str) -> Result<Gcxf<brg_ir::Rv2>, CompileError> {
        self.typed(src)
    }

    fn typed<T: FromVal>(&self, src: &str) -> Result<Gcxf<T>, CompileError> {
        Ok(Gcxf::new(self.compile_as(src, T::TY)?))
    }

    fn compile_as(&self, src: &str, ty: Ty) -> Result<Rc<Compiled>, CompileError> {
        let key = (normalize_source(src), ty);
        if let Some(hit) = self.cache.borrow().get(&key) {
            trace!(src = %key.0, ?ty, "delegate cache hit");
            return Ok(Rc::clone(hit));
        }
        debug!(src = %key.0, ?ty, "compiling delegate");
        self.parses.set(self.parses.get() + 1);
        let node = brg_parse::parse_expr_text(src)?;
        let compiled = Rc::new(self.lower(&node, ty)?);
        self.cache.borrow_mut().insert(key, Rc::clone(&compiled));
        Ok(compiled)
    }

    /// Resolve, coerce to the requested type, linearize.
    fn lower(&self, node: &CallNode, ty: Ty) -> Result<Compiled, CompileError> {
        let mut resolver = Resolver::new(&self.ops, self.difficulty);
        let (expr, found) = resolver.resolve(node)?;
        let expr = if found == ty {
            expr
        } else {
            resolver
                .coerce(expr, found, ty, node.span)
                .map_err(|_| CompileError::WrongReturnType {
                    expected: ty,
                    found,
                })?
        };
        Ok(Compiled {
            expr: linearize(&expr),
            ty,
            ops: Rc::clone(&self.ops),
        })
    }

    /// Compile an already-parsed call-tree (pattern construction path).
    pub fn compile_node<T: FromVal>(&self, node: &CallNode) -> Result<Gcxf<T>, CompileError> {
        Ok(Gcxf::new(Rc::new(self.lower(node, T::TY)?)))
    }

    /// Velocity-step delegate from a position expression: resolve as vec2,
    /// differentiate, linearize.
    pub fn velocity(&self, src: &str) -> Result<VelocityStep, CompileError> {
        let key = normalize_source(src);
        if let Some(hit) = self.vel_cache.borrow().get(&key) {
            trace!(src = %key, "velocity cache hit");
            return Ok(VelocityStep::new(Rc::clone(hit)));
        }
        self.parses.set(self.parses.get() + 1);
        let node = brg_parse::parse_expr_text(src)?;
        let compiled = Rc::new(self.lower_velocity(&node)?);
        self.vel_cache.borrow_mut().insert(key, Rc::clone(&compiled));
        Ok(VelocityStep::new(compiled))
    }

    /// Velocity-step from an already-parsed position expression.
    pub fn velocity_node(&self, node: &CallNode) -> Result<VelocityStep, CompileError> {
        Ok(VelocityStep::new(Rc::new(self.lower_velocity(node)?)))
    }

    fn lower_velocity(&self, node: &CallNode) -> Result<Compiled, CompileError> {
        let mut resolver = Resolver::new(&self.ops, self.difficulty);
        let (pos, found) = resolver.resolve(node)?;
        let pos = resolver.coerce(pos, found, Ty::Vec2, node.span).map_err(|_| {
            CompileError::WrongReturnType {
                expected: Ty::Vec2,
                found,
            }
        })?;
        let vel: Expr = differentiate(&self.ops, &pos)?;
        Ok(Compiled {
            expr: linearize(&vel),
            ty: Ty::Vec2,
            ops: Rc::clone(&self.ops),
        })
    }
}
