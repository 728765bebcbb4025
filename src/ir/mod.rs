//! Expression intermediate representation.
//!
//! The IR is a tagged algebraic tree: one `ExprKind` sum type with boxed
//! children, wrapped by [`Expr`] which carries the node's derived
//! `(Primitive, Composite)` type annotation. `Clone` performs a deep copy;
//! equality is structural.
//!
//! Construction goes through the checked `make`-style factories on `Expr`.
//! Arithmetic requires identical primitive types on both operands;
//! promotion is the caller's responsibility via an explicit [`Expr::cast`].

mod helpers;
mod ops;
mod printer;
mod visitor;

pub use helpers::{
    coeff_of_var, collect_references, is_constant_for, linear_terms, replace_expr, replace_var,
    simplify,
};
pub use printer::dump;
pub use visitor::{Mutate, Visit, mutate_children, walk_children};

use num_traits::NumCast;

use crate::error::CompileError;
use crate::types::{Composite, Primitive, simd_type_for_width};

/// Identity tag marking an expression used as an address.
pub const REFERENCE_ADDRESS: &str = "reference_address";

// =============================================================================
// SYMBOL NODES
// =============================================================================

/// A named or anonymous compile-time scalar.
///
/// Constants participating in shape expressions must be integer-typed and
/// have their values bound before code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    name: Option<String>,
    ptype: Primitive,
    value: Option<ConstantValue>,
}

/// The bound value of a [`Constant`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Int(i64),
    Float(f64),
}

impl Constant {
    /// An anonymous integer constant (the common shape-dimension case).
    pub fn int(value: i64) -> Self {
        Constant {
            name: None,
            ptype: Primitive::Int32,
            value: Some(ConstantValue::Int(value)),
        }
    }

    /// A named integer constant.
    pub fn named_int(name: impl Into<String>, value: i64) -> Self {
        Constant {
            name: Some(name.into()),
            ptype: Primitive::Int32,
            value: Some(ConstantValue::Int(value)),
        }
    }

    /// A named constant with no value bound yet.
    pub fn unbound(name: impl Into<String>, ptype: Primitive) -> Self {
        Constant {
            name: Some(name.into()),
            ptype,
            value: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ptype(&self) -> Primitive {
        self.ptype
    }

    pub fn value_set(&self) -> bool {
        self.value.is_some()
    }

    /// The integer value converted to `T`, if bound and integral.
    pub fn int_value<T: NumCast>(&self) -> Option<T> {
        match self.value {
            Some(ConstantValue::Int(v)) => NumCast::from(v),
            _ => None,
        }
    }
}

/// Closed-open integer interval `[lower, upper)` attached to a [`Var`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lower: i64,
    pub upper: i64,
}

/// A named symbol, optionally carrying the interval its values range over.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    name: String,
    ptype: Primitive,
    interval: Option<Interval>,
    readonly: bool,
}

impl Var {
    pub fn new(name: impl Into<String>, ptype: Primitive) -> Self {
        Var {
            name: name.into(),
            ptype,
            interval: None,
            readonly: false,
        }
    }

    /// An `int32` iterator variable ranging over `[lower, upper)`.
    pub fn with_interval(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Var {
            name: name.into(),
            ptype: Primitive::Int32,
            interval: Some(Interval { lower, upper }),
            readonly: false,
        }
    }

    /// Mark the symbol read-only (emitted as a `const` parameter).
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ptype(&self) -> Primitive {
        self.ptype
    }

    pub fn interval(&self) -> Option<Interval> {
        self.interval
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// A named multi-dimensional array with a fixed shape and an element type,
/// but no storage of its own.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    dims: Vec<Constant>,
    ptype: Primitive,
}

impl Tensor {
    pub fn new(name: impl Into<String>, dims: Vec<Constant>, ptype: Primitive) -> Self {
        Tensor {
            name: name.into(),
            dims,
            ptype,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[Constant] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn ptype(&self) -> Primitive {
        self.ptype
    }

    /// Total element count, if every dimension has a bound value.
    pub fn num_elements(&self) -> Option<i64> {
        self.dims
            .iter()
            .map(|d| d.int_value::<i64>())
            .try_fold(1i64, |acc, d| d.map(|d| acc * d))
    }
}

// Tensor expressions are equal iff their names match; the name is unique
// within a function.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

// =============================================================================
// OPERATOR TAGS
// =============================================================================

/// Binary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpr {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
    And,
    Or,
    Min,
    Max,
}

impl BinOpr {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div | BinOpr::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpr::EQ | BinOpr::NE | BinOpr::LT | BinOpr::LE | BinOpr::GT | BinOpr::GE
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOpr::And | BinOpr::Or)
    }

    pub fn is_saturating(self) -> bool {
        matches!(self, BinOpr::Min | BinOpr::Max)
    }
}

/// Unary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOpr {
    Minus,
    Not,
    Exp,
}

/// Mutation operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOpr {
    Assign,
    SumAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

/// SIMD operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimdOpr {
    Add,
    Sub,
    Mul,
    Div,
    Load,
    Store,
}

/// Buffer operations emitted by the graph builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferOprKind {
    Create,
    CreateAssign,
    Reference,
    Destroy,
}

/// A generated procedure: typed input/output tensor parameters and a body.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub inputs: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub body: Box<Expr>,
}

// =============================================================================
// EXPRKIND — the tagged union
// =============================================================================

/// Every node kind of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntImm(i64),
    FloatImm(f64),
    BoolImm(bool),
    Constant(Constant),
    Var(Var),
    Tensor(Tensor),
    /// A flat array `name<size>`.
    Array {
        name: String,
        size: Box<Expr>,
    },
    Binary {
        op: BinOpr,
        a: Box<Expr>,
        b: Box<Expr>,
    },
    Unary {
        op: UnOpr,
        a: Box<Expr>,
    },
    /// A subscript `T[i0, …, ik]`.
    Reference {
        target: Box<Expr>,
        iterators: Vec<Expr>,
    },
    For {
        init: Box<Expr>,
        cond: Box<Expr>,
        inc: Box<Expr>,
        body: Box<Expr>,
        iterator: Box<Expr>,
    },
    IfThenElse {
        condition: Box<Expr>,
        true_block: Box<Expr>,
        false_block: Option<Box<Expr>>,
    },
    Block(Vec<Expr>),
    Call {
        caller: String,
        arguments: Vec<Expr>,
    },
    Function(IrFunction),
    /// A section that must run on the first invocation only; `cond_var_name`
    /// names a module-scope boolean.
    CallOnce {
        cond_var_name: String,
        block: Box<Expr>,
    },
    Assign {
        op: AssignOpr,
        a: Box<Expr>,
        b: Box<Expr>,
    },
    /// A scoped binding `type a = b;`.
    Let {
        a: Box<Expr>,
        b: Box<Expr>,
    },
    SimdOp {
        vector_width: usize,
        op: SimdOpr,
        a: Box<Expr>,
        b: Option<Box<Expr>>,
    },
    /// A free-text annotation, printed as a comment.
    Mark(String),
    /// A transparent wrapper tagging `expr` with an id string.
    Identity {
        expr: Box<Expr>,
        id: String,
    },
    /// An explicit conversion; the target type lives on the wrapping [`Expr`].
    Cast(Box<Expr>),
    Allocate {
        buffer_name: String,
        size: Box<Expr>,
        dtype: Primitive,
    },
    BufferOpr {
        name: String,
        op: BufferOprKind,
        /// Element count of the buffer.
        size: Option<Box<Expr>>,
        dtype: Primitive,
        /// Payload for `CreateAssign` buffers (weights).
        data: Option<Vec<f32>>,
    },
    Module {
        global_data: Box<Expr>,
        functions: Box<Expr>,
    },
}

// =============================================================================
// EXPR — typed wrapper
// =============================================================================

/// An expression node together with its `(primitive, composite)` type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    ptype: Primitive,
    ctype: Composite,
}

impl Expr {
    fn new(kind: ExprKind, ptype: Primitive, ctype: Composite) -> Self {
        Expr { kind, ptype, ctype }
    }

    fn stmt(kind: ExprKind) -> Self {
        Expr::new(kind, Primitive::Void, Composite::Primitive)
    }

    // -------------------------------------------------------------------------
    // Immediates and symbols
    // -------------------------------------------------------------------------

    /// An `int32` immediate.
    pub fn int(value: i64) -> Self {
        Expr::new(
            ExprKind::IntImm(value),
            Primitive::Int32,
            Composite::Primitive,
        )
    }

    /// An `int64` immediate.
    pub fn int64(value: i64) -> Self {
        Expr::new(
            ExprKind::IntImm(value),
            Primitive::Int64,
            Composite::Primitive,
        )
    }

    /// A `float32` immediate.
    pub fn float32(value: f32) -> Self {
        Expr::new(
            ExprKind::FloatImm(<f64 as From<f32>>::from(value)),
            Primitive::Float32,
            Composite::Primitive,
        )
    }

    /// A `float64` immediate.
    pub fn float64(value: f64) -> Self {
        Expr::new(
            ExprKind::FloatImm(value),
            Primitive::Float64,
            Composite::Primitive,
        )
    }

    /// A boolean immediate.
    pub fn boolean(value: bool) -> Self {
        Expr::new(
            ExprKind::BoolImm(value),
            Primitive::Boolean,
            Composite::Primitive,
        )
    }

    /// A flat array symbol `name<size>`.
    pub fn array(name: impl Into<String>, size: Expr, dtype: Primitive) -> Self {
        Expr::new(
            ExprKind::Array {
                name: name.into(),
                size: Box::new(size),
            },
            dtype,
            Composite::Primitive,
        )
    }

    // -------------------------------------------------------------------------
    // Operators
    // -------------------------------------------------------------------------

    /// Checked binary construction; see the module docs for the type rules.
    pub fn binary(op: BinOpr, a: Expr, b: Expr) -> Result<Expr, CompileError> {
        if op.is_logical() {
            for side in [&a, &b] {
                if side.ptype() != Primitive::Boolean {
                    return Err(CompileError::type_error(format!(
                        "logical operand must be boolean, got {}",
                        side.ptype()
                    )));
                }
            }
            return Ok(Expr::new(
                ExprKind::Binary {
                    op,
                    a: Box::new(a),
                    b: Box::new(b),
                },
                Primitive::Boolean,
                Composite::Primitive,
            ));
        }

        if a.ptype() != b.ptype() {
            return Err(CompileError::type_error(format!(
                "operands of {op:?} have mismatched primitive types {} vs {}; insert an explicit cast",
                a.ptype(),
                b.ptype()
            )));
        }
        if a.ctype() != b.ctype() {
            return Err(CompileError::type_error(format!(
                "operands of {op:?} have mismatched composite types {} vs {}",
                a.ctype(),
                b.ctype()
            )));
        }

        let (ptype, ctype) = if op.is_comparison() {
            (Primitive::Boolean, Composite::Primitive)
        } else {
            (a.ptype(), a.ctype())
        };
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                a: Box::new(a),
                b: Box::new(b),
            },
            ptype,
            ctype,
        ))
    }

    /// Checked unary construction.
    pub fn unary(op: UnOpr, a: Expr) -> Result<Expr, CompileError> {
        let ok = match op {
            UnOpr::Minus => a.ptype().is_numeric() || a.ptype() == Primitive::Unk,
            UnOpr::Not => a.ptype() == Primitive::Boolean,
            UnOpr::Exp => a.ptype().is_float(),
        };
        if !ok {
            return Err(CompileError::type_error(format!(
                "operand of {op:?} has unsupported primitive type {}",
                a.ptype()
            )));
        }
        let ptype = a.ptype();
        let ctype = a.ctype();
        Ok(Expr::new(
            ExprKind::Unary { op, a: Box::new(a) },
            ptype,
            ctype,
        ))
    }

    /// `min(a, b)`.
    pub fn min(a: Expr, b: Expr) -> Result<Expr, CompileError> {
        Expr::binary(BinOpr::Min, a, b)
    }

    /// `max(a, b)`.
    pub fn max(a: Expr, b: Expr) -> Result<Expr, CompileError> {
        Expr::binary(BinOpr::Max, a, b)
    }

    // -------------------------------------------------------------------------
    // Memory
    // -------------------------------------------------------------------------

    /// A subscript into `target`. A shaped tensor target requires the
    /// iterator count to equal its rank.
    pub fn reference(target: Expr, iterators: Vec<Expr>) -> Result<Expr, CompileError> {
        if let ExprKind::Tensor(t) = &target.kind
            && t.rank() != iterators.len()
        {
            return Err(CompileError::shape(format!(
                "subscript of tensor '{}' has {} iterators but the tensor has rank {}",
                t.name(),
                iterators.len(),
                t.rank()
            )));
        }
        let ptype = target.ptype();
        Ok(Expr::new(
            ExprKind::Reference {
                target: Box::new(target),
                iterators,
            },
            ptype,
            Composite::Primitive,
        ))
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// A `for` loop; the body is wrapped in a block when it is not one.
    pub fn for_loop(init: Expr, cond: Expr, inc: Expr, body: Expr, iterator: Expr) -> Expr {
        let body = if body.is_block() {
            body
        } else {
            Expr::block(vec![body])
        };
        Expr::stmt(ExprKind::For {
            init: Box::new(init),
            cond: Box::new(cond),
            inc: Box::new(inc),
            body: Box::new(body),
            iterator: Box::new(iterator),
        })
    }

    pub fn if_then(condition: Expr, true_block: Expr) -> Expr {
        Expr::stmt(ExprKind::IfThenElse {
            condition: Box::new(condition),
            true_block: Box::new(true_block),
            false_block: None,
        })
    }

    pub fn if_then_else(condition: Expr, true_block: Expr, false_block: Expr) -> Expr {
        Expr::stmt(ExprKind::IfThenElse {
            condition: Box::new(condition),
            true_block: Box::new(true_block),
            false_block: Some(Box::new(false_block)),
        })
    }

    pub fn block(exprs: Vec<Expr>) -> Expr {
        Expr::stmt(ExprKind::Block(exprs))
    }

    pub fn call(caller: impl Into<String>, arguments: Vec<Expr>) -> Expr {
        Expr::stmt(ExprKind::Call {
            caller: caller.into(),
            arguments,
        })
    }

    pub fn function(name: impl Into<String>, inputs: Vec<Expr>, outputs: Vec<Expr>, body: Expr) -> Expr {
        Expr::stmt(ExprKind::Function(IrFunction {
            name: name.into(),
            inputs,
            outputs,
            body: Box::new(body),
        }))
    }

    pub fn call_once(cond_var_name: impl Into<String>, block: Expr) -> Expr {
        Expr::stmt(ExprKind::CallOnce {
            cond_var_name: cond_var_name.into(),
            block: Box::new(block),
        })
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Checked mutation construction (`=`, `+=`, `-=`, `*=`, `/=`).
    pub fn assign(op: AssignOpr, a: Expr, b: Expr) -> Result<Expr, CompileError> {
        if !matches!(a.kind, ExprKind::Reference { .. } | ExprKind::Var(_)) {
            return Err(CompileError::type_error(
                "left-hand side of an assignment must be a reference or a variable",
            ));
        }
        if a.ptype() != b.ptype() {
            return Err(CompileError::type_error(format!(
                "assignment joins mismatched primitive types {} vs {}",
                a.ptype(),
                b.ptype()
            )));
        }
        Ok(Expr::stmt(ExprKind::Assign {
            op,
            a: Box::new(a),
            b: Box::new(b),
        }))
    }

    /// A scoped binding `type a = b;`; `a` must be a variable.
    pub fn let_bind(a: Expr, b: Expr) -> Result<Expr, CompileError> {
        if !matches!(a.kind, ExprKind::Var(_)) {
            return Err(CompileError::type_error(
                "left-hand side of a let binding must be a variable",
            ));
        }
        Ok(Expr::stmt(ExprKind::Let {
            a: Box::new(a),
            b: Box::new(b),
        }))
    }

    // -------------------------------------------------------------------------
    // Vector
    // -------------------------------------------------------------------------

    /// A binary SIMD arithmetic operation over two SIMD-typed operands.
    pub fn simd_binary(
        vector_width: usize,
        op: SimdOpr,
        a: Expr,
        b: Expr,
    ) -> Result<Expr, CompileError> {
        debug_assert!(!matches!(op, SimdOpr::Load | SimdOpr::Store));
        let ctype = simd_type_for_width(vector_width, a.ptype())?;
        for side in [&a, &b] {
            if side.ctype() != ctype {
                return Err(CompileError::type_error(format!(
                    "SIMD operand has composite {} but the operation needs {ctype}",
                    side.ctype()
                )));
            }
        }
        if a.ptype() != b.ptype() {
            return Err(CompileError::type_error(
                "SIMD operands have mismatched primitive types",
            ));
        }
        let ptype = a.ptype();
        Ok(Expr::new(
            ExprKind::SimdOp {
                vector_width,
                op,
                a: Box::new(a),
                b: Some(Box::new(b)),
            },
            ptype,
            ctype,
        ))
    }

    /// An SIMD load from an address-tagged operand.
    pub fn simd_load(vector_width: usize, a: Expr) -> Result<Expr, CompileError> {
        if !a.is_address() {
            return Err(CompileError::type_error(
                "SIMD load operand must be tagged as a reference address",
            ));
        }
        let ptype = a.ptype();
        let ctype = simd_type_for_width(vector_width, ptype)?;
        Ok(Expr::new(
            ExprKind::SimdOp {
                vector_width,
                op: SimdOpr::Load,
                a: Box::new(a),
                b: None,
            },
            ptype,
            ctype,
        ))
    }

    /// An SIMD store of `value` to an address-tagged operand.
    pub fn simd_store(vector_width: usize, a: Expr, value: Expr) -> Result<Expr, CompileError> {
        if !a.is_address() {
            return Err(CompileError::type_error(
                "SIMD store destination must be tagged as a reference address",
            ));
        }
        let ctype = simd_type_for_width(vector_width, a.ptype())?;
        if value.ctype() != ctype {
            return Err(CompileError::type_error(format!(
                "SIMD store value has composite {} but the destination needs {ctype}",
                value.ctype()
            )));
        }
        Ok(Expr::stmt(ExprKind::SimdOp {
            vector_width,
            op: SimdOpr::Store,
            a: Box::new(a),
            b: Some(Box::new(value)),
        }))
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    pub fn mark(content: impl Into<String>) -> Expr {
        Expr::stmt(ExprKind::Mark(content.into()))
    }

    /// Wrap `expr` with an identity tag; the type passes through.
    pub fn identity(expr: Expr, id: impl Into<String>) -> Expr {
        let ptype = expr.ptype();
        let ctype = expr.ctype();
        Expr::new(
            ExprKind::Identity {
                expr: Box::new(expr),
                id: id.into(),
            },
            ptype,
            ctype,
        )
    }

    /// An explicit conversion of `expr` to `(ptype, ctype)`.
    pub fn cast(expr: Expr, ptype: Primitive, ctype: Composite) -> Result<Expr, CompileError> {
        if matches!(ptype, Primitive::Unk | Primitive::Void) {
            return Err(CompileError::type_error(format!(
                "cannot cast to {ptype}"
            )));
        }
        if ctype.is_simd() && !ptype.is_numeric() {
            return Err(CompileError::type_error(format!(
                "SIMD composite over non-numeric primitive {ptype}"
            )));
        }
        Ok(Expr::new(ExprKind::Cast(Box::new(expr)), ptype, ctype))
    }

    pub fn allocate(buffer_name: impl Into<String>, size: Expr, dtype: Primitive) -> Expr {
        Expr::stmt(ExprKind::Allocate {
            buffer_name: buffer_name.into(),
            size: Box::new(size),
            dtype,
        })
    }

    /// A buffer operation; `size` is the element count.
    pub fn buffer_opr(
        name: impl Into<String>,
        op: BufferOprKind,
        size: Option<Expr>,
        dtype: Primitive,
        data: Option<Vec<f32>>,
    ) -> Expr {
        let (ptype, ctype) = (dtype, Composite::Primitive);
        Expr::new(
            ExprKind::BufferOpr {
                name: name.into(),
                op,
                size: size.map(Box::new),
                dtype,
                data,
            },
            ptype,
            ctype,
        )
    }

    pub fn module(global_data: Expr, functions: Expr) -> Expr {
        Expr::stmt(ExprKind::Module {
            global_data: Box::new(global_data),
            functions: Box::new(functions),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn ptype(&self) -> Primitive {
        self.ptype
    }

    pub fn ctype(&self) -> Composite {
        self.ctype
    }

    pub fn set_ptype(&mut self, ptype: Primitive) {
        self.ptype = ptype;
    }

    pub fn is_simd(&self) -> bool {
        self.ctype.is_simd()
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, ExprKind::Block(_))
    }

    pub fn is_for(&self) -> bool {
        matches!(self.kind, ExprKind::For { .. })
    }

    pub fn is_mark(&self) -> bool {
        matches!(self.kind, ExprKind::Mark(_))
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, ExprKind::Module { .. })
    }

    pub fn is_assign_kind(&self) -> bool {
        matches!(self.kind, ExprKind::Assign { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, ExprKind::Reference { .. })
    }

    /// Whether this node is an [`ExprKind::Identity`] tagged as an address.
    pub fn is_address(&self) -> bool {
        matches!(&self.kind, ExprKind::Identity { id, .. } if id == REFERENCE_ADDRESS)
    }

    pub fn as_var(&self) -> Option<&Var> {
        match &self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match &self.kind {
            ExprKind::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// The immediate integer value converted to `T`, for `IntImm` and bound
    /// integer constants.
    pub fn int_value<T: NumCast>(&self) -> Option<T> {
        match &self.kind {
            ExprKind::IntImm(v) => NumCast::from(*v),
            ExprKind::Constant(c) => c.int_value(),
            _ => None,
        }
    }

    /// Structure-preserving deep copy (an alias of `clone` that documents
    /// intent at call sites doing substitution).
    pub fn deep_copy(&self) -> Expr {
        self.clone()
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Self {
        let ptype = v.ptype();
        Expr::new(ExprKind::Var(v), ptype, Composite::Primitive)
    }
}

impl From<Tensor> for Expr {
    fn from(t: Tensor) -> Self {
        let ptype = t.ptype();
        Expr::new(ExprKind::Tensor(t), ptype, Composite::Primitive)
    }
}

impl From<Constant> for Expr {
    fn from(c: Constant) -> Self {
        let ptype = c.ptype();
        Expr::new(ExprKind::Constant(c), ptype, Composite::Primitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvar(name: &str) -> Expr {
        Var::new(name, Primitive::Float32).into()
    }

    #[test]
    fn arithmetic_requires_identical_primitives() {
        let a = fvar("a");
        let b: Expr = Var::new("b", Primitive::Int32).into();
        assert!(Expr::binary(BinOpr::Add, a.clone(), b).is_err());
        let ok = Expr::binary(BinOpr::Add, a.clone(), fvar("c")).unwrap();
        assert_eq!(ok.ptype(), Primitive::Float32);
    }

    #[test]
    fn comparison_yields_boolean() {
        let e = Expr::binary(BinOpr::LT, Expr::int(1), Expr::int(2)).unwrap();
        assert_eq!(e.ptype(), Primitive::Boolean);
    }

    #[test]
    fn reference_rank_checked() {
        let t = Tensor::new("A", vec![Constant::int(10), Constant::int(20)], Primitive::Float32);
        let i: Expr = Var::with_interval("i", 0, 10).into();
        let bad = Expr::reference(t.clone().into(), vec![i.clone()]);
        assert!(bad.is_err());
        let j: Expr = Var::with_interval("j", 0, 20).into();
        let ok = Expr::reference(t.into(), vec![i, j]).unwrap();
        assert_eq!(ok.ptype(), Primitive::Float32);
    }

    #[test]
    fn simd_store_requires_address() {
        let t = Tensor::new("A", vec![Constant::int(8)], Primitive::Float32);
        let i: Expr = Var::with_interval("i", 0, 8).into();
        let reference = Expr::reference(t.into(), vec![i]).unwrap();
        let value = Expr::cast(Expr::float32(1.0), Primitive::Float32, Composite::Simd256).unwrap();
        assert!(Expr::simd_store(8, reference.clone(), value.clone()).is_err());
        let addr = Expr::identity(reference, REFERENCE_ADDRESS);
        assert!(Expr::simd_store(8, addr, value).is_ok());
    }

    #[test]
    fn tensor_equality_is_by_name() {
        let a = Tensor::new("A", vec![Constant::int(4)], Primitive::Float32);
        let a2 = Tensor::new("A", vec![Constant::int(9)], Primitive::Float64);
        let b = Tensor::new("B", vec![Constant::int(4)], Primitive::Float32);
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn copy_preserves_structure() {
        let i: Expr = Var::with_interval("i", 0, 4).into();
        let e = Expr::binary(BinOpr::Mul, i.clone(), Expr::int(3)).unwrap();
        let copied = e.deep_copy();
        assert_eq!(e, copied);
    }
}
