//! Graph-level tensors.

use crate::context::Context;
use crate::core::Stage;
use crate::error::CompileError;
use crate::ir::{Constant, Expr, Tensor as IrTensor, Var};
use crate::types::Primitive;

/// A variable of the program: a named array with a shape, an element type,
/// per-dimension iterator variables, and the stages that write it.
#[derive(Debug, Default)]
pub struct Tensor {
    name: String,
    shape: Vec<i64>,
    ptype: Primitive,
    iterators: Vec<Expr>,
    stages: Vec<Stage>,
    /// For reshaped views: the name of the tensor owning the storage.
    storage_name: Option<String>,
}

impl Tensor {
    pub fn new(name: impl Into<String>) -> Tensor {
        Tensor {
            name: name.into(),
            ..Tensor::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_shape(&mut self, shape: Vec<i64>) {
        self.shape = shape;
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn set_ptype(&mut self, ptype: Primitive) {
        self.ptype = ptype;
    }

    pub fn ptype(&self) -> Primitive {
        self.ptype
    }

    /// Make this tensor a view over `base`'s storage (reshape).
    pub fn set_storage_of(&mut self, base: impl Into<String>) {
        self.storage_name = Some(base.into());
    }

    /// The name of the buffer this tensor reads and writes.
    pub fn storage_name(&self) -> &str {
        self.storage_name.as_deref().unwrap_or(&self.name)
    }

    /// Total element count.
    pub fn num_elements(&self) -> Result<i64, CompileError> {
        if self.shape.is_empty() {
            return Err(CompileError::shape(format!(
                "shape of tensor '{}' used before it was set",
                self.name
            )));
        }
        Ok(self.shape.iter().product())
    }

    /// The IR tensor expression; the target name is the storage owner so
    /// reshaped views index the right buffer.
    pub fn expr(&self) -> Result<Expr, CompileError> {
        if self.shape.is_empty() {
            return Err(CompileError::shape(format!(
                "shape of tensor '{}' used before it was set",
                self.name
            )));
        }
        let dims = self.shape.iter().map(|&d| Constant::int(d)).collect();
        Ok(IrTensor::new(self.storage_name(), dims, self.ptype).into())
    }

    /// Per-dimension iterator variables, allocated on first use with
    /// intervals derived from the shape.
    pub fn iterators(&mut self, ctx: &Context) -> Result<&[Expr], CompileError> {
        if self.shape.is_empty() {
            return Err(CompileError::shape(format!(
                "iterators of tensor '{}' requested before its shape was set",
                self.name
            )));
        }
        if self.iterators.is_empty() {
            self.iterators = self
                .shape
                .iter()
                .map(|&d| Var::with_interval(ctx.new_iterator_name(), 0, d).into())
                .collect();
        }
        Ok(&self.iterators)
    }

    /// Overwrite the iterators (operators share iterators across their
    /// operands to align loop nests).
    pub fn set_iterators(&mut self, iterators: Vec<Expr>) {
        self.iterators = iterators;
    }

    /// The element reference `T[i0, …, ik]` over the tensor's iterators.
    pub fn elem(&mut self, ctx: &Context) -> Result<Expr, CompileError> {
        let expr = self.expr()?;
        let iterators = self.iterators(ctx)?.to_vec();
        expr.at(iterators)
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn last_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }
}
