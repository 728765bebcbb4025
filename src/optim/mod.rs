//! The IR optimization pipeline.
//!
//! Passes run in a fixed sequence over the lowered expression; each pass
//! sees the output of the previous one:
//!
//! 1. `nested_block_clean` — splice nested blocks to fixpoint
//! 2. `indices_to_absolute_offset` — multi-index references fold to
//!    row-major linear offsets
//! 3. `fold_reference_indices` — hoist hot index sub-expressions into
//!    scoped `let` bindings
//! 4. `vectorize` — rewrite marked point loops into SIMD operations
//! 5. `nested_block_clean` again
//! 6. `unroll` — expand small constant loops
//! 7. `call_once_process` — lower call-once sections into guarded
//!    branches with module-level flags
//! 8. `display_program` — debug dump

mod call_once;
mod display;
mod fold_indices;
mod indices_to_offset;
mod nested_block_clean;
mod unroll;
mod vectorize;

pub use call_once::CallOnceProcess;
pub use display::DisplayProgram;
pub use fold_indices::FoldReferenceIndices;
pub use indices_to_offset::IndicesToAbsoluteOffset;
pub use nested_block_clean::NestedBlockClean;
pub use unroll::Unroll;
pub use vectorize::Vectorize;

use log::debug;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::Expr;

/// One rewrite over the IR.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&mut self, expr: &mut Expr, ctx: &Context) -> Result<(), CompileError>;
}

/// An ordered pass pipeline.
pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
}

impl Optimizer {
    /// The default IR pipeline in its fixed order.
    pub fn ir_default() -> Optimizer {
        Optimizer {
            passes: vec![
                Box::new(NestedBlockClean),
                Box::new(IndicesToAbsoluteOffset),
                Box::new(FoldReferenceIndices::default()),
                Box::new(Vectorize),
                Box::new(NestedBlockClean),
                Box::new(Unroll),
                Box::new(CallOnceProcess),
                Box::new(DisplayProgram),
            ],
        }
    }

    /// A pipeline with an explicit pass list.
    pub fn with_passes(passes: Vec<Box<dyn Pass>>) -> Optimizer {
        Optimizer { passes }
    }

    /// Run every pass in order.
    pub fn run(&mut self, expr: &mut Expr, ctx: &Context) -> Result<(), CompileError> {
        for pass in &mut self.passes {
            debug!("running pass {}", pass.name());
            pass.run(expr, ctx)?;
        }
        Ok(())
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::ir_default()
    }
}
