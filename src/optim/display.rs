//! Debug dump of the program between passes.

use log::debug;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::Expr;

use super::Pass;

/// Log the whole program at debug level; no mutation.
pub struct DisplayProgram;

impl Pass for DisplayProgram {
    fn name(&self) -> &'static str {
        "display_program"
    }

    fn run(&mut self, expr: &mut Expr, _ctx: &Context) -> Result<(), CompileError> {
        debug!("program:\n{expr}");
        Ok(())
    }
}
