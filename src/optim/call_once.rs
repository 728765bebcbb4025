//! Lower call-once sections into guarded branches with module flags.

use log::debug;

use crate::context::Context;
use crate::core::transforms::CALL_ONCE_MARK;
use crate::error::CompileError;
use crate::ir::{AssignOpr, Expr, ExprKind, Mutate, Var, Visit, mutate_children, walk_children};
use crate::types::Primitive;

use super::Pass;

/// Convert `__call_once__` marks into `CallOnce` sections, then collapse
/// each into `if (cond) { …; cond = false; }` and declare every cond
/// variable in the module's global data section as a boolean initialized
/// to `true`.
pub struct CallOnceProcess;

impl Pass for CallOnceProcess {
    fn name(&self) -> &'static str {
        "call_once_process"
    }

    fn run(&mut self, expr: &mut Expr, ctx: &Context) -> Result<(), CompileError> {
        if !expr.is_module() {
            return Err(CompileError::lowering(
                "call_once_process runs on a module expression",
            ));
        }

        InsertCallOnce {
            pending: false,
            ctx: ctx.clone(),
        }
        .mutate(expr);

        let mut collector = CondVarCollector { vars: Vec::new() };
        collector.visit(expr);
        debug!("call_once_process: {} conditional variables", collector.vars.len());

        let mut lowerer = ToIfElse { error: None };
        lowerer.mutate(expr);
        if let Some(err) = lowerer.error {
            return Err(err);
        }

        let ExprKind::Module { global_data, .. } = &mut expr.kind else {
            return Err(CompileError::lowering("module expression expected"));
        };
        let ExprKind::Block(data) = &mut global_data.kind else {
            return Err(CompileError::lowering(
                "module global data section must be a block",
            ));
        };
        for name in collector.vars {
            let var: Expr = Var::new(name, Primitive::Boolean).into();
            data.push(Expr::let_bind(var, Expr::boolean(true))?);
        }
        Ok(())
    }
}

/// Wrap the loop following a `__call_once__` mark into a `CallOnce`.
struct InsertCallOnce {
    pending: bool,
    ctx: Context,
}

impl Mutate for InsertCallOnce {
    fn mutate(&mut self, expr: &mut Expr) {
        if let ExprKind::Mark(content) = &mut expr.kind {
            if content == CALL_ONCE_MARK {
                *content = "call once statement".to_owned();
                self.pending = true;
            }
            return;
        }
        if expr.is_for() && self.pending {
            self.pending = false;
            let cond_var = self.ctx.new_cond_name();
            let inner = std::mem::replace(expr, Expr::block(Vec::new()));
            *expr = Expr::call_once(cond_var, Expr::block(vec![inner]));
            mutate_children(self, expr);
            return;
        }
        mutate_children(self, expr);
    }
}

/// Collect the cond-var names of every `CallOnce`, in appearance order.
struct CondVarCollector {
    vars: Vec<String>,
}

impl Visit for CondVarCollector {
    fn visit(&mut self, expr: &Expr) {
        if let ExprKind::CallOnce { cond_var_name, .. } = &expr.kind {
            self.vars.push(cond_var_name.clone());
        }
        walk_children(self, expr);
    }
}

/// `CallOnce(block)` → `if (cond) { block…; cond = false; }`.
struct ToIfElse {
    error: Option<CompileError>,
}

impl Mutate for ToIfElse {
    fn mutate(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        if let ExprKind::CallOnce {
            cond_var_name,
            block,
        } = &mut expr.kind
        {
            let cond: Expr = Var::new(cond_var_name.clone(), Primitive::Boolean).into();
            let mut body = std::mem::replace(block, Box::new(Expr::block(Vec::new())));
            let reset = match Expr::assign(AssignOpr::Assign, cond.clone(), Expr::boolean(false)) {
                Ok(reset) => reset,
                Err(err) => {
                    self.error = Some(err);
                    return;
                }
            };
            if let ExprKind::Block(stmts) = &mut body.kind {
                stmts.push(reset);
            } else {
                let inner = std::mem::replace(&mut *body, Expr::block(Vec::new()));
                *body = Expr::block(vec![inner, reset]);
            }
            *expr = Expr::if_then(cond, *body);
        }
        mutate_children(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpr, Constant, Tensor, dump};

    fn module_with_marked_loop() -> Expr {
        let t = Tensor::new("W", vec![Constant::int(8)], Primitive::Float32);
        let i: Expr = Var::new("c0", Primitive::Int32).into();
        let stmt = Expr::assign(
            AssignOpr::Assign,
            Expr::from(t).at([i.clone()]).unwrap(),
            Expr::float32(0.0),
        )
        .unwrap();
        let cond = Expr::binary(BinOpr::LE, i.clone(), Expr::int(7)).unwrap();
        let for_ = Expr::for_loop(Expr::int(0), cond, Expr::int(1), Expr::block(vec![stmt]), i);
        let body = Expr::block(vec![Expr::mark(CALL_ONCE_MARK), for_]);
        let func = Expr::function("init_weights", vec![], vec![], body);
        Expr::module(Expr::block(vec![]), Expr::block(vec![func]))
    }

    #[test]
    fn call_once_lowers_to_guarded_section() {
        let mut module = module_with_marked_loop();
        let ctx = Context::new();
        CallOnceProcess.run(&mut module, &ctx).unwrap();
        let text = dump(&module);
        assert!(text.contains("if(cond0)"));
        assert!(text.contains("cond0 = false;"));
        assert!(text.contains("primitive boolean cond0 = true;"));
        assert!(!text.contains("call_once"));
    }

    #[test]
    fn requires_module_root() {
        let mut not_module = Expr::block(vec![]);
        assert!(CallOnceProcess.run(&mut not_module, &Context::new()).is_err());
    }
}
