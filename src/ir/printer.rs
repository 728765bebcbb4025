//! Textual form of the IR.
//!
//! The printed form is stable: it is both the debugging dump and the cache
//! key used by the sub-expression folding pass. Children print left to
//! right in source order, blocks indent 2 spaces per nesting level.

use std::fmt;

use super::{AssignOpr, BinOpr, BufferOprKind, Expr, ExprKind, SimdOpr, UnOpr};

/// Render an expression to its canonical textual form.
pub fn dump(expr: &Expr) -> String {
    let mut printer = Printer::default();
    printer.print(expr);
    printer.out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump(self))
    }
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn push_indent(&mut self) {
        self.out.push_str(&"  ".repeat(self.indent));
    }

    fn print(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntImm(v) => self.out.push_str(&v.to_string()),
            ExprKind::FloatImm(v) => self.out.push_str(&v.to_string()),
            ExprKind::BoolImm(v) => self.out.push_str(if *v { "true" } else { "false" }),
            ExprKind::Constant(c) => {
                if let Some(v) = c.int_value::<i64>() {
                    self.out.push_str(&v.to_string());
                } else if let Some(name) = c.name() {
                    self.out.push_str(name);
                } else {
                    self.out.push_str("<unbound>");
                }
            }
            ExprKind::Var(v) => self.out.push_str(v.name()),
            ExprKind::Tensor(t) => {
                let dims: Vec<String> = t
                    .dims()
                    .iter()
                    .map(|d| {
                        d.int_value::<i64>()
                            .map(|v| v.to_string())
                            .or_else(|| d.name().map(str::to_owned))
                            .unwrap_or_else(|| "?".to_owned())
                    })
                    .collect();
                self.out.push_str(t.name());
                self.out.push('<');
                self.out.push_str(&dims.join(","));
                self.out.push('>');
            }
            ExprKind::Array { name, size } => {
                self.out.push_str(name);
                self.out.push('<');
                self.print(size);
                self.out.push('>');
            }
            ExprKind::Binary { op, a, b } => self.print_binary(*op, a, b),
            ExprKind::Unary { op, a } => match op {
                UnOpr::Minus => {
                    self.out.push_str("(-");
                    self.print(a);
                    self.out.push(')');
                }
                UnOpr::Not => {
                    self.out.push_str("(!");
                    self.print(a);
                    self.out.push(')');
                }
                UnOpr::Exp => {
                    self.out.push_str("exp(");
                    self.print(a);
                    self.out.push(')');
                }
            },
            ExprKind::Reference { target, iterators } => {
                self.print(target);
                self.out.push('[');
                for (i, iter) in iterators.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.print(iter);
                }
                self.out.push(']');
            }
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                iterator,
            } => {
                self.out.push_str("for(");
                self.print(iterator);
                self.out.push_str(", ");
                self.print(init);
                self.out.push_str(", ");
                self.print(cond);
                self.out.push_str(", ");
                self.print(inc);
                self.out.push_str(") {\n");
                self.indent += 1;
                self.print(body);
                self.out.push('\n');
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
            }
            ExprKind::IfThenElse {
                condition,
                true_block,
                false_block,
            } => {
                self.out.push_str("if(");
                self.print(condition);
                self.out.push_str(") {\n");
                self.indent += 1;
                self.print(true_block);
                self.out.push('\n');
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
                if let Some(else_block) = false_block {
                    self.out.push_str(" else {\n");
                    self.indent += 1;
                    self.print(else_block);
                    self.out.push('\n');
                    self.indent -= 1;
                    self.push_indent();
                    self.out.push('}');
                }
            }
            ExprKind::Block(exprs) => {
                for (i, e) in exprs.iter().enumerate() {
                    self.push_indent();
                    self.print(e);
                    if i + 1 != exprs.len() {
                        self.out.push('\n');
                    }
                }
            }
            ExprKind::Call { caller, arguments } => {
                self.out.push_str(caller);
                self.out.push('(');
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.print(arg);
                }
                self.out.push(')');
            }
            ExprKind::Function(func) => {
                let mut args = Vec::new();
                for x in func.inputs.iter().chain(func.outputs.iter()) {
                    if let Some(t) = x.as_tensor() {
                        args.push(format!("Tensor& {}", t.name()));
                    } else if let Some(v) = x.as_var() {
                        args.push(format!("Buffer& {}", v.name()));
                    }
                }
                self.out
                    .push_str(&format!("def {} ({}) {{\n", func.name, args.join(", ")));
                self.indent += 1;
                self.print(&func.body);
                self.out.push('\n');
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
            }
            ExprKind::CallOnce {
                cond_var_name,
                block,
            } => {
                self.out.push_str("call_once { // ");
                self.out.push_str(cond_var_name);
                self.out.push('\n');
                self.indent += 1;
                self.print(block);
                self.out.push('\n');
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
            }
            ExprKind::Assign { op, a, b } => {
                self.print(a);
                let sym = match op {
                    AssignOpr::Assign => " = ",
                    AssignOpr::SumAssign => " += ",
                    AssignOpr::SubAssign => " -= ",
                    AssignOpr::MulAssign => " *= ",
                    AssignOpr::DivAssign => " /= ",
                };
                self.out.push_str(sym);
                self.print(b);
                self.out.push(';');
            }
            ExprKind::Let { a, b } => {
                self.out.push_str(&format!("{} {} ", a.ctype(), a.ptype()));
                self.print(a);
                self.out.push_str(" = ");
                self.print(b);
                self.out.push(';');
            }
            ExprKind::SimdOp {
                vector_width,
                op,
                a,
                b,
            } => {
                let head = match op {
                    SimdOpr::Add => format!("simd_add_{vector_width}("),
                    SimdOpr::Sub => format!("simd_sub_{vector_width}("),
                    SimdOpr::Mul => format!("simd_mul_{vector_width}("),
                    SimdOpr::Div => format!("simd_div_{vector_width}("),
                    SimdOpr::Load => format!("simd_load{vector_width}("),
                    SimdOpr::Store => format!("simd_store{vector_width}("),
                };
                self.out.push_str(&head);
                self.print(a);
                if let Some(b) = b {
                    self.out.push_str(", ");
                    self.print(b);
                }
                self.out.push(')');
            }
            ExprKind::Mark(content) => {
                self.out.push_str("// ");
                self.out.push_str(content);
            }
            ExprKind::Identity { expr: inner, id } => {
                self.out.push('#');
                self.out.push_str(id);
                self.out.push('(');
                self.print(inner);
                self.out.push(')');
            }
            ExprKind::Cast(inner) => {
                self.out
                    .push_str(&format!("cast<{}, {}>(", expr.ptype(), expr.ctype()));
                self.print(inner);
                self.out.push(')');
            }
            ExprKind::Allocate {
                buffer_name,
                size,
                dtype,
            } => {
                self.out.push_str("Buffer ");
                self.out.push_str(buffer_name);
                self.out.push('(');
                self.print(size);
                self.out.push_str(&format!(", {dtype});"));
            }
            ExprKind::BufferOpr { name, op, .. } => {
                let repr = match op {
                    BufferOprKind::Create => format!("{name} = create_buffer()"),
                    BufferOprKind::CreateAssign => format!("create_assign_buffer({name})"),
                    BufferOprKind::Reference => name.clone(),
                    BufferOprKind::Destroy => format!("destroy_buffer({name})"),
                };
                self.out.push_str(&repr);
            }
            ExprKind::Module {
                global_data,
                functions,
            } => {
                self.print(global_data);
                self.out.push_str("\n\n");
                self.print(functions);
            }
        }
    }

    fn print_binary(&mut self, op: BinOpr, a: &Expr, b: &Expr) {
        if op.is_saturating() {
            self.out
                .push_str(if op == BinOpr::Min { "min(" } else { "max(" });
            self.print(a);
            self.out.push(',');
            self.print(b);
            self.out.push(')');
            return;
        }
        let sym = match op {
            BinOpr::Add => "+",
            BinOpr::Sub => "-",
            BinOpr::Mul => "*",
            BinOpr::Div => "/",
            BinOpr::Mod => "%",
            BinOpr::EQ => "==",
            BinOpr::NE => "!=",
            BinOpr::LT => "<",
            BinOpr::LE => "<=",
            BinOpr::GT => ">",
            BinOpr::GE => ">=",
            BinOpr::And => "&&",
            BinOpr::Or => "||",
            BinOpr::Min | BinOpr::Max => unreachable!(),
        };
        self.out.push('(');
        self.print(a);
        self.out.push(' ');
        self.out.push_str(sym);
        self.out.push(' ');
        self.print(b);
        self.out.push(')');
    }
}
