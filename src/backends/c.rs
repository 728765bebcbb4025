//! C code generation.
//!
//! The emitted translation unit is wrapped in an include guard and
//! contains, in order: the standard includes, the fixed type aliases, the
//! `cinn_min`/`cinn_max`/`cinn_copy` macros, the module's global data
//! section, and every function. The header variant emits prototypes only.

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{AssignOpr, BinOpr, BufferOprKind, Expr, ExprKind, IrFunction, UnOpr, Var};
use crate::optim::Optimizer;
use crate::types::Primitive;

use super::x86_simd::X86Simd;

/// Run the optimization pipeline on `expr` (wrapped into a module when it
/// is not one) and emit `(header, source)` text. `file_stem` seeds the
/// include guards.
pub fn generate_c(
    expr: &Expr,
    ctx: &Context,
    file_stem: &str,
) -> Result<(String, String), CompileError> {
    let mut module = if expr.is_module() {
        expr.clone()
    } else {
        Expr::module(Expr::block(Vec::new()), Expr::block(vec![expr.clone()]))
    };
    Optimizer::ir_default().run(&mut module, ctx)?;

    let header = emit(&module, &guard_name(file_stem, "H"), false)?;
    let source = emit(&module, &guard_name(file_stem, "CC"), true)?;
    Ok((header, source))
}

/// Compile `expr` and write the header and source files.
pub fn compile_as_c(
    expr: &Expr,
    ctx: &Context,
    header_path: &str,
    source_path: &str,
) -> Result<(), CompileError> {
    let stem = std::path::Path::new(header_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("generated");
    let (header, source) = generate_c(expr, ctx, stem)?;
    std::fs::write(header_path, header)
        .map_err(|e| CompileError::config(format!("cannot write '{header_path}': {e}")))?;
    std::fs::write(source_path, source)
        .map_err(|e| CompileError::config(format!("cannot write '{source_path}': {e}")))?;
    Ok(())
}

fn guard_name(stem: &str, kind: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CINN_{cleaned}_{kind}_")
}

fn emit(module: &Expr, guard: &str, emit_body: bool) -> Result<String, CompileError> {
    let mut r#gen = CodeGenC {
        out: String::new(),
        indent: 0,
        emit_body,
    };
    r#gen.out.push_str(&format!("#ifndef {guard}\n#define {guard}\n"));
    r#gen.prelude();
    r#gen.print(module)?;
    r#gen.out.push_str(&format!("\n\n#endif  // {guard}\n"));
    Ok(r#gen.out)
}

struct CodeGenC {
    out: String,
    indent: usize,
    emit_body: bool,
}

fn c_type_name(ptype: Primitive) -> &'static str {
    match ptype {
        Primitive::Int8 => "cinn_int8_t",
        Primitive::Int16 => "short",
        Primitive::Int32 => "cinn_int32_t",
        Primitive::Int64 => "cinn_int64_t",
        Primitive::UInt8 => "cinn_uint8_t",
        Primitive::UInt16 => "unsigned short",
        Primitive::UInt32 => "cinn_uint32_t",
        Primitive::UInt64 => "cinn_uint64_t",
        Primitive::Float32 => "cinn_float32_t",
        Primitive::Float64 => "double",
        Primitive::Boolean => "cinn_boolean_t",
        Primitive::Unk | Primitive::Void => "void",
    }
}

impl CodeGenC {
    fn prelude(&mut self) {
        self.out.push_str(
            "#include <stdio.h>\n\
             #include <math.h>\n\
             #include <simd.h>\n\
             #include <immintrin.h>\n\
             \n\
             typedef char cinn_int8_t;\n\
             typedef int cinn_int32_t;\n\
             typedef long long cinn_int64_t;\n\
             typedef unsigned char cinn_uint8_t;\n\
             typedef unsigned int cinn_uint32_t;\n\
             typedef unsigned long long cinn_uint64_t;\n\
             typedef float cinn_float32_t;\n\
             typedef bool cinn_boolean_t;\n\
             \n\
             #define cinn_min(a,b) ((a) < (b) ? (a) : (b))\n\
             #define cinn_max(a,b) ((a) > (b) ? (a) : (b))\n\
             #define cinn_copy(a,b,size) memcpy((b), (a), (size))\n\
             \n",
        );
    }

    fn push_indent(&mut self) {
        self.out.push_str(&"  ".repeat(self.indent));
    }

    /// Whether a statement of this kind terminates with a semicolon when
    /// printed inside a block.
    fn needs_semicolon(expr: &Expr) -> bool {
        !matches!(
            expr.kind,
            ExprKind::For { .. }
                | ExprKind::IfThenElse { .. }
                | ExprKind::Block(_)
                | ExprKind::Mark(_)
                | ExprKind::Function(_)
                | ExprKind::Module { .. }
                | ExprKind::CallOnce { .. }
        )
    }

    fn print_block_stmts(&mut self, exprs: &[Expr]) -> Result<(), CompileError> {
        for e in exprs {
            self.push_indent();
            self.print(e)?;
            if Self::needs_semicolon(e) {
                self.out.push(';');
            }
            self.out.push('\n');
        }
        Ok(())
    }

    fn print(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::IntImm(v) => self.out.push_str(&v.to_string()),
            ExprKind::FloatImm(v) => self.out.push_str(&v.to_string()),
            ExprKind::BoolImm(v) => self.out.push_str(if *v { "true" } else { "false" }),
            ExprKind::Constant(c) => {
                let Some(v) = c.int_value::<i64>() else {
                    return Err(CompileError::shape(format!(
                        "constant '{}' has no value bound at code generation",
                        c.name().unwrap_or("<anonymous>")
                    )));
                };
                self.out.push_str(&v.to_string());
            }
            ExprKind::Var(v) => self.out.push_str(v.name()),
            ExprKind::Tensor(t) => self.out.push_str(t.name()),
            ExprKind::Array { name, .. } => self.out.push_str(name),
            ExprKind::Binary { op, a, b } => self.print_binary(*op, a, b)?,
            ExprKind::Unary { op, a } => {
                match op {
                    UnOpr::Minus => {
                        self.out.push_str("(-");
                        self.print(a)?;
                        self.out.push(')');
                    }
                    UnOpr::Not => {
                        self.out.push_str("(!");
                        self.print(a)?;
                        self.out.push(')');
                    }
                    UnOpr::Exp => {
                        self.out.push_str("exp(");
                        self.print(a)?;
                        self.out.push(')');
                    }
                }
            }
            ExprKind::Reference { target, iterators } => {
                self.print(target)?;
                for iter in iterators {
                    self.out.push('[');
                    self.print(iter)?;
                    self.out.push(']');
                }
            }
            ExprKind::For {
                init,
                cond,
                inc,
                body,
                iterator,
            } => {
                self.out.push_str("for (int ");
                self.print(iterator)?;
                self.out.push_str(" = ");
                self.print(init)?;
                self.out.push_str("; ");
                self.print(cond)?;
                self.out.push_str("; ");
                self.print(iterator)?;
                self.out.push_str(" += ");
                self.print(inc)?;
                self.out.push_str(") {\n");
                self.indent += 1;
                self.print(body)?;
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
            }
            ExprKind::IfThenElse {
                condition,
                true_block,
                false_block,
            } => {
                self.out.push_str("if (");
                self.print(condition)?;
                self.out.push_str(") {\n");
                self.indent += 1;
                self.print(true_block)?;
                self.indent -= 1;
                self.push_indent();
                self.out.push('}');
                if let Some(else_block) = false_block {
                    self.out.push_str(" else {\n");
                    self.indent += 1;
                    self.print(else_block)?;
                    self.indent -= 1;
                    self.push_indent();
                    self.out.push('}');
                }
            }
            ExprKind::Block(exprs) => self.print_block_stmts(exprs)?,
            ExprKind::Call { caller, arguments } => {
                self.out.push_str(caller);
                self.out.push('(');
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.print(arg)?;
                }
                self.out.push(')');
            }
            ExprKind::Function(func) => self.print_function(func)?,
            ExprKind::CallOnce { block, .. } => {
                // lowered by call_once_process; print the raw block if one
                // survives a custom pipeline
                self.print(block)?;
            }
            ExprKind::Assign { op, a, b } => {
                self.print(a)?;
                let sym = match op {
                    AssignOpr::Assign => " = ",
                    AssignOpr::SumAssign => " += ",
                    AssignOpr::SubAssign => " -= ",
                    AssignOpr::MulAssign => " *= ",
                    AssignOpr::DivAssign => " /= ",
                };
                self.out.push_str(sym);
                self.print(b)?;
            }
            ExprKind::Let { a, b } => {
                let ty = if a.ctype().is_simd() {
                    X86Simd::for_width(a.ctype().lanes(a.ptype()).unwrap_or(8))
                        .packed_float_type()
                } else {
                    c_type_name(a.ptype())
                };
                self.out.push_str(ty);
                self.out.push(' ');
                self.print(a)?;
                self.out.push_str(" = ");
                self.print(b)?;
            }
            ExprKind::SimdOp {
                vector_width,
                op,
                a,
                b,
            } => {
                let table = X86Simd::for_width(*vector_width);
                self.out.push_str(&table.op_ps(*op));
                self.out.push('(');
                self.print(a)?;
                if let Some(b) = b {
                    self.out.push_str(", ");
                    self.print(b)?;
                }
                self.out.push(')');
            }
            ExprKind::Mark(content) => {
                self.out.push_str("// ");
                self.out.push_str(content);
            }
            ExprKind::Identity { expr: inner, id } => {
                if id == crate::ir::REFERENCE_ADDRESS {
                    self.out.push('&');
                }
                self.print(inner)?;
            }
            ExprKind::Cast(inner) => {
                if expr.ctype().is_simd() {
                    // lane broadcast of a scalar
                    let lanes = expr.ctype().lanes(expr.ptype()).unwrap_or(8);
                    self.out.push_str(&X86Simd::for_width(lanes).set1_ps());
                    self.out.push('(');
                    self.print(inner)?;
                    self.out.push(')');
                } else {
                    self.out.push('(');
                    self.out.push_str(c_type_name(expr.ptype()));
                    self.out.push_str(")(");
                    self.print(inner)?;
                    self.out.push(')');
                }
            }
            ExprKind::Allocate {
                buffer_name,
                size,
                dtype,
            } => {
                self.out.push_str(c_type_name(*dtype));
                self.out.push(' ');
                self.out.push_str(buffer_name);
                self.out.push('[');
                self.print(size)?;
                self.out.push(']');
            }
            ExprKind::BufferOpr {
                name,
                op,
                size,
                dtype,
                data,
            } => match op {
                BufferOprKind::Create => {
                    self.out.push_str(c_type_name(*dtype));
                    self.out.push(' ');
                    self.out.push_str(name);
                    self.out.push('[');
                    if let Some(size) = size {
                        self.print(size)?;
                    }
                    self.out.push(']');
                }
                BufferOprKind::CreateAssign => {
                    self.out.push_str(c_type_name(*dtype));
                    self.out.push(' ');
                    self.out.push_str(name);
                    self.out.push('[');
                    if let Some(size) = size {
                        self.print(size)?;
                    }
                    self.out.push_str("] = { ");
                    if let Some(data) = data {
                        let values: Vec<String> = data.iter().map(|v| v.to_string()).collect();
                        self.out.push_str(&values.join(", "));
                    }
                    self.out.push_str(" }");
                }
                BufferOprKind::Reference => self.out.push_str(name),
                BufferOprKind::Destroy => {
                    self.out.push_str("// destroy ");
                    self.out.push_str(name);
                }
            },
            ExprKind::Module {
                global_data,
                functions,
            } => {
                if self.emit_body {
                    self.print(global_data)?;
                    self.out.push('\n');
                }
                self.print(functions)?;
            }
        }
        Ok(())
    }

    fn print_binary(&mut self, op: BinOpr, a: &Expr, b: &Expr) -> Result<(), CompileError> {
        if op.is_saturating() {
            self.out.push_str(if op == BinOpr::Min {
                "cinn_min("
            } else {
                "cinn_max("
            });
            self.print(a)?;
            self.out.push_str(", ");
            self.print(b)?;
            self.out.push(')');
            return Ok(());
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
        self.print(a)?;
        self.out.push(' ');
        self.out.push_str(sym);
        self.out.push(' ');
        self.print(b)?;
        self.out.push(')');
        Ok(())
    }

    fn print_function(&mut self, func: &IrFunction) -> Result<(), CompileError> {
        let mut args = Vec::new();
        for x in func.inputs.iter().chain(func.outputs.iter()) {
            args.push(Self::format_param(x)?);
        }
        self.out
            .push_str(&format!("void {}({})", func.name, args.join(", ")));
        if !self.emit_body {
            self.out.push(';');
            self.out.push('\n');
            return Ok(());
        }
        self.out.push_str(" {\n");
        self.indent += 1;
        self.print(&func.body)?;
        self.indent -= 1;
        self.push_indent();
        self.out.push_str("}\n");
        Ok(())
    }

    /// A parameter is a flat pointer to the element type. Read-only
    /// variable parameters are `const`.
    fn format_param(x: &Expr) -> Result<String, CompileError> {
        if let Some(t) = x.as_tensor() {
            return Ok(format!("{}* {}", c_type_name(t.ptype()), t.name()));
        }
        if let Some(v) = x.as_var() {
            return Ok(Self::format_var_param(v));
        }
        Err(CompileError::type_error(
            "function parameters must be tensors or variables",
        ))
    }

    fn format_var_param(v: &Var) -> String {
        let qualifier = if v.is_readonly() { "const " } else { "" };
        format!("{qualifier}{}* {}", c_type_name(v.ptype()), v.name())
    }
}
