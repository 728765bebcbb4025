//! Assembles a network into a module expression: global buffers, the io
//! glue, the partitioned functions, and `main_`.

use std::collections::BTreeSet;

use log::debug;

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::{BufferOprKind, Expr, Var};

use super::graph::Graph;
use super::network::{Network, Program};
use super::op::OpRegistry;
use super::session::Session;

const MAIN_FN_NAME: &str = "main_";

/// Builds the whole module for a network.
pub struct Builder;

impl Builder {
    /// Compile `network` against `session` into a module expression ready
    /// for code generation: weights become assigned global buffers, every
    /// other tensor a plain global buffer; `set_input_<name>`,
    /// `get_output_<name>` and `main_` form the entry points.
    pub fn build(
        session: &mut Session,
        network: Network,
        ctx: &Context,
    ) -> Result<Expr, CompileError> {
        let program = network.compile()?;
        for (name, data) in &program.weights {
            session.mark_weight(name, data.clone())?;
        }

        let registry = OpRegistry::with_instruction_ops();
        let mut graph = Graph::build(&program, session)?;
        graph.compile_ops(&registry, session, ctx)?;
        let mut functions = graph.partition_functions(session, ctx)?;

        let mut section = Vec::new();
        for name in &program.inputs {
            section.push(make_set_input(session, name)?);
        }

        let mut buffer_names: BTreeSet<String> = BTreeSet::new();
        let mut calls = Vec::new();
        for function in &mut functions {
            let mut args = Vec::new();
            for x in function.inputs().iter().chain(function.outputs()) {
                let tensor = x.as_tensor().ok_or_else(|| {
                    CompileError::type_error("partitioned function parameters must be tensors")
                })?;
                buffer_names.insert(tensor.name().to_owned());
                args.push(buffer_reference(session, tensor.name())?);
            }
            calls.push(Expr::call(function.name(), args));
            section.push(function.compile_to_expr()?);
        }

        for name in &program.outputs {
            section.push(make_get_output(session, name)?);
        }
        section.push(Expr::function(
            MAIN_FN_NAME,
            Vec::new(),
            Vec::new(),
            Expr::block(calls),
        ));

        let globals = global_data(session, &program, &buffer_names)?;
        debug!(
            "built module: {} buffers, {} functions",
            globals.len(),
            section.len()
        );
        Ok(Expr::module(Expr::block(globals), Expr::block(section)))
    }
}

/// The global buffer declarations: weights carry their payload, every
/// other buffer is a plain definition.
fn global_data(
    session: &Session,
    program: &Program,
    buffer_names: &BTreeSet<String>,
) -> Result<Vec<Expr>, CompileError> {
    let mut globals = Vec::new();
    let mut emitted: BTreeSet<String> = BTreeSet::new();

    let mut emit = |name: &str, globals: &mut Vec<Expr>| -> Result<(), CompileError> {
        if !emitted.insert(name.to_owned()) {
            return Ok(());
        }
        let id = session
            .get_tensor(name)
            .ok_or_else(|| CompileError::lookup("tensor", name))?;
        let tensor = session.tensor(id);
        let size = Expr::int(tensor.num_elements()?);
        let expr = match session.weight_data(name) {
            Some(data) => Expr::buffer_opr(
                name,
                BufferOprKind::CreateAssign,
                Some(size),
                tensor.ptype(),
                Some(data.to_vec()),
            ),
            None => Expr::buffer_opr(name, BufferOprKind::Create, Some(size), tensor.ptype(), None),
        };
        globals.push(expr);
        Ok(())
    };

    for name in &program.inputs {
        emit(name, &mut globals)?;
    }
    for (name, _) in &program.weights {
        emit(name, &mut globals)?;
    }
    for name in buffer_names {
        emit(name, &mut globals)?;
    }
    Ok(globals)
}

fn buffer_reference(session: &Session, name: &str) -> Result<Expr, CompileError> {
    let id = session
        .get_tensor(name)
        .ok_or_else(|| CompileError::lookup("tensor", name))?;
    Ok(Expr::buffer_opr(
        name,
        BufferOprKind::Reference,
        None,
        session.tensor(id).ptype(),
        None,
    ))
}

fn tensor_bytes(session: &Session, name: &str) -> Result<i64, CompileError> {
    let id = session
        .get_tensor(name)
        .ok_or_else(|| CompileError::lookup("tensor", name))?;
    let tensor = session.tensor(id);
    let elem = tensor.ptype().byte_size().ok_or_else(|| {
        CompileError::type_error(format!("tensor '{name}' has no element type"))
    })? as i64;
    Ok(tensor.num_elements()? * elem)
}

/// `void set_input_<name>(const <prim>_t* src) { cinn_copy(src, name, bytes); }`
fn make_set_input(session: &Session, name: &str) -> Result<Expr, CompileError> {
    let id = session
        .get_tensor(name)
        .ok_or_else(|| CompileError::lookup("tensor", name))?;
    let ptype = session.tensor(id).ptype();
    let src: Expr = Var::new("src", ptype).readonly().into();
    let body = Expr::block(vec![Expr::call(
        "cinn_copy",
        vec![
            src.clone(),
            buffer_reference(session, name)?,
            Expr::int(tensor_bytes(session, name)?),
        ],
    )]);
    Ok(Expr::function(
        format!("set_input_{name}"),
        vec![src],
        Vec::new(),
        body,
    ))
}

/// `void get_output_<name>(<prim>_t* dst) { cinn_copy(name, dst, bytes); }`
fn make_get_output(session: &Session, name: &str) -> Result<Expr, CompileError> {
    let id = session
        .get_tensor(name)
        .ok_or_else(|| CompileError::lookup("tensor", name))?;
    let ptype = session.tensor(id).ptype();
    let dst: Expr = Var::new("dst", ptype).into();
    let body = Expr::block(vec![Expr::call(
        "cinn_copy",
        vec![
            buffer_reference(session, name)?,
            dst.clone(),
            Expr::int(tensor_bytes(session, name)?),
        ],
    )]);
    Ok(Expr::function(
        format!("get_output_{name}"),
        Vec::new(),
        vec![dst],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dump;
    use crate::types::Primitive;

    fn float_tensor(session: &mut Session, name: &str, shape: Vec<i64>) {
        let id = session.new_tensor(name).unwrap();
        session.tensor_mut(id).set_shape(shape);
        session.tensor_mut(id).set_ptype(Primitive::Float32);
    }

    #[test]
    fn module_holds_buffers_io_and_main() {
        let ctx = Context::new();
        let mut session = Session::new();
        float_tensor(&mut session, "x", vec![3, 4]);
        float_tensor(&mut session, "w", vec![4, 2]);
        float_tensor(&mut session, "b", vec![2]);

        let mut net = Network::new("fc");
        net.decl_input("x");
        net.decl_weight("w", vec![0.5; 8]);
        net.decl_weight("b", vec![0.1; 2]);
        net.decl_output("out");
        net.add_fc("x", "w", "b", "out");

        let module = Builder::build(&mut session, net, &ctx).unwrap();
        let text = dump(&module);
        assert!(text.contains("def set_input_x"));
        assert!(text.contains("def get_output_out"));
        assert!(text.contains("def main_"));
        assert!(text.contains("create_assign_buffer(w)"));
        assert!(text.contains("x = create_buffer()"));
        assert!(text.contains("func0("));
    }
}
