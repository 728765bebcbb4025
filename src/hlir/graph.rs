//! The bipartite tensor/operator graph and its partitioning.

use std::collections::{BTreeSet, VecDeque};

use log::debug;
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::core::Function;
use crate::error::CompileError;
use crate::ir::Expr;

use super::network::Program;
use super::op::{OpRegistry, Operator};
use super::session::{Session, TensorId};

/// What a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Tensor(TensorId),
    /// Index into the graph's operator list.
    Op(usize),
}

/// One node of the bipartite graph.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub inlinks: Vec<usize>,
    pub outlinks: Vec<usize>,
}

/// Tensor and operator nodes with their data-flow edges.
pub struct Graph {
    nodes: Vec<Node>,
    tensor_nodes: FxHashMap<String, usize>,
    ops: Vec<Operator>,
}

impl Graph {
    /// Build the graph from a program: one node per tensor and per
    /// operator, edges along the data flow. Output tensors are created in
    /// the session on first sight.
    pub fn build(program: &Program, session: &mut Session) -> Result<Graph, CompileError> {
        let mut graph = Graph {
            nodes: Vec::new(),
            tensor_nodes: FxHashMap::default(),
            ops: Vec::new(),
        };

        for name in program
            .inputs
            .iter()
            .chain(program.weights.iter().map(|(n, _)| n))
        {
            let Some(id) = session.get_tensor(name) else {
                return Err(CompileError::lookup("tensor", name.clone()));
            };
            graph.new_tensor_node(name, id);
        }

        for desc in &program.ops {
            let mut op = Operator::new(desc.op_type.clone(), desc.layer, desc.param.clone());
            for (arg, value) in &desc.inputs {
                op.set_input(arg.clone(), value.clone());
            }
            for (arg, value) in &desc.outputs {
                op.set_output(arg.clone(), value.clone());
            }
            let op_index = graph.ops.len();
            graph.ops.push(op);

            let node_index = graph.nodes.len();
            graph.nodes.push(Node {
                name: format!("{}{}", desc.op_type, op_index),
                kind: NodeKind::Op(op_index),
                inlinks: Vec::new(),
                outlinks: Vec::new(),
            });

            for (_, value) in &desc.inputs {
                let Some(&tensor_node) = graph.tensor_nodes.get(value) else {
                    return Err(CompileError::lookup("tensor", value.clone()));
                };
                graph.nodes[tensor_node].outlinks.push(node_index);
                graph.nodes[node_index].inlinks.push(tensor_node);
            }
            for (_, value) in &desc.outputs {
                let id = match session.get_tensor(value) {
                    Some(id) => id,
                    None => session.new_tensor(value.clone())?,
                };
                let tensor_node = match graph.tensor_nodes.get(value) {
                    Some(&n) => n,
                    None => graph.new_tensor_node(value, id),
                };
                graph.nodes[node_index].outlinks.push(tensor_node);
                graph.nodes[tensor_node].inlinks.push(node_index);
            }
        }

        Ok(graph)
    }

    fn new_tensor_node(&mut self, name: &str, id: TensorId) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_owned(),
            kind: NodeKind::Tensor(id),
            inlinks: Vec::new(),
            outlinks: Vec::new(),
        });
        self.tensor_nodes.insert(name.to_owned(), index);
        index
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Source tensors: no producers.
    pub fn graph_inputs(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Tensor(_)) && n.inlinks.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Sink tensors: no consumers.
    pub fn graph_outputs(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Tensor(_)) && n.outlinks.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Kahn topological order over all nodes; stable w.r.t. insertion
    /// order, so the emitted code is deterministic.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.inlinks.len()).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &self.nodes[i].outlinks {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Compile every operator, in topological order.
    pub fn compile_ops(
        &mut self,
        registry: &OpRegistry,
        session: &mut Session,
        ctx: &Context,
    ) -> Result<(), CompileError> {
        for index in self.topological_order() {
            if let NodeKind::Op(op_index) = self.nodes[index].kind {
                self.ops[op_index].compile(registry, session, ctx)?;
            }
        }
        Ok(())
    }

    /// Lower every partitioned function and collect the results into one
    /// block expression.
    pub fn compile_expr(functions: &mut [Function]) -> Result<Expr, CompileError> {
        let mut exprs = Vec::with_capacity(functions.len());
        for function in functions {
            exprs.push(function.compile_to_expr()?);
        }
        Ok(Expr::block(exprs))
    }

    /// Partition the stages into functions: walk tensors in topological
    /// order accumulating their stages; a fan-out (a tensor feeding more
    /// than one consumer) closes the current function.
    ///
    /// Each function's inputs are the tensors it reads but does not
    /// write; its outputs are the tensors it writes.
    pub fn partition_functions(
        &self,
        session: &Session,
        ctx: &Context,
    ) -> Result<Vec<Function>, CompileError> {
        let mut functions = Vec::new();
        let mut current = Function::with_generated_name(ctx);

        for index in self.topological_order() {
            let node = &self.nodes[index];
            let NodeKind::Tensor(id) = node.kind else {
                continue;
            };
            for stage in session.tensor(id).stages() {
                current.add_stage(stage.clone())?;
            }
            if node.outlinks.len() > 1 && !current.stages().is_empty() {
                finish_function(&mut current, session)?;
                functions.push(std::mem::replace(
                    &mut current,
                    Function::with_generated_name(ctx),
                ));
            }
        }
        if !current.stages().is_empty() {
            finish_function(&mut current, session)?;
            functions.push(current);
        }
        if functions.is_empty() {
            return Err(CompileError::schedule(
                "partitioning produced no functions: the graph has no stages",
            ));
        }
        debug!("partitioned into {} functions", functions.len());
        Ok(functions)
    }
}

/// Derive a function's io from its stages' access relations and end its
/// definition.
fn finish_function(function: &mut Function, session: &Session) -> Result<(), CompileError> {
    let mut reads: BTreeSet<String> = BTreeSet::new();
    let mut writes: BTreeSet<String> = BTreeSet::new();
    for stage in function.stages() {
        for access in stage.read_access() {
            reads.insert(access.tensor().to_owned());
        }
        for access in stage.write_access() {
            writes.insert(access.tensor().to_owned());
        }
    }

    let tensor_expr = |name: &str| -> Result<Expr, CompileError> {
        let id = session
            .get_tensor(name)
            .ok_or_else(|| CompileError::lookup("tensor", name))?;
        session.tensor(id).expr()
    };

    let mut inputs = Vec::new();
    for name in reads.difference(&writes) {
        inputs.push(tensor_expr(name)?);
    }
    let mut outputs = Vec::new();
    for name in &writes {
        outputs.push(tensor_expr(name)?);
    }
    function.set_inputs(inputs);
    function.set_outputs(outputs);
    function.end_definition()
}

#[cfg(test)]
mod tests {
    use super::super::network::Network;
    use super::*;
    use crate::types::Primitive;

    fn float_tensor(session: &mut Session, name: &str, shape: Vec<i64>) {
        let id = session.new_tensor(name).unwrap();
        session.tensor_mut(id).set_shape(shape);
        session.tensor_mut(id).set_ptype(Primitive::Float32);
    }

    fn fc_graph(session: &mut Session) -> (Graph, Program) {
        float_tensor(session, "x", vec![3, 4]);
        float_tensor(session, "w", vec![4, 2]);
        float_tensor(session, "b", vec![2]);
        let mut net = Network::new("fc");
        net.decl_input("x");
        net.decl_weight("w", vec![0.5; 8]);
        net.decl_weight("b", vec![0.1; 2]);
        net.decl_output("out");
        net.add_fc("x", "w", "b", "out");
        let program = net.compile().unwrap();
        (Graph::build(&program, session).unwrap(), program)
    }

    #[test]
    fn build_links_tensors_and_ops() {
        let mut session = Session::new();
        let (graph, _) = fc_graph(&mut session);
        // 3 declared tensors + 3 ops + 3 op outputs
        assert_eq!(graph.nodes().len(), 9);
        assert_eq!(graph.graph_inputs().len(), 3);
        assert_eq!(graph.graph_outputs(), vec![graph.nodes().len() - 1]);
    }

    #[test]
    fn topological_order_respects_dataflow() {
        let mut session = Session::new();
        let (graph, _) = fc_graph(&mut session);
        let order = graph.topological_order();
        assert_eq!(order.len(), graph.nodes().len());
        let pos = |name: &str| {
            order
                .iter()
                .position(|&i| graph.nodes()[i].name == name)
                .unwrap()
        };
        assert!(pos("x") < pos("matmul0"));
        assert!(pos("matmul0") < pos("out_mm"));
        assert!(pos("out_mm") < pos("bias_add1"));
        assert!(pos("out_biased") < pos("relu2"));
    }

    #[test]
    fn linear_chain_partitions_into_one_function() {
        let ctx = Context::new();
        let mut session = Session::new();
        let (mut graph, _) = fc_graph(&mut session);
        let registry = OpRegistry::with_instruction_ops();
        graph.compile_ops(&registry, &mut session, &ctx).unwrap();
        let functions = graph.partition_functions(&session, &ctx).unwrap();
        assert_eq!(functions.len(), 1);
        let f = &functions[0];
        assert_eq!(f.stages().len(), 3);
        // reads not written: x, w, b; writes: out and the temporaries
        let input_names: Vec<&str> = f
            .inputs()
            .iter()
            .map(|e| e.as_tensor().unwrap().name())
            .collect();
        assert_eq!(input_names, vec!["b", "w", "x"]);
        let output_names: Vec<&str> = f
            .outputs()
            .iter()
            .map(|e| e.as_tensor().unwrap().name())
            .collect();
        assert_eq!(output_names, vec!["out", "out_biased", "out_mm"]);
    }
}
