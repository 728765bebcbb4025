//! Functions: ordered groups of stages compiled into one generated
//! procedure.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::Context;
use crate::error::CompileError;
use crate::ir::Expr;
use crate::poly::{Band, ScheduleTree, build_ast};

use super::lowering::ast_to_ir;
use super::stage::Stage;
use super::transforms;

/// A generated procedure under construction: input/output tensor
/// parameters and an ordered stage list. After [`Function::end_definition`]
/// the schedule tree is fixed and no further stages may be added.
#[derive(Debug)]
pub struct Function {
    name: String,
    inputs: Vec<Expr>,
    outputs: Vec<Expr>,
    stages: Vec<Stage>,
    tree: Option<ScheduleTree>,
    ctx: Context,
}

impl Function {
    pub fn new(ctx: &Context, name: impl Into<String>) -> Function {
        Function {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stages: Vec::new(),
            tree: None,
            ctx: ctx.clone(),
        }
    }

    /// A function with a generated `funcN` name.
    pub fn with_generated_name(ctx: &Context) -> Function {
        let name = ctx.new_function_name();
        Function::new(ctx, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn inputs(&self) -> &[Expr] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Expr] {
        &self.outputs
    }

    /// Append a stage; the addition order fixes the default emission order.
    pub fn add_stage(&mut self, stage: Stage) -> Result<Stage, CompileError> {
        if self.tree.is_some() {
            return Err(CompileError::schedule(format!(
                "function '{}' is already defined; no further stages may be added",
                self.name
            )));
        }
        self.stages.push(stage.clone());
        Ok(stage)
    }

    /// Declare the input tensor parameters.
    pub fn set_inputs(&mut self, inputs: Vec<Expr>) {
        self.inputs = inputs;
    }

    /// Declare the output tensor parameters.
    pub fn set_outputs(&mut self, outputs: Vec<Expr>) {
        self.outputs = outputs;
    }

    /// Close the definition: assign the beta constants that linearize the
    /// stages, group fused stages, and build the schedule tree.
    pub fn end_definition(&mut self) -> Result<(), CompileError> {
        if self.tree.is_some() {
            return Err(CompileError::schedule(format!(
                "function '{}' was already ended",
                self.name
            )));
        }
        if self.stages.is_empty() {
            return Err(CompileError::schedule(format!(
                "function '{}' has no stages",
                self.name
            )));
        }

        // one stage per name
        let mut seen = FxHashSet::default();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(CompileError::schedule(format!(
                    "duplicate stage '{}' in function '{}'",
                    stage.name(),
                    self.name
                )));
            }
        }

        for (i, stage) in self.stages.iter().enumerate() {
            stage.set_beta(i as i64)?;
        }

        let groups = self.fusion_groups()?;
        let domains = self.stages.iter().map(|s| s.domain()).collect();

        let mut branches = Vec::with_capacity(groups.len());
        for group in &groups {
            let names: Vec<String> = group.iter().map(|&i| self.stages[i].name()).collect();
            let first = &self.stages[group[0]];
            let dims = first.domain().dims().to_vec();
            if group.len() == 1 {
                branches.push(ScheduleTree::filter(
                    names,
                    ScheduleTree::Band(Band::over_dims(dims, ScheduleTree::Leaf)),
                ));
            } else {
                // fused stages share one band over their common dimensions
                for &i in &group[1..] {
                    let other = &self.stages[i];
                    if !first.domain().same_shape(&other.domain()) {
                        return Err(CompileError::schedule(format!(
                            "cannot fuse '{}' with '{}': iteration domains differ",
                            first.name(),
                            other.name()
                        )));
                    }
                }
                let leaves = names
                    .iter()
                    .map(|n| ScheduleTree::filter(vec![n.clone()], ScheduleTree::Leaf))
                    .collect();
                branches.push(ScheduleTree::filter(
                    names,
                    ScheduleTree::Band(Band::over_dims(
                        dims,
                        ScheduleTree::Sequence { children: leaves },
                    )),
                ));
            }
        }

        let child = if branches.len() == 1 {
            branches.pop().unwrap_or(ScheduleTree::Leaf)
        } else {
            ScheduleTree::Sequence { children: branches }
        };
        self.tree = Some(ScheduleTree::domain(domains, child));
        debug!("function {}: schedule tree built", self.name);
        Ok(())
    }

    /// Group stage indices by fusion; groups keep creation order.
    fn fusion_groups(&self) -> Result<Vec<Vec<usize>>, CompileError> {
        let index_of: FxHashMap<String, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name(), i))
            .collect();

        // union-find over fuse_with edges
        let mut parent: Vec<usize> = (0..self.stages.len()).collect();
        fn find(parent: &mut [usize], i: usize) -> usize {
            let p = parent[i];
            if p == i {
                return i;
            }
            let root = find(parent, p);
            parent[i] = root;
            root
        }
        for (i, stage) in self.stages.iter().enumerate() {
            for other in stage.fuse_set() {
                let Some(&j) = index_of.get(&other) else {
                    return Err(CompileError::lookup("stage", other));
                };
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    let (lo, hi) = (ri.min(rj), ri.max(rj));
                    parent[hi] = lo;
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of: FxHashMap<usize, usize> = FxHashMap::default();
        for i in 0..self.stages.len() {
            let root = find(&mut parent, i);
            match group_of.get(&root) {
                Some(&g) => groups[g].push(i),
                None => {
                    group_of.insert(root, groups.len());
                    groups.push(vec![i]);
                }
            }
        }
        Ok(groups)
    }

    /// The schedule tree, after `end_definition`.
    pub fn schedule_tree(&self) -> Option<&ScheduleTree> {
        self.tree.as_ref()
    }

    /// Apply the per-stage schedule transformers, materialize the AST, and
    /// lower it to an IR `Function` node.
    ///
    /// Transformer order is fixed: call-once marks, then interchange, then
    /// tile/tile-unroll, then vectorize.
    pub fn compile_to_expr(&mut self) -> Result<Expr, CompileError> {
        let Some(tree) = self.tree.clone() else {
            return Err(CompileError::schedule(format!(
                "function '{}' must be ended before compiling",
                self.name
            )));
        };
        let mut tree = tree;

        for stage in &self.stages {
            if stage.is_call_once() {
                tree = transforms::insert_call_once_mark(tree, &stage.name())?;
            }
        }
        for stage in &self.stages {
            for (a, b) in stage.transposes() {
                tree = transforms::interchange(tree, &stage.name(), &a, &b)?;
            }
        }
        for stage in &self.stages {
            let sizes = stage.tile_sizes();
            if !sizes.is_empty() {
                tree = transforms::tile(tree, &stage.name(), &sizes, stage.unroll())?;
            }
        }
        for stage in &self.stages {
            if let Some(width) = stage.vector_width() {
                tree = transforms::vectorize(tree, &stage.name(), &stage.vector_outer(), width)?;
            }
        }

        let ast = build_ast(&tree)?;
        let body = ast_to_ir(&ast, &self.ctx)?;
        let body = if body.is_block() {
            body
        } else {
            Expr::block(vec![body])
        };

        // schedules are read-only once lowered
        for stage in &self.stages {
            stage.freeze();
        }

        Ok(Expr::function(
            self.name.clone(),
            self.inputs.clone(),
            self.outputs.clone(),
            body,
        ))
    }

    /// The IR `Function` node (alias of [`Function::compile_to_expr`]).
    pub fn ir_function(&mut self) -> Result<Expr, CompileError> {
        self.compile_to_expr()
    }
}
