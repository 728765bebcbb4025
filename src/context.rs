//! Compilation context: name generation and the stage registry.
//!
//! A single compilation owns one [`Context`]; handing it to every API that
//! needs fresh names or stage lookup keeps independent compilations (and
//! unit tests) isolated from one another. The handle is cheap to clone and
//! shares the underlying state.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::core::Stage;
use crate::error::CompileError;

/// Unique-name generator with monotonically increasing per-category
/// counters.
#[derive(Debug, Default)]
pub struct NameGenerator {
    func: usize,
    stage: usize,
    iterator: usize,
    parameter: usize,
    var: usize,
    buffer: usize,
    array: usize,
    tmp: usize,
    cond: usize,
}

macro_rules! name_category {
    ($fn__:ident, $field__:ident, $prefix__:literal) => {
        pub fn $fn__(&mut self) -> String {
            let id = self.$field__;
            self.$field__ += 1;
            format!(concat!($prefix__, "{}"), id)
        }
    };
}

impl NameGenerator {
    name_category!(new_function_name, func, "func");
    name_category!(new_stage_name, stage, "S");
    name_category!(new_iterator_name, iterator, "i");
    name_category!(new_parameter_name, parameter, "p");
    name_category!(new_var_name, var, "var");
    name_category!(new_buffer_name, buffer, "buf");
    name_category!(new_array_name, array, "arr");
    name_category!(new_tmp_name, tmp, "tmp");
    name_category!(new_cond_name, cond, "cond");

    /// Restart every counter.
    pub fn reset(&mut self) {
        *self = NameGenerator::default();
    }
}

#[derive(Debug, Default)]
struct ContextData {
    names: NameGenerator,
    stages: FxHashMap<String, Stage>,
}

/// Shared handle over one compilation's mutable state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: Rc<RefCell<ContextData>>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Run `f` with the name generator.
    pub fn with_names<T>(&self, f: impl FnOnce(&mut NameGenerator) -> T) -> T {
        f(&mut self.data.borrow_mut().names)
    }

    pub fn new_stage_name(&self) -> String {
        self.with_names(NameGenerator::new_stage_name)
    }

    pub fn new_function_name(&self) -> String {
        self.with_names(NameGenerator::new_function_name)
    }

    pub fn new_iterator_name(&self) -> String {
        self.with_names(NameGenerator::new_iterator_name)
    }

    pub fn new_var_name(&self) -> String {
        self.with_names(NameGenerator::new_var_name)
    }

    pub fn new_cond_name(&self) -> String {
        self.with_names(NameGenerator::new_cond_name)
    }

    /// Register a stage under its name. Duplicate names are rejected; the
    /// lowering retrieves stages by the statement name in AST user nodes.
    pub fn register_stage(&self, stage: Stage) -> Result<(), CompileError> {
        let name = stage.name();
        let mut data = self.data.borrow_mut();
        if data.stages.contains_key(&name) {
            return Err(CompileError::schedule(format!(
                "duplicate stage registration for '{name}'"
            )));
        }
        data.stages.insert(name, stage);
        Ok(())
    }

    /// Look up a registered stage.
    pub fn stage(&self, name: &str) -> Option<Stage> {
        self.data.borrow().stages.get(name).cloned()
    }

    pub fn num_stages(&self) -> usize {
        self.data.borrow().stages.len()
    }

    /// Clear the registry and restart the name counters. Must be called
    /// between independent compilations sharing one context.
    pub fn reset(&self) {
        let mut data = self.data.borrow_mut();
        data.stages.clear();
        data.names.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_category_counters() {
        let ctx = Context::new();
        assert_eq!(ctx.new_stage_name(), "S0");
        assert_eq!(ctx.new_stage_name(), "S1");
        assert_eq!(ctx.new_function_name(), "func0");
        assert_eq!(ctx.new_var_name(), "var0");
        ctx.reset();
        assert_eq!(ctx.new_stage_name(), "S0");
    }
}
