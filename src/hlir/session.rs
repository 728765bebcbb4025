//! The tensor registry of one program.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::error::CompileError;

use super::tensor::Tensor;

slotmap::new_key_type! {
    /// Stable id of a tensor in a session's arena.
    pub struct TensorId;
}

/// Holds every tensor of the program under construction. Graph nodes and
/// operators refer to tensors through [`TensorId`] keys, which breaks the
/// tensor/stage reference cycle.
#[derive(Default)]
pub struct Session {
    tensors: SlotMap<TensorId, Tensor>,
    by_name: FxHashMap<String, TensorId>,
    weights: FxHashMap<String, Vec<f32>>,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// Create a tensor; names are unique within a session.
    pub fn new_tensor(&mut self, name: impl Into<String>) -> Result<TensorId, CompileError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(CompileError::shape(format!(
                "tensor '{name}' already exists in the session"
            )));
        }
        let id = self.tensors.insert(Tensor::new(name.clone()));
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Look up a tensor id by name.
    pub fn get_tensor(&self, name: &str) -> Option<TensorId> {
        self.by_name.get(name).copied()
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id]
    }

    pub fn size(&self) -> usize {
        self.tensors.len()
    }

    /// Attach weight data to a tensor name; weight tensors get assigned
    /// buffers in the module's global data section and their
    /// preprocessing stages run once.
    pub fn mark_weight(&mut self, name: &str, data: Vec<f32>) -> Result<(), CompileError> {
        if self.get_tensor(name).is_none() {
            return Err(CompileError::lookup("tensor", name));
        }
        self.weights.insert(name.to_owned(), data);
        Ok(())
    }

    pub fn is_weight(&self, name: &str) -> bool {
        self.weights.contains_key(name)
    }

    pub fn weight_data(&self, name: &str) -> Option<&[f32]> {
        self.weights.get(name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    #[test]
    fn names_are_unique() {
        let mut session = Session::new();
        let id = session.new_tensor("x").unwrap();
        assert!(session.new_tensor("x").is_err());
        assert_eq!(session.get_tensor("x"), Some(id));
        assert_eq!(session.get_tensor("y"), None);
    }

    #[test]
    fn weights_attach_to_existing_tensors() {
        let mut session = Session::new();
        let id = session.new_tensor("w").unwrap();
        session.tensor_mut(id).set_shape(vec![2, 2]);
        session.tensor_mut(id).set_ptype(Primitive::Float32);
        assert!(session.mark_weight("nope", vec![]).is_err());
        session.mark_weight("w", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(session.is_weight("w"));
        assert_eq!(session.weight_data("w").unwrap().len(), 4);
    }
}
