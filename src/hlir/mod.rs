//! The high-level graph builder: tensors, operators, networks, and the
//! partitioning of stages into functions.

mod builder;
mod graph;
mod network;
mod op;
mod session;
mod tensor;

pub use builder::Builder;
pub use graph::{Graph, Node, NodeKind};
pub use network::{Network, OpDesc, Program};
pub use op::{ElementwiseKind, HlirLayer, OpKernel, OpRegistry, Operator, OperatorParam};
pub use session::{Session, TensorId};
pub use tensor::Tensor;
