pub mod lower;
pub mod model;
pub mod opt;
pub mod tensor;
pub mod value_info;

pub use self::model::{Attribute, Function, Graph, Initializer, Model, Node, FUNCTION_DOMAIN};
pub use self::tensor::{DType, Tensor};
pub use self::value_info::{Provenance, ShapeDim, ValueInfo};
