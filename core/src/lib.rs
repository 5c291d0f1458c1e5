pub mod driver;
pub mod error;
pub mod ir;
pub mod plugins;
pub mod reports;
pub mod site;
pub mod trace;

pub use driver::{ConversionOptions, Driver, to_model, to_model_json};
pub use error::{ErrorKind, GraphErrorExt, Level, LoweringError, Result};
pub use ir::lower::{DimSpec, InputSpec};
pub use ir::{DType, Model, Tensor};
pub use plugins::{PrimitiveRegistry, builtin_registry};
pub use reports::{ConstantReport, analyze_constants};
pub use site::Site;
pub use trace::recording::{RecordingTracer, TraceBuilder};
pub use trace::{Callable, CallableRef, Tracer};

pub fn generate_error_report<E: GraphErrorExt>(error: &E) -> String {
    let level = error.level();
    let site = match error.site() {
        Some(site) => site.to_string(),
        None => "top level".to_string(),
    };
    let message = error.message();

    format!("LOWERGRAPH | {} | {} | {}", level, site, message)
}
