//! Handlers for element-wise array primitives.

use std::sync::Arc;

use crate::error::Result;
use crate::plugins::PrimitiveRegistry;

pub mod binary;
pub mod pow;

pub(crate) fn register_all(registry: &mut PrimitiveRegistry) -> Result<()> {
    registry.register(pow::meta(), Arc::new(pow::PowPlugin))?;
    registry.register(binary::add_meta(), Arc::new(binary::BinaryPlugin::new("Add")))?;
    registry.register(binary::mul_meta(), Arc::new(binary::BinaryPlugin::new("Mul")))?;
    Ok(())
}
