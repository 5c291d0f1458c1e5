//! file: core/src/ir/value_info.rs
//! description: shape/dtype records and their reconciliation rules.
//!
//! Every record carries a provenance tag saying how it was established.
//! `reconcile` is the single decision procedure used whenever a second
//! source supplies metadata for a name that already has a record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ir::tensor::DType;

/// One dimension of a target-graph shape: a concrete length or the name of
/// a dynamic dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeDim {
    Fixed(u64),
    Named(String),
}

impl fmt::Display for ShapeDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeDim::Fixed(n) => write!(f, "{}", n),
            ShapeDim::Named(s) => write!(f, "{}", s),
        }
    }
}

pub fn format_shape(shape: &[ShapeDim]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Declared directly: graph inputs, constants, handler-registered outputs.
    Original,
    /// Re-derived from the source variable's abstract value after a handler ran.
    Recovered,
    /// Filled in for a function output that was missing a record.
    Repaired,
    /// Copied out of a nested function's metadata into its caller.
    Subgraph,
}

impl Provenance {
    pub fn confidence(&self) -> u8 {
        match self {
            Provenance::Original => 3,
            Provenance::Repaired => 2,
            Provenance::Recovered => 1,
            Provenance::Subgraph => 0,
        }
    }

    /// Pinned records are never downgraded.
    pub fn is_pinned(&self) -> bool {
        matches!(self, Provenance::Original | Provenance::Repaired)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provenance::Original => "original",
            Provenance::Recovered => "recovered",
            Provenance::Repaired => "repaired",
            Provenance::Subgraph => "subgraph",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    pub shape: Vec<ShapeDim>,
    pub dtype: DType,
    pub provenance: Provenance,
}

impl ValueInfo {
    pub fn new(name: &str, shape: Vec<ShapeDim>, dtype: DType, provenance: Provenance) -> Self {
        ValueInfo { name: name.to_string(), shape, dtype, provenance }
    }

    pub fn same_type(&self, shape: &[ShapeDim], dtype: DType) -> bool {
        self.shape == shape && self.dtype == dtype
    }

    pub fn renamed(&self, name: &str) -> Self {
        ValueInfo { name: name.to_string(), ..self.clone() }
    }
}

impl fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{} ({})", self.name, self.dtype, format_shape(&self.shape), self.provenance)
    }
}

/// Outcome of offering new metadata for a name that may already have a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// No record yet.
    Insert,
    /// The existing record stays as it is.
    Keep,
    /// The existing record stays but the disagreement must be reported.
    KeepReported(String),
    /// The incoming record replaces the existing one.
    Upgrade,
    /// The incoming record replaces a disagreeing lower-confidence one; report it.
    UpgradeReported(String),
    /// No safe choice exists.
    Conflict(String),
}

/// Decide how `incoming` metadata combines with the `existing` record.
///
/// Agreeing records keep the higher-confidence provenance. Disagreeing
/// records resolve toward a pinned record (original/repaired) when exactly
/// one side is pinned; when both or neither side is pinned there is no safe
/// default and the result is a conflict.
pub fn reconcile(
    existing: Option<&ValueInfo>,
    shape: &[ShapeDim],
    dtype: DType,
    provenance: Provenance,
) -> Reconciled {
    let Some(existing) = existing else {
        return Reconciled::Insert;
    };
    if existing.same_type(shape, dtype) {
        return if provenance.confidence() > existing.provenance.confidence() {
            Reconciled::Upgrade
        } else {
            Reconciled::Keep
        };
    }
    let detail = format!(
        "{} says {}{}, {} says {}{}",
        existing.provenance,
        existing.dtype,
        format_shape(&existing.shape),
        provenance,
        dtype,
        format_shape(shape)
    );
    match (existing.provenance.is_pinned(), provenance.is_pinned()) {
        (true, false) => Reconciled::KeepReported(detail),
        (false, true) => Reconciled::UpgradeReported(detail),
        _ => Reconciled::Conflict(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(shape: &[u64], provenance: Provenance) -> ValueInfo {
        ValueInfo::new(
            "v",
            shape.iter().map(|d| ShapeDim::Fixed(*d)).collect(),
            DType::F32,
            provenance,
        )
    }

    fn dims(shape: &[u64]) -> Vec<ShapeDim> {
        shape.iter().map(|d| ShapeDim::Fixed(*d)).collect()
    }

    #[test]
    fn agreeing_records_only_move_up() {
        let existing = rec(&[3], Provenance::Subgraph);
        assert_eq!(reconcile(Some(&existing), &dims(&[3]), DType::F32, Provenance::Recovered), Reconciled::Upgrade);
        let existing = rec(&[3], Provenance::Original);
        assert_eq!(reconcile(Some(&existing), &dims(&[3]), DType::F32, Provenance::Recovered), Reconciled::Keep);
    }

    #[test]
    fn pinned_record_survives_disagreement() {
        let existing = rec(&[3], Provenance::Repaired);
        let out = reconcile(Some(&existing), &dims(&[4]), DType::F32, Provenance::Subgraph);
        assert!(matches!(out, Reconciled::KeepReported(_)));
    }

    #[test]
    fn recovered_and_subgraph_disagreement_is_a_conflict() {
        let existing = rec(&[3], Provenance::Recovered);
        let out = reconcile(Some(&existing), &dims(&[4]), DType::F32, Provenance::Subgraph);
        assert!(matches!(out, Reconciled::Conflict(_)));
        let existing = rec(&[3], Provenance::Original);
        let out = reconcile(Some(&existing), &dims(&[3]), DType::I64, Provenance::Original);
        assert!(matches!(out, Reconciled::Conflict(_)));
    }
}
