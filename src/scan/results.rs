use super::plan::Protocol;
use crate::error::DefeqError;
use crate::types::{ChemicalPotentialPoint, EquilibriumResult};
use serde::{Deserialize, Serialize};

/// Why a point produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NonConvergence,
    NumericalInstability,
}

/// What became of one point of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PointOutcome {
    /// The solved equilibrium. For anneal/quench protocols this is the quench step.
    Ok { result: Box<EquilibriumResult> },
    Failed { kind: FailureKind, message: String },
    /// The scan was cancelled before this point was started.
    Cancelled,
}

impl PointOutcome {
    /// Converts a solve into an outcome, passing fatal errors through.
    pub(crate) fn from_solve(
        solved: Result<EquilibriumResult, DefeqError>,
    ) -> Result<Self, DefeqError> {
        match solved {
            Ok(result) => Ok(PointOutcome::Ok {
                result: Box::new(result),
            }),
            Err(err @ DefeqError::NonConvergence { .. }) => Ok(PointOutcome::Failed {
                kind: FailureKind::NonConvergence,
                message: err.to_string(),
            }),
            Err(err @ DefeqError::NumericalInstability(_)) => Ok(PointOutcome::Failed {
                kind: FailureKind::NumericalInstability,
                message: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    pub fn result(&self) -> Option<&EquilibriumResult> {
        match self {
            PointOutcome::Ok { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PointOutcome::Ok { .. })
    }
}

/// One entry of a scan, tagged with its position in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub protocol: Protocol,
    /// Index into the plan's point selection.
    pub point_index: usize,
    pub chemical_potentials: ChemicalPotentialPoint,
    /// Index into the plan's constraint sets.
    pub constraint_index: usize,
    pub outcome: PointOutcome,
}

/// One (defect, charge) concentration of a successful point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub temperature: f64,
    pub anneal_temperature: Option<f64>,
    pub point_index: usize,
    pub constraint_index: usize,
    pub chemical_potentials: ChemicalPotentialPoint,
    pub fermi_level: f64,
    pub defect: String,
    pub charge: i32,
    pub concentration: f64,
}

/// Ordered results of a scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanResults {
    pub records: Vec<ScanRecord>,
}

impl ScanResults {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, PointOutcome::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, PointOutcome::Cancelled))
            .count()
    }

    /// Successful results in plan order.
    pub fn results(&self) -> impl Iterator<Item = &EquilibriumResult> {
        self.records.iter().filter_map(|r| r.outcome.result())
    }

    /// Flattens every successful point into one row per (defect, charge) pair.
    pub fn rows(&self) -> Vec<ResultRow> {
        self.records
            .iter()
            .filter_map(|record| record.outcome.result().map(|result| (record, result)))
            .flat_map(|(record, result)| {
                result.defects.iter().map(move |d| ResultRow {
                    temperature: result.temperature,
                    anneal_temperature: record.protocol.anneal_temperature(),
                    point_index: record.point_index,
                    constraint_index: record.constraint_index,
                    chemical_potentials: result.chemical_potentials.clone(),
                    fermi_level: result.fermi_level,
                    defect: d.defect.clone(),
                    charge: d.charge,
                    concentration: d.concentration,
                })
            })
            .collect()
    }
}
