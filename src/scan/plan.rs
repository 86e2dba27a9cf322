use crate::bands::validate_temperature;
use crate::error::DefeqError;
use crate::solver::Constraints;
use crate::types::ChemicalPotentialPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The thermal history of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum Protocol {
    /// Full equilibrium at one temperature.
    Equilibrium { temperature: f64 },
    /// Equilibrate at `anneal_temperature`, then quench to `quench_temperature` with immobile
    /// defects frozen.
    AnnealQuench {
        anneal_temperature: f64,
        quench_temperature: f64,
    },
}

impl Protocol {
    /// Temperature at which the reported Fermi level is solved.
    pub fn operating_temperature(&self) -> f64 {
        match self {
            Protocol::Equilibrium { temperature } => *temperature,
            Protocol::AnnealQuench {
                quench_temperature,
                ..
            } => *quench_temperature,
        }
    }

    pub fn anneal_temperature(&self) -> Option<f64> {
        match self {
            Protocol::Equilibrium { .. } => None,
            Protocol::AnnealQuench {
                anneal_temperature,
                ..
            } => Some(*anneal_temperature),
        }
    }

    pub fn validate(&self) -> Result<(), DefeqError> {
        match *self {
            Protocol::Equilibrium { temperature } => validate_temperature(temperature),
            Protocol::AnnealQuench {
                anneal_temperature,
                quench_temperature,
            } => {
                validate_temperature(anneal_temperature)?;
                validate_temperature(quench_temperature)?;
                if anneal_temperature < quench_temperature {
                    return Err(DefeqError::InvalidTemperaturePair {
                        anneal: anneal_temperature,
                        quench: quench_temperature,
                    });
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Equilibrium { temperature } => write!(f, "{temperature} K"),
            Protocol::AnnealQuench {
                anneal_temperature,
                quench_temperature,
            } => write!(f, "{anneal_temperature} K -> {quench_temperature} K"),
        }
    }
}

/// Which chemical-potential points a scan visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "selection", rename_all = "snake_case")]
pub enum PointSelection {
    /// Only the polytope vertices.
    Vertices,
    /// The barycentric grid at the given resolution.
    Grid { resolution: usize },
    /// Caller-supplied points, validated against the polytope before solving.
    Explicit { points: Vec<ChemicalPotentialPoint> },
}

impl Default for PointSelection {
    fn default() -> Self {
        PointSelection::Vertices
    }
}

/// A Cartesian product of protocols, chemical-potential points and constraint sets.
///
/// Points are visited protocol-major, then point, then constraint set; results come back in that
/// order whatever the degree of parallelism.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanPlan {
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub points: PointSelection,
    /// Empty means a single unconstrained set.
    #[serde(default)]
    pub constraint_sets: Vec<Constraints>,
}

impl ScanPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one equilibrium protocol per temperature.
    pub fn with_temperatures(mut self, temperatures: impl IntoIterator<Item = f64>) -> Self {
        self.protocols.extend(
            temperatures
                .into_iter()
                .map(|temperature| Protocol::Equilibrium { temperature }),
        );
        self
    }

    /// Adds one anneal/quench protocol per anneal temperature, all quenched to the same
    /// temperature.
    pub fn with_anneal_quench(
        mut self,
        anneal_temperatures: impl IntoIterator<Item = f64>,
        quench_temperature: f64,
    ) -> Self {
        self.protocols
            .extend(
                anneal_temperatures
                    .into_iter()
                    .map(|anneal_temperature| Protocol::AnnealQuench {
                        anneal_temperature,
                        quench_temperature,
                    }),
            );
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_grid(mut self, resolution: usize) -> Self {
        self.points = PointSelection::Grid { resolution };
        self
    }

    pub fn with_points(mut self, points: Vec<ChemicalPotentialPoint>) -> Self {
        self.points = PointSelection::Explicit { points };
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraint_sets.push(constraints);
        self
    }
}

/// A shared flag that stops a running scan from starting new points.
///
/// Points already being solved run to completion; the rest are reported as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_validation() {
        assert!(Protocol::Equilibrium { temperature: 300.0 }.validate().is_ok());
        assert!(
            Protocol::Equilibrium { temperature: 0.0 }
                .validate()
                .is_err()
        );
        assert!(matches!(
            Protocol::AnnealQuench {
                anneal_temperature: 300.0,
                quench_temperature: 900.0
            }
            .validate(),
            Err(DefeqError::InvalidTemperaturePair { .. })
        ));
    }

    #[test]
    fn test_builder_accumulates_protocols() {
        let plan = ScanPlan::new()
            .with_temperatures([300.0, 600.0])
            .with_anneal_quench([1200.0], 300.0)
            .with_grid(4);
        assert_eq!(plan.protocols.len(), 3);
        assert_eq!(plan.protocols[2].operating_temperature(), 300.0);
        assert_eq!(plan.protocols[2].anneal_temperature(), Some(1200.0));
        assert_eq!(plan.points, PointSelection::Grid { resolution: 4 });
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_plan_round_trips_through_json() {
        let plan = ScanPlan::new()
            .with_temperatures([300.0])
            .with_grid(3)
            .with_constraints(Constraints::new().with_background_charge(1e16));
        let json = serde_json::to_string(&plan).unwrap();
        let parsed: ScanPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_explicit_points_round_trip_through_json_and_toml() {
        let plan = ScanPlan::new()
            .with_temperatures([500.0])
            .with_points(vec![ChemicalPotentialPoint::new([("O", -1.0), ("Zn", -2.6)])]);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["points"]["selection"], "explicit");
        assert_eq!(json["points"]["points"][0]["potentials"]["O"], -1.0);
        let parsed: ScanPlan = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, plan);

        let from_toml: ScanPlan = toml::from_str(
            r#"
            protocols = [{ protocol = "equilibrium", temperature = 500.0 }]
            points = { selection = "explicit", points = [{ potentials = { O = -1.0, Zn = -2.6 } }] }
            "#,
        )
        .unwrap();
        assert_eq!(from_toml, plan);
    }
}
