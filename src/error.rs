use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for all fallible operations in the `defeq` library.
///
/// Variants fall into four families. Configuration errors indicate caller
/// misuse and abort immediately. `NonConvergence` and `NumericalInstability`
/// are failures of a single solve; a scan records them against the affected
/// point and keeps going. `DomainViolation` rejects a chemical-potential point
/// that lies outside the allowed region before any solving happens.
#[derive(Error, Debug)]
pub enum DefeqError {
    /// A charge state references an element that the chemical-potential point
    /// does not define.
    #[error("Chemical potential missing for element '{element}' (required by defect '{defect}')")]
    MissingChemicalPotential {
        /// The element symbol that could not be found.
        element: String,
        /// The defect whose charge state needed it.
        defect: String,
    },

    /// A calculation was requested for a system without any defects.
    #[error("Input validation failed: at least one defect is required for a calculation")]
    NoDefects,

    /// A defect record carries no charge states.
    #[error("Defect '{0}' has no charge states")]
    NoChargeStates(String),

    /// Temperatures must be strictly positive and finite.
    #[error("Invalid temperature: {0} K (must be positive and finite)")]
    InvalidTemperature(f64),

    /// The anneal temperature of an anneal/quench protocol must not be below
    /// the quench temperature.
    #[error("Anneal temperature {anneal} K is below quench temperature {quench} K")]
    InvalidTemperaturePair {
        /// Requested anneal (growth) temperature.
        anneal: f64,
        /// Requested quench (operating) temperature.
        quench: f64,
    },

    /// An element key is not a recognised chemical symbol.
    #[error("Unknown element symbol: '{0}'")]
    UnknownElement(String),

    /// Two defect records share the same name.
    #[error("Duplicate defect name: '{0}'")]
    DuplicateDefect(String),

    /// A constraint or target names a defect that is not part of the system.
    #[error("Unknown defect: '{0}'")]
    UnknownDefect(String),

    /// The competing phases leave no stable region for the host.
    #[error("Chemical potential space is empty: the host phase is not stable against its competing phases")]
    EmptyChemicalPotentialSpace,

    /// An element's chemical potential has no lower bound, so the allowed
    /// region is not a bounded polytope.
    #[error("Chemical potential of '{0}' is unbounded below; supply an explicit lower bound")]
    UnboundedChemicalPotential(String),

    /// Any other malformed configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The charge-neutrality root-finder failed to converge within its bracket
    /// and iteration budget.
    #[error(
        "Charge neutrality failed to converge after {iterations} iterations: residual {residual:.3e} cm^-3 over Fermi level bracket [{:.4}, {:.4}] eV",
        .bracket.0, .bracket.1
    )]
    NonConvergence {
        /// Net charge at the last evaluated Fermi level.
        residual: f64,
        /// The Fermi-level bracket (eV, relative to the VBM) at termination.
        bracket: (f64, f64),
        /// Number of iterations performed.
        iterations: u32,
    },

    /// A negative or non-finite intermediate was produced. This points at
    /// invalid input data or a modelling bug and is never clipped silently.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// A chemical-potential point lies outside the allowed polytope.
    #[error("Chemical potential point outside the stability region: {0}")]
    DomainViolation(String),

    /// An I/O error that occurred while reading a system file.
    #[error("I/O error at path '{path}': {source}")]
    IoError {
        /// The path of the file that caused the I/O error.
        path: PathBuf,
        /// The underlying `std::io::Error`.
        #[source]
        source: std::io::Error,
    },

    /// A TOML system file could not be deserialized.
    #[error("Failed to deserialize TOML system: {0}")]
    TomlDeserialization(#[from] toml::de::Error),

    /// A JSON document could not be (de)serialized.
    #[error("Failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DefeqError {
    /// Returns `true` for failures that only invalidate a single solve.
    ///
    /// Scans record these against the offending point and continue; every
    /// other variant aborts the caller.
    pub fn is_point_failure(&self) -> bool {
        matches!(
            self,
            DefeqError::NonConvergence { .. } | DefeqError::NumericalInstability(_)
        )
    }

    /// Recovers the error raised inside an `argmin` cost function.
    ///
    /// Errors from the solver itself (bad initial simplex, invalid bracket) become
    /// `NumericalInstability`.
    pub(crate) fn from_solver(err: argmin::core::Error) -> Self {
        match err.downcast::<DefeqError>() {
            Ok(err) => err,
            Err(other) => DefeqError::NumericalInstability(other.to_string()),
        }
    }
}
