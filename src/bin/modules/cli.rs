use clap::{ArgGroup, Args, Parser, ValueEnum};
use defeq::{QuenchMode, SiteCompetition, Target};
use std::path::PathBuf;

const ABOUT: &str = "A command-line tool for calculating self-consistent Fermi levels, defect and carrier concentrations of defective semiconductors and insulators.";
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser)]
#[command(version, about = ABOUT, help_template = HELP_TEMPLATE)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Defect system file in TOML or JSON format.
    ///
    /// The file holds the band parameters, the host and competing phases and the defect records.
    /// A `.json` extension selects JSON; anything else is read as TOML. If omitted, the bundled
    /// ZnO example system is used.
    #[arg(value_name = "SYSTEM")]
    pub system: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace).
    ///
    /// The RUST_LOG environment variable takes precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub output: OutputOptions,

    #[command(flatten)]
    pub calculation: CalculationOptions,

    #[command(flatten)]
    pub optimization: OptimizationOptions,

    #[command(flatten)]
    pub solver: SolverOverrides,
}

/// Options for controlling the output format and destination.
#[derive(Args)]
#[command(next_help_heading = "Output Options")]
pub struct OutputOptions {
    /// Output file path.
    ///
    /// If not specified, results are written to standard output.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format for the results.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Number of significant digits for concentrations and decimals for energies.
    #[arg(short, long, default_value_t = 4)]
    pub precision: usize,
}

/// Options describing which equilibria to compute.
#[derive(Args)]
#[command(next_help_heading = "Calculation Options")]
pub struct CalculationOptions {
    /// Temperatures (K) at which the Fermi level is solved.
    ///
    /// With --anneal these are the quench temperatures.
    #[arg(
        short = 'T',
        long = "temperature",
        value_name = "K",
        num_args = 1..,
        default_values_t = [300.0]
    )]
    pub temperatures: Vec<f64>,

    /// Anneal temperatures (K) for frozen-defect equilibria.
    ///
    /// Every anneal temperature is combined with every quench temperature not above it.
    #[arg(long = "anneal", value_name = "K", num_args = 1..)]
    pub anneal_temperatures: Vec<f64>,

    /// Defects that re-equilibrate on quenching; all others keep their anneal concentrations.
    #[arg(long = "mobile", value_name = "DEFECT", num_args = 1..)]
    pub mobile_defects: Vec<String>,

    /// What is frozen in from the anneal step.
    #[arg(long, value_enum, default_value_t = QuenchModeArg::Totals)]
    pub quench_mode: QuenchModeArg,

    /// Barycentric grid resolution over the chemical-potential polytope.
    ///
    /// 0 solves only at the polytope vertices.
    #[arg(short, long, default_value_t = 0)]
    pub resolution: usize,

    /// Fixed background charge density (e cm^-3), e.g. an effective donor concentration.
    #[arg(long, value_name = "CM^-3", default_value_t = 0.0, allow_hyphen_values = true)]
    pub background_charge: f64,

    /// Pin a defect's total concentration (cm^-3), as NAME=VALUE.
    #[arg(long = "fix", value_name = "NAME=VALUE", value_parser = parse_fixed)]
    pub fixed: Vec<(String, f64)>,
}

/// Options for optimising a property over the chemical-potential polytope instead of scanning.
#[derive(Args)]
#[command(next_help_heading = "Optimisation Options")]
#[command(group(ArgGroup::new("objective").args(["maximize", "minimize"])))]
pub struct OptimizationOptions {
    /// Find the chemical potentials that maximise TARGET.
    ///
    /// TARGET is one of `electrons`, `holes`, `fermi-level`, `defect:NAME` or `state:NAME:CHARGE`.
    /// The first temperature (and anneal temperature, if given) defines the protocol; the grid
    /// resolution seeds the search.
    #[arg(long, value_name = "TARGET", value_parser = parse_target)]
    pub maximize: Option<Target>,

    /// Find the chemical potentials that minimise TARGET.
    #[arg(long, value_name = "TARGET", value_parser = parse_target)]
    pub minimize: Option<Target>,
}

/// Overrides of the solver options stored in the system file.
#[derive(Args)]
#[command(next_help_heading = "Solver Options")]
pub struct SolverOverrides {
    /// Absolute net-charge tolerance (e cm^-3).
    #[arg(long, value_name = "CM^-3")]
    pub absolute_tolerance: Option<f64>,

    /// Net charge tolerance relative to the total charge magnitude.
    #[arg(long)]
    pub relative_tolerance: Option<f64>,

    /// Maximum number of root-search iterations per solve.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Widen the Fermi-level bracket beyond the band edges (eV).
    #[arg(long, value_name = "EV")]
    pub band_edge_padding: Option<f64>,

    /// Normalisation of defects competing for the same lattice sites.
    #[arg(long, value_enum)]
    pub site_competition: Option<SiteCompetitionArg>,
}

/// Output format for the calculation results.
#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed tables with a run summary, per-point carriers and defect concentrations.
    Pretty,
    /// Comma-separated values with one row per (point, defect, charge).
    Csv,
    /// The full result structure as JSON.
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum QuenchModeArg {
    /// Frozen defects keep their totals; charge states redistribute.
    Totals,
    /// Every charge state of a frozen defect keeps its concentration.
    ChargeStates,
}

impl From<QuenchModeArg> for QuenchMode {
    fn from(arg: QuenchModeArg) -> Self {
        match arg {
            QuenchModeArg::Totals => QuenchMode::FixTotals,
            QuenchModeArg::ChargeStates => QuenchMode::FixChargeStates,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SiteCompetitionArg {
    Dilute,
    Global,
    PerDefect,
}

impl From<SiteCompetitionArg> for SiteCompetition {
    fn from(arg: SiteCompetitionArg) -> Self {
        match arg {
            SiteCompetitionArg::Dilute => SiteCompetition::Dilute,
            SiteCompetitionArg::Global => SiteCompetition::Global,
            SiteCompetitionArg::PerDefect => SiteCompetition::PerDefect,
        }
    }
}

fn parse_fixed(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid concentration '{value}'"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_target(s: &str) -> Result<Target, String> {
    match s {
        "electrons" | "n" => return Ok(Target::ElectronConcentration),
        "holes" | "p" => return Ok(Target::HoleConcentration),
        "fermi-level" | "ef" => return Ok(Target::FermiLevel),
        _ => {}
    }
    if let Some(defect) = s.strip_prefix("defect:") {
        return Ok(Target::DefectTotal {
            defect: defect.to_string(),
        });
    }
    if let Some(rest) = s.strip_prefix("state:") {
        let (defect, charge) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("expected state:NAME:CHARGE, got '{s}'"))?;
        let charge: i32 = charge
            .parse()
            .map_err(|_| format!("invalid charge '{charge}'"))?;
        return Ok(Target::ChargeState {
            defect: defect.to_string(),
            charge,
        });
    }
    Err(format!(
        "unknown target '{s}' (expected electrons, holes, fermi-level, defect:NAME or state:NAME:CHARGE)"
    ))
}
