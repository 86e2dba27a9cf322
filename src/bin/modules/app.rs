use super::cli::Cli;
use super::error::CliError;
use super::io;
use defeq::{
    Constraints, DefectSystem, Direction, PointSelection, Protocol, ScanPlan, SolverOptions,
    example_system,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub fn run(args: Cli) -> Result<(), CliError> {
    init_logging(args.verbose);

    let system = match &args.system {
        Some(path) => DefectSystem::load_from_file(path)?,
        None => example_system().clone(),
    };
    let source_name = args
        .system
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "bundled example".to_string());

    let solver = system
        .equilibrium_solver()?
        .with_options(solver_options(system.solver, &args))
        .with_mobile_defects(args.calculation.mobile_defects.iter().cloned())
        .with_quench_mode(args.calculation.quench_mode.into());

    let constraints = args
        .calculation
        .fixed
        .iter()
        .fold(Constraints::new(), |constraints, (name, value)| {
            constraints.fix_total(name.clone(), *value)
        })
        .with_background_charge(args.calculation.background_charge);
    let protocols = protocols(&args)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?,
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let objective = match (&args.optimization.maximize, &args.optimization.minimize) {
        (Some(target), _) => Some((target.clone(), Direction::Maximize)),
        (None, Some(target)) => Some((target.clone(), Direction::Minimize)),
        (None, None) => None,
    };

    let writer = io::get_writer(&args.output.output)?;
    let context = io::ReportContext {
        source_name: &source_name,
        system: &system,
        format: &args.output.format,
        precision: args.output.precision,
    };

    if let Some((target, direction)) = objective {
        pb.set_message(format!("Optimising {target}..."));
        let outcome = solver.optimize(
            target.clone(),
            direction,
            protocols[0],
            &constraints,
            args.calculation.resolution.max(1),
        )?;
        pb.finish_and_clear();
        info!(value = outcome.value, "optimisation complete");
        io::write_optimization(writer, &context, &target, direction, &outcome)
    } else {
        let mut plan = ScanPlan::new().with_constraints(constraints);
        plan.protocols = protocols;
        plan.points = if args.calculation.resolution == 0 {
            PointSelection::Vertices
        } else {
            PointSelection::Grid {
                resolution: args.calculation.resolution,
            }
        };
        pb.set_message("Solving charge neutrality...");
        let results = solver.scan(&plan)?;
        pb.finish_and_clear();
        io::write_scan(writer, &context, &results)
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("defeq={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn solver_options(mut options: SolverOptions, args: &Cli) -> SolverOptions {
    let overrides = &args.solver;
    if let Some(value) = overrides.absolute_tolerance {
        options.absolute_tolerance = value;
    }
    if let Some(value) = overrides.relative_tolerance {
        options.relative_tolerance = value;
    }
    if let Some(value) = overrides.max_iterations {
        options.max_iterations = value;
    }
    if let Some(value) = overrides.band_edge_padding {
        options.band_edge_padding = value;
    }
    if let Some(strategy) = overrides.site_competition {
        options.site_competition = strategy.into();
    }
    options
}

fn protocols(args: &Cli) -> Result<Vec<Protocol>, CliError> {
    let calculation = &args.calculation;
    if calculation.anneal_temperatures.is_empty() {
        return Ok(calculation
            .temperatures
            .iter()
            .map(|&temperature| Protocol::Equilibrium { temperature })
            .collect());
    }
    let protocols: Vec<Protocol> = calculation
        .anneal_temperatures
        .iter()
        .flat_map(|&anneal_temperature| {
            calculation
                .temperatures
                .iter()
                .filter(move |&&quench| quench <= anneal_temperature)
                .map(move |&quench_temperature| Protocol::AnnealQuench {
                    anneal_temperature,
                    quench_temperature,
                })
        })
        .collect();
    if protocols.is_empty() {
        return Err(CliError::InvalidArgument(
            "every anneal temperature is below every quench temperature".to_string(),
        ));
    }
    Ok(protocols)
}
