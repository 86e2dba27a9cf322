use super::cli::OutputFormat;
use super::error::CliError;
use defeq::{
    DefectSystem, Direction, EquilibriumResult, OptimizationOutcome, PointOutcome, ScanResults,
    Target,
};
use prettytable::*;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

pub struct ReportContext<'a> {
    pub source_name: &'a str,
    pub system: &'a DefectSystem,
    pub format: &'a OutputFormat,
    pub precision: usize,
}

pub fn get_writer(output_path: &Option<PathBuf>) -> Result<Box<dyn Write>, CliError> {
    match output_path {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| CliError::Io {
                path: path.clone(),
                source: e,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

pub fn write_scan(
    mut writer: Box<dyn Write>,
    context: &ReportContext,
    results: &ScanResults,
) -> Result<(), CliError> {
    match context.format {
        OutputFormat::Pretty => write_scan_pretty(&mut writer, context, results),
        OutputFormat::Csv => write_scan_csv(&mut writer, context, results),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, results)?;
            writeln!(writer)?;
            Ok(())
        }
    }?;
    writer.flush()?;
    Ok(())
}

pub fn write_optimization(
    mut writer: Box<dyn Write>,
    context: &ReportContext,
    target: &Target,
    direction: Direction,
    outcome: &OptimizationOutcome,
) -> Result<(), CliError> {
    match context.format {
        OutputFormat::Pretty => {
            write_optimization_pretty(&mut writer, context, target, direction, outcome)
        }
        OutputFormat::Csv => write_defects_csv(&mut writer, &outcome.result, context.precision),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, outcome)?;
            writeln!(writer)?;
            Ok(())
        }
    }?;
    writer.flush()?;
    Ok(())
}

fn box_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .column_separator('│')
        .borders('│')
        .separators(
            &[format::LinePosition::Top],
            format::LineSeparator::new('─', '┬', '╭', '╮'),
        )
        .separators(
            &[format::LinePosition::Title],
            format::LineSeparator::new('═', '╪', '╞', '╡'),
        )
        .separators(
            &[format::LinePosition::Intern],
            format::LineSeparator::new('─', '┼', '├', '┤'),
        )
        .separators(
            &[format::LinePosition::Bottom],
            format::LineSeparator::new('─', '┴', '╰', '╯'),
        )
        .padding(1, 1)
        .build()
}

fn summary_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .column_separator('│')
        .borders('│')
        .separators(
            &[format::LinePosition::Top],
            format::LineSeparator::new('─', '┬', '╭', '╮'),
        )
        .separators(
            &[format::LinePosition::Bottom],
            format::LineSeparator::new('─', '┴', '╰', '╯'),
        )
        .padding(1, 1)
        .build()
}

fn write_title(writer: &mut dyn Write, title: &str) -> Result<(), CliError> {
    let mut title_table = Table::new();
    title_table.set_format(box_format());
    title_table.add_row(row![bc->title]);
    title_table.print(writer)?;
    writeln!(writer)?;
    Ok(())
}

fn system_label(system: &DefectSystem) -> String {
    system
        .name
        .clone()
        .unwrap_or_else(|| system.host.name.clone())
}

fn write_scan_pretty(
    writer: &mut dyn Write,
    context: &ReportContext,
    results: &ScanResults,
) -> Result<(), CliError> {
    let prec = context.precision;
    write_title(writer, "Defeq Defect Equilibrium Results")?;

    let mut summary_table = Table::new();
    summary_table.set_format(summary_format());
    summary_table.add_row(row![b->"Source File:", context.source_name]);
    summary_table.add_row(row![b->"System:", system_label(context.system)]);
    summary_table.add_row(row![b->"Defects:", context.system.defects.len()]);
    summary_table.add_row(row![b->"Points Solved:", format!("{} / {}", results.succeeded(), results.len())]);
    summary_table.add_row(row![b->"Failed Points:", results.failed()]);
    summary_table.add_row(row![b->"Cancelled Points:", results.cancelled()]);
    summary_table.print(writer)?;
    writeln!(writer)?;

    let mut carrier_table = Table::new();
    carrier_table.set_format(box_format());
    carrier_table.set_titles(row![
        bc->"#", bc->"Protocol", bc->"Chemical Potentials (eV)", bc->"E_F (eV)",
        bc->"n (cm^-3)", bc->"p (cm^-3)"
    ]);
    for (i, record) in results.records.iter().enumerate() {
        let label = record.chemical_potentials.label();
        match &record.outcome {
            PointOutcome::Ok { result } => carrier_table.add_row(row![
                r->i,
                l->record.protocol,
                l->label,
                r->format!("{:.prec$}", result.fermi_level),
                r->format!("{:.prec$e}", result.electron_concentration),
                r->format!("{:.prec$e}", result.hole_concentration)
            ]),
            PointOutcome::Failed { kind, .. } => carrier_table.add_row(row![
                r->i, l->record.protocol, l->label, r->format!("{kind:?}"), r->"-", r->"-"
            ]),
            PointOutcome::Cancelled => carrier_table.add_row(row![
                r->i, l->record.protocol, l->label, r->"cancelled", r->"-", r->"-"
            ]),
        };
    }
    carrier_table.print(writer)?;
    writeln!(writer)?;

    let mut defect_table = Table::new();
    defect_table.set_format(box_format());
    defect_table.set_titles(row![
        bc->"#", bc->"Defect", bc->"Charge", bc->"E_form (eV)", bc->"Concentration (cm^-3)"
    ]);
    for (i, record) in results.records.iter().enumerate() {
        let Some(result) = record.outcome.result() else {
            continue;
        };
        for d in &result.defects {
            defect_table.add_row(row![
                r->i,
                l->d.defect,
                r->format!("{:+}", d.charge),
                r->format!("{:.prec$}", d.formation_energy),
                r->format!("{:.prec$e}", d.concentration)
            ]);
        }
    }
    defect_table.print(writer)?;
    Ok(())
}

fn write_scan_csv(
    writer: &mut dyn Write,
    context: &ReportContext,
    results: &ScanResults,
) -> Result<(), CliError> {
    let prec = context.precision;
    let elements = context.system.chemical_elements();
    let mu_columns: Vec<String> = elements.iter().map(|e| format!("mu_{e}")).collect();
    writeln!(
        writer,
        "point,constraint_set,temperature,anneal_temperature,{},fermi_level,defect,charge,concentration",
        mu_columns.join(",")
    )?;
    for row in results.rows() {
        let mu: Vec<String> = elements
            .iter()
            .map(|e| {
                row.chemical_potentials
                    .get(e)
                    .map(|v| format!("{v:.prec$}"))
                    .unwrap_or_default()
            })
            .collect();
        writeln!(
            writer,
            "{},{},{},{},{},{:.prec$},{},{},{:.prec$e}",
            row.point_index,
            row.constraint_index,
            row.temperature,
            row.anneal_temperature
                .map(|t| t.to_string())
                .unwrap_or_default(),
            mu.join(","),
            row.fermi_level,
            row.defect,
            row.charge,
            row.concentration
        )?;
    }
    Ok(())
}

fn write_defects_csv(
    writer: &mut dyn Write,
    result: &EquilibriumResult,
    precision: usize,
) -> Result<(), CliError> {
    writeln!(writer, "defect,charge,formation_energy,concentration")?;
    for d in &result.defects {
        writeln!(
            writer,
            "{},{},{:.prec$},{:.prec$e}",
            d.defect,
            d.charge,
            d.formation_energy,
            d.concentration,
            prec = precision
        )?;
    }
    Ok(())
}

fn write_optimization_pretty(
    writer: &mut dyn Write,
    context: &ReportContext,
    target: &Target,
    direction: Direction,
    outcome: &OptimizationOutcome,
) -> Result<(), CliError> {
    let prec = context.precision;
    let result = &outcome.result;
    write_title(writer, "Defeq Chemical Potential Optimisation")?;

    let goal = match direction {
        Direction::Maximize => "maximise",
        Direction::Minimize => "minimise",
    };
    let mut summary_table = Table::new();
    summary_table.set_format(summary_format());
    summary_table.add_row(row![b->"Source File:", context.source_name]);
    summary_table.add_row(row![b->"System:", system_label(context.system)]);
    summary_table.add_row(row![b->"Objective:", format!("{goal} {target}")]);
    summary_table.add_row(row![b->"Optimum:", format!("{:.prec$e}", outcome.value)]);
    summary_table.add_row(row![b->"Best Grid Point:", format!("{:.prec$e}", outcome.seed_value)]);
    summary_table.add_row(row![b->"Grid Points:", outcome.grid_points]);
    summary_table.add_row(row![b->"Simplex Evaluations:", outcome.evaluations]);
    summary_table.add_row(row![b->"Converged:", outcome.converged]);
    summary_table.add_row(row![b->"Temperature:", format!("{} K", result.temperature)]);
    summary_table.add_row(row![b->"Chemical Potentials:", result.chemical_potentials.label()]);
    summary_table.add_row(row![b->"Fermi Level:", format!("{:.prec$} eV", result.fermi_level)]);
    summary_table.add_row(row![b->"Electrons:", format!("{:.prec$e} cm^-3", result.electron_concentration)]);
    summary_table.add_row(row![b->"Holes:", format!("{:.prec$e} cm^-3", result.hole_concentration)]);
    summary_table.print(writer)?;
    writeln!(writer)?;

    let mut defect_table = Table::new();
    defect_table.set_format(box_format());
    defect_table.set_titles(row![
        bc->"Defect", bc->"Charge", bc->"E_form (eV)", bc->"Concentration (cm^-3)"
    ]);
    for d in &result.defects {
        defect_table.add_row(row![
            l->d.defect,
            r->format!("{:+}", d.charge),
            r->format!("{:.prec$}", d.formation_energy),
            r->format!("{:.prec$e}", d.concentration)
        ]);
    }
    defect_table.print(writer)?;
    Ok(())
}
