#![allow(dead_code)]

use defeq::{
    BandGapModel, ChargeNeutralitySolver, ChargeStateRecord, ChemicalPotentialPoint, Constraints,
    DefectKind, DefectRecord, Degeneracy, DensityOfStates, ElectronicBandParameters, ScanResults,
};

/// Boltzmann constant in eV/K, kept local so the expectations do not reuse library constants.
pub const KB: f64 = 8.617333262e-5;

/// A single-donor/single-acceptor system whose Fermi level has a closed form.
///
/// With a wide gap the carriers are negligible and neutrality reduces to
/// `g_d N_d exp(-(a + E_F)/kT) = g_a N_a exp(-(b - E_F)/kT)`, so
/// `E_F = (b - a)/2 + kT/2 · ln(g_d N_d / g_a N_a)`.
pub struct CompensatedCase<'a> {
    pub name: &'a str,
    pub temperature: f64,
    pub donor_energy: f64,
    pub acceptor_energy: f64,
    pub donor_sites: f64,
    pub acceptor_sites: f64,
    pub donor_degeneracy: f64,
}

impl CompensatedCase<'_> {
    pub fn defects(&self) -> Vec<DefectRecord> {
        vec![
            DefectRecord::new(
                "D",
                DefectKind::Vacancy {
                    element: "O".into(),
                },
            )
            .with_charge_state(
                ChargeStateRecord::new(1, self.donor_energy, self.donor_sites)
                    .with_degeneracy(Degeneracy::new(1.0, self.donor_degeneracy)),
            ),
            DefectRecord::new(
                "A",
                DefectKind::Vacancy {
                    element: "Zn".into(),
                },
            )
            .with_charge_state(ChargeStateRecord::new(
                -1,
                self.acceptor_energy,
                self.acceptor_sites,
            )),
        ]
    }

    pub fn expected_fermi_level(&self) -> f64 {
        let kt = KB * self.temperature;
        (self.acceptor_energy - self.donor_energy) / 2.0
            + kt / 2.0
                * (self.donor_degeneracy * self.donor_sites / self.acceptor_sites).ln()
    }
}

/// Parabolic bands with unit effective masses, so `n = p` exactly at mid-gap.
pub fn symmetric_bands(gap: f64) -> ElectronicBandParameters {
    ElectronicBandParameters::new(
        0.0,
        BandGapModel::Constant { gap },
        DensityOfStates::EffectiveMass {
            electron_mass: 1.0,
            hole_mass: 1.0,
        },
    )
}

pub fn wide_gap_bands() -> ElectronicBandParameters {
    symmetric_bands(6.0)
}

/// An oxygen vacancy with the given `(charge, reference energy)` states on `sites` per cm^3.
pub fn vacancy(name: &str, states: &[(i32, f64)], sites: f64) -> DefectRecord {
    states.iter().fold(
        DefectRecord::new(
            name,
            DefectKind::Vacancy {
                element: "O".into(),
            },
        ),
        |record, &(charge, energy)| {
            record.with_charge_state(ChargeStateRecord::new(charge, energy, sites))
        },
    )
}

pub fn reference_point() -> ChemicalPotentialPoint {
    ChemicalPotentialPoint::new([("O", 0.0), ("Zn", 0.0)])
}

pub fn run_compensated_group(group_name: &str, cases: Vec<CompensatedCase>, max_error: f64) {
    let bands = wide_gap_bands();
    let point = reference_point();

    let mut group_max_error: f64 = 0.0;

    println!("\nRunning Group Test: {}", group_name);
    println!("{:-<80}", "");
    println!(
        "{:<24} | {:<8} | {:<12} | {:<12}",
        "Case", "T (K)", "Expected", "Calculated"
    );

    for case in &cases {
        let defects = case.defects();
        let solver = ChargeNeutralitySolver::new(&defects, &bands);
        let result = solver
            .solve(case.temperature, &point, &Constraints::new())
            .expect("Solver failed");
        let expected = case.expected_fermi_level();
        let error = (result.fermi_level - expected).abs();

        println!(
            "{:<24} | {:<8} | {:<12.8} | {:<12.8} (Err: {:.2e})",
            case.name, case.temperature, expected, result.fermi_level, error
        );
        group_max_error = group_max_error.max(error);
    }

    println!("{:-<80}", "");
    println!(
        "  Group Max Error: {:.2e} eV (Limit: {:.2e})",
        group_max_error, max_error
    );
    println!("{:-<80}\n", "");

    assert!(
        group_max_error <= max_error,
        "Group maximum error {:.3e} exceeds limit {:.3e}",
        group_max_error,
        max_error
    );
}

pub fn print_scan(title: &str, results: &ScanResults) {
    println!("\n{}", title);
    println!("{:-<96}", "");
    println!(
        "{:<4} | {:<22} | {:<30} | {:<10} | {:<10}",
        "#", "Protocol", "Chemical potentials", "E_F (eV)", "n (cm^-3)"
    );
    for (i, record) in results.records.iter().enumerate() {
        let label = record.chemical_potentials.label();
        match record.outcome.result() {
            Some(result) => println!(
                "{:<4} | {:<22} | {:<30} | {:<10.4} | {:<10.3e}",
                i,
                record.protocol.to_string(),
                label,
                result.fermi_level,
                result.electron_concentration
            ),
            None => println!(
                "{:<4} | {:<22} | {:<30} | {:?}",
                i,
                record.protocol.to_string(),
                label,
                record.outcome
            ),
        }
    }
    println!(
        "{} solved, {} failed, {} cancelled",
        results.succeeded(),
        results.failed(),
        results.cancelled()
    );
    println!("{:-<96}\n", "");
}
