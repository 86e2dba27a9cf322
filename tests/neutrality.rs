mod common;

use approx::assert_relative_eq;
use common::{
    CompensatedCase, KB, reference_point, run_compensated_group, symmetric_bands, vacancy,
};
use defeq::{
    ChargeNeutralitySolver, Constraints, DefeqError, SiteCompetition, SolverOptions,
    example_system,
};
use proptest::prelude::*;

#[test]
fn test_compensated_fermi_levels_match_closed_form() {
    let cases = vec![
        CompensatedCase {
            name: "symmetric",
            temperature: 500.0,
            donor_energy: -1.5,
            acceptor_energy: 4.5,
            donor_sites: 1e22,
            acceptor_sites: 1e22,
            donor_degeneracy: 1.0,
        },
        CompensatedCase {
            name: "site ratio 4:1",
            temperature: 800.0,
            donor_energy: -1.5,
            acceptor_energy: 4.5,
            donor_sites: 4e22,
            acceptor_sites: 1e22,
            donor_degeneracy: 1.0,
        },
        CompensatedCase {
            name: "spin-degenerate donor",
            temperature: 600.0,
            donor_energy: -1.0,
            acceptor_energy: 4.0,
            donor_sites: 1e22,
            acceptor_sites: 1e22,
            donor_degeneracy: 2.0,
        },
        CompensatedCase {
            name: "room temperature",
            temperature: 300.0,
            donor_energy: -2.0,
            acceptor_energy: 4.0,
            donor_sites: 1e22,
            acceptor_sites: 1e22,
            donor_degeneracy: 1.0,
        },
    ];
    run_compensated_group("Compensated donor/acceptor", cases, 1e-8);
}

#[test]
fn test_amphoteric_defect_in_a_narrow_gap() {
    // Donor and acceptor levels sit symmetrically about mid-gap and the bands are symmetric, so
    // the defect and carrier balances vanish at the same Fermi level.
    let defects = vec![vacancy("X", &[(1, 0.5), (0, 1.0), (-1, 2.0)], 1e22)];
    let bands = symmetric_bands(1.5);
    let result = ChargeNeutralitySolver::new(&defects, &bands)
        .solve(300.0, &reference_point(), &Constraints::new())
        .unwrap();

    assert!(result.fermi_level > 0.0 && result.fermi_level < 1.5);
    assert_relative_eq!(result.fermi_level, 0.75, epsilon = 1e-6);
    assert!(result.relative_residual.abs() <= 1e-10 || result.residual_charge.abs() <= 1e-6);
    assert_relative_eq!(
        result.electron_concentration,
        result.hole_concentration,
        max_relative = 1e-6
    );
    let expected_carriers = 2.509e19 * (-0.75 / (KB * 300.0)).exp();
    assert_relative_eq!(
        result.electron_concentration,
        expected_carriers,
        max_relative = 1e-2
    );
    assert_relative_eq!(
        result.charge_state_concentration("X", 1).unwrap(),
        result.charge_state_concentration("X", -1).unwrap(),
        max_relative = 1e-6
    );
}

#[test]
fn test_deeper_donor_never_adds_electrons() {
    let bands = symmetric_bands(1.5);
    let point = reference_point();

    println!("\n{:<12} | {:<10} | {:<12}", "E_D (eV)", "E_F (eV)", "n (cm^-3)");
    let mut previous: Option<(f64, f64)> = None;
    for step in 0..=15 {
        let donor_energy = -0.5 + 0.1 * step as f64;
        let defects = vec![
            vacancy("D", &[(1, donor_energy), (0, donor_energy + 1.2)], 1e21),
            vacancy("A", &[(-1, 1.6), (0, 0.9)], 1e21),
        ];
        let result = ChargeNeutralitySolver::new(&defects, &bands)
            .solve(600.0, &point, &Constraints::new())
            .unwrap();
        println!(
            "{:<12.2} | {:<10.6} | {:<12.4e}",
            donor_energy, result.fermi_level, result.electron_concentration
        );

        if let Some((fermi_level, electrons)) = previous {
            assert!(result.fermi_level <= fermi_level + 1e-9);
            assert!(result.electron_concentration <= electrons * (1.0 + 1e-9));
        }
        previous = Some((result.fermi_level, result.electron_concentration));
    }
}

#[test]
fn test_example_system_is_neutral_at_every_vertex() {
    let system = example_system();
    let solver = system.equilibrium_solver().unwrap();

    for temperature in [300.0, 900.0, 1500.0] {
        for point in solver.space().vertices() {
            let result = solver
                .solve_point(temperature, point, &Constraints::new())
                .unwrap();

            assert!(result.fermi_level >= 0.0 && result.fermi_level <= result.band_gap);
            let defect_charge = result.total_defect_charge();
            let net = result.hole_concentration - result.electron_concentration + defect_charge;
            let scale = result.hole_concentration
                + result.electron_concentration
                + result
                    .defects
                    .iter()
                    .map(|d| d.charge.abs() as f64 * d.concentration)
                    .sum::<f64>();
            assert!(
                net.abs() <= 1e-6 || net.abs() <= 1e-9 * scale,
                "net charge {net:e} at {} K, {}",
                temperature,
                point.label()
            );
            assert!((result.residual_charge - net).abs() <= 1e-6 + 1e-9 * scale);
        }
    }
}

#[test]
fn test_background_donors_raise_the_fermi_level() {
    let system = example_system();
    let solver = system.equilibrium_solver().unwrap();
    let point = &solver.space().vertices()[0];

    let intrinsic = solver
        .solve_point(600.0, point, &Constraints::new())
        .unwrap();
    let doped = solver
        .solve_point(
            600.0,
            point,
            &Constraints::new().with_background_charge(1e19),
        )
        .unwrap();
    assert!(doped.fermi_level > intrinsic.fermi_level);
    assert_eq!(doped.constraints.background_charge, 1e19);
}

#[test]
fn test_unbalanceable_background_fails_to_converge() {
    let system = example_system();
    let solver = system.equilibrium_solver().unwrap();
    let point = &solver.space().vertices()[0];
    let result = solver.solve_point(
        600.0,
        point,
        &Constraints::new().with_background_charge(1e30),
    );
    match result {
        Err(err @ DefeqError::NonConvergence { .. }) => assert!(err.is_point_failure()),
        other => panic!("expected non-convergence, got {other:?}"),
    }
}

#[test]
fn test_site_competition_strategies_agree_in_the_dilute_limit() {
    let system = example_system();
    let point = system
        .chemical_potential_space()
        .unwrap()
        .vertices()[0]
        .clone();
    let fermi_levels: Vec<f64> = [
        SiteCompetition::Dilute,
        SiteCompetition::Global,
        SiteCompetition::PerDefect,
    ]
    .into_iter()
    .map(|site_competition| {
        let options = SolverOptions {
            site_competition,
            ..SolverOptions::default()
        };
        ChargeNeutralitySolver::new(&system.defects, &system.bands)
            .with_options(options)
            .solve(300.0, &point, &Constraints::new())
            .unwrap()
            .fermi_level
    })
    .collect();
    for fermi_level in &fermi_levels[1..] {
        assert_relative_eq!(*fermi_level, fermi_levels[0], epsilon = 1e-6);
    }
}

proptest! {
    #[test]
    fn net_charge_never_increases_with_fermi_level(a in 0.0f64..3.0, b in 0.0f64..3.0) {
        let system = example_system();
        let point = system.chemical_potential_space().unwrap().vertices()[0].clone();
        let solver = ChargeNeutralitySolver::new(&system.defects, &system.bands);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let net_low = solver.net_charge(900.0, &point, &Constraints::new(), low).unwrap();
        let net_high = solver.net_charge(900.0, &point, &Constraints::new(), high).unwrap();
        prop_assert!(net_low >= net_high - 1e-9 * (net_low.abs() + net_high.abs()));
    }
}
