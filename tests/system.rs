use defeq::{DefeqError, DefectSystem, SiteCompetition, example_system};
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

const BINARY_SYSTEM: &str = r#"
name = "ZnO (intrinsic)"

[bands]
vbm = 0.0
band_gap = { model = "constant", gap = 3.4 }
density_of_states = { model = "effective_mass", electron_mass = 0.24, hole_mass = 0.59 }

[host]
name = "ZnO"
composition = { Zn = 1.0, O = 1.0 }
formation_energy = -3.6

[solver]
site_competition = "dilute"

[[defects]]
name = "v_O"
kind = { type = "vacancy", element = "O" }

[[defects.charge_states]]
charge = 2
reference_energy = 0.2
site_density = 4.2e22

[[defects.charge_states]]
charge = 0
reference_energy = 4.6
site_density = 4.2e22
"#;

#[test]
fn test_load_toml_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(BINARY_SYSTEM.as_bytes()).unwrap();

    let system = DefectSystem::load_from_file(file.path()).unwrap();
    assert_eq!(system.name.as_deref(), Some("ZnO (intrinsic)"));
    assert_eq!(system.defects.len(), 1);
    assert_eq!(system.defects[0].charge_states().len(), 2);
    assert_eq!(system.solver.site_competition, SiteCompetition::Dilute);
    assert_eq!(system.chemical_elements(), vec!["O", "Zn"]);

    let state = &system.defects[0].charge_states()[0];
    assert_eq!(state.stoichiometry_delta().get("O"), Some(&1.0));
}

#[test]
fn test_json_file_round_trip() {
    let original = example_system();
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(original.to_json_string().unwrap().as_bytes())
        .unwrap();

    let reloaded = DefectSystem::load_from_file(file.path()).unwrap();
    assert_eq!(&reloaded, original);
}

#[test]
fn test_extension_selects_the_format() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(example_system().to_json_string().unwrap().as_bytes())
        .unwrap();
    assert!(matches!(
        DefectSystem::load_from_file(file.path()),
        Err(DefeqError::TomlDeserialization(_))
    ));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match DefectSystem::load_from_file(&path) {
        Err(DefeqError::IoError { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}

#[test]
fn test_loaded_system_solves() {
    let system = DefectSystem::load_from_str(BINARY_SYSTEM).unwrap();
    let solver = system.equilibrium_solver().unwrap();
    assert_eq!(solver.space().vertices().len(), 2);
    for point in solver.space().vertices() {
        let result = solver
            .solve_point(1000.0, point, &defeq::Constraints::new())
            .unwrap();
        assert!(result.defect_total("v_O").unwrap() > 0.0);
    }
}
