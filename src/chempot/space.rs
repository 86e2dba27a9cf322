use super::grid::Grid;
use super::triangulation::triangulate;
use crate::elements::{ElementMap, deserialize_element_map, is_element_symbol};
use crate::error::DefeqError;
use crate::math::constants::CHEMICAL_POTENTIAL_TOLERANCE;
use crate::types::ChemicalPotentialPoint;
use faer::{Col, Mat, prelude::*};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// A compound with its formation energy per formula unit, relative to the elemental phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    /// Atoms per formula unit.
    #[serde(deserialize_with = "deserialize_element_map")]
    pub composition: ElementMap,
    /// Formation energy (eV per formula unit).
    pub formation_energy: f64,
}

impl Phase {
    pub fn new<I, S>(name: impl Into<String>, composition: I, formation_energy: f64) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            composition: composition.into_iter().map(|(e, n)| (e.into(), n)).collect(),
            formation_energy,
        }
    }
}

/// Which end of an element's allowed range a limit selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// The vertex with the highest chemical potential of the element ("X-rich").
    Rich,
    /// The vertex with the lowest chemical potential of the element ("X-poor").
    Poor,
}

/// A half-space `a · x <= b` in the free coordinates.
#[derive(Debug, Clone)]
struct HalfSpace {
    normal: Vec<f64>,
    bound: f64,
}

impl HalfSpace {
    fn evaluate(&self, x: &[f64]) -> f64 {
        self.normal.iter().zip(x).map(|(a, v)| a * v).sum()
    }
}

/// Slack allowed when comparing an energy against `reference`, in eV.
fn tolerance(reference: f64) -> f64 {
    CHEMICAL_POTENTIAL_TOLERANCE * (1.0 + reference.abs())
}

/// `value <= bound`, up to [`tolerance`].
fn within(value: f64, bound: f64) -> bool {
    value <= bound + tolerance(bound)
}

/// The convex polytope of chemical potentials at which the host is stable.
///
/// Each element's chemical potential is at most zero (its elemental phase is stable), the host
/// sits on its formation enthalpy `Σ c_e μ_e = ΔH_host`, and no competing phase may be more
/// stable than its own formation energy. Elements that do not appear in the host need an explicit
/// lower bound to keep the region bounded.
///
/// The host equality removes one element from the search: the last host element (in symbol order)
/// is dependent and the remaining `n - 1` chemical potentials are the free coordinates. Vertices
/// are enumerated and the polytope is triangulated once, at construction.
#[derive(Debug, Clone)]
pub struct ChemicalPotentialSpace {
    elements: Vec<String>,
    host: Phase,
    competing: Vec<Phase>,
    lower_bounds: ElementMap,
    dependent: usize,
    half_spaces: Vec<HalfSpace>,
    vertices: Vec<ChemicalPotentialPoint>,
    simplices: Vec<Vec<usize>>,
}

impl ChemicalPotentialSpace {
    /// Builds the space and enumerates its vertices.
    ///
    /// `elements` defaults to the union of the host and competing-phase compositions when empty.
    ///
    /// # Errors
    ///
    /// `UnknownElement` for a symbol that is not a chemical element or not part of `elements`,
    /// `UnboundedChemicalPotential` for an element absent from the host without a lower bound,
    /// `EmptyChemicalPotentialSpace` if the host is unstable against its competing phases, and
    /// `InvalidConfiguration` for a malformed host.
    pub fn new(
        elements: &[String],
        host: Phase,
        competing: Vec<Phase>,
        lower_bounds: ElementMap,
    ) -> Result<Self, DefeqError> {
        let mut elements: Vec<String> = if elements.is_empty() {
            host.composition
                .keys()
                .chain(competing.iter().flat_map(|p| p.composition.keys()))
                .cloned()
                .collect()
        } else {
            elements.to_vec()
        };
        elements.sort();
        elements.dedup();

        for element in &elements {
            if !is_element_symbol(element) {
                return Err(DefeqError::UnknownElement(element.clone()));
            }
        }
        for phase in std::iter::once(&host).chain(&competing) {
            if let Some(element) = phase.composition.keys().find(|e| !elements.contains(*e)) {
                return Err(DefeqError::UnknownElement(element.clone()));
            }
            if phase.composition.values().any(|n| !(*n >= 0.0 && n.is_finite())) {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "composition of '{}' must be non-negative",
                    phase.name
                )));
            }
            if !phase.formation_energy.is_finite() {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "formation energy of '{}' must be finite",
                    phase.name
                )));
            }
        }
        if let Some(element) = lower_bounds.keys().find(|e| !elements.contains(*e)) {
            return Err(DefeqError::UnknownElement(element.clone()));
        }

        let coefficient = |element: &str| host.composition.get(element).copied().unwrap_or(0.0);
        for element in &elements {
            if coefficient(element) == 0.0 && !lower_bounds.contains_key(element) {
                return Err(DefeqError::UnboundedChemicalPotential(element.clone()));
            }
        }
        let dependent = elements
            .iter()
            .rposition(|e| coefficient(e) > 0.0)
            .ok_or_else(|| {
                DefeqError::InvalidConfiguration(format!(
                    "host '{}' has an empty composition",
                    host.name
                ))
            })?;

        let mut space = Self {
            elements,
            host,
            competing,
            lower_bounds,
            dependent,
            half_spaces: Vec::new(),
            vertices: Vec::new(),
            simplices: Vec::new(),
        };
        space.half_spaces = space.build_half_spaces();
        let free = space.enumerate_vertices()?;
        space.simplices = triangulate(free.len(), &space.tight_sets(&free));
        space.vertices = free
            .iter()
            .map(|x| space.point(&space.full_coordinates(x)))
            .collect();
        debug!(
            host = %space.host.name,
            vertices = space.vertices.len(),
            simplices = space.simplices.len(),
            "chemical potential space constructed"
        );
        Ok(space)
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn host(&self) -> &Phase {
        &self.host
    }

    pub fn competing_phases(&self) -> &[Phase] {
        &self.competing
    }

    pub fn lower_bounds(&self) -> &ElementMap {
        &self.lower_bounds
    }

    /// Extreme points of the polytope, deduplicated and in a deterministic order.
    pub fn vertices(&self) -> &[ChemicalPotentialPoint] {
        &self.vertices
    }

    /// Simplices of the polytope's triangulation, as ascending indices into [`vertices`].
    ///
    /// [`vertices`]: Self::vertices
    pub fn simplices(&self) -> &[Vec<usize>] {
        &self.simplices
    }

    /// A restartable sequence of barycentric combinations of the vertices at `resolution`
    /// subdivisions per simplex edge. A resolution of zero is treated as one.
    pub fn grid(&self, resolution: usize) -> Grid<'_> {
        Grid::new(&self.vertices, &self.simplices, resolution)
    }

    /// `true` if `point` satisfies every constraint within tolerance.
    pub fn contains(&self, point: &ChemicalPotentialPoint) -> bool {
        self.validate(point).is_ok()
    }

    /// Checks that `point` defines exactly the space's elements and lies in the polytope.
    ///
    /// Every comparison uses the same tolerance as vertex enumeration, so each vertex and every
    /// grid point validates.
    ///
    /// # Errors
    ///
    /// `UnknownElement` for a chemical potential of an element outside the space, and
    /// `DomainViolation` naming the first violated constraint otherwise.
    pub fn validate(&self, point: &ChemicalPotentialPoint) -> Result<(), DefeqError> {
        if let Some((element, _)) = point
            .iter()
            .find(|(element, _)| !self.elements.iter().any(|e| e == element))
        {
            return Err(DefeqError::UnknownElement(element.to_string()));
        }
        let mut mu = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            let value = point.get(element).ok_or_else(|| {
                DefeqError::DomainViolation(format!("no chemical potential for '{element}'"))
            })?;
            if !value.is_finite() {
                return Err(DefeqError::DomainViolation(format!(
                    "chemical potential of '{element}' is not finite"
                )));
            }
            mu.push(value);
        }

        for (element, value) in self.elements.iter().zip(&mu) {
            if !within(*value, 0.0) {
                return Err(DefeqError::DomainViolation(format!(
                    "μ_{element} = {value:.6} eV lies above its elemental phase"
                )));
            }
            if let Some(bound) = self.lower_bounds.get(element) {
                if !within(-value, -bound) {
                    return Err(DefeqError::DomainViolation(format!(
                        "μ_{element} = {value:.6} eV lies below its lower bound {bound:.6} eV"
                    )));
                }
            }
        }

        let host_energy = self.phase_energy(&self.host, &mu);
        let offset = host_energy - self.host.formation_energy;
        if offset.abs() > tolerance(self.host.formation_energy) {
            return Err(DefeqError::DomainViolation(format!(
                "point is off the {} equilibrium plane by {offset:.6} eV",
                self.host.name
            )));
        }
        for phase in &self.competing {
            let energy = self.phase_energy(phase, &mu);
            if !within(energy, phase.formation_energy) {
                return Err(DefeqError::DomainViolation(format!(
                    "competing phase {} is stable by {:.6} eV",
                    phase.name,
                    energy - phase.formation_energy
                )));
            }
        }
        Ok(())
    }

    /// The vertex at the rich or poor end of `element`'s range.
    ///
    /// Ties are broken by the deterministic vertex order.
    pub fn limit(&self, element: &str, limit: Limit) -> Result<&ChemicalPotentialPoint, DefeqError> {
        if !self.elements.iter().any(|e| e == element) {
            return Err(DefeqError::UnknownElement(element.to_string()));
        }
        let value = |p: &ChemicalPotentialPoint| p.get(element).unwrap_or(0.0);
        let pick = |best: &ChemicalPotentialPoint, candidate: &ChemicalPotentialPoint| {
            let delta = value(candidate) - value(best);
            match limit {
                Limit::Rich => delta > CHEMICAL_POTENTIAL_TOLERANCE,
                Limit::Poor => delta < -CHEMICAL_POTENTIAL_TOLERANCE,
            }
        };
        let mut vertices = self.vertices.iter();
        let first = vertices.next().ok_or(DefeqError::EmptyChemicalPotentialSpace)?;
        Ok(vertices.fold(first, |best, candidate| {
            if pick(best, candidate) { candidate } else { best }
        }))
    }

    fn phase_energy(&self, phase: &Phase, mu: &[f64]) -> f64 {
        self.elements
            .iter()
            .zip(mu)
            .map(|(e, m)| phase.composition.get(e).copied().unwrap_or(0.0) * m)
            .sum()
    }

    /// The dependent chemical potential as `offset + slope · x` over the free coordinates.
    fn dependent_form(&self) -> (f64, Vec<f64>) {
        let c_dep = self.host.composition[&self.elements[self.dependent]];
        let slope = self
            .free_elements()
            .map(|e| -self.host.composition.get(e).copied().unwrap_or(0.0) / c_dep)
            .collect();
        (self.host.formation_energy / c_dep, slope)
    }

    fn free_elements(&self) -> impl Iterator<Item = &String> {
        self.elements
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.dependent)
            .map(|(_, e)| e)
    }

    /// Expresses every stability condition as a half-space in the free coordinates.
    fn build_half_spaces(&self) -> Vec<HalfSpace> {
        let d = self.elements.len() - 1;
        let (offset, slope) = self.dependent_form();
        let dependent = &self.elements[self.dependent];
        let mut half_spaces = Vec::new();

        // Linear form Σ_e k_e μ_e <= rhs rewritten for the free coordinates.
        let mut push = |coefficients: &dyn Fn(&str) -> f64, rhs: f64| {
            let k_dep = coefficients(dependent);
            let normal: Vec<f64> = self
                .free_elements()
                .zip(&slope)
                .map(|(e, s)| coefficients(e) + k_dep * s)
                .collect();
            debug_assert_eq!(normal.len(), d);
            half_spaces.push(HalfSpace {
                normal,
                bound: rhs - k_dep * offset,
            });
        };

        for element in &self.elements {
            push(&|e: &str| if e == element.as_str() { 1.0 } else { 0.0 }, 0.0);
        }
        for (element, bound) in &self.lower_bounds {
            push(&|e: &str| if e == element.as_str() { -1.0 } else { 0.0 }, -bound);
        }
        for phase in &self.competing {
            push(
                &|e: &str| phase.composition.get(e).copied().unwrap_or(0.0),
                phase.formation_energy,
            );
        }
        half_spaces
    }

    /// Free coordinates of the polytope's vertices, deduplicated and sorted by their full
    /// chemical potentials.
    fn enumerate_vertices(&self) -> Result<Vec<Vec<f64>>, DefeqError> {
        let d = self.elements.len() - 1;
        let mut candidates: Vec<Vec<f64>> = Vec::new();

        if d == 0 {
            candidates.push(Vec::new());
        } else {
            for subset in Combinations::new(self.half_spaces.len(), d) {
                if let Some(x) = self.intersect(&subset) {
                    candidates.push(x);
                }
            }
        }

        let mut vertices: Vec<(Vec<f64>, Vec<f64>)> = Vec::new();
        for x in candidates {
            if !self.feasible(&x) {
                continue;
            }
            let mu = self.full_coordinates(&x);
            if !vertices.iter().any(|(_, v)| same_point(v, &mu)) {
                vertices.push((x, mu));
            }
        }
        if vertices.is_empty() {
            return Err(DefeqError::EmptyChemicalPotentialSpace);
        }
        vertices.sort_by(|(_, a), (_, b)| lexicographic(a, b));
        Ok(vertices.into_iter().map(|(x, _)| x).collect())
    }

    fn point(&self, mu: &[f64]) -> ChemicalPotentialPoint {
        ChemicalPotentialPoint::new(
            self.elements
                .iter()
                .zip(mu)
                .map(|(e, m)| (e.clone(), clean_zero(*m))),
        )
    }

    /// For each half-space, the vertices lying on its boundary.
    fn tight_sets(&self, vertices: &[Vec<f64>]) -> Vec<Vec<usize>> {
        self.half_spaces
            .iter()
            .map(|h| {
                vertices
                    .iter()
                    .enumerate()
                    .filter(|(_, x)| (h.evaluate(x) - h.bound).abs() <= tolerance(h.bound))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect()
    }

    /// Solves the square system of the selected half-spaces taken as equalities.
    fn intersect(&self, subset: &[usize]) -> Option<Vec<f64>> {
        let d = subset.len();
        let mut matrix = Mat::zeros(d, d);
        let mut rhs = Col::zeros(d);
        for (row, &h) in subset.iter().enumerate() {
            let half_space = &self.half_spaces[h];
            for (col, a) in half_space.normal.iter().enumerate() {
                matrix[(row, col)] = *a;
            }
            rhs[row] = half_space.bound;
        }

        let solution = panic::catch_unwind(AssertUnwindSafe(|| matrix.partial_piv_lu().solve(&rhs)))
            .ok()?;
        let x: Vec<f64> = solution.as_ref().iter().copied().collect();
        if x.iter().any(|v| !v.is_finite()) {
            return None;
        }

        // Singular systems can yield finite garbage; keep only genuine intersections.
        let consistent = subset.iter().all(|&h| {
            let half_space = &self.half_spaces[h];
            let lhs = half_space.evaluate(&x);
            (lhs - half_space.bound).abs() <= 1e-7 * (1.0 + half_space.bound.abs())
        });
        consistent.then_some(x)
    }

    fn feasible(&self, x: &[f64]) -> bool {
        self.half_spaces
            .iter()
            .all(|h| within(h.evaluate(x), h.bound))
    }

    fn full_coordinates(&self, x: &[f64]) -> Vec<f64> {
        let (offset, slope) = self.dependent_form();
        let dependent = offset + slope.iter().zip(x).map(|(s, v)| s * v).sum::<f64>();
        let mut free = x.iter();
        (0..self.elements.len())
            .map(|i| {
                if i == self.dependent {
                    dependent
                } else {
                    free.next().copied().unwrap_or(0.0)
                }
            })
            .collect()
    }
}

fn same_point(a: &[f64], b: &[f64]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= CHEMICAL_POTENTIAL_TOLERANCE)
}

fn lexicographic(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Snaps round-off around zero (including `-0.0`) to exactly zero.
fn clean_zero(value: f64) -> f64 {
    if value.abs() < 1e-12 { 0.0 } else { value }
}

/// Lexicographic `k`-subsets of `0..n`.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();
        let k = self.indices.len();
        match (0..k).rev().find(|&i| self.indices[i] < self.n - k + i) {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn zno(competing: Vec<Phase>) -> Result<ChemicalPotentialSpace, DefeqError> {
        ChemicalPotentialSpace::new(
            &[],
            Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            competing,
            ElementMap::new(),
        )
    }

    #[test]
    fn test_combinations_are_lexicographic() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(2, 3).count(), 0);
        assert_eq!(Combinations::new(3, 0).count(), 1);
    }

    #[test]
    fn test_binary_host_has_rich_and_poor_vertices() {
        let space = zno(Vec::new()).unwrap();
        let vertices = space.vertices();
        assert_eq!(vertices.len(), 2);
        // Sorted by (O, Zn): O-poor first.
        assert_relative_eq!(vertices[0].get("O").unwrap(), -3.6, epsilon = 1e-10);
        assert_relative_eq!(vertices[0].get("Zn").unwrap(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(vertices[1].get("O").unwrap(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(vertices[1].get("Zn").unwrap(), -3.6, epsilon = 1e-10);

        let rich = space.limit("O", Limit::Rich).unwrap();
        assert_eq!(rich, &vertices[1]);
        let poor = space.limit("O", Limit::Poor).unwrap();
        assert_eq!(poor, &vertices[0]);
    }

    #[test]
    fn test_competing_phase_cuts_the_range() {
        let space = zno(vec![Phase::new("ZnO2", [("Zn", 1.0), ("O", 2.0)], -4.0)]).unwrap();
        // ZnO2 limits μ_O <= -0.4 on the ZnO line.
        let rich = space.limit("O", Limit::Rich).unwrap();
        assert_relative_eq!(rich.get("O").unwrap(), -0.4, epsilon = 1e-9);
        assert_relative_eq!(rich.get("Zn").unwrap(), -3.2, epsilon = 1e-9);
        for vertex in space.vertices() {
            assert!(space.contains(vertex));
        }
    }

    #[test]
    fn test_unstable_host_is_empty() {
        let result = zno(vec![Phase::new("ZnO2", [("Zn", 1.0), ("O", 2.0)], -8.0)]);
        assert!(matches!(
            result,
            Err(DefeqError::EmptyChemicalPotentialSpace)
        ));
    }

    #[test]
    fn test_dopant_needs_a_lower_bound() {
        let result = ChemicalPotentialSpace::new(
            &["Zn".to_string(), "O".to_string(), "Ga".to_string()],
            Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            Vec::new(),
            ElementMap::new(),
        );
        assert!(matches!(
            result,
            Err(DefeqError::UnboundedChemicalPotential(e)) if e == "Ga"
        ));

        let bounded = ChemicalPotentialSpace::new(
            &["Zn".to_string(), "O".to_string(), "Ga".to_string()],
            Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            vec![Phase::new("Ga2O3", [("Ga", 2.0), ("O", 3.0)], -11.3)],
            ElementMap::from([("Ga".to_string(), -8.0)]),
        )
        .unwrap();
        for vertex in bounded.vertices() {
            assert!(bounded.contains(vertex));
        }
        let ga_rich = bounded.limit("Ga", Limit::Rich).unwrap();
        // O-poor end: μ_O = -3.6, so 2 μ_Ga <= -11.3 + 10.8.
        assert_relative_eq!(ga_rich.get("Ga").unwrap(), -0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_elemental_host_is_a_single_point() {
        let space = ChemicalPotentialSpace::new(
            &[],
            Phase::new("Si", [("Si", 1.0)], 0.0),
            Vec::new(),
            ElementMap::new(),
        )
        .unwrap();
        assert_eq!(space.vertices().len(), 1);
        assert_eq!(space.vertices()[0].get("Si"), Some(0.0));
        assert_eq!(space.grid(5).count(), 1);
    }

    #[test]
    fn test_validate_reports_domain_violations() {
        let space = zno(Vec::new()).unwrap();
        let inside = ChemicalPotentialPoint::new([("O", -1.0), ("Zn", -2.6)]);
        assert!(space.validate(&inside).is_ok());

        let above = ChemicalPotentialPoint::new([("O", 0.5), ("Zn", -4.1)]);
        assert!(matches!(
            space.validate(&above),
            Err(DefeqError::DomainViolation(_))
        ));
        let off_plane = ChemicalPotentialPoint::new([("O", -1.0), ("Zn", -1.0)]);
        assert!(!space.contains(&off_plane));
        let missing = ChemicalPotentialPoint::new([("O", -1.0)]);
        assert!(!space.contains(&missing));
    }

    #[test]
    fn test_validate_rejects_elements_outside_the_space() {
        let space = zno(Vec::new()).unwrap();
        let doped = ChemicalPotentialPoint::new([("Ga", -1.0), ("O", -1.0), ("Zn", -2.6)]);
        assert!(matches!(
            space.validate(&doped),
            Err(DefeqError::UnknownElement(e)) if e == "Ga"
        ));
    }

    #[test]
    fn test_validate_scales_tolerance_like_vertex_enumeration() {
        // A large formation energy widens the slack on the host plane and competing phases
        // exactly as it does for the feasibility test used on vertices.
        let space = ChemicalPotentialSpace::new(
            &[],
            Phase::new("Zn3O3", [("Zn", 3.0), ("O", 3.0)], -1200.0),
            vec![Phase::new("ZnO2", [("Zn", 1.0), ("O", 2.0)], -500.0)],
            ElementMap::new(),
        )
        .unwrap();
        for vertex in space.vertices() {
            assert!(space.contains(vertex));
        }
        // At the O-rich end ZnO2 is exactly marginal; 1e-6 eV more oxygen leaves the host plane
        // by 3e-6 eV and ZnO2 by 2e-6 eV, both inside the slack of their large energies.
        let o_rich = space.limit("O", Limit::Rich).unwrap();
        assert_relative_eq!(o_rich.get("O").unwrap(), -100.0, epsilon = 1e-9);
        let nudged = ChemicalPotentialPoint::new([
            ("O", o_rich.get("O").unwrap() + 1e-6),
            ("Zn", o_rich.get("Zn").unwrap()),
        ]);
        assert!(space.contains(&nudged));
        let shifted = ChemicalPotentialPoint::new([
            ("O", o_rich.get("O").unwrap() + 1e-3),
            ("Zn", o_rich.get("Zn").unwrap()),
        ]);
        assert!(matches!(
            space.validate(&shifted),
            Err(DefeqError::DomainViolation(_))
        ));
    }

    #[test]
    fn test_polytope_is_triangulated_over_its_vertices() {
        let space = ChemicalPotentialSpace::new(
            &["Zn".to_string(), "O".to_string(), "Ga".to_string()],
            Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            vec![Phase::new("Ga2O3", [("Ga", 2.0), ("O", 3.0)], -11.3)],
            ElementMap::from([("Ga".to_string(), -8.0)]),
        )
        .unwrap();
        let vertices = space.vertices().len();
        assert_eq!(space.simplices().len(), vertices - 2);
        for simplex in space.simplices() {
            assert_eq!(simplex.len(), 3);
            assert!(simplex.windows(2).all(|w| w[0] < w[1]));
            assert!(simplex.iter().all(|v| *v < vertices));
        }
    }

    #[test]
    fn test_unknown_element_in_phase_is_rejected() {
        let result = ChemicalPotentialSpace::new(
            &["Zn".to_string(), "O".to_string()],
            Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            vec![Phase::new("ZnS", [("Zn", 1.0), ("S", 1.0)], -2.0)],
            ElementMap::new(),
        );
        assert!(matches!(result, Err(DefeqError::UnknownElement(e)) if e == "S"));
    }
}
