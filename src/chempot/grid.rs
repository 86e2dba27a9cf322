use crate::types::ChemicalPotentialPoint;

/// Barycentric sampling of a triangulated polytope with the weights of each grid point.
///
/// Every simplex of the triangulation is sampled at weights that are multiples of
/// `1 / resolution`, simplex by simplex and in a fixed order within each. A point on a face shared
/// by several simplices is yielded only by the first of them, so at most
/// `simplices · C(resolution + d, d)` points come out however many vertices the polytope has.
/// Weights are reported over all vertices. The iterator is finite; a clone resumes from the same
/// position and a fresh `grid()` call starts over.
#[derive(Debug, Clone)]
pub struct WeightedGrid<'a> {
    vertices: &'a [ChemicalPotentialPoint],
    simplices: &'a [Vec<usize>],
    resolution: usize,
    simplex: usize,
    weights: Option<Vec<usize>>,
}

impl<'a> WeightedGrid<'a> {
    fn new(
        vertices: &'a [ChemicalPotentialPoint],
        simplices: &'a [Vec<usize>],
        resolution: usize,
    ) -> Self {
        let mut grid = Self {
            vertices,
            simplices,
            resolution: resolution.max(1),
            simplex: 0,
            weights: None,
        };
        grid.weights = grid.first_composition();
        grid
    }

    fn first_composition(&self) -> Option<Vec<usize>> {
        let simplex = self.simplices.get(self.simplex)?;
        let mut w = vec![0; simplex.len()];
        *w.first_mut()? = self.resolution;
        Some(w)
    }

    /// Steps to the next composition of `resolution` over the current simplex, or to the first
    /// composition of the next simplex.
    fn advance(&mut self) {
        let Some(w) = self.weights.as_mut() else {
            return;
        };
        let last = w.len() - 1;
        let tail = w[last];
        w[last] = 0;
        match (0..last).rev().find(|&j| w[j] > 0) {
            Some(j) => {
                w[j] -= 1;
                w[j + 1] = tail + 1;
            }
            None => {
                self.simplex += 1;
                self.weights = self.first_composition();
            }
        }
    }

    /// `true` if an earlier simplex contains every vertex the composition uses.
    fn seen_before(&self, simplex: &[usize], weights: &[usize]) -> bool {
        let support: Vec<usize> = simplex
            .iter()
            .zip(weights)
            .filter(|(_, w)| **w > 0)
            .map(|(v, _)| *v)
            .collect();
        self.simplices[..self.simplex]
            .iter()
            .any(|earlier| support.iter().all(|v| earlier.binary_search(v).is_ok()))
    }

    fn full_weights(&self, simplex: &[usize], weights: &[usize]) -> Vec<f64> {
        let r = self.resolution as f64;
        let mut full = vec![0.0; self.vertices.len()];
        for (v, w) in simplex.iter().zip(weights) {
            full[*v] = *w as f64 / r;
        }
        full
    }
}

/// The point `Σ w_i v_i`. Vertices with zero weight contribute nothing, even if infinite.
pub(crate) fn barycentric(
    vertices: &[ChemicalPotentialPoint],
    weights: &[f64],
) -> ChemicalPotentialPoint {
    let Some(first) = vertices.first() else {
        return ChemicalPotentialPoint::default();
    };
    ChemicalPotentialPoint::new(first.iter().map(|(element, _)| {
        let mu = vertices
            .iter()
            .zip(weights)
            .filter(|(_, w)| **w > 0.0)
            .map(|(v, w)| w * v.get(element).unwrap_or(0.0))
            .sum::<f64>();
        (element.to_string(), mu)
    }))
}

impl Iterator for WeightedGrid<'_> {
    type Item = (Vec<f64>, ChemicalPotentialPoint);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let weights = self.weights.clone()?;
            let simplex = &self.simplices[self.simplex];
            let fresh = !self.seen_before(simplex, &weights);
            let full = fresh.then(|| self.full_weights(simplex, &weights));
            self.advance();
            if let Some(full) = full {
                let point = barycentric(self.vertices, &full);
                return Some((full, point));
            }
        }
    }
}

/// Grid points of a chemical-potential polytope; see [`WeightedGrid`] for the ordering.
#[derive(Debug, Clone)]
pub struct Grid<'a> {
    inner: WeightedGrid<'a>,
}

impl<'a> Grid<'a> {
    pub(crate) fn new(
        vertices: &'a [ChemicalPotentialPoint],
        simplices: &'a [Vec<usize>],
        resolution: usize,
    ) -> Self {
        Self {
            inner: WeightedGrid::new(vertices, simplices, resolution),
        }
    }

    /// Yields the barycentric weights of each point alongside it.
    pub fn with_weights(self) -> WeightedGrid<'a> {
        self.inner
    }

    pub fn resolution(&self) -> usize {
        self.inner.resolution
    }
}

impl Iterator for Grid<'_> {
    type Item = ChemicalPotentialPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, point)| point)
    }
}
