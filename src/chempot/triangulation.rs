use std::collections::BTreeSet;

/// Splits a polytope into simplices that share only common faces.
///
/// The polytope is given combinatorially: `tight_sets[h]` lists the vertices lying on the boundary
/// of constraint `h`. Each face is coned from its lowest-indexed vertex over the facets that avoid
/// it, recursively, which yields a pulling triangulation. Every returned simplex lists its vertex
/// indices in ascending order, and simplices come out in a deterministic order.
pub(crate) fn triangulate(vertex_count: usize, tight_sets: &[Vec<usize>]) -> Vec<Vec<usize>> {
    if vertex_count == 0 {
        return Vec::new();
    }
    let tight: Vec<BTreeSet<usize>> = tight_sets
        .iter()
        .map(|set| set.iter().copied().filter(|&v| v < vertex_count).collect())
        .collect();
    let polytope: BTreeSet<usize> = (0..vertex_count).collect();
    let mut simplices: Vec<Vec<usize>> = pull(&polytope, &tight)
        .into_iter()
        .map(|simplex| simplex.into_iter().collect())
        .collect();
    simplices.sort();
    simplices
}

fn pull(face: &BTreeSet<usize>, tight: &[BTreeSet<usize>]) -> Vec<BTreeSet<usize>> {
    let Some(&apex) = face.first() else {
        return Vec::new();
    };
    let facets = facets(face, tight);
    if facets.is_empty() {
        return vec![face.clone()];
    }
    facets
        .iter()
        .filter(|facet| !facet.contains(&apex))
        .flat_map(|facet| pull(facet, tight))
        .map(|mut simplex| {
            simplex.insert(apex);
            simplex
        })
        .collect()
}

/// The inclusion-maximal proper faces of `face` cut out by a single constraint.
fn facets(face: &BTreeSet<usize>, tight: &[BTreeSet<usize>]) -> Vec<BTreeSet<usize>> {
    let candidates: BTreeSet<BTreeSet<usize>> = tight
        .iter()
        .map(|set| face.intersection(set).copied().collect::<BTreeSet<usize>>())
        .filter(|cut| !cut.is_empty() && cut.len() < face.len())
        .collect();
    candidates
        .iter()
        .filter(|cut| {
            !candidates
                .iter()
                .any(|other| other.len() > cut.len() && cut.is_subset(other))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Edges of a convex polygon with `n` vertices in boundary order.
    fn polygon(n: usize) -> Vec<Vec<usize>> {
        (0..n).map(|i| vec![i, (i + 1) % n]).collect()
    }

    #[test]
    fn test_polygon_is_fanned_from_its_first_vertex() {
        let simplices = triangulate(6, &polygon(6));
        assert_eq!(
            simplices,
            vec![vec![0, 1, 2], vec![0, 2, 3], vec![0, 3, 4], vec![0, 4, 5]]
        );
    }

    #[test]
    fn test_simplex_is_left_whole() {
        assert_eq!(triangulate(3, &polygon(3)), vec![vec![0, 1, 2]]);
        assert_eq!(triangulate(2, &[vec![0], vec![1]]), vec![vec![0, 1]]);
        assert_eq!(triangulate(1, &[]), vec![vec![0]]);
        assert!(triangulate(0, &[]).is_empty());
    }

    #[test]
    fn test_cube_splits_into_six_tetrahedra() {
        // Vertex i has coordinates given by its three bits.
        let faces: Vec<Vec<usize>> = (0..3)
            .flat_map(|axis| {
                [0, 1].map(|bit| (0..8).filter(|v| (v >> axis) & 1 == bit).collect())
            })
            .collect();
        let simplices = triangulate(8, &faces);
        assert_eq!(simplices.len(), 6);
        assert!(simplices.iter().all(|s| s.len() == 4 && s[0] == 0));
    }
}
