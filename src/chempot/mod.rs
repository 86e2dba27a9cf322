//! The allowed chemical-potential region of a host compound.
//!
//! Provides the `ChemicalPotentialSpace` polytope (vertices, membership, rich/poor limits), its
//! triangulation, and the barycentric `Grid` used to scan it.

mod grid;
mod space;
mod triangulation;

pub(crate) use grid::barycentric;
pub use grid::{Grid, WeightedGrid};
pub use space::{ChemicalPotentialSpace, Limit, Phase};
