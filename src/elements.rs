//! Chemical element symbols and the element-keyed maps used throughout the data model.
//!
//! Stoichiometry changes, reference energies and chemical potentials are all maps from element to
//! a number. This module validates their keys when they are deserialized, accepting either a
//! chemical symbol (`"O"`) or an atomic number (`"8"`), and normalising both to the symbol.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use std::collections::BTreeMap;
use std::fmt;

/// A map from chemical symbol to a value, ordered by symbol for deterministic iteration.
pub type ElementMap = BTreeMap<String, f64>;

const SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Returns `true` if `symbol` is a recognised (case-sensitive) chemical symbol.
pub fn is_element_symbol(symbol: &str) -> bool {
    SYMBOLS.contains(&symbol)
}

/// Resolves an element key to its canonical symbol.
///
/// Accepts a case-sensitive symbol or an atomic number between 1 and 118.
pub fn canonical_symbol(key: &str) -> Option<&'static str> {
    if let Ok(atomic_number) = key.trim().parse::<usize>() {
        return (1..=SYMBOLS.len())
            .contains(&atomic_number)
            .then(|| SYMBOLS[atomic_number - 1]);
    }
    SYMBOLS.iter().copied().find(|s| *s == key.trim())
}

/// Deserializes an [`ElementMap`], rejecting keys that are not chemical elements.
pub(crate) fn deserialize_element_map<'de, D>(deserializer: D) -> Result<ElementMap, D::Error>
where
    D: Deserializer<'de>,
{
    struct ElementMapVisitor;

    impl<'de> Visitor<'de> for ElementMapVisitor {
        type Value = ElementMap;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map from element symbol or atomic number to a number")
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut elements = ElementMap::new();
            while let Some((key, value)) = map.next_entry::<String, f64>()? {
                let symbol = canonical_symbol(&key)
                    .ok_or_else(|| de::Error::custom(format!("invalid element key: '{}'", key)))?;
                if elements.insert(symbol.to_string(), value).is_some() {
                    return Err(de::Error::custom(format!(
                        "element '{}' given more than once",
                        symbol
                    )));
                }
            }
            Ok(elements)
        }
    }

    deserializer.deserialize_map(ElementMapVisitor)
}

/// Deserializes a present [`ElementMap`] field as `Some`, so an explicit `{}` stays distinct from an
/// absent field.
pub(crate) fn deserialize_optional_element_map<'de, D>(
    deserializer: D,
) -> Result<Option<ElementMap>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_element_map(deserializer).map(Some)
}
