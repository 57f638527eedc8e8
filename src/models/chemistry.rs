use crate::errors::{
    InputError,
    Result,
};
use mzcore::prelude::{
    molecular_formula,
    AminoAcid,
    MolecularFormula,
    MultiChemical,
};
use std::fmt::Display;
use std::sync::LazyLock;

pub const PROTON: f64 = 1.007_276_466_812;

/// Ratio between the average and monoisotopic mass of an averagine residue
/// (111.1254 / 111.0543), used to estimate average masses of peaks.
pub const AVERAGINE_AVERAGE_RATIO: f64 = 111.1254 / 111.0543;

/// (monoisotopic, average) of one water.
static WATER: LazyLock<(f64, f64)> = LazyLock::new(|| {
    let water = molecular_formula!(H 2 O 1);
    (
        water.monoisotopic_mass().value,
        water.average_weight().value,
    )
});

/// (monoisotopic, average) residue masses indexed by uppercase ascii letter.
/// Letters without a single unambiguous composition are `None`.
static RESIDUES: LazyLock<[Option<(f64, f64)>; 26]> = LazyLock::new(|| {
    let mut out = [None; 26];
    for (i, slot) in out.iter_mut().enumerate() {
        let Ok(aa) = AminoAcid::try_from(b'A' + i as u8) else {
            continue;
        };
        let formulas = aa.formulas();
        if let [formula] = &formulas[..] {
            // `X` resolves to an empty composition.
            if !formula.is_empty() {
                *slot = Some((
                    formula.monoisotopic_mass().value,
                    formula.average_weight().value,
                ));
            }
        }
    }
    out
});

pub fn water_mass(monoisotopic: bool) -> f64 {
    if monoisotopic {
        WATER.0
    } else {
        WATER.1
    }
}

/// Mass of a single residue, `None` for letters that are not amino acids
/// (`B`, `Z`, `X`, ...).
pub fn residue_mass(residue: u8, monoisotopic: bool) -> Option<f64> {
    let residue = residue.to_ascii_uppercase();
    if !residue.is_ascii_uppercase() {
        return None;
    }
    RESIDUES[(residue - b'A') as usize].map(|(mono, avg)| if monoisotopic { mono } else { avg })
}

/// Neutral mass of an unmodified peptide, residues plus one water.
///
/// Unknown residues make the mass undefined and return `None`.
///
/// # Example
/// ```
/// use seqmatch::models::chemistry::peptide_mass;
///
/// let mass = peptide_mass(b"PEPTIDE", true).unwrap();
/// assert!((mass - 799.35997).abs() < 1e-4);
/// assert!(peptide_mass(b"PEPXIDE", true).is_none());
/// ```
pub fn peptide_mass(sequence: &[u8], monoisotopic: bool) -> Option<f64> {
    sequence
        .iter()
        .try_fold(water_mass(monoisotopic), |acc, r| {
            residue_mass(*r, monoisotopic).map(|m| acc + m)
        })
}

/// An elemental composition with signed counts, such as `H-2 O-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    inner: MolecularFormula,
}

impl Formula {
    /// Parses compositions written as `C2 H2 O`, `H-2 O-1` or `C2H3NO`.
    ///
    /// Repeated elements are added up, whitespace between elements is
    /// optional and a missing count means one.
    ///
    /// # Example
    /// ```
    /// use seqmatch::models::chemistry::Formula;
    ///
    /// let acetyl = Formula::parse("C2 H2 O").unwrap();
    /// assert!((acetyl.mono_mass() - 42.010565).abs() < 1e-5);
    /// let same = Formula::parse("C2H2O1").unwrap();
    /// assert_eq!(acetyl, same);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let inner = MolecularFormula::pro_forma::<false, false>(formula).map_err(|e| {
            InputError::InvalidFormula {
                formula: formula.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { inner })
    }

    pub fn mono_mass(&self) -> f64 {
        self.inner.monoisotopic_mass().value
    }

    pub fn average_mass(&self) -> f64 {
        self.inner.average_weight().value
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}
