use crate::errors::{
    ConfigError,
    InputError,
    Result,
};
use crate::models::chemistry::Formula;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Where on a peptide a modification may sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specificity {
    Anywhere,
    ProteinNTerm,
    ProteinCTerm,
    PeptideNTerm,
    PeptideCTerm,
    /// A loss from a residue side chain, placed like [`Specificity::Anywhere`].
    NeutralLoss,
}

impl Specificity {
    pub fn is_n_terminal(&self) -> bool {
        matches!(self, Specificity::ProteinNTerm | Specificity::PeptideNTerm)
    }

    pub fn is_c_terminal(&self) -> bool {
        matches!(self, Specificity::ProteinCTerm | Specificity::PeptideCTerm)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_n_terminal() || self.is_c_terminal()
    }
}

impl FromStr for Specificity {
    type Err = InputError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "*" | "anywhere" => Ok(Specificity::Anywhere),
            "protein-n-term" => Ok(Specificity::ProteinNTerm),
            "protein-c-term" => Ok(Specificity::ProteinCTerm),
            "n-term" => Ok(Specificity::PeptideNTerm),
            "c-term" => Ok(Specificity::PeptideCTerm),
            "neutral-loss" => Ok(Specificity::NeutralLoss),
            _ => Err(InputError::InvalidSpecificity {
                line: s.to_string(),
            }),
        }
    }
}

impl Display for Specificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Specificity::Anywhere => "Anywhere",
            Specificity::ProteinNTerm => "Protein N-term",
            Specificity::ProteinCTerm => "Protein C-term",
            Specificity::PeptideNTerm => "N-term",
            Specificity::PeptideCTerm => "C-term",
            Specificity::NeutralLoss => "Neutral loss",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModificationKind {
    #[default]
    Standard,
    Dehydro,
    Cation,
}

/// A mass shift on a residue or terminus. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub name: String,
    /// `None` matches any residue.
    pub residue: Option<char>,
    pub specificity: Specificity,
    pub mono_shift: f64,
    pub average_shift: f64,
    /// Defined by a bare mass, rendered by that mass instead of its name.
    #[serde(default)]
    pub mass_only: bool,
    /// May not sit on the residue the enzyme cleaves after.
    #[serde(default)]
    pub uncleaved: bool,
    #[serde(default)]
    pub kind: ModificationKind,
    /// Overrides the table wide per modification cap.
    #[serde(default)]
    pub max_count: Option<usize>,
}

impl Modification {
    pub fn new(
        name: impl Into<String>,
        residue: Option<char>,
        specificity: Specificity,
        mono_shift: f64,
        average_shift: f64,
    ) -> Self {
        Self {
            name: name.into(),
            residue,
            specificity,
            mono_shift,
            average_shift,
            mass_only: false,
            uncleaved: false,
            kind: ModificationKind::Standard,
            max_count: None,
        }
    }

    pub fn from_formula(
        name: impl Into<String>,
        residue: Option<char>,
        specificity: Specificity,
        formula: &Formula,
    ) -> Self {
        Self::new(
            name,
            residue,
            specificity,
            formula.mono_mass(),
            formula.average_mass(),
        )
    }

    pub fn from_mass(
        name: impl Into<String>,
        residue: Option<char>,
        specificity: Specificity,
        mass: f64,
    ) -> Self {
        Self {
            mass_only: true,
            ..Self::new(name, residue, specificity, mass, mass)
        }
    }

    pub fn with_kind(mut self, kind: ModificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_uncleaved(mut self, uncleaved: bool) -> Self {
        self.uncleaved = uncleaved;
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn shift(&self, monoisotopic: bool) -> f64 {
        if monoisotopic {
            self.mono_shift
        } else {
            self.average_shift
        }
    }

    pub fn applies_to(&self, residue: u8) -> bool {
        match self.residue {
            Some(r) => r.eq_ignore_ascii_case(&(residue as char)),
            None => true,
        }
    }

    /// Text used for this modification inside a modified sequence.
    pub fn label(&self) -> String {
        if self.mass_only {
            format!("{:+.4}", self.mono_shift)
        } else {
            self.name.clone()
        }
    }
}

impl Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let residue = self.residue.unwrap_or('*');
        write!(
            f,
            "{} ({}) [{}] {:+.4}",
            self.name, residue, self.specificity, self.mono_shift
        )
    }
}

/// Reads a usermod file, see [`parse_usermods`].
pub fn read_usermods(path: impl AsRef<Path>) -> Result<Vec<Modification>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let out = parse_usermods(&contents)?;
    info!("Read {} modifications from {}", out.len(), path.display());
    Ok(out)
}

/// Parses usermod records.
///
/// Every record is three non blank lines, lines starting with `#` are
/// ignored:
///
/// ```text
/// Phospho
/// H P O3
/// S T Y
/// ```
///
/// The second line is an elemental formula or a signed mass, the third a
/// list of residues (or `*`) and keywords. One modification is produced per
/// listed residue.
///
/// # Example
/// ```
/// use seqmatch::models::modification::{parse_usermods, Specificity};
///
/// let mods = parse_usermods("Oxidation\nO\nM\n\nAcetyl\nC2 H2 O\nProtein-N-term\n").unwrap();
/// assert_eq!(mods.len(), 2);
/// assert_eq!(mods[0].residue, Some('M'));
/// assert_eq!(mods[1].specificity, Specificity::ProteinNTerm);
/// ```
pub fn parse_usermods(contents: &str) -> Result<Vec<Modification>> {
    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let mut out = Vec::new();
    for record in lines.chunks(3) {
        let [(_, name), (mass_line, mass), (sites_line, sites)] = record else {
            return Err(InputError::InvalidModificationRecord {
                line_number: record[0].0,
                reason: "incomplete record, expected name, composition and specificity lines"
                    .to_string(),
            }
            .into());
        };
        out.extend(parse_record(name, (*mass_line, *mass), (*sites_line, *sites))?);
    }
    Ok(out)
}

struct SpecificityLine {
    residues: Vec<Option<char>>,
    specificity: Specificity,
    uncleaved: bool,
    kind: ModificationKind,
}

fn parse_specificity_line(line: &str) -> std::result::Result<SpecificityLine, InputError> {
    let mut residues = Vec::new();
    let mut specificity = None;
    let mut uncleaved = false;
    let mut kind = ModificationKind::Standard;

    for token in line.split_whitespace() {
        match token.to_ascii_lowercase().as_str() {
            "uncleaved" => uncleaved = true,
            "dehydro" => kind = ModificationKind::Dehydro,
            "cation" => kind = ModificationKind::Cation,
            "*" => residues.push(None),
            _ => {
                if let Ok(x) = token.parse::<Specificity>() {
                    if specificity.replace(x).is_some_and(|prev| prev != x) {
                        return Err(InputError::InvalidSpecificity {
                            line: line.to_string(),
                        });
                    }
                } else if token.chars().all(|c| c.is_ascii_uppercase()) {
                    residues.extend(token.chars().map(Some));
                } else {
                    return Err(InputError::InvalidSpecificity {
                        line: line.to_string(),
                    });
                }
            }
        }
    }

    let specificity = specificity.unwrap_or(Specificity::Anywhere);
    if residues.is_empty() {
        if !specificity.is_terminal() {
            return Err(InputError::InvalidSpecificity {
                line: line.to_string(),
            });
        }
        residues.push(None);
    }
    Ok(SpecificityLine {
        residues,
        specificity,
        uncleaved,
        kind,
    })
}

fn parse_record(
    name: &str,
    (mass_line, mass): (usize, &str),
    (sites_line, sites): (usize, &str),
) -> Result<Vec<Modification>> {
    let record_error = |line_number: usize, reason: String| InputError::InvalidModificationRecord {
        line_number,
        reason,
    };

    let sites =
        parse_specificity_line(sites).map_err(|e| record_error(sites_line, e.to_string()))?;
    let template = match mass.parse::<f64>() {
        Ok(x) if x.is_finite() => Modification::from_mass(name, None, sites.specificity, x),
        _ => {
            let formula =
                Formula::parse(mass).map_err(|e| record_error(mass_line, e.to_string()))?;
            Modification::from_formula(name, None, sites.specificity, &formula)
        }
    }
    .with_uncleaved(sites.uncleaved)
    .with_kind(sites.kind);

    Ok(sites
        .residues
        .into_iter()
        .map(|residue| Modification {
            residue,
            ..template.clone()
        })
        .collect())
}
