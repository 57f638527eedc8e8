pub mod combinations;
pub mod cursor;

pub use combinations::{
    ModificationCombination,
    ModificationCombinations,
    SiteOptions,
};
pub use cursor::{
    CursorEntry,
    CursorLists,
    ModificationCursor,
    MAX_MULTI_MOD_ENTRIES,
};

use crate::models::modification::{
    Modification,
    ModificationKind,
    Specificity,
};
use crate::utils::display::{
    glimpse_vec,
    GlimpseConfig,
};
use crate::utils::tolerance_ranges::MassRange;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashSet;
use std::fmt::Display;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

/// Position of a modification inside [`ModificationTable::entries`].
pub type ModificationId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModificationCategory {
    Variable,
    User,
    Rare,
}

impl ModificationCategory {
    pub const ALL: [ModificationCategory; 3] = [
        ModificationCategory::Variable,
        ModificationCategory::User,
        ModificationCategory::Rare,
    ];

    fn index(&self) -> usize {
        match self {
            ModificationCategory::Variable => 0,
            ModificationCategory::User => 1,
            ModificationCategory::Rare => 2,
        }
    }
}

/// Maximum number of modifications of each category on one peptide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimits {
    pub variable: usize,
    pub user: usize,
    pub rare: usize,
}

impl CategoryLimits {
    pub fn limit(&self, category: ModificationCategory) -> usize {
        match category {
            ModificationCategory::Variable => self.variable,
            ModificationCategory::User => self.user,
            ModificationCategory::Rare => self.rare,
        }
    }
}

/// End of the peptide the enzyme cleaves at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleavageTerminus {
    CTerm,
    NTerm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationParameters {
    /// Always present, never enumerated.
    #[serde(default)]
    pub constant: Vec<Modification>,
    #[serde(default)]
    pub variable: Vec<Modification>,
    #[serde(default)]
    pub user: Vec<Modification>,
    #[serde(default)]
    pub rare: Vec<Modification>,
    /// Maximum number of simultaneous modifications on one peptide.
    pub max_levels: usize,
    /// Default cap on the occurrences of one modification.
    pub max_mods: usize,
    pub category_limits: CategoryLimits,
    pub allow_dehydro: bool,
    pub allow_cation: bool,
    pub allow_neutral_loss: bool,
    pub allow_terminal: bool,
    pub cleavage_terminus: CleavageTerminus,
    /// Enumeration stops once this many distinct sequences were produced.
    pub max_sequences: usize,
}

impl Default for ModificationParameters {
    fn default() -> Self {
        ModificationParameters {
            constant: vec![Modification::new(
                "Carbamidomethyl",
                Some('C'),
                Specificity::Anywhere,
                57.021_464,
                57.051_3,
            )],
            variable: vec![
                Modification::new("Oxidation", Some('M'), Specificity::Anywhere, 15.994_915, 15.999_4),
                Modification::new("Acetyl", None, Specificity::ProteinNTerm, 42.010_565, 42.036_7),
            ],
            user: Vec::new(),
            rare: Vec::new(),
            max_levels: 2,
            max_mods: 2,
            category_limits: CategoryLimits {
                variable: 2,
                user: 1,
                rare: 1,
            },
            allow_dehydro: true,
            allow_cation: true,
            allow_neutral_loss: true,
            allow_terminal: true,
            cleavage_terminus: CleavageTerminus::CTerm,
            max_sequences: 1000,
        }
    }
}

/// Whether the peptide sits at the start or end of its protein.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeptideContext {
    pub protein_n_term: bool,
    pub protein_c_term: bool,
}

/// Where a modification sits on a peptide. Every site holds at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Site {
    NTerm,
    Residue(usize),
    CTerm,
}

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub modification: Modification,
    pub category: ModificationCategory,
    /// Maximum occurrences on one peptide.
    pub cap: usize,
    /// Shift in the mass mode of the table.
    pub shift: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedPeptide {
    pub sequence: String,
    pub mono_shift: f64,
    pub average_shift: f64,
    pub num_modifications: usize,
}

/// Result of [`ModificationTable::get_mutated_sequences`].
///
/// `truncated` is set when the sequence limit was reached and more
/// sequences would have been produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutatedSequences {
    pub sequences: Vec<ModifiedPeptide>,
    pub truncated: bool,
}

/// The configured modifications of a search, with the bounds and sorted
/// lookup lists derived from them.
///
/// Everything is computed at construction and never changes afterwards,
/// workers build their own table from the same parameters.
#[derive(Debug, Clone)]
pub struct ModificationTable {
    constant: Vec<Modification>,
    entries: Vec<TableEntry>,
    category_limits: CategoryLimits,
    max_levels: usize,
    max_sequences: usize,
    cleavage_terminus: CleavageTerminus,
    monoisotopic: bool,
    most_neg_mass_shift: f64,
    most_pos_mass_shift: f64,
    cursor_lists: CursorLists,
}

impl Display for ModificationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.modification.to_string())
            .collect();
        write!(
            f,
            "ModificationTable: \n    entries={},\n    max_levels={},\n    bounds=[{:.4}, {:.4}]",
            glimpse_vec(
                &names,
                Some(GlimpseConfig {
                    max_items: 10,
                    padding: 2,
                    new_line: false
                })
            ),
            self.max_levels,
            self.most_neg_mass_shift,
            self.most_pos_mass_shift,
        )
    }
}

fn is_enabled(modification: &Modification, params: &ModificationParameters) -> bool {
    let kind_ok = match modification.kind {
        ModificationKind::Standard => true,
        ModificationKind::Dehydro => params.allow_dehydro,
        ModificationKind::Cation => params.allow_cation,
    };
    let specificity_ok = match modification.specificity {
        Specificity::Anywhere => true,
        Specificity::NeutralLoss => params.allow_neutral_loss,
        _ => params.allow_terminal,
    };
    kind_ok && specificity_ok
}

// Sum of the `max_levels` largest same signed contributions, each
// modification repeated up to its cap and each category up to its limit.
fn extreme_shift(
    entries: &[TableEntry],
    limits: &CategoryLimits,
    max_levels: usize,
    positive: bool,
) -> f64 {
    let mut all: Vec<f64> = Vec::new();
    for category in ModificationCategory::ALL {
        let mut contributions: Vec<f64> = entries
            .iter()
            .filter(|e| e.category == category)
            .filter(|e| if positive { e.shift > 0.0 } else { e.shift < 0.0 })
            .flat_map(|e| std::iter::repeat(e.shift.abs()).take(e.cap))
            .collect();
        contributions.sort_by(|a, b| b.total_cmp(a));
        contributions.truncate(limits.limit(category));
        all.extend(contributions);
    }
    all.sort_by(|a, b| b.total_cmp(a));
    let total: f64 = all.iter().take(max_levels).sum();
    if positive {
        total
    } else {
        -total
    }
}

impl ModificationTable {
    #[instrument(level = "debug", skip(params))]
    pub fn new(params: &ModificationParameters, monoisotopic: bool) -> Self {
        let max_levels = if params.max_levels == 0 {
            warn!("max_levels of 0 is not valid, using 1");
            1
        } else {
            params.max_levels
        };

        let categorized = [
            (ModificationCategory::Variable, &params.variable),
            (ModificationCategory::User, &params.user),
            (ModificationCategory::Rare, &params.rare),
        ];
        let mut entries = Vec::new();
        for (category, mods) in categorized {
            for modification in mods.iter() {
                if !is_enabled(modification, params) {
                    debug!("Skipping disabled modification {}", modification);
                    continue;
                }
                let cap = modification
                    .max_count
                    .unwrap_or(params.max_mods)
                    .min(params.category_limits.limit(category))
                    .min(max_levels);
                if cap == 0 {
                    debug!("Skipping modification {} with a cap of 0", modification);
                    continue;
                }
                entries.push(TableEntry {
                    shift: modification.shift(monoisotopic),
                    modification: modification.clone(),
                    category,
                    cap,
                });
            }
        }

        let most_pos_mass_shift =
            extreme_shift(&entries, &params.category_limits, max_levels, true);
        let most_neg_mass_shift =
            extreme_shift(&entries, &params.category_limits, max_levels, false);
        let cursor_lists = CursorLists::build(&entries, &params.category_limits, max_levels);

        let out = Self {
            constant: params.constant.clone(),
            entries,
            category_limits: params.category_limits,
            max_levels,
            max_sequences: params.max_sequences,
            cleavage_terminus: params.cleavage_terminus,
            monoisotopic,
            most_neg_mass_shift,
            most_pos_mass_shift,
            cursor_lists,
        };
        info!("{}", out);
        out
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn entry(&self, id: ModificationId) -> &TableEntry {
        &self.entries[id]
    }

    pub fn constant(&self) -> &[Modification] {
        &self.constant
    }

    /// No modification can be enumerated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn category_limits(&self) -> &CategoryLimits {
        &self.category_limits
    }

    pub fn monoisotopic(&self) -> bool {
        self.monoisotopic
    }

    pub fn most_neg_mass_shift(&self) -> f64 {
        self.most_neg_mass_shift
    }

    pub fn most_pos_mass_shift(&self) -> f64 {
        self.most_pos_mass_shift
    }

    /// Largest distance from zero any combination can shift a peptide.
    pub fn max_parent_error(&self) -> f64 {
        self.most_pos_mass_shift.max(-self.most_neg_mass_shift)
    }

    /// Cheap admissibility check of a mass shift window, enumeration is
    /// pointless when this is `false`.
    pub fn check_offset(&self, start: f64, end: f64) -> bool {
        !(end < self.most_neg_mass_shift || start > self.most_pos_mass_shift)
    }

    pub fn check_multi_offset(&self, windows: &[MassRange]) -> bool {
        let bounds = MassRange::new(self.most_neg_mass_shift, self.most_pos_mass_shift);
        windows.iter().any(|w| bounds.intersects(w))
    }

    /// Summed shift of the constant modifications present on `peptide`.
    pub fn constant_shift(&self, peptide: &[u8], context: PeptideContext) -> f64 {
        let (Some(first), Some(last)) = (peptide.first(), peptide.last()) else {
            return 0.0;
        };
        self.constant
            .iter()
            .map(|m| {
                let shift = m.shift(self.monoisotopic);
                let occurrences = match m.specificity {
                    Specificity::Anywhere | Specificity::NeutralLoss => {
                        peptide.iter().filter(|r| m.applies_to(**r)).count()
                    }
                    Specificity::PeptideNTerm => m.applies_to(*first) as usize,
                    Specificity::PeptideCTerm => m.applies_to(*last) as usize,
                    Specificity::ProteinNTerm => {
                        (context.protein_n_term && m.applies_to(*first)) as usize
                    }
                    Specificity::ProteinCTerm => {
                        (context.protein_c_term && m.applies_to(*last)) as usize
                    }
                };
                shift * occurrences as f64
            })
            .sum()
    }

    fn uncleaved_allowed(
        &self,
        modification: &Modification,
        position: usize,
        len: usize,
        context: PeptideContext,
    ) -> bool {
        if !modification.uncleaved {
            return true;
        }
        match self.cleavage_terminus {
            CleavageTerminus::CTerm => position + 1 != len || context.protein_c_term,
            CleavageTerminus::NTerm => position != 0 || context.protein_n_term,
        }
    }

    /// Candidate modifications of every site of `peptide`, sites without
    /// candidates are left out.
    pub fn site_options(&self, peptide: &[u8], context: PeptideContext) -> Vec<SiteOptions> {
        let len = peptide.len();
        if len == 0 {
            return Vec::new();
        }
        let mut n_term = Vec::new();
        let mut c_term = Vec::new();
        let mut residues: Vec<Vec<ModificationId>> = vec![Vec::new(); len];

        for (id, entry) in self.entries.iter().enumerate() {
            let m = &entry.modification;
            match m.specificity {
                Specificity::ProteinNTerm if !context.protein_n_term => continue,
                Specificity::ProteinCTerm if !context.protein_c_term => continue,
                _ => {}
            }
            if m.specificity.is_n_terminal() {
                if m.applies_to(peptide[0]) && self.uncleaved_allowed(m, 0, len, context) {
                    n_term.push(id);
                }
            } else if m.specificity.is_c_terminal() {
                if m.applies_to(peptide[len - 1])
                    && self.uncleaved_allowed(m, len - 1, len, context)
                {
                    c_term.push(id);
                }
            } else {
                for (i, residue) in peptide.iter().enumerate() {
                    if m.applies_to(*residue) && self.uncleaved_allowed(m, i, len, context) {
                        residues[i].push(id);
                    }
                }
            }
        }

        let mut out = Vec::new();
        if !n_term.is_empty() {
            out.push(SiteOptions {
                site: Site::NTerm,
                options: n_term,
            });
        }
        for (i, options) in residues.into_iter().enumerate() {
            if !options.is_empty() {
                out.push(SiteOptions {
                    site: Site::Residue(i),
                    options,
                });
            }
        }
        if !c_term.is_empty() {
            out.push(SiteOptions {
                site: Site::CTerm,
                options: c_term,
            });
        }
        out
    }

    /// Lazily enumerates every legal placement of modifications on
    /// `peptide` whose summed shift lies inside `window`.
    pub fn combinations(
        &self,
        peptide: &[u8],
        window: MassRange,
        context: PeptideContext,
        charge: u8,
    ) -> ModificationCombinations<'_> {
        ModificationCombinations::new(self, self.site_options(peptide, context), window, charge)
    }

    /// Canonical modified sequence, `Nterm-` prefix, `X(mod)` residues and
    /// `-Cterm` suffix.
    ///
    /// # Example
    /// ```
    /// use seqmatch::models::modification_table::{
    ///     ModificationParameters, ModificationTable, Site,
    /// };
    ///
    /// let table = ModificationTable::new(&ModificationParameters::default(), true);
    /// // Entry 0 of the default table is Oxidation (M).
    /// let out = table.render(b"PEMTIDE", &[(Site::Residue(2), 0)]);
    /// assert_eq!(out, "PEM(Oxidation)TIDE");
    /// ```
    pub fn render(&self, peptide: &[u8], placements: &[(Site, ModificationId)]) -> String {
        let mut n_term: Option<String> = None;
        let mut c_term: Option<String> = None;
        let mut labels: Vec<Option<String>> = vec![None; peptide.len()];
        for (site, id) in placements {
            let label = self.entries[*id].modification.label();
            match site {
                Site::NTerm => n_term = Some(label),
                Site::CTerm => c_term = Some(label),
                Site::Residue(i) => {
                    if let Some(slot) = labels.get_mut(*i) {
                        *slot = Some(label);
                    }
                }
            }
        }

        let mut out = String::with_capacity(peptide.len() * 2);
        if let Some(label) = n_term {
            out.push_str(&label);
            out.push('-');
        }
        for (residue, label) in peptide.iter().zip(labels) {
            out.push(*residue as char);
            if let Some(label) = label {
                out.push('(');
                out.push_str(&label);
                out.push(')');
            }
        }
        if let Some(label) = c_term {
            out.push('-');
            out.push_str(&label);
        }
        out
    }

    /// Every distinct modified form of `peptide` whose shift lies inside
    /// `window`.
    ///
    /// An empty result is a normal outcome. Once `max_sequences` distinct
    /// sequences were collected the enumeration stops and the result is
    /// flagged as truncated.
    #[instrument(level = "trace", skip(self, peptide))]
    pub fn get_mutated_sequences(
        &self,
        window: MassRange,
        peptide: &[u8],
        context: PeptideContext,
        charge: u8,
    ) -> MutatedSequences {
        let mut out = MutatedSequences::default();
        let mut seen: HashSet<String> = HashSet::new();
        for combination in self.combinations(peptide, window, context, charge) {
            let sequence = self.render(peptide, &combination.placements);
            if seen.contains(&sequence) {
                continue;
            }
            if out.sequences.len() >= self.max_sequences {
                warn!(
                    "More than {} modified sequences for {}, truncating",
                    self.max_sequences,
                    String::from_utf8_lossy(peptide)
                );
                out.truncated = true;
                break;
            }
            seen.insert(sequence.clone());
            out.sequences.push(ModifiedPeptide {
                sequence,
                mono_shift: combination.mono_shift,
                average_shift: combination.average_shift,
                num_modifications: combination.num_modifications(),
            });
        }
        out
    }

    /// Cursor over the sorted single and multi modification shifts.
    pub fn cursor(&self) -> ModificationCursor<'_> {
        ModificationCursor::new(&self.cursor_lists)
    }

    pub fn cursor_lists(&self) -> &CursorLists {
        &self.cursor_lists
    }
}
