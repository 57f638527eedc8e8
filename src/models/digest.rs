use crate::models::modification_table::PeptideContext;
use serde::{
    Deserialize,
    Serialize,
};

/// Enzyme rules used to cut protein sequences into peptides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestParameters {
    /// Residues the enzyme cleaves at. Empty keeps whole proteins.
    pub cleave_at: String,
    /// Residue that blocks cleavage when it sits across the cut.
    pub restrict: Option<char>,
    /// Cut after (true) or before (false) the cleavage residue.
    pub c_terminal: bool,
    pub missed_cleavages: usize,
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for DigestParameters {
    fn default() -> Self {
        Self {
            cleave_at: "KR".into(),
            restrict: Some('P'),
            c_terminal: true,
            missed_cleavages: 1,
            min_len: 5,
            max_len: 50,
        }
    }
}

/// A peptide as a half open `[start, end)` range of its protein.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub start: usize,
    pub end: usize,
    pub missed_cleavages: usize,
    pub protein_n_term: bool,
    pub protein_c_term: bool,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn context(&self) -> PeptideContext {
        PeptideContext {
            protein_n_term: self.protein_n_term,
            protein_c_term: self.protein_c_term,
        }
    }

    pub fn slice<'a>(&self, protein: &'a [u8]) -> &'a [u8] {
        &protein[self.start..self.end]
    }
}

impl DigestParameters {
    fn cleaves_at(&self, residue: u8) -> bool {
        self.cleave_at
            .bytes()
            .any(|c| c.eq_ignore_ascii_case(&residue))
    }

    fn is_restricted(&self, residue: u8) -> bool {
        self.restrict
            .is_some_and(|r| r.eq_ignore_ascii_case(&(residue as char)))
    }

    /// Positions between residues where the enzyme cuts, protein ends
    /// included.
    fn cut_points(&self, sequence: &[u8]) -> Vec<usize> {
        let mut cuts = vec![0];
        for i in 1..sequence.len() {
            let cut = if self.c_terminal {
                self.cleaves_at(sequence[i - 1]) && !self.is_restricted(sequence[i])
            } else {
                self.cleaves_at(sequence[i]) && !self.is_restricted(sequence[i - 1])
            };
            if cut {
                cuts.push(i);
            }
        }
        if !sequence.is_empty() {
            cuts.push(sequence.len());
        }
        cuts
    }

    /// Every peptide of `sequence` with up to `missed_cleavages` missed
    /// cleavages and a length inside `[min_len, max_len]`, ordered by start.
    ///
    /// # Example
    /// ```
    /// use seqmatch::models::digest::DigestParameters;
    ///
    /// let trypsin = DigestParameters {
    ///     missed_cleavages: 0,
    ///     min_len: 1,
    ///     ..Default::default()
    /// };
    /// let peptides: Vec<&[u8]> = trypsin
    ///     .digest(b"MEWKPLEQSMREK")
    ///     .iter()
    ///     .map(|f| f.slice(b"MEWKPLEQSMREK"))
    ///     .collect();
    /// assert_eq!(peptides, vec![&b"MEWKPLEQSMR"[..], &b"EK"[..]]);
    /// ```
    pub fn digest(&self, sequence: &[u8]) -> Vec<Fragment> {
        let cuts = self.cut_points(sequence);
        let mut out = Vec::new();
        for i in 0..cuts.len().saturating_sub(1) {
            let last = (i + 1 + self.missed_cleavages).min(cuts.len() - 1);
            for j in (i + 1)..=last {
                let (start, end) = (cuts[i], cuts[j]);
                let len = end - start;
                if len < self.min_len || len > self.max_len {
                    continue;
                }
                out.push(Fragment {
                    start,
                    end,
                    missed_cleavages: j - i - 1,
                    protein_n_term: start == 0,
                    protein_c_term: end == sequence.len(),
                });
            }
        }
        out
    }
}
