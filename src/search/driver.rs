use crate::errors::{
    Result,
    SearchError,
};
use crate::models::chemistry::peptide_mass;
use crate::models::digest::DigestParameters;
use crate::models::indices::SequenceDatabase;
use crate::models::modification_table::ModificationTable;
use crate::models::peak::RawPeak;
use crate::models::peak_container::PeakContainer;
use crate::traits::tolerance::{
    Tolerance,
    ToleranceInfo,
};
use crate::utils::tolerance_ranges::MassRange;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use tracing::{
    debug,
    instrument,
    trace,
};

/// A peak list to be searched, as read from the spectra json file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub id: u64,
    pub peaks: Vec<RawPeak>,
}

/// A peptide of a database entry whose mass, possibly modified, matches
/// a peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub spectrum_id: u64,
    pub entry_index: u32,
    /// Start of the peptide in the entry sequence.
    pub start: usize,
    pub peptide: String,
    pub modified_sequence: String,
    pub peak_index: usize,
    pub peak_mass: f64,
    pub theoretical_mass: f64,
    /// Error of the peak mass against the theoretical mass, in the unit of
    /// the parent tolerance.
    pub error: f64,
    /// The modified forms of this peptide were cut short.
    pub truncated: bool,
}

/// Matches the digested peptides of database entries against the peaks
/// of a spectrum, with and without modifications.
#[derive(Debug, Clone, Copy)]
pub struct PeptideSearch<'a> {
    tolerance: &'a ToleranceInfo,
    table: &'a ModificationTable,
    digest: &'a DigestParameters,
    max_peptide_hits: usize,
}

impl<'a> PeptideSearch<'a> {
    pub fn new(
        tolerance: &'a ToleranceInfo,
        table: &'a ModificationTable,
        digest: &'a DigestParameters,
        max_peptide_hits: usize,
    ) -> Self {
        Self {
            tolerance,
            table,
            digest,
            max_peptide_hits,
        }
    }

    fn push_hit(&self, hits: &mut Vec<Hit>, hit: Hit) -> Result<()> {
        if hits.len() >= self.max_peptide_hits {
            return Err(SearchError::TooManyPeptideHits {
                limit: self.max_peptide_hits,
            }
            .into());
        }
        hits.push(hit);
        Ok(())
    }

    /// Appends the hits of one database entry to `hits`.
    ///
    /// Fails with [`SearchError::TooManyPeptideHits`] once `hits` would grow
    /// past the configured limit.
    #[instrument(level = "trace", skip(self, sequence, container, hits))]
    pub fn search_entry(
        &self,
        spectrum_id: u64,
        entry_index: u32,
        sequence: &[u8],
        container: &PeakContainer,
        hits: &mut Vec<Hit>,
    ) -> Result<()> {
        if container.is_empty() {
            return Ok(());
        }
        let monoisotopic = self.table.monoisotopic();
        debug_assert_eq!(
            monoisotopic,
            container.monoisotopic(),
            "peaks and modifications use different mass modes"
        );

        for fragment in self.digest.digest(sequence) {
            let peptide = fragment.slice(sequence);
            let context = fragment.context();
            let Some(base_mass) = peptide_mass(peptide, monoisotopic) else {
                trace!("Skipping peptide with unknown residues at {}", fragment.start);
                continue;
            };
            let mass = base_mass + self.table.constant_shift(peptide, context);
            if !container.is_lower_match(mass + self.table.most_neg_mass_shift()) {
                continue;
            }
            let peptide_str = String::from_utf8_lossy(peptide).into_owned();

            let mut cursor = self.table.cursor();
            for (peak_index, peak) in container.iter().enumerate() {
                let observed = container.observed_mass(peak);
                let charge = peak.charge();
                if (observed - mass).abs() < peak.tolerance() {
                    self.push_hit(
                        hits,
                        Hit {
                            spectrum_id,
                            entry_index,
                            start: fragment.start,
                            peptide: peptide_str.clone(),
                            modified_sequence: peptide_str.clone(),
                            peak_index,
                            peak_mass: observed,
                            theoretical_mass: mass,
                            error: self.tolerance.error(observed, mass, charge),
                            truncated: false,
                        },
                    )?;
                    continue;
                }

                if self.table.is_empty() {
                    continue;
                }
                let window = MassRange::around(observed, peak.tolerance()).minus(mass);
                if !self.table.check_offset(window.start(), window.end()) {
                    continue;
                }
                cursor.advance_to(window.start());
                if !cursor.check_match(window.end()) {
                    continue;
                }

                let mutated = self
                    .table
                    .get_mutated_sequences(window, peptide, context, charge);
                for modified in mutated.sequences {
                    let shift = if monoisotopic {
                        modified.mono_shift
                    } else {
                        modified.average_shift
                    };
                    let theoretical_mass = mass + shift;
                    self.push_hit(
                        hits,
                        Hit {
                            spectrum_id,
                            entry_index,
                            start: fragment.start,
                            peptide: peptide_str.clone(),
                            modified_sequence: modified.sequence,
                            peak_index,
                            peak_mass: observed,
                            theoretical_mass,
                            error: self.tolerance.error(observed, theoretical_mass, charge),
                            truncated: mutated.truncated,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Searches every entry of `database` against one spectrum.
    ///
    /// Stops early, keeping the hits found so far, once `abort` is raised.
    #[instrument(level = "debug", skip_all, fields(spectrum_id = spectrum_id))]
    pub fn search_database(
        &self,
        spectrum_id: u64,
        container: &PeakContainer,
        database: &mut SequenceDatabase,
        abort: &AtomicBool,
    ) -> Result<Vec<Hit>> {
        let mut hits = Vec::new();
        for entry_index in 0..database.num_entries() {
            if abort.load(Ordering::Relaxed) {
                debug!("Search of spectrum {} aborted", spectrum_id);
                break;
            }
            let sequence = database.sequence(entry_index)?;
            self.search_entry(spectrum_id, entry_index, &sequence, container, &mut hits)?;
        }
        debug!("Spectrum {} has {} hits", spectrum_id, hits.len());
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputerParameters;
    use crate::errors::SeqmatchError;
    use crate::models::chemistry::PROTON;
    use crate::models::indices::write_database;
    use crate::models::modification::{
        Modification,
        Specificity,
    };
    use crate::models::modification_table::ModificationParameters;
    use crate::models::peak_container::PeakContainerConfig;
    use crate::traits::tolerance::MassTolerance;
    use tempfile::tempdir;

    const OXIDATION: f64 = 15.994_915;

    fn modifications() -> ModificationParameters {
        ModificationParameters {
            constant: Vec::new(),
            variable: vec![Modification::new(
                "Oxidation",
                Some('M'),
                Specificity::Anywhere,
                OXIDATION,
                15.9994,
            )],
            ..Default::default()
        }
    }

    fn digest() -> DigestParameters {
        DigestParameters {
            missed_cleavages: 0,
            min_len: 4,
            ..Default::default()
        }
    }

    fn peaks_config() -> PeakContainerConfig {
        PeakContainerConfig {
            min_peaks: 0,
            max_peaks: None,
            ..Default::default()
        }
    }

    fn singly_charged(mass: f64) -> RawPeak {
        RawPeak::new(mass + PROTON, 1, 100.0)
    }

    #[test]
    fn test_unmodified_and_modified_hits() {
        let tolerance = ToleranceInfo::new(MassTolerance::Da(0.02));
        let table = ModificationTable::new(&modifications(), true);
        let digest = digest();
        let search = PeptideSearch::new(&tolerance, &table, &digest, 100);

        let protein = b"PEPTIDEKAMMSR";
        let plain = peptide_mass(b"PEPTIDEK", true).unwrap();
        let oxidized = peptide_mass(b"AMMSR", true).unwrap() + OXIDATION;
        let raw = vec![singly_charged(plain + 0.005), singly_charged(oxidized)];
        let container = PeakContainer::new(&raw, &peaks_config(), &tolerance);

        let mut hits = Vec::new();
        search
            .search_entry(7, 3, protein, &container, &mut hits)
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].peptide, "PEPTIDEK");
        assert_eq!(hits[0].modified_sequence, "PEPTIDEK");
        assert!((hits[0].error - 0.005).abs() < 1e-6);
        assert_eq!(hits[0].entry_index, 3);
        assert_eq!(hits[0].spectrum_id, 7);

        let mut modified: Vec<&str> = hits[1..]
            .iter()
            .map(|h| h.modified_sequence.as_str())
            .collect();
        modified.sort();
        assert_eq!(modified, vec!["AM(Oxidation)MSR", "AMM(Oxidation)SR"]);
        assert!(hits[1..].iter().all(|h| h.start == 8 && !h.truncated));
    }

    #[test]
    fn test_no_hits_outside_tolerance() {
        let tolerance = ToleranceInfo::new(MassTolerance::Ppm(5.0));
        let table = ModificationTable::new(&modifications(), true);
        let digest = digest();
        let search = PeptideSearch::new(&tolerance, &table, &digest, 100);

        let raw = vec![singly_charged(peptide_mass(b"PEPTIDEK", true).unwrap() + 0.5)];
        let container = PeakContainer::new(&raw, &peaks_config(), &tolerance);
        let mut hits = Vec::new();
        search
            .search_entry(1, 0, b"PEPTIDEK", &container, &mut hits)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_average_mass_search() {
        let tolerance = ToleranceInfo::new(MassTolerance::Da(0.02));
        let table = ModificationTable::new(&modifications(), false);
        let digest = digest();
        let search = PeptideSearch::new(&tolerance, &table, &digest, 100);
        let config = PeakContainerConfig {
            monoisotopic: false,
            ..peaks_config()
        };

        let plain = peptide_mass(b"PEPTIDEK", false).unwrap();
        let oxidized = peptide_mass(b"AMMSR", false).unwrap() + 15.9994;
        let raw = vec![singly_charged(plain), singly_charged(oxidized)];
        let container = PeakContainer::new(&raw, &config, &tolerance);

        let mut hits = Vec::new();
        search
            .search_entry(2, 0, b"PEPTIDEKAMMSR", &container, &mut hits)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].modified_sequence, "PEPTIDEK");
        assert!((hits[0].peak_mass - plain).abs() < 1e-9);
        assert!(hits[0].error.abs() < 1e-6);
        assert!(hits[1..].iter().all(|h| h.peptide == "AMMSR"));
    }

    #[test]
    fn test_systematic_error_corrects_peaks() {
        let table = ModificationTable::new(&modifications(), true);
        let digest = digest();
        let plain = peptide_mass(b"PEPTIDEK", true).unwrap();
        let raw = vec![singly_charged(plain + 0.5)];

        let uncorrected = ToleranceInfo::new(MassTolerance::Da(0.02));
        let container = PeakContainer::new(&raw, &peaks_config(), &uncorrected);
        let mut hits = Vec::new();
        PeptideSearch::new(&uncorrected, &table, &digest, 100)
            .search_entry(1, 0, b"PEPTIDEK", &container, &mut hits)
            .unwrap();
        assert!(hits.is_empty());

        let corrected = uncorrected.with_systematic_error(0.5);
        let container = PeakContainer::new(&raw, &peaks_config(), &corrected);
        PeptideSearch::new(&corrected, &table, &digest, 100)
            .search_entry(1, 0, b"PEPTIDEK", &container, &mut hits)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].peptide, "PEPTIDEK");
        assert!(hits[0].error.abs() < 1e-6);
    }

    #[test]
    fn test_too_many_hits() {
        let tolerance = ToleranceInfo::new(MassTolerance::Da(0.02));
        let table = ModificationTable::new(&modifications(), true);
        let digest = digest();
        let search = PeptideSearch::new(&tolerance, &table, &digest, 1);

        let mass = peptide_mass(b"AMMSR", true).unwrap() + OXIDATION;
        let container = PeakContainer::new(&[singly_charged(mass)], &peaks_config(), &tolerance);
        let mut hits = Vec::new();
        let out = search.search_entry(1, 0, b"AMMSR", &container, &mut hits);
        assert!(matches!(
            out,
            Err(SeqmatchError::SearchError(SearchError::TooManyPeptideHits { limit: 1 }))
        ));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_search_database() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        write_database(
            &prefix,
            &[("P1", "GGGGGK"), ("P2", "PEPTIDEK"), ("P3", "MMMMK")],
        )
        .unwrap();
        let mut db = SequenceDatabase::open(&prefix, &ComputerParameters::default()).unwrap();

        let tolerance = ToleranceInfo::new(MassTolerance::Da(0.02));
        let table = ModificationTable::new(&modifications(), true);
        let digest = digest();
        let search = PeptideSearch::new(&tolerance, &table, &digest, 100);
        let raw = vec![singly_charged(peptide_mass(b"PEPTIDEK", true).unwrap())];
        let container = PeakContainer::new(&raw, &peaks_config(), &tolerance);

        let hits = search
            .search_database(11, &container, &mut db, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_index, 1);

        let aborted = search
            .search_database(11, &container, &mut db, &AtomicBool::new(true))
            .unwrap();
        assert!(aborted.is_empty());
    }
}
