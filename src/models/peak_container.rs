use crate::models::chemistry::PROTON;
use crate::models::peak::{
    Peak,
    RawPeak,
};
use crate::traits::tolerance::{
    Tolerance,
    ToleranceInfo,
};
use crate::utils::display::{
    glimpse_vec,
    GlimpseConfig,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::cmp::Ordering;
use std::fmt::Display;
use tracing::debug;

/// Spacing between consecutive isotope peaks of a singly charged ion.
/// Domain tuned value, verify against the instrument parameter files
/// before changing it.
pub const ISOTOPE_SPACING: f64 = 1.00235;

// Split peak joining interval, widening linearly between the two masses.
const SPLIT_PEAK_LOW_MASS: f64 = 1000.0;
const SPLIT_PEAK_LOW_INTERVAL: f64 = 0.2;
const SPLIT_PEAK_HIGH_MASS: f64 = 3000.0;
const SPLIT_PEAK_HIGH_INTERVAL: f64 = 0.35;

/// Largest gap between two peaks that are considered halves of one split peak.
pub fn split_peak_interval(mass: f64) -> f64 {
    if mass <= SPLIT_PEAK_LOW_MASS {
        SPLIT_PEAK_LOW_INTERVAL
    } else if mass >= SPLIT_PEAK_HIGH_MASS {
        SPLIT_PEAK_HIGH_INTERVAL
    } else {
        let frac = (mass - SPLIT_PEAK_LOW_MASS) / (SPLIT_PEAK_HIGH_MASS - SPLIT_PEAK_LOW_MASS);
        SPLIT_PEAK_LOW_INTERVAL + frac * (SPLIT_PEAK_HIGH_INTERVAL - SPLIT_PEAK_LOW_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeisotopeMode {
    /// Charges of the upper isotope peaks are not trusted.
    LowResolution,
    /// Only peaks of the same charge belong to one cluster.
    HighResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakContainerConfig {
    /// Neutral masses of known contaminants, removed from every peak list.
    #[serde(default)]
    pub contaminant_masses: Vec<f64>,
    #[serde(default)]
    pub join_split_peaks: bool,
    pub min_peaks: usize,
    /// `None` keeps every peak.
    pub max_peaks: Option<usize>,
    /// Fraction of the base peak intensity below which peaks are dropped,
    /// 0 disables the filter.
    #[serde(default)]
    pub min_relative_intensity: f64,
    #[serde(default)]
    pub deisotope: Option<DeisotopeMode>,
    #[serde(default)]
    pub force_single_charge: bool,
    pub monoisotopic: bool,
    pub adduct_mass: f64,
}

impl Default for PeakContainerConfig {
    fn default() -> Self {
        PeakContainerConfig {
            contaminant_masses: Vec::new(),
            join_split_peaks: false,
            min_peaks: 5,
            max_peaks: Some(200),
            min_relative_intensity: 0.0,
            deisotope: None,
            force_single_charge: false,
            monoisotopic: true,
            adduct_mass: PROTON,
        }
    }
}

/// The filtered peaks of one spectrum, sorted by ascending neutral mass.
#[derive(Debug, Clone)]
pub struct PeakContainer<'a> {
    peaks: Vec<Peak>,
    tolerance: &'a ToleranceInfo,
    monoisotopic: bool,
    // Upper bound of every peak tolerance, bounds the binary searches.
    max_tolerance: f64,
}

impl Display for PeakContainer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masses: Vec<f64> = self.peaks.iter().map(|p| p.mass()).collect();
        write!(
            f,
            "PeakContainer: \n    len={},\n    tolerance={},\n    masses={}",
            self.peaks.len(),
            self.tolerance.tolerance,
            glimpse_vec(
                &masses,
                Some(GlimpseConfig {
                    max_items: 10,
                    padding: 2,
                    new_line: false
                })
            ),
        )
    }
}

fn by_mass(a: &Peak, b: &Peak) -> Ordering {
    a.mass().total_cmp(&b.mass())
}

fn by_m_over_z(a: &Peak, b: &Peak) -> Ordering {
    a.m_over_z().total_cmp(&b.m_over_z())
}

impl<'a> PeakContainer<'a> {
    /// Builds the container, running the configured filters in order:
    /// contaminant removal, split peak joining, intensity retention,
    /// deisotoping and forced single charge.
    pub fn new(raw: &[RawPeak], config: &PeakContainerConfig, tolerance: &'a ToleranceInfo) -> Self {
        let mut peaks: Vec<Peak> = raw
            .iter()
            .filter(|x| x.m_over_z.is_finite() && x.m_over_z > 0.0 && x.intensity.is_finite())
            .map(|x| Peak::from_raw(*x, config.adduct_mass, config.monoisotopic, tolerance))
            .collect();
        if peaks.len() != raw.len() {
            debug!("Dropped {} invalid raw peaks", raw.len() - peaks.len());
        }
        peaks.sort_by(by_mass);

        let peaks = remove_contaminants(peaks, &config.contaminant_masses);
        let peaks = if config.join_split_peaks {
            join_split_peaks(peaks, tolerance)
        } else {
            peaks
        };
        let peaks = retain_peaks(
            peaks,
            config.min_peaks,
            config.max_peaks,
            config.min_relative_intensity,
        );
        let peaks = match config.deisotope {
            Some(mode) => deisotope(peaks, mode),
            None => peaks,
        };
        let mut peaks = if config.force_single_charge {
            peaks.iter().map(|p| p.with_charge(1, tolerance)).collect()
        } else {
            peaks
        };
        peaks.sort_by(by_mass);

        let max_tolerance = peaks.iter().map(|p| p.tolerance()).fold(0.0, f64::max);
        let out = Self {
            peaks,
            tolerance,
            monoisotopic: config.monoisotopic,
            max_tolerance,
        };
        debug_assert!(out.verify(), "PeakContainer::new failed at verify");
        out
    }

    fn verify(&self) -> bool {
        self.peaks.windows(2).all(|w| w[0].mass() <= w[1].mass())
            && self.peaks.iter().all(|p| p.tolerance() <= self.max_tolerance)
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peak> {
        self.peaks.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Peak> {
        self.peaks.get(index)
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn tolerance(&self) -> &ToleranceInfo {
        self.tolerance
    }

    pub fn monoisotopic(&self) -> bool {
        self.monoisotopic
    }

    /// Neutral mass a peak is compared at: its mass in the container's mass
    /// mode, less the configured systematic error.
    pub fn observed_mass(&self, peak: &Peak) -> f64 {
        let mass = if self.monoisotopic {
            peak.mass()
        } else {
            peak.average_mass()
        };
        mass - self.tolerance.correction(mass)
    }

    fn peak_matches(&self, peak: &Peak, mass: f64) -> bool {
        (mass - self.observed_mass(peak)).abs() < peak.tolerance()
    }

    /// Keeps only the first `n` peaks.
    pub fn truncate(&mut self, n: usize) {
        self.peaks.truncate(n);
    }

    /// Restores ascending mass order after the peaks were rearranged.
    pub fn sort_peaks(&mut self) {
        self.peaks.sort_by(by_mass);
    }

    pub fn min_mass(&self) -> Option<f64> {
        self.peaks.first().map(|p| self.observed_mass(p))
    }

    pub fn max_mass(&self) -> Option<f64> {
        self.peaks.last().map(|p| self.observed_mass(p))
    }

    /// Indices of every peak matching `mass`, in ascending mass order.
    pub fn match_indices(&self, mass: f64) -> impl Iterator<Item = usize> + '_ {
        let lower = mass - self.max_tolerance;
        let upper = mass + self.max_tolerance;
        let start = self.peaks.partition_point(|p| self.observed_mass(p) < lower);
        self.peaks[start..]
            .iter()
            .take_while(move |p| self.observed_mass(p) <= upper)
            .enumerate()
            .filter(move |(_, p)| self.peak_matches(p, mass))
            .map(move |(i, _)| start + i)
    }

    pub fn is_match(&self, mass: f64) -> bool {
        self.match_indices(mass).next().is_some()
    }

    /// Whether `mass` falls between the windows of the lightest and heaviest peaks.
    pub fn is_in_range(&self, mass: f64) -> bool {
        match (self.peaks.first(), self.peaks.last()) {
            (Some(first), Some(last)) => {
                mass > self.observed_mass(first) - first.tolerance()
                    && mass < self.observed_mass(last) + last.tolerance()
            }
            _ => false,
        }
    }

    /// Whether `mass`, or a heavier mass, could still match a peak.
    ///
    /// Scans upwards from the lightest peak and stops at the first peak
    /// that matches or whose window lies entirely above `mass`.
    pub fn is_lower_match(&self, mass: f64) -> bool {
        for peak in &self.peaks {
            if self.peak_matches(peak, mass) {
                return true;
            }
            if self.observed_mass(peak) - peak.tolerance() > mass {
                return true;
            }
        }
        false
    }
}

fn remove_contaminants(peaks: Vec<Peak>, contaminants: &[f64]) -> Vec<Peak> {
    if contaminants.is_empty() {
        return peaks;
    }
    let before = peaks.len();
    let out: Vec<Peak> = peaks
        .into_iter()
        .filter(|p| !contaminants.iter().any(|c| p.is_match(*c)))
        .collect();
    debug!("Removed {} contaminant peaks", before - out.len());
    out
}

// Expects peaks sorted by mass. Neighbours closer than the split interval
// are merged into one peak at their intensity weighted mass, carrying the
// charge of the more intense half.
fn join_split_peaks(peaks: Vec<Peak>, tolerance: &ToleranceInfo) -> Vec<Peak> {
    let mut out: Vec<Peak> = Vec::with_capacity(peaks.len());
    for peak in peaks {
        let Some(last) = out.last_mut() else {
            out.push(peak);
            continue;
        };
        if peak.mass() - last.mass() >= split_peak_interval(last.mass()) {
            out.push(peak);
            continue;
        }

        let total = last.intensity() + peak.intensity();
        let mass = if total > 0.0 {
            (last.mass() * last.intensity() + peak.mass() * peak.intensity()) / total
        } else {
            (last.mass() + peak.mass()) / 2.0
        };
        let charge = if peak.intensity() > last.intensity() {
            peak.charge()
        } else {
            last.charge()
        };
        *last = Peak::from_mass(
            mass,
            charge,
            total,
            peak.adduct_mass(),
            peak.monoisotopic(),
            tolerance,
        );
    }
    out
}

// Drops peaks below the relative intensity threshold, unless that would
// leave fewer than `min_peaks`, then keeps the `max_peaks` most intense.
fn retain_peaks(
    mut peaks: Vec<Peak>,
    min_peaks: usize,
    max_peaks: Option<usize>,
    min_relative_intensity: f64,
) -> Vec<Peak> {
    peaks.sort_by(|a, b| {
        b.intensity()
            .total_cmp(&a.intensity())
            .then_with(|| by_m_over_z(a, b))
    });

    let base = peaks.first().map(|p| p.intensity()).unwrap_or(0.0);
    let threshold = min_relative_intensity * base;
    let above = peaks.iter().take_while(|p| p.intensity() >= threshold).count();
    let mut keep = above.max(min_peaks.min(peaks.len()));
    if let Some(max_peaks) = max_peaks {
        keep = keep.min(max_peaks.max(min_peaks));
    }
    peaks.truncate(keep);
    peaks.sort_by(by_mass);
    peaks
}

// Collapses isotope clusters onto their lowest peak. Clusters are followed
// upwards in m/z, each step expected `ISOTOPE_SPACING / charge` above the
// previous member within the monoisotopic peak's m/z tolerance.
fn deisotope(mut peaks: Vec<Peak>, mode: DeisotopeMode) -> Vec<Peak> {
    peaks.sort_by(by_m_over_z);
    let mut consumed = vec![false; peaks.len()];
    let mut out = Vec::with_capacity(peaks.len());

    for i in 0..peaks.len() {
        if consumed[i] {
            continue;
        }
        let mono = peaks[i];
        let charge = mono.charge() as f64;
        let spacing = ISOTOPE_SPACING / charge;
        let mz_tolerance = mono.tolerance() / charge;

        let mut intensity = mono.intensity();
        let mut expected = mono.m_over_z() + spacing;
        for j in (i + 1)..peaks.len() {
            let candidate = &peaks[j];
            if candidate.m_over_z() > expected + mz_tolerance {
                break;
            }
            let same_cluster = match mode {
                DeisotopeMode::LowResolution => true,
                DeisotopeMode::HighResolution => candidate.charge() == mono.charge(),
            };
            if !consumed[j]
                && same_cluster
                && (candidate.m_over_z() - expected).abs() <= mz_tolerance
            {
                consumed[j] = true;
                intensity += candidate.intensity();
                expected = candidate.m_over_z() + spacing;
            }
        }
        out.push(mono.with_intensity(intensity));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chemistry::AVERAGINE_AVERAGE_RATIO;
    use crate::traits::tolerance::MassTolerance;

    fn mz(mass: f64, charge: u8) -> f64 {
        mass / charge as f64 + PROTON
    }

    fn config() -> PeakContainerConfig {
        PeakContainerConfig {
            min_peaks: 0,
            max_peaks: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_sorted_and_matching() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02));
        let raw = vec![
            RawPeak::new(mz(1500.0, 1), 1, 10.0),
            RawPeak::new(mz(1000.0, 2), 2, 20.0),
            RawPeak::new(mz(800.0, 1), 1, 30.0),
        ];
        let container = PeakContainer::new(&raw, &config(), &tol);
        let masses: Vec<f64> = container.iter().map(|p| p.mass()).collect();
        assert_eq!(masses.len(), 3);
        assert!(masses.windows(2).all(|w| w[0] <= w[1]));
        assert!((container.min_mass().unwrap() - 800.0).abs() < 1e-9);
        assert!((container.max_mass().unwrap() - 1500.0).abs() < 1e-9);

        // Charge 2 doubles the Da window.
        assert!(container.is_match(999.97));
        assert!(!container.is_match(999.90));
        assert_eq!(container.match_indices(999.97).collect::<Vec<_>>(), vec![1]);
        assert!(container.match_indices(1200.0).next().is_none());
    }

    #[test]
    fn test_range_predicates() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.5));
        let raw = vec![
            RawPeak::new(mz(1000.0, 1), 1, 1.0),
            RawPeak::new(mz(2000.0, 1), 1, 1.0),
        ];
        let container = PeakContainer::new(&raw, &config(), &tol);
        assert!(container.is_in_range(999.6));
        assert!(container.is_in_range(1500.0));
        assert!(!container.is_in_range(999.4));
        assert!(!container.is_in_range(2000.6));

        assert!(container.is_lower_match(500.0));
        assert!(container.is_lower_match(1500.0));
        assert!(container.is_lower_match(2000.2));
        assert!(!container.is_lower_match(2000.6));
    }

    #[test]
    fn test_empty_container() {
        let tol = ToleranceInfo::default();
        let container = PeakContainer::new(&[], &config(), &tol);
        assert!(container.is_empty());
        assert!(!container.is_match(1000.0));
        assert!(!container.is_in_range(1000.0));
        assert!(!container.is_lower_match(1000.0));
        assert_eq!(container.min_mass(), None);
    }

    #[test]
    fn test_contaminants_removed() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.1));
        let raw = vec![
            RawPeak::new(mz(842.51, 1), 1, 1.0),
            RawPeak::new(mz(1000.0, 1), 1, 1.0),
            RawPeak::new(mz(2211.10, 1), 1, 1.0),
        ];
        let config = PeakContainerConfig {
            contaminant_masses: vec![842.50, 2211.104],
            ..config()
        };
        let container = PeakContainer::new(&raw, &config, &tol);
        assert_eq!(container.len(), 1);
        assert!((container.peaks()[0].mass() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_peak_interval() {
        assert_eq!(split_peak_interval(500.0), 0.2);
        assert_eq!(split_peak_interval(5000.0), 0.35);
        assert!((split_peak_interval(2000.0) - 0.275).abs() < 1e-12);
    }

    #[test]
    fn test_join_split_peaks() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.05));
        let raw = vec![
            RawPeak::new(mz(1000.0, 1), 1, 30.0),
            RawPeak::new(mz(1000.1, 1), 1, 10.0),
            RawPeak::new(mz(1001.0, 1), 1, 5.0),
        ];
        let config = PeakContainerConfig {
            join_split_peaks: true,
            ..config()
        };
        let container = PeakContainer::new(&raw, &config, &tol);
        assert_eq!(container.len(), 2);
        let joined = container.peaks()[0];
        assert!((joined.mass() - 1000.025).abs() < 1e-9);
        assert_eq!(joined.intensity(), 40.0);
    }

    #[test]
    fn test_retain_peaks() {
        let tol = ToleranceInfo::default();
        let raw: Vec<RawPeak> = (1..=10)
            .map(|i| RawPeak::new(500.0 + i as f64 * 10.0, 1, i as f64))
            .collect();

        let limited = PeakContainerConfig {
            max_peaks: Some(3),
            ..config()
        };
        let container = PeakContainer::new(&raw, &limited, &tol);
        let intensities: Vec<f64> = container.iter().map(|p| p.intensity()).collect();
        assert_eq!(intensities, vec![8.0, 9.0, 10.0]);

        // Threshold would keep 2 peaks, min_peaks asks for 4.
        let relative = PeakContainerConfig {
            min_relative_intensity: 0.85,
            min_peaks: 4,
            ..config()
        };
        let container = PeakContainer::new(&raw, &relative, &tol);
        assert_eq!(container.len(), 4);
    }

    #[test]
    fn test_deisotope_high_resolution() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.01));
        let mono = mz(1000.0, 2);
        let raw = vec![
            RawPeak::new(mono, 2, 100.0),
            RawPeak::new(mono + ISOTOPE_SPACING / 2.0, 2, 60.0),
            RawPeak::new(mono + 2.0 * ISOTOPE_SPACING / 2.0, 2, 20.0),
            // Right spacing for charge 2 but flagged as charge 1.
            RawPeak::new(mono + 3.0 * ISOTOPE_SPACING / 2.0, 1, 5.0),
            RawPeak::new(700.0, 1, 50.0),
        ];
        let config = PeakContainerConfig {
            deisotope: Some(DeisotopeMode::HighResolution),
            ..config()
        };
        let container = PeakContainer::new(&raw, &config, &tol);
        assert_eq!(container.len(), 3);
        let cluster = container
            .iter()
            .find(|p| (p.mass() - 1000.0).abs() < 1e-6)
            .unwrap();
        assert_eq!(cluster.intensity(), 180.0);
    }

    #[test]
    fn test_deisotope_low_resolution_ignores_charge() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.01));
        let mono = mz(1000.0, 1);
        let raw = vec![
            RawPeak::new(mono, 1, 100.0),
            RawPeak::new(mono + ISOTOPE_SPACING, 3, 60.0),
            RawPeak::new(mono + 2.0 * ISOTOPE_SPACING, 1, 20.0),
        ];
        let config = PeakContainerConfig {
            deisotope: Some(DeisotopeMode::LowResolution),
            ..config()
        };
        let container = PeakContainer::new(&raw, &config, &tol);
        assert_eq!(container.len(), 1);
        assert_eq!(container.peaks()[0].intensity(), 180.0);
    }

    #[test]
    fn test_force_single_charge() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02));
        let raw = vec![RawPeak::new(mz(1000.0, 2), 2, 1.0)];
        let config = PeakContainerConfig {
            force_single_charge: true,
            ..config()
        };
        let container = PeakContainer::new(&raw, &config, &tol);
        let peak = container.peaks()[0];
        assert_eq!(peak.charge(), 1);
        assert!((peak.mass() - 1000.0).abs() < 1e-9);
        assert!((peak.tolerance() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_average_mode_compares_measured_mass() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02));
        let raw = vec![RawPeak::new(mz(1000.0, 1), 1, 1.0)];
        let average = PeakContainerConfig {
            monoisotopic: false,
            ..config()
        };
        let container = PeakContainer::new(&raw, &average, &tol);
        let peak = container.peaks()[0];
        assert!((container.observed_mass(&peak) - 1000.0).abs() < 1e-9);
        assert!(container.is_match(1000.01));
        assert!(container.is_in_range(1000.01));
        assert!(container.is_lower_match(1000.01));
        // An averagine estimate of the same peak would sit ~0.6 Da higher.
        assert!(!container.is_match(1000.0 * AVERAGINE_AVERAGE_RATIO));

        let mono = PeakContainer::new(&raw, &config(), &tol);
        assert_eq!(mono.observed_mass(&mono.peaks()[0]), mono.peaks()[0].mass());
    }

    #[test]
    fn test_systematic_error_shifts_matches() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02)).with_systematic_error(0.5);
        let raw = vec![RawPeak::new(mz(1000.5, 1), 1, 1.0)];
        let container = PeakContainer::new(&raw, &config(), &tol);
        assert!((container.min_mass().unwrap() - 1000.0).abs() < 1e-9);
        assert!(container.is_match(1000.0));
        assert!(!container.is_match(1000.5));
        assert!(container.is_in_range(1000.0));
        assert!(!container.is_lower_match(1000.1));

        let ppm = ToleranceInfo::new(MassTolerance::Ppm(5.0)).with_systematic_error(10.0);
        let raw = vec![RawPeak::new(mz(2000.02, 1), 1, 1.0)];
        let container = PeakContainer::new(&raw, &config(), &ppm);
        assert!(container.is_match(2000.0));
    }

    #[test]
    fn test_truncate_and_sort() {
        let tol = ToleranceInfo::default();
        let raw: Vec<RawPeak> = (0..5)
            .map(|i| RawPeak::new(1000.0 + i as f64 * 100.0, 1, 1.0))
            .collect();
        let mut container = PeakContainer::new(&raw, &config(), &tol);
        container.truncate(2);
        assert_eq!(container.len(), 2);
        container.sort_peaks();
        assert!(container.max_mass().unwrap() < 1200.0);
    }
}
