use crate::models::chemistry::AVERAGINE_AVERAGE_RATIO;
use crate::traits::tolerance::Tolerance;
use serde::{
    Deserialize,
    Serialize,
};

/// A peak as it comes out of a peak list file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPeak {
    pub m_over_z: f64,
    /// 0 means unknown, and is treated as singly charged.
    #[serde(default)]
    pub charge: u8,
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

fn default_intensity() -> f64 {
    1.0
}

impl RawPeak {
    pub fn new(m_over_z: f64, charge: u8, intensity: f64) -> Self {
        Self {
            m_over_z,
            charge,
            intensity,
        }
    }
}

/// A peak with its neutral mass and matching tolerance resolved.
///
/// Peaks are immutable, the transforms in the peak container build new
/// ones instead of editing cached fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    m_over_z: f64,
    charge: u8,
    intensity: f64,
    mass: f64,
    average_mass: f64,
    tolerance: f64,
    adduct_mass: f64,
    monoisotopic: bool,
}

impl Peak {
    /// `monoisotopic` tells whether the spectrum was measured as
    /// monoisotopic or as average masses.
    pub fn from_raw(
        raw: RawPeak,
        adduct_mass: f64,
        monoisotopic: bool,
        tolerance: &impl Tolerance,
    ) -> Self {
        let charge = raw.charge.max(1);
        let mass = raw.m_over_z * charge as f64 - charge as f64 * adduct_mass;
        Self::build(
            raw.m_over_z,
            charge,
            raw.intensity,
            mass,
            adduct_mass,
            monoisotopic,
            tolerance,
        )
    }

    /// Peak of neutral `mass` observed at `charge`.
    pub fn from_mass(
        mass: f64,
        charge: u8,
        intensity: f64,
        adduct_mass: f64,
        monoisotopic: bool,
        tolerance: &impl Tolerance,
    ) -> Self {
        let charge = charge.max(1);
        let m_over_z = mass / charge as f64 + adduct_mass;
        Self::build(
            m_over_z,
            charge,
            intensity,
            mass,
            adduct_mass,
            monoisotopic,
            tolerance,
        )
    }

    fn build(
        m_over_z: f64,
        charge: u8,
        intensity: f64,
        mass: f64,
        adduct_mass: f64,
        monoisotopic: bool,
        tolerance: &impl Tolerance,
    ) -> Self {
        // Average mode spectra already carry average masses.
        let average_mass = if monoisotopic {
            mass * AVERAGINE_AVERAGE_RATIO
        } else {
            mass
        };
        Self {
            m_over_z,
            charge,
            intensity,
            mass,
            average_mass,
            tolerance: tolerance.tolerance(mass, charge),
            adduct_mass,
            monoisotopic,
        }
    }

    /// Same neutral mass, observed at another charge.
    pub fn with_charge(&self, charge: u8, tolerance: &impl Tolerance) -> Self {
        Self::from_mass(
            self.mass,
            charge,
            self.intensity,
            self.adduct_mass,
            self.monoisotopic,
            tolerance,
        )
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn m_over_z(&self) -> f64 {
        self.m_over_z
    }

    pub fn charge(&self) -> u8 {
        self.charge
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn average_mass(&self) -> f64 {
        self.average_mass
    }

    /// Half width of the matching window, in Daltons of neutral mass.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn adduct_mass(&self) -> f64 {
        self.adduct_mass
    }

    pub fn monoisotopic(&self) -> bool {
        self.monoisotopic
    }

    pub fn is_match(&self, mass: f64) -> bool {
        (mass - self.mass).abs() < self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chemistry::PROTON;
    use crate::traits::tolerance::{
        MassTolerance,
        ToleranceInfo,
    };

    #[test]
    fn test_mass_from_m_over_z() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02));
        let peak = Peak::from_raw(RawPeak::new(500.25, 2, 100.0), PROTON, true, &tol);
        let expected = 500.25 * 2.0 - 2.0 * PROTON;
        assert!((peak.mass() - expected).abs() < 1e-9);
        assert!((peak.tolerance() - 0.04).abs() < 1e-12);
        assert!(peak.is_match(expected + 0.039));
        assert!(!peak.is_match(expected + 0.041));
        assert!(peak.average_mass() > peak.mass());
    }

    #[test]
    fn test_unknown_charge_is_single() {
        let tol = ToleranceInfo::default();
        let peak = Peak::from_raw(RawPeak::new(1000.0, 0, 1.0), PROTON, true, &tol);
        assert_eq!(peak.charge(), 1);
        assert!((peak.mass() - (1000.0 - PROTON)).abs() < 1e-9);
    }

    #[test]
    fn test_with_charge_keeps_neutral_mass() {
        let tol = ToleranceInfo::new(MassTolerance::Ppm(10.0));
        let peak = Peak::from_raw(RawPeak::new(600.3, 3, 5.0), PROTON, true, &tol);
        let single = peak.with_charge(1, &tol);
        assert_eq!(single.charge(), 1);
        assert!((single.mass() - peak.mass()).abs() < 1e-9);
        assert!((single.m_over_z() - (peak.mass() + PROTON)).abs() < 1e-9);
        assert!(single.tolerance() < peak.tolerance());
        assert!(single.monoisotopic());
    }

    #[test]
    fn test_average_mode_keeps_measured_mass() {
        let tol = ToleranceInfo::new(MassTolerance::Da(0.02));
        let raw = RawPeak::new(1000.0 + PROTON, 1, 1.0);
        let mono = Peak::from_raw(raw, PROTON, true, &tol);
        let average = Peak::from_raw(raw, PROTON, false, &tol);
        assert!((average.mass() - 1000.0).abs() < 1e-9);
        assert_eq!(average.average_mass(), average.mass());
        assert!(mono.average_mass() > average.average_mass());
        let single = average.with_charge(2, &tol);
        assert!(!single.monoisotopic());
        assert_eq!(single.average_mass(), single.mass());
    }
}
