use crate::errors::{
    InputError,
    Result,
};
use crate::utils::tolerance_ranges::MassRange;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt::Display;

/// A tolerance magnitude tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MassTolerance {
    Da(f64),
    Ppm(f64),
    Percent(f64),
    Mmu(f64),
}

impl MassTolerance {
    pub fn value(&self) -> f64 {
        match self {
            MassTolerance::Da(x)
            | MassTolerance::Ppm(x)
            | MassTolerance::Percent(x)
            | MassTolerance::Mmu(x) => *x,
        }
    }

    pub fn unit_name(&self) -> &'static str {
        match self {
            MassTolerance::Da(_) => "Da",
            MassTolerance::Ppm(_) => "ppm",
            MassTolerance::Percent(_) => "%",
            MassTolerance::Mmu(_) => "mmu",
        }
    }

    /// Converts `value`, expressed in this unit, into Daltons at `(mass, charge)`.
    fn to_daltons(&self, value: f64, mass: f64, charge: u8) -> f64 {
        let charge = charge_factor(charge);
        match self {
            MassTolerance::Da(_) => value * charge,
            MassTolerance::Ppm(_) => mass * value * charge / 1e6,
            MassTolerance::Percent(_) => mass * value * charge / 100.0,
            MassTolerance::Mmu(_) => value * charge / 1000.0,
        }
    }

    /// Converts a calibration error expressed in this unit into a mass
    /// correction in Daltons.
    fn correction_daltons(&self, error: f64, mass: f64) -> f64 {
        match self {
            MassTolerance::Da(_) => error,
            MassTolerance::Ppm(_) => mass * error / 1e6,
            MassTolerance::Percent(_) => mass * error / 100.0,
            MassTolerance::Mmu(_) => error / 1000.0,
        }
    }
}

impl Display for MassTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value(), self.unit_name())
    }
}

// An unknown (0) charge is treated as singly charged.
fn charge_factor(charge: u8) -> f64 {
    charge.max(1) as f64
}

/// Tolerance configuration shared read-only by every matching operation.
///
/// `systematic_error` is expressed in the same unit as `tolerance` and
/// shifts the matching window away from zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceInfo {
    pub tolerance: MassTolerance,
    #[serde(default)]
    pub systematic_error: f64,
}

impl Default for ToleranceInfo {
    fn default() -> Self {
        ToleranceInfo {
            tolerance: MassTolerance::Da(1.0),
            systematic_error: 0.0,
        }
    }
}

impl ToleranceInfo {
    pub fn new(tolerance: MassTolerance) -> Self {
        Self {
            tolerance,
            systematic_error: 0.0,
        }
    }

    pub fn with_systematic_error(mut self, systematic_error: f64) -> Self {
        self.systematic_error = systematic_error;
        self
    }

    /// Parses strings such as `"0.02 Da"`, `"10ppm"`, `"0.1 %"` or `"20 mmu"`.
    ///
    /// A missing string falls back to the default of 1 Da.
    ///
    /// # Example
    /// ```
    /// use seqmatch::traits::tolerance::{MassTolerance, ToleranceInfo};
    ///
    /// let tol = ToleranceInfo::parse(Some("10 ppm")).unwrap();
    /// assert_eq!(tol.tolerance, MassTolerance::Ppm(10.0));
    /// let tol = ToleranceInfo::parse(None).unwrap();
    /// assert_eq!(tol.tolerance, MassTolerance::Da(1.0));
    /// ```
    pub fn parse(config: Option<&str>) -> Result<Self> {
        let config = match config {
            Some(x) => x.trim(),
            None => return Ok(Self::default()),
        };
        let invalid = || InputError::InvalidTolerance {
            value: config.to_string(),
        };

        let split_at = config
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
            .ok_or_else(invalid)?;
        let (number, unit) = config.split_at(split_at);
        let value: f64 = number.trim().parse().map_err(|_| invalid())?;
        if value < 0.0 || !value.is_finite() {
            return Err(invalid().into());
        }

        let tolerance = match unit.trim().to_ascii_lowercase().as_str() {
            "da" | "dalton" | "daltons" => MassTolerance::Da(value),
            "ppm" => MassTolerance::Ppm(value),
            "%" | "pct" | "percent" => MassTolerance::Percent(value),
            "mmu" => MassTolerance::Mmu(value),
            _ => return Err(invalid().into()),
        };
        Ok(Self::new(tolerance))
    }
}

/// Unit aware mass comparison primitives.
///
/// Every method is a pure function of the tolerance configuration and its
/// arguments, implementations must not keep mutable state.
pub trait Tolerance {
    /// Half width of the matching window, in Daltons.
    fn tolerance(&self, mass: f64, charge: u8) -> f64;

    /// Center of the matching window relative to the measured mass, in Daltons.
    fn offset(&self, mass: f64, charge: u8) -> f64;

    fn lower_tolerance(&self, mass: f64, charge: u8) -> f64 {
        self.offset(mass, charge) - self.tolerance(mass, charge)
    }

    fn upper_tolerance(&self, mass: f64, charge: u8) -> f64 {
        self.offset(mass, charge) + self.tolerance(mass, charge)
    }

    /// Window of theoretical masses that match a measured `mass`, the
    /// measured mass being `offset` above the actual one.
    fn mass_range(&self, mass: f64, charge: u8) -> MassRange {
        MassRange::new(
            mass - self.upper_tolerance(mass, charge),
            mass - self.lower_tolerance(mass, charge),
        )
    }

    /// Signed error of `measured` against `actual`, in the tolerance unit.
    fn error(&self, measured: f64, actual: f64, charge: u8) -> f64;

    /// Recovers the actual mass given a measured mass and its error.
    fn actual_mass(&self, measured: f64, error: f64, charge: u8) -> f64;

    /// Recovers the measured mass given an actual mass and its error.
    fn measured_mass(&self, actual: f64, error: f64, charge: u8) -> f64;

    /// Correction for the configured systematic error, in Daltons.
    fn correction(&self, mass: f64) -> f64;

    /// Correction for a linear calibration `offset + gradient * m_over_z`
    /// expressed in the tolerance unit, in Daltons.
    fn linear_correction(&self, m_over_z: f64, gradient: f64, offset: f64) -> f64;
}

impl Tolerance for ToleranceInfo {
    fn tolerance(&self, mass: f64, charge: u8) -> f64 {
        self.tolerance
            .to_daltons(self.tolerance.value(), mass, charge)
    }

    fn offset(&self, mass: f64, charge: u8) -> f64 {
        self.tolerance
            .to_daltons(self.systematic_error, mass, charge)
    }

    fn error(&self, measured: f64, actual: f64, charge: u8) -> f64 {
        let diff = measured - actual;
        match self.tolerance {
            MassTolerance::Da(_) => diff / charge_factor(charge),
            MassTolerance::Ppm(_) => diff * 1e6 / actual,
            MassTolerance::Percent(_) => diff * 100.0 / actual,
            MassTolerance::Mmu(_) => diff * 1000.0 / charge_factor(charge),
        }
    }

    fn actual_mass(&self, measured: f64, error: f64, charge: u8) -> f64 {
        match self.tolerance {
            MassTolerance::Da(_) => measured - error * charge_factor(charge),
            MassTolerance::Ppm(_) => measured / (1.0 + error / 1e6),
            MassTolerance::Percent(_) => measured / (1.0 + error / 100.0),
            MassTolerance::Mmu(_) => measured - error * charge_factor(charge) / 1000.0,
        }
    }

    fn measured_mass(&self, actual: f64, error: f64, charge: u8) -> f64 {
        match self.tolerance {
            MassTolerance::Da(_) => actual + error * charge_factor(charge),
            MassTolerance::Ppm(_) => actual + actual * error / 1e6,
            MassTolerance::Percent(_) => actual + actual * error / 100.0,
            MassTolerance::Mmu(_) => actual + error * charge_factor(charge) / 1000.0,
        }
    }

    fn correction(&self, mass: f64) -> f64 {
        self.tolerance
            .correction_daltons(self.systematic_error, mass)
    }

    fn linear_correction(&self, m_over_z: f64, gradient: f64, offset: f64) -> f64 {
        let error = offset + gradient * m_over_z;
        self.tolerance.correction_daltons(error, m_over_z)
    }
}
