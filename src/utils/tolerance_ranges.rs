use serde::{
    Deserialize,
    Serialize,
};

/// Closed mass interval `[start, end]`.
///
/// Used for the mass windows a peak tolerance implies and for the
/// mass-shift windows handed to the modification table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassRange {
    start: f64,
    end: f64,
}

impl MassRange {
    /// Builds a range, swapping the bounds if they come in reverse.
    ///
    /// # Example
    /// ```
    /// use seqmatch::utils::tolerance_ranges::MassRange;
    ///
    /// let r = MassRange::new(10.0, 5.0);
    /// assert_eq!(r.start(), 5.0);
    /// assert_eq!(r.end(), 10.0);
    /// ```
    pub fn new(start: f64, end: f64) -> Self {
        if start > end {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    pub fn around(center: f64, half_width: f64) -> Self {
        Self::new(center - half_width, center + half_width)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.start && x <= self.end
    }

    pub fn intersects(&self, other: &MassRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Shifts both bounds by `-offset`, turning an observed mass window
    /// into the mass-shift window left to explain once `offset` is accounted for.
    pub fn minus(&self, offset: f64) -> Self {
        Self {
            start: self.start - offset,
            end: self.end - offset,
        }
    }
}
