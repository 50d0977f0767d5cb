use super::camera_pose::PoseQuality;
use super::localized_object_point::LocalizationPrecision;

/// Minimal number of observations for a valid pose, exclusive.
const MIN_OBSERVATIONS: usize = 10;
/// Number of high precision points making a pose high quality on their own.
const HIGH_PRECISION_POINTS: usize = 30;
/// Number of high precision points which, together with enough medium precision points,
/// make a pose high quality.
const HIGH_PRECISION_POINTS_WITH_MEDIUM: usize = 10;
const MEDIUM_PRECISION_POINTS: usize = 30;

/// Tallies the precisions of the object points supporting a camera pose.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoseQualityCalculator {
    number_high_precision: usize,
    number_medium_precision: usize,
    number_low_precision: usize,
    number_unknown_precision: usize,
}

impl PoseQualityCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_precisions<'a>(precisions: impl IntoIterator<Item = &'a LocalizationPrecision>) -> Self {
        let mut calculator = Self::new();
        for precision in precisions {
            calculator.add_object_point(*precision);
        }
        calculator
    }

    /// Adds one supporting object point, invalid precisions are ignored.
    pub fn add_object_point(&mut self, precision: LocalizationPrecision) {
        match precision {
            LocalizationPrecision::High => self.number_high_precision += 1,
            LocalizationPrecision::Medium => self.number_medium_precision += 1,
            LocalizationPrecision::Low => self.number_low_precision += 1,
            LocalizationPrecision::Unknown => self.number_unknown_precision += 1,
            LocalizationPrecision::Invalid => {
                debug_assert!(false, "object point with invalid precision");
                log::warn!("Ignoring object point with invalid precision");
            }
        }
    }

    pub fn number_observations(&self) -> usize {
        self.number_high_precision
            + self.number_medium_precision
            + self.number_low_precision
            + self.number_unknown_precision
    }

    pub fn pose_quality(&self) -> PoseQuality {
        if self.number_observations() <= MIN_OBSERVATIONS {
            return PoseQuality::Invalid;
        }

        if self.number_high_precision >= HIGH_PRECISION_POINTS
            || (self.number_high_precision >= HIGH_PRECISION_POINTS_WITH_MEDIUM
                && self.number_medium_precision >= MEDIUM_PRECISION_POINTS)
        {
            return PoseQuality::High;
        }

        if self.number_medium_precision >= MEDIUM_PRECISION_POINTS {
            return PoseQuality::Medium;
        }

        PoseQuality::Low
    }
}
