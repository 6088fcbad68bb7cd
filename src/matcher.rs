use std::cmp::Ordering;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::series::Series;
use crate::series_grouper::SeriesSet;
use crate::volume::Volume;

/// How close a series is to a processed volume. Compared lexicographically,
/// smaller is better.
#[derive(Debug, Clone, PartialEq)]
struct MatchScore<'a> {
    depth_difference: usize,
    spacing_distance: f64,
    orientation_distance: f64,
    uid: &'a str,
}

impl MatchScore<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        self.depth_difference
            .cmp(&other.depth_difference)
            .then_with(|| self.spacing_distance.total_cmp(&other.spacing_distance))
            .then_with(|| self.orientation_distance.total_cmp(&other.orientation_distance))
            .then_with(|| self.uid.cmp(other.uid))
    }
}

pub struct SeriesMatcher;

impl SeriesMatcher {
    /// Find the series a processed volume was derived from.
    ///
    /// A series is plausible when it is non-empty and its slices share the
    /// volume's in-plane shape. Among plausible series the one whose slice
    /// count is closest to the volume depth wins, then the closest spacing,
    /// then the closest orientation, then the smallest SeriesInstanceUID.
    pub fn best_match<'a>(volume: &Volume, series: &'a SeriesSet) -> Result<&'a Series> {
        Self::best_match_in(volume, series.iter())
    }

    pub fn best_match_in<'a>(
        volume: &Volume,
        candidates: impl IntoIterator<Item = &'a Series>,
    ) -> Result<&'a Series> {
        let in_plane = volume.in_plane_shape();
        let depth = volume.depth();
        let mut inspected = 0;

        let best = candidates
            .into_iter()
            .inspect(|_| inspected += 1)
            .filter(|series| !series.is_empty() && series.in_plane_shape() == Some(in_plane))
            .map(|series| {
                let geometry = series.geometry();
                let score = MatchScore {
                    depth_difference: series.len().abs_diff(depth),
                    spacing_distance: geometry.spacing_distance(&volume.geometry),
                    orientation_distance: geometry.orientation_distance(&volume.geometry),
                    uid: series.uid(),
                };
                debug!(series = series.uid(), ?score, "plausible series");
                (score, series)
            })
            .min_by(|(a, _), (b, _)| a.compare(b))
            .map(|(_, series)| series);

        match best {
            Some(series) => {
                info!(
                    series = series.uid(),
                    slices = series.len(),
                    volume_depth = depth,
                    "matched processed volume to series"
                );
                Ok(series)
            }
            None => Err(Error::NoMatchingSeries {
                shape: volume.dim(),
                series_count: inspected,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use ndarray::Array3;

    #[test]
    fn score_orders_depth_before_uid() {
        let near = MatchScore {
            depth_difference: 0,
            spacing_distance: 5.0,
            orientation_distance: 1.0,
            uid: "9",
        };
        let far = MatchScore {
            depth_difference: 1,
            spacing_distance: 0.0,
            orientation_distance: 0.0,
            uid: "1",
        };
        assert_eq!(near.compare(&far), Ordering::Less);

        let tie = MatchScore { uid: "1", ..near.clone() };
        assert_eq!(tie.compare(&near), Ordering::Less);
    }

    #[test]
    fn no_series_is_no_match() {
        let volume = Volume::new(Array3::zeros((36, 4, 4)), Geometry::default());
        let error = SeriesMatcher::best_match_in(&volume, std::iter::empty()).unwrap_err();
        assert!(matches!(
            error,
            Error::NoMatchingSeries { shape: (36, 4, 4), series_count: 0 }
        ));
    }
}
