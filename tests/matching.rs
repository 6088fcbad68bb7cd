mod common;

use std::fs;

use dicom_deface::{Error, SeriesGrouper, SeriesMatcher, SortBy, Volume, geometry::Geometry};
use ndarray::Array3;

use common::CtSeries;

#[test]
fn grouper_orders_by_position_and_skips_junk() {
    let dir = tempfile::tempdir().unwrap();
    CtSeries::new("1.2.3.30", 5, 4, 4).write(&dir.path().join("a"));
    CtSeries::new("1.2.3.31", 3, 4, 4).write(&dir.path().join("b/nested"));
    fs::write(dir.path().join("notes.txt"), "not a dicom file").unwrap();

    let set = SeriesGrouper::scan(dir.path(), SortBy::ImagePositionPatient).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.skipped().len(), 1);
    assert!(set.single().is_none());
    assert_eq!(set.primary().unwrap().uid(), "1.2.3.30");

    let series = set.select("1.2.3.30").unwrap();
    let z: Vec<f64> = series.slices().iter().map(|s| s.position.unwrap()[2]).collect();
    assert_eq!(z, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    // files are named in reverse order of position
    assert!(series.slices()[0].path.ends_with("ct_005.dcm"));
}

#[test]
fn directory_scan_ignores_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    CtSeries::new("1.2.3.32", 3, 4, 4).write(dir.path());
    CtSeries::new("1.2.3.33", 9, 4, 4).write(&dir.path().join("nested"));

    let set = SeriesGrouper::scan_dir(dir.path(), SortBy::default()).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.single().unwrap().uid(), "1.2.3.32");
    assert_eq!(SeriesGrouper::scan(dir.path(), SortBy::default()).unwrap().len(), 2);

    let only_nested = tempfile::tempdir().unwrap();
    CtSeries::new("1.2.3.34", 2, 4, 4).write(&only_nested.path().join("nested"));
    let error = SeriesGrouper::scan_dir(only_nested.path(), SortBy::default()).unwrap_err();
    assert!(matches!(error, Error::NoSeriesFound { .. }), "{error}");
}

#[test]
fn directory_without_dicom_has_no_series() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("readme.txt"), "nothing here").unwrap();
    let error = SeriesGrouper::scan(dir.path(), SortBy::default()).unwrap_err();
    assert!(matches!(error, Error::NoSeriesFound { .. }), "{error}");
}

#[test]
fn matcher_picks_series_with_closest_slice_count() {
    let dir = tempfile::tempdir().unwrap();
    for (uid, slices) in [("1.2.3.40", 30), ("1.2.3.41", 36), ("1.2.3.42", 72)] {
        CtSeries::new(uid, slices, 4, 4).write(&dir.path().join(uid));
    }
    let set = SeriesGrouper::scan(dir.path(), SortBy::default()).unwrap();
    assert_eq!(set.len(), 3);

    let volume = Volume::new(Array3::zeros((36, 4, 4)), Geometry::default());
    let matched = SeriesMatcher::best_match(&volume, &set).unwrap();
    assert_eq!(matched.uid(), "1.2.3.41");
    assert_eq!(matched.len(), 36);

    let volume = Volume::new(Array3::zeros((70, 4, 4)), Geometry::default());
    assert_eq!(SeriesMatcher::best_match(&volume, &set).unwrap().uid(), "1.2.3.42");
}

#[test]
fn matcher_breaks_slice_count_ties_by_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let mut thin = CtSeries::new("1.2.3.50", 10, 4, 4);
    thin.slice_spacing = 0.5;
    thin.write(&dir.path().join("thin"));
    let mut thick = CtSeries::new("1.2.3.51", 10, 4, 4);
    thick.slice_spacing = 2.0;
    thick.write(&dir.path().join("thick"));
    let set = SeriesGrouper::scan(dir.path(), SortBy::default()).unwrap();

    let geometry = Geometry::from_orientation([1.0, 0.0, 0.0, 0.0, 1.0, 0.0], (0.5, 0.5, 2.0), [-32.0, -32.0, 0.0]);
    let volume = Volume::new(Array3::zeros((10, 4, 4)), geometry);
    assert_eq!(SeriesMatcher::best_match(&volume, &set).unwrap().uid(), "1.2.3.51");
}

#[test]
fn matcher_requires_same_in_plane_shape() {
    let dir = tempfile::tempdir().unwrap();
    CtSeries::new("1.2.3.60", 8, 4, 4).write(dir.path());
    let set = SeriesGrouper::scan(dir.path(), SortBy::default()).unwrap();

    let volume = Volume::new(Array3::zeros((8, 6, 4)), Geometry::default());
    let error = SeriesMatcher::best_match(&volume, &set).unwrap_err();
    assert!(
        matches!(error, Error::NoMatchingSeries { shape: (8, 6, 4), series_count: 1 }),
        "{error}"
    );
}
