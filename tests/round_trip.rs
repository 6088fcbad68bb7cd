mod common;

use dicom_deface::pipeline::{dicom_to_nifti, nifti_to_dicom};
use dicom_deface::{MetadataSidecar, SeriesGrouper, SortBy, nifti_io};
use dicom_dictionary_std::tags;

use common::{CtSeries, FRAME_OF_REFERENCE_UID, STUDY_UID, element_text, hu_value, read_hu};

#[test]
fn forward_conversion_writes_volume_and_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dicom");
    CtSeries::new("1.2.3.10", 5, 6, 8).write(&input);

    let assembled = dicom_to_nifti(&input, &dir.path().join("nifti"), None).unwrap();
    assert!(assembled.nifti_path.ends_with("1.2.3.10_0000.nii.gz"));
    assert!(assembled.sidecar_path.ends_with("1.2.3.10_0000.json"));

    let volume = nifti_io::read_volume(&assembled.nifti_path).unwrap();
    assert_eq!(volume.dim(), (5, 6, 8));
    for ((k, r, c), value) in volume.data.indexed_iter() {
        assert_eq!(*value, hu_value(k, r, c), "voxel {k},{r},{c}");
    }
    assert!((volume.geometry.spacing.2 - 1.0).abs() < 1e-6);
    assert!((volume.geometry.spacing.0 - 0.5).abs() < 1e-6);

    let sidecar = MetadataSidecar::read(&assembled.sidecar_path).unwrap();
    assert_eq!(sidecar.patient_id.as_deref(), Some("PAT-0042"));
    assert_eq!(sidecar.study_instance_uid.as_deref(), Some(STUDY_UID));
    assert_eq!(sidecar.series_instance_uid.as_deref(), Some("1.2.3.10"));
    assert_eq!(sidecar.frame_of_reference_uid.as_deref(), Some(FRAME_OF_REFERENCE_UID));
    assert_eq!(sidecar.slice_thickness, Some(1.0));
    assert_eq!(sidecar.pixel_spacing, [0.5, 0.5]);
    assert_eq!(sidecar.slices.len(), 5);
    assert_eq!(sidecar.slices[4].image_position_patient, [-32.0, -32.0, 4.0]);
    assert_eq!(sidecar.slices[4].rescale_intercept, Some(-1024.0));
}

#[test]
fn sidecar_path_round_trip_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dicom");
    let originals = CtSeries::new("1.2.3.11", 4, 6, 5).write(&input);

    let assembled = dicom_to_nifti(&input, &dir.path().join("nifti"), None).unwrap();
    let output = dir.path().join("rebuilt");
    let written = nifti_to_dicom(&assembled.nifti_path, &output, None).unwrap();
    assert_eq!(written.len(), 4);

    let original = SeriesGrouper::scan(&input, SortBy::default()).unwrap();
    let rebuilt = SeriesGrouper::scan(&output, SortBy::default()).unwrap();
    let original = original.single().unwrap();
    let rebuilt = rebuilt.single().unwrap();
    assert_eq!(rebuilt.uid(), "1.2.3.11");

    for (a, b) in original.slices().iter().zip(rebuilt.slices()) {
        assert_eq!(read_hu(&a.path), read_hu(&b.path));
        assert_eq!(a.position, b.position);
        assert_eq!(a.orientation, b.orientation);
        assert_eq!(a.pixel_spacing, b.pixel_spacing);
        assert_eq!(a.instance_number, b.instance_number);
        assert_eq!(a.format, b.format);
        assert_eq!(a.rescale, b.rescale);
        for tag in [
            tags::PATIENT_ID,
            tags::PATIENT_NAME,
            tags::STUDY_INSTANCE_UID,
            tags::FRAME_OF_REFERENCE_UID,
            tags::MODALITY,
            tags::SERIES_DESCRIPTION,
        ] {
            assert_eq!(element_text(&a.path, tag), element_text(&b.path, tag), "{tag}");
        }
    }
    assert_eq!(originals.len(), 4);
}

#[test]
fn missing_sidecar_synthesizes_a_minimal_series() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dicom");
    CtSeries::new("1.2.3.12", 3, 4, 4).write(&input);

    let assembled = dicom_to_nifti(&input, &dir.path().join("nifti"), None).unwrap();
    std::fs::remove_file(&assembled.sidecar_path).unwrap();

    let output = dir.path().join("rebuilt");
    let written = nifti_to_dicom(&assembled.nifti_path, &output, None).unwrap();
    assert_eq!(written.len(), 3);

    let rebuilt = SeriesGrouper::scan(&output, SortBy::default()).unwrap();
    let series = rebuilt.single().unwrap();
    assert_ne!(series.uid(), "1.2.3.12");
    assert!(series.uid().starts_with("2.25."));
    for (k, slice) in series.slices().iter().enumerate() {
        let image = read_hu(&slice.path);
        assert_eq!(image[[1, 2]], hu_value(k, 1, 2));
        let z = slice.position.unwrap()[2];
        assert!((z - k as f64).abs() < 1e-3, "slice {k} at {z}");
    }
}
