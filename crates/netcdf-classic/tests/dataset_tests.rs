//! Integration tests for NetCDF dataset encoding and decoding.
//!
//! Builds small datasets resembling lidar files, encodes them, and reads
//! them back through the public reader API.

use netcdf_classic::{Dataset, DatasetBuilder, NcType, NetCdfError, Values};

// ============================================================================
// Helper functions
// ============================================================================

/// Two-channel, three-bin dataset with two records and a companion record variable.
fn lidar_like() -> DatasetBuilder {
    let mut builder = DatasetBuilder::new();
    builder.add_dimension("height", 3).unwrap();
    builder.add_dimension("channel", 2).unwrap();
    builder.add_unlimited_dimension("time").unwrap();
    builder.add_dimension("date_time", 2).unwrap();

    builder.add_attribute("location", Values::text("Antikythera"));
    builder.add_attribute("altitude", Values::Double(vec![193.0]));

    builder
        .add_variable(
            "raw_signal",
            &["time", "height", "channel"],
            Values::Int((0..12).collect()),
        )
        .unwrap();
    builder
        .add_variable(
            "measurement_time",
            &["time", "date_time"],
            Values::Int(vec![20230501, 28800, 20230501, 28830]),
        )
        .unwrap();
    builder
        .add_variable_attribute("measurement_time", "units", Values::text("yyyymmdd, s"))
        .unwrap();
    builder
        .add_variable("zenithangle", &[], Values::Float(vec![5.0]))
        .unwrap();
    builder
}

// ============================================================================
// Reading back
// ============================================================================

#[test]
fn test_dimensions_and_records() {
    let ds = Dataset::from_bytes(lidar_like().encode().unwrap()).unwrap();

    assert_eq!(ds.version(), 1);
    assert_eq!(ds.num_records(), 2);
    assert_eq!(ds.dimension_len("height"), Some(3));
    assert_eq!(ds.dimension_len("time"), Some(2));
    assert!(ds.dimension("time").unwrap().unlimited);
    assert_eq!(ds.dimension_len("missing"), None);
    assert_eq!(ds.shape("raw_signal").unwrap(), vec![2, 3, 2]);
    assert_eq!(ds.shape("zenithangle").unwrap(), Vec::<usize>::new());
}

#[test]
fn test_interleaved_record_variables() {
    let ds = Dataset::from_bytes(lidar_like().encode().unwrap()).unwrap();

    assert_eq!(
        ds.values("raw_signal").unwrap(),
        Values::Int((0..12).collect())
    );
    assert_eq!(
        ds.values("measurement_time").unwrap().to_i64_vec().unwrap(),
        vec![20230501, 28800, 20230501, 28830]
    );
}

#[test]
fn test_attributes() {
    let ds = Dataset::from_bytes(lidar_like().encode().unwrap()).unwrap();

    assert_eq!(ds.text_attribute("location").as_deref(), Some("Antikythera"));
    assert_eq!(ds.attribute("altitude").and_then(Values::first_f64), Some(193.0));

    let var = ds.variable("measurement_time").unwrap();
    assert_eq!(var.nc_type, NcType::Int);
    assert_eq!(
        var.attribute("units").and_then(Values::as_text).as_deref(),
        Some("yyyymmdd, s")
    );
}

#[test]
fn test_scalar_variable() {
    let ds = Dataset::from_bytes(lidar_like().encode().unwrap()).unwrap();
    assert_eq!(ds.values("zenithangle").unwrap().first_f64(), Some(5.0));
}

#[test]
fn test_missing_variable() {
    let ds = Dataset::from_bytes(lidar_like().encode().unwrap()).unwrap();
    assert!(matches!(
        ds.values("depol_cal_angle"),
        Err(NetCdfError::MissingData(_))
    ));
}

#[test]
fn test_lone_record_variable() {
    let mut builder = DatasetBuilder::new();
    builder.add_unlimited_dimension("time").unwrap();
    builder
        .add_variable("flag", &["time"], Values::Short(vec![1, 2, 3]))
        .unwrap();

    let ds = Dataset::from_bytes(builder.encode().unwrap()).unwrap();
    assert_eq!(ds.num_records(), 3);
    assert_eq!(ds.values("flag").unwrap(), Values::Short(vec![1, 2, 3]));
}

#[test]
fn test_inconsistent_record_counts_rejected() {
    let mut builder = DatasetBuilder::new();
    builder.add_unlimited_dimension("time").unwrap();
    builder
        .add_variable("a", &["time"], Values::Int(vec![1, 2]))
        .unwrap();
    builder
        .add_variable("b", &["time"], Values::Int(vec![1, 2, 3]))
        .unwrap();
    assert!(matches!(
        builder.encode(),
        Err(NetCdfError::ShapeMismatch { .. })
    ));
}

// ============================================================================
// Files on disk
// ============================================================================

#[test]
fn test_open_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.nc");
    std::fs::write(&path, lidar_like().encode().unwrap()).unwrap();

    let ds = Dataset::open(&path).unwrap();
    assert_eq!(ds.num_records(), 2);
}

#[test]
fn test_open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Dataset::open(dir.path().join("absent.nc")),
        Err(NetCdfError::IoError(_))
    ));
}

#[test]
fn test_corrupt_dimension_count_is_an_error() {
    let mut raw = b"CDF\x01".to_vec();
    raw.extend_from_slice(&0u32.to_be_bytes()); // numrecs
    raw.extend_from_slice(&0x0Au32.to_be_bytes()); // NC_DIMENSION
    raw.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

    assert!(matches!(
        Dataset::from_bytes(raw),
        Err(NetCdfError::InvalidFormat(_))
    ));
}

#[test]
fn test_truncated_file_on_disk_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.nc");
    let bytes = lidar_like().encode().unwrap();
    std::fs::write(&path, &bytes[..40]).unwrap();

    assert!(Dataset::open(&path).is_err());
}

#[test]
fn test_identical_definitions_encode_identically() {
    assert_eq!(lidar_like().encode().unwrap(), lidar_like().encode().unwrap());
}
