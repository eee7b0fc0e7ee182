use arrow::array::{
    ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray, TimestampNanosecondArray,
};
use arrow::record_batch::RecordBatch;
use bulkload::decode::{DecodeOptions, decode_file};
use bulkload::io::inspect_schema;
use bulkload::io::parquet::ParquetRowReader;
use bulkload::record::Record;
use bulkload::testing::{BASE_MICROS, RawTrip, write_batch_parquet, write_trip_parquet};
use bulkload::LoadError;
use std::sync::Arc;

#[test]
fn decodes_well_formed_rows_across_batches() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("trips.parquet");
    let rows: Vec<RawTrip> = (0..50).map(RawTrip::sample).collect();
    write_trip_parquet(&path, &rows)?;

    let opts = DecodeOptions {
        read_batch_size: 7,
        ..DecodeOptions::default()
    };
    let records = decode_file(&path, opts)?;
    assert_eq!(records.len(), 50);

    let r = records[3];
    assert_eq!(r.vendor_id, 2);
    assert_eq!(r.passenger_count, 4);
    assert_eq!(r.trip_distance, 0.3);
    assert_eq!(r.rate_code_id, 1);
    assert_eq!(r.store_and_fwd_flag, 'N');
    assert_eq!(r.pu_location_id, 4);
    assert_eq!(r.fare_amount, 8.0);
    assert_eq!(r.total_amount, 10.55);
    assert_eq!(
        r.pickup_datetime.map(|t| t.to_string()).as_deref(),
        Some("2024-01-01 00:00:03")
    );
    assert_eq!(
        r.dropoff_datetime.map(|t| t.to_string()).as_deref(),
        Some("2024-01-01 00:10:03")
    );
    assert_eq!(records[10].store_and_fwd_flag, 'Y');
    Ok(())
}

#[test]
fn corrupt_values_are_clamped_not_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("corrupt.parquet");
    let bad = RawTrip {
        vendor_id: Some(-5),
        passenger_count: Some(300.7),
        trip_distance: Some(f64::INFINITY),
        rate_code_id: Some(f64::NAN),
        store_and_fwd_flag: Some(String::new()),
        pu_location_id: Some(70_000),
        do_location_id: Some(-1),
        payment_type: Some(i64::MAX),
        fare_amount: Some(f64::NAN),
        total_amount: Some(1e20),
        tip_amount: Some(-3.0),
        extra: Some(1.005_1),
        ..RawTrip::default()
    };
    write_trip_parquet(&path, &[bad, RawTrip::default(), RawTrip::sample(1)])?;

    let records = decode_file(&path, DecodeOptions::default())?;
    assert_eq!(records.len(), 3);

    let r = records[0];
    assert_eq!(r.vendor_id, 0);
    assert_eq!(r.passenger_count, 255);
    assert_eq!(r.trip_distance, 0.0);
    assert_eq!(r.rate_code_id, 0);
    assert_eq!(r.store_and_fwd_flag, 'N');
    assert_eq!(r.pu_location_id, 65_535);
    assert_eq!(r.do_location_id, 0);
    assert_eq!(r.payment_type, 255);
    assert_eq!(r.fare_amount, 0.0);
    assert_eq!(r.total_amount, 99_999_999.99);
    assert_eq!(r.tip_amount, 0.0);
    assert_eq!(r.extra, 1.01);
    assert_eq!(r.pickup_datetime, None);

    assert_eq!(records[1], Record::default());
    assert_eq!(records[2].vendor_id, 2);
    Ok(())
}

#[test]
fn missing_and_mistyped_columns_use_defaults() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("partial.parquet");
    let batch = RecordBatch::try_from_iter(vec![
        (
            "fare_amount",
            Arc::new(Float64Array::from(vec![Some(12.345), None, Some(-1.0)])) as ArrayRef,
        ),
        (
            "VendorID",
            Arc::new(StringArray::from(vec!["7", "abc", "300"])) as ArrayRef,
        ),
        (
            "unrelated",
            Arc::new(StringArray::from(vec!["x", "y", "z"])) as ArrayRef,
        ),
    ])?;
    write_batch_parquet(&path, &batch)?;

    let records = decode_file(&path, DecodeOptions::default())?;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].fare_amount, 12.35);
    assert_eq!(records[0].vendor_id, 7);
    assert_eq!(records[1].fare_amount, 0.0);
    assert_eq!(records[1].vendor_id, 0);
    assert_eq!(records[2].fare_amount, 0.0);
    assert_eq!(records[2].vendor_id, 255);
    for r in &records {
        assert_eq!(r.passenger_count, 0);
        assert_eq!(r.store_and_fwd_flag, 'N');
        assert_eq!(r.pickup_datetime, None);
    }
    Ok(())
}

#[test]
fn native_timestamp_columns_are_read_as_utc() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("ts.parquet");
    let pickup = TimestampMicrosecondArray::from(vec![Some(BASE_MICROS), None]).with_timezone("UTC");
    let dropoff = TimestampNanosecondArray::from(vec![Some(BASE_MICROS * 1_000 + 90_000_000_000), None]);
    let batch = RecordBatch::try_from_iter(vec![
        ("tpep_pickup_datetime", Arc::new(pickup) as ArrayRef),
        ("tpep_dropoff_datetime", Arc::new(dropoff) as ArrayRef),
    ])?;
    write_batch_parquet(&path, &batch)?;

    let records = decode_file(&path, DecodeOptions::default())?;
    assert_eq!(
        records[0].pickup_datetime.map(|t| t.to_string()).as_deref(),
        Some("2024-01-01 00:00:00")
    );
    assert_eq!(
        records[0].dropoff_datetime.map(|t| t.to_string()).as_deref(),
        Some("2024-01-01 00:01:30")
    );
    assert_eq!(records[1].pickup_datetime, None);
    assert_eq!(records[1].dropoff_datetime, None);
    Ok(())
}

#[test]
fn limit_caps_the_record_count() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("trips.parquet");
    let rows: Vec<RawTrip> = (0..100).map(RawTrip::sample).collect();
    write_trip_parquet(&path, &rows)?;

    let limited = decode_file(
        &path,
        DecodeOptions {
            limit: 10,
            read_batch_size: 8,
            ..DecodeOptions::default()
        },
    )?;
    assert_eq!(limited.len(), 10);
    assert_eq!(limited[9].pu_location_id, 10);

    let generous = decode_file(
        &path,
        DecodeOptions {
            limit: 1_000,
            ..DecodeOptions::default()
        },
    )?;
    assert_eq!(generous.len(), 100);
    Ok(())
}

#[test]
fn reader_stops_at_the_limit() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("trips.parquet");
    let rows: Vec<RawTrip> = (0..100).map(RawTrip::sample).collect();
    write_trip_parquet(&path, &rows)?;

    let mut reader = ParquetRowReader::open(&path, 64 * 1024, 5)?;
    let first = reader.next_batch()?.expect("one batch");
    assert_eq!(first.num_rows(), 5);
    assert!(reader.next_batch()?.is_none());

    let mut unlimited = ParquetRowReader::open(&path, 64 * 1024, 0)?;
    assert_eq!(unlimited.next_batch()?.map(|b| b.num_rows()), Some(100));
    Ok(())
}

#[test]
fn empty_file_decodes_to_nothing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("empty.parquet");
    write_trip_parquet(&path, &[])?;
    assert!(decode_file(&path, DecodeOptions::default())?.is_empty());
    Ok(())
}

#[test]
fn unreadable_sources_are_decode_errors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let not_parquet = tmp.path().join("bogus.parquet");
    std::fs::write(&not_parquet, b"definitely not parquet")?;

    let err = decode_file(&not_parquet, DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::Decode { .. }), "got {err:?}");

    let missing = tmp.path().join("missing.parquet");
    let err = decode_file(&missing, DecodeOptions::default()).unwrap_err();
    match err {
        LoadError::Decode { path, .. } => assert_eq!(path, missing),
        other => panic!("expected decode error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn inspect_lists_columns_and_first_row() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("trips.parquet");
    let rows: Vec<RawTrip> = (0..5).map(RawTrip::sample).collect();
    write_trip_parquet(&path, &rows)?;

    let summary = inspect_schema(&path)?;
    assert_eq!(summary.num_rows, 5);
    assert_eq!(summary.columns.len(), 18);
    assert_eq!(summary.columns[0].name, "VendorID");
    assert_eq!(summary.columns[0].sample.as_deref(), Some("1"));
    let flag = summary
        .columns
        .iter()
        .find(|c| c.name == "store_and_fwd_flag")
        .expect("flag column");
    assert_eq!(flag.sample.as_deref(), Some("Y"));
    Ok(())
}
