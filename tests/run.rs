use bulkload::testing::{RawTrip, write_trip_parquet};
use bulkload::{
    BackendKind, FileStatus, LoadError, Loader, LoaderConfig, MemoryStore, WorkerId,
};
use std::fs;
use std::sync::Arc;

fn memory_config(workers: usize) -> LoaderConfig {
    let mut cfg = LoaderConfig {
        backend: BackendKind::Memory,
        ..LoaderConfig::default()
    };
    cfg.load.workers = workers;
    cfg.load.batch_size = 64;
    cfg
}

fn trips(n: usize) -> Vec<RawTrip> {
    (0..n).map(RawTrip::sample).collect()
}

#[test]
fn run_dir_loads_good_files_and_skips_bad_ones() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    fs::create_dir_all(root.join("2024"))?;
    write_trip_parquet(root.join("2024/01.parquet"), &trips(300))?;
    write_trip_parquet(root.join("2024/02.parquet"), &trips(120))?;
    write_trip_parquet(root.join("empty.parquet"), &[])?;
    fs::write(root.join("garbage.parquet"), b"not parquet at all")?;
    fs::write(root.join("readme.txt"), b"ignored")?;

    let store = MemoryStore::new();
    let loader = Loader::new(memory_config(3), Arc::new(store.clone()));
    let run = loader.run_dir(root)?;

    let names: Vec<&str> = run.files.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(
        names,
        vec!["2024/01.parquet", "2024/02.parquet", "empty.parquet", "garbage.parquet"]
    );
    assert_eq!(run.with_status(FileStatus::Loaded).count(), 2);
    assert_eq!(run.with_status(FileStatus::Failed).count(), 2);
    assert!(!run.is_complete());
    assert_eq!(run.total_inserted(), 420);
    assert_eq!(store.len(), 420);
    assert_eq!(store.probes(), 1);

    let empty = &run.files[2];
    assert!(empty.report.is_none());
    assert!(empty.error.as_deref().unwrap_or_default().contains("no records"));
    let garbage = &run.files[3];
    assert!(garbage.error.as_deref().unwrap_or_default().contains("cannot decode"));

    let first = run.files[0].report.as_ref().expect("report");
    assert_eq!(first.trips.trips, 300);
    assert_eq!(first.trips.total_passengers, (0..300).map(|i| i % 4 + 1).sum::<u64>());
    Ok(())
}

#[test]
fn partially_loaded_files_are_reported_separately() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("a.parquet");
    write_trip_parquet(&path, &trips(100))?;

    let store = MemoryStore::new();
    store.refuse_connection(WorkerId(1));
    let loader = Loader::new(memory_config(2), Arc::new(store.clone()));
    let run = loader.run(&[path])?;

    assert_eq!(run.files.len(), 1);
    assert_eq!(run.files[0].status, FileStatus::Partial);
    let error = run.files[0].error.as_deref().unwrap_or_default();
    assert!(error.starts_with("Task-2 failed: connection error"), "got {error}");
    assert_eq!(run.total_inserted(), 50);
    Ok(())
}

#[test]
fn record_limit_applies_per_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_trip_parquet(tmp.path().join("a.parquet"), &trips(100))?;
    write_trip_parquet(tmp.path().join("b.parquet"), &trips(100))?;

    let store = MemoryStore::new();
    let mut cfg = memory_config(2);
    cfg.load.record_limit = 30;
    let run = Loader::new(cfg, Arc::new(store.clone())).run_dir(tmp.path())?;
    assert!(run.is_complete());
    assert_eq!(run.total_inserted(), 60);
    Ok(())
}

#[test]
fn failed_connection_check_aborts_the_run() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_trip_parquet(tmp.path().join("a.parquet"), &trips(10))?;

    let store = MemoryStore::new();
    store.refuse_connection(WorkerId(0));
    let loader = Loader::new(memory_config(2), Arc::new(store.clone()));
    let err = loader.run_dir(tmp.path()).unwrap_err();
    assert!(matches!(err, LoadError::Connection(_)));
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn missing_source_directory_is_an_error() {
    let loader = Loader::new(memory_config(1), Arc::new(MemoryStore::new()));
    assert!(matches!(
        loader.run_dir("/no/such/dir"),
        Err(LoadError::Io(_))
    ));
}

#[test]
fn run_report_is_saved_as_json() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    fs::create_dir_all(&data)?;
    write_trip_parquet(data.join("a.parquet"), &trips(50))?;
    fs::write(data.join("b.parquet"), b"junk")?;

    let loader = Loader::new(memory_config(2), Arc::new(MemoryStore::new()));
    let run = loader.run_dir(&data)?;
    let out = tmp.path().join("report.json");
    run.save_to_file(&out)?;

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
    assert_eq!(json["loaded"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["partial"], 0);
    assert_eq!(json["total_inserted"], 50);
    assert_eq!(json["files"][0]["file"], "a.parquet");
    assert_eq!(json["files"][0]["report"]["status"], "done");
    assert_eq!(json["files"][0]["report"]["workers"][1]["worker"], "Task-2");
    assert_eq!(json["files"][1]["status"], "failed");
    assert!(json["files"][1]["report"].is_null());
    Ok(())
}

#[test]
fn config_file_drives_the_loader() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tmp.path().join("data");
    fs::create_dir_all(&data)?;
    write_trip_parquet(data.join("a.parquet"), &trips(40))?;

    let cfg_path = tmp.path().join("loader.xml");
    fs::write(
        &cfg_path,
        format!(
            "<LoaderConfig>
               <backend>memory</backend>
               <source_dir>{}</source_dir>
               <load><workers>4</workers><batch_size>5</batch_size></load>
             </LoaderConfig>",
            data.display()
        ),
    )?;

    let cfg = LoaderConfig::from_xml_file(&cfg_path)?;
    assert_eq!(cfg.load.workers, 4);
    let loader = Loader::from_config(cfg)?;
    let run = loader.run_dir(loader.config().source_dir.clone())?;
    assert_eq!(run.total_inserted(), 40);
    assert_eq!(run.files[0].report.as_ref().map(|r| r.workers.len()), Some(4));
    Ok(())
}
