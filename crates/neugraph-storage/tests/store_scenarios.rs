use neugraph_storage::{
    Direction, OpenMode, SeriesSource, StorageError, TimeSeriesStore, TraceFile, TraceFileWriter,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn write_output(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("output.vtrc");
    TraceFileWriter::new()
        .dt(0.5)
        .variable_rows(
            "V",
            ["a", "b"],
            &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]],
        )
        .unwrap()
        .variable_rows("spike_state", ["b"], &[vec![0.0], vec![1.0], vec![0.0], vec![0.0]])
        .unwrap()
        .write_to(&path)
        .unwrap();
    path
}

#[test]
fn output_scenario_time_and_fetch() {
    let tmp = tempdir().unwrap();
    let path = write_output(tmp.path());

    let mut store = TimeSeriesStore::new();
    store.open(&path, Direction::Output, OpenMode::ReadOnly).unwrap();

    assert_eq!(&store.time_vector().unwrap()[..], &[0.0, 0.5, 1.0, 1.5]);
    assert_eq!(
        &store.fetch("b", Direction::Output, "V").unwrap()[..],
        &[2.0, 4.0, 6.0, 8.0]
    );
}

#[test]
fn node_missing_from_one_variable_is_a_per_variable_miss() {
    let tmp = tempdir().unwrap();
    let path = write_output(tmp.path());

    let mut store = TimeSeriesStore::new();
    store.open_str(&path, "output", "r").unwrap();

    assert!(store.fetch("a", Direction::Output, "V").is_ok());
    let err = store.fetch("a", Direction::Output, "spike_state").unwrap_err();
    assert!(err.is_sparsity_miss());
}

#[test]
fn string_entry_point_rejects_unknown_direction_and_mode() {
    let tmp = tempdir().unwrap();
    let path = write_output(tmp.path());

    let mut store = TimeSeriesStore::new();
    assert!(matches!(
        store.open_str(&path, "lateral", "r"),
        Err(StorageError::UnsupportedDirection { .. })
    ));
    assert!(matches!(
        store.open_str(&path, "output", "w"),
        Err(StorageError::UnsupportedMode { .. })
    ));
    assert!(!store.is_open(Direction::Output));
}

#[test]
fn mismatched_input_file_is_rejected_without_touching_output() {
    let tmp = tempdir().unwrap();
    let out_path = write_output(tmp.path());
    let in_path = tmp.path().join("input.vtrc");
    TraceFileWriter::new()
        .variable("I", ["a", "b"], 3, vec![0.0; 6])
        .unwrap()
        .write_to(&in_path)
        .unwrap();

    let mut store = TimeSeriesStore::new();
    store.open(&out_path, Direction::Output, OpenMode::ReadOnly).unwrap();
    let err = store
        .open(&in_path, Direction::Input, OpenMode::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, StorageError::InconsistentLength { .. }));

    assert_eq!(store.time_metadata().unwrap().steps(), 4);
    assert_eq!(
        &store.fetch("a", Direction::Output, "V").unwrap()[..],
        &[1.0, 3.0, 5.0, 7.0]
    );
}

#[test]
fn second_variable_with_other_length_fails_open() {
    // A hand-built file whose two variables disagree on step count.
    let bytes = TraceFileWriter::new()
        .dt(1.0)
        .variable("V", ["a"], 4, vec![0.0; 4])
        .unwrap()
        .variable("g", ["a"], 3, vec![0.0; 3])
        .unwrap()
        .to_bytes()
        .unwrap();
    let file = TraceFile::from_bytes(bytes).unwrap();

    let mut store = TimeSeriesStore::new();
    let err = store.attach(Direction::Output, file).unwrap_err();
    assert!(matches!(
        err,
        StorageError::InconsistentLength { expected: 4, found: 3, .. }
    ));
    assert!(matches!(store.time_vector(), Err(StorageError::NotInitialized)));
}

#[test]
fn cached_series_survive_file_replacement() {
    let tmp = tempdir().unwrap();
    let path = write_output(tmp.path());

    let mut store = TimeSeriesStore::new();
    store.open(&path, Direction::Output, OpenMode::ReadOnly).unwrap();
    let before = store.fetch("a", Direction::Output, "V").unwrap();

    store.close(Direction::Output);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(&before[..], &[1.0, 3.0, 5.0, 7.0]);
}

proptest! {
    #[test]
    fn time_vector_is_index_times_dt(dt in 1e-6f64..10.0, steps in 0usize..64, columns in 1usize..4) {
        let uids: Vec<String> = (0..columns).map(|c| format!("n{}", c)).collect();
        let bytes = TraceFileWriter::new()
            .dt(dt)
            .variable("V", uids, steps, vec![0.0; steps * columns])
            .unwrap()
            .to_bytes()
            .unwrap();

        let mut store = TimeSeriesStore::new();
        store.attach(Direction::Output, TraceFile::from_bytes(bytes).unwrap()).unwrap();

        let time = store.time_vector().unwrap();
        prop_assert_eq!(time.len(), steps);
        for (i, t) in time.iter().enumerate() {
            prop_assert_eq!(*t, i as f64 * dt);
        }
    }
}
