mod common;

use std::fs;

use common::{constant_config, head_on_config, head_on_pair, scratch_dir, simulation, triple};
use nbody_engine::{
    run_in_memory, run_on_disk, store_file, DiskSink, DiskStore, Error, Field, IntegratorMethod, NVec3, Result,
    Snapshot, StorageError, Trajectory, TrajectorySink,
};

fn bits(trajectories: &[Trajectory]) -> Vec<Vec<Vec<u64>>> {
    trajectories
        .iter()
        .map(|tr| {
            tr.to_rows()
                .into_iter()
                .map(|row| row.into_iter().map(f64::to_bits).collect())
                .collect()
        })
        .collect()
}

fn snap(t: f64) -> Snapshot {
    Snapshot {
        t,
        r: NVec3::new(t, -t, 0.5),
        v: NVec3::new(1.0, 0.0, 0.0),
        a: None,
    }
}

// ==================================================================================
// Round trip
// ==================================================================================

#[test]
fn disk_round_trip_is_bit_identical() -> Result<()> {
    let dir = scratch_dir("round-trip");
    let sim = simulation(triple());
    let mut cfg = constant_config(IntegratorMethod::Rk4, 1e-2);
    cfg.record_acceleration = true;

    let memory = run_in_memory(&sim, &cfg, 1.0)?;
    // ~100 rows in chunks of 7: several full chunks and a partial one
    let path = run_on_disk(&sim, &cfg, 1.0, &dir, false, 7)?;
    assert_eq!(path, dir);

    let store = DiskStore::open(&dir)?;
    assert!(store.is_complete());
    assert_eq!(store.len(), 3);
    assert_eq!(store.masses(), &sim.masses()[..]);
    assert_eq!(store.active_count(), 3);

    let from_disk = store.trajectories()?;
    assert_eq!(bits(&from_disk), bits(&memory.objects));
    assert_eq!(from_disk[0].mass, memory.objects[0].mass);

    // field access through the lazy reader
    let mut body = store.body(2)?;
    assert_eq!(body.len()?, memory.objects[2].len());
    let ax: Vec<f64> = memory.objects[2].path.iter().map(|s| s.a.unwrap().x).collect();
    assert_eq!(body.field(Field::Ax)?, &ax[..]);
    assert_eq!(body.ax()?, &ax[..]);
    let ay: Vec<f64> = memory.objects[2].path.iter().map(|s| s.a.unwrap().y).collect();
    let az: Vec<f64> = memory.objects[2].path.iter().map(|s| s.a.unwrap().z).collect();
    assert_eq!(body.ay()?, &ay[..]);
    assert_eq!(body.az()?, &az[..]);
    assert_eq!(body.vz()?.len(), ax.len());

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn out_of_range_body_is_an_error() -> Result<()> {
    let dir = scratch_dir("out-of-range");
    run_on_disk(&simulation(triple()), &constant_config(IntegratorMethod::Euler, 0.1), 0.5, &dir, false, 16)?;
    let store = DiskStore::open(&dir)?;
    assert!(matches!(store.body(3), Err(Error::OutOfRange { index: 3, len: 3 })));
    // acceleration was not recorded
    assert!(store.body(0)?.field(Field::Az).is_err());
    assert!(matches!(store.body(1)?.ax(), Err(Error::InvalidConfig(_))));
    fs::remove_dir_all(&dir)?;
    Ok(())
}

// ==================================================================================
// Creation rules
// ==================================================================================

#[test]
fn existing_store_needs_replace() -> Result<()> {
    let dir = scratch_dir("replace");
    let sim = simulation(triple());
    let cfg = constant_config(IntegratorMethod::LeapFrog, 0.1);
    run_on_disk(&sim, &cfg, 1.0, &dir, false, 4)?;

    let failure = run_on_disk(&sim, &cfg, 1.0, &dir, false, 4).unwrap_err();
    assert!(
        matches!(failure.error, Error::Storage(StorageError::AlreadyExists(_))),
        "{}",
        failure.error
    );
    assert!(failure.partial.is_none(), "the old store is not this run's output");

    // a shorter run replaces the old chunks entirely
    run_on_disk(&sim, &cfg, 0.2, &dir, true, 4)?;
    let mut body = DiskStore::open(&dir)?.body(0)?;
    assert_eq!(body.len()?, 3);
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn file_in_place_of_directory_is_rejected() -> Result<()> {
    let path = scratch_dir("not-a-dir");
    fs::write(&path, b"occupied")?;
    let err = DiskSink::create(&path, &[1.0], 1, false, true, 8).err().expect("must fail");
    assert!(matches!(err, Error::Storage(StorageError::NotADirectory(_))), "{err}");
    fs::remove_file(&path)?;
    Ok(())
}

// ==================================================================================
// Consistency after failures
// ==================================================================================

#[test]
fn aborted_run_leaves_a_readable_store() -> Result<()> {
    let dir = scratch_dir("aborted");
    let sim = simulation(head_on_pair());
    // rows up to the coincidence at t = 1, then every retry is non-finite
    let failure = run_on_disk(&sim, &head_on_config(0), 2.0, &dir, false, 2).unwrap_err();
    assert!(matches!(failure.error, Error::IntegrationFailure { retries: 0, .. }), "{}", failure.error);
    assert_eq!(failure.partial.as_deref(), Some(dir.as_path()));

    let store = DiskStore::open(&dir)?;
    assert!(store.is_complete());
    for i in 0..store.len() {
        assert_eq!(store.body(i)?.t()?, &[0.0, 0.25, 0.5, 0.75, 1.0]);
    }
    let mut left = store.body(0)?;
    let mut right = store.body(1)?;
    assert_eq!(left.x()?.last(), Some(&0.0));
    assert_eq!(right.x()?.last(), Some(&0.0));
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn dropped_sink_flushes_partial_chunks() -> Result<()> {
    let dir = scratch_dir("dropped");
    {
        let mut sink = DiskSink::create(&dir, &[1.0, 2.0], 2, false, false, 4)?;
        for k in 0..6 {
            sink.record(0, &snap(k as f64))?;
            sink.record(1, &snap(k as f64))?;
        }
    }
    let store = DiskStore::open(&dir)?;
    assert!(store.is_complete());
    let tr = store.body(1)?.trajectory()?;
    assert_eq!(tr.len(), 6);
    assert_eq!(tr.mass, 2.0);
    assert_eq!(tr.path[5], snap(5.0));
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn unknown_body_id_is_rejected_by_the_sink() -> Result<()> {
    let dir = scratch_dir("unknown-body");
    let mut sink = DiskSink::create(&dir, &[1.0], 1, false, false, 4)?;
    assert!(matches!(sink.record(1, &snap(0.0)), Err(Error::OutOfRange { index: 1, len: 1 })));
    sink.finish()?;
    sink.finish()?;
    fs::remove_dir_all(&dir)?;
    Ok(())
}

fn four_rows_in_one_chunk(name: &str) -> Result<std::path::PathBuf> {
    let dir = scratch_dir(name);
    let mut sink = DiskSink::create(&dir, &[1.0], 1, false, false, 4)?;
    for k in 0..4 {
        sink.record(0, &snap(k as f64))?;
    }
    sink.finish()?;
    Ok(dir)
}

#[test]
fn missing_counted_chunk_is_reported_as_corrupted() -> Result<()> {
    let dir = four_rows_in_one_chunk("corrupted")?;
    {
        let file = hdf5::File::open_rw(store_file(&dir))?;
        file.group("objects/0/x")?.unlink("00000000")?;
    }

    let store = DiskStore::open(&dir)?;
    let mut body = store.body(0)?;
    assert!(body.t().is_ok());
    let err = body.x().unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::Corrupted { .. })), "{err}");
    assert!(body.trajectory().is_err());
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn half_written_chunk_is_not_read() -> Result<()> {
    let dir = four_rows_in_one_chunk("half-written")?;
    {
        // a flush that died after two of its fields, before bumping the counter
        let file = hdf5::File::open_rw(store_file(&dir))?;
        let body = file.group("objects/0")?;
        for field in ["t", "x"] {
            body.group(field)?
                .new_dataset_builder()
                .with_data(&[4.0, 5.0][..])
                .create("00000001")?;
        }
    }

    let store = DiskStore::open(&dir)?;
    let mut body = store.body(0)?;
    assert_eq!(body.t()?, &[0.0, 1.0, 2.0, 3.0]);
    let tr = body.trajectory()?;
    assert_eq!(tr.len(), 4);
    assert_eq!(tr.path[3], snap(3.0));
    fs::remove_dir_all(&dir)?;
    Ok(())
}
