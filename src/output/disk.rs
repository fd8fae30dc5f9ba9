//! HDF5 trajectory store
//!
//! One file per run, `<dir>/res.h5`:
//!
//! ```text
//! /                                  attrs: version, bodies, active_count,
//!                                           chunk_len, record_acceleration, complete
//! /objects/<id>                      attr `chunks`, dataset `m` (mass)
//! /objects/<id>/<field>/<chunk:08>   1-D f64 dataset, up to `chunk_len` rows
//! ```
//!
//! Writing happens on a flush worker fed through a bounded queue; when the
//! queue is full the stepping loop blocks until the worker catches up. The
//! worker writes every field of a chunk before bumping the body's `chunks`
//! counter and flushing the file. Readers only look at counted chunks, so a
//! run that died mid-flush still reads back as a consistent prefix.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use hdf5::{File, Group, Location};

use crate::error::{Error, Result, StorageError};
use crate::output::memory::Trajectory;
use crate::output::{Field, TrajectorySink};
use crate::simulation::states::{NVec3, Snapshot};

/// Rows per chunk unless told otherwise
pub const DEFAULT_CHUNK_LEN: usize = 65_536;

const FORMAT_VERSION: u64 = 1;
const STORE_FILE: &str = "res.h5";
const OBJECTS_GROUP: &str = "objects";
const MASS_DATASET: &str = "m";
const COMMITTED_ATTR: &str = "chunks";
const QUEUE_DEPTH: usize = 4; // pending chunk batches before the producer blocks

/// Path of the HDF5 file inside a store directory
pub fn store_file(dir: &Path) -> PathBuf {
    dir.join(STORE_FILE)
}

/// Run-level metadata kept as attributes on the file root
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    pub version: u64,
    pub bodies: usize,
    pub masses: Vec<f64>,
    pub active_count: usize,
    pub fields: Vec<Field>,
    pub chunk_len: usize,
    pub complete: bool, // set once the writer was closed cleanly
}

// =========================================================================================
// hdf5 helpers
// =========================================================================================

/// Zero padded so h5py lists chunks in order
fn chunk_name(chunk: usize) -> String {
    format!("{chunk:08}")
}

fn body_group_name(body: usize) -> String {
    format!("{OBJECTS_GROUP}/{body}")
}

fn set_attr(loc: &Location, name: &str, value: u64) -> hdf5::Result<()> {
    if loc.attr_names()?.iter().any(|n| n == name) {
        loc.attr(name)?.write_raw(&[value])
    } else {
        loc.new_attr_builder().with_data(&[value][..]).create(name)?;
        Ok(())
    }
}

fn get_attr(loc: &Location, name: &str, file: &Path) -> Result<u64> {
    let values = loc.attr(name)?.read_raw::<u64>()?;
    values.first().copied().ok_or_else(|| {
        StorageError::Corrupted {
            path: file.to_path_buf(),
            reason: format!("attribute {name} is empty"),
        }
        .into()
    })
}

/// Fresh file with the header and an empty group per body and field
fn init_file(path: &Path, header: &StoreHeader) -> Result<()> {
    let file = File::create(path)?;
    set_attr(&file, "version", header.version)?;
    set_attr(&file, "bodies", header.bodies as u64)?;
    set_attr(&file, "active_count", header.active_count as u64)?;
    set_attr(&file, "chunk_len", header.chunk_len as u64)?;
    set_attr(
        &file,
        "record_acceleration",
        u64::from(header.fields.len() == Field::ALL.len()),
    )?;
    set_attr(&file, "complete", 0)?;

    let objects = file.create_group(OBJECTS_GROUP)?;
    for (id, m) in header.masses.iter().enumerate() {
        let body = objects.create_group(&id.to_string())?;
        body.new_dataset_builder().with_data(&[*m][..]).create(MASS_DATASET)?;
        set_attr(&body, COMMITTED_ATTR, 0)?;
        for field in &header.fields {
            body.create_group(field.name())?;
        }
    }
    file.flush()?;
    Ok(())
}

// =========================================================================================
// writer
// =========================================================================================

/// One body's rows for one chunk, every recorded field
struct ChunkJob {
    body: usize,
    chunk: usize,
    columns: Vec<(Field, Vec<f64>)>,
}

fn write_chunk(file: &File, job: &ChunkJob) -> hdf5::Result<()> {
    let body = file.group(&body_group_name(job.body))?;
    let name = chunk_name(job.chunk);
    for (field, values) in &job.columns {
        body.group(field.name())?
            .new_dataset_builder()
            .with_data(values.as_slice())
            .create(name.as_str())?;
    }
    // the chunk only counts once every field is on disk
    set_attr(&body, COMMITTED_ATTR, job.chunk as u64 + 1)?;
    file.flush()
}

struct BodyBuffer {
    columns: Vec<Vec<f64>>, // parallel to the recorded fields
    next_chunk: usize,
}

/// Streaming sink: buffers rows per body and hands full chunks to a flush worker
pub struct DiskSink {
    dir: PathBuf,
    path: PathBuf,
    header: StoreHeader,
    buffers: Vec<BodyBuffer>,
    tx: Option<SyncSender<ChunkJob>>,
    worker: Option<JoinHandle<Result<()>>>,
    finished: bool,
}

impl DiskSink {
    /// Create a store in `dir`.
    ///
    /// The directory is created if needed. An existing store is an error
    /// unless `replace` is set, in which case it is truncated.
    pub fn create(
        dir: &Path,
        masses: &[f64],
        active_count: usize,
        record_acceleration: bool,
        replace: bool,
        chunk_len: usize,
    ) -> Result<Self> {
        if chunk_len == 0 {
            return Err(Error::InvalidConfig("chunk_len must be at least 1".to_string()));
        }
        if dir.exists() && !dir.is_dir() {
            return Err(StorageError::NotADirectory(dir.to_path_buf()).into());
        }
        fs::create_dir_all(dir)?;
        let path = store_file(dir);
        if path.exists() {
            if !replace {
                return Err(StorageError::AlreadyExists(path).into());
            }
            log::info!("replacing trajectory store {}", path.display());
        }

        let fields = Field::recorded(record_acceleration);
        let header = StoreHeader {
            version: FORMAT_VERSION,
            bodies: masses.len(),
            masses: masses.to_vec(),
            active_count,
            fields: fields.to_vec(),
            chunk_len,
            complete: false,
        };
        init_file(&path, &header)?;

        let (tx, rx) = mpsc::sync_channel::<ChunkJob>(QUEUE_DEPTH);
        let worker_path = path.clone();
        let worker = thread::Builder::new()
            .name("nbody-flush".to_string())
            .spawn(move || -> Result<()> {
                let file = File::open_rw(&worker_path)?;
                for job in rx {
                    write_chunk(&file, &job)?;
                    log::debug!("flushed chunk {} of body {}", job.chunk, job.body);
                }
                Ok(())
            })?;

        let buffers = (0..masses.len())
            .map(|_| BodyBuffer {
                columns: vec![Vec::with_capacity(chunk_len); fields.len()],
                next_chunk: 0,
            })
            .collect();

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            header,
            buffers,
            tx: Some(tx),
            worker: Some(worker),
            finished: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The HDF5 file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_body(&mut self, body: usize) -> Result<()> {
        let chunk_len = self.header.chunk_len;
        let buf = &mut self.buffers[body];
        if buf.columns.first().map_or(true, |c| c.is_empty()) {
            return Ok(());
        }
        let columns = self
            .header
            .fields
            .iter()
            .zip(buf.columns.iter_mut())
            .map(|(f, col)| (*f, std::mem::replace(col, Vec::with_capacity(chunk_len))))
            .collect();
        let job = ChunkJob {
            body,
            chunk: buf.next_chunk,
            columns,
        };
        buf.next_chunk += 1;

        let sent = self.tx.as_ref().map(|tx| tx.send(job).is_ok()).unwrap_or(false);
        if sent {
            Ok(())
        } else {
            Err(self.worker_failure())
        }
    }

    /// The worker is gone; collect the reason it stopped
    fn worker_failure(&mut self) -> Error {
        self.tx = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(e))) => e,
            _ => StorageError::WorkerGone.into(),
        }
    }

    fn mark_complete(&mut self) -> Result<()> {
        let file = File::open_rw(&self.path)?;
        set_attr(&file, "complete", 1)?;
        file.flush()?;
        self.header.complete = true;
        Ok(())
    }
}

impl TrajectorySink for DiskSink {
    fn record(&mut self, body_id: usize, snapshot: &Snapshot) -> Result<()> {
        let len = self.buffers.len();
        let buf = self.buffers.get_mut(body_id).ok_or(Error::OutOfRange { index: body_id, len })?;
        for (field, col) in self.header.fields.iter().zip(buf.columns.iter_mut()) {
            col.push(field.of(snapshot).unwrap_or(f64::NAN));
        }
        if buf.columns[0].len() >= self.header.chunk_len {
            self.flush_body(body_id)?;
        }
        Ok(())
    }

    /// Flush partial chunks, wait for the worker and mark the store complete
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_err = None;
        for body in 0..self.buffers.len() {
            if let Err(e) = self.flush_body(body) {
                first_err = Some(e);
                break;
            }
        }
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(StorageError::WorkerGone.into());
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        self.mark_complete()?;
        log::info!(
            "trajectory store {} closed ({} bodies)",
            self.path.display(),
            self.header.bodies
        );
        Ok(())
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("closing trajectory store {}: {e}", self.path.display());
        }
    }
}

// =========================================================================================
// reader
// =========================================================================================

/// Read side of a store; bodies are loaded one at a time on request
#[derive(Debug)]
pub struct DiskStore {
    path: PathBuf,
    file: File,
    header: StoreHeader,
}

impl DiskStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(StorageError::NotADirectory(dir.to_path_buf()).into());
        }
        let path = store_file(dir);
        let file = File::open(&path)?;

        let version = get_attr(&file, "version", &path)?;
        if version != FORMAT_VERSION {
            return Err(StorageError::Corrupted {
                path,
                reason: format!("unsupported store version {version}"),
            }
            .into());
        }
        let bodies = get_attr(&file, "bodies", &path)? as usize;
        let record_acceleration = get_attr(&file, "record_acceleration", &path)? != 0;
        let mut masses = Vec::with_capacity(bodies);
        for id in 0..bodies {
            let m = file
                .dataset(&format!("{}/{MASS_DATASET}", body_group_name(id)))?
                .read_raw::<f64>()?;
            masses.push(m.first().copied().unwrap_or(0.0));
        }

        let header = StoreHeader {
            version,
            bodies,
            masses,
            active_count: get_attr(&file, "active_count", &path)? as usize,
            fields: Field::recorded(record_acceleration).to_vec(),
            chunk_len: get_attr(&file, "chunk_len", &path)? as usize,
            complete: get_attr(&file, "complete", &path)? != 0,
        };
        if !header.complete {
            log::warn!("{} was not closed cleanly, reading what was flushed", path.display());
        }
        Ok(Self { path, file, header })
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.header.bodies
    }

    pub fn is_empty(&self) -> bool {
        self.header.bodies == 0
    }

    pub fn masses(&self) -> &[f64] {
        &self.header.masses
    }

    pub fn active_count(&self) -> usize {
        self.header.active_count
    }

    pub fn is_complete(&self) -> bool {
        self.header.complete
    }

    pub fn body(&self, id: usize) -> Result<BodyReader> {
        if id >= self.header.bodies {
            return Err(Error::OutOfRange {
                index: id,
                len: self.header.bodies,
            });
        }
        let group = self.file.group(&body_group_name(id))?;
        let committed = get_attr(&group, COMMITTED_ATTR, &self.path)? as usize;
        Ok(BodyReader {
            path: self.path.clone(),
            group,
            id,
            mass: self.header.masses.get(id).copied().unwrap_or(0.0),
            fields: self.header.fields.clone(),
            committed,
            cache: HashMap::new(),
        })
    }

    /// Every body, fully loaded
    pub fn trajectories(&self) -> Result<Vec<Trajectory>> {
        (0..self.len())
            .map(|i| self.body(i)?.trajectory())
            .collect()
    }
}

/// Lazy view of one body. Each field is read on first access and kept.
#[derive(Debug)]
pub struct BodyReader {
    path: PathBuf,
    group: Group,
    id: usize,
    mass: f64,
    fields: Vec<Field>,
    committed: usize, // chunks whose every field is on disk
    cache: HashMap<Field, Vec<f64>>,
}

impl BodyReader {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    /// All values of `field`, chunks concatenated in order
    pub fn field(&mut self, field: Field) -> Result<&[f64]> {
        if !self.has_field(field) {
            return Err(Error::InvalidConfig(format!("field {field} was not recorded")));
        }
        let values = match self.cache.entry(field) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(read_field(&self.group, self.committed, field, &self.path)?),
        };
        Ok(values.as_slice())
    }

    pub fn t(&mut self) -> Result<&[f64]> {
        self.field(Field::T)
    }

    pub fn x(&mut self) -> Result<&[f64]> {
        self.field(Field::X)
    }

    pub fn y(&mut self) -> Result<&[f64]> {
        self.field(Field::Y)
    }

    pub fn z(&mut self) -> Result<&[f64]> {
        self.field(Field::Z)
    }

    pub fn vx(&mut self) -> Result<&[f64]> {
        self.field(Field::Vx)
    }

    pub fn vy(&mut self) -> Result<&[f64]> {
        self.field(Field::Vy)
    }

    pub fn vz(&mut self) -> Result<&[f64]> {
        self.field(Field::Vz)
    }

    /// Fails with `InvalidConfig` when accelerations were not recorded
    pub fn ax(&mut self) -> Result<&[f64]> {
        self.field(Field::Ax)
    }

    pub fn ay(&mut self) -> Result<&[f64]> {
        self.field(Field::Ay)
    }

    pub fn az(&mut self) -> Result<&[f64]> {
        self.field(Field::Az)
    }

    /// Number of recorded instants
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.t()?.len())
    }

    /// Re-assemble the whole trajectory in memory
    pub fn trajectory(&mut self) -> Result<Trajectory> {
        let fields = self.fields.clone();
        let mut columns = Vec::with_capacity(fields.len());
        for f in &fields {
            columns.push(self.field(*f)?.to_vec());
        }
        let len = columns.first().map_or(0, Vec::len);
        if let Some((f, col)) = fields.iter().zip(&columns).find(|(_, c)| c.len() != len) {
            return Err(StorageError::Corrupted {
                path: self.path.clone(),
                reason: format!(
                    "body {} field {f} has {} values where {len} were expected",
                    self.id,
                    col.len()
                ),
            }
            .into());
        }

        let with_acc = fields.len() == Field::ALL.len();
        let col = |k: usize, i: usize| columns[k][i];
        let path = (0..len)
            .map(|i| Snapshot {
                t: col(0, i),
                r: NVec3::new(col(1, i), col(2, i), col(3, i)),
                v: NVec3::new(col(4, i), col(5, i), col(6, i)),
                a: with_acc.then(|| NVec3::new(col(7, i), col(8, i), col(9, i))),
            })
            .collect();
        Ok(Trajectory {
            mass: self.mass,
            path,
        })
    }
}

fn read_field(group: &Group, committed: usize, field: Field, file: &Path) -> Result<Vec<f64>> {
    let field_group = group.group(field.name())?;
    let mut values = Vec::new();
    for chunk in 0..committed {
        let name = chunk_name(chunk);
        let dataset = field_group.dataset(&name).map_err(|e| StorageError::Corrupted {
            path: file.to_path_buf(),
            reason: format!("chunk {field}/{name} is counted but unreadable: {e}"),
        })?;
        values.extend(dataset.read_raw::<f64>()?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nbody-disk-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn snap(k: usize) -> Snapshot {
        Snapshot {
            t: k as f64,
            r: NVec3::new(k as f64, 0.0, 0.0),
            v: NVec3::zeros(),
            a: None,
        }
    }

    #[test]
    fn chunk_names_sort_numerically() {
        let mut names: Vec<String> = [10, 2, 0, 1].iter().map(|&c| chunk_name(c)).collect();
        names.sort();
        assert_eq!(names, vec!["00000000", "00000001", "00000002", "00000010"]);
    }

    #[test]
    fn small_chunks_reassemble_in_order() {
        let dir = scratch_dir("chunks");
        let mut sink = DiskSink::create(&dir, &[2.0], 1, false, false, 3).unwrap();
        for k in 0..8 {
            sink.record(0, &snap(k)).unwrap();
        }
        sink.finish().unwrap();

        let store = DiskStore::open(&dir).unwrap();
        assert!(store.is_complete());
        assert_eq!(store.header().chunk_len, 3);
        let mut body = store.body(0).unwrap();
        assert_eq!(body.committed, 3);
        assert_eq!(body.t().unwrap(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(body.field(Field::Ax).is_err());
        assert_eq!(body.mass(), 2.0);
        drop(body);
        drop(store);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unfinished_store_reads_flushed_chunks() {
        let dir = scratch_dir("unfinished");
        let mut sink = DiskSink::create(&dir, &[1.0], 1, false, false, 2).unwrap();
        for k in 0..5 {
            sink.record(0, &snap(k)).unwrap();
        }
        // two full chunks went to the worker, the fifth row is still buffered
        let worker = sink.worker.take().unwrap();
        sink.tx = None;
        worker.join().unwrap().unwrap();
        sink.finished = true;

        let store = DiskStore::open(&dir).unwrap();
        assert!(!store.is_complete());
        assert_eq!(store.body(0).unwrap().t().unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        drop(store);
        drop(sink);
        fs::remove_dir_all(&dir).unwrap();
    }
}
