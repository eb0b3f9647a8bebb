use crate::cache::entry::{CacheEntry, LocalId};
use crate::settings::CacheSettings;
use anyhow::{Context, bail};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use objcache_files::ParserError;
use objcache_files::common::types::CacheId;
use objcache_files::extras::reader::ExtrasReader;
use objcache_files::extras::types::ExtrasFile;
use objcache_files::header::reader::CacheHeaderReader;
use objcache_files::header::types::{CacheHeader, HeaderEntry};
use objcache_files::objects::reader::ObjectCacheReader;
use objcache_files::objects::types::MAX_PAYLOAD_SIZE;
use objcache_files::objects::writer::ObjectCacheWriter;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::JoinHandle;
use std::time::Duration;

const HEADER_FILE_NAME: &str = "object.cache";

/// Identity of a region's cache file. A different cache id for the same handle invalidates the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionKey {
    pub handle: u64,
    pub name: String,
    pub cache_id: CacheId,
}

/// Grid coordinates of a global region handle, which holds the region's origin in meters.
pub fn region_grid_coords(handle: u64) -> (u32, u32) {
    (((handle >> 32) as u32) / 256, (handle as u32) / 256)
}

pub fn object_file_name(handle: u64) -> String {
    let (x, y) = region_grid_coords(handle);
    format!("objects_{}_{}.slc", x, y)
}

pub fn extras_file_name(handle: u64) -> String {
    let (x, y) = region_grid_coords(handle);
    format!("objects_{}_{}_extras.slc", x, y)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// No file, cache disabled or reads turned off
    NoCache,
    /// The file belongs to another cache id and has been discarded
    Mismatch,
    /// The file could not be parsed and has been discarded
    Corrupt,
}

/// A standalone table produced off the main thread and moved over to it.
#[derive(Debug)]
pub struct LoadedRegionCache {
    pub key: RegionKey,
    pub entries: HashMap<LocalId, CacheEntry>,
    pub overrides: HashMap<LocalId, Vec<u8>>,
    pub outcome: LoadOutcome,
}

impl LoadedRegionCache {
    fn empty(key: RegionKey, outcome: LoadOutcome) -> Self {
        LoadedRegionCache {
            key,
            entries: HashMap::new(),
            overrides: HashMap::new(),
            outcome,
        }
    }
}

/// The receiving end of one region's load. Dropping it is how a dead region discards its late result.
pub struct PendingLoad {
    key: RegionKey,
    receiver: Receiver<LoadedRegionCache>,
}

impl PendingLoad {
    /// Non blocking, `None` while the worker is still busy.
    pub fn poll(&self) -> Option<LoadedRegionCache> {
        match self.receiver.try_recv() {
            Ok(loaded) => Some(loaded),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("Cache load for {} was dropped by the worker, starting cold", self.key.name);
                Some(LoadedRegionCache::empty(self.key.clone(), LoadOutcome::NoCache))
            }
        }
    }

    pub fn wait(self) -> LoadedRegionCache {
        self.receiver
            .recv()
            .unwrap_or_else(|_| LoadedRegionCache::empty(self.key, LoadOutcome::NoCache))
    }
}

/// Whether entries nobody has seen this session are dropped when a region is written back.
pub trait RemovalPolicy: Send {
    fn drop_unconfirmed(&self, context: &RemovalContext) -> bool;
}

#[derive(Debug, Copy, Clone)]
pub struct RemovalContext {
    /// Wall clock time since the region was first seen this session
    pub region_age: Duration,
    pub app_exiting: bool,
}

/// Drops unconfirmed entries on exit, or once a region has been around for longer than the threshold.
#[derive(Debug, Copy, Clone)]
pub struct AgeThresholdRemoval {
    pub threshold: Duration,
}

impl RemovalPolicy for AgeThresholdRemoval {
    fn drop_unconfirmed(&self, context: &RemovalContext) -> bool {
        context.app_exiting || context.region_age > self.threshold
    }
}

/// Never drops anything, the file only ever grows until the region is purged.
#[derive(Debug, Copy, Clone, Default)]
pub struct KeepUnconfirmed;

impl RemovalPolicy for KeepUnconfirmed {
    fn drop_unconfirmed(&self, _context: &RemovalContext) -> bool {
        false
    }
}

struct ReadJob {
    key: RegionKey,
    objects_path: PathBuf,
    extras_path: PathBuf,
    /// Whether unusable files may be deleted
    writable: bool,
    reply: Sender<LoadedRegionCache>,
}

impl ReadJob {
    fn run(self) {
        let loaded = read_region(self.key, &self.objects_path, &self.extras_path, self.writable);
        let name = loaded.key.name.clone();
        if self.reply.send(loaded).is_err() {
            debug!("Region {} went away before its cache finished loading, discarding", name);
        }
    }
}

struct DiskReadWorker {
    jobs: Option<Sender<ReadJob>>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DiskReadWorker {
    fn spawn() -> std::io::Result<DiskReadWorker> {
        let (sender, receiver) = channel::<ReadJob>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_cancelled = cancelled.clone();

        let thread = std::thread::Builder::new()
            .name("Object Cache IO".into())
            .spawn(move || {
                for job in receiver.iter() {
                    if thread_cancelled.load(SeqCst) {
                        debug!("Skipping cache load of {}, shutting down", job.key.name);
                        continue;
                    }
                    job.run();
                }
                trace!("Object cache worker exiting");
            })?;

        Ok(DiskReadWorker {
            jobs: Some(sender),
            cancelled,
            thread: Some(thread),
        })
    }

    /// Hands the job back if the worker is gone.
    fn submit(&self, job: ReadJob) -> Result<(), ReadJob> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|err| err.0),
            None => Err(job),
        }
    }
}

impl Drop for DiskReadWorker {
    fn drop(&mut self) {
        self.cancelled.store(true, SeqCst);
        self.jobs.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Object cache worker panicked");
        }
    }
}

/// The disk side of the object cache: one file pair per region plus a header that tracks which regions
/// own files, so the directory can be kept to a bounded number of regions.
pub struct ObjectCacheStore {
    directory: PathBuf,
    enabled: bool,
    reads: bool,
    writes: bool,
    max_regions: usize,
    header: Vec<HeaderEntry>,
    removal_policy: Box<dyn RemovalPolicy>,
    worker: Option<DiskReadWorker>,
}

impl ObjectCacheStore {
    /// Never fails: anything that goes wrong here degrades to a disabled or empty cache.
    pub fn open(settings: &CacheSettings) -> ObjectCacheStore {
        let mut store = ObjectCacheStore {
            directory: PathBuf::from(&settings.cache_dir),
            enabled: settings.cache_enabled,
            reads: settings.cache_reads,
            writes: settings.cache_writes,
            max_regions: settings.max_region_files(),
            header: vec![],
            removal_policy: Box::new(AgeThresholdRemoval {
                threshold: Duration::from_secs(settings.removal_threshold_secs),
            }),
            worker: None,
        };

        if !store.enabled {
            info!("Object cache is disabled");
            return store;
        }

        if store.writes
            && let Err(err) = std::fs::create_dir_all(&store.directory)
        {
            warn!(
                "Can't create the object cache directory {}, disabling the cache: {}",
                store.directory.display(),
                err
            );
            store.enabled = false;
            return store;
        }

        store.read_header();

        if store.reads {
            match DiskReadWorker::spawn() {
                Ok(worker) => store.worker = Some(worker),
                Err(err) => warn!("Can't spawn the object cache worker, loading synchronously: {}", err),
            }
        }

        info!(
            "Object cache at {} with {} region(s){}",
            store.directory.display(),
            store.header.len(),
            if store.writes { "" } else { " (read only)" }
        );
        store
    }

    pub fn with_removal_policy(mut self, policy: Box<dyn RemovalPolicy>) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn region_count(&self) -> usize {
        self.header.len()
    }

    pub fn contains_region(&self, handle: u64) -> bool {
        self.header.iter().any(|entry| entry.region_handle == handle)
    }

    fn header_path(&self) -> PathBuf {
        self.directory.join(HEADER_FILE_NAME)
    }

    fn read_header(&mut self) {
        let path = self.header_path();
        if !path.exists() {
            return;
        }

        let parsed = File::open(&path)
            .map_err(ParserError::from)
            .and_then(|file| CacheHeaderReader::parse_asset(&mut BufReader::new(file)));

        match parsed {
            Ok(header) => {
                self.header = header
                    .entries
                    .into_iter()
                    .unique_by(|entry| entry.region_handle)
                    .collect();
            }
            Err(ParserError::EmptySource) => {}
            Err(err) => {
                warn!("Discarding the object cache: {}", err);
                self.wipe();
            }
        }
    }

    fn write_header(&self) {
        let header = CacheHeader {
            entries: self.header.clone(),
            ..CacheHeader::default()
        };

        let result = File::create(self.header_path())
            .map_err(ParserError::from)
            .and_then(|file| CacheHeaderReader::write_asset(&mut BufWriter::new(file), &header));
        if let Err(err) = result {
            warn!("Failed to write the object cache header: {}", err);
        }
    }

    /// Removes every region file and the header.
    pub fn wipe(&mut self) {
        self.header.clear();
        if !self.writes {
            return;
        }

        let Ok(dir) = std::fs::read_dir(&self.directory) else {
            return;
        };
        for path in dir.flatten().map(|entry| entry.path()) {
            let is_cache_file = path.file_name().and_then(|name| name.to_str()).is_some_and(|name| {
                name == HEADER_FILE_NAME || (name.starts_with("objects_") && name.ends_with(".slc"))
            });
            if is_cache_file && let Err(err) = std::fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), err);
            }
        }
        info!("Wiped the object cache at {}", self.directory.display());
    }

    fn remove_region_files(&self, handle: u64) {
        for name in [object_file_name(handle), extras_file_name(handle)] {
            let path = self.directory.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => trace!("Removed {}", path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
            }
        }
    }

    /// Drops a region from the header, e.g. because its file turned out to be unusable.
    pub fn forget_region(&mut self, handle: u64) {
        if !self.contains_region(handle) {
            return;
        }
        self.header.retain(|entry| entry.region_handle != handle);
        if self.writes {
            self.remove_region_files(handle);
            self.write_header();
        }
    }

    /// Starts loading a region's cache. Regions the header doesn't know complete immediately.
    pub fn request_load(&mut self, key: RegionKey) -> PendingLoad {
        let (sender, receiver) = channel();
        let pending = PendingLoad {
            key: key.clone(),
            receiver,
        };

        if !self.enabled || !self.reads || !self.contains_region(key.handle) {
            trace!("No object cache for {}", key.name);
            // the receiver is alive, this can't fail
            let _ = sender.send(LoadedRegionCache::empty(key, LoadOutcome::NoCache));
            return pending;
        }

        let job = ReadJob {
            objects_path: self.directory.join(object_file_name(key.handle)),
            extras_path: self.directory.join(extras_file_name(key.handle)),
            writable: self.writes,
            key,
            reply: sender,
        };

        let job = match &self.worker {
            Some(worker) => worker.submit(job),
            None => Err(job),
        };
        if let Err(job) = job {
            job.run();
        }
        pending
    }

    /// Writes a region back. The tables are moved out of the caller, which must not rely on their contents
    /// afterwards. Returns whether an object file was written.
    pub fn save(
        &mut self,
        key: &RegionKey,
        entries: &mut HashMap<LocalId, CacheEntry>,
        overrides: &mut HashMap<LocalId, Vec<u8>>,
        dirty: bool,
        context: RemovalContext,
    ) -> bool {
        let entries = std::mem::take(entries);
        let overrides = std::mem::take(overrides);

        if !self.enabled || !self.writes {
            return false;
        }

        if entries.is_empty() {
            debug!("Not saving the empty object cache of {}", key.name);
            return false;
        }

        let drop_unconfirmed = self.removal_policy.drop_unconfirmed(&context);
        if drop_unconfirmed && !entries.values().any(|entry| entry.confirmed) {
            info!("Nothing of {} was seen this session, keeping the old cache", key.name);
            return false;
        }

        self.touch_region(key.handle);
        // dropping unconfirmed entries changes the file as well
        let dropping = drop_unconfirmed && entries.values().any(|entry| !entry.confirmed);
        if !dirty && !dropping {
            trace!("Object cache of {} is unchanged", key.name);
            return false;
        }

        match self.write_region(key, &entries, &overrides, drop_unconfirmed) {
            Ok(written) => {
                info!("Saved {} of {} cached objects for {}", written, entries.len(), key.name);
                true
            }
            Err(err) => {
                warn!("Failed to save the object cache of {}: {:#}", key.name, err);
                self.forget_region(key.handle);
                false
            }
        }
    }

    /// Refreshes a region's access time, purging the least recently used regions when it is new.
    fn touch_region(&mut self, handle: u64) {
        let now = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;

        if let Some(entry) = self.header.iter_mut().find(|entry| entry.region_handle == handle) {
            entry.last_access = now;
        } else {
            while self.header.len() >= self.max_regions {
                let Some((oldest, _)) = self
                    .header
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| (entry.last_access, entry.region_handle))
                else {
                    break;
                };
                let purged = self.header.remove(oldest);
                info!("Purging the object cache of region {:#x}", purged.region_handle);
                self.remove_region_files(purged.region_handle);
            }
            self.header.push(HeaderEntry {
                region_handle: handle,
                last_access: now,
            });
        }

        self.write_header();
    }

    fn write_region(
        &self,
        key: &RegionKey,
        entries: &HashMap<LocalId, CacheEntry>,
        overrides: &HashMap<LocalId, Vec<u8>>,
        drop_unconfirmed: bool,
    ) -> anyhow::Result<usize> {
        let objects = entries
            .values()
            .filter(|entry| entry.confirmed || !drop_unconfirmed)
            .filter(|entry| !entry.payload.is_empty() && entry.payload.len() <= MAX_PAYLOAD_SIZE as usize)
            .sorted_by_key(|entry| entry.local_id)
            .map(CacheEntry::to_cached)
            .collect_vec();

        let objects_path = self.directory.join(object_file_name(key.handle));
        let file = File::create(&objects_path).with_context(|| format!("creating {}", objects_path.display()))?;
        ObjectCacheWriter::write_objects(&mut BufWriter::new(file), &key.cache_id, objects.iter(), objects.len())
            .with_context(|| format!("writing {}", objects_path.display()))?;

        let extras = ExtrasFile {
            cache_id: key.cache_id,
            overrides: overrides
                .iter()
                .filter(|(local_id, _)| objects.binary_search_by_key(*local_id, |o| o.local_id).is_ok())
                .map(|(local_id, data)| (*local_id, data.clone()))
                .sorted_by_key(|(local_id, _)| *local_id)
                .collect(),
        };

        let extras_path = self.directory.join(extras_file_name(key.handle));
        if extras.overrides.is_empty() {
            if extras_path.exists() {
                std::fs::remove_file(&extras_path).with_context(|| format!("removing {}", extras_path.display()))?;
            }
        } else {
            let file = File::create(&extras_path).with_context(|| format!("creating {}", extras_path.display()))?;
            ExtrasReader::write_asset(&mut BufWriter::new(file), &extras)
                .with_context(|| format!("writing {}", extras_path.display()))?;
        }

        Ok(objects.len())
    }
}

/// Runs on the worker thread, touches nothing but the files.
fn read_region(key: RegionKey, objects_path: &Path, extras_path: &Path, writable: bool) -> LoadedRegionCache {
    if !objects_path.exists() {
        return LoadedRegionCache::empty(key, LoadOutcome::NoCache);
    }

    let discard = |reason: &str| {
        if writable {
            for path in [objects_path, extras_path] {
                if let Err(err) = std::fs::remove_file(path)
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to remove {} ({}): {}", path.display(), reason, err);
                }
            }
        }
    };

    let entries = match read_objects(&key.cache_id, objects_path) {
        Ok(Some(entries)) => entries,
        Ok(None) => {
            info!("Object cache of {} belongs to a different cache id, discarding", key.name);
            discard("cache id mismatch");
            return LoadedRegionCache::empty(key, LoadOutcome::Mismatch);
        }
        Err(err) => {
            warn!("Object cache of {} is unusable, starting cold: {:#}", key.name, err);
            discard("corrupt");
            return LoadedRegionCache::empty(key, LoadOutcome::Corrupt);
        }
    };

    let overrides = match read_extras(&key.cache_id, extras_path) {
        Ok(overrides) => overrides,
        Err(err) => {
            warn!("Ignoring the material overrides of {}: {:#}", key.name, err);
            HashMap::new()
        }
    };

    info!("Loaded {} cached objects for {}", entries.len(), key.name);
    LoadedRegionCache {
        key,
        entries,
        overrides,
        outcome: LoadOutcome::Loaded,
    }
}

/// `None` if the file was written for another cache id.
fn read_objects(cache_id: &CacheId, path: &Path) -> anyhow::Result<Option<HashMap<LocalId, CacheEntry>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = BufReader::new(file);

    let file_cache_id = match ObjectCacheReader::parse_cache_id(&mut rdr) {
        Err(err) if err.is_eof() => bail!("{} is empty", path.display()),
        res => res?,
    };
    if file_cache_id != *cache_id {
        return Ok(None);
    }

    let file = ObjectCacheReader::parse_objects(&mut rdr, file_cache_id)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(
        file.objects
            .into_iter()
            .map(|object| (object.local_id, CacheEntry::from_cached(object)))
            .collect(),
    ))
}

fn read_extras(cache_id: &CacheId, path: &Path) -> anyhow::Result<HashMap<LocalId, Vec<u8>>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let extras = match ExtrasReader::parse_asset(&mut BufReader::new(file)) {
        Err(ParserError::EmptySource) => return Ok(HashMap::new()),
        res => res.with_context(|| format!("parsing {}", path.display()))?,
    };
    if extras.cache_id != *cache_id {
        bail!("{} belongs to cache id {}", path.display(), extras.cache_id);
    }
    Ok(extras.overrides.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_use_grid_coordinates() {
        let handle = (256_000u64 << 32) | 512_000;
        assert_eq!(region_grid_coords(handle), (1000, 2000));
        assert_eq!(object_file_name(handle), "objects_1000_2000.slc");
        assert_eq!(extras_file_name(handle), "objects_1000_2000_extras.slc");
    }

    #[test]
    fn age_threshold_policy() {
        let policy = AgeThresholdRemoval {
            threshold: Duration::from_secs(600),
        };
        let young = RemovalContext {
            region_age: Duration::from_secs(10),
            app_exiting: false,
        };
        assert!(!policy.drop_unconfirmed(&young));
        assert!(policy.drop_unconfirmed(&RemovalContext {
            app_exiting: true,
            ..young
        }));
        assert!(policy.drop_unconfirmed(&RemovalContext {
            region_age: Duration::from_secs(601),
            ..young
        }));
        assert!(!KeepUnconfirmed.drop_unconfirmed(&RemovalContext {
            app_exiting: true,
            ..young
        }));
    }
}
