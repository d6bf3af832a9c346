use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::base::LogId;
use crate::error::{Error, Result};
use crate::storage::{
    DEFAULT_CREDIT_BUDGET, ObjectStore, Residency, ResidencyGuard, StoreObject, check_credits,
};

/// Generation stamped on newly created files; object ids are never reused
const DIR_GENERATION: u32 = 1;

const OBJECT_SUFFIX: &str = "llog";

/// DirStore keeps one `<oid>-<gen>.llog` file per log object in a directory
pub struct DirStore {
    dir: PathBuf,
    /// Next object id to hand out (one past the largest found on open)
    next_oid: AtomicU64,
    residency: Residency,
    sync_writes: bool,
    credit_budget: u32,
}

impl DirStore {
    /// Open or create a store directory
    pub fn open<P: AsRef<Path>>(dir: P, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut max_oid = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = Self::parse_name(&entry.file_name().to_string_lossy()) {
                max_oid = max_oid.max(id.oid);
            }
        }
        debug!(dir = %dir.display(), max_oid, "opened object directory");

        Ok(DirStore {
            dir,
            next_oid: AtomicU64::new(max_oid + 1),
            residency: Residency::default(),
            sync_writes,
            credit_budget: DEFAULT_CREDIT_BUDGET,
        })
    }

    /// File path backing an object
    pub fn object_path(&self, id: LogId) -> PathBuf {
        self.dir
            .join(format!("{:016x}-{:08x}.{}", id.oid, id.ogen, OBJECT_SUFFIX))
    }

    fn parse_name(name: &str) -> Option<LogId> {
        let stem = name.strip_suffix(OBJECT_SUFFIX)?.strip_suffix('.')?;
        let (oid, ogen) = stem.split_once('-')?;
        Some(LogId::new(
            u64::from_str_radix(oid, 16).ok()?,
            u32::from_str_radix(ogen, 16).ok()?,
        ))
    }
}

impl ObjectStore for DirStore {
    fn name(&self) -> &str {
        "dir"
    }

    fn create_object(&self) -> Result<Box<dyn StoreObject>> {
        let id = LogId::new(self.next_oid.fetch_add(1, Ordering::SeqCst), DIR_GENERATION);
        let guard = self.residency.claim(id)?;
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.object_path(id))?;
        Ok(Box::new(FileObject {
            id,
            file,
            sync_writes: self.sync_writes,
            credit_budget: self.credit_budget,
            _guard: guard,
        }))
    }

    fn open_object(&self, id: LogId) -> Result<Box<dyn StoreObject>> {
        let path = self.object_path(id);
        if !path.exists() {
            return Err(Error::NotFound(id));
        }
        let guard = self.residency.claim(id)?;
        let file = match File::options().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(Box::new(FileObject {
            id,
            file,
            sync_writes: self.sync_writes,
            credit_budget: self.credit_budget,
            _guard: guard,
        }))
    }

    fn destroy_object(&self, obj: Box<dyn StoreObject>) -> Result<()> {
        let id = obj.id();
        drop(obj);
        match fs::remove_file(self.object_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

struct FileObject {
    id: LogId,
    file: File,
    sync_writes: bool,
    credit_budget: u32,
    _guard: ResidencyGuard,
}

impl StoreObject for FileObject {
    fn id(&self) -> LogId {
        self.id
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(done)
    }

    fn write_in_transaction(&self, offset: u64, bytes: &[u8], credits: u32) -> Result<()> {
        check_credits(self.id, credits, self.credit_budget)?;
        self.file.write_all_at(bytes, offset)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
