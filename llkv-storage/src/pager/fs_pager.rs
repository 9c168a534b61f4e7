use super::*;
use crate::types::PhysicalKey;
use bytes::Bytes;
use llkv_result::{Error, Result};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Marker embedded in in-flight temporary file names. Keys containing it are never
/// reported by [`Pager::enumerate_keys`].
const TMP_MARKER: &str = ".tmp-";

/// Pager storing each blob as a file below a root directory.
///
/// Writes go to a uniquely named temporary file first. `batch_put` renames it into
/// place; `put_if_absent` hard-links it, which fails atomically when the target
/// already exists, so two processes sharing the directory can never both create
/// the same key.
#[derive(Debug, Clone)]
pub struct FsPager {
    root: PathBuf,
}

impl FsPager {
    /// Open (and create if needed) a pager rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(Error::InvalidArgumentError(format!(
                "invalid pager key '{key}'"
            )));
        }
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    /// Write `bytes` to a fresh temporary sibling of `dest` and return its path.
    fn write_temp(dest: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "key has no parent"))?;
        fs::create_dir_all(parent)?;

        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let tmp = parent.join(format!("{file_name}{TMP_MARKER}{}", uuid::Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(tmp)
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<PhysicalKey>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_files(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if !key.contains(TMP_MARKER) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl Pager for FsPager {
    type Blob = Bytes;

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        let mut out = Vec::with_capacity(gets.len());
        for g in gets {
            match g {
                BatchGet::Raw { key } => match fs::read(self.path_for(key)?) {
                    Ok(bytes) => out.push(GetResult::Raw {
                        key: key.clone(),
                        bytes: Bytes::from(bytes),
                    }),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        out.push(GetResult::Missing { key: key.clone() })
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(out)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        for p in puts {
            match p {
                BatchPut::Raw { key, bytes } => {
                    let dest = self.path_for(key)?;
                    let tmp = Self::write_temp(&dest, bytes)?;
                    if let Err(e) = fs::rename(&tmp, &dest) {
                        let _ = fs::remove_file(&tmp);
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        let dest = self.path_for(key)?;
        let tmp = Self::write_temp(&dest, &bytes)?;
        let linked = fs::hard_link(&tmp, &dest);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        for key in keys {
            match fs::remove_file(self.path_for(key)?) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn enumerate_keys(&self, prefix: &str) -> Result<Vec<PhysicalKey>> {
        // Walk only the deepest directory fully named by the prefix.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let mut start = self.root.clone();
        start.extend(dir_part.split('/').filter(|s| !s.is_empty()));

        let mut keys = Vec::new();
        self.collect_files(&start, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_enumerate() {
        let dir = tempfile::tempdir().unwrap();
        let pager = FsPager::open(dir.path()).unwrap();

        pager.put("t/snapshot/snapshot-1", b"one".to_vec()).unwrap();
        pager.put("t/snapshot/snapshot-2", b"two".to_vec()).unwrap();
        pager.put("t/p=1/bucket-0/data-a.parquet", b"rows".to_vec()).unwrap();

        assert_eq!(
            pager.get("t/snapshot/snapshot-2").unwrap().unwrap().as_ref(),
            b"two"
        );
        assert!(pager.get("t/snapshot/snapshot-3").unwrap().is_none());

        let keys = pager.enumerate_keys("t/snapshot/snap").unwrap();
        assert_eq!(keys, vec!["t/snapshot/snapshot-1", "t/snapshot/snapshot-2"]);
        assert_eq!(pager.enumerate_keys("t/").unwrap().len(), 3);
        assert!(pager.enumerate_keys("missing/").unwrap().is_empty());
    }

    #[test]
    fn test_put_replaces_and_free_ignores_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let pager = FsPager::open(dir.path()).unwrap();

        pager.put("t/LATEST", b"1".to_vec()).unwrap();
        pager.put("t/LATEST", b"2".to_vec()).unwrap();
        assert_eq!(pager.get("t/LATEST").unwrap().unwrap().as_ref(), b"2");

        pager
            .free_many(&["t/LATEST".to_string(), "t/nope".to_string()])
            .unwrap();
        assert!(!pager.contains_key("t/LATEST").unwrap());
    }

    #[test]
    fn test_put_if_absent_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let pager = FsPager::open(dir.path()).unwrap();

        assert!(pager.put_if_absent("t/snapshot/snapshot-1", b"a".to_vec()).unwrap());
        assert!(!pager.put_if_absent("t/snapshot/snapshot-1", b"b".to_vec()).unwrap());
        assert_eq!(
            pager.get("t/snapshot/snapshot-1").unwrap().unwrap().as_ref(),
            b"a"
        );

        let on_disk: Vec<_> = fs::read_dir(dir.path().join("t").join("snapshot"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(on_disk.len(), 1);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let pager = FsPager::open(dir.path()).unwrap();
        assert!(matches!(
            pager.put("../escape", Vec::new()),
            Err(Error::InvalidArgumentError(_))
        ));
    }
}
