//! On-disk persistence of machine records.
//!
//! Each machine owns `<root>/machines/<name>/`, holding `machine.json` and
//! its SSH key pair.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::machine::Machine;

const MACHINES_DIR: &str = "machines";
const RECORD_FILE: &str = "machine.json";

/// Errors raised while reading or writing machine records.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the machine name cannot be used as a directory name.
    #[error("invalid machine name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidName(String),
    /// Raised when no record exists for the machine.
    #[error("machine '{0}' does not exist")]
    NotFound(String),
    /// Raised when a record already exists for the machine.
    #[error("machine '{0}' already exists")]
    AlreadyExists(String),
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a record cannot be encoded or decoded.
    #[error("invalid machine record {path}: {message}")]
    Format {
        /// Record path.
        path: Utf8PathBuf,
        /// Decoder error message.
        message: String,
    },
}

/// Directory-backed store of machine records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the files of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] when `name` is not a plain file
    /// name.
    pub fn machine_dir(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(MACHINES_DIR).join(name))
    }

    /// Returns `true` when a record exists for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the name is invalid or the directory
    /// cannot be inspected.
    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let dir_path = self.machine_dir(name)?;
        match Dir::open_ambient_dir(&dir_path, ambient_authority()) {
            Ok(dir) => dir.try_exists(RECORD_FILE).map_err(|err| io_error(&dir_path, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&dir_path, &err)),
        }
    }

    /// Creates the machine directory, refusing to reuse an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a record is present, or
    /// [`StoreError::Io`] when the directory cannot be created.
    pub fn create_dir(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        if self.exists(name)? {
            return Err(StoreError::AlreadyExists(name.to_owned()));
        }
        let dir_path = self.machine_dir(name)?;
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        Ok(dir_path)
    }

    /// Loads the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no record exists, or
    /// [`StoreError::Format`] when it cannot be decoded.
    pub fn load(&self, name: &str) -> Result<Machine, StoreError> {
        if !self.exists(name)? {
            return Err(StoreError::NotFound(name.to_owned()));
        }
        let dir_path = self.machine_dir(name)?;
        let record_path = dir_path.join(RECORD_FILE);
        let contents = open(&dir_path)?
            .read_to_string(RECORD_FILE)
            .map_err(|err| io_error(&record_path, &err))?;
        serde_json::from_str(&contents).map_err(|err| StoreError::Format {
            path: record_path,
            message: err.to_string(),
        })
    }

    /// Writes the record of `machine`, creating its directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be encoded or written.
    pub fn save(&self, machine: &Machine) -> Result<(), StoreError> {
        let dir_path = self.machine_dir(&machine.name)?;
        let record_path = dir_path.join(RECORD_FILE);
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let rendered =
            serde_json::to_string_pretty(machine).map_err(|err| StoreError::Format {
                path: record_path.clone(),
                message: err.to_string(),
            })?;
        let dir = open(&dir_path)?;
        dir.write(RECORD_FILE, rendered)
            .map_err(|err| io_error(&record_path, &err))?;
        restrict(&dir, &record_path)
    }

    /// Deletes the machine directory with its record and keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be removed.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let dir_path = self.machine_dir(name)?;
        let machines_path = self.root.join(MACHINES_DIR);
        let machines = match Dir::open_ambient_dir(&machines_path, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&machines_path, &err)),
        };
        match machines.remove_dir_all(name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&dir_path, &err)),
        }
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_owned()))
    }
}

fn open(path: &Utf8Path) -> Result<Dir, StoreError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// The record carries the bootstrap password, so only the owner may read it.
#[cfg(unix)]
fn restrict(dir: &Dir, record_path: &Utf8Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(0o600));
    dir.set_permissions(RECORD_FILE, permissions)
        .map_err(|err| io_error(record_path, &err))
}

#[cfg(not(unix))]
fn restrict(_dir: &Dir, _record_path: &Utf8Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineSettings;
    use crate::resource::ResourceId;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct TempStore {
        store: MachineStore,
        _tmp: TempDir,
    }

    #[fixture]
    fn temp_store() -> TempStore {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        TempStore {
            store: MachineStore::new(root),
            _tmp: tmp,
        }
    }

    #[rstest]
    fn save_then_load_preserves_record(temp_store: TempStore) {
        let store = &temp_store.store;
        let dir = store.create_dir("node-1").expect("create dir");
        let mut machine = Machine::new("node-1", dir, MachineSettings::default());
        machine.server_id = ResourceId::resolved("srv-9");

        store.save(&machine).expect("save");

        assert!(store.exists("node-1").expect("exists"));
        assert_eq!(store.load("node-1").expect("load"), machine);
    }

    #[cfg(unix)]
    #[rstest]
    fn saved_record_is_readable_only_by_the_owner(temp_store: TempStore) {
        use std::os::unix::fs::PermissionsExt;

        let store = &temp_store.store;
        let dir = store.create_dir("node-1").expect("create dir");
        let mut machine = Machine::new("node-1", dir.clone(), MachineSettings::default());
        machine.bootstrap_password = Some(String::from("s3cret"));

        store.save(&machine).expect("save");

        let mode = std::fs::metadata(dir.join(RECORD_FILE).as_std_path())
            .expect("record metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[rstest]
    fn create_dir_refuses_existing_machine(temp_store: TempStore) {
        let store = &temp_store.store;
        let dir = store.create_dir("node-1").expect("create dir");
        store
            .save(&Machine::new("node-1", dir, MachineSettings::default()))
            .expect("save");

        assert_eq!(
            store.create_dir("node-1"),
            Err(StoreError::AlreadyExists(String::from("node-1")))
        );
    }

    #[rstest]
    fn load_missing_machine_is_not_found(temp_store: TempStore) {
        assert_eq!(
            temp_store.store.load("ghost"),
            Err(StoreError::NotFound(String::from("ghost")))
        );
    }

    #[rstest]
    fn delete_removes_directory_and_tolerates_absence(temp_store: TempStore) {
        let store = &temp_store.store;
        let dir = store.create_dir("node-1").expect("create dir");
        store
            .save(&Machine::new("node-1", dir.clone(), MachineSettings::default()))
            .expect("save");

        store.delete("node-1").expect("delete");
        assert!(!dir.exists());
        store.delete("node-1").expect("second delete is a no-op");
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("a/b")]
    #[case("name with space")]
    fn rejects_unsafe_names(temp_store: TempStore, #[case] name: &str) {
        assert_eq!(
            temp_store.store.machine_dir(name),
            Err(StoreError::InvalidName(name.to_owned()))
        );
    }
}
