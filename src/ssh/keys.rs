//! Key pair files: import, lookup and permissions.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::SshError;

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is unset.
///
/// # Examples
///
/// ```
/// # use ddcloud_machine::ssh::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Returns the public key path paired with `private_key`.
#[must_use]
pub fn public_key_path(private_key: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{private_key}.pub"))
}

/// Reads the public half of the key pair at `private_key`.
///
/// # Errors
///
/// Returns [`SshError::KeyFile`] when `<private_key>.pub` cannot be read or
/// is empty.
pub fn read_public_key(private_key: &Utf8Path) -> Result<String, SshError> {
    let path = public_key_path(private_key);
    let (dir, file_name) = open_parent(&path)?;
    let contents = dir
        .read_to_string(file_name)
        .map_err(|err| key_error(&path, &err))?;
    let key = contents.trim();
    if key.is_empty() {
        return Err(SshError::KeyFile {
            path,
            message: String::from("public key file is empty"),
        });
    }
    Ok(key.to_owned())
}

/// Copies the key pair at `source` to `destination` (private key) and
/// `<destination>.pub`, restricting both to mode `0600`.
///
/// # Errors
///
/// Returns [`SshError::KeyFile`] when either file cannot be read or written.
pub fn import_key_pair(source: &Utf8Path, destination: &Utf8Path) -> Result<(), SshError> {
    copy_restricted(source, destination)?;
    copy_restricted(&public_key_path(source), &public_key_path(destination))
}

fn copy_restricted(source: &Utf8Path, destination: &Utf8Path) -> Result<(), SshError> {
    let (source_dir, source_name) = open_parent(source)?;
    let contents = source_dir
        .read(source_name)
        .map_err(|err| key_error(source, &err))?;

    let (dest_dir, dest_name) = open_parent(destination)?;
    dest_dir
        .write(dest_name, contents)
        .map_err(|err| key_error(destination, &err))?;
    restrict(&dest_dir, dest_name, destination)
}

#[cfg(unix)]
fn restrict(dir: &Dir, file_name: &str, path: &Utf8Path) -> Result<(), SshError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(0o600));
    dir.set_permissions(file_name, permissions)
        .map_err(|err| key_error(path, &err))
}

#[cfg(not(unix))]
fn restrict(_dir: &Dir, _file_name: &str, _path: &Utf8Path) -> Result<(), SshError> {
    Ok(())
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), SshError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| SshError::KeyFile {
        path: path.to_path_buf(),
        message: String::from("path is missing a file name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| key_error(parent, &err))?;
    Ok((dir, file_name))
}

fn key_error(path: &Utf8Path, err: &std::io::Error) -> SshError {
    SshError::KeyFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()))
    }

    #[test]
    fn import_copies_both_halves() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = utf8_root(&tmp);
        std::fs::write(root.join("id_rsa"), "PRIVATE").expect("seed private key");
        std::fs::write(root.join("id_rsa.pub"), "ssh-rsa AAA user@host\n").expect("seed pub");
        std::fs::create_dir(root.join("machine")).expect("machine dir");

        let destination = root.join("machine/id_rsa");
        import_key_pair(&root.join("id_rsa"), &destination).expect("import");

        assert_eq!(
            std::fs::read_to_string(&destination).expect("read copy"),
            "PRIVATE"
        );
        assert_eq!(
            read_public_key(&destination).expect("public key"),
            "ssh-rsa AAA user@host"
        );
    }

    #[cfg(unix)]
    #[test]
    fn imported_keys_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = utf8_root(&tmp);
        std::fs::write(root.join("key"), "PRIVATE").expect("seed private key");
        std::fs::write(root.join("key.pub"), "ssh-rsa AAA").expect("seed pub");

        let destination = root.join("copy");
        import_key_pair(&root.join("key"), &destination).expect("import");

        let mode = std::fs::metadata(&destination)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_public_key_is_reported() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = utf8_root(&tmp);
        std::fs::write(root.join("lonely"), "PRIVATE").expect("seed private key");

        let err = import_key_pair(&root.join("lonely"), &root.join("copy"))
            .expect_err("missing .pub should fail");
        let SshError::KeyFile { path, .. } = err else {
            panic!("expected KeyFile error, got {err:?}");
        };
        assert_eq!(path, root.join("lonely.pub"));
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
    }

    #[test]
    fn public_key_path_appends_suffix() {
        assert_eq!(
            public_key_path(Utf8Path::new("/tmp/m/id_rsa")),
            Utf8PathBuf::from("/tmp/m/id_rsa.pub")
        );
    }
}
