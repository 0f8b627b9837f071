//! Environment the bootstrap needs before it starts a cluster.
//!
//! Root runners hand lifecycle steps to the `hueforge-pg-worker` helper,
//! which must live somewhere `nobody` can execute it.

use super::BoxError;
use super::files::split_parent;
use crate::test_helpers::{PG_WORKER_BINARY, locate_pg_worker_path};
use camino::{Utf8Path, Utf8PathBuf};
#[cfg(unix)]
use cap_std::fs::{Permissions, PermissionsExt};
use cap_std::fs_utf8::Dir;
use pg_embedded_setup_unpriv::{ExecutionPrivileges, detect_execution_privileges};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::ffi::OsString;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::sync::{Mutex, OnceLock};

static STAGED_WORKERS: OnceLock<Mutex<HashMap<Utf8PathBuf, Utf8PathBuf>>> = OnceLock::new();

pub(super) fn env_pairs(vars: &[(String, Option<String>)]) -> Vec<(OsString, Option<OsString>)> {
    vars.iter()
        .map(|(key, value)| (OsString::from(key), value.as_ref().map(OsString::from)))
        .collect()
}

/// Variables to set while `bootstrap_for_tests` resolves its settings.
pub(super) fn bootstrap_environment() -> Result<Vec<(OsString, Option<OsString>)>, BoxError> {
    let mut changes = Vec::new();
    if std::env::var_os("PG_PORT").is_none() {
        let port = free_port()?.to_string();
        changes.push((OsString::from("PG_PORT"), Some(OsString::from(port))));
    }
    if matches!(detect_execution_privileges(), ExecutionPrivileges::Root)
        && std::env::var_os("PG_EMBEDDED_WORKER").is_none()
    {
        let built = locate_pg_worker_path()
            .ok_or_else(|| format!("{PG_WORKER_BINARY} binary not found"))?;
        let staged = stage_worker(&built)?;
        changes.push((
            OsString::from("PG_EMBEDDED_WORKER"),
            Some(OsString::from(staged.as_str())),
        ));
    }
    Ok(changes)
}

fn free_port() -> Result<u16, BoxError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Copies the helper into the temp directory behind a `runuser` wrapper.
///
/// Build output under a root-owned home is usually unreadable by `nobody`.
/// Each source binary is staged once per test process.
pub(super) fn stage_worker(built: &Utf8Path) -> Result<Utf8PathBuf, BoxError> {
    let staged = STAGED_WORKERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|err| format!("staged worker cache poisoned: {err}"))?;
    if let Some(wrapper) = staged.get(built) {
        return Ok(wrapper.clone());
    }
    drop(staged);

    let mut hasher = DefaultHasher::new();
    built.as_str().hash(&mut hasher);
    let temp_dir = Utf8PathBuf::try_from(std::env::temp_dir())?;
    let wrapper = temp_dir.join(format!(
        "{PG_WORKER_BINARY}-{}-{:x}",
        std::process::id(),
        hasher.finish()
    ));
    let binary = wrapper.with_extension("bin");

    let (source_dir, source_name) = split_parent(built)?;
    let (target_dir, wrapper_name) = split_parent(&wrapper)?;
    let (_, binary_name) = split_parent(&binary)?;
    for stale in [wrapper_name, binary_name] {
        match target_dir.remove_file(stale) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    source_dir.copy(source_name, &target_dir, binary_name)?;
    write_wrapper(&target_dir, wrapper_name, &binary)?;
    #[cfg(unix)]
    for executable in [wrapper_name, binary_name] {
        target_dir.set_permissions(executable, Permissions::from_mode(0o755))?;
    }

    let mut staged = STAGED_WORKERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|err| format!("staged worker cache poisoned: {err}"))?;
    Ok(staged.entry(built.to_path_buf()).or_insert(wrapper).clone())
}

fn write_wrapper(dir: &Dir, name: &str, binary: &Utf8Path) -> Result<(), BoxError> {
    let script = format!(
        concat!(
            "#!/bin/sh\n",
            "if [ \"$(id -u)\" -eq 0 ]; then\n",
            "  exec /usr/sbin/runuser -u nobody -- {binary} \"$@\"\n",
            "fi\n",
            "exec {binary} \"$@\"\n",
        ),
        binary = binary.as_str(),
    );
    let mut file = dir.create(name)?;
    file.write_all(script.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{env_pairs, stage_worker};
    use camino::Utf8PathBuf;
    use cap_std::ambient_authority;
    use cap_std::fs_utf8::Dir;
    use std::ffi::OsString;

    #[test]
    fn env_pairs_keep_removals() {
        let pairs = env_pairs(&[
            ("PG_PORT".to_owned(), Some("5433".to_owned())),
            ("TZ".to_owned(), None),
        ]);
        assert_eq!(
            pairs,
            vec![
                (OsString::from("PG_PORT"), Some(OsString::from("5433"))),
                (OsString::from("TZ"), None),
            ]
        );
    }

    #[test]
    fn staging_is_reused_and_executable() {
        let temp = Utf8PathBuf::try_from(std::env::temp_dir()).expect("utf-8 temp dir");
        let source_name = format!("fake-worker-{}", uuid::Uuid::new_v4());
        let temp_dir = Dir::open_ambient_dir(&temp, ambient_authority()).expect("open temp dir");
        temp_dir
            .write(&source_name, b"#!/bin/sh\nexit 0\n")
            .expect("write fake worker");
        let source = temp.join(&source_name);

        let first = stage_worker(&source).expect("staging succeeds");
        let second = stage_worker(&source).expect("staging succeeds");

        assert_eq!(first, second);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(first.as_std_path())
                .expect("wrapper exists")
                .permissions()
                .mode();
            assert_ne!(mode & 0o111, 0, "wrapper mode {mode:o} is not executable");
        }
    }
}
