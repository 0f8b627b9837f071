//! Process-wide test helpers: scoped environment changes and worker discovery.

use camino::Utf8PathBuf;
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// File name of the cluster helper binary built alongside the tests.
pub const PG_WORKER_BINARY: &str = "hueforge-pg-worker";

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Applies environment changes and restores the previous values on drop.
///
/// Holding the guard also holds a process-wide lock, so concurrent tests
/// never observe each other's changes.
pub struct EnvVarGuard {
    restore: Vec<(OsString, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    /// Sets (`Some`) or removes (`None`) each variable for the guard lifetime.
    pub fn set_many(changes: &[(OsString, Option<OsString>)]) -> Self {
        let lock = ENV_MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let restore = changes
            .iter()
            .map(|(key, value)| {
                let previous = env::var_os(key);
                apply(key, value.as_ref());
                (key.clone(), previous)
            })
            .collect();
        Self {
            restore,
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        for (key, previous) in self.restore.drain(..).rev() {
            apply(&key, previous.as_ref());
        }
    }
}

fn apply(key: &OsString, value: Option<&OsString>) {
    // SAFETY: every mutation goes through `EnvVarGuard`, which holds ENV_MUTEX.
    unsafe {
        match value {
            Some(new_value) => env::set_var(key, new_value),
            None => env::remove_var(key),
        }
    }
}

/// Locates the cluster helper binary.
///
/// Prefers the path Cargo bakes into integration tests, then the binary next
/// to the running test executable, then `PATH`.
pub fn locate_pg_worker_path() -> Option<Utf8PathBuf> {
    let baked = option_env!("CARGO_BIN_EXE_hueforge-pg-worker").map(Utf8PathBuf::from);
    let beside_tests = env::current_exe()
        .ok()
        .and_then(|exe| Utf8PathBuf::try_from(exe).ok())
        .and_then(|exe| {
            exe.parent()
                .and_then(camino::Utf8Path::parent)
                .map(|profile_dir| profile_dir.join(PG_WORKER_BINARY))
        });
    let on_path = env::var_os("PATH").into_iter().flat_map(|paths| {
        env::split_paths(&paths)
            .filter_map(|dir| Utf8PathBuf::try_from(dir).ok())
            .map(|dir| dir.join(PG_WORKER_BINARY))
            .collect::<Vec<_>>()
    });

    baked
        .into_iter()
        .chain(beside_tests)
        .chain(on_path)
        .find(|candidate| candidate.is_file())
}
