//! Runs embedded `PostgreSQL` lifecycle steps on behalf of a root test runner.
//!
//! ```text
//! hueforge-pg-worker <setup|start|stop> <payload-path>
//! ```
//!
//! The payload is the JSON [`WorkerPayload`] written by
//! `pg_embedded_setup_unpriv`: cluster settings plus environment overrides.
//! `PostgreSQL` refuses to run as root, so when invoked as root the helper
//! re-executes itself as `nobody` before touching the cluster.

#[cfg(unix)]
use camino::{Utf8Path, Utf8PathBuf};
#[cfg(unix)]
use nix::unistd::{Uid, User, initgroups, setgid, setuid};
#[cfg(unix)]
use pg_embedded_setup_unpriv::ambient_dir_and_path;
#[cfg(unix)]
use pg_embedded_setup_unpriv::worker::{PlainSecret, WorkerPayload};
#[cfg(unix)]
use postgresql_embedded::{PostgreSQL, Status};
#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::io::Read;
#[cfg(unix)]
use std::process::{Command, ExitStatus};
#[cfg(unix)]
use std::str::FromStr;
#[cfg(unix)]
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(unix)]
const DEMOTED_MARKER: &str = "HUEFORGE_PG_WORKER_DEMOTED";
#[cfg(unix)]
const SAFE_PATH: &str = "/usr/sbin:/usr/bin:/sbin:/bin";
#[cfg(unix)]
const UNPRIVILEGED_USER: &str = "nobody";

#[cfg(unix)]
#[derive(Debug, Error)]
enum PgWorkerError {
    #[error("usage: hueforge-pg-worker <setup|start|stop> <payload-path>: {0}")]
    Usage(String),
    #[error("cannot read payload {path}: {source}")]
    PayloadRead { path: Utf8PathBuf, source: BoxError },
    #[error("malformed payload: {0}")]
    PayloadFormat(#[from] serde_json::Error),
    #[error("invalid cluster settings: {0}")]
    Settings(String),
    #[error("cannot switch to an unprivileged user: {0}")]
    Demotion(String),
    #[error("runtime unavailable: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("cluster {step} failed: {message}")]
    Cluster { step: &'static str, message: String },
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterStep {
    Setup,
    Start,
    Stop,
}

#[cfg(unix)]
impl ClusterStep {
    const fn label(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    fn failure(self, err: impl std::fmt::Display) -> PgWorkerError {
        PgWorkerError::Cluster {
            step: self.label(),
            message: err.to_string(),
        }
    }
}

#[cfg(unix)]
impl FromStr for ClusterStep {
    type Err = PgWorkerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "setup" => Ok(Self::Setup),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(PgWorkerError::Usage(format!("unknown step '{other}'"))),
        }
    }
}

#[cfg(unix)]
#[derive(Debug)]
struct Invocation {
    step: ClusterStep,
    payload_path: Utf8PathBuf,
}

#[cfg(unix)]
impl Invocation {
    fn parse(args: &[String]) -> Result<Self, PgWorkerError> {
        match args {
            [step, payload_path] => Ok(Self {
                step: step.parse()?,
                payload_path: Utf8PathBuf::from(payload_path),
            }),
            [] | [_] => Err(PgWorkerError::Usage("missing arguments".to_owned())),
            [_, _, extra, ..] => Err(PgWorkerError::Usage(format!(
                "unexpected argument '{extra}'"
            ))),
        }
    }
}

#[cfg(unix)]
fn main() -> Result<(), BoxError> {
    let args = std::env::args_os()
        .skip(1)
        .map(|arg| {
            arg.into_string()
                .map_err(|_| PgWorkerError::Usage("arguments must be UTF-8".to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let invocation = Invocation::parse(&args)?;

    if Uid::effective().is_root() && std::env::var_os(DEMOTED_MARKER).is_none() {
        let status = reexec_unprivileged(&args)?;
        std::process::exit(status.code().unwrap_or(1));
    }

    run(&invocation)?;
    Ok(())
}

#[cfg(unix)]
fn run(invocation: &Invocation) -> Result<(), PgWorkerError> {
    let payload = read_payload(&invocation.payload_path)?;
    demote_if_root()?;
    let settings = payload
        .settings
        .into_settings()
        .map_err(|err| PgWorkerError::Settings(err.to_string()))?;
    apply_overrides(&payload.environment);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PgWorkerError::Runtime)?;
    let step = invocation.step;
    runtime.block_on(async move {
        let mut postgres = PostgreSQL::new(settings);
        match step {
            ClusterStep::Setup => {
                postgres.setup().await.map_err(|err| step.failure(err))?;
                start_if_stopped(&mut postgres, step).await
            }
            ClusterStep::Start => {
                start_if_stopped(&mut postgres, step).await?;
                // Dropping the handle would stop the server once this process exits.
                std::mem::forget(postgres);
                Ok(())
            }
            ClusterStep::Stop => postgres.stop().await.map_err(|err| step.failure(err)),
        }
    })
}

#[cfg(unix)]
async fn start_if_stopped(
    postgres: &mut PostgreSQL,
    step: ClusterStep,
) -> Result<(), PgWorkerError> {
    if matches!(postgres.status(), Status::Started) {
        return Ok(());
    }
    postgres.start().await.map_err(|err| step.failure(err))
}

#[cfg(unix)]
fn read_payload(path: &Utf8Path) -> Result<WorkerPayload, PgWorkerError> {
    let read = || -> Result<Vec<u8>, BoxError> {
        let (dir, relative) = ambient_dir_and_path(path)?;
        let mut file = dir.open(relative.as_std_path())?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    };
    let bytes = read().map_err(|source| PgWorkerError::PayloadRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(unix)]
fn reexec_unprivileged(args: &[String]) -> Result<ExitStatus, PgWorkerError> {
    let exe = std::env::current_exe()
        .map_err(|err| PgWorkerError::Demotion(err.to_string()))
        .and_then(|path| {
            Utf8PathBuf::try_from(path).map_err(|err| PgWorkerError::Demotion(err.to_string()))
        })?;

    let runuser = Command::new("runuser")
        .args(["-u", UNPRIVILEGED_USER, "--"])
        .arg(exe.as_std_path())
        .args(args)
        .env(DEMOTED_MARKER, "1")
        .env("PATH", SAFE_PATH)
        .status();
    match runuser {
        Ok(status) => Ok(status),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let script = std::iter::once(exe.as_str())
                .chain(args.iter().map(String::as_str))
                .map(quote_for_shell)
                .collect::<Vec<_>>()
                .join(" ");
            Command::new("/bin/su")
                .args(["-s", "/bin/sh", UNPRIVILEGED_USER, "-c"])
                .arg(format!("{DEMOTED_MARKER}=1 exec {script}"))
                .env("PATH", SAFE_PATH)
                .status()
                .map_err(|su_err| PgWorkerError::Demotion(su_err.to_string()))
        }
        Err(err) => Err(PgWorkerError::Demotion(err.to_string())),
    }
}

#[cfg(unix)]
fn quote_for_shell(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn demote_if_root() -> Result<(), PgWorkerError> {
    if !Uid::effective().is_root() {
        return Ok(());
    }
    let demotion = |err: nix::Error| PgWorkerError::Demotion(err.to_string());
    let user = User::from_name(UNPRIVILEGED_USER)
        .map_err(demotion)?
        .ok_or_else(|| PgWorkerError::Demotion("user does not exist".to_owned()))?;
    let name =
        CString::new(user.name.as_str()).map_err(|err| PgWorkerError::Demotion(err.to_string()))?;
    initgroups(&name, user.gid).map_err(demotion)?;
    setgid(user.gid).map_err(demotion)?;
    setuid(user.uid).map_err(demotion)?;

    // SAFETY: no other threads exist yet; the runtime starts after this.
    unsafe {
        std::env::set_var("HOME", &user.dir);
        std::env::set_var("USER", &user.name);
        std::env::set_var("LOGNAME", &user.name);
    }
    Ok(())
}

#[cfg(unix)]
fn apply_overrides(environment: &[(String, Option<PlainSecret>)]) {
    for (key, value) in environment {
        // SAFETY: called before the runtime starts, while the process is single-threaded.
        unsafe {
            match value {
                Some(secret) => std::env::set_var(key, secret.expose()),
                None => std::env::remove_var(key),
            }
        }
    }
}

#[cfg(not(unix))]
fn main() -> Result<(), BoxError> {
    Err("hueforge-pg-worker requires a Unix host".into())
}
