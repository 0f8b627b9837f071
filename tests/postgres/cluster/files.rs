//! Reads values the running cluster leaves on disk.

use super::BoxError;
use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use postgresql_embedded::Settings;
use std::io::ErrorKind;

/// Line of `postmaster.pid` holding the listening port.
const PID_FILE_PORT_LINE: usize = 3;

pub(super) fn split_parent(path: &Utf8Path) -> Result<(Dir, &str), BoxError> {
    let name = path
        .file_name()
        .ok_or_else(|| format!("{path} has no file name"))?;
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

fn read_optional(dir: &Dir, name: &str) -> Result<Option<String>, BoxError> {
    match dir.read_to_string(name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Adopts the generated superuser password when bootstrap wrote one.
pub(super) fn adopt_password_file(settings: &mut Settings) -> Result<(), BoxError> {
    let path = settings.password_file.to_string_lossy().into_owned();
    let (dir, name) = split_parent(Utf8Path::new(&path))?;
    if let Some(contents) = read_optional(&dir, name)? {
        let password = contents.trim_end();
        if !password.is_empty() {
            password.clone_into(&mut settings.password);
        }
    }
    Ok(())
}

/// Adopts the port the postmaster actually bound.
pub(super) fn adopt_postmaster_port(settings: &mut Settings) -> Result<(), BoxError> {
    let data_dir = settings.data_dir.to_string_lossy().into_owned();
    let dir = Dir::open_ambient_dir(Utf8Path::new(&data_dir), ambient_authority())?;
    let port = read_optional(&dir, "postmaster.pid")?.and_then(|contents| {
        contents
            .lines()
            .nth(PID_FILE_PORT_LINE)
            .and_then(|line| line.trim().parse::<u16>().ok())
    });
    if let Some(bound) = port {
        settings.port = bound;
    }
    Ok(())
}
