//! User path → canonical kernel path.
//!
//! The filter reports names as `\Device\HarddiskVolumeN\...`; users type
//! `C:\...`. Normalizing both sides to the upper-cased device form makes
//! protected-path matching a plain string comparison.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("empty path")]
    Empty,

    #[error("cannot resolve '{path}' to a full path")]
    FullPath { path: String },

    #[error("drive {drive} has no device mapping")]
    UnmappedDrive { drive: String },
}

/// Source of full paths and drive → device mappings.
pub trait DeviceMap {
    /// Absolute, lexically clean form of `path` (backslash separated).
    fn full_path(&self, path: &str) -> Result<String, NormalizeError>;

    /// NT device behind a drive such as `C:`.
    fn dos_device(&self, drive: &str) -> Option<String>;
}

pub fn normalize(path: &str, devices: &dyn DeviceMap) -> Result<String, NormalizeError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let mut p = trimmed.replace('/', "\\");
    if p.get(..8).is_some_and(|head| head.eq_ignore_ascii_case(r"\\?\UNC\")) {
        p = format!(r"\\{}", &p[8..]);
    } else if let Some(rest) = p.strip_prefix(r"\\?\") {
        p = rest.to_string();
    }

    if is_device_path(&p) {
        return Ok(lexical_clean(&p).to_uppercase());
    }

    let full = devices.full_path(&p)?;
    match drive_of(&full) {
        Some(drive) => {
            let device = devices
                .dos_device(drive)
                .ok_or_else(|| NormalizeError::UnmappedDrive { drive: drive.to_uppercase() })?;
            Ok(lexical_clean(&format!("{device}{}", &full[2..])).to_uppercase())
        }
        // UNC and anything else without a drive letter
        None => Ok(full.to_uppercase()),
    }
}

fn is_device_path(p: &str) -> bool {
    p.get(..8).is_some_and(|head| head.eq_ignore_ascii_case(r"\Device\"))
}

/// `X:` prefix, if any.
fn drive_of(p: &str) -> Option<&str> {
    let b = p.as_bytes();
    (b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':').then(|| &p[..2])
}

/// Root that `..` never climbs above: `\\`, `X:\`, `\Device\<name>\` or `\`.
fn split_root(p: &str) -> (&str, &str) {
    if is_device_path(p) {
        let end = p[8..].find('\\').map_or(p.len(), |i| 8 + i + 1);
        p.split_at(end)
    } else if let Some(rest) = p.strip_prefix(r"\\") {
        (r"\\", rest)
    } else if drive_of(p).is_some() {
        if p[2..].starts_with('\\') { (&p[..3], &p[3..]) } else { (&p[..2], &p[2..]) }
    } else if let Some(rest) = p.strip_prefix('\\') {
        ("\\", rest)
    } else {
        ("", p)
    }
}

/// Drop empty and `.` components and resolve `..` without touching the disk.
pub fn lexical_clean(p: &str) -> String {
    let (root, rest) = split_root(p);
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('\\') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(p.len());
    out.push_str(root);
    out.push_str(&parts.join("\\"));
    out
}

// ───── static map (tests, non-Windows hosts) ────────────────────────────────

/// Fixed working directory and drive table.
#[derive(Debug, Clone)]
pub struct StaticDevices {
    cwd: String,
    drives: HashMap<String, String>,
}

impl StaticDevices {
    /// `cwd` must be absolute, e.g. `C:\Users\me`.
    pub fn new(cwd: impl Into<String>) -> Self {
        Self { cwd: cwd.into().replace('/', "\\"), drives: HashMap::new() }
    }

    pub fn with_drive(mut self, drive: &str, device: &str) -> Self {
        self.drives.insert(drive.to_uppercase(), device.to_string());
        self
    }
}

impl DeviceMap for StaticDevices {
    fn full_path(&self, path: &str) -> Result<String, NormalizeError> {
        let joined = if path.starts_with(r"\\") {
            path.to_string()
        } else if let Some(drive) = drive_of(path) {
            // Drive-relative forms resolve against the drive root.
            let rest = path[2..].trim_start_matches('\\');
            format!(r"{drive}\{rest}")
        } else if path.starts_with('\\') {
            let (root, _) = split_root(&self.cwd);
            if root.is_empty() {
                return Err(NormalizeError::FullPath { path: path.to_string() });
            }
            format!("{}{}", root.trim_end_matches('\\'), path)
        } else if self.cwd.is_empty() {
            return Err(NormalizeError::FullPath { path: path.to_string() });
        } else {
            format!(r"{}\{}", self.cwd, path)
        };
        Ok(lexical_clean(&joined))
    }

    fn dos_device(&self, drive: &str) -> Option<String> {
        self.drives.get(&drive.to_uppercase()).cloned()
    }
}

// ───── live system ──────────────────────────────────────────────────────────

/// GetFullPathNameW + QueryDosDeviceW on Windows; elsewhere the process
/// working directory with no drive table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

#[cfg(windows)]
impl DeviceMap for SystemDevices {
    fn full_path(&self, path: &str) -> Result<String, NormalizeError> {
        use windows_sys::Win32::Storage::FileSystem::GetFullPathNameW;

        let wide = to_wide(path);
        let fail = || NormalizeError::FullPath { path: path.to_string() };

        let needed = unsafe { GetFullPathNameW(wide.as_ptr(), 0, std::ptr::null_mut(), std::ptr::null_mut()) };
        if needed == 0 {
            return Err(fail());
        }
        let mut buf = vec![0u16; needed as usize];
        let written =
            unsafe { GetFullPathNameW(wide.as_ptr(), needed, buf.as_mut_ptr(), std::ptr::null_mut()) };
        if written == 0 || written >= needed {
            return Err(fail());
        }
        Ok(String::from_utf16_lossy(&buf[..written as usize]))
    }

    fn dos_device(&self, drive: &str) -> Option<String> {
        use windows_sys::Win32::Storage::FileSystem::QueryDosDeviceW;

        let wide = to_wide(drive);
        let mut buf = vec![0u16; 1024];
        let written = unsafe { QueryDosDeviceW(wide.as_ptr(), buf.as_mut_ptr(), buf.len() as u32) };
        if written == 0 {
            return None;
        }
        // REG_MULTI_SZ: the first string is the current target.
        let first = buf.split(|&c| c == 0).next()?;
        (!first.is_empty()).then(|| String::from_utf16_lossy(first))
    }
}

#[cfg(windows)]
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

#[cfg(not(windows))]
impl DeviceMap for SystemDevices {
    fn full_path(&self, path: &str) -> Result<String, NormalizeError> {
        let cwd = std::env::current_dir()
            .map_err(|_| NormalizeError::FullPath { path: path.to_string() })?
            .to_string_lossy()
            .into_owned();
        StaticDevices::new(cwd).full_path(path)
    }

    fn dos_device(&self, _drive: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> StaticDevices {
        StaticDevices::new(r"C:\Users\me").with_drive("C:", r"\Device\HarddiskVolume3")
    }

    #[test]
    fn drive_path_becomes_upper_device_path() {
        assert_eq!(normalize(r"c:\Secret.DOC", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\SECRET.DOC");
        assert_eq!(normalize("c:/docs/./a/../b.txt", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\DOCS\B.TXT");
    }

    #[test]
    fn relative_and_rooted_paths_use_the_working_directory() {
        assert_eq!(normalize("notes.txt", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\USERS\ME\NOTES.TXT");
        assert_eq!(normalize(r"\tmp\x", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\TMP\X");
    }

    #[test]
    fn verbatim_prefix_is_stripped() {
        assert_eq!(normalize(r"\\?\C:\a", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\A");
    }

    #[test]
    fn verbatim_unc_prefix_becomes_unc() {
        assert_eq!(normalize(r"\\?\UNC\srv\share\f.txt", &devices()).unwrap(), r"\\SRV\SHARE\F.TXT");
        assert_eq!(normalize(r"//?/unc/srv/share/f.txt", &devices()).unwrap(), r"\\SRV\SHARE\F.TXT");
    }

    #[test]
    fn device_paths_stop_at_the_volume() {
        let once = normalize(r"\Device\HarddiskVolume3\..\..\x", &devices()).unwrap();
        assert_eq!(once, r"\DEVICE\HARDDISKVOLUME3\X");
        assert_eq!(normalize(&once, &devices()).unwrap(), once);
    }

    #[test]
    fn unc_is_upper_cased_as_is() {
        assert_eq!(normalize(r"\\server\share\f.txt", &devices()).unwrap(), r"\\SERVER\SHARE\F.TXT");
    }

    #[test]
    fn failures_are_explicit() {
        assert_eq!(normalize("   ", &devices()), Err(NormalizeError::Empty));
        assert_eq!(
            normalize(r"z:\x", &devices()),
            Err(NormalizeError::UnmappedDrive { drive: "Z:".into() })
        );
    }

    #[test]
    fn clean_handles_roots() {
        assert_eq!(lexical_clean(r"\Device\V\a\\b\..\c\"), r"\Device\V\a\c");
        assert_eq!(lexical_clean(r"C:\.."), r"C:\");
        assert_eq!(lexical_clean(r"\\srv\share"), r"\\srv\share");
        assert_eq!(lexical_clean(r"\Device\V\..\.."), r"\Device\V\");
        assert_eq!(lexical_clean(r"\Device\V"), r"\Device\V");
    }
}
