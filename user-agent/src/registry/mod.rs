//! Protected-path registry.
//!
//! Filled once at startup from the command line, then shared read-only with
//! every worker (no lock). An empty registry means every access is reported
//! to the consultant.

pub mod normalize;

pub use normalize::{DeviceMap, NormalizeError, StaticDevices, SystemDevices, normalize};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("protected-path registry is full ({capacity} entries)")]
    Full { capacity: usize },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

#[derive(Debug, Clone)]
pub struct ProtectedPaths {
    entries: Vec<String>,
    capacity: usize,
}

impl ProtectedPaths {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    /// Normalize and register `path`. Returns the canonical form; adding a
    /// path that is already present does not use up capacity.
    pub fn add(&mut self, path: &str, devices: &dyn DeviceMap) -> Result<&str, RegistryError> {
        let canonical = normalize(path, devices)?;
        let index = match self.entries.iter().position(|e| *e == canonical) {
            Some(existing) => existing,
            None if self.entries.len() >= self.capacity => {
                return Err(RegistryError::Full { capacity: self.capacity });
            }
            None => {
                self.entries.push(canonical);
                self.entries.len() - 1
            }
        };
        Ok(&self.entries[index])
    }

    /// `kernel_path` is the name reported by the filter.
    pub fn is_protected(&self, kernel_path: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let upper = kernel_path.to_uppercase();
        self.entries.iter().any(|e| *e == upper)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> StaticDevices {
        StaticDevices::new(r"C:\").with_drive("C:", r"\Device\HarddiskVolume3")
    }

    #[test]
    fn empty_registry_protects_everything() {
        let reg = ProtectedPaths::new(4);
        assert!(reg.is_protected(r"\Device\HarddiskVolume3\anything"));
    }

    #[test]
    fn lookup_is_case_insensitive_against_kernel_names() {
        let mut reg = ProtectedPaths::new(4);
        reg.add(r"C:\secret.doc", &devices()).unwrap();
        assert!(reg.is_protected(r"\Device\HarddiskVolume3\Secret.DOC"));
        assert!(!reg.is_protected(r"\Device\HarddiskVolume3\other.doc"));
    }

    #[test]
    fn full_registry_rejects_only_new_entries() {
        let mut reg = ProtectedPaths::new(2);
        reg.add(r"C:\a", &devices()).unwrap();
        reg.add(r"C:\b", &devices()).unwrap();
        assert_eq!(reg.add(r"C:\c", &devices()), Err(RegistryError::Full { capacity: 2 }));
        assert_eq!(reg.add(r"c:\A", &devices()).unwrap(), r"\DEVICE\HARDDISKVOLUME3\A");
        assert_eq!(reg.len(), 2);
        assert!(!reg.is_protected(r"\Device\HarddiskVolume3\c"));
    }

    #[test]
    fn bad_path_does_not_touch_the_registry() {
        let mut reg = ProtectedPaths::new(2);
        assert!(matches!(reg.add(r"q:\x", &devices()), Err(RegistryError::Normalize(_))));
        assert!(reg.is_empty());
    }
}
