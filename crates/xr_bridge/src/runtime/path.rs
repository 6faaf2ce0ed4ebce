//! Semantic path interning

use std::collections::HashMap;

use crate::core::error::{XrError, XrResult};
use crate::foundation::enumerate::enumerate_string;
use crate::foundation::handles::InstanceHandle;

use super::Runtime;

/// Interned path atom, stable for the lifetime of its instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(pub u64);

impl Path {
    /// The null path
    pub const NULL: Self = Self(0);

    /// Whether this is the null path
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Per-instance path storage
#[derive(Debug, Default)]
pub(crate) struct PathTable {
    atoms: HashMap<String, Path>,
    strings: Vec<String>,
}

impl PathTable {
    /// Atom for `value`, interning it on first use
    pub(crate) fn intern(&mut self, value: &str) -> XrResult<Path> {
        validate_path(value)?;
        if let Some(path) = self.atoms.get(value) {
            return Ok(*path);
        }
        self.strings.push(value.to_string());
        let path = Path(self.strings.len() as u64);
        self.atoms.insert(value.to_string(), path);
        log::debug!("Interned path {value} as {}", path.0);
        Ok(path)
    }

    /// String behind `path`
    pub(crate) fn resolve(&self, path: Path) -> XrResult<&str> {
        let index = usize::try_from(path.0).map_err(|_| XrError::PathInvalid)?;
        index
            .checked_sub(1)
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
            .ok_or(XrError::PathInvalid)
    }
}

/// Check the well-formed path rules
///
/// A path starts with `/`, has no empty components, does not end with `/`,
/// and uses only lowercase letters, digits, `-`, `_` and `.`. A component
/// made only of dots is rejected.
fn validate_path(value: &str) -> XrResult<()> {
    let malformed = |reason: &str| Err(XrError::PathFormatInvalid(format!("'{value}': {reason}")));

    let Some(rest) = value.strip_prefix('/') else {
        return malformed("must start with '/'");
    };
    if rest.is_empty() {
        return malformed("has no components");
    }
    for component in rest.split('/') {
        if component.is_empty() {
            return malformed("has an empty component");
        }
        if component.chars().all(|c| c == '.') {
            return malformed("has a component of only dots");
        }
        if let Some(c) = component
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
        {
            return malformed(&format!("contains '{c}'"));
        }
    }
    Ok(())
}

impl Runtime {
    /// Intern a path string
    pub fn string_to_path(&mut self, instance: InstanceHandle, value: &str) -> XrResult<Path> {
        self.instances.get_mut(instance)?.paths.intern(value)
    }

    /// String behind a path atom
    pub fn path_to_string(&self, instance: InstanceHandle, path: Path) -> XrResult<String> {
        self.instances.get(instance)?.paths.resolve(path).map(str::to_string)
    }

    /// Two-call form of [`Runtime::path_to_string`]; the count includes the NUL terminator
    pub fn path_to_string_buffer(&self, instance: InstanceHandle, path: Path, output: &mut [u8]) -> XrResult<usize> {
        let value = self.instances.get(instance)?.paths.resolve(path)?;
        enumerate_string(value, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let mut table = PathTable::default();
        let left = table.intern("/user/hand/left").unwrap();
        let right = table.intern("/user/hand/right").unwrap();
        assert_ne!(left, right);
        assert!(!left.is_null());
        assert_eq!(table.intern("/user/hand/left").unwrap(), left);
        assert_eq!(table.resolve(right).unwrap(), "/user/hand/right");
    }

    #[test]
    fn test_malformed_paths() {
        let mut table = PathTable::default();
        for bad in ["", "/", "user/head", "/user/", "/user//head", "/User/head", "/user/../head", "/user/he ad"] {
            assert!(matches!(table.intern(bad), Err(XrError::PathFormatInvalid(_))), "{bad} accepted");
        }
        table.intern("/interaction_profiles/khr/simple_controller").unwrap();
        table.intern("/user/hand/left/input/select.click").unwrap();
    }

    #[test]
    fn test_unknown_atoms() {
        let mut table = PathTable::default();
        table.intern("/user/head").unwrap();
        assert_eq!(table.resolve(Path::NULL), Err(XrError::PathInvalid));
        assert_eq!(table.resolve(Path(2)), Err(XrError::PathInvalid));
    }
}
