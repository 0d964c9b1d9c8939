//! Purpose: Shared profile-library candidate and config-root path defaults.
//! Exports: `default_library_candidates` and `default_config_root`.
//! Role: Keep CLI path semantics in one place.
//! Invariants: `$PORTDIR` outranks the built-in repository locations.
//! Invariants: `$PORTAGE_CONFIGROOT` is a prefix in front of /etc/portage.

use std::env;
use std::path::PathBuf;

pub(crate) fn default_library_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(portdir) = env::var_os("PORTDIR") {
        candidates.push(PathBuf::from(portdir));
    }
    candidates.push(PathBuf::from("/var/db/repos/gentoo"));
    candidates.push(PathBuf::from("/usr/portage"));
    candidates
}

pub(crate) fn default_config_root() -> PathBuf {
    let prefix = env::var_os("PORTAGE_CONFIGROOT").unwrap_or_else(|| "/".into());
    PathBuf::from(prefix).join("etc").join("portage")
}
