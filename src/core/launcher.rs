//! Purpose: Bind the profile library and run the program entry point once.
//! Exports: `ResolverConfig`, `Resolution`, `Resolver`, `resolve_and_run`.
//! Role: Startup-only; decides which library location the process uses.
//! Invariants: Primary locations are tried in order; the fallback `lib`
//! Invariants: directory next to the executable is consulted only after the
//! Invariants: primary attempt fails, and then with highest priority.
//! Invariants: A `NotFound` outcome is never cached; stale bindings from a
//! Invariants: failed primary attempt are purged before the fallback retry.
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};
use crate::core::library::Library;

/// Explicit resolver configuration; no ambient process state is consulted
/// beyond what the caller puts here.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Candidate library locations, highest priority first.
    pub search_paths: Vec<PathBuf>,
    /// Directory the fallback `lib` location is computed against.
    /// `None` means the directory of the running executable.
    pub fallback_anchor: Option<PathBuf>,
}

/// Outcome of one resolution attempt over the current search path.
#[derive(Debug)]
pub enum Resolution {
    Resolved(Library),
    NotFound,
}

#[derive(Debug)]
pub struct Resolver {
    search_paths: Vec<PathBuf>,
    fallback_anchor: Option<PathBuf>,
    bindings: HashMap<PathBuf, Library>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            search_paths: config.search_paths,
            fallback_anchor: config.fallback_anchor,
            bindings: HashMap::new(),
        }
    }

    /// Register an already-loaded binding for a location.
    ///
    /// `locate` reuses it only while the location still carries the
    /// library; `resolve` discards it before retrying via the fallback.
    pub fn bind(&mut self, root: impl Into<PathBuf>, library: Library) {
        self.bindings.insert(root.into(), library);
    }

    /// One pass over the search path. Never records a `NotFound`.
    pub fn locate(&mut self) -> Resolution {
        for idx in 0..self.search_paths.len() {
            let path = self.search_paths[idx].clone();
            if !Library::carries(&path) {
                continue;
            }
            if let Some(library) = self.bindings.remove(&path) {
                tracing::debug!(root = %path.display(), "reusing library binding");
                return Resolution::Resolved(library);
            }
            match Library::open(&path) {
                Ok(library) => {
                    tracing::debug!(root = %path.display(), "resolved profile library");
                    return Resolution::Resolved(library);
                }
                Err(_) => continue,
            }
        }
        Resolution::NotFound
    }

    /// Primary-then-fallback resolution. Fatal when both fail.
    pub fn resolve(&mut self) -> Result<Library, Error> {
        if let Resolution::Resolved(library) = self.locate() {
            return Ok(library);
        }

        let fallback = self.fallback_dir()?;
        tracing::debug!(fallback = %fallback.display(), "primary resolution failed, trying fallback");
        // A binding recorded before the failed primary attempt must not
        // survive into the retry.
        self.bindings.clear();
        self.search_paths.insert(0, fallback);

        match self.locate() {
            Resolution::Resolved(library) => Ok(library),
            Resolution::NotFound => {
                let searched = self
                    .search_paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(Error::new(ErrorKind::NotFound)
                    .with_message(format!("profile library not found (searched: {searched})")))
            }
        }
    }

    fn fallback_dir(&self) -> Result<PathBuf, Error> {
        let anchor = match &self.fallback_anchor {
            Some(dir) => dir.clone(),
            None => executable_dir()?,
        };
        Ok(anchor.join("lib"))
    }

    #[cfg(test)]
    fn cached_roots(&self) -> Vec<&Path> {
        self.bindings.keys().map(PathBuf::as_path).collect()
    }
}

fn executable_dir() -> Result<PathBuf, Error> {
    let exe = env::current_exe().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("cannot determine executable location")
            .with_source(err)
    })?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("executable has no parent directory")
        })
}

/// Resolve the profile library and invoke `entry` exactly once with the
/// argument vector; its return value is the process exit status.
pub fn resolve_and_run<F>(config: ResolverConfig, argv: &[String], entry: F) -> Result<i32, Error>
where
    F: FnOnce(&Library, &[String]) -> Result<i32, Error>,
{
    let mut resolver = Resolver::new(config);
    let library = resolver.resolve()?;
    entry(&library, argv)
}

#[cfg(test)]
mod tests {
    use super::{Resolution, Resolver, ResolverConfig, resolve_and_run};
    use crate::core::error::ErrorKind;
    use crate::core::library::Library;
    use std::fs;
    use std::path::Path;

    fn make_library(root: &Path) {
        fs::create_dir_all(root.join("profiles")).unwrap();
    }

    fn config(search_paths: Vec<std::path::PathBuf>, anchor: &Path) -> ResolverConfig {
        ResolverConfig {
            search_paths,
            fallback_anchor: Some(anchor.to_path_buf()),
        }
    }

    #[test]
    fn primary_resolution_prefers_first_candidate() {
        let temp = tempfile::tempdir().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        make_library(&first);
        make_library(&second);

        let mut resolver = Resolver::new(config(vec![first.clone(), second], temp.path()));
        let library = resolver.resolve().unwrap();
        assert_eq!(library.root(), first.as_path());
        // The fallback location is never prepended on primary success.
        assert_eq!(resolver.search_paths.len(), 2);
    }

    #[test]
    fn fallback_is_used_and_gets_priority() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing");
        let fallback = temp.path().join("lib");
        make_library(&fallback);

        let mut resolver = Resolver::new(config(vec![missing], temp.path()));
        let library = resolver.resolve().unwrap();
        assert_eq!(library.root(), fallback.as_path());
        assert_eq!(resolver.search_paths[0], fallback);
    }

    #[test]
    fn unresolved_everywhere_is_fatal_and_entry_never_runs() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing");

        let mut invoked = false;
        let result = resolve_and_run(
            config(vec![missing], temp.path()),
            &["flaggie".to_string()],
            |_, _| {
                invoked = true;
                Ok(0)
            },
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!invoked);
    }

    #[test]
    fn stale_binding_is_discarded_on_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let primary = temp.path().join("primary");
        let fallback = temp.path().join("lib");
        make_library(&primary);
        make_library(&fallback);

        let stale = Library::open(&primary).unwrap();
        // The primary location stops carrying the library after the
        // binding was recorded.
        fs::remove_dir_all(primary.join("profiles")).unwrap();

        let mut resolver = Resolver::new(config(vec![primary.clone()], temp.path()));
        resolver.bind(&primary, stale);
        let library = resolver.resolve().unwrap();
        assert_eq!(library.root(), fallback.as_path());
        assert!(resolver.cached_roots().is_empty());
    }

    #[test]
    fn not_found_is_never_cached() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("repo");

        let mut resolver = Resolver::new(config(vec![root.clone()], temp.path()));
        assert!(matches!(resolver.locate(), Resolution::NotFound));
        assert!(resolver.cached_roots().is_empty());

        make_library(&root);
        match resolver.locate() {
            Resolution::Resolved(library) => assert_eq!(library.root(), root.as_path()),
            Resolution::NotFound => panic!("library should resolve once present"),
        }
    }

    #[test]
    fn valid_binding_is_reused() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("repo");
        make_library(&root);

        let preloaded = Library::open(&root).unwrap();
        let mut resolver = Resolver::new(config(vec![root.clone()], temp.path()));
        resolver.bind(&root, preloaded);
        let library = resolver.resolve().unwrap();
        assert_eq!(library.root(), root.as_path());
        assert!(resolver.cached_roots().is_empty());
    }

    #[test]
    fn entry_point_receives_argv_and_sets_status() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("repo");
        make_library(&root);

        let argv = vec!["flaggie".to_string(), "--help".to_string()];
        let code = resolve_and_run(config(vec![root], temp.path()), &argv, |_, args| {
            assert_eq!(args, ["flaggie", "--help"]);
            Ok(42)
        })
        .unwrap();
        assert_eq!(code, 42);
    }
}
