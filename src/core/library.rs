//! Purpose: Resolved profile-library handle and flag/keyword knowledge.
//! Exports: `Library`, `Namespace`.
//! Role: Backs namespace inference and package-name expansion for the CLI.
//! Invariants: A location carries the library iff `<root>/profiles` is a directory.
//! Invariants: Missing description files degrade to empty sets, never errors.
use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

/// A flag namespace, selecting which package.* file set an argument targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Use,
    Kw,
    Lic,
    Env,
}

impl Namespace {
    pub fn describe(self) -> &'static str {
        match self {
            Namespace::Use => "flag",
            Namespace::Kw => "keyword",
            Namespace::Lic => "license",
            Namespace::Env => "env file",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Use => "use",
            Namespace::Kw => "kw",
            Namespace::Lic => "lic",
            Namespace::Env => "env",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "use" => Some(Namespace::Use),
            "kw" | "keywords" => Some(Namespace::Kw),
            "lic" | "license" => Some(Namespace::Lic),
            "env" => Some(Namespace::Env),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PackageMeta {
    flags: HashSet<String>,
    keywords: HashSet<String>,
}

/// Handle to a resolved profile-library location.
///
/// Lookups are lazy: description files and md5-cache entries are read on
/// first use and memoized for the lifetime of the binding.
#[derive(Debug)]
pub struct Library {
    root: PathBuf,
    global_flags: OnceCell<HashSet<String>>,
    global_keywords: OnceCell<HashSet<String>>,
    categories: OnceCell<Vec<String>>,
    packages: RefCell<HashMap<String, PackageMeta>>,
}

impl Library {
    /// Whether `root` carries the profile library.
    pub fn carries(root: &Path) -> bool {
        root.join("profiles").is_dir()
    }

    pub fn open(root: &Path) -> Result<Self, Error> {
        if !Self::carries(root) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("location does not carry a profile library")
                .with_path(root));
        }
        Ok(Self {
            root: root.to_path_buf(),
            global_flags: OnceCell::new(),
            global_keywords: OnceCell::new(),
            categories: OnceCell::new(),
            packages: RefCell::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_global_flag(&self, flag: &str) -> bool {
        self.global_flags().contains(flag)
    }

    pub fn has_global_keyword(&self, keyword: &str) -> bool {
        self.global_keywords().contains(keyword)
    }

    pub fn has_package_flag(&self, package: &str, flag: &str) -> bool {
        self.with_package_meta(package, |meta| meta.flags.contains(flag))
    }

    pub fn has_package_keyword(&self, package: &str, keyword: &str) -> bool {
        keyword == "**" || self.with_package_meta(package, |meta| meta.keywords.contains(keyword))
    }

    /// Categories known to this library, from `profiles/categories` when
    /// present, else the md5-cache directory listing.
    pub fn categories(&self) -> &[String] {
        self.categories.get_or_init(|| {
            let listed = read_lines(&self.root.join("profiles").join("categories"));
            if !listed.is_empty() {
                return listed;
            }
            let mut found = Vec::new();
            if let Ok(entries) = fs::read_dir(self.md5_cache_dir()) {
                for entry in entries.flatten() {
                    if !entry.path().is_dir() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        found.push(name.to_string());
                    }
                }
            }
            found.sort();
            found
        })
    }

    /// Categories whose md5-cache carries an entry for package `name`.
    pub fn categories_owning(&self, name: &str) -> Vec<String> {
        let mut owners = Vec::new();
        for category in self.categories() {
            let dir = self.md5_cache_dir().join(category);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(entry_name) = file_name.to_str() else {
                    continue;
                };
                if split_package_version(entry_name).0 == name {
                    owners.push(category.clone());
                    break;
                }
            }
        }
        owners
    }

    /// Classify an argument against global flag/keyword knowledge.
    pub fn glob_whatis(&self, arg: &str, restrict: Option<Namespace>) -> BTreeSet<Namespace> {
        let mut out = BTreeSet::new();
        if considered(restrict, Namespace::Use) && self.has_global_flag(arg) {
            out.insert(Namespace::Use);
        }
        if considered(restrict, Namespace::Kw) && self.has_global_keyword(arg) {
            out.insert(Namespace::Kw);
        }
        out
    }

    /// Classify an argument against one package's metadata.
    pub fn whatis(
        &self,
        arg: &str,
        package: &str,
        restrict: Option<Namespace>,
    ) -> BTreeSet<Namespace> {
        let mut out = BTreeSet::new();
        if considered(restrict, Namespace::Use) && self.has_package_flag(package, arg) {
            out.insert(Namespace::Use);
        }
        if considered(restrict, Namespace::Kw) && self.has_package_keyword(package, arg) {
            out.insert(Namespace::Kw);
        }
        out
    }

    fn md5_cache_dir(&self) -> PathBuf {
        self.root.join("metadata").join("md5-cache")
    }

    fn global_flags(&self) -> &HashSet<String> {
        self.global_flags.get_or_init(|| {
            let path = self.root.join("profiles").join("use.desc");
            let mut flags = HashSet::new();
            for line in read_lines(&path) {
                if let Some((flag, _desc)) = line.split_once(" - ") {
                    flags.insert(flag.to_string());
                }
            }
            flags
        })
    }

    fn global_keywords(&self) -> &HashSet<String> {
        self.global_keywords.get_or_init(|| {
            let path = self.root.join("profiles").join("arch.list");
            let mut keywords = HashSet::new();
            for arch in read_lines(&path) {
                keywords.insert(format!("~{arch}"));
                keywords.insert(arch);
            }
            keywords.insert("**".to_string());
            keywords
        })
    }

    fn with_package_meta<R>(&self, package: &str, f: impl FnOnce(&PackageMeta) -> R) -> R {
        let mut packages = self.packages.borrow_mut();
        let meta = packages
            .entry(package.to_string())
            .or_insert_with(|| self.load_package_meta(package));
        f(meta)
    }

    fn load_package_meta(&self, package: &str) -> PackageMeta {
        let Some((category, name)) = package.split_once('/') else {
            return PackageMeta::default();
        };
        let dir = self.md5_cache_dir().join(category);
        let mut meta = PackageMeta::default();
        let Ok(entries) = fs::read_dir(&dir) else {
            tracing::debug!(package, dir = %dir.display(), "no md5-cache entries");
            return meta;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(entry_name) = file_name.to_str() else {
                continue;
            };
            if split_package_version(entry_name).0 != name {
                continue;
            }
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for line in contents.lines() {
                if let Some(value) = line.strip_prefix("IUSE=") {
                    for token in value.split_whitespace() {
                        meta.flags
                            .insert(token.trim_start_matches(['+', '-']).to_string());
                    }
                } else if let Some(value) = line.strip_prefix("KEYWORDS=") {
                    for token in value.split_whitespace() {
                        meta.keywords.insert(token.to_string());
                    }
                }
            }
        }
        meta
    }
}

fn considered(restrict: Option<Namespace>, ns: Namespace) -> bool {
    restrict.is_none_or(|r| r == ns)
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Split an md5-cache entry name into (package name, version).
///
/// The version starts at the rightmost `-` immediately followed by a digit,
/// which keeps `-rN` revision suffixes attached to the version.
fn split_package_version(entry: &str) -> (&str, &str) {
    let bytes = entry.as_bytes();
    for idx in (0..bytes.len()).rev() {
        if bytes[idx] == b'-'
            && idx + 1 < bytes.len()
            && bytes[idx + 1].is_ascii_digit()
        {
            return (&entry[..idx], &entry[idx + 1..]);
        }
    }
    (entry, "")
}
