//! Purpose: Logical sets of package.* files and effective-entry operations.
//! Exports: `FileSet`, `SetKind`, `PackageFiles`, `accept_keywords`.
//! Role: Maps namespaces to on-disk file sets and applies flag rewrites.
//! Invariants: Entry iteration order is reverse-file, reverse-entry; the
//! Invariants: last declaration in the last file is the effective one.
//! Invariants: Appends always land in the last file of a set.
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::library::Namespace;
use crate::core::packagefile::{Modifier, PackageEntry, PackageFile, PackageFlag};

/// Behavior variant of a file set.
#[derive(Clone, Debug)]
pub enum SetKind {
    Plain,
    /// Keyword files: entries with no keywords stand for the default
    /// `~arch` set and are folded back to bare package lines on write.
    Keywords { defaults: BTreeSet<String> },
    /// package.env: `-`-modified entries are dropped on write.
    Env,
}

#[derive(Debug)]
pub struct FileSet {
    paths: Vec<PathBuf>,
    files: Vec<PackageFile>,
    kind: SetKind,
}

impl FileSet {
    pub fn read(paths: Vec<PathBuf>, kind: SetKind) -> Result<Self, Error> {
        let mut files = Vec::new();
        for path in &paths {
            for file_path in expand_path(path)? {
                files.push(PackageFile::read(&file_path)?);
            }
        }

        if let SetKind::Keywords { defaults } = &kind {
            for file in &mut files {
                for entry in &mut file.entries {
                    if entry.is_empty() {
                        for keyword in defaults {
                            entry.flags.push(PackageFlag::parse(keyword));
                        }
                    }
                }
            }
        }

        Ok(Self { paths, files, kind })
    }

    /// Rewrite the modifier of the effective occurrence of a flag, or
    /// record the flag where the package is (or should be) declared.
    pub fn set_flag_state(&mut self, package: &str, name: &str, modifier: Modifier) {
        for file in self.files.iter_mut().rev() {
            for entry in file.entries.iter_mut().rev() {
                if entry.package == package && entry.set_effective_modifier(name, modifier) {
                    return;
                }
            }
        }
        for file in self.files.iter_mut().rev() {
            for entry in file.entries.iter_mut().rev() {
                if entry.package == package {
                    entry.append_flag(PackageFlag {
                        modifier,
                        name: name.to_string(),
                    });
                    return;
                }
            }
        }
        self.append_package(package).append_flag(PackageFlag {
            modifier,
            name: name.to_string(),
        });
    }

    /// Drop every entry of a package.
    pub fn reset_package(&mut self, package: &str) {
        for file in &mut self.files {
            let before = file.entries.len();
            file.entries.retain(|entry| entry.package != package);
            if file.entries.len() != before {
                file.mark_dirty();
            }
        }
    }

    /// Remove every occurrence of a flag from a package, dropping entries
    /// this leaves empty.
    pub fn reset_flag(&mut self, package: &str, name: &str) {
        for file in &mut self.files {
            let mut removed_entry = false;
            file.entries.retain_mut(|entry| {
                if entry.package != package {
                    return true;
                }
                entry.remove_flag_named(name);
                if entry.is_empty() {
                    removed_entry = true;
                    false
                } else {
                    true
                }
            });
            if removed_entry {
                file.mark_dirty();
            }
        }
    }

    /// The effective occurrence of a flag for a package, if any.
    pub fn effective_flag(&self, package: &str, name: &str) -> Option<PackageFlag> {
        for file in self.files.iter().rev() {
            for entry in file.entries.iter().rev() {
                if entry.package != package {
                    continue;
                }
                if let Some(flag) = entry.effective(name) {
                    return Some(flag.clone());
                }
            }
        }
        None
    }

    /// Every recorded flag of a package: the effective occurrence per
    /// name, sorted by name.
    pub fn flag_summary(&self, package: &str) -> Vec<PackageFlag> {
        let mut seen: BTreeMap<String, PackageFlag> = BTreeMap::new();
        for file in self.files.iter().rev() {
            for entry in file.entries.iter().rev() {
                if entry.package != package {
                    continue;
                }
                for flag in entry.flags.iter().rev() {
                    seen.entry(flag.name.clone()).or_insert_with(|| flag.clone());
                }
            }
        }
        seen.into_values().collect()
    }

    /// Fold every entry of the earlier paths into the final path.
    pub fn migrate(&mut self) -> Result<(), Error> {
        if self.paths.len() <= 1 {
            return Ok(());
        }
        let final_path = self.paths[self.paths.len() - 1].clone();
        let target = self
            .files
            .iter()
            .position(|file| belongs_to(&file.path, &final_path))
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message("final file not found while migrating")
                    .with_path(&final_path)
            })?;

        for path in self.paths[..self.paths.len() - 1].to_vec() {
            for idx in 0..self.files.len() {
                if idx == target || !belongs_to(&self.files[idx].path, &path) {
                    continue;
                }
                let moved = std::mem::take(&mut self.files[idx].entries);
                self.files[idx].mark_dirty();
                self.files[target].entries.splice(0..0, moved);
            }
        }
        self.files[target].mark_dirty();
        Ok(())
    }

    pub fn sort(&mut self) {
        for file in &mut self.files {
            for entry in &mut file.entries {
                entry.sort_flags();
            }
            file.sort_entries();
        }
    }

    pub fn write(&mut self) -> Result<(), Error> {
        match &self.kind {
            SetKind::Plain => {}
            SetKind::Keywords { defaults } => {
                for file in &mut self.files {
                    let mut folded = false;
                    for entry in &mut file.entries {
                        if entry.modified && flag_strings(entry) == *defaults {
                            entry.collapse_to_bare_line();
                            folded = true;
                        }
                    }
                    if folded {
                        file.mark_dirty();
                    }
                }
            }
            SetKind::Env => {
                for file in &mut self.files {
                    for entry in &mut file.entries {
                        if entry.modified {
                            entry.flags.retain(|flag| flag.modifier != Modifier::Minus);
                        }
                    }
                }
            }
        }

        for file in &mut self.files {
            file.write()?;
        }
        Ok(())
    }

    fn append_package(&mut self, package: &str) -> &mut PackageEntry {
        let file = self
            .files
            .last_mut()
            .expect("a file set always carries at least one file");
        file.entries.push(PackageEntry::new(package));
        file.entries.last_mut().expect("entry was just pushed")
    }
}

fn flag_strings(entry: &PackageEntry) -> BTreeSet<String> {
    entry.flags.iter().map(PackageFlag::to_string).collect()
}

fn belongs_to(file_path: &Path, set_path: &Path) -> bool {
    file_path == set_path || file_path.parent() == Some(set_path)
}

/// Expand a set path: directories become their sorted regular files
/// (dotfiles and `~` backups skipped), or a single `flaggie` file when
/// empty; anything else is used as a file path directly.
fn expand_path(path: &Path) -> Result<Vec<PathBuf>, Error> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    collect_files(path, &mut files)?;
    if files.is_empty() {
        files.push(path.join("flaggie"));
    } else {
        files.sort();
    }
    Ok(files)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    let entries =
        fs::read_dir(dir).map_err(|err| io_error(err, "failed to read config directory", dir))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| io_error(err, "failed to read config directory entry", dir))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.ends_with('~') {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// The package.* file sets of one configuration root.
#[derive(Debug)]
pub struct PackageFiles {
    use_flags: FileSet,
    keywords: FileSet,
    licenses: FileSet,
    env: FileSet,
}

impl PackageFiles {
    pub fn open(config_root: &Path, accept_keywords: &[String]) -> Result<Self, Error> {
        let defaults = accept_keywords
            .iter()
            .filter(|keyword| !keyword.starts_with('~') && !keyword.starts_with('-'))
            .map(|keyword| format!("~{keyword}"))
            .collect();

        Ok(Self {
            use_flags: FileSet::read(vec![config_root.join("package.use")], SetKind::Plain)?,
            keywords: FileSet::read(
                vec![
                    config_root.join("package.keywords"),
                    config_root.join("package.accept_keywords"),
                ],
                SetKind::Keywords { defaults },
            )?,
            licenses: FileSet::read(vec![config_root.join("package.license")], SetKind::Plain)?,
            env: FileSet::read(vec![config_root.join("package.env")], SetKind::Env)?,
        })
    }

    pub fn get_mut(&mut self, ns: Namespace) -> &mut FileSet {
        match ns {
            Namespace::Use => &mut self.use_flags,
            Namespace::Kw => &mut self.keywords,
            Namespace::Lic => &mut self.licenses,
            Namespace::Env => &mut self.env,
        }
    }

    pub fn get(&self, ns: Namespace) -> &FileSet {
        match ns {
            Namespace::Use => &self.use_flags,
            Namespace::Kw => &self.keywords,
            Namespace::Lic => &self.licenses,
            Namespace::Env => &self.env,
        }
    }

    pub fn migrate_keywords(&mut self) -> Result<(), Error> {
        self.keywords.migrate()
    }

    pub fn sort(&mut self) {
        for ns in [Namespace::Use, Namespace::Kw, Namespace::Lic, Namespace::Env] {
            self.get_mut(ns).sort();
        }
    }

    pub fn write(&mut self) -> Result<(), Error> {
        for ns in [Namespace::Use, Namespace::Kw, Namespace::Lic, Namespace::Env] {
            self.get_mut(ns).write()?;
        }
        Ok(())
    }
}

/// Accepted keywords for the configuration root: `$ACCEPT_KEYWORDS`, else
/// a single-line `ACCEPT_KEYWORDS=` assignment in make.conf, else empty.
pub fn accept_keywords(config_root: &Path) -> Vec<String> {
    if let Ok(value) = std::env::var("ACCEPT_KEYWORDS") {
        return split_keywords(&value);
    }
    let make_conf = config_root.join("make.conf");
    if let Ok(contents) = fs::read_to_string(&make_conf) {
        for line in contents.lines() {
            if let Some(value) = line.trim().strip_prefix("ACCEPT_KEYWORDS=") {
                return split_keywords(value.trim_matches(['"', '\'']));
            }
        }
    }
    Vec::new()
}

fn split_keywords(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
