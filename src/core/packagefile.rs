// Line-preserving package.* file model with atomic, lock-guarded rewrites.
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::error::{Error, ErrorKind, io_error};

/// Flag state marker as written in package.* files.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Modifier {
    Bare,
    Minus,
    Plus,
}

impl Modifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Bare => "",
            Modifier::Minus => "-",
            Modifier::Plus => "+",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageFlag {
    pub modifier: Modifier,
    pub name: String,
}

impl PackageFlag {
    pub fn parse(token: &str) -> Self {
        match token.as_bytes().first() {
            Some(b'-') => Self {
                modifier: Modifier::Minus,
                name: token[1..].to_string(),
            },
            Some(b'+') => Self {
                modifier: Modifier::Plus,
                name: token[1..].to_string(),
            },
            _ => Self {
                modifier: Modifier::Bare,
                name: token.to_string(),
            },
        }
    }
}

impl fmt::Display for PackageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.modifier.as_str(), self.name)
    }
}

/// One package line plus the verbatim whitespace/comment lines above it.
#[derive(Clone, Debug)]
pub struct PackageEntry {
    leading: Vec<String>,
    as_str: String,
    pub package: String,
    pub flags: Vec<PackageFlag>,
    trailing: String,
    pub modified: bool,
}

impl PackageEntry {
    /// Parse one source line, claiming the pending whitespace lines above
    /// it. Blank and comment lines yield `None` and leave them pending.
    fn parse(line: &str, pending: &mut Vec<String>) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let package = tokens.next()?;
        if package.starts_with('#') {
            return None;
        }
        let mut flags = Vec::new();
        for token in tokens {
            if token.starts_with('#') {
                break;
            }
            flags.push(PackageFlag::parse(token));
        }
        Some(Self {
            leading: std::mem::take(pending),
            as_str: line.to_string(),
            package: package.to_string(),
            flags,
            trailing: trailing_comment(line),
            modified: false,
        })
    }

    /// Fresh entry for a package, carrying no source line.
    pub fn new(package: &str) -> Self {
        Self {
            leading: Vec::new(),
            as_str: String::new(),
            package: package.to_string(),
            flags: Vec::new(),
            trailing: "\n".to_string(),
            modified: true,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.leading.concat();
        if !self.modified {
            out.push_str(&self.as_str);
        } else {
            out.push_str(&self.package);
            out.push(' ');
            let rendered = self
                .flags
                .iter()
                .map(PackageFlag::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&rendered);
            out.push_str(&self.trailing);
        }
        out
    }

    /// Collapse the entry to a bare package line, dropping flag state from
    /// the rendered output without marking it modified.
    pub fn collapse_to_bare_line(&mut self) {
        self.as_str = format!("{}\n", self.package);
        self.modified = false;
    }

    pub fn append_flag(&mut self, flag: PackageFlag) {
        self.flags.push(flag);
        self.modified = true;
    }

    /// The effective occurrence of a flag: the last one declared wins.
    pub fn effective(&self, name: &str) -> Option<&PackageFlag> {
        self.flags.iter().rev().find(|flag| flag.name == name)
    }

    /// Rewrite the modifier of the effective occurrence. Marks the entry
    /// modified when an occurrence exists, matching rewrite-on-touch
    /// semantics even if the modifier value is unchanged.
    pub fn set_effective_modifier(&mut self, name: &str, modifier: Modifier) -> bool {
        if let Some(flag) = self.flags.iter_mut().rev().find(|flag| flag.name == name) {
            flag.modifier = modifier;
            self.modified = true;
            true
        } else {
            false
        }
    }

    /// Remove every occurrence of a flag. Entries without a matching
    /// occurrence stay unmodified.
    pub fn remove_flag_named(&mut self, name: &str) {
        let before = self.flags.len();
        self.flags.retain(|flag| flag.name != name);
        if self.flags.len() != before {
            self.modified = true;
        }
    }

    pub fn sort_flags(&mut self) {
        let mut sorted = self.flags.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        if sorted != self.flags {
            self.flags = sorted;
            self.modified = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// A trailing ` # comment` (with its single leading whitespace character),
/// newline-terminated; a plain newline when the line carries none.
fn trailing_comment(line: &str) -> String {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    let bytes = trimmed.as_bytes();
    for idx in 1..bytes.len() {
        if bytes[idx] == b'#' && bytes[idx - 1].is_ascii_whitespace() {
            return format!("{}\n", &trimmed[idx - 1..]);
        }
    }
    "\n".to_string()
}

/// One package.* file: ordered entries plus the trailing whitespace block.
#[derive(Debug, Default)]
pub struct PackageFile {
    pub path: PathBuf,
    pub entries: Vec<PackageEntry>,
    trailing: Vec<String>,
    dirty: bool,
}

impl PackageFile {
    /// Read a file; a missing path yields an empty file.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_error(err, "failed to read package file", path)),
        };

        let mut entries = Vec::new();
        let mut pending = Vec::new();
        for line in contents.split_inclusive('\n') {
            match PackageEntry::parse(line, &mut pending) {
                Some(entry) => entries.push(entry),
                None => pending.push(line.to_string()),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            trailing: pending,
            dirty: false,
        })
    }

    pub fn modified(&self) -> bool {
        self.dirty || self.entries.iter().any(|entry| entry.modified)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Rendered file contents. Entries emptied by modification are dropped.
    pub fn data(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if entry.modified && entry.is_empty() {
                continue;
            }
            out.push_str(&entry.render());
        }
        for line in &self.trailing {
            out.push_str(line);
        }
        out
    }

    pub fn sort_entries(&mut self) {
        if self
            .entries
            .is_sorted_by(|a, b| a.package <= b.package)
        {
            return;
        }
        self.entries.sort_by(|a, b| a.package.cmp(&b.package));
        self.dirty = true;
    }

    /// Write the file back if anything changed: atomic temp-file replace
    /// with a `~` backup, holding an exclusive lock on the prior file.
    pub fn write(&mut self) -> Result<(), Error> {
        if !self.modified() {
            return Ok(());
        }

        let data = self.data();
        let backup = backup_path(&self.path);

        if data.is_empty() {
            if fs::rename(&self.path, &backup).is_err() {
                let _ = fs::remove_file(&self.path);
            }
        } else {
            let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(parent)
                .map_err(|err| io_error(err, "failed to create config directory", parent))?;

            let _lock = lock_existing(&self.path)?;
            let prior = fs::metadata(&self.path).ok().map(|meta| meta.permissions());

            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .map_err(|err| io_error(err, "failed to create temporary file", parent))?;
            tmp.write_all(data.as_bytes())
                .map_err(|err| io_error(err, "failed to write package file", &self.path))?;

            let _ = fs::copy(&self.path, &backup);
            tmp.persist(&self.path).map_err(|err| {
                io_error(err.error, "failed to replace package file", &self.path)
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = prior.map(|perms| perms.mode()).unwrap_or(0o644);
                let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(mode));
            }
        }

        for entry in &mut self.entries {
            entry.modified = false;
        }
        self.dirty = false;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("~");
    path.with_file_name(name)
}

fn lock_existing(path: &Path) -> Result<Option<fs::File>, Error> {
    match OpenOptions::new().read(true).open(path) {
        Ok(file) => {
            file.lock_exclusive()
                .map_err(|err| io_error(err, "failed to lock package file", path))?;
            Ok(Some(file))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(err, "failed to open package file", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::{Modifier, PackageEntry, PackageFile, PackageFlag};
    use std::fs;

    const SAMPLE: &str = "# managed flags\n\napp-misc/foo alsa -doc  # keep docs off\nmedia-sound/bar vorbis\n\n# trailing note\n";

    fn read_str(contents: &str) -> PackageFile {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("package.use");
        fs::write(&path, contents).unwrap();
        PackageFile::read(&path).unwrap()
    }

    #[test]
    fn untouched_file_renders_byte_identically() {
        let file = read_str(SAMPLE);
        assert_eq!(file.data(), SAMPLE);
        assert!(!file.modified());
    }

    #[test]
    fn flag_parsing_captures_modifiers() {
        let flag = PackageFlag::parse("-doc");
        assert_eq!(flag.modifier, Modifier::Minus);
        assert_eq!(flag.name, "doc");
        assert_eq!(flag.to_string(), "-doc");
        assert_eq!(PackageFlag::parse("+X").to_string(), "+X");
        assert_eq!(PackageFlag::parse("alsa").to_string(), "alsa");
    }

    #[test]
    fn modified_entry_keeps_trailing_comment() {
        let mut file = read_str(SAMPLE);
        let entry = &mut file.entries[0];
        assert!(entry.set_effective_modifier("doc", Modifier::Bare));
        // The rewrite keeps the comment with a single separating space.
        assert_eq!(
            entry.render(),
            "# managed flags\n\napp-misc/foo alsa doc # keep docs off\n"
        );
    }

    #[test]
    fn effective_occurrence_is_the_last_one() {
        let file = read_str("app-misc/foo alsa -alsa\n");
        let entry = &file.entries[0];
        let effective = entry.effective("alsa").unwrap();
        assert_eq!(effective.modifier, Modifier::Minus);
    }

    #[test]
    fn remove_flag_drops_every_occurrence() {
        let mut file = read_str("app-misc/foo alsa -alsa doc\n");
        file.entries[0].remove_flag_named("alsa");
        assert_eq!(file.entries[0].render(), "app-misc/foo doc\n");
    }

    #[test]
    fn removing_an_absent_flag_leaves_the_entry_untouched() {
        let mut file = read_str("app-misc/foo alsa  # c\n");
        file.entries[0].remove_flag_named("doc");
        assert!(!file.entries[0].modified);
        assert!(!file.modified());
        assert_eq!(file.data(), "app-misc/foo alsa  # c\n");
    }

    #[test]
    fn emptied_entries_disappear_from_data() {
        let mut file = read_str("app-misc/foo alsa\nmedia-sound/bar vorbis\n");
        file.entries[0].remove_flag_named("alsa");
        assert_eq!(file.data(), "media-sound/bar vorbis\n");
    }

    #[test]
    fn sort_marks_dirty_only_on_change() {
        let mut sorted = read_str("a/a x\nb/b y\n");
        sorted.sort_entries();
        assert!(!sorted.modified());

        let mut unsorted = read_str("b/b y\na/a x\n");
        unsorted.sort_entries();
        assert!(unsorted.modified());
        assert_eq!(unsorted.data(), "a/a x\nb/b y\n");
    }

    #[test]
    fn write_replaces_file_and_keeps_backup() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("package.use");
        fs::write(&path, "app-misc/foo alsa\n").unwrap();

        let mut file = PackageFile::read(&path).unwrap();
        file.entries[0].append_flag(PackageFlag::parse("doc"));
        file.write().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "app-misc/foo alsa doc\n"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("package.use~")).unwrap(),
            "app-misc/foo alsa\n"
        );
        assert!(!file.modified());
    }

    #[test]
    fn write_moves_emptied_file_to_backup() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("package.use");
        fs::write(&path, "app-misc/foo alsa\n").unwrap();

        let mut file = PackageFile::read(&path).unwrap();
        file.entries[0].remove_flag_named("alsa");
        file.write().unwrap();

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("package.use~")).unwrap(),
            "app-misc/foo alsa\n"
        );
    }

    #[test]
    fn write_creates_missing_file_and_parents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("portage").join("package.use");

        let mut file = PackageFile::read(&path).unwrap();
        let mut entry = PackageEntry::new("app-misc/foo");
        entry.append_flag(PackageFlag::parse("alsa"));
        file.entries.push(entry);
        file.write().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "app-misc/foo alsa\n");
    }

    #[test]
    fn fresh_entries_render_without_source_line() {
        let mut entry = PackageEntry::new("app-misc/foo");
        entry.append_flag(PackageFlag::parse("-doc"));
        assert_eq!(entry.render(), "app-misc/foo -doc\n");
    }
}
