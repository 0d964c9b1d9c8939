//! Purpose: Action-token parsing, namespace clarification, and application.
//! Exports: `ActionKind`, `Action`, `ActionSet`, `FlagReport`, `parse_actions`.
//! Role: Turns the free-form package/action argv stream into file rewrites.
//! Invariants: Within a set, same-operation same-namespace actions merge
//! Invariants: and apply in enable, disable, reset, print order.
use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::atom;
use crate::core::error::{Error, ErrorKind};
use crate::core::fileset::PackageFiles;
use crate::core::library::{Library, Namespace};
use crate::core::packagefile::Modifier;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ActionKind {
    Enable,
    Disable,
    Reset,
    Print,
}

impl ActionKind {
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(ActionKind::Enable),
            '-' => Some(ActionKind::Disable),
            '%' => Some(ActionKind::Reset),
            '?' => Some(ActionKind::Print),
            _ => None,
        }
    }

    fn symbol(self) -> char {
        match self {
            ActionKind::Enable => '+',
            ActionKind::Disable => '-',
            ActionKind::Reset => '%',
            ActionKind::Print => '?',
        }
    }

    fn requires_argument(self) -> bool {
        matches!(self, ActionKind::Enable | ActionKind::Disable)
    }
}

/// One clarified action: operation, resolved namespace, argument set.
/// The empty argument stands for the bare `%`/`?` forms.
#[derive(Clone, Debug)]
pub struct Action {
    kind: ActionKind,
    ns: Namespace,
    args: BTreeSet<String>,
}

/// Result of a `?` action for one package.
#[derive(Clone, Debug, Serialize)]
pub struct FlagReport {
    pub package: String,
    pub ns: Namespace,
    pub flags: Vec<String>,
}

impl FlagReport {
    pub fn render(&self) -> String {
        let mut parts = vec![self.package.clone()];
        parts.extend(self.flags.iter().cloned());
        parts.join(" ")
    }
}

/// Packages followed by the actions that apply to them.
#[derive(Debug, Default)]
pub struct ActionSet {
    pub packages: Vec<String>,
    actions: Vec<Action>,
}

impl ActionSet {
    fn push_merged(&mut self, action: Action) {
        for existing in &mut self.actions {
            if existing.kind == action.kind && existing.ns == action.ns {
                existing.args.extend(action.args);
                return;
            }
        }
        self.actions.push(action);
        self.actions.sort_by_key(|action| action.kind);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn apply(&self, files: &mut PackageFiles) -> Result<Vec<FlagReport>, Error> {
        if self.packages.is_empty() {
            let tokens = self
                .actions
                .iter()
                .flat_map(|action| {
                    action
                        .args
                        .iter()
                        .map(|arg| format!("{}{arg}", action.kind.symbol()))
                })
                .collect::<Vec<_>>()
                .join(" ");
            return Err(Error::new(ErrorKind::Parse)
                .with_message("global actions are not supported")
                .with_token(tokens)
                .with_hint("Name one or more packages before the actions."));
        }

        let mut reports = Vec::new();
        for action in &self.actions {
            let set = files.get_mut(action.ns);
            match action.kind {
                ActionKind::Enable | ActionKind::Disable => {
                    let modifier = if action.kind == ActionKind::Enable {
                        Modifier::Bare
                    } else {
                        Modifier::Minus
                    };
                    for package in &self.packages {
                        for arg in &action.args {
                            set.set_flag_state(package, arg, modifier);
                        }
                    }
                }
                ActionKind::Reset => {
                    for package in &self.packages {
                        if action.args.contains("") {
                            set.reset_package(package);
                        } else {
                            for arg in &action.args {
                                set.reset_flag(package, arg);
                            }
                        }
                    }
                }
                ActionKind::Print => {
                    for package in &self.packages {
                        let flags = if action.args.contains("") {
                            set.flag_summary(package)
                                .iter()
                                .map(ToString::to_string)
                                .collect()
                        } else {
                            action
                                .args
                                .iter()
                                .map(|arg| match set.effective_flag(package, arg) {
                                    Some(flag) => flag.to_string(),
                                    None => format!("?{arg}"),
                                })
                                .collect()
                        };
                        reports.push(FlagReport {
                            package: package.clone(),
                            ns: action.ns,
                            flags,
                        });
                    }
                }
            }
        }
        Ok(reports)
    }
}

/// Parse the argv token stream into action sets.
///
/// A non-action token names a package; a package token arriving after
/// actions closes the current set. Sets without actions are dropped.
pub fn parse_actions(args: &[String], library: &Library) -> Result<Vec<ActionSet>, Error> {
    let mut out = Vec::new();
    let mut current = ActionSet::default();

    for token in args {
        if token.is_empty() {
            continue;
        }
        let symbol = token.chars().next().unwrap_or_default();
        if let Some(kind) = ActionKind::from_symbol(symbol) {
            let action = clarify(kind, &token[symbol.len_utf8()..], &current.packages, library)
                .map_err(|err| {
                    if err.token().is_none() {
                        err.with_token(token.clone())
                    } else {
                        err
                    }
                })?;
            current.push_merged(action);
        } else {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current.packages.push(atom::expand(token, library)?);
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    Ok(out)
}

/// Resolve an action argument's namespace.
///
/// Explicit `lic::`/`env::` prefixes are authoritative (the library holds
/// no metadata to validate them against); everything else is classified
/// per package, warning when the argument is unknown and defaulting to
/// the `use` namespace.
fn clarify(
    kind: ActionKind,
    arg: &str,
    packages: &[String],
    library: &Library,
) -> Result<Action, Error> {
    let (restrict, name) = match arg.split_once("::") {
        Some((prefix, rest)) => {
            let ns = Namespace::from_prefix(prefix).ok_or_else(|| {
                Error::new(ErrorKind::Parse)
                    .with_message(format!("unknown namespace prefix '{prefix}'"))
            })?;
            (Some(ns), rest)
        }
        None => (None, arg),
    };

    if name.is_empty() {
        if kind.requires_argument() {
            return Err(Error::new(ErrorKind::Parse)
                .with_message(format!("'{}' action requires an argument", kind.symbol())));
        }
        return Ok(Action {
            kind,
            ns: restrict.unwrap_or(Namespace::Use),
            args: BTreeSet::from([String::new()]),
        });
    }

    let ns = match restrict {
        Some(ns @ (Namespace::Lic | Namespace::Env)) => ns,
        _ => infer_namespace(name, packages, restrict, library)?,
    };

    Ok(Action {
        kind,
        ns,
        args: BTreeSet::from([name.to_string()]),
    })
}

fn infer_namespace(
    name: &str,
    packages: &[String],
    restrict: Option<Namespace>,
    library: &Library,
) -> Result<Namespace, Error> {
    let ambiguous = |matches: &BTreeSet<Namespace>| {
        let listed = matches
            .iter()
            .map(|ns| ns.prefix())
            .collect::<Vec<_>>()
            .join(", ");
        Error::new(ErrorKind::Ambiguous)
            .with_message(format!("ambiguous argument: {name} (matches {listed})"))
            .with_hint("Qualify the argument with a namespace prefix, e.g. use:: or kw::.")
    };

    if packages.is_empty() {
        let matches = library.glob_whatis(name, restrict);
        if matches.len() > 1 {
            return Err(ambiguous(&matches));
        }
        return Ok(match matches.into_iter().next() {
            Some(ns) => ns,
            None => {
                if let Some(ns) = restrict {
                    tracing::warn!("{name} seems to be an incorrect global {}", ns.describe());
                    ns
                } else {
                    tracing::warn!("{name} seems to be an incorrect global flag");
                    Namespace::Use
                }
            }
        });
    }

    let mut ns = restrict;
    for package in packages {
        let matches = library.whatis(name, package, ns);
        let fallback = if !matches.is_empty() {
            matches.clone()
        } else if let Some(ns) = ns {
            BTreeSet::from([ns])
        } else {
            library.glob_whatis(name, None)
        };

        if fallback.len() > 1 {
            return Err(ambiguous(&fallback));
        }
        if let Some(found) = matches.into_iter().next() {
            ns = Some(found);
        } else if let Some(global) = fallback.into_iter().next() {
            tracing::warn!(
                "{name} seems to be an incorrect {} for {package}",
                global.describe()
            );
            ns = Some(global);
        } else {
            tracing::warn!("{name} seems to be an incorrect flag for {package}");
            ns = Some(Namespace::Use);
        }
    }
    Ok(ns.unwrap_or(Namespace::Use))
}

#[cfg(test)]
mod tests {
    use super::{ActionKind, parse_actions};
    use crate::core::error::ErrorKind;
    use crate::core::fileset::PackageFiles;
    use crate::core::library::{Library, Namespace};
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sample_library(root: &Path) -> Library {
        write(&root.join("profiles/use.desc"), "alsa - ALSA\ndoc - docs\n");
        write(&root.join("profiles/arch.list"), "amd64\n");
        write(
            &root.join("metadata/md5-cache/app-misc/foo-1.0"),
            "IUSE=alsa doc\nKEYWORDS=~amd64\n",
        );
        write(
            &root.join("metadata/md5-cache/media-sound/bar-2.0"),
            "IUSE=vorbis\nKEYWORDS=~amd64\n",
        );
        Library::open(root).unwrap()
    }

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn packages_and_actions_group_into_sets() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(
            &tokens(&["foo", "+alsa", "-doc", "bar", "+vorbis"]),
            &library,
        )
        .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].packages, ["app-misc/foo"]);
        assert_eq!(sets[1].packages, ["media-sound/bar"]);
    }

    #[test]
    fn same_operation_actions_merge_and_order() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(&tokens(&["foo", "?doc", "+alsa", "+doc"]), &library).unwrap();
        assert_eq!(sets.len(), 1);
        let kinds: Vec<_> = sets[0].actions.iter().map(|action| action.kind).collect();
        assert_eq!(kinds, [ActionKind::Enable, ActionKind::Print]);
        assert_eq!(sets[0].actions[0].args.len(), 2);
    }

    #[test]
    fn enable_without_argument_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let err = parse_actions(&tokens(&["foo", "+"]), &library).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn keywords_are_classified_from_package_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(&tokens(&["foo", "+~amd64"]), &library).unwrap();
        assert_eq!(sets[0].actions[0].ns, Namespace::Kw);
    }

    #[test]
    fn explicit_prefix_selects_the_namespace() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(&tokens(&["foo", "+lic::@FREE"]), &library).unwrap();
        assert_eq!(sets[0].actions[0].ns, Namespace::Lic);
        assert_eq!(sets[0].actions[0].args.iter().next().unwrap(), "@FREE");
    }

    #[test]
    fn unknown_arguments_default_to_use() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(&tokens(&["foo", "+nosuchflag"]), &library).unwrap();
        assert_eq!(sets[0].actions[0].ns, Namespace::Use);
    }

    #[test]
    fn arguments_known_in_both_namespaces_are_ambiguous() {
        let temp = tempfile::tempdir().unwrap();
        write(&temp.path().join("profiles/use.desc"), "risky - both\n");
        write(&temp.path().join("profiles/arch.list"), "risky\n");
        write(
            &temp.path().join("metadata/md5-cache/app-misc/foo-1.0"),
            "IUSE=risky\nKEYWORDS=risky\n",
        );
        let library = Library::open(temp.path()).unwrap();
        let err = parse_actions(&tokens(&["app-misc/foo", "+risky"]), &library).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ambiguous);
    }

    #[test]
    fn global_actions_are_rejected_at_apply() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let sets = parse_actions(&tokens(&["+alsa"]), &library).unwrap();
        assert_eq!(sets.len(), 1);

        let config = tempfile::tempdir().unwrap();
        let mut files = PackageFiles::open(config.path(), &[]).unwrap();
        let err = sets[0].apply(&mut files).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn apply_enable_reset_and_print_flow() {
        let temp = tempfile::tempdir().unwrap();
        let library = sample_library(temp.path());
        let config = tempfile::tempdir().unwrap();
        let mut files = PackageFiles::open(config.path(), &[]).unwrap();

        let sets = parse_actions(&tokens(&["foo", "+alsa", "-doc"]), &library).unwrap();
        for set in &sets {
            set.apply(&mut files).unwrap();
        }
        let reports = parse_actions(&tokens(&["foo", "?"]), &library)
            .unwrap()
            .pop()
            .unwrap()
            .apply(&mut files)
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].render(), "app-misc/foo alsa -doc");

        let reports = parse_actions(&tokens(&["foo", "%", "?alsa"]), &library)
            .unwrap()
            .pop()
            .unwrap()
            .apply(&mut files)
            .unwrap();
        assert_eq!(reports[0].render(), "app-misc/foo ?alsa");
    }
}
