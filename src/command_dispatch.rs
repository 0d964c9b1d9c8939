//! Purpose: Hold top-level invocation execution for `flaggie`.
//! Exports: `Invocation`, `dispatch`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate the work.
//! Invariants: Query output goes to stdout; diagnostics stay on stderr.
//! Invariants: Nothing is written in pretend mode.

use super::*;

pub(super) struct Invocation {
    pub config_root: PathBuf,
    pub sort: bool,
    pub migrate: bool,
    pub pretend: bool,
    pub json: bool,
}

pub(super) fn dispatch(
    library: &Library,
    invocation: &Invocation,
    args: &[String],
) -> Result<i32, Error> {
    let sets = parse_actions(args, library)?;
    if sets.is_empty() && !invocation.sort && !invocation.migrate {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no actions given")
            .with_hint("Run flaggie --help for the package/action grammar."));
    }

    let keywords = accept_keywords(&invocation.config_root);
    let mut files = PackageFiles::open(&invocation.config_root, &keywords)?;

    if invocation.migrate {
        files.migrate_keywords()?;
    }

    let mut reports = Vec::new();
    for set in &sets {
        reports.extend(set.apply(&mut files)?);
    }

    if invocation.sort {
        files.sort();
    }

    if invocation.json {
        let payload = serde_json::json!({ "reports": reports });
        println!("{payload}");
    } else {
        for report in &reports {
            println!("{}", report.render());
        }
    }

    if invocation.pretend {
        tracing::debug!("pretend mode, skipping writes");
    } else {
        files.write()?;
    }
    Ok(0)
}
