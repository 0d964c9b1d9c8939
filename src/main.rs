//! Purpose: `flaggie` CLI entry point.
//! Role: Binary crate root; parses args, resolves the profile library once,
//! Role: and applies package/action tokens to package.* files.
//! Invariants: Query output is the only thing written to stdout.
//! Invariants: Errors are emitted on stderr as `flaggie: error: ...`.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod repo_paths;

use flaggie::core::actions::parse_actions;
use flaggie::core::error::{Error, ErrorKind, to_exit_code};
use flaggie::core::fileset::{PackageFiles, accept_keywords};
use flaggie::core::launcher::{self, ResolverConfig};
use flaggie::core::library::Library;
use repo_paths::{default_config_root, default_library_candidates};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                return Ok(RunOutcome::with_code(0));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Run flaggie --help for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();

    let color_mode = cli.color;
    let config = ResolverConfig {
        search_paths: match cli.repo {
            Some(repo) => vec![repo],
            None => default_library_candidates(),
        },
        fallback_anchor: None,
    };
    let invocation = command_dispatch::Invocation {
        config_root: cli.config_root.unwrap_or_else(default_config_root),
        sort: cli.sort,
        migrate: cli.migrate,
        pretend: cli.pretend,
        json: cli.json,
    };

    let code = launcher::resolve_and_run(config, &cli.args, |library, args| {
        command_dispatch::dispatch(library, &invocation, args)
    })
    .map_err(add_missing_library_hint)
    .map_err(|err| (err, color_mode))?;

    Ok(RunOutcome::with_code(code))
}

#[derive(Parser)]
#[command(
    name = "flaggie",
    version,
    about = "Manipulate USE flags, keywords, and licenses in package.* files",
    long_about = None,
    before_help = r#"Rewrites package.use, package.accept_keywords, package.license, and
package.env under the configuration root while preserving untouched
lines and comments byte-for-byte."#,
    after_help = r#"ACTIONS
  +flag    explicitly enable flag
  -flag    explicitly disable flag
  %flag    reset flag to the default state (remove it completely)
  %        reset all package flags (drop the package entries)
  ?flag    print the status of a particular flag
  ?        print all recorded package flags

  Arguments may carry a namespace prefix to pick the target file set
  explicitly: use::, kw::, lic:: or env:: (e.g. kw::~amd64).

EXAMPLES
  $ flaggie app-misc/foo +alsa -doc
  $ flaggie foo +~amd64                 # bare names expand to a category
  $ flaggie foo ?                       # show recorded flags
  $ flaggie --pretend foo %alsa
  $ flaggie --migrate --sort"#
)]
struct Cli {
    #[arg(
        long,
        help = "Configuration root holding package.* files (default: $PORTAGE_CONFIGROOT prefix + /etc/portage)",
        value_hint = ValueHint::DirPath
    )]
    config_root: Option<PathBuf>,
    #[arg(
        long,
        help = "Profile library location (overrides $PORTDIR and built-in candidates)",
        value_hint = ValueHint::DirPath
    )]
    repo: Option<PathBuf>,
    #[arg(long, help = "Sort entries and flags of every touched file")]
    sort: bool,
    #[arg(long, help = "Fold package.keywords into package.accept_keywords")]
    migrate: bool,
    #[arg(
        short = 'p',
        long,
        help = "Apply actions and print results without writing any file"
    )]
    pretend: bool,
    #[arg(long, help = "Emit query results as JSON")]
    json: bool,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[arg(
        value_name = "PACKAGE|ACTION",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Packages followed by the actions that apply to them"
    )]
    args: Vec<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}

fn add_missing_library_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::NotFound || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Pass --repo <dir> or set PORTDIR to a repository checkout carrying profiles/.",
    )
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let use_color = color_mode.use_color(io::stderr().is_terminal());
    let (red, dim, reset) = if use_color {
        ("\x1b[31m", "\x1b[2m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    let mut line = String::new();
    match err.message() {
        Some(message) => line.push_str(message),
        None => line.push_str(&err.to_string()),
    }
    if let Some(token) = err.token() {
        line.push_str(&format!(" (at '{token}')"));
    }
    eprintln!("{red}flaggie: error:{reset} {line}");
    if let Some(hint) = err.hint() {
        eprintln!("{dim}hint: {hint}{reset}");
    }
}
