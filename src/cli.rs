use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::platforms::Platform;

/// Competitive-programming stats collector.
///
/// Periodically snapshots Codeforces, LeetCode and CodeChef statistics for a
/// roster of students.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Read the roster from a JSON file and keep snapshots in memory instead of PostgreSQL
    #[arg(long, global = true)]
    pub roster: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the periodic collector until interrupted (default)
    Serve,
    /// Run one full collection cycle now and exit
    Cycle,
    /// Collect a single student now
    Fetch {
        /// Student id
        id: i32,
    },
    /// Print stored snapshots for one student and platform
    History {
        /// Student id
        id: i32,
        /// Platform name or tag (cf, lc, cc)
        #[arg(value_parser = parse_platform)]
        platform: Platform,
        /// Window size in days
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Check that a handle exists on a platform
    Validate {
        /// Platform name or tag (cf, lc, cc)
        #[arg(value_parser = parse_platform)]
        platform: Platform,
        handle: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output for development
    Pretty,
    /// One JSON object per line
    Json,
}

fn parse_platform(value: &str) -> Result<Platform, String> {
    value.parse()
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}
