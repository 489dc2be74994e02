//! Interpretation of the otherwise-opaque [`crate::model::Resources`] map.
//!
//! The core itself treats `resources` as uninterpreted (§3: "Uninterpreted
//! by the core"), but two concrete consumers need to read well-known keys
//! out of it: the local worker executor (advisory `timelimit`, §5/§11) and
//! the Slurm translator (`cpus`, `mem`, `timelimit`, `partition`, §4.4). This
//! module is shared so both agree on the same parsing, the way the
//! reference job-runner pack parses a single `mem` string once and reuses it
//! across its local and cluster execution paths.

use std::time::Duration;

use crate::model::Resources;

/// Parse a Slurm-style time limit: `SS`, `MM:SS`, `HH:MM:SS`, or
/// `D-HH:MM:SS`. Returns `None` if the key is absent or malformed (callers
/// treat a malformed value as "no advisory timeout" locally; the Slurm
/// translator instead passes the raw string straight through to
/// `--time`, since Slurm itself validates it).
pub fn timelimit(resources: &Resources) -> Option<Duration> {
    let raw = resources.get("timelimit")?;
    parse_slurm_duration(raw)
}

fn parse_slurm_duration(raw: &str) -> Option<Duration> {
    let (days, rest) = match raw.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, raw),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => (0, 0, s.parse::<u64>().ok()?),
        [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        [h, m, s] => (
            h.parse::<u64>().ok()?,
            m.parse::<u64>().ok()?,
            s.parse::<u64>().ok()?,
        ),
        _ => return None,
    };
    let total_seconds = ((days * 24 + hours) * 60 + minutes) * 60 + seconds;
    Some(Duration::from_secs(total_seconds))
}

/// Keys the Slurm translator maps to specific `#SBATCH` flags; everything
/// else in `resources` is passed through as `--<key>=<value>` verbatim.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    ("cpus", "--cpus-per-task"),
    ("mem", "--mem"),
    ("timelimit", "--time"),
    ("partition", "--partition"),
];
