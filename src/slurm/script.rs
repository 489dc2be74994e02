//! Submission-script rendering (§4.4, §6 "Slurm surface").

use std::fmt::Write as _;

use crate::model::{EdgeStatus, Job, Join};
use crate::resources::KNOWN_KEYS;

/// A resolved dependency term for one predecessor, ready to join with `,`
/// (ALL) or `?` (ANY).
fn dependency_term(status: EdgeStatus, external_id: &str) -> String {
    let verb = match status {
        EdgeStatus::Success => "afterok",
        EdgeStatus::Failure => "afternotok",
        EdgeStatus::Any => "afterany",
    };
    format!("{verb}:{external_id}")
}

/// Build the `--dependency=...` value for a job given its predecessors'
/// already-known external ids, per the join/status mapping in §4.4.
pub fn dependency_directive(join: Join, predecessors: &[(EdgeStatus, String)]) -> Option<String> {
    if predecessors.is_empty() {
        return None;
    }
    let sep = match join {
        Join::All => ",",
        Join::Any => "?",
    };
    let terms: Vec<String> = predecessors
        .iter()
        .map(|(status, id)| dependency_term(*status, id))
        .collect();
    Some(terms.join(sep))
}

/// Render the full submission script for `job`. `body_path` is the path to
/// the serialised callable written by the [`crate::slurm::BodySerializer`];
/// `precondition_paths`/`postcondition_paths` are the serialised predicates
/// in declaration order, per the §4.4 mapping table ("Prepended to the
/// generated script body; failure -> non-zero exit before body" /
/// "Appended to the script; failure -> non-zero exit after body").
/// `runtime_invocation` is the shell command that deserialises and runs a
/// body or predicate, with `{index}` substituted for `$SLURM_ARRAY_TASK_ID`
/// on array jobs.
/// Compress a sorted-or-not set of array indices into a Slurm `--array=`
/// range expression, e.g. `[2, 3, 4, 7]` -> `"2-4,7"`.
fn array_range_spec(indices: &[usize]) -> String {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            i += 1;
            end = sorted[i];
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
        i += 1;
    }
    parts.join(",")
}

/// Render the full submission script for `job`. `body_path` is the path to
/// the serialised callable written by the [`crate::slurm::BodySerializer`];
/// `precondition_paths`/`postcondition_paths` are the serialised predicates
/// in declaration order, per the §4.4 mapping table ("Prepended to the
/// generated script body; failure -> non-zero exit before body" /
/// "Appended to the script; failure -> non-zero exit after body").
/// `runtime_invocation` is the shell command that deserialises and runs a
/// body or predicate, with `{index}` substituted for `$SLURM_ARRAY_TASK_ID`
/// on array jobs. `live_indices` narrows the `--array=` range to the given
/// indices, for a job a pruning pass left only partially live; `None` emits
/// the full `0..array_size` range. `skip_body` emits a no-op body line
/// instead of invoking the runtime — set for a job whose own `skipped` flag
/// is set, or one pruning found entirely satisfied.
pub fn render_script(
    job: &Job,
    body_path: &str,
    precondition_paths: &[String],
    postcondition_paths: &[String],
    runtime_invocation: &str,
    dependency: Option<&str>,
    live_indices: Option<&[usize]>,
    skip_body: bool,
) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "#SBATCH --job-name={}", job.name);

    for (key, value) in job.resources.iter() {
        if let Some((_, flag)) = KNOWN_KEYS.iter().find(|(k, _)| k == key) {
            let _ = writeln!(script, "#SBATCH {flag}={value}");
        } else {
            let _ = writeln!(script, "#SBATCH --{key}={value}");
        }
    }

    if job.is_array() {
        let range = match live_indices {
            Some(indices) => array_range_spec(indices),
            None => format!("0-{}", job.array_size - 1),
        };
        let throttle = match (job.array_throttle, live_indices) {
            (Some(k), Some(indices)) => Some(k.min(indices.len().max(1))),
            (Some(k), None) => Some(k),
            (None, _) => None,
        };
        match throttle {
            Some(k) => {
                let _ = writeln!(script, "#SBATCH --array={range}%{k}");
            }
            None => {
                let _ = writeln!(script, "#SBATCH --array={range}");
            }
        }
    }

    if let Some(dep) = dependency {
        let _ = writeln!(script, "#SBATCH --dependency={dep}");
    }

    let _ = writeln!(script);
    let _ = writeln!(script, "set -euo pipefail");

    let index_expr = if job.is_array() {
        "\"$SLURM_ARRAY_TASK_ID\""
    } else {
        ""
    };
    let invocation = |path: &str| runtime_invocation.replace("{index}", index_expr) + " " + path;

    // Preconditions run first; `set -euo pipefail` turns any non-zero exit
    // into the script's own exit before the body is ever invoked.
    for path in precondition_paths {
        let _ = writeln!(script, "{}", invocation(path));
    }

    if skip_body {
        let _ = writeln!(script, ":");
    } else {
        let _ = writeln!(script, "{}", invocation(body_path));
    }

    // Postconditions still run for a skipped job: only the body itself is
    // bypassed (§9 "skipped=true combined with ANY predecessors").
    for path in postcondition_paths {
        let _ = writeln!(script, "{}", invocation(path));
    }

    script
}
