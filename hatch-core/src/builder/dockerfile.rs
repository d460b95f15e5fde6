//! Renders a build plan as a Dockerfile.

use crate::planner::{BuildStep, WORKDIR};
use std::fmt::Write;

/// Renders `steps` as Dockerfile text.
///
/// `WORKDIR` follows the base image so relative paths in later steps resolve
/// inside the project directory. Run steps use shell form, the entrypoint
/// uses exec form.
pub fn render_dockerfile(steps: &[BuildStep]) -> String {
    let mut out = String::new();

    for step in steps {
        match step {
            BuildStep::SetBase { image } => {
                let _ = writeln!(out, "FROM {}", image);
                let _ = writeln!(out, "WORKDIR {}", WORKDIR);
                out.push('\n');
            }
            BuildStep::SetEntrypoint { command } => {
                let quoted: Vec<String> = command.iter().map(|c| format!("\"{}\"", c)).collect();
                let _ = writeln!(out, "CMD [{}]", quoted.join(", "));
            }
            BuildStep::CopyRest { destination } => {
                let _ = writeln!(out, "COPY . {}", dest_dir(destination));
            }
            other => {
                let _ = writeln!(out, "{}", other);
            }
        }
    }

    out
}

fn dest_dir(destination: &str) -> String {
    if destination == WORKDIR {
        ".".to_string()
    } else {
        destination.to_string()
    }
}
