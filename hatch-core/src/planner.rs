//! Layer planner.
//!
//! Turns a [`VariantSpec`] into the ordered build steps of the image. Steps run
//! from least to most frequently changing so that editing application code only
//! invalidates the final layers, and editing extra pip packages leaves the
//! manifest install layer warm.

use crate::variant::VariantSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Port the service listens on inside the image.
pub const EXPOSED_PORT: u16 = 8000;

/// Working directory of the project inside the image.
pub const WORKDIR: &str = "/app";

/// Reload-enabled start command bound to all interfaces.
pub const ENTRYPOINT: [&str; 7] =
    ["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000", "--reload"];

/// Discriminant of a [`BuildStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    SetBase,
    InstallSystemPackages,
    CopyFile,
    InstallDependencies,
    CopyRest,
    SetExposedPort,
    SetEntrypoint,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where an `InstallDependencies` step takes its packages from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    /// A requirements file already copied into the image
    Manifest(String),
    /// An explicit package list
    Packages(Vec<String>),
}

/// A single planned build step (one cacheable layer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildStep {
    SetBase { image: String },
    InstallSystemPackages { packages: Vec<String> },
    CopyFile { source: String, destination: String },
    InstallDependencies { source: DependencySource },
    CopyRest { destination: String },
    SetExposedPort { port: u16 },
    SetEntrypoint { command: Vec<String> },
}

impl BuildStep {
    pub fn kind(&self) -> StepKind {
        match self {
            BuildStep::SetBase { .. } => StepKind::SetBase,
            BuildStep::InstallSystemPackages { .. } => StepKind::InstallSystemPackages,
            BuildStep::CopyFile { .. } => StepKind::CopyFile,
            BuildStep::InstallDependencies { .. } => StepKind::InstallDependencies,
            BuildStep::CopyRest { .. } => StepKind::CopyRest,
            BuildStep::SetExposedPort { .. } => StepKind::SetExposedPort,
            BuildStep::SetEntrypoint { .. } => StepKind::SetEntrypoint,
        }
    }

    /// Shell command this step runs inside the image, if any.
    pub fn run_command(&self) -> Option<String> {
        match self {
            BuildStep::InstallSystemPackages { packages } => Some(format!(
                "apt-get update && apt-get install -y --no-install-recommends {} \
                 && rm -rf /var/lib/apt/lists/*",
                packages.join(" ")
            )),
            BuildStep::InstallDependencies { source: DependencySource::Manifest(path) } => {
                Some(format!("pip install --no-cache-dir -r {}", path))
            }
            BuildStep::InstallDependencies { source: DependencySource::Packages(packages) } => {
                Some(format!("pip install --no-cache-dir {}", packages.join(" ")))
            }
            _ => None,
        }
    }

    /// Whether this step only changes image metadata.
    pub fn is_metadata_only(&self) -> bool {
        matches!(self, BuildStep::SetExposedPort { .. } | BuildStep::SetEntrypoint { .. })
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildStep::SetBase { image } => write!(f, "FROM {}", image),
            BuildStep::CopyFile { source, destination } => {
                write!(f, "COPY {} {}", source, destination)
            }
            BuildStep::CopyRest { destination } => write!(f, "COPY . {}", destination),
            BuildStep::SetExposedPort { port } => write!(f, "EXPOSE {}", port),
            BuildStep::SetEntrypoint { command } => write!(f, "CMD {:?}", command),
            other => write!(f, "RUN {}", other.run_command().unwrap_or_default()),
        }
    }
}

/// Plans the build steps for a variant.
///
/// Pure and deterministic: system packages come out sorted, and empty package
/// sets produce no step at all rather than a no-op layer.
pub fn plan(spec: &VariantSpec) -> Vec<BuildStep> {
    let mut steps = vec![BuildStep::SetBase { image: spec.base_image_ref.clone() }];

    if !spec.system_packages.is_empty() {
        let packages: Vec<String> = spec.system_packages.iter().cloned().collect();
        steps.push(BuildStep::InstallSystemPackages { packages });
    }

    let manifest_name = Path::new(&spec.python_requirements_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| spec.python_requirements_path.clone());
    let manifest_in_image = format!("{}/{}", WORKDIR, manifest_name);

    steps.push(BuildStep::CopyFile {
        source: spec.python_requirements_path.clone(),
        destination: manifest_in_image.clone(),
    });
    steps.push(BuildStep::InstallDependencies {
        source: DependencySource::Manifest(manifest_in_image),
    });

    if !spec.extra_pip_packages.is_empty() {
        steps.push(BuildStep::InstallDependencies {
            source: DependencySource::Packages(spec.extra_pip_packages.clone()),
        });
    }

    steps.push(BuildStep::CopyRest { destination: WORKDIR.to_string() });
    steps.push(BuildStep::SetExposedPort { port: EXPOSED_PORT });
    steps.push(BuildStep::SetEntrypoint {
        command: ENTRYPOINT.iter().map(|s| s.to_string()).collect(),
    });

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{select_variant, VariantSpec};
    use std::collections::BTreeSet;

    fn spec(name: &str, packages: &[&str]) -> VariantSpec {
        VariantSpec {
            name: name.to_string(),
            base_image_ref: "python:3.11-slim".to_string(),
            system_packages: packages.iter().map(|p| p.to_string()).collect(),
            python_requirements_path: "requirements.txt".to_string(),
            extra_pip_packages: Vec::new(),
        }
    }

    fn kinds(steps: &[BuildStep]) -> Vec<StepKind> {
        steps.iter().map(BuildStep::kind).collect()
    }

    #[test]
    fn test_minimal_step_order() {
        let steps = plan(&spec("minimal", &["gcc"]));

        assert_eq!(
            kinds(&steps),
            vec![
                StepKind::SetBase,
                StepKind::InstallSystemPackages,
                StepKind::CopyFile,
                StepKind::InstallDependencies,
                StepKind::CopyRest,
                StepKind::SetExposedPort,
                StepKind::SetEntrypoint,
            ]
        );
        assert_eq!(steps[1], BuildStep::InstallSystemPackages { packages: vec!["gcc".into()] });
        assert_eq!(
            steps[2],
            BuildStep::CopyFile {
                source: "requirements.txt".into(),
                destination: "/app/requirements.txt".into()
            }
        );
        assert_eq!(steps[5], BuildStep::SetExposedPort { port: 8000 });
    }

    #[test]
    fn test_extended_packages_sorted() {
        let steps = plan(&spec("extended", &["postgresql-client", "gcc", "libpq-dev"]));

        assert_eq!(
            steps[1],
            BuildStep::InstallSystemPackages {
                packages: vec!["gcc".into(), "libpq-dev".into(), "postgresql-client".into()]
            }
        );
    }

    #[test]
    fn test_plan_deterministic() {
        let variant = spec("extended", &["postgresql-client", "libpq-dev", "gcc"]);
        assert_eq!(plan(&variant), plan(&variant));
        assert_eq!(plan(&variant), plan(&variant.clone()));
    }

    #[test]
    fn test_empty_packages_omit_step() {
        let mut variant = spec("bare", &[]);
        variant.system_packages = BTreeSet::new();
        let steps = plan(&variant);

        assert!(!kinds(&steps).contains(&StepKind::InstallSystemPackages));
        assert_eq!(steps.len(), 6);
    }

    #[test]
    fn test_extra_packages_get_their_own_step() {
        let steps = plan(&select_variant(true).unwrap());
        let installs: Vec<_> =
            steps.iter().filter(|s| s.kind() == StepKind::InstallDependencies).collect();

        assert_eq!(installs.len(), 2);
        assert!(matches!(
            installs[0],
            BuildStep::InstallDependencies { source: DependencySource::Manifest(_) }
        ));
        assert_eq!(
            installs[1],
            &BuildStep::InstallDependencies {
                source: DependencySource::Packages(vec!["psycopg2".into()])
            }
        );
    }

    #[test]
    fn test_nested_manifest_path() {
        let mut variant = spec("minimal", &["gcc"]);
        variant.python_requirements_path = "deps/dev.txt".to_string();
        let steps = plan(&variant);

        assert_eq!(
            steps[2],
            BuildStep::CopyFile { source: "deps/dev.txt".into(), destination: "/app/dev.txt".into() }
        );
    }

    #[test]
    fn test_entrypoint_has_reload() {
        let steps = plan(&select_variant(false).unwrap());
        match steps.last().unwrap() {
            BuildStep::SetEntrypoint { command } => {
                assert_eq!(command[0], "uvicorn");
                assert!(command.contains(&"--reload".to_string()));
                assert!(command.contains(&"0.0.0.0".to_string()));
            }
            other => panic!("Expected entrypoint, got {:?}", other),
        }
    }

    #[test]
    fn test_display_matches_dockerfile_syntax() {
        assert_eq!(BuildStep::SetExposedPort { port: 8000 }.to_string(), "EXPOSE 8000");
        assert_eq!(
            BuildStep::InstallDependencies {
                source: DependencySource::Manifest("/app/requirements.txt".into())
            }
            .to_string(),
            "RUN pip install --no-cache-dir -r /app/requirements.txt"
        );
    }
}
