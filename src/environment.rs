//! Software environment snapshot.
//!
//! Every entry records the packages that were installed when it was
//! written (`process/python_environment`). Enumerating them is not the
//! serializer's business, so it asks an injected provider.

use std::collections::BTreeMap;

/// Snapshot of the producing software environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    /// Interpreter/runtime version, written as the `runtime_version` attribute.
    pub runtime_version: Option<String>,
    /// Package name → version.
    pub packages: BTreeMap<String, String>,
}

/// Source of environment snapshots.
pub trait EnvironmentProvider {
    /// Take a snapshot.
    fn snapshot(&self) -> EnvironmentSnapshot;
}

/// Reports this crate and the toolchain it was built for.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuildEnvironment;

impl EnvironmentProvider for BuildEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        let mut packages = BTreeMap::new();
        packages.insert(
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        EnvironmentSnapshot {
            runtime_version: option_env!("CARGO_PKG_RUST_VERSION")
                .filter(|v| !v.is_empty())
                .map(|v| format!("rust {v}")),
            packages,
        }
    }
}

/// Fixed snapshot, for callers that enumerate packages themselves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticEnvironment(pub EnvironmentSnapshot);

impl StaticEnvironment {
    /// Snapshot from package pairs.
    pub fn from_packages<K: Into<String>, V: Into<String>>(
        packages: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self(EnvironmentSnapshot {
            runtime_version: None,
            packages: packages
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Set the runtime version.
    pub fn with_runtime(mut self, version: impl Into<String>) -> Self {
        self.0.runtime_version = Some(version.into());
        self
    }
}

impl EnvironmentProvider for StaticEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.0.clone()
    }
}
