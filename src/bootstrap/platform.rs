//! Remote platform detection and agent-binary resolution.

use std::path::PathBuf;

use crate::errors::BootstrapError;

/// Closed set of remote targets the agent binary is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPlatform {
    /// 64-bit x86 Linux.
    X86_64Linux,
    /// 64-bit ARM Linux.
    Aarch64Linux,
}

impl TargetPlatform {
    /// Target triple prefix, used in diagnostics and binary naming.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64Linux => "x86_64-linux",
            Self::Aarch64Linux => "aarch64-linux",
        }
    }

    /// Map the remote's `uname -pm` output to a target.
    ///
    /// The match is a case-insensitive substring scan so both `uname -p`
    /// and `uname -m` spellings work, including the BSD/Debian `amd64` and
    /// `arm64` aliases.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::UnsupportedArchitecture`] when no known
    /// architecture token appears in `uname_line`.
    pub fn from_uname(uname_line: &str) -> Result<Self, BootstrapError> {
        let lowered = uname_line.to_ascii_lowercase();
        if lowered.contains("x86_64") || lowered.contains("amd64") {
            Ok(Self::X86_64Linux)
        } else if lowered.contains("aarch64") || lowered.contains("arm64") {
            Ok(Self::Aarch64Linux)
        } else {
            Err(BootstrapError::UnsupportedArchitecture(
                uname_line.trim().to_owned(),
            ))
        }
    }
}

impl std::fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplies the local path of the agent executable built for a target.
///
/// The deploy flow asks for the binary only after probing the remote
/// architecture, so a resolver may lazily download or unpack per target.
pub trait BinaryResolver: Send + Sync {
    /// Local filesystem path of the agent binary for `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::MissingBinary`] when no binary for the
    /// target exists.
    fn resolve(&self, platform: TargetPlatform) -> Result<PathBuf, BootstrapError>;
}

/// Resolver over a fixed directory of `<name>-<target>` binaries.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
    binary_name: String,
}

impl DirectoryResolver {
    /// Resolver expecting `root/<binary_name>-<target>` files.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            binary_name: binary_name.into(),
        }
    }
}

impl BinaryResolver for DirectoryResolver {
    fn resolve(&self, platform: TargetPlatform) -> Result<PathBuf, BootstrapError> {
        let candidate = self
            .root
            .join(format!("{}-{}", self.binary_name, platform.as_str()));
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(BootstrapError::MissingBinary {
                platform: platform.as_str().to_owned(),
                message: format!("no agent binary at {}", candidate.display()),
            })
        }
    }
}
