use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub rustc: RustcInfo,
    pub build: BuildInfo,
}

#[derive(Debug)]
pub struct RustcInfo {
    pub version: &'static str,
    pub commit_date: &'static str,
    pub commit_hash: &'static str,
}

#[derive(Debug)]
pub struct BuildInfo {
    pub target: &'static str,
    pub debug: bool,
    pub opt_level: &'static str,
    pub timestamp: &'static str,
}

impl Display for VersionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}, opt-level {}{}, built {} with rustc {} {})",
            self.name,
            self.version,
            self.build.target,
            self.build.opt_level,
            if self.build.debug { ", debug" } else { "" },
            self.build.timestamp,
            self.rustc.version,
            &self.rustc.commit_hash[..self.rustc.commit_hash.len().min(9)],
        )
    }
}

pub const VERSION_INFO: VersionInfo = VersionInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    rustc: RustcInfo {
        version: env!("VERGEN_RUSTC_SEMVER"),
        commit_date: env!("VERGEN_RUSTC_COMMIT_DATE"),
        commit_hash: env!("VERGEN_RUSTC_COMMIT_HASH"),
    },
    build: BuildInfo {
        target: env!("VERGEN_CARGO_TARGET_TRIPLE"),
        debug: const_str::parse!(env!("VERGEN_CARGO_DEBUG"), bool),
        opt_level: env!("VERGEN_CARGO_OPT_LEVEL"),
        timestamp: env!("VERGEN_BUILD_TIMESTAMP"),
    },
};
