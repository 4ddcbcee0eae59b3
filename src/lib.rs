pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod worker;

pub struct VersionInfo {
    pub version: &'static str,
    pub commit: &'static str,
}

pub const VERSION_INFO: VersionInfo = VersionInfo {
    version: env!("CARGO_PKG_VERSION"),
    commit: env!("GIT_HASH"),
};
