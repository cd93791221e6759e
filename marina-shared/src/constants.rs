//! Shared constants
//!
//! Paths inside the build containers and the environment contract of the
//! synthesized build script. The script and the orchestrator must agree on
//! these, so they are defined once.

/// Paths inside the compile and runner containers
pub mod container {
    /// Mount point of the working directory (script, identity, context)
    pub const SRC_VOLUME: &str = "/builder/src";

    /// Anonymous volume receiving the build archive
    pub const DIST_VOLUME: &str = "/builder/dist";

    /// Name of the copied application directory under [`SRC_VOLUME`]
    pub const CONTEXT_DIR: &str = "context";

    /// User every build container runs as
    pub const BUILD_USER: &str = "root";
}

/// Files written into the per-run working directory
pub mod workdir {
    /// Prefix of the per-run directory created under the build root
    pub const PREFIX: &str = "marina-";

    /// Copied application source
    pub const CONTEXT_DIR: &str = "context";

    /// Optional SSH private key
    pub const SSH_IDENTITY: &str = "ssh_identity";

    /// Synthesized build script
    pub const BUILD_SCRIPT: &str = "build.sh";

    /// Manifest file name inside the application directory
    pub const MANIFEST: &str = "meta.yml";
}

/// Environment variables exported to the compile container
pub mod envs {
    pub const BUILD_ROOT: &str = "BUILD_ROOT";
    pub const BUILD_CONTEXT: &str = "BUILD_CONTEXT";
    pub const BUILD_ARCHIVE_PATH: &str = "BUILD_ARCHIVE_PATH";
    pub const BUILD_NAME: &str = "BUILD_NAME";
    pub const BUILD_VERSION: &str = "BUILD_VERSION";
    pub const BUILD_CACHE: &str = "BUILD_CACHE";

    /// Overrides the default build root on the host
    pub const MARINA_BUILD_DIR: &str = "MARINA_BUILD_DIR";
}

/// Build cache defaults
pub mod cache {
    /// Mount path used when the cache spec does not name one
    pub const DEFAULT_MOUNT_PATH: &str = "/tmp/cache";

    /// Suffix appended to the application name for the default volume
    pub const VOLUME_SUFFIX: &str = "__buildcache";
}

/// Images used for short-lived utility containers
pub mod images {
    /// Streams the build archive out of the dist volume
    pub const UTILITY_IMAGE: &str = "busybox:latest";
}

/// Seconds the engine waits for a container to stop before killing it
pub const STOP_TIMEOUT_SECS: i64 = 10;

/// Version tag format used when the manifest omits `tag`
pub const VERSION_FORMAT: &str = "%Y%m%dT%H%M%S";
