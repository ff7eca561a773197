//! Shared constants
//!
//! Names and defaults that the driver, its backends and the protocol layer
//! must agree on.

/// Volume naming
pub mod naming {
    /// Separates a volume name from its datastore label (`vol@datastore`).
    pub const LABEL_DELIMITER: char = '@';
}

/// Keys of the `Opts` map on a create request
pub mod create_options {
    /// Explicit backend type (e.g. "vmdk", "file").
    pub const TYPE: &str = "type";

    /// Datastore label for a bare volume name.
    pub const DATASTORE: &str = "datastore";
}

/// Keys of the volume metadata map returned by backends
pub mod metadata {
    /// Datastore the volume lives on.
    pub const DATASTORE: &str = "datastore";
}

/// Backend type identifiers
pub mod backend_types {
    /// Hypervisor-managed block device (VMDK).
    pub const VMDK: &str = "vmdk";

    /// Network share (NFS and friends).
    pub const NFS: &str = "nfs";
}

/// Protocol constants
pub mod protocol {
    /// Scope reported by the Capabilities call.
    pub const SCOPE_GLOBAL: &str = "global";
}

/// Default paths and limits
pub mod defaults {
    /// Default location of the configuration file
    pub const CONFIG_PATH: &str = "/etc/volplug.conf";

    /// Default location of the log file
    pub const LOG_PATH: &str = "/var/log/volplug.log";

    /// Root directory under which volumes are mounted
    pub const MOUNT_ROOT: &str = "/mnt/vmdk";

    /// Driver name used in logs when the config does not set one
    pub const DRIVER_NAME: &str = "vsphere";

    pub const LOG_LEVEL: &str = "info";

    /// Rolled log files kept (one per day)
    pub const MAX_LOG_AGE_DAYS: usize = 28;
}
