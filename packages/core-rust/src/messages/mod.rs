//! Package envelope and the well-known subjects and status codes.
//!
//! Packages are serialized with named `MsgPack` (`rmp_serde::to_vec_named()`)
//! and camelCase field names, with the package type stored under `"type"`.

pub mod package;

pub use package::{Package, PackageType, Payload, RawPackage};

/// Subjects with fixed meaning across the fabric.
pub mod subjects {
    /// Configuration request sent by a service during startup.
    pub const GET_CONFIG: &str = "get_config";
    /// A Response with this subject stops the receiving service.
    pub const STOP: &str = "stop";
    /// Responses with this subject are swallowed without reaching a handler.
    pub const DUMMY: &str = "dummy";
    /// Reply to a package delivered to the wrong service. The spelling is
    /// part of the wire contract.
    pub const WRONG_RECIPIENT: &str = "wrong_receipent";
    /// Reply to a frame whose type is neither request nor response.
    pub const UNKNOWN_PACKAGE_TYPE: &str = "unknown_package_type";
    /// Router reply to a package addressed to an unregistered name.
    pub const UNKNOWN_RECIPIENT: &str = "unknown_recipient";
    /// Handler reply to a request subject it does not serve.
    pub const UNKNOWN_SUBJECT: &str = "unknown_subject";
}

/// Status codes carried in `Package::status_code`.
pub mod status {
    pub const OK: u16 = 200;
    pub const NOT_FOUND: u16 = 404;
    pub const WRONG_RECIPIENT: u16 = 500;
    pub const UNKNOWN_PACKAGE_TYPE: u16 = 501;
    pub const UNKNOWN_RECIPIENT: u16 = 502;
}
