//! Metadr CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the metadata backup/restore
//! operator: backup locations, backup policies, backup records and restores.

pub mod backup_location;
pub mod backup_policy;
pub mod backup_record;
pub mod metadata_restore;

pub use backup_location::*;
pub use backup_policy::*;
pub use backup_record::*;
pub use metadata_restore::*;

/// API group shared by all metadr CRDs.
pub const API_GROUP: &str = "metadr.io";
