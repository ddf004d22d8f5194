//! Custom Resource Definitions for the fencing operator
//!
//! This module defines the Kubernetes CRDs for fencing requests and sets.

mod fencing_request;
mod fencing_set;
mod types;

pub use fencing_request::{
    target_label_value, FencingRequest, FencingRequestSpec, FencingRequestStatus,
    MANAGED_BY_LABEL, MANAGER_NAME, MAX_LABEL_VALUE_LEN, TARGET_LABEL,
};
pub use fencing_set::{FencingSet, FencingSetSpec};
pub use types::*;
