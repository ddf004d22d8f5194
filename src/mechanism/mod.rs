//! Mechanism drivers
//!
//! Turns a [`FencingMechanism`](crate::crd::FencingMechanism) and a target
//! node into an [`ExecutionUnit`]: the image, command line and environment
//! an executor runs to carry out the fencing operation.
//!
//! Two conventions exist for passing secrets and options:
//!
//! - **cloud-delete** passes everything as environment variables
//!   (`SECRET_FORMAT=env`). The image entrypoint reads each
//!   `SECRETPATH_<name>` file and exports its content as `<name>`.
//! - **out-of-band-agent** and **no-op-echo** pass options as command line
//!   flags (`SECRET_FORMAT=args`). The entrypoint turns each
//!   `SECRETPATH_<name>` file into an extra `--<name>=<contents>` flag.

mod builder;

pub use builder::{build_execution_unit, ExecutionUnit, SECRETS_VOLUME_NAME};
