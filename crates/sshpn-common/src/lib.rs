//! Common infrastructure for the sshpn tunnel orchestrator.
//!
//! This crate holds the pieces that do not depend on any particular tunnel
//! mode:
//!
//! - [`shell`]: local shell execution with proper quoting
//! - [`operation`]: the [`Operation`] descriptor, an ordered list of shell
//!   steps aimed at either the remote or the local host
//! - [`error`]: the [`TunnelError`] taxonomy shared by every layer
//!
//! # Example
//!
//! ```
//! use sshpn_common::{JoinPolicy, Operation};
//!
//! let op = Operation::local(JoinPolicy::Chained)
//!     .step("ip link set tun0 up")
//!     .step("ip route add 10.0.0.0/8 dev tun0");
//! assert_eq!(
//!     op.render(),
//!     "ip link set tun0 up && ip route add 10.0.0.0/8 dev tun0"
//! );
//! ```

pub mod error;
pub mod operation;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{TunnelError, TunnelResult};
pub use operation::{JoinPolicy, OpTarget, Operation};
