//! Pre-boot provisioning of single-board computer SD cards.
//!
//! The binary finds the card, asks the operator a few questions, mounts the
//! root partition and converges a handful of artifacts inside it:
//!
//! - **Netplan** - a wifi block for one interface, patched into whatever
//!   document the image ships ([`network`], [`document`])
//! - **Accounts** - root password, a login user and its groups in the
//!   colon-separated record files ([`records`], [`executor::users`])
//! - **Units** - the IP-blink payload and a wait-online drop-in, enabled
//!   with symlinks the way `systemctl enable` would ([`executor::systemd`],
//!   [`payload`])
//! - **System** - timezone, locale and the first-login markers
//!   ([`executor::system`])
//!
//! Every mutation is idempotent and backs up the artifact it is about to
//! change. [`provision::apply`] runs all of them against a root directory
//! and returns a report, so everything below it can be exercised on a
//! temporary tree without a device.
//!
//! ```text
//! sd-provisioner (bin)
//!     │
//!     ├── preflight, config, logging
//!     ├── device ──► wizard ──► mount::MountSession
//!     │                               │
//!     └───────────────────────► provision::apply(root)
//!                                     ├── network ── document::{text, structured}
//!                                     ├── executor::{systemd, users, system}
//!                                     └── payload
//! ```

pub mod backup;
pub mod config;
pub mod device;
pub mod document;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mount;
pub mod network;
pub mod payload;
pub mod preflight;
pub mod provision;
pub mod records;
pub mod wizard;

pub use error::{ProvisionError, Result};
pub use provision::{apply, ProvisionReport, ProvisionRequest};
