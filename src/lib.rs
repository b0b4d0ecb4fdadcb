//! DICOM Upper Layer protocol engine in Rust
//!
//! This library implements the DICOM Upper Layer (PS3.8) over TCP or TLS:
//! association negotiation, the 13-state connection state machine with its
//! ARTIM timer, P-DATA fragmentation and reassembly, and DIMSE request
//! dispatch. It is built to emulate a PACS peer convincingly enough for
//! unsolicited clients to negotiate, query and send data, while logging
//! everything they do.
//!
//! # Features
//!
//! - **Full state table** - every state/event pair of PS3.8 resolves to an
//!   action; unmapped pairs abort
//! - **One task per connection** - a misbehaving peer only ever aborts its
//!   own association
//! - **Bounded channels everywhere** - backpressure instead of unbounded
//!   buffering
//! - **Both roles** - service provider (acceptor) and service user
//!   (requestor)
//! - **C-ECHO, C-FIND, C-GET, C-MOVE and C-STORE** services with pluggable
//!   callbacks
//! - **Optional TLS** through rustls
//!
//! # Quick Start
//!
//! **Provider:**
//! ```no_run
//! use dicompot::config::ProviderConfig;
//! use dicompot::io::ServiceProvider;
//!
//! # async fn example() -> dicompot::Result<()> {
//! let config = ProviderConfig {
//!     listen_address: "0.0.0.0:11112".to_string(),
//!     ..ProviderConfig::default()
//! };
//! let provider = ServiceProvider::bind(config).await?.with_echo();
//! provider.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! **User:**
//! ```no_run
//! use dicompot::config::UserConfig;
//! use dicompot::io::ServiceUser;
//!
//! # async fn example() -> dicompot::Result<()> {
//! let user = ServiceUser::connect(&UserConfig::default()).await?;
//! user.c_echo().await?;
//! user.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **`protocol`** - Wire formats
//!   - `pdu` - A-ASSOCIATE, P-DATA-TF, A-RELEASE and A-ABORT PDUs
//!   - `dimse` - DIMSE command sets (group 0000, implicit VR little endian)
//!   - `dataset` - Minimal data set element reader/writer
//!   - `uid` - Well-known UIDs
//!
//! - **`io`** - Connection engine
//!   - `state` / `state_machine` - Transition table and per-connection actor
//!   - `context` - Presentation context negotiation
//!   - `assembler` - Fragmentation and reassembly
//!   - `dispatcher` - DIMSE exchanges and handler routing
//!   - `services` - Provider-side C-ECHO/C-FIND/C-GET/C-MOVE/C-STORE
//!   - `provider` / `user` - Acceptor and requestor front ends
//!
//! - **`config`** - TOML-loadable provider and user settings
//!
//! - **`error`** - Error handling
//!   - `DulError` - Unified error type for all operations
//!   - `Result<T>` - Type alias for `Result<T, DulError>`
//!
//! # Error Handling
//!
//! Errors that break the protocol state of a connection abort that
//! association; errors local to one DIMSE exchange are reported to the peer
//! as a failure status instead. See [`DulError::is_fatal`].
//!
//! ```no_run
//! use dicompot::config::UserConfig;
//! use dicompot::io::ServiceUser;
//! use dicompot::DulError;
//!
//! # async fn example() {
//! match ServiceUser::connect(&UserConfig::default()).await {
//!     Ok(_) => println!("Associated"),
//!     Err(DulError::AssociationRejected { reason, .. }) => eprintln!("Rejected: {}", reason),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod protocol;

// Re-export commonly used types
pub use error::{DulError, Result};
