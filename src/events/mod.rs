//! Realtime change feed.
//!
//! Frames from the per-board channel are decoded into [`InboundEvent`]s and
//! handed to the [`SocketEventRouter`], which decides per event whether to
//! apply, defer or drop it.
//!
//! # Usage
//!
//! ```ignore
//! use kanban_sync::events::{InboundEvent, SocketEventRouter};
//!
//! let router = SocketEventRouter::new(ctx.clone());
//! let outcome = router.route_frame(r#"{"kind":"deleted", ...}"#);
//! ```

pub mod router;
pub mod types;

pub use router::{RouteOutcome, SocketEventRouter};
pub use types::{DeletedTicket, EventKind, EventPayload, InboundEvent};
