//! zmirror — a transparent mirroring reverse proxy.
//!
//! One designated upstream site (plus a set of allied external domains
//! reachable under `/extdomains/<host>/`) is served through the mirror's
//! own hostname. The proxy fetches upstream content, rewrites every link,
//! asset URL, cookie and redirect target into mirror space, and returns it
//! — streaming large binaries through a bounded relay and caching what the
//! upstream allows.
//!
//! The high-level flow per request:
//!
//! ```text
//! client → routes → request rewrite → cache lookup ──hit──► emit
//!                        │ miss
//!                        ▼
//!                 upstream fetch (SSRF-gated, keep-alive pool)
//!                        ▼
//!            classify → header/body rewrite → stream relay? → emit
//!                                   │
//!                                   └─► cache store
//! ```
//!
//! See [`pipeline::MirrorState`] for wiring and [`config::MirrorConfig`]
//! for the configuration surface.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod mime;
pub mod pages;
pub mod pipeline;
pub mod rewrite;
pub mod routes;
pub mod streaming;
pub mod upstream;

pub use config::MirrorConfig;
pub use error::MirrorError;
pub use pipeline::MirrorState;
pub use routes::build_router;
