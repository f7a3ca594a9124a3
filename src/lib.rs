//! Clepsydra: the cluster-time service of a distributed database node.
//!
//! Every node carries a [`clock::VectorClock`]: a fixed tuple of logical
//! times — a cluster-wide event clock and a configuration-state clock — that
//! is advanced by max-merge and piggybacked on every inter-node message.
//! The [`gossip`] module knows how each component travels on the wire
//! (signed, plain, or gated behind cluster readiness), [`validator`] signs
//! and verifies cluster times, and [`service`] ties everything to the
//! hosting process.
pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod error;
pub mod gossip;
pub mod service;
pub mod settings;
pub mod validator;
