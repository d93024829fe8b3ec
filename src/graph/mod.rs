// src/graph/mod.rs

//! Content-addressed build graph.
//!
//! - [`canonical`] turns canonical descriptions into bytes and content ids.
//! - [`node`] holds the raw, author-facing node arena ([`Pipeline`]) and the
//!   [`Cacheable`] capability implemented by every node kind.
//! - [`build_graph`] dealiases raw nodes into a deduplicated DAG of
//!   [`BuildNode`]s, rejecting cycles.
//! - [`order`] is the post-order walk behind dependency and build order.

pub mod build_graph;
pub mod canonical;
pub mod node;
pub mod order;

pub use build_graph::{BuildGraph, BuildNode, Dependency};
pub use canonical::{canonical_bytes, canonical_id};
pub use node::{Cacheable, ExternalFile, Input, Node, NodeId, Pipeline, Target, Transform};
