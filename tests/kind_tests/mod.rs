//! Integration tests for the workspace provisioner
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of a
//! team member asking for a workspace, end to end against the real API.
//!
//! # Test Organization
//!
//! - `workspace_lifecycle`: Stories about first provisioning, re-provisioning
//!   and what a user actually gets in their namespace
//!
//! # Running These Tests
//!
//! ```bash
//! kind create cluster --name workspace-e2e
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod helpers;
mod workspace_lifecycle;
