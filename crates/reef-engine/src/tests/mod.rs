//! Tests for the reef-engine crate.

mod helpers;

mod edge_cases;
