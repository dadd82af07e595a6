//! End-to-end tests for sessions.
