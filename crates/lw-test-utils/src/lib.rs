// lw-test-utils: Shared test utilities for the log broker suite.
//
// Provides a minimal SSE client for integration testing of the server's
// streaming endpoint without pulling an SSE library into the tree.

pub mod sse_client;

pub use sse_client::{SseClient, SseEvent};
