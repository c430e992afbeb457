//! Integration tests for the round engine.
//!
//! Drive `Lottery` end to end against an in-memory gateway whose
//! invoices, payments, and failures are controlled from test code.

mod engine_flow;
mod mock_gateway;
