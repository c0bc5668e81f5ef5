//! End-to-end tests: producer API, flows, and the worker pool over the
//! in-memory queue store.

mod flow_test;
mod helpers;
mod pool_test;
mod retry_test;
