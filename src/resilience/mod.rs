// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience: session-establishment retry and the lookup retry state machine.

pub mod retry;

pub use retry::{LookupRetryPolicy, QueryEvent, QueryState, RetryConfig};
