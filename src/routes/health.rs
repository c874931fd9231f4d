// ABOUTME: Health check route handler for load balancers and probes
// ABOUTME: Plain 200 "ok", never behind auth
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

/// Liveness probe
pub async fn handle_hc() -> &'static str {
    "ok"
}
