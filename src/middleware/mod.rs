// ABOUTME: HTTP middleware layers for the gateway
// ABOUTME: Currently basic auth; the health check endpoint bypasses it
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

pub mod auth;
