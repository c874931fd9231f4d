// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables, replica identity, and runtime configuration parsing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Environment-based configuration management for production deployment

use anyhow::{Context, Result};
use std::env;

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default maximum number of backend pool connections
pub const DEFAULT_PG_POOL_CONNS: u32 = 2;

/// Default maximum number of Redis pool connections
pub const DEFAULT_REDIS_POOL_CONNS: u32 = 2;

/// Default directory/discovery namespace
pub const DEFAULT_NAMESPACE: &str = "sqlgateway";

/// Complete gateway configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend DSN (`PG_DSN`, required)
    pub pg_dsn: String,
    /// Maximum backend pool connections (`PG_POOL_CONNS`)
    pub pg_pool_conns: u32,
    /// Redis address; cross-replica mode is enabled when set (`REDIS_ADDR`)
    pub redis_addr: Option<String>,
    /// Redis password (`REDIS_PASSWORD`)
    pub redis_password: Option<String>,
    /// Redis pool sizing hint (`REDIS_POOL_CONNS`)
    pub redis_pool_conns: u32,
    /// Directory and peer-discovery namespace (`V_NAMESPACE`)
    pub namespace: String,
    /// Stable replica identity (`POD_NAME`, falling back to `HOSTNAME`)
    pub pod_name: String,
    /// Base domain appended to the pod name for the advertised URL
    /// (`POD_BASE_DOMAIN`)
    pub pod_base_domain: Option<String>,
    /// Full advertised host override (`POD_URL`); wins over
    /// `POD_NAME + POD_BASE_DOMAIN`
    pub pod_url: Option<String>,
    /// Forward to peers over https (`POD_HTTPS=1`)
    pub pod_https: bool,
    /// HTTP listen port (`HTTP_PORT`)
    pub http_port: u16,
    /// Basic auth username (`AUTH_USER`)
    pub auth_user: Option<String>,
    /// Basic auth password (`AUTH_PASS`)
    pub auth_pass: Option<String>,
    /// Seconds to sleep after a shutdown signal before draining
    /// (`SHUTDOWN_SLEEP_SEC`)
    pub shutdown_sleep_sec: u64,
    /// Emit per-statement action logs at INFO (`TRACES=1`)
    pub traces: bool,
}

impl GatewayConfig {
    /// Load the configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `PG_DSN` is missing, if a numeric variable fails
    /// to parse, or if no replica identity can be determined.
    pub fn from_env() -> Result<Self> {
        let pg_dsn = env::var("PG_DSN").context("PG_DSN is required")?;

        let pod_name = env_opt("POD_NAME")
            .or_else(|| env_opt("HOSTNAME"))
            .context("POD_NAME (or HOSTNAME) is required for replica identity")?;

        Ok(Self {
            pg_dsn,
            pg_pool_conns: env_parse("PG_POOL_CONNS", DEFAULT_PG_POOL_CONNS)?,
            redis_addr: env_opt("REDIS_ADDR"),
            redis_password: env_opt("REDIS_PASSWORD"),
            redis_pool_conns: env_parse("REDIS_POOL_CONNS", DEFAULT_REDIS_POOL_CONNS)?,
            namespace: env_opt("V_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned()),
            pod_name,
            pod_base_domain: env_opt("POD_BASE_DOMAIN"),
            pod_url: env_opt("POD_URL"),
            pod_https: env_flag("POD_HTTPS"),
            http_port: env_parse("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            auth_user: env_opt("AUTH_USER"),
            auth_pass: env_opt("AUTH_PASS"),
            shutdown_sleep_sec: env_parse("SHUTDOWN_SLEEP_SEC", 0)?,
            traces: env_flag("TRACES"),
        })
    }

    /// Whether the shared directory is configured (cross-replica mode)
    #[must_use]
    pub const fn cross_replica(&self) -> bool {
        self.redis_addr.is_some()
    }

    /// The host (no scheme) by which peers reach this replica.
    ///
    /// `POD_URL` wins when set; otherwise the pod name plus base domain, or
    /// the pod name plus listen port for bare single-host deployments.
    #[must_use]
    pub fn advertised_url(&self) -> String {
        if let Some(url) = &self.pod_url {
            return url.clone();
        }
        match &self.pod_base_domain {
            Some(domain) => format!("{}{}", self.pod_name, domain),
            None => format!("{}:{}", self.pod_name, self.http_port),
        }
    }

    /// Scheme used when forwarding to peer replicas
    #[must_use]
    pub const fn forward_scheme(&self) -> &'static str {
        if self.pod_https {
            "https"
        } else {
            "http"
        }
    }

    /// Basic auth credentials, present only when both are configured
    #[must_use]
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (&self.auth_user, &self.auth_pass) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// One-line summary for the startup log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "replica={} url={} port={} pool_conns={} cross_replica={} auth={} traces={}",
            self.pod_name,
            self.advertised_url(),
            self.http_port,
            self.pg_pool_conns,
            self.cross_replica(),
            self.basic_auth().is_some(),
            self.traces,
        )
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    env_opt(name).is_some_and(|v| v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("failed to parse {name}={raw}")),
        None => Ok(default),
    }
}
