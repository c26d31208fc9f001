//! # remote_backup
//!
//! Scheduled backups of remote directories with compression and keep-latest
//! retention.
//!
//! ## Features
//!
//! - **Interval scheduling**: every task runs once at startup, then on its own timer
//! - **Backup types**: whole directories or a list of entries below one
//! - **Compression**: tar + gzip archives, written atomically
//! - **Retention**: keep the newest backups per destination
//! - **Per-task servers**: override host and credentials for a single task
//! - **SOCKS proxy**: optional v4/v5 tunnel for every connection
//!
//! ## Quick Start
//!
//! ```no_run
//! use remote_backup::backup::client_config::ClientConfig;
//! use remote_backup::backup::connect::mounted::MountedConnector;
//! use remote_backup::backup::engine::Engine;
//! use std::sync::Arc;
//!
//! # async fn run() -> remote_backup::backup::result_error::result::Result<()> {
//! let config = ClientConfig::load("./config/config.yaml")?;
//! let connector = Arc::new(MountedConnector::new(&config.mount_root));
//! let mut engine = Engine::new(&config, connector)?;
//! engine.check_connection().await?;
//! engine.start().await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backup;
