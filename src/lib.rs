//! # foreman
//!
//! A dependency-aware process supervisor. A declarative YAML procfile
//! names the services, their launch commands, and their health probes;
//! foreman launches them in dependency order and keeps reconciling
//! observed reality against the declared invariant: *a service is
//! running only if all of its dependencies are running and its own
//! probes pass*.
//!
//! ## Architecture
//!
//! - [`config`]: procfile parsing and validation (duplicate keys,
//!   unknown dependencies) plus the supervisor tunables.
//! - [`graph`]: dependency DAG, cycle detection with witness
//!   extraction, deterministic topological order.
//! - [`registry`]: the single source of truth for per-service runtime
//!   state, behind one mutex.
//! - [`launcher`]: bounded work queue and worker pool spawning children
//!   in fresh process groups.
//! - [`reconciler`]: the periodic, non-coalescing health pass.
//! - [`signals`]: shutdown, child reaping and procfile reload.
//! - [`supervisor`]: [`Foreman`], which ties the long-lived tasks
//!   together.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use foreman::{ConsoleSink, Foreman, Parser, Settings};
//!
//! # async fn example() -> foreman::Result<()> {
//! let procfile = PathBuf::from("procfile.yaml");
//! let manifest = Parser::new().load(&procfile)?;
//! let foreman = Foreman::new(procfile, manifest, Settings::default(), Arc::new(ConsoleSink))?;
//! foreman.run().await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod launcher;
pub mod probe;
pub mod reconciler;
pub mod registry;
pub mod signals;
pub mod supervisor;

pub use config::{Checks, Manifest, Parser, ServiceSpec, Settings};
pub use error::{Error, Result};
pub use events::{ConsoleSink, EventSink, LifecycleEvent, MemorySink, Verb};
pub use graph::Graph;
pub use registry::{Registry, ServiceRecord, Status};
pub use supervisor::Foreman;
