//! Remote side of rstage: endpoint transports, job executors and the job scheduler.
//!
//! # Transports
//!
//! [`connector::DefaultConnector`] opens a transport from the endpoint address:
//! - `file:///mnt/share` - a mounted directory, remote paths resolve under the mount root
//! - `ssh://[user@]host[:port]` - [`ssh::SshTransport`], shell commands over an `openssh`
//!   control master; authentication is key based
//!
//! # Executors
//!
//! A job runs either in this process ([`executor::LocalExecutor`]) or on the host named by its
//! `Worker` field ([`executor::WorkerExecutor`]), which starts `rstaged` over ssh, writes a
//! [`protocol::WorkerRequest`] to its stdin and reads a [`protocol::WorkerResponse`] back.
//! Both sides must run the same [`common::version::ProtocolVersion`].
//!
//! # Scheduling
//!
//! [`scheduler::Scheduler`] starts jobs in queue order while keeping at most
//! `MaxConcurrentJobs` of them running.

pub mod connector;
pub mod executor;
pub mod protocol;
pub mod scheduler;
pub mod ssh;

pub use connector::DefaultConnector;
pub use executor::{Executor, LocalExecutor, RoutingExecutor, WorkerExecutor};
pub use scheduler::Scheduler;
