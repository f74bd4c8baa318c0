//! A CFS-style fair-share CPU scheduler core.
//!
//! This crate is the decision engine only: given a batch of events tagged
//! with a virtual time, it updates task and cgroup state and produces a
//! per-CPU scheduling decision. It owns no threads, sockets, or clock —
//! driving it (reading events off some transport, turning `Decision` into
//! whatever a caller's runtime needs) is entirely up to the embedder.
//!
//! The entry point is [`Scheduler`]: construct one with a
//! [`SchedulerConfig`], then call [`Scheduler::tick`] once per
//! [`EventBatch`].
//!
//! ```
//! use cfs_sched::{Event, EventBatch, Scheduler, SchedulerConfig};
//!
//! let config = SchedulerConfig::new(1, 10, false).unwrap();
//! let mut sched = Scheduler::new(config);
//!
//! let decision = sched
//!     .tick(EventBatch {
//!         vtime: 0,
//!         events: vec![Event::TaskCreate {
//!             task_id: "t1".into(),
//!             nice: None,
//!             cgroup_id: None,
//!             cpu_mask: None,
//!         }],
//!     })
//!     .unwrap();
//!
//! assert_eq!(decision.schedule[0].task().map(|id| id.as_str()), Some("t1"));
//! ```

pub mod cgroup;
pub mod config;
pub mod cpumask;
pub mod error;
pub mod event;
mod queue;
pub mod scheduler;
pub mod task;
mod tick;
pub mod weight;

pub use cgroup::{Cgroup, CgroupId};
pub use config::SchedulerConfig;
pub use cpumask::CpuMask;
pub use error::{ConfigError, EventError, FatalError};
pub use event::{CpuAssignment, Decision, DecisionMeta, Event, EventBatch, EventOutcome};
pub use scheduler::{Scheduler, TickStats};
pub use task::{Task, TaskId, TaskState};
pub use weight::{NICE_MAX, NICE_MIN, REFERENCE_WEIGHT};
