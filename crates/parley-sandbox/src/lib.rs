//! Disposable execution contexts for Parley agents.
//!
//! Shell commands and code snippets run inside a one-shot container when a
//! container runtime is reachable, or directly as a restricted subprocess
//! when it is not (and policy permits the fallback). Every created context
//! lives for exactly one invocation and is torn down afterwards regardless
//! of outcome; a lightweight registry keeps metadata about created contexts
//! so operational tooling can list and force-clean them out-of-band.
//!
//! The selection between backends lives in [`SandboxService`]; callers only
//! see [`ExecRequest`] in and [`ExecOutcome`] out.

pub mod direct;
pub mod docker;
pub mod error;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod service;

pub use direct::DirectRuntime;
pub use docker::{DockerRuntime, SANDBOX_LABEL};
pub use error::SandboxError;
pub use policy::ExecPolicy;
pub use registry::{CleanupOp, ContextRecord, ContextRegistry};
pub use runtime::{Backend, ExecOutcome, ExecRequest, IsolatedRuntime};
pub use service::{CleanupFilter, CleanupReport, ExplainReport, SandboxService};
