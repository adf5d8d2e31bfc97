//! The stateful core of the streaming gateway: Session Registry (C3),
//! Source Adapter orchestration (C4), Transcoder Scheduler (C5), and
//! Output Supervisor (C6), wired together behind the `StreamGateway`
//! facade — the direct descendant of the teacher's `TorrentApp`.

pub mod gateway;
pub mod registry;
pub mod scheduler;
pub mod source_adapter;
pub mod supervisor;

pub use gateway::{GatewayConfig, StreamGateway};
pub use registry::{MediaInfoView, SeekControl, SessionRegistry, SessionSnapshot};
pub use scheduler::TranscoderScheduler;
pub use source_adapter::SourceAdapter;
pub use supervisor::{OutputSupervisor, RetentionConfig};
