pub mod batch;
pub mod codec;
pub mod config;
pub mod editor;
pub mod error;
pub mod ffmpeg;
pub mod logging;
pub mod settings;
pub mod supervisor;
pub mod toolchain;

pub use batch::{BatchCoordinator, BatchReport};
pub use config::SupervisorConfig;
pub use editor::EditorSession;
pub use error::AppError;
pub use settings::CompressionSettings;
pub use supervisor::{SupervisorEvent, SupervisorHandle, TaskSupervisor, WorkStream};
pub use toolchain::Toolchain;
