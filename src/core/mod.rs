//! 核心层：错误分类与恢复提示

pub mod error;
pub mod recovery;

pub use error::AgentError;
pub use recovery::{RecoveryAction, RecoveryEngine};
