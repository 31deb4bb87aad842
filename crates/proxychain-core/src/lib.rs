pub mod addr;
pub mod checker;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod logger;
pub mod proxy;
pub mod report;
pub mod transport;

pub use config::{ChainDescriptor, ChainLibrary, EngineConfig, ProxyDescriptor, ProxyKind};
pub use engine::{ChainEngine, EngineStats};
pub use error::{ChainError, Error, TimeoutScope};
pub use report::{ConnectionReport, StepKind, StepRecord};
pub use transport::{Transport, Tunnel};
