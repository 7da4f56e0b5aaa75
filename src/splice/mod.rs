//! The connection-splicing engine: rewires two independently
//! authenticated SSH transports into a single pass-through pipe once a
//! back-end container is provisioned.

pub mod dispatch;
pub mod engine;
mod metrics;
pub mod seqmap;
pub mod transport;
pub mod wire;

pub use dispatch::{DispatchTable, Handler};
pub use engine::{Engine, Side};
pub use seqmap::SeqNumMap;
pub use transport::RawTransport;
