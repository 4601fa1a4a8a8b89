pub mod engine;
pub mod error;
pub mod layer;
pub mod message;
pub mod protocol;
pub mod sink;
pub mod transport;

pub use engine::{ConnectionState, DeliveryEngine, EngineLineSink, Outcome};
pub use error::{DeliveryError, UnknownOutcome};
pub use layer::ScribeLayer;
pub use message::MessageBuilder;
pub use protocol::ResultCode;
pub use sink::{DropReport, ErrorSink, FanoutErrorSink, StatsErrorSink, TracingErrorSink};
pub use transport::{Connection, Connector, FramedConnection, TcpConnector};
