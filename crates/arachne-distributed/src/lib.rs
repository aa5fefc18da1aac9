//! The distributed execution substrate of ArachneDB.
//!
//! Workers execute fragments of a query plan on behalf of a coordinator:
//! plans are installed into each worker's [`plan::PlanConsumer`], the
//! coordinator drives them with batched [`pull_client::PullRpcClients`]
//! requests, and the worker's [`produce::ProduceServer`] keeps a cursor
//! alive per (transaction, plan). Everything on the wire rides the
//! segment framing of [`framing`].

pub mod cursor;
pub mod framing;
pub mod messages;
pub mod plan;
pub mod produce;
pub mod pull_client;
pub mod rpc;

pub use messages::{FrameValue, PullState, RemotePullReq, RemotePullRes};
pub use plan::{Parameters, PlanConsumer, PlanId, PlanNode, Symbol, SymbolTable};
pub use produce::{OngoingProduce, ProduceServer};
pub use pull_client::{PullRpcClients, RemotePullData};
pub use rpc::{Client, ClientPool, RpcServer};
