//! ferrule-network: Load balancing, fault handling and transport
//!
//! This crate provides the client half of a call:
//! - Node selection (round robin, random, consistent hash)
//! - Retry and tolerant strategies
//! - One-connection-per-call TCP transport

pub mod balancer;
pub mod retry;
pub mod tolerant;
pub mod transport;

pub use balancer::{routing_params, LoadBalancer, RoutingParams};
pub use retry::RetryStrategy;
pub use tolerant::TolerantStrategy;
pub use transport::TcpTransport;
