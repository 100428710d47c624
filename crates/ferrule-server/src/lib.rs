//! ferrule-server: Provider side of a call
//!
//! This crate hosts services for remote callers:
//! - The `Service` trait implemented by providers
//! - A concurrent map of locally hosted services
//! - A TCP server speaking the ferrule wire protocol

pub mod server;
pub mod service;

pub use server::RpcServer;
pub use service::{unknown_method, Arguments, Reply, Service, ServiceMap};
