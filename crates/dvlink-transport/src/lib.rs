//! Transport implementations for dvlink.
//!
//! - [`TcpTransport`] / [`TcpConnector`]: stream link for the line-oriented
//!   command dialect (TCP port 4992)
//! - [`UdpTransport`]: datagram link for the binary control/audio dialect
//!
//! # Example
//!
//! ```no_run
//! use dvlink_transport::UdpTransport;
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let transport = UdpTransport::bind("0.0.0.0:0").await?;
//! println!("bound to {}", transport.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod tcp;
pub mod udp;

pub use tcp::{TcpConnector, TcpTransport};
pub use udp::UdpTransport;
