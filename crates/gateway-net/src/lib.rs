//! Upstream connectivity: where a request goes and how it gets there.
//!
//! - `EnvSource`: injected access to proxy environment variables
//! - `ProxyResolver` / `ProxyDescriptor`: explicit vs. environment proxy, `no_proxy` bypass
//! - `TlsContext`: extra trust roots and client identity for corporate TLS interception
//! - `TransportFactory`: async and blocking `reqwest` clients bound to one proxy decision

mod env;
mod proxy;
mod tls;
mod transport;

pub use env::*;
pub use proxy::*;
pub use tls::*;
pub use transport::*;
