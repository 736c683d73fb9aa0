//! Reverse-proxy transport.

mod http_proxy;

pub use http_proxy::{
    ProxyBody, ProxyContext, ProxyError, error_response, forward_request, join_target,
    proxy_request,
};
