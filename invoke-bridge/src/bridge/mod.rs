//! Wire format between the HTTP invoke server and `HttpHost`.
//!
//! - **protocol**: message types (InvokePayload, InvokeResponse, EventMessage)
//! - **codec**: length-delimited JSON framing for the event stream

pub mod codec;
pub mod protocol;
