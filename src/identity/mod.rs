//! Identity microservice client: endpoint probing, service credentials and
//! typed response schemas.

pub mod client;
pub mod credential;
pub mod resolver;
pub mod schema;
pub mod transport;

pub use client::{IdentityClient, RemoteIdentity, UpstreamError};
pub use resolver::EndpointResolver;
pub use schema::UserIdentity;
