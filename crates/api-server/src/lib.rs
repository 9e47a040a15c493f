#![warn(clippy::unwrap_used)]

pub mod ingress;
pub mod rest;
pub mod server;
pub mod swagger;
pub mod ws;

pub use rest::AppState;
pub use server::ApiServer;
pub use swagger::ApiDoc;
