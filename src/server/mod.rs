//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /{cdn}/{package}/{version}/{path}   /{img}/{domain}/{path}    │
//! │   /{proxy}/{domain}/{path}            /health                   │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error mapping)│  │ (router config, middleware) │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    cdn_handler, health_handler, image_handler, proxy_handler, AppState, HealthResponse,
    ACCEPT_CH, DEFAULT_CACHE_MAX_AGE, DEFAULT_DEADLINE, VARY_HINTS,
};
pub use routes::{create_router, RouterConfig, POWERED_BY};
