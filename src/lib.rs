//! # Wasabi Logship
//!
//! Structured logging for wasabi services: events are enriched with contextual metadata, written
//! to local streams and shipped in batches into a search index.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wasabi_logship::config::PipelineConfig;
//! use wasabi_logship::logging::setup_tracing;
//! use wasabi_logship::pipeline::Pipeline;
//! use wasabi_logship::web::warp::run_webserver;
//! use warp::Filter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::from_config(&PipelineConfig::from_env()?)?;
//!     setup_tracing(pipeline.logger())?;
//!
//!     let routes = warp::path!("home" / "index").map(|| "Hello");
//!     run_webserver(routes, &pipeline).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`event`] - The event record, its property values and message templates
//! - [`enrich`] - Enrichers (machine name, environment, trace correlation, exception details,
//!   ambient scope) and the chain applying them
//! - [`sink`] - Debug, console and index sinks and the router fanning events out to them
//! - [`index`] - Batched, retrying delivery into OpenSearch / Elasticsearch
//! - [`logging`] - The [`Logger`](logging::Logger), level filtering and the `tracing` bridge
//! - [`request`] - One completion event per HTTP request
//! - [`pipeline`] - Wiring of all of the above
//! - [`web`] - Warp server and filters exposing the request context to handlers
//!
//! ## Feature Flags
//!
//! - `open_search` (default) - Bulk delivery into OpenSearch
//! - `pretty_logs` - Colorful console output for development
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OPENSEARCH_URL` | Search cluster to ship events to | (remote sink disabled) |
//! | `OPENSEARCH_USER` / `OPENSEARCH_PASS` | Basic auth credentials | - |
//! | `LOG_INDEX_NAME` | Target index | `timeseries` |
//! | `APP_ENVIRONMENT` | Environment label attached to every event | `development` |
//! | `LOG_LEVEL` | Minimum level | `Information` |
//! | `LOG_LEVEL_OVERRIDES` | Per-source minimum levels, e.g. `hyper=Warning` | - |
//! | `REQUEST_LOG_LEVEL` | Level of request completion events | `Debug` |
//! | `REQUEST_LOG_TEMPLATE` | Message template of request completion events | see [`request`] |
//! | `LOG_BATCH_SIZE` | Events per bulk request | `50` |
//! | `LOG_BATCH_INTERVAL_MS` | Maximum time an event is buffered | `2000` |
//! | `LOG_BUFFER_CAPACITY` | Maximum number of buffered events | `100000` |
//! | `LOG_OVERFLOW_POLICY` | `DropOldest` or `RejectNewest` | `DropOldest` |
//! | `LOG_MAX_RETRIES` | Retries per batch | `5` |
//! | `LOG_REQUEST_TIMEOUT_MS` | Timeout per bulk request | `10000` |
//! | `BIND_ADDRESS` | HTTP server bind address | (required by `run_webserver`) |
//! | `RUST_LOG` | Filter for `tracing` events | `info` |

pub mod config;
pub mod enrich;
pub mod event;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod request;
pub mod sink;
pub mod tools;
pub mod web;
