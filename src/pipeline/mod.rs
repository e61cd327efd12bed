//! Processing pipelines assembled by the sitemap tree.
//!
//! # Data Flow
//! ```text
//! generate node  ─▶ set_generator ─┐
//! transform node ─▶ add_transformer├─▶ ProcessingPipeline ── process(env) ──▶ Response
//! serialize node ─▶ set_serializer ┘        (or a single reader)
//!
//! process():
//!     generator.generate → Vec<Event>
//!         → transformer.transform (in order)
//!         → serializer.serialize → body bytes
//! ```
//!
//! # Design Decisions
//! - Events are materialized between stages; documents are small and
//!   stages stay simple
//! - Component leases live inside the pipeline and return to their
//!   holders when the pipeline is dropped

pub mod event;
#[allow(clippy::module_inception)]
pub mod pipeline;

pub use event::{text_content, Event};
pub use pipeline::ProcessingPipeline;
