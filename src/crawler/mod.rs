//! Crawler module: crawl sessions and their orchestration
//!
//! This module contains:
//! - the request, settings and session types of a crawl session
//! - the session registry, an injected map of sessions keyed by id
//! - the orchestrator that runs each session's frontier loop

mod orchestrator;
mod session;

pub use orchestrator::Orchestrator;
pub use session::{
    CrawlRequest, CrawlResponse, CrawlSession, CrawlSettings, ResponseStatus, SessionRegistry,
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGES,
};
