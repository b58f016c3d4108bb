// Tests module
// Crawl scenarios: round ordering, failure absorption, persistence retries
// Lifecycle: init failures, run/stop ordering, orchestrator integration

pub mod support;
