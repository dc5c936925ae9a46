//! Bounded element discovery with tree refresh.
//!
//! [`RetryCoordinator::resolve`] re-runs a query against freshly built trees
//! until it matches or the attempt bound is reached. Each round costs exactly
//! one refresh; there is no backoff. The run state is checked at the top of
//! every round, so a stop or pause ends discovery with a neutral
//! [`Resolution::Interrupted`] instead of a failure.

use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::driver::DriverError;
use crate::element::Element;
use crate::run_state::Interrupt;
use crate::selector::Query;

#[derive(Debug)]
pub enum Resolution {
    Found(Vec<Element>),
    /// Still nothing after `attempts` refreshes.
    NotFound { attempts: u32 },
    Interrupted(Interrupt),
    /// A refresh failed.
    Transport(DriverError),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    max_attempts: u32,
    require_visible: bool,
}

impl RetryCoordinator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            require_visible: false,
        }
    }

    /// Uses the context's configured `retries` bound.
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self::new(ctx.config().retries)
    }

    /// Counts only visible elements as matches.
    pub fn requiring_visibility(mut self, require: bool) -> Self {
        self.require_visible = require;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn keep(&self, mut found: Vec<Element>) -> Vec<Element> {
        if self.require_visible {
            found.retain(|e| e.visible);
        }
        found
    }

    /// Resolves `query`, starting from an already computed `prior` result.
    ///
    /// `depth` is the number of refresh rounds already spent.
    pub async fn resolve(
        &self,
        ctx: &mut ExecutionContext,
        query: &Query,
        prior: Vec<Element>,
        depth: u32,
    ) -> Resolution {
        let mut current = self.keep(prior);
        let mut depth = depth;
        loop {
            match ctx.run_control().interrupt() {
                Some(Interrupt::Stopped) => return Resolution::Interrupted(Interrupt::Stopped),
                Some(Interrupt::Paused) => {
                    ctx.run_control().mark_waiting();
                    return Resolution::Interrupted(Interrupt::Paused);
                }
                None => {}
            }
            if !current.is_empty() {
                return Resolution::Found(current);
            }
            if depth >= self.max_attempts {
                debug!(query = %query, attempts = depth, "giving up");
                return Resolution::NotFound { attempts: depth };
            }

            let tree = match ctx.refresh_tree().await {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(query = %query, error = %e, "tree refresh failed");
                    return Resolution::Transport(e);
                }
            };
            depth += 1;
            current = self.keep(query.run(&tree));
            debug!(query = %query, attempt = depth, matches = current.len(), "retry round");
        }
    }
}
