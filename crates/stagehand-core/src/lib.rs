//! # stagehand-core
//!
//! Platform-agnostic execution engine for declarative UI test actions.
//!
//! Test assets are JSON lists of actions (`tap`, `typeIn`, `assertExists`,
//! `execute`, ...). The engine normalizes accessibility trees from any
//! backend into one [`tree::ElementTree`], resolves selectors against it with
//! bounded retries, and drives the device through a [`driver::Driver`]
//! whose calls are strictly serialized by a [`queue::CommandQueue`].
//!
//! ## Modules
//!
//! - [`element`] - Raw snapshot types and the normalized [`element::Element`]
//! - [`tree`] - Generation-tagged element trees built from snapshots
//! - [`selector`] - Selector grammar, glob matching and queries
//! - [`driver`] - The backend `Driver` trait and its error type
//! - [`queue`] - Single-flight command queue and the queued driver wrapper
//! - [`run_state`] - Cooperative pause/stop control
//! - [`retry`] - Bounded element discovery with tree refresh
//! - [`variables`] - Variable store and `${name}` interpolation
//! - [`config`] - Engine configuration and module context
//! - [`action`] - The closed action set and its JSON parser
//! - [`asset`] - Named action lists and their resolution
//! - [`context`] - Per-run execution state
//! - [`journal`] - Per-action records for observers
//! - [`interpreter`] - Action execution and composition
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stagehand_core::asset::{AssetKind, AssetReference, MemoryResolver};
//! use stagehand_core::action::Action;
//! use stagehand_core::config::EngineConfig;
//! use stagehand_core::context::ExecutionContext;
//! use stagehand_core::interpreter::ActionInterpreter;
//! use stagehand_core::run_state::RunControl;
//! # use stagehand_core::driver::Driver;
//!
//! # async fn demo(driver: Arc<dyn Driver>, resolver: Arc<MemoryResolver>) {
//! let mut ctx = ExecutionContext::new(driver, EngineConfig::default(), RunControl::new())
//!     .expect("valid config");
//! let interpreter = ActionInterpreter::new(resolver);
//!
//! let run = Action::Execute {
//!     reference: AssetReference::new(AssetKind::Test, "checkout"),
//! };
//! let outcome = interpreter.execute(&run, &mut ctx).await;
//! println!("{}: {}", outcome.passed, outcome.message);
//! # }
//! ```

pub mod action;
pub mod asset;
pub mod config;
pub mod context;
pub mod driver;
pub mod element;
pub mod interpreter;
pub mod journal;
pub mod queue;
pub mod retry;
pub mod run_state;
pub mod selector;
pub mod tree;
pub mod variables;
