//! Action execution.
//!
//! The [`ActionInterpreter`] runs one [`Action`] against an
//! [`ExecutionContext`] and always produces exactly one [`ActionOutcome`].
//! Errors from the selector engine, the driver, the asset resolver or the
//! config layer never escape; they are folded into the outcome's message as
//! "Should <verb> `<target>`: <cause>".
//!
//! Composition actions (`execute`, `executeAndRepeat`, `executeOver`,
//! `validate`) do not recurse. Each one pushes a [`Frame`] onto an explicit
//! stack and the interpreter loop steps through the topmost frame's actions,
//! so nesting depth is bounded by `max_call_depth` instead of the native
//! stack.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stagehand_core::action::Action;
//! use stagehand_core::asset::MemoryResolver;
//! use stagehand_core::interpreter::ActionInterpreter;
//! # use stagehand_core::context::ExecutionContext;
//!
//! # async fn demo(mut ctx: ExecutionContext) {
//! let interpreter = ActionInterpreter::new(Arc::new(MemoryResolver::new()));
//! let tap = Action::from_value(serde_json::json!({"tap": "button[name=save]"})).unwrap();
//! let outcome = interpreter.execute(&tap, &mut ctx).await;
//! if !outcome.passed {
//!     eprintln!("{}", outcome.message);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::action::{Action, Capture, Count, CountComparison, Pattern, Target};
use crate::asset::{Asset, AssetError, AssetReference, AssetResolver};
use crate::config::{ConfigError, ModuleContext};
use crate::context::ExecutionContext;
use crate::driver::{Driver, DriverError, ScrollOptions};
use crate::element::Element;
use crate::journal::{ActionRecord, Verdict};
use crate::retry::{Resolution, RetryCoordinator};
use crate::run_state::Interrupt;
use crate::selector::{Query, SelectorError};
use crate::tree::{ElementTree, TreeError};
use crate::variables::{display_value, VariableStore};

/// The single result of executing an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub passed: bool,
    pub message: String,
    /// Set when a pause or stop cut the action short. Never counted as pass or fail.
    pub interrupted: bool,
}

impl ActionOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            interrupted: false,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            interrupted: false,
        }
    }

    pub fn interrupted(reason: Interrupt) -> Self {
        let message = match reason {
            Interrupt::Paused => "Interrupted: run paused",
            Interrupt::Stopped => "Interrupted: run stopped",
        };
        Self {
            passed: false,
            message: message.to_string(),
            interrupted: true,
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.interrupted {
            Verdict::Interrupted
        } else if self.passed {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }
}

/// Why an action failed. Only ever seen inside the interpreter.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{0}")]
    Selector(#[from] SelectorError),

    #[error("no elements were found after {attempts} attempts")]
    NotFound { attempts: u32 },

    #[error("{count} elements matched where exactly one was required")]
    Ambiguous { count: usize },

    #[error("{0}")]
    Transport(#[from] DriverError),

    #[error("{0}")]
    Asset(#[from] AssetError),

    #[error("{0}")]
    Stale(#[from] TreeError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Failed(String),

    #[error("interrupted")]
    Interrupted(Interrupt),
}

/// Loop state of a composition frame.
#[derive(Debug)]
enum Iteration {
    Once { entered: bool },
    Counted { next: u64, total: u64, counter: String },
    Items {
        items: Vec<Value>,
        next: usize,
        bind: String,
        counter: Option<String>,
    },
}

impl Iteration {
    /// Starts the next pass, binding loop variables. False when exhausted.
    fn advance(&mut self, variables: &mut VariableStore) -> bool {
        match self {
            Iteration::Once { entered } => !std::mem::replace(entered, true),
            Iteration::Counted { next, total, counter } => {
                if *next >= *total {
                    return false;
                }
                variables.save(counter.clone(), Value::from(*next), false);
                *next += 1;
                true
            }
            Iteration::Items {
                items,
                next,
                bind,
                counter,
            } => {
                let Some(item) = items.get(*next) else {
                    return false;
                };
                variables.save(bind.clone(), item.clone(), false);
                if let Some(counter) = counter {
                    variables.save(counter.clone(), Value::from(*next), false);
                }
                *next += 1;
                true
            }
        }
    }
}

/// The composition action that opened a frame.
#[derive(Debug)]
struct Opener {
    verb: &'static str,
    phrase: &'static str,
    target: String,
    accept: bool,
    depth: usize,
    started: Instant,
}

/// One level of the composition stack.
#[derive(Debug)]
struct Frame {
    asset: Arc<Asset>,
    /// Starts past the end so the first step begins the first iteration.
    pc: usize,
    iteration: Iteration,
    opener: Option<Opener>,
    saved_context: ModuleContext,
}

impl Frame {
    fn next_action(&mut self, variables: &mut VariableStore) -> Option<Action> {
        loop {
            if let Some(action) = self.asset.actions.get(self.pc) {
                self.pc += 1;
                return Some(action.clone());
            }
            if !self.iteration.advance(variables) {
                return None;
            }
            self.pc = 0;
        }
    }
}

enum Step {
    Done(ActionOutcome),
    Enter(Frame),
}

/// Executes actions, resolving nested assets through an [`AssetResolver`].
#[derive(Clone)]
pub struct ActionInterpreter {
    resolver: Arc<dyn AssetResolver>,
}

impl ActionInterpreter {
    pub fn new(resolver: Arc<dyn AssetResolver>) -> Self {
        Self { resolver }
    }

    /// Executes one action to completion.
    pub async fn execute(&self, action: &Action, ctx: &mut ExecutionContext) -> ActionOutcome {
        match self.begin(action, ctx, 0).await {
            Step::Done(outcome) => outcome,
            Step::Enter(frame) => self.run_frames(vec![frame], ctx).await,
        }
    }

    /// Evaluates every action of `asset` in order, stopping at the first failure.
    pub async fn evaluate(&self, asset: Arc<Asset>, ctx: &mut ExecutionContext) -> ActionOutcome {
        let pc = asset.actions.len();
        let frame = Frame {
            asset,
            pc,
            iteration: Iteration::Once { entered: false },
            opener: None,
            saved_context: ctx.module_context().clone(),
        };
        self.run_frames(vec![frame], ctx).await
    }

    async fn run_frames(&self, mut stack: Vec<Frame>, ctx: &mut ExecutionContext) -> ActionOutcome {
        let mut pending: Option<ActionOutcome> = None;
        loop {
            if let Some(outcome) = pending.take() {
                if outcome.passed {
                    // Continue with the parent frame.
                } else if let Some(frame) = stack.pop() {
                    pending = Some(if outcome.interrupted {
                        self.conclude_interrupted(frame, ctx)
                    } else {
                        self.conclude(frame, Err(outcome.message), ctx)
                    });
                    continue;
                }
                if stack.is_empty() {
                    return outcome;
                }
            }

            let Some(top) = stack.last_mut() else {
                return ActionOutcome::pass("");
            };
            if ctx.run_control().is_stopped() {
                pending = Some(ActionOutcome::interrupted(Interrupt::Stopped));
                continue;
            }
            match top.next_action(&mut ctx.variables) {
                None => {
                    if let Some(frame) = stack.pop() {
                        pending = Some(self.conclude(frame, Ok(()), ctx));
                    }
                }
                Some(action) => {
                    pending = Some(match self.begin(&action, ctx, stack.len()).await {
                        Step::Done(outcome) => outcome,
                        Step::Enter(frame) => {
                            stack.push(frame);
                            continue;
                        }
                    });
                }
            }
        }
    }

    /// Runs a leaf action, or opens a frame for a composition.
    async fn begin(&self, action: &Action, ctx: &mut ExecutionContext, depth: usize) -> Step {
        let span = info_span!("execute_action", action = action.verb(), depth);
        async {
            let started = Instant::now();
            let target = ctx.variables.interpolate(&action.target_text());

            if action.is_composition() {
                return match self.open_frame(action, ctx, depth, started).await {
                    Ok(Some(frame)) => Step::Enter(frame),
                    Ok(None) => {
                        let outcome = ActionOutcome::pass(format!("{} `{}`", action.verb(), target));
                        Step::Done(self.finish(ctx, action.verb(), &target, outcome, started, depth))
                    }
                    Err(e) => {
                        let outcome = fold(action.phrase(), &target, Err(e));
                        Step::Done(self.finish(ctx, action.verb(), &target, outcome, started, depth))
                    }
                };
            }

            let result = self.run_leaf(action, ctx).await;
            let outcome = fold(action.phrase(), &target, result);
            Step::Done(self.finish(ctx, action.verb(), &target, outcome, started, depth))
        }
        .instrument(span)
        .await
    }

    /// Resolves the nested asset and builds its frame.
    ///
    /// `Ok(None)` means the composition passes without evaluating anything:
    /// zero repeats, no items, or `run: false`.
    async fn open_frame(
        &self,
        action: &Action,
        ctx: &mut ExecutionContext,
        depth: usize,
        started: Instant,
    ) -> Result<Option<Frame>, ActionError> {
        let (reference, iteration) = match action {
            Action::Execute { reference } | Action::Validate { reference } => {
                (reference, Iteration::Once { entered: false })
            }
            Action::ExecuteAndRepeat {
                reference,
                times,
                counter,
            } => {
                let total: u64 = resolve_number("repeat count", times, &ctx.variables)?;
                if total == 0 {
                    return Ok(None);
                }
                let iteration = Iteration::Counted {
                    next: 0,
                    total,
                    counter: counter.clone(),
                };
                (reference, iteration)
            }
            Action::ExecuteOver {
                reference,
                items,
                bind,
                counter,
            } => {
                let items: Vec<Value> = items
                    .iter()
                    .map(|v| ctx.variables.interpolate_value(v))
                    .collect();
                if items.is_empty() {
                    return Ok(None);
                }
                let iteration = Iteration::Items {
                    items,
                    next: 0,
                    bind: bind.clone(),
                    counter: counter.clone(),
                };
                (reference, iteration)
            }
            Action::ExecuteOverVariable {
                reference,
                variable,
                bind,
                counter,
            } => {
                let items = match ctx.variables.get(variable) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => {
                        return Err(ActionError::Failed(format!(
                            "variable `{variable}` does not hold an array"
                        )))
                    }
                    None => return Err(ActionError::Failed(format!("variable `{variable}` is not set"))),
                };
                if items.is_empty() {
                    return Ok(None);
                }
                let iteration = Iteration::Items {
                    items,
                    next: 0,
                    bind: bind.clone(),
                    counter: counter.clone(),
                };
                (reference, iteration)
            }
            _ => return Err(ActionError::Failed("not a composition action".to_string())),
        };

        let max_depth = ctx.config().max_call_depth;
        if depth >= max_depth {
            return Err(ActionError::Failed(format!(
                "call depth limit of {max_depth} exceeded"
            )));
        }

        let mut reference = interpolate_reference(reference, &ctx.variables);
        let inherited = reference.context().or(ctx.module_context());
        reference.suite = inherited.suite;
        reference.module = inherited.module;
        reference.platform = inherited.platform;
        let resolved = self.resolver.resolve(&reference).await?;
        if !reference.run {
            debug!(asset = %reference, "resolved without running");
            return Ok(None);
        }

        let saved_context = ctx.module_context().clone();
        ctx.set_module_context(resolved.meta.clone().or(&saved_context));
        let pc = resolved.asset.actions.len();
        Ok(Some(Frame {
            asset: resolved.asset,
            pc,
            iteration,
            opener: Some(Opener {
                verb: action.verb(),
                phrase: action.phrase(),
                target: reference.name.clone(),
                accept: reference.accept,
                depth,
                started,
            }),
            saved_context,
        }))
    }

    /// Closes a frame whose actions all ran (`Ok`) or one of them failed (`Err`).
    fn conclude(&self, frame: Frame, nested: Result<(), String>, ctx: &mut ExecutionContext) -> ActionOutcome {
        ctx.set_module_context(frame.saved_context);
        let Some(opener) = frame.opener else {
            return match nested {
                Ok(()) => ActionOutcome::pass(format!("{} `{}` passed", frame.asset.kind, frame.asset.name)),
                Err(message) => ActionOutcome::fail(message),
            };
        };

        let outcome = match (nested, opener.accept) {
            (Ok(()), true) => ActionOutcome::pass(format!("{} `{}`", opener.verb, opener.target)),
            (Err(message), true) => {
                ActionOutcome::fail(format!("Should {} `{}`: {}", opener.phrase, opener.target, message))
            }
            (Ok(()), false) => ActionOutcome::fail(format!(
                "Should {} `{}`: expected the {} to fail but it passed",
                opener.phrase, opener.target, frame.asset.kind
            )),
            (Err(_), false) => ActionOutcome::pass(format!(
                "{} `{}` failed as expected",
                opener.verb, opener.target
            )),
        };
        self.finish(ctx, opener.verb, &opener.target, outcome, opener.started, opener.depth)
    }

    fn conclude_interrupted(&self, frame: Frame, ctx: &mut ExecutionContext) -> ActionOutcome {
        ctx.set_module_context(frame.saved_context);
        let reason = if ctx.run_control().is_stopped() {
            Interrupt::Stopped
        } else {
            Interrupt::Paused
        };
        let outcome = ActionOutcome::interrupted(reason);
        match frame.opener {
            Some(opener) => self.finish(ctx, opener.verb, &opener.target, outcome, opener.started, opener.depth),
            None => outcome,
        }
    }

    fn finish(
        &self,
        ctx: &ExecutionContext,
        verb: &str,
        target: &str,
        outcome: ActionOutcome,
        started: Instant,
        depth: usize,
    ) -> ActionOutcome {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(action = verb, elapsed_ms, passed = outcome.passed, interrupted = outcome.interrupted, "action finished");
        if let Some(journal) = ctx.journal() {
            journal.publish(ActionRecord::new(
                verb,
                target,
                outcome.verdict(),
                outcome.message.clone(),
                elapsed_ms,
                depth,
            ));
        }
        outcome
    }

    async fn run_leaf(&self, action: &Action, ctx: &mut ExecutionContext) -> Result<String, ActionError> {
        match action {
            Action::Tap {
                target,
                options,
                refresh,
            } => {
                let element = self.resolve_single(ctx, target).await?;
                ctx.driver().tap(&element, *options).await?;
                after_interaction(ctx, *refresh).await;
                Ok(format!("tapped {}", element.describe()))
            }
            Action::TypeIn { target, text, refresh } => {
                let element = self.resolve_single(ctx, target).await?;
                let text = ctx.variables.interpolate(text);
                ctx.driver().type_in(&element, &text).await?;
                after_interaction(ctx, *refresh).await;
                Ok(format!("typed into {}", element.describe()))
            }
            Action::SetValue { target, text, refresh } => {
                let element = self.resolve_single(ctx, target).await?;
                let text = ctx.variables.interpolate(text);
                ctx.driver().set_value(&element, &text).await?;
                after_interaction(ctx, *refresh).await;
                Ok(format!("set value of {}", element.describe()))
            }
            Action::Scroll {
                target,
                options,
                refresh,
            } => {
                let element = self.resolve_single(ctx, target).await?;
                ctx.driver().scroll(&element, *options).await?;
                after_interaction(ctx, *refresh).await;
                Ok(format!("scrolled {}", element.describe()))
            }
            Action::ScrollTo { target, refresh } => {
                let element = self.resolve_single(ctx, target).await?;
                let options = ScrollOptions {
                    into_view: true,
                    ..Default::default()
                };
                ctx.driver().scroll(&element, options).await?;
                after_interaction(ctx, *refresh).await;
                Ok(format!("scrolled to {}", element.describe()))
            }
            Action::SendKeys { keys, into, refresh } => {
                let element = match into {
                    Some(target) => Some(self.resolve_single(ctx, target).await?),
                    None => None,
                };
                let keys = ctx.variables.interpolate(keys);
                ctx.driver().send_keys(element.as_ref(), &keys).await?;
                after_interaction(ctx, *refresh).await;
                Ok("keys sent".to_string())
            }

            Action::AssertExists { target, exists: true } => {
                let found = self.resolve_any(ctx, target).await?;
                Ok(format!("found {} element(s)", found.len()))
            }
            Action::AssertExists { target, exists: false } => {
                let query = target.query(&ctx.variables)?;
                let mut found = query.run(&*observed_tree(ctx).await?);
                if !found.is_empty() {
                    // The tree may predate the last change; look once more.
                    found = query.run(&*ctx.refresh_tree().await?);
                }
                match found.len() {
                    0 => Ok("no elements found, as expected".to_string()),
                    n => Err(ActionError::Failed(format!("{n} element(s) were found"))),
                }
            }
            Action::AssertIs {
                target,
                property,
                expected,
            } => {
                let found = self.resolve_any(ctx, target).await?;
                let expected = ctx.variables.interpolate_value(expected);
                for element in &found {
                    let actual = element.property(*property);
                    if !property_equals(actual.as_deref(), &expected) {
                        return Err(ActionError::Failed(format!(
                            "{} has {} {}, expected {}",
                            element.describe(),
                            property,
                            show(actual.as_deref()),
                            show_value(&expected)
                        )));
                    }
                }
                Ok(format!("{} of {} element(s) is {}", property, found.len(), show_value(&expected)))
            }
            Action::AssertMatches {
                target,
                property,
                pattern,
            } => {
                let pattern = resolve_pattern(pattern, &ctx.variables)?;
                let found = self.resolve_any(ctx, target).await?;
                for element in &found {
                    let actual = element.property(*property);
                    if !actual.as_deref().is_some_and(|a| pattern.is_match(a)) {
                        return Err(ActionError::Failed(format!(
                            "{} has {} {}, which does not match /{}/",
                            element.describe(),
                            property,
                            show(actual.as_deref()),
                            pattern
                        )));
                    }
                }
                Ok(format!("{} of {} element(s) matches /{}/", property, found.len(), pattern))
            }
            Action::AssertCount {
                target,
                comparison,
                count,
            } => {
                let count: usize = resolve_number("expected count", count, &ctx.variables)?;
                let found = if comparison.accepts_empty(count) {
                    let query = target.query(&ctx.variables)?;
                    query.run(&*observed_tree(ctx).await?)
                } else {
                    match self.resolve_any(ctx, target).await {
                        Ok(found) => found,
                        Err(ActionError::NotFound { .. }) => Vec::new(),
                        Err(e) => return Err(e),
                    }
                };
                if comparison.holds(found.len(), count) {
                    Ok(format!("{} element(s) found", found.len()))
                } else {
                    Err(ActionError::Failed(format!(
                        "{} element(s) were found, expected {} {}",
                        found.len(),
                        match comparison {
                            CountComparison::Equals => "exactly",
                            CountComparison::GreaterThan => "more than",
                            CountComparison::LessThan => "fewer than",
                        },
                        count
                    )))
                }
            }

            Action::Store {
                text,
                name,
                capture,
                persist,
            } => {
                let text = ctx.variables.interpolate(text);
                let value = match capture {
                    Some(capture) => apply_capture(capture, &text, &ctx.variables)?,
                    None => Value::String(text),
                };
                ctx.variables.save(name.clone(), value, *persist);
                Ok(format!("stored `{name}`"))
            }
            Action::Save {
                target,
                name,
                property,
                capture,
                persist,
                if_exists,
            } => {
                let element = if *if_exists {
                    let query = target.query(&ctx.variables)?;
                    let found = query.run(&*observed_tree(ctx).await?);
                    match found.len() {
                        0 => return Ok(format!("nothing to save as `{name}`")),
                        1 => found.into_iter().next(),
                        count => return Err(ActionError::Ambiguous { count }),
                    }
                } else {
                    Some(self.resolve_single(ctx, target).await?)
                };
                let Some(element) = element else {
                    return Ok(format!("nothing to save as `{name}`"));
                };
                let text = element.property(*property);
                let value = match (capture, text) {
                    (Some(capture), Some(text)) => apply_capture(capture, &text, &ctx.variables)?,
                    (Some(_), None) => {
                        return Err(ActionError::Failed(format!(
                            "{} has no {}",
                            element.describe(),
                            property
                        )))
                    }
                    (None, text) => text.map(Value::String).unwrap_or(Value::Null),
                };
                ctx.variables.save(name.clone(), value, *persist);
                Ok(format!("saved {} of {} as `{}`", property, element.describe(), name))
            }
            Action::SaveAll {
                target,
                name,
                property,
                persist,
            } => {
                let query = target.query(&ctx.variables)?;
                let found = query.run(&*observed_tree(ctx).await?);
                let values: Vec<Value> = found
                    .iter()
                    .map(|e| e.property(*property).map(Value::String).unwrap_or(Value::Null))
                    .collect();
                let n = values.len();
                ctx.variables.save(name.clone(), Value::Array(values), *persist);
                Ok(format!("saved {n} value(s) as `{name}`"))
            }
            Action::SaveObject { object, name, persist } => {
                let value = ctx.variables.interpolate_value(object);
                ctx.variables.save(name.clone(), value, *persist);
                Ok(format!("saved object as `{name}`"))
            }
            Action::DeleteVar { name } => match ctx.variables.delete(name) {
                Some(_) => Ok(format!("deleted `{name}`")),
                None => Ok(format!("`{name}` was not set")),
            },
            Action::GetConfig { key, name, persist } => {
                let value = ctx
                    .config()
                    .get(key)
                    .ok_or_else(|| ActionError::Failed(format!("config key `{key}` is not set")))?;
                ctx.variables.save(name.clone(), value, *persist);
                Ok(format!("saved config `{key}` as `{name}`"))
            }
            Action::SetConfig { key, value } => {
                let value = ctx.variables.interpolate_value(value);
                ctx.set_config(key, value)?;
                Ok(format!("config `{key}` set"))
            }

            Action::Wait { duration_ms } => {
                let duration_ms: u64 = resolve_number("wait duration", duration_ms, &ctx.variables)?;
                self.wait(ctx, duration_ms).await?;
                Ok(format!("waited {duration_ms}ms"))
            }
            Action::WaitFor { target, attempts } => {
                let query = target.query(&ctx.variables)?;
                let attempts = match attempts {
                    Some(attempts) => resolve_number("attempt count", attempts, &ctx.variables)?,
                    None => ctx.config().retries,
                };
                let coordinator = RetryCoordinator::new(attempts)
                    .requiring_visibility(ctx.driver().backend().wait_requires_visibility());
                let prior = query.run(&*observed_tree(ctx).await?);
                let found = into_result(coordinator.resolve(ctx, &query, prior, 0).await)?;
                Ok(format!("found {} element(s)", found.len()))
            }
            Action::OsExec { program, args, name } => {
                let program = ctx.variables.interpolate(program);
                let args: Vec<String> = args.iter().map(|a| ctx.variables.interpolate(a)).collect();
                let output = tokio::process::Command::new(&program)
                    .args(&args)
                    .output()
                    .await
                    .map_err(|e| ActionError::Failed(format!("could not start `{program}`: {e}")))?;
                let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(ActionError::Failed(format!(
                        "exited with {}: {}",
                        output.status,
                        stderr.trim()
                    )));
                }
                if let Some(name) = name {
                    ctx.variables.save(name.clone(), Value::String(stdout), false);
                }
                Ok(format!("`{program}` exited successfully"))
            }
            Action::Debug { message, tree } => {
                if let Some(message) = message {
                    let message = ctx.variables.interpolate(message);
                    info!(%message, "debug");
                }
                if *tree {
                    for element in ctx.tree().iter() {
                        info!(
                            id = %element.id,
                            name = element.name.as_deref().unwrap_or(""),
                            label = element.label.as_deref().unwrap_or(""),
                            value = element.value.as_deref().unwrap_or(""),
                            visible = element.visible,
                            "tree element"
                        );
                    }
                }
                Ok("debug".to_string())
            }
            Action::SaveToFile { path, content } => {
                let path = ctx.variables.interpolate(path);
                let content = ctx.variables.interpolate(content);
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| ActionError::Failed(format!("could not write `{path}`: {e}")))?;
                Ok(format!("wrote `{path}`"))
            }
            Action::Launch { app_id } => {
                let app_id = ctx.variables.interpolate(app_id);
                ctx.driver().start_application(&app_id).await?;
                after_interaction(ctx, true).await;
                Ok(format!("launched `{app_id}`"))
            }
            Action::Terminate { app_id } => {
                let app_id = ctx.variables.interpolate(app_id);
                ctx.driver().stop_application(&app_id).await?;
                Ok(format!("terminated `{app_id}`"))
            }
            Action::Home => {
                ctx.driver().home().await?;
                after_interaction(ctx, true).await;
                Ok("pressed home".to_string())
            }
            Action::Lock => {
                ctx.driver().lock().await?;
                Ok("locked device".to_string())
            }
            Action::Screenshot { path, name } => {
                let png = ctx.driver().take_screenshot().await?;
                if let Some(path) = path {
                    let path = ctx.variables.interpolate(path);
                    tokio::fs::write(&path, &png)
                        .await
                        .map_err(|e| ActionError::Failed(format!("could not write `{path}`: {e}")))?;
                }
                if let Some(name) = name {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
                    ctx.variables.save(name.clone(), Value::String(encoded), false);
                }
                Ok(format!("captured {} bytes", png.len()))
            }

            Action::Execute { .. }
            | Action::ExecuteAndRepeat { .. }
            | Action::ExecuteOver { .. }
            | Action::ExecuteOverVariable { .. }
            | Action::Validate { .. } => Err(ActionError::Failed(
                "composition actions run through frames".to_string(),
            )),
        }
    }

    /// Resolves `target` through the retry loop, requiring exactly one match.
    async fn resolve_single(&self, ctx: &mut ExecutionContext, target: &Target) -> Result<Element, ActionError> {
        let mut found = self.resolve_any(ctx, target).await?;
        if found.len() != 1 {
            return Err(ActionError::Ambiguous { count: found.len() });
        }
        let element = found.remove(0);
        ctx.tree().resolve(&element.handle())?;
        Ok(element)
    }

    /// Resolves `target` through the retry loop, accepting any non-empty result.
    async fn resolve_any(&self, ctx: &mut ExecutionContext, target: &Target) -> Result<Vec<Element>, ActionError> {
        let query: Query = target.query(&ctx.variables)?;
        let prior = query.run(&*observed_tree(ctx).await?);
        let coordinator = RetryCoordinator::from_context(ctx);
        into_result(coordinator.resolve(ctx, &query, prior, 0).await)
    }

    /// Sleeps, refreshing the tree every `keepalive_ms` for long waits. Returns early on stop.
    async fn wait(&self, ctx: &mut ExecutionContext, duration_ms: u64) -> Result<(), ActionError> {
        let run = ctx.run_control().clone();
        let keepalive = ctx.config().keepalive_ms.max(1);
        let mut remaining = duration_ms;
        loop {
            let chunk = if duration_ms > keepalive {
                remaining.min(keepalive)
            } else {
                remaining
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(chunk)) => {}
                _ = run.stopped() => return Err(ActionError::Interrupted(Interrupt::Stopped)),
            }
            remaining -= chunk;
            if remaining == 0 {
                return Ok(());
            }
            debug!(remaining_ms = remaining, "wait keepalive");
            if let Err(e) = ctx.refresh_tree().await {
                warn!(error = %e, "keepalive refresh failed");
            }
        }
    }
}

impl std::fmt::Debug for ActionInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionInterpreter").finish_non_exhaustive()
    }
}

fn fold(phrase: &str, target: &str, result: Result<String, ActionError>) -> ActionOutcome {
    match result {
        Ok(message) => ActionOutcome::pass(message),
        Err(ActionError::Interrupted(reason)) => ActionOutcome::interrupted(reason),
        Err(e) => ActionOutcome::fail(format!("Should {phrase} `{target}`: {e}")),
    }
}

fn into_result(resolution: Resolution) -> Result<Vec<Element>, ActionError> {
    match resolution {
        Resolution::Found(found) => Ok(found),
        Resolution::NotFound { attempts } => Err(ActionError::NotFound { attempts }),
        Resolution::Interrupted(reason) => Err(ActionError::Interrupted(reason)),
        Resolution::Transport(e) => Err(ActionError::Transport(e)),
    }
}

/// The live tree, fetched once if nothing has been observed yet.
async fn observed_tree(ctx: &mut ExecutionContext) -> Result<Arc<ElementTree>, ActionError> {
    if ctx.tree().generation() == 0 {
        return Ok(ctx.refresh_tree().await?);
    }
    Ok(ctx.tree().clone())
}

async fn after_interaction(ctx: &mut ExecutionContext, refresh: bool) {
    if refresh {
        if let Err(e) = ctx.refresh_tree().await {
            warn!(error = %e, "refresh after interaction failed");
        }
    }
}

fn resolve_number<T: TryFrom<u64>>(what: &str, count: &Count, variables: &VariableStore) -> Result<T, ActionError> {
    let n = count
        .resolve(variables)
        .map_err(|text| ActionError::Failed(format!("{what} `{text}` is not a number")))?;
    T::try_from(n).map_err(|_| ActionError::Failed(format!("{what} {n} is out of range")))
}

fn resolve_pattern(pattern: &Pattern, variables: &VariableStore) -> Result<Regex, ActionError> {
    pattern
        .resolve(variables)
        .map_err(|source| ActionError::Failed(format!("/{source}/ is not a valid regular expression")))
}

fn interpolate_reference(reference: &AssetReference, variables: &VariableStore) -> AssetReference {
    let opt = |s: &Option<String>| s.as_deref().map(|s| variables.interpolate(s));
    AssetReference {
        kind: reference.kind,
        name: variables.interpolate(&reference.name),
        suite: opt(&reference.suite),
        module: opt(&reference.module),
        platform: opt(&reference.platform),
        accept: reference.accept,
        run: reference.run,
    }
}

/// Full match followed by every group when `index` is absent.
fn apply_capture(capture: &Capture, text: &str, variables: &VariableStore) -> Result<Value, ActionError> {
    let pattern = resolve_pattern(&capture.pattern, variables)?;
    let index: Option<usize> = match capture.index {
        Some(ref index) => Some(resolve_number("capture group", index, variables)?),
        None => None,
    };
    let caps = pattern
        .captures(text)
        .ok_or_else(|| ActionError::Failed(format!("/{}/ did not match `{}`", pattern, text)))?;
    match index {
        Some(index) => caps
            .get(index)
            .map(|m| Value::String(m.as_str().to_string()))
            .ok_or_else(|| ActionError::Failed(format!("/{}/ has no group {}", pattern, index))),
        None => Ok(Value::Array(
            caps.iter()
                .map(|m| m.map(|m| Value::String(m.as_str().to_string())).unwrap_or(Value::Null))
                .collect(),
        )),
    }
}

fn property_equals(actual: Option<&str>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) | (Some(_), Value::Null) => false,
        (Some(a), Value::String(e)) => a == e,
        (Some(a), other) => a == display_value(other),
    }
}

fn show(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("`{v}`"),
        None => "no value".to_string(),
    }
}

fn show_value(value: &Value) -> String {
    match value {
        Value::Null => "no value".to_string(),
        other => format!("`{}`", display_value(other)),
    }
}
