//! Target definitions and the registry that owns them.
//!
//! A [`Target`] is declared once through [`TargetBuilder`], registered in a
//! [`TargetRegistry`], and never mutated afterwards. Registration order is
//! preserved; the resolver uses it as the deterministic tie-break when
//! several orderings would be valid.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::engine::TargetContext;
use crate::error::{CapstanError, Result};

/// Async action invoked when a target executes. The context carries bound
/// parameters and the subprocess manager for the current invocation.
pub type TargetAction =
    Arc<dyn Fn(Arc<TargetContext>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Skip predicate: `false` records the target as Skipped without running it
pub type SkipPredicate = Arc<dyn Fn(&TargetContext) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Target {
    name: String,
    depends_on: Vec<String>,
    before: Vec<String>,
    after: Vec<String>,
    requires: Vec<String>,
    only_when: Option<SkipPredicate>,
    action: Option<TargetAction>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("before", &self.before)
            .field("after", &self.after)
            .field("requires", &self.requires)
            .field("only_when", &self.only_when.is_some())
            .field("action", &self.action.is_some())
            .finish()
    }
}

impl Target {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn before(&self) -> &[String] {
        &self.before
    }

    pub fn after(&self) -> &[String] {
        &self.after
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// Evaluate the skip predicate; absent predicate means run
    pub fn should_run(&self, ctx: &TargetContext) -> bool {
        match &self.only_when {
            Some(predicate) => predicate(ctx),
            None => true,
        }
    }

    pub fn action(&self) -> Option<&TargetAction> {
        self.action.as_ref()
    }
}

/// Fluent, consuming builder producing one immutable [`Target`].
///
/// ```
/// use capstan::target::TargetBuilder;
///
/// let target = TargetBuilder::new("compile")
///     .depends_on("restore")
///     .requires("configuration")
///     .action(|ctx| async move {
///         let _ = ctx.param("configuration");
///         Ok(())
///     })
///     .build();
/// assert_eq!(target.name(), "compile");
/// ```
pub struct TargetBuilder {
    target: Target,
}

impl TargetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            target: Target {
                name: name.to_string(),
                depends_on: Vec::new(),
                before: Vec::new(),
                after: Vec::new(),
                requires: Vec::new(),
                only_when: None,
                action: None,
            },
        }
    }

    /// Hard ordering edge: the named target runs first and is pulled into
    /// the plan
    pub fn depends_on(mut self, name: &str) -> Self {
        self.target.depends_on.push(name.to_string());
        self
    }

    /// Soft hint: if the named target is in the plan anyway, run this one
    /// before it. Never pulls the named target into the plan.
    pub fn before(mut self, name: &str) -> Self {
        self.target.before.push(name.to_string());
        self
    }

    /// Soft hint, mirror of [`Self::before`]
    pub fn after(mut self, name: &str) -> Self {
        self.target.after.push(name.to_string());
        self
    }

    /// The named parameter must resolve to a non-empty value before the
    /// action runs
    pub fn requires(mut self, param: &str) -> Self {
        self.target.requires.push(param.to_string());
        self
    }

    pub fn only_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TargetContext) -> bool + Send + Sync + 'static,
    {
        self.target.only_when = Some(Arc::new(predicate));
        self
    }

    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(Arc<TargetContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.target.action = Some(Arc::new(move |ctx| Box::pin(action(ctx))));
        self
    }

    pub fn build(self) -> Target {
        self.target
    }
}

/// Holds immutable target definitions, keyed case-insensitively by name
#[derive(Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target; fails without modifying the registry when the
    /// name (compared case-insensitively) is already taken
    pub fn register(&mut self, target: Target) -> Result<()> {
        let key = target.name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(CapstanError::duplicate_target(&target.name));
        }
        self.index.insert(key, self.targets.len());
        self.targets.push(target);
        Ok(())
    }

    /// Case-insensitive lookup
    pub fn lookup(&self, name: &str) -> Result<&Target> {
        self.index
            .get(&name.to_lowercase())
            .map(|&idx| &self.targets[idx])
            .ok_or_else(|| CapstanError::unknown_target(name))
    }

    /// Position in registration order, if registered
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// Targets in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
