// src/action/closure.rs

use std::future::Future;
use std::sync::Arc;

use super::{Action, ActionContext, ActionFuture};

/// Action backed by an async closure.
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self, ctx: ActionContext) -> ActionFuture<'_> {
        Box::pin((self.f)(ctx))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Convenience constructor returning a shareable trait object.
pub fn action_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnAction::new(name, f))
}
