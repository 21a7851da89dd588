use serde::Serialize;

use crate::authz::Authorizer;
use crate::context::RequestContext;
use crate::dispatch::{self, Command, PageRequest};
use crate::error::RouteError;

/// A page that may run, with the request for its renderer.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub page: &'static str,
    pub wants_repo: bool,
    pub wants_layout: bool,
    pub request: PageRequest,
}

impl Route {
    fn new(command: &'static Command, ctx: &RequestContext) -> Self {
        Self {
            page: command.name,
            wants_repo: command.wants_repo,
            wants_layout: command.wants_layout,
            request: command.run(ctx),
        }
    }
}

/// Decides what runs for a request: dispatch lookup, capability checks and
/// the repository gate, in that order.
pub struct Router<'a> {
    authorizer: &'a Authorizer,
}

impl<'a> Router<'a> {
    pub fn new(authorizer: &'a Authorizer) -> Self {
        Self { authorizer }
    }

    pub async fn route(&self, ctx: &RequestContext) -> Result<Route, RouteError> {
        let command = dispatch::get_command(ctx)?;

        tracing::debug!(
            page = command.name,
            wants_repo = command.wants_repo,
            has_repo = ctx.repo.is_some(),
            "Dispatch lookup"
        );

        match &ctx.repo {
            None if command.wants_repo => {
                return Err(RouteError::RepositoryRequired {
                    page: command.name.to_string(),
                });
            }
            None => {}
            Some(repo) => {
                if !self.authorizer.authorize_repo(ctx, Some(&repo.url)).await? {
                    return Err(RouteError::Forbidden {
                        repo: repo.url.clone(),
                    });
                }
            }
        }

        tracing::info!(page = command.name, "Routed");
        Ok(Route::new(command, ctx))
    }
}
