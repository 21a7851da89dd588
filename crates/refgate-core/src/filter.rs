//! The authorization filter protocol.
//!
//! A check opens a session against the configured [`PolicyEvaluator`] with a
//! fixed-length argument vector, then closes it to obtain the decision. With
//! no evaluator configured, opening is a no-op and closing authorizes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::RequestContext;
use crate::error::AuthzError;
use crate::oid::ObjectId;

/// Number of positional arguments handed to the policy program.
pub const FILTER_ARG_COUNT: usize = 14;

/// The question being asked of the policy program (first argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFunction {
    AuthorizeRepo,
    AuthorizeRef,
    AuthorizeCommit,
}

impl AuthFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFunction::AuthorizeRepo => "authorize-repo",
            AuthFunction::AuthorizeRef => "authorize-ref",
            AuthFunction::AuthorizeCommit => "authorize-commit",
        }
    }
}

impl fmt::Display for AuthFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The positional argument vector, in slot order:
///
/// | slot | value |
/// |------|-------|
/// | 0 | function name |
/// | 1 | `HTTP_COOKIE` |
/// | 2 | `REQUEST_METHOD` |
/// | 3 | `QUERY_STRING` |
/// | 4 | `HTTP_REFERER` |
/// | 5 | `PATH_INFO` |
/// | 6 | `HTTP_HOST` |
/// | 7 | `HTTPS` |
/// | 8 | `REMOTE_USER` |
/// | 9 | repository id |
/// | 10 | reference name or object id |
/// | 11 | head |
/// | 12 | page |
/// | 13 | url |
///
/// Absent values are empty strings; a slot is never dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterArgs([String; FILTER_ARG_COUNT]);

impl FilterArgs {
    pub const REPO_SLOT: usize = 9;
    pub const REF_SLOT: usize = 10;

    pub fn new(
        function: AuthFunction,
        repo: Option<&str>,
        ref_or_object: Option<&str>,
        ctx: &RequestContext,
    ) -> Self {
        fn slot(value: Option<&str>) -> String {
            value.unwrap_or_default().to_string()
        }

        let env = &ctx.env;
        let query = &ctx.query;
        Self([
            function.as_str().to_string(),
            slot(env.http_cookie.as_deref()),
            slot(env.request_method.as_deref()),
            slot(env.query_string.as_deref()),
            slot(env.http_referer.as_deref()),
            slot(env.path_info.as_deref()),
            slot(env.http_host.as_deref()),
            slot(env.https.as_deref()),
            slot(env.http_remote_user.as_deref()),
            slot(repo),
            slot(ref_or_object),
            slot(query.head.as_deref()),
            slot(query.page.as_deref()),
            slot(query.url.as_deref()),
        ])
    }

    pub fn function(&self) -> &str {
        &self.0[0]
    }

    pub fn repo(&self) -> &str {
        &self.0[Self::REPO_SLOT]
    }

    pub fn ref_or_object(&self) -> &str {
        &self.0[Self::REF_SLOT]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Something that can decide an authorization question.
///
/// `open` starts the evaluation; the returned handle must be closed exactly
/// once to read the decision. Closing consumes the handle.
pub trait PolicyEvaluator: Send + Sync {
    /// Display name for logging.
    fn name(&self) -> &str;

    fn open(&self, args: &FilterArgs) -> Result<Box<dyn OpenEvaluation>, AuthzError>;
}

/// A running evaluation.
pub trait OpenEvaluation: Send {
    /// Wait for the evaluation to finish and return whether it authorized.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send>>;
}

/// The configured authorization filter, or none.
#[derive(Clone, Default)]
pub struct AuthFilter {
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
}

impl fmt::Debug for AuthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFilter")
            .field("evaluator", &self.evaluator.as_ref().map(|e| e.name()))
            .finish()
    }
}

impl AuthFilter {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self {
            evaluator: Some(evaluator),
        }
    }

    /// A filter that authorizes everything without starting anything.
    pub fn unconfigured() -> Self {
        Self { evaluator: None }
    }

    pub fn is_configured(&self) -> bool {
        self.evaluator.is_some()
    }

    pub fn open(
        &self,
        function: AuthFunction,
        repo: Option<&str>,
        ref_or_object: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<FilterSession, AuthzError> {
        let Some(evaluator) = &self.evaluator else {
            return Ok(FilterSession::Skipped);
        };

        let args = FilterArgs::new(function, repo, ref_or_object, ctx);
        tracing::debug!(
            evaluator = evaluator.name(),
            function = %function,
            repo = args.repo(),
            target = args.ref_or_object(),
            "Opening authorization filter"
        );
        Ok(FilterSession::Open(evaluator.open(&args)?))
    }

    /// Repository-scoped: the ref slot carries the requested head.
    pub fn open_repo(
        &self,
        function: AuthFunction,
        repo: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<FilterSession, AuthzError> {
        self.open(function, repo, ctx.query.head.as_deref(), ctx)
    }

    /// Reference-scoped: the repository slot carries the current repository.
    pub fn open_ref(
        &self,
        function: AuthFunction,
        refname: &str,
        ctx: &RequestContext,
    ) -> Result<FilterSession, AuthzError> {
        self.open(function, current_repo(ctx), Some(refname), ctx)
    }

    /// Commit-scoped: the ref slot carries the commit's hex object id.
    pub fn open_commit(
        &self,
        function: AuthFunction,
        commit: &ObjectId,
        ctx: &RequestContext,
    ) -> Result<FilterSession, AuthzError> {
        let hex = commit.to_hex();
        self.open(function, current_repo(ctx), Some(&hex), ctx)
    }
}

/// The resolved repository's id, falling back to the requested one.
fn current_repo(ctx: &RequestContext) -> Option<&str> {
    ctx.repo
        .as_ref()
        .map(|repo| repo.url.as_str())
        .or(ctx.query.repo.as_deref())
}

/// An opened filter, waiting to be closed.
#[must_use = "a filter session must be closed to obtain its decision"]
pub enum FilterSession {
    /// No filter configured.
    Skipped,
    Open(Box<dyn OpenEvaluation>),
}

impl FilterSession {
    pub async fn close(self) -> Result<bool, AuthzError> {
        match self {
            FilterSession::Skipped => Ok(true),
            FilterSession::Open(evaluation) => evaluation.close().await,
        }
    }
}

type DecideFn = dyn Fn(&FilterArgs) -> bool + Send + Sync;

/// In-process evaluator with a fixed decision rule. Records every invocation.
pub struct StubEvaluator {
    decide: Box<DecideFn>,
    calls: Arc<Mutex<Vec<FilterArgs>>>,
    closes: Arc<AtomicUsize>,
}

impl StubEvaluator {
    pub fn new(decide: impl Fn(&FilterArgs) -> bool + Send + Sync + 'static) -> Self {
        Self {
            decide: Box::new(decide),
            calls: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A stub that always returns `decision`.
    pub fn constant(decision: bool) -> Self {
        Self::new(move |_| decision)
    }

    /// Arguments of every `open`, in order.
    pub fn calls(&self) -> Vec<FilterArgs> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl PolicyEvaluator for StubEvaluator {
    fn name(&self) -> &str {
        "stub"
    }

    fn open(&self, args: &FilterArgs) -> Result<Box<dyn OpenEvaluation>, AuthzError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(args.clone());
        Ok(Box::new(StubEvaluation {
            decision: (self.decide)(args),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct StubEvaluation {
    decision: bool,
    closes: Arc<AtomicUsize>,
}

impl OpenEvaluation for StubEvaluation {
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision)
        })
    }
}

/// Where a [`FailingEvaluator`] breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    /// The program cannot be started.
    Open,
    /// The program starts but dies without an exit code.
    Close,
}

/// In-process evaluator that never reaches a decision.
#[derive(Debug)]
pub struct FailingEvaluator {
    fail_at: FailAt,
    opens: AtomicUsize,
}

impl FailingEvaluator {
    pub fn new(fail_at: FailAt) -> Self {
        Self {
            fail_at,
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of `open` attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PolicyEvaluator for FailingEvaluator {
    fn name(&self) -> &str {
        "failing"
    }

    fn open(&self, _args: &FilterArgs) -> Result<Box<dyn OpenEvaluation>, AuthzError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.fail_at {
            FailAt::Open => Err(AuthzError::Spawn {
                program: "failing".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
            FailAt::Close => Ok(Box::new(FailingEvaluation)),
        }
    }
}

struct FailingEvaluation;

impl OpenEvaluation for FailingEvaluation {
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send>> {
        Box::pin(async { Err(AuthzError::AbnormalExit("killed by signal 9".into())) })
    }
}
