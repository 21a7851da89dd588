use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::AuthzError;
use crate::filter::{AuthFilter, AuthFunction};
use crate::oid::ObjectId;
use crate::refs::{RefList, RefStore};

/// How commit visibility is decided. Exactly one applies per [`Authorizer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// Ask the policy program with `authorize-commit` and the commit's hex id.
    #[default]
    DirectFilter,
    /// Authorize a commit reachable from any enumerable branch tip. Remote
    /// branches count only when the repository enables them. Ref-level
    /// filtering is whatever the [`RefStore`] chooses to enumerate.
    Reachability,
}

/// The repository, reference and commit gates.
///
/// Each gate opens one filter session and closes it before returning. Nothing
/// is cached between calls.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    filter: AuthFilter,
    commit_policy: CommitPolicy,
}

impl Authorizer {
    pub fn new(filter: AuthFilter) -> Self {
        Self {
            filter,
            commit_policy: CommitPolicy::default(),
        }
    }

    pub fn with_commit_policy(mut self, commit_policy: CommitPolicy) -> Self {
        self.commit_policy = commit_policy;
        self
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        self.commit_policy
    }

    pub fn filter(&self) -> &AuthFilter {
        &self.filter
    }

    /// May the requester see `repo`?
    pub async fn authorize_repo(
        &self,
        ctx: &RequestContext,
        repo: Option<&str>,
    ) -> Result<bool, AuthzError> {
        let session = self
            .filter
            .open_repo(AuthFunction::AuthorizeRepo, repo, ctx)?;
        let authorized = session.close().await?;

        tracing::info!(
            function = %AuthFunction::AuthorizeRepo,
            repo = repo.unwrap_or_default(),
            authorized,
            "Repository gate"
        );
        Ok(authorized)
    }

    /// May the requester see the reference `name` in the current repository?
    ///
    /// The name is canonicalized first. A name that resolves to nothing is
    /// denied without consulting the policy program. Without a configured
    /// filter every name is authorized and nothing is resolved.
    pub async fn authorize_ref(
        &self,
        ctx: &RequestContext,
        store: &dyn RefStore,
        name: &str,
    ) -> Result<bool, AuthzError> {
        if !self.filter.is_configured() {
            return Ok(true);
        }

        let Some(refname) = store.canonicalize(name).await? else {
            tracing::warn!(refname = name, "Reference does not resolve, denying");
            return Ok(false);
        };

        let session = self
            .filter
            .open_ref(AuthFunction::AuthorizeRef, &refname, ctx)?;
        let authorized = session.close().await?;

        tracing::info!(
            function = %AuthFunction::AuthorizeRef,
            requested = name,
            refname = %refname,
            authorized,
            "Reference gate"
        );
        Ok(authorized)
    }

    /// May the requester see `commit`?
    ///
    /// Without a configured filter every commit is authorized, whatever the
    /// commit policy.
    pub async fn authorize_commit(
        &self,
        ctx: &RequestContext,
        store: &dyn RefStore,
        commit: &ObjectId,
    ) -> Result<bool, AuthzError> {
        if !self.filter.is_configured() {
            return Ok(true);
        }

        let authorized = match self.commit_policy {
            CommitPolicy::DirectFilter => {
                let session = self
                    .filter
                    .open_commit(AuthFunction::AuthorizeCommit, commit, ctx)?;
                session.close().await?
            }
            CommitPolicy::Reachability => reachable_from_refs(ctx, store, commit).await?,
        };

        tracing::info!(
            function = %AuthFunction::AuthorizeCommit,
            policy = ?self.commit_policy,
            commit = %commit,
            authorized,
            "Commit gate"
        );
        Ok(authorized)
    }
}

async fn reachable_from_refs(
    ctx: &RequestContext,
    store: &dyn RefStore,
    commit: &ObjectId,
) -> Result<bool, AuthzError> {
    let Some(repo) = &ctx.repo else {
        tracing::debug!(commit = %commit, "No repository resolved, commit not reachable");
        return Ok(false);
    };

    let mut list = RefList::new();
    store.collect_branch_refs(&mut list).await?;
    if repo.enable_remote_branches {
        store.collect_remote_refs(&mut list).await?;
    }

    for entry in list.iter() {
        if store.is_ancestor(commit, &entry.tip).await? {
            tracing::debug!(commit = %commit, via = %entry.name, "Commit reachable");
            return Ok(true);
        }
    }

    tracing::debug!(commit = %commit, refs = list.len(), "Commit unreachable from any ref");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    use super::*;
    use crate::context::{Query, Repository};
    use crate::filter::{FailAt, FailingEvaluator, StubEvaluator};
    use crate::refs::{CanonicalRef, MemoryRefStore};

    fn oid(n: u8) -> ObjectId {
        ObjectId::from_bytes(&[n; 20]).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext {
            query: Query {
                repo: Some("linux.git".into()),
                head: Some("main".into()),
                ..Default::default()
            },
            ..Default::default()
        }
        .with_repo(Repository {
            url: "linux.git".into(),
            name: "linux".into(),
            ..Default::default()
        })
    }

    fn reachability() -> Authorizer {
        Authorizer::new(AuthFilter::new(Arc::new(StubEvaluator::constant(true))))
            .with_commit_policy(CommitPolicy::Reachability)
    }

    /// A store whose backend is gone: every call errors.
    struct BrokenRefStore;

    fn broken<T>() -> Result<T, AuthzError> {
        Err(AuthzError::RefStore("object database unavailable".into()))
    }

    impl RefStore for BrokenRefStore {
        fn canonicalize<'a>(
            &'a self,
            _name: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<CanonicalRef<'a>>, AuthzError>> + Send + 'a>>
        {
            Box::pin(async { broken() })
        }

        fn collect_branch_refs<'a>(
            &'a self,
            _list: &'a mut RefList,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
            Box::pin(async { broken() })
        }

        fn collect_remote_refs<'a>(
            &'a self,
            _list: &'a mut RefList,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
            Box::pin(async { broken() })
        }

        fn is_ancestor<'a>(
            &'a self,
            _commit: &'a ObjectId,
            _tip: &'a ObjectId,
        ) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send + 'a>> {
            Box::pin(async { broken() })
        }
    }

    /// main -> C3 -> C2 -> C1, feature -> C5 -> C4, origin/next -> C7 -> C6
    fn graph() -> MemoryRefStore {
        MemoryRefStore::new()
            .with_ref("refs/heads/main", oid(3))
            .with_ref("refs/heads/feature", oid(5))
            .with_ref("refs/remotes/origin/next", oid(7))
            .with_commit(oid(3), vec![oid(2)])
            .with_commit(oid(2), vec![oid(1)])
            .with_commit(oid(5), vec![oid(4)])
            .with_commit(oid(7), vec![oid(6)])
    }

    #[tokio::test]
    async fn unconfigured_gates_authorize_everything() {
        let authz = Authorizer::default();
        let store = MemoryRefStore::new();
        let empty = RequestContext::default();

        assert!(authz.authorize_repo(&empty, None).await.unwrap());
        assert!(authz.authorize_repo(&ctx(), Some("linux.git")).await.unwrap());
        assert!(authz.authorize_commit(&empty, &store, &oid(9)).await.unwrap());
    }

    #[tokio::test]
    async fn unconfigured_ref_gate_authorizes_any_name() {
        let authz = Authorizer::default();
        assert!(authz.authorize_ref(&ctx(), &graph(), "main").await.unwrap());
        assert!(authz.authorize_ref(&ctx(), &graph(), "nope").await.unwrap());
        assert!(authz
            .authorize_ref(&RequestContext::default(), &graph(), "")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unconfigured_reachability_authorizes_unreachable_commit() {
        let authz = Authorizer::default().with_commit_policy(CommitPolicy::Reachability);
        let store = graph();
        assert!(authz.authorize_commit(&ctx(), &store, &oid(9)).await.unwrap());
        assert_eq!(store.ancestry_checks(), 0);
    }

    #[tokio::test]
    async fn repo_gate_follows_policy() {
        let stub = Arc::new(StubEvaluator::new(|args| args.repo() == "public.git"));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()));

        assert!(authz.authorize_repo(&ctx(), Some("public.git")).await.unwrap());
        assert!(!authz.authorize_repo(&ctx(), Some("secret.git")).await.unwrap());

        let calls = stub.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.function() == "authorize-repo"));
        assert!(calls.iter().all(|c| c.ref_or_object() == "main"));
        assert_eq!(stub.close_count(), 2);
    }

    #[tokio::test]
    async fn ref_gate_passes_canonical_name() {
        let stub = Arc::new(StubEvaluator::constant(false));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()));

        let authorized = authz.authorize_ref(&ctx(), &graph(), "main").await.unwrap();

        assert!(!authorized);
        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function(), "authorize-ref");
        assert_eq!(calls[0].repo(), "linux.git");
        assert_eq!(calls[0].ref_or_object(), "refs/heads/main");
    }

    #[tokio::test]
    async fn ref_gate_denies_unresolvable_name_without_policy() {
        let stub = Arc::new(StubEvaluator::constant(true));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()));

        assert!(!authz.authorize_ref(&ctx(), &graph(), "nope").await.unwrap());
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn direct_commit_gate_passes_hex_id() {
        let stub = Arc::new(StubEvaluator::constant(true));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()));
        let store = graph();

        assert!(authz.authorize_commit(&ctx(), &store, &oid(1)).await.unwrap());

        let calls = stub.calls();
        assert_eq!(calls[0].function(), "authorize-commit");
        assert_eq!(calls[0].ref_or_object(), oid(1).to_hex());
        assert_eq!(store.ancestry_checks(), 0);
    }

    #[tokio::test]
    async fn reachability_authorizes_ancestor_of_branch() {
        let authz = reachability();
        assert!(authz.authorize_commit(&ctx(), &graph(), &oid(1)).await.unwrap());
    }

    #[tokio::test]
    async fn reachability_denies_unreachable_commit() {
        let authz = reachability();
        assert!(!authz.authorize_commit(&ctx(), &graph(), &oid(9)).await.unwrap());
    }

    #[tokio::test]
    async fn reachability_ignores_policy_program() {
        let stub = Arc::new(StubEvaluator::constant(false));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()))
            .with_commit_policy(CommitPolicy::Reachability);

        assert!(authz.authorize_commit(&ctx(), &graph(), &oid(2)).await.unwrap());
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn reachability_stops_at_first_matching_ref() {
        let authz = reachability();
        let store = graph();

        // refs/heads/feature sorts first and contains C5
        assert!(authz.authorize_commit(&ctx(), &store, &oid(5)).await.unwrap());
        assert_eq!(store.ancestry_checks(), 1);

        // the list from the previous check is gone; a new check starts fresh
        assert!(authz.authorize_commit(&ctx(), &store, &oid(5)).await.unwrap());
        assert_eq!(store.ancestry_checks(), 2);
    }

    #[tokio::test]
    async fn reachability_considers_remotes_only_when_enabled() {
        let authz = reachability();
        let store = graph();

        assert!(!authz.authorize_commit(&ctx(), &store, &oid(6)).await.unwrap());

        let mut with_remotes = ctx();
        if let Some(repo) = with_remotes.repo.as_mut() {
            repo.enable_remote_branches = true;
        }
        assert!(authz.authorize_commit(&with_remotes, &store, &oid(6)).await.unwrap());
    }

    #[tokio::test]
    async fn reachability_without_repository_denies() {
        let authz = reachability();
        let store = graph();
        let no_repo = RequestContext::default();

        assert!(!authz.authorize_commit(&no_repo, &store, &oid(1)).await.unwrap());
        assert_eq!(store.ancestry_checks(), 0);
    }

    #[tokio::test]
    async fn ref_store_error_propagates_from_ref_gate() {
        let stub = Arc::new(StubEvaluator::constant(true));
        let authz = Authorizer::new(AuthFilter::new(stub.clone()));

        let err = authz
            .authorize_ref(&ctx(), &BrokenRefStore, "main")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthzError::RefStore(_)));
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn ref_store_error_propagates_from_reachability() {
        let err = reachability()
            .authorize_commit(&ctx(), &BrokenRefStore, &oid(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::RefStore(_)));
    }

    #[tokio::test]
    async fn direct_commit_gate_never_touches_ref_store() {
        let authz = Authorizer::new(AuthFilter::new(Arc::new(StubEvaluator::constant(true))));
        assert!(authz
            .authorize_commit(&ctx(), &BrokenRefStore, &oid(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn policy_start_failure_is_an_error_not_a_denial() {
        let evaluator = Arc::new(FailingEvaluator::new(FailAt::Open));
        let authz = Authorizer::new(AuthFilter::new(evaluator.clone()));

        let err = authz
            .authorize_repo(&ctx(), Some("linux.git"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Spawn { .. }));

        let err = authz
            .authorize_ref(&ctx(), &graph(), "main")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Spawn { .. }));

        let err = authz
            .authorize_commit(&ctx(), &graph(), &oid(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Spawn { .. }));

        // one attempt per gate, never retried
        assert_eq!(evaluator.open_count(), 3);
    }

    #[tokio::test]
    async fn abnormal_policy_exit_is_an_error_not_a_denial() {
        let evaluator = Arc::new(FailingEvaluator::new(FailAt::Close));
        let authz = Authorizer::new(AuthFilter::new(evaluator.clone()));

        let err = authz
            .authorize_repo(&ctx(), Some("linux.git"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::AbnormalExit(_)));

        let err = authz
            .authorize_commit(&ctx(), &graph(), &oid(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::AbnormalExit(_)));
        assert_eq!(evaluator.open_count(), 2);
    }
}
