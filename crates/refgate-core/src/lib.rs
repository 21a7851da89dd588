//! Authorization gates and page dispatch for a git content browser.
//!
//! Before a repository, reference or commit is shown, an external policy
//! program is consulted through the filter protocol in [`filter`]. The
//! [`dispatch`] table decides which page handler may run, and [`router`]
//! combines the two for one request.
//!
//! ```rust,no_run
//! use refgate_core::{Authorizer, RefgateConfig, RequestContext, RequestEnv, Router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RefgateConfig::load(None)?;
//! let authorizer = Authorizer::new(config.build_filter())
//!     .with_commit_policy(config.authz.commit_policy);
//!
//! let ctx = RequestContext::from_env(RequestEnv::from_process_env(), config.site.clone());
//! let route = Router::new(&authorizer).route(&ctx).await?;
//! println!("{}", route.page);
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod filter;
pub mod oid;
pub mod refs;
pub mod router;

pub use authz::{Authorizer, CommitPolicy};
pub use config::RefgateConfig;
pub use context::{Query, Repository, RequestContext, RequestEnv};
pub use error::{AuthzError, ConfigError, DispatchError, RouteError};
pub use filter::{AuthFilter, AuthFunction, FilterArgs, PolicyEvaluator};
pub use oid::ObjectId;
pub use refs::{CanonicalRef, MemoryRefStore, RefEntry, RefList, RefStore};
pub use router::{Route, Router};
