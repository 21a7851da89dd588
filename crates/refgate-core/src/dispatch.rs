//! The page dispatch table.
//!
//! Maps a page name to its handler plus two capability flags. The router
//! consults the flags; the table itself enforces nothing.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::context::RequestContext;
use crate::error::DispatchError;

/// What a page handler asks the renderer to produce, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum PageRequest {
    About {
        repo_readme: bool,
    },
    Blob {
        id: Option<String>,
        path: Option<String>,
        head: Option<String>,
    },
    Commit {
        id: Option<String>,
    },
    Diff {
        new_id: Option<String>,
        old_id: Option<String>,
        path: Option<String>,
    },
    Log {
        id: Option<String>,
        offset: usize,
        max_count: usize,
        grep: Option<String>,
        search: Option<String>,
        path: Option<String>,
        show_msg: bool,
    },
    LsCache {
        cache_root: Option<PathBuf>,
    },
    Patch {
        id: Option<String>,
    },
    Refs,
    Repolist,
    Snapshot {
        head: Option<String>,
        id: Option<String>,
        prefix: String,
        path: Option<String>,
        formats: Vec<String>,
    },
    Summary,
    Tag {
        id: Option<String>,
    },
    Tree {
        id: Option<String>,
        path: Option<String>,
    },
}

pub type Handler = fn(&RequestContext) -> PageRequest;

/// One registered page.
#[derive(Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub handler: Handler,
    /// The page cannot run without a resolved repository.
    pub wants_repo: bool,
    /// The page is wrapped in the site header and footer.
    pub wants_layout: bool,
}

impl Command {
    const fn new(name: &'static str, handler: Handler, wants_repo: bool, wants_layout: bool) -> Self {
        Self {
            name,
            handler,
            wants_repo,
            wants_layout,
        }
    }

    pub fn run(&self, ctx: &RequestContext) -> PageRequest {
        (self.handler)(ctx)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("wants_repo", &self.wants_repo)
            .field("wants_layout", &self.wants_layout)
            .finish()
    }
}

static COMMANDS: [Command; 13] = [
    Command::new("about", about, false, true),
    Command::new("blob", blob, true, false),
    Command::new("commit", commit, true, true),
    Command::new("diff", diff, true, true),
    Command::new("log", log, true, true),
    Command::new("ls_cache", ls_cache, false, false),
    Command::new("patch", patch, true, false),
    Command::new("refs", refs, true, true),
    Command::new("repolist", repolist, false, false),
    Command::new("snapshot", snapshot, true, false),
    Command::new("summary", summary, true, true),
    Command::new("tag", tag, true, true),
    Command::new("tree", tree, true, true),
];

/// Every registered page, in table order.
pub fn commands() -> &'static [Command] {
    &COMMANDS
}

/// Exact, case-sensitive lookup.
pub fn lookup(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|command| command.name == name)
}

/// The page shown when none was requested.
pub fn default_page(ctx: &RequestContext) -> &'static str {
    if ctx.repo.is_some() {
        "summary"
    } else {
        "repolist"
    }
}

/// The requested page name, or the default.
pub fn page_name(ctx: &RequestContext) -> &str {
    ctx.query
        .page
        .as_deref()
        .unwrap_or_else(|| default_page(ctx))
}

pub fn get_command(ctx: &RequestContext) -> Result<&'static Command, DispatchError> {
    let page = page_name(ctx);
    lookup(page).ok_or_else(|| DispatchError::UnknownPage(page.to_string()))
}

/// Last path component of a repository url, without a `.git` suffix.
pub fn repo_basename(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn about(ctx: &RequestContext) -> PageRequest {
    PageRequest::About {
        repo_readme: ctx.repo.is_some(),
    }
}

fn blob(ctx: &RequestContext) -> PageRequest {
    PageRequest::Blob {
        id: ctx.query.sha1.clone(),
        path: ctx.query.path.clone(),
        head: ctx.query.head.clone(),
    }
}

fn commit(ctx: &RequestContext) -> PageRequest {
    PageRequest::Commit {
        id: ctx.query.sha1.clone(),
    }
}

fn diff(ctx: &RequestContext) -> PageRequest {
    PageRequest::Diff {
        new_id: ctx.query.sha1.clone(),
        old_id: ctx.query.sha2.clone(),
        path: ctx.query.path.clone(),
    }
}

fn log(ctx: &RequestContext) -> PageRequest {
    PageRequest::Log {
        id: ctx.query.sha1.clone(),
        offset: ctx.query.ofs,
        max_count: ctx.site.max_commit_count,
        grep: ctx.query.grep.clone(),
        search: ctx.query.search.clone(),
        path: ctx.query.path.clone(),
        show_msg: true,
    }
}

fn ls_cache(ctx: &RequestContext) -> PageRequest {
    PageRequest::LsCache {
        cache_root: ctx.site.cache_root.clone(),
    }
}

fn patch(ctx: &RequestContext) -> PageRequest {
    PageRequest::Patch {
        id: ctx.query.sha1.clone(),
    }
}

fn refs(_ctx: &RequestContext) -> PageRequest {
    PageRequest::Refs
}

fn repolist(_ctx: &RequestContext) -> PageRequest {
    PageRequest::Repolist
}

fn snapshot(ctx: &RequestContext) -> PageRequest {
    let (prefix, formats) = match &ctx.repo {
        Some(repo) => (repo_basename(&repo.url).to_string(), repo.snapshots.clone()),
        None => (String::new(), Vec::new()),
    };
    PageRequest::Snapshot {
        head: ctx.query.head.clone(),
        id: ctx.query.sha1.clone(),
        prefix,
        path: ctx.query.path.clone(),
        formats,
    }
}

fn summary(_ctx: &RequestContext) -> PageRequest {
    PageRequest::Summary
}

fn tag(ctx: &RequestContext) -> PageRequest {
    PageRequest::Tag {
        id: ctx.query.sha1.clone(),
    }
}

fn tree(ctx: &RequestContext) -> PageRequest {
    PageRequest::Tree {
        id: ctx.query.sha1.clone(),
        path: ctx.query.path.clone(),
    }
}
