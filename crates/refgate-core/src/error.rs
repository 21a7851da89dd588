use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("failed to start policy program {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting on policy program: {0}")]
    Wait(#[source] std::io::Error),

    #[error("policy program terminated abnormally: {0}")]
    AbnormalExit(String),

    #[error("ref store error: {0}")]
    RefStore(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectIdError {
    #[error("invalid hex object id: {0}")]
    InvalidHex(String),

    #[error("object id has {0} bytes, expected 20 or 32")]
    BadLength(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown page: {0}")]
    UnknownPage(String),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unknown page: {0}")]
    UnknownPage(String),

    #[error("page '{page}' requires a repository")]
    RepositoryRequired { page: String },

    #[error("access to repository '{repo}' denied")]
    Forbidden { repo: String },

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

impl From<DispatchError> for RouteError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownPage(page) => RouteError::UnknownPage(page),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
