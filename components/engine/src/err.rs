use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to build the object backend"))]
    CreateBackend {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        error: opendal::Error,
    },

    StoreError {
        source: cumulo_store::err::Error,
    },

    MapError {
        source: cumulo_map::err::Error,
    },
}

impl From<cumulo_store::err::Error> for Error {
    fn from(value: cumulo_store::err::Error) -> Self {
        Self::StoreError { source: value }
    }
}

impl From<cumulo_map::err::Error> for Error {
    fn from(value: cumulo_map::err::Error) -> Self {
        Self::MapError { source: value }
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StoreError { source } if source.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
