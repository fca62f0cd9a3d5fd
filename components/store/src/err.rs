use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("object backend operation failed"))]
    OpenDal {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        error: opendal::Error,
    },

    #[snafu(display("range download returned {got} bytes, wanted {want}"))]
    ShortRead {
        want: usize,
        got: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("worker pool is shut down"))]
    ProxyClosed {
        #[snafu(implicit)]
        location: Location,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::OpenDal { error, .. } if error.kind() == opendal::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
