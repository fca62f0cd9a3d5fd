use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to encode extent map checkpoint"))]
    EncodeCheckpoint {
        #[snafu(implicit)]
        location: Location,
        source: bincode::Error,
    },

    #[snafu(display("failed to decode extent map checkpoint"))]
    DecodeCheckpoint {
        #[snafu(implicit)]
        location: Location,
        source: bincode::Error,
    },

    #[snafu(display("extent map worker is gone"))]
    WorkerStopped {
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
